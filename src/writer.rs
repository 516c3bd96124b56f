use std::io::Result;

/// Positional sink for serialized btrie files.
///
/// A built btrie is written in one piece at offset 0, but positional writes
/// let callers embed it in a larger file or reuse a preallocated handle.
/// Blanket-implemented for `FileExt` handles on Unix and Windows.
pub trait BTrieWriter {
    /// Writes all of `data` at the given absolute `offset`.
    fn write_at(&self, data: &[u8], offset: u64) -> Result<()>;
}

#[cfg(unix)]
impl<T: std::os::unix::fs::FileExt> BTrieWriter for T {
    fn write_at(&self, data: &[u8], offset: u64) -> Result<()> {
        self.write_all_at(data, offset)
    }
}

#[cfg(windows)]
impl<T: std::os::windows::fs::FileExt> BTrieWriter for T {
    fn write_at(&self, mut data: &[u8], mut offset: u64) -> Result<()> {
        while !data.is_empty() {
            let written = self.seek_write(data, offset)?;
            if written == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "failed to write whole buffer",
                ));
            }
            data = &data[written..];
            offset += written as u64;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::*;

    #[test]
    fn test_write_into_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("en.btrie");
        let file = std::fs::File::create(&path).unwrap();

        let mut builder = BTrieBuilder::default();
        builder
            .insert(&[Token::word("hello")], "@builtin.hello")
            .unwrap();
        let info = builder.build_into(&file).unwrap();
        drop(file);

        let data = std::fs::read(&path).unwrap();
        assert_eq!(info.file_length, data.len() as u64);
        let btrie = BTrie::new(data).unwrap();
        assert_eq!(btrie.search(&["hello"]).unwrap(), Some("@builtin.hello"));
    }
}
