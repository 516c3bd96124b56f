//! Offline compilation of example datasets into btrie snapshots.

use std::io::BufRead;

use serde::Serialize;

use crate::{
    BTrieBuilder, BTrieInfo, BTrieWriter, Error, ExactMatcher, ExampleRow, MatcherConfig, NulJoin,
    Result,
};

/// Counters collected while compiling.
#[derive(Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CompileStats {
    /// Examples accepted.
    pub examples: usize,
    /// Examples skipped because they could not be normalized.
    pub skipped: usize,
}

/// Accumulates examples and serializes them into a snapshot.
///
/// Examples go through the same normalization as
/// [`ExactMatcher::add`], so a compiled snapshot answers exactly what the
/// live overlay would have. Multiple codes for one key are stored oldest
/// first, joined by NUL.
///
/// ```
/// use exact_btrie::{BTrie, ExactCompiler};
///
/// let mut compiler = ExactCompiler::default();
/// compiler.add("play jazz", "@play \" jazz \"").unwrap();
/// let bytes = compiler.build().unwrap();
///
/// let snapshot = BTrie::new(bytes).unwrap();
/// assert_eq!(snapshot.search(&["play", "rock"]).unwrap(), Some("@play \" \\1 \""));
/// ```
#[derive(Debug, Default)]
pub struct ExactCompiler {
    matcher: ExactMatcher,
    stats: CompileStats,
}

impl ExactCompiler {
    /// Creates a compiler normalizing examples under `config`.
    pub fn new(config: MatcherConfig) -> Self {
        Self {
            matcher: ExactMatcher::new(config),
            stats: CompileStats::default(),
        }
    }

    /// Counters so far.
    pub fn stats(&self) -> CompileStats {
        self.stats
    }

    /// Adds one example.
    ///
    /// Examples rejected by normalization are logged and counted as skipped;
    /// any other error is returned.
    pub fn add(&mut self, utterance: &str, target_code: &str) -> Result<()> {
        match self.matcher.add(utterance, target_code) {
            Ok(()) => {
                self.stats.examples += 1;
                Ok(())
            }
            Err(e) if e.is_example_error() => {
                tracing::warn!(utterance, error = %e, "skipping example");
                self.stats.skipped += 1;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Adds every example of a TSV dataset.
    ///
    /// Lines are `id<TAB>utterance<TAB>code`, or
    /// `id<TAB>context<TAB>utterance<TAB>code` for contextual datasets.
    /// Blank lines and lines starting with `#` are ignored.
    pub fn add_dataset<R: BufRead>(&mut self, reader: R) -> Result<()> {
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            if let Some(row) = parse_dataset_line(&line, i + 1)? {
                self.add(&row.preprocessed, &row.target_code)?;
            }
        }
        Ok(())
    }

    /// Carries the overlay of a running matcher into this compile.
    ///
    /// Overlay entries are already normalized and are inserted as they are.
    pub fn merge_overlay(&mut self, matcher: &ExactMatcher) {
        let mut merged = 0;
        for (key, code) in matcher.iter() {
            self.matcher.insert_template(&key, code);
            merged += 1;
        }
        self.stats.examples += merged;
        tracing::debug!(merged, "merged overlay entries");
    }

    /// Stages every accumulated example into a builder.
    pub fn into_builder(self) -> Result<BTrieBuilder<NulJoin>> {
        let mut builder = BTrieBuilder::default();
        for (key, code) in self.matcher.iter() {
            builder.insert(&key, code)?;
        }
        Ok(builder)
    }

    /// Serializes into an in-memory buffer.
    pub fn build(self) -> Result<Vec<u8>> {
        let stats = self.stats;
        let (data, info) = self.into_builder()?.build_with_info()?;
        log_built(&stats, &info);
        Ok(data)
    }

    /// Serializes through `writer`, e.g. a file.
    pub fn build_into<W: BTrieWriter>(self, writer: &W) -> Result<BTrieInfo> {
        let stats = self.stats;
        let info = self.into_builder()?.build_into(writer)?;
        log_built(&stats, &info);
        Ok(info)
    }
}

fn log_built(stats: &CompileStats, info: &BTrieInfo) {
    tracing::info!(
        examples = stats.examples,
        skipped = stats.skipped,
        keys = info.key_count,
        bytes = info.file_length,
        "compiled exact match snapshot"
    );
}

/// Parses one dataset line; `line_no` is 1-based and only used in errors.
///
/// Returns `Ok(None)` for blank and comment lines.
pub fn parse_dataset_line(line: &str, line_no: usize) -> Result<Option<ExampleRow>> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let fields: Vec<&str> = line.split('\t').collect();
    let (utterance, code) = match fields.as_slice() {
        [_id, utterance, code] => (*utterance, *code),
        [_id, _context, utterance, code] => (*utterance, *code),
        _ => {
            return Err(Error::MalformedDataset {
                line: line_no,
                reason: format!("expected 3 or 4 tab-separated fields, found {}", fields.len()),
            })
        }
    };
    if utterance.trim().is_empty() {
        return Err(Error::MalformedDataset {
            line: line_no,
            reason: "empty utterance".to_string(),
        });
    }
    Ok(Some(ExampleRow::new(utterance, code)))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::{tokenize, BTrie, SnapshotBuffer};

    #[test]
    fn test_parse_dataset_line() {
        assert_eq!(parse_dataset_line("", 1).unwrap(), None);
        assert_eq!(parse_dataset_line("# comment", 1).unwrap(), None);
        assert_eq!(
            parse_dataset_line("1\tget xkcd\t@xkcd.get\r", 1).unwrap(),
            Some(ExampleRow::new("get xkcd", "@xkcd.get"))
        );
        assert_eq!(
            parse_dataset_line("R2\t$dialogue @org.thingpedia.dialogue.transaction . sys_greet ;\tyes\t$yes", 1)
                .unwrap(),
            Some(ExampleRow::new("yes", "$yes"))
        );
        assert!(matches!(
            parse_dataset_line("only one field", 7),
            Err(Error::MalformedDataset { line: 7, .. })
        ));
        assert!(parse_dataset_line("1\t \t@x", 2).is_err());
    }

    #[test]
    fn test_compile_dataset() {
        let dataset = "\
# exact examples
1\tget a cat\tnow => @com.thecatapi.get => notify
2\tget a cat\tnow => @com.thecatapi2.get => notify

3\tsearch for pizza\tfilter text =~ \" pizza \"
4\tpost on twitter\t@post \" hello \"
5\tpost hello\t@post \" hello
";
        let mut compiler = ExactCompiler::default();
        compiler.add_dataset(Cursor::new(dataset)).unwrap();
        assert_eq!(
            compiler.stats(),
            CompileStats {
                examples: 3,
                skipped: 2
            }
        );

        let snapshot = BTrie::new(compiler.build().unwrap()).unwrap();
        assert_eq!(
            snapshot.search(&["get", "a", "cat"]).unwrap(),
            Some("now => @com.thecatapi.get => notify\0now => @com.thecatapi2.get => notify")
        );
        assert_eq!(
            snapshot.search(&["search", "for", "tacos"]).unwrap(),
            Some("filter text =~ \" \\2 \"")
        );
        assert_eq!(snapshot.search(&["post", "on", "twitter"]).unwrap(), None);
    }

    #[test]
    fn test_oversized_code_is_skipped() {
        let mut compiler = ExactCompiler::default();
        compiler.add("ok", "@ok").unwrap();
        compiler
            .add("big", &format!("@x {}", "y".repeat(70000)))
            .unwrap();
        assert_eq!(
            compiler.stats(),
            CompileStats {
                examples: 1,
                skipped: 1
            }
        );

        let snapshot = BTrie::new(compiler.build().unwrap()).unwrap();
        assert_eq!(snapshot.search(&["ok"]).unwrap(), Some("@ok"));
        assert_eq!(snapshot.search(&["big"]).unwrap(), None);
    }

    #[test]
    fn test_malformed_dataset_aborts() {
        let mut compiler = ExactCompiler::default();
        let err = compiler
            .add_dataset(Cursor::new("1\tok\t@ok\nbroken line\n"))
            .unwrap_err();
        assert!(matches!(err, Error::MalformedDataset { line: 2, .. }));
    }

    #[test]
    fn test_merge_overlay() {
        let mut live = ExactMatcher::default();
        live.add("play jazz", "@play \" jazz \"").unwrap();
        live.add("stop", "@stop").unwrap();

        let mut compiler = ExactCompiler::default();
        compiler.add("stop", "@halt").unwrap();
        compiler.merge_overlay(&live);
        assert_eq!(compiler.stats().examples, 3);

        let mut matcher = ExactMatcher::default();
        matcher.install(BTrie::new(SnapshotBuffer::from(compiler.build().unwrap())).unwrap());
        assert_eq!(
            matcher.get("play rock").unwrap(),
            Some(vec![tokenize("@play \" rock \"")])
        );
        assert_eq!(
            matcher.get("stop").unwrap(),
            Some(vec![tokenize("@stop"), tokenize("@halt")])
        );
    }

    #[test]
    fn test_build_into_file() {
        let mut compiler = ExactCompiler::default();
        compiler.add("get xkcd", "@xkcd.get").unwrap();
        let file = tempfile::tempfile().unwrap();
        let info = compiler.build_into(&file).unwrap();
        assert_eq!(info.key_count, 1);
        assert_eq!(file.metadata().unwrap().len(), info.file_length);
    }

    #[test]
    fn test_compile_empty() {
        let compiler = ExactCompiler::default();
        let snapshot = BTrie::new(compiler.build().unwrap()).unwrap();
        assert_eq!(snapshot.search(&["anything"]).unwrap(), None);
        assert_eq!(snapshot.iter().count(), 0);
    }
}
