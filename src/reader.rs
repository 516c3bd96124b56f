use std::fmt;

use crate::meta::{BTrieHeader, NodeHeader, NodeKind};
use crate::{Error, Result, Token};

/// Immutable trie read directly from its serialized bytes.
///
/// A `BTrie` never deserializes the tree: lookups scan sibling runs in place,
/// so the buffer is typically a read-only memory map shared by every reader.
/// Any byte container works (`Vec<u8>`, `memmap2::Mmap`, ...).
///
/// Lookups return `Ok(None)` for a missing key. Errors always mean the buffer
/// is not a well formed btrie and are not worth retrying.
pub struct BTrie<B> {
    data: B,
    root: Run,
}

/// A contiguous run of sibling nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Run {
    offset: usize,
    size: usize,
}

impl Run {
    fn end(&self) -> usize {
        self.offset + self.size
    }
}

#[derive(Debug, Clone, Copy)]
enum Edge<'q> {
    Word(&'q [u8]),
    Wildcard,
}

impl<B: AsRef<[u8]>> BTrie<B> {
    /// Opens a btrie over `data`, validating the file header and root block.
    ///
    /// # Errors
    ///
    /// Returns a format error when the magic, version or root block length
    /// do not describe a readable file.
    pub fn new(data: B) -> Result<Self> {
        let bytes = data.as_ref();
        BTrieHeader::deserialize(bytes)?;
        let nodes = Nodes { data: bytes };
        let size = nodes.u16_at(BTrieHeader::ROOT_OFFSET)? as usize;
        let root = Run {
            offset: BTrieHeader::ROOT_BLOCK_OFFSET,
            size,
        };
        nodes.check_end(root.end(), BTrieHeader::ROOT_OFFSET)?;
        Ok(Self { data, root })
    }

    /// Size of the underlying buffer in bytes.
    pub fn byte_len(&self) -> usize {
        self.data.as_ref().len()
    }

    /// Raw serialized bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_ref()
    }

    /// Gives back the underlying buffer.
    pub fn into_inner(self) -> B {
        self.data
    }

    /// Looks up a sequence of words.
    ///
    /// At each level an exact word edge is preferred and the wildcard edge is
    /// tried only when no exact edge exists. A sequence matches only if a leaf
    /// sits exactly where it ends; being a prefix of a longer key is a miss.
    pub fn search<S: AsRef<str>>(&self, sequence: &[S]) -> Result<Option<&str>> {
        let nodes = self.nodes();
        let mut run = self.root;
        for word in sequence {
            let word = word.as_ref().as_bytes();
            run = match nodes.find_edge(run, Edge::Word(word))? {
                Some(child) => child,
                None => match nodes.find_edge(run, Edge::Wildcard)? {
                    Some(child) => child,
                    None => return Ok(None),
                },
            };
        }
        nodes.resolve(run)
    }

    /// Looks up a key literally: wildcard tokens follow only the wildcard
    /// edge, and words never fall back to it.
    pub fn search_key(&self, key: &[Token]) -> Result<Option<&str>> {
        let nodes = self.nodes();
        let mut run = self.root;
        for token in key {
            let edge = match token {
                Token::Word(word) => Edge::Word(word.as_bytes()),
                Token::Wildcard => Edge::Wildcard,
            };
            run = match nodes.find_edge(run, edge)? {
                Some(child) => child,
                None => return Ok(None),
            };
        }
        nodes.resolve(run)
    }

    /// Creates an iterator over every stored (key, value) pair.
    ///
    /// Entries come out depth-first in on-disk order. The first structural
    /// error is yielded once and ends the iteration.
    pub fn iter(&self) -> BTrieIter<'_> {
        BTrieIter {
            nodes: self.nodes(),
            stack: vec![Frame {
                pos: self.root.offset,
                end: self.root.end(),
                depth: 0,
            }],
            prefix: Vec::new(),
            failed: false,
        }
    }

    fn nodes(&self) -> Nodes<'_> {
        Nodes {
            data: self.data.as_ref(),
        }
    }
}

impl<B: AsRef<[u8]>> fmt::Debug for BTrie<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BTrie")
            .field("bytes", &self.byte_len())
            .field("root_size", &self.root.size)
            .finish()
    }
}

fn corrupt(offset: usize, reason: &'static str) -> Error {
    Error::Corrupt { offset, reason }
}

/// Bounds-checked node decoding over a raw buffer.
#[derive(Clone, Copy)]
struct Nodes<'a> {
    data: &'a [u8],
}

impl<'a> Nodes<'a> {
    fn check_end(&self, end: usize, at: usize) -> Result<usize> {
        if end > self.data.len() {
            return Err(corrupt(at, "node extends past end of file"));
        }
        Ok(end)
    }

    fn slice(&self, offset: usize, length: usize) -> Result<&'a [u8]> {
        let end = self.check_end(offset + length, offset)?;
        Ok(&self.data[offset..end])
    }

    fn u8_at(&self, offset: usize) -> Result<u8> {
        Ok(self.slice(offset, 1)?[0])
    }

    fn u16_at(&self, offset: usize) -> Result<u16> {
        let bytes = self.slice(offset, 2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn u32_at(&self, offset: usize) -> Result<u32> {
        let bytes = self.slice(offset, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn header(&self, offset: usize) -> Result<NodeHeader> {
        NodeHeader::decode(self.u8_at(offset)?, offset)
    }

    fn key(&self, offset: usize) -> Result<&'a [u8]> {
        let length = self.u8_at(offset + 1)? as usize;
        self.slice(offset + 2, length)
    }

    /// Returns the offset just past the node at `offset`.
    fn skip_node(&self, offset: usize) -> Result<usize> {
        let header = self.header(offset)?;
        let end = match header.kind {
            NodeKind::Data => offset + 3 + self.u16_at(offset + 1)? as usize,
            NodeKind::Leaf => offset + 5,
            NodeKind::Compact => offset + 2 + self.u8_at(offset + 1)? as usize,
            NodeKind::Intermediate => offset + 2 + self.u8_at(offset + 1)? as usize + 6,
        };
        self.check_end(end, offset)
    }

    /// Skips a whole entry: any compact nodes plus the node ending the chain.
    fn skip_entry(&self, mut offset: usize) -> Result<usize> {
        while self.header(offset)?.kind == NodeKind::Compact {
            offset = self.skip_node(offset)?;
        }
        match self.header(offset)?.kind {
            NodeKind::Leaf | NodeKind::Intermediate => self.skip_node(offset),
            _ => Err(corrupt(offset, "entry does not end in a leaf or intermediate node")),
        }
    }

    fn edge_token(&self, offset: usize, header: NodeHeader) -> Result<Token> {
        let key = self.key(offset)?;
        if header.is_wildcard() {
            if !key.is_empty() {
                return Err(corrupt(offset, "wildcard edge with a non-empty key"));
            }
            return Ok(Token::Wildcard);
        }
        std::str::from_utf8(key)
            .map(Token::word)
            .map_err(|_| corrupt(offset, "key is not valid utf-8"))
    }

    /// Follows an edge node at `offset` to the run holding its children.
    fn child_run(&self, offset: usize, header: NodeHeader) -> Result<Run> {
        let after_key = offset + 2 + self.u8_at(offset + 1)? as usize;
        match header.kind {
            NodeKind::Compact => {
                self.check_end(after_key + 1, offset)?;
                Ok(Run {
                    offset: after_key,
                    size: 1,
                })
            }
            NodeKind::Intermediate => {
                let run = Run {
                    offset: self.u32_at(after_key)? as usize,
                    size: self.u16_at(after_key + 4)? as usize,
                };
                if run.offset <= offset {
                    return Err(corrupt(offset, "children block precedes its parent"));
                }
                self.check_end(run.end(), offset)?;
                Ok(run)
            }
            _ => Err(corrupt(offset, "expected an edge node")),
        }
    }

    /// Scans `run` for the edge matching `edge`; leaves are passed over.
    fn find_edge(&self, run: Run, edge: Edge<'_>) -> Result<Option<Run>> {
        let mut pos = run.offset;
        while pos < run.end() {
            let header = self.header(pos)?;
            match header.kind {
                NodeKind::Data => return Err(corrupt(pos, "data node inside a key block")),
                NodeKind::Leaf => {
                    pos = self.skip_node(pos)?;
                    continue;
                }
                NodeKind::Compact | NodeKind::Intermediate => {}
            }

            let key = self.key(pos)?;
            let matched = match edge {
                Edge::Wildcard if header.is_wildcard() => {
                    if !key.is_empty() {
                        return Err(corrupt(pos, "wildcard edge with a non-empty key"));
                    }
                    true
                }
                Edge::Wildcard => false,
                Edge::Word(word) => !header.is_wildcard() && key == word,
            };
            if matched {
                return self.child_run(pos, header).map(Some);
            }
            pos = self.skip_entry(pos)?;
        }
        Ok(None)
    }

    /// Reads the value a leaf at `offset` points to.
    fn leaf_value(&self, offset: usize) -> Result<&'a str> {
        let target = self.u32_at(offset + 1)? as usize;
        let header = self.header(target)?;
        if header.kind != NodeKind::Data || header.flags != 0 {
            return Err(corrupt(target, "leaf does not point to a data node"));
        }
        let length = self.u16_at(target + 1)? as usize;
        let payload = self.slice(target + 3, length)?;
        std::str::from_utf8(payload).map_err(|_| corrupt(target, "value is not valid utf-8"))
    }

    /// A run terminates a sequence only if it starts with a leaf.
    fn resolve(&self, run: Run) -> Result<Option<&'a str>> {
        // only the root of an empty trie has an empty run
        if run.size == 0 {
            return Ok(None);
        }
        let header = self.header(run.offset)?;
        match header.kind {
            NodeKind::Data => Err(corrupt(run.offset, "data node inside a key block")),
            NodeKind::Leaf => self.leaf_value(run.offset).map(Some),
            NodeKind::Compact | NodeKind::Intermediate => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    pos: usize,
    end: usize,
    depth: usize,
}

/// Iterator over all entries of a [`BTrie`].
pub struct BTrieIter<'a> {
    nodes: Nodes<'a>,
    stack: Vec<Frame>,
    prefix: Vec<Token>,
    failed: bool,
}

impl<'a> BTrieIter<'a> {
    /// Walks one entry starting at `pos` in the top frame. Returns the value
    /// if the entry ends in a leaf; descends if it ends in an intermediate.
    fn step(&mut self, mut pos: usize) -> Result<Option<(Vec<Token>, &'a str)>> {
        let top = self.stack.len() - 1;
        loop {
            let header = self.nodes.header(pos)?;
            match header.kind {
                NodeKind::Data => return Err(corrupt(pos, "data node inside a key block")),
                NodeKind::Leaf => {
                    let value = self.nodes.leaf_value(pos)?;
                    self.stack[top].pos = self.nodes.skip_node(pos)?;
                    return Ok(Some((self.prefix.clone(), value)));
                }
                NodeKind::Compact => {
                    self.prefix.push(self.nodes.edge_token(pos, header)?);
                    pos = self.nodes.skip_node(pos)?;
                }
                NodeKind::Intermediate => {
                    self.prefix.push(self.nodes.edge_token(pos, header)?);
                    let child = self.nodes.child_run(pos, header)?;
                    self.stack[top].pos = self.nodes.skip_node(pos)?;
                    self.stack.push(Frame {
                        pos: child.offset,
                        end: child.end(),
                        depth: self.prefix.len(),
                    });
                    return Ok(None);
                }
            }
        }
    }
}

impl<'a> Iterator for BTrieIter<'a> {
    type Item = Result<(Vec<Token>, &'a str)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            let frame = *self.stack.last()?;
            if frame.pos >= frame.end {
                self.stack.pop();
                continue;
            }
            self.prefix.truncate(frame.depth);
            match self.step(frame.pos) {
                Ok(Some(entry)) => return Some(Ok(entry)),
                Ok(None) => continue,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::*;

    fn build(entries: &[(&[&str], &str)]) -> Vec<u8> {
        let mut builder = BTrieBuilder::default();
        for (k, v) in entries {
            let k: Vec<Token> = k
                .iter()
                .map(|w| if *w == "*" { Token::Wildcard } else { Token::word(*w) })
                .collect();
            builder.insert(&k, *v).unwrap();
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_exact_edge_preferred_over_wildcard() {
        let data = build(&[
            (&["play", "*"], "generic"),
            (&["play", "jazz"], "jazz"),
            (&["play", "*", "loud"], "generic loud"),
        ]);
        let btrie = BTrie::new(data).unwrap();
        assert_eq!(btrie.search(&["play", "jazz"]).unwrap(), Some("jazz"));
        assert_eq!(btrie.search(&["play", "rock"]).unwrap(), Some("generic"));
        assert_eq!(
            btrie.search(&["play", "rock", "loud"]).unwrap(),
            Some("generic loud")
        );
        // no backtracking into the wildcard once the exact edge was taken
        assert_eq!(btrie.search(&["play", "jazz", "loud"]).unwrap(), None);

        assert_eq!(
            btrie
                .search_key(&[Token::word("play"), Token::Wildcard])
                .unwrap(),
            Some("generic")
        );
        assert_eq!(
            btrie
                .search_key(&[Token::word("play"), Token::word("rock")])
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_root_value() {
        let data = build(&[(&[], "empty"), (&["a"], "a")]);
        let btrie = BTrie::new(data).unwrap();
        assert_eq!(btrie.search::<&str>(&[]).unwrap(), Some("empty"));
        assert_eq!(btrie.search(&["a"]).unwrap(), Some("a"));
    }

    #[test]
    fn test_unicode_keys() {
        let data = build(&[(&["ciao", "caffè"], "☕"), (&["日本", "*"], "jp")]);
        let btrie = BTrie::new(data).unwrap();
        assert_eq!(btrie.search(&["ciao", "caffè"]).unwrap(), Some("☕"));
        assert_eq!(btrie.search(&["日本", "東京"]).unwrap(), Some("jp"));
    }

    #[test]
    fn test_iter() {
        let data = build(&[
            (&["get", "a", "cat"], "cat"),
            (&["get", "a", "cat", "picture"], "picture"),
            (&["get", "*"], "any"),
            (&["play"], "play"),
        ]);
        let btrie = BTrie::new(data).unwrap();
        let mut entries = btrie
            .iter()
            .map(|e| e.map(|(k, v)| (display_key(&k), v)))
            .collect::<Result<Vec<_>>>()
            .unwrap();
        entries.sort();
        assert_eq!(
            entries,
            vec![
                ("get *".to_string(), "any"),
                ("get a cat".to_string(), "cat"),
                ("get a cat picture".to_string(), "picture"),
                ("play".to_string(), "play"),
            ]
        );
    }

    #[test]
    fn test_invalid_header() {
        BTrie::new(Vec::new()).unwrap_err();
        BTrie::new(b"ALTR".to_vec()).unwrap_err();

        let err = BTrie::new(b"ALTX\x01\x00\x00\x00".to_vec()).unwrap_err();
        assert!(matches!(err, Error::InvalidMagic(_)));
        assert!(err.is_format_error());

        let err = BTrie::new(b"ALTR\x02\x00\x00\x00".to_vec()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedVersion(2)));

        // root block claims more bytes than exist
        let err = BTrie::new(b"ALTR\x01\x00\x10\x00".to_vec()).unwrap_err();
        assert!(matches!(err, Error::Corrupt { .. }));
    }

    #[test]
    fn test_corrupt_data() {
        let mut builder = BTrieBuilder::default();
        builder.insert(&[Token::word("a")], "x").unwrap();
        let good = builder.build().unwrap();

        // leaf pointer past the end
        let mut data = good.clone();
        data[12..16].copy_from_slice(&1000u32.to_le_bytes());
        let btrie = BTrie::new(data).unwrap();
        assert!(btrie.search(&["a"]).unwrap_err().is_format_error());

        // leaf pointer at a non-data node
        let mut data = good.clone();
        data[12..16].copy_from_slice(&8u32.to_le_bytes());
        let btrie = BTrie::new(data).unwrap();
        assert!(matches!(
            btrie.search(&["a"]).unwrap_err(),
            Error::Corrupt { offset: 8, .. }
        ));

        // unknown node kind in the root block
        let mut data = good.clone();
        data[8] = 0x07;
        let btrie = BTrie::new(data).unwrap();
        btrie.search(&["a"]).unwrap_err();
        assert!(btrie.iter().next().unwrap().is_err());

        // data node where a key was expected
        let mut data = good.clone();
        data[8] = 0x01;
        let btrie = BTrie::new(data).unwrap();
        btrie.search(&["a"]).unwrap_err();

        // key length running past the end
        let mut data = good.clone();
        data[9] = 0xff;
        let btrie = BTrie::new(data).unwrap();
        btrie.search(&["b"]).unwrap_err();

        // a miss stays a miss on a healthy file
        let btrie = BTrie::new(good).unwrap();
        assert_eq!(btrie.search(&["b"]).unwrap(), None);
    }

    #[test]
    fn test_intermediate_pointing_backwards() {
        let mut builder = BTrieBuilder::default();
        builder.insert(&[Token::word("a")], "x").unwrap();
        builder.insert(&[Token::word("a"), Token::word("b")], "y").unwrap();
        let mut data = builder.build().unwrap();
        // root block: intermediate "a" at 8, pointer at 11
        assert_eq!(data[8], 0x04);
        data[11..15].copy_from_slice(&8u32.to_le_bytes());
        let btrie = BTrie::new(data).unwrap();
        assert!(btrie.search(&["a"]).unwrap_err().is_format_error());
        assert!(btrie.iter().any(|e| e.is_err()));
    }
}
