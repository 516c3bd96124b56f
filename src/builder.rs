use std::cmp::Ordering;
use std::collections::HashMap;

use foldhash::fast::FixedState;

use crate::meta::{
    BTrieHeader, BTrieInfo, NodeHeader, NodeKind, MAX_BLOCK_LENGTH, MAX_TOKEN_LENGTH,
    MAX_VALUE_LENGTH,
};
use crate::{BTrieWriter, Error, NulJoin, Result, Token, ValueCombine};

/// Builder type for emitting btrie files from (token sequence, value) pairs.
///
/// Pairs are accumulated in memory with [`insert`](Self::insert); repeated
/// keys are folded by the combine strategy `C` (NUL-joined by default).
/// [`build`](Self::build) then lays the tree out in the binary format read by
/// [`BTrie`](crate::BTrie). Each builder instance is consumed by a single
/// build.
#[derive(Debug)]
pub struct BTrieBuilder<C: ValueCombine<Aggregate = String> = NulJoin> {
    root: BuildNode,
    combine: C,
}

impl<C: ValueCombine<Aggregate = String> + Default> Default for BTrieBuilder<C> {
    fn default() -> Self {
        Self::with_combine(C::default())
    }
}

impl BTrieBuilder {
    /// Creates a builder that NUL-joins repeated values.
    #[allow(clippy::should_implement_trait)]
    pub fn default() -> Self {
        <Self as Default>::default()
    }
}

impl<C: ValueCombine<Aggregate = String>> BTrieBuilder<C> {
    /// Creates a builder folding repeated values with `combine`.
    pub fn with_combine(combine: C) -> Self {
        Self {
            root: BuildNode::default(),
            combine,
        }
    }

    /// Adds `value` under `sequence`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TokenTooLong`] when a word does not fit the one-byte
    /// key length of the format. Nothing is inserted in that case.
    pub fn insert(&mut self, sequence: &[Token], value: impl Into<String>) -> Result<()> {
        for token in sequence {
            if let Token::Word(word) = token {
                if word.len() > MAX_TOKEN_LENGTH {
                    return Err(Error::TokenTooLong(word.len()));
                }
            }
        }

        let mut node = &mut self.root;
        for token in sequence {
            node = node
                .children
                .entry(token.clone())
                .or_insert_with(BuildNode::default);
        }
        node.value = Some(self.combine.combine(node.value.take(), value.into()));
        node.inserts += 1;
        Ok(())
    }

    /// Consumes the builder and returns the serialized btrie.
    ///
    /// # Errors
    ///
    /// Fails when an aggregated value exceeds 65535 bytes, when a sibling
    /// block exceeds 65535 bytes, or when the file outgrows 4-byte offsets.
    pub fn build(self) -> Result<Vec<u8>> {
        self.build_with_info().map(|(data, _)| data)
    }

    /// Like [`build`](Self::build), also returning a [`BTrieInfo`] summary.
    pub fn build_with_info(self) -> Result<(Vec<u8>, BTrieInfo)> {
        let mut root = PlanNode::plan(None, &self.root)?;

        let mut layout = Layout::default();
        layout.buf.extend_from_slice(&BTrieHeader::default().serialize());

        // Root: a bare 2-byte length, its block follows immediately.
        root.block_slot = layout.buf.len();
        layout.buf.extend_from_slice(&[0, 0]);
        let (_, length) = layout.write_block(&mut root)?;
        layout.patch_u16(root.block_slot, length);
        for child in root.children.iter_mut() {
            layout.write_children(child)?;
        }
        let key_section_length = layout.buf.len() as u64;

        layout.write_data(&root)?;
        layout.offset()?;

        let info = BTrieInfo {
            file_length: layout.buf.len() as u64,
            key_count: layout.key_count,
            value_count: root.weight as u64,
            data_nodes: layout.data_nodes,
            shared_values: layout.shared_values,
            key_section_length,
        };
        Ok((layout.buf, info))
    }

    /// Builds and writes the btrie to `writer` starting at offset 0.
    ///
    /// # Examples
    ///
    /// ```
    /// use exact_btrie::{BTrieBuilder, Token};
    ///
    /// # fn main() -> exact_btrie::Result<()> {
    /// let mut builder = BTrieBuilder::default();
    /// builder.insert(&[Token::word("play"), Token::Wildcard], "play \\1")?;
    /// let file = tempfile::tempfile()?;
    /// let info = builder.build_into(&file)?;
    /// assert_eq!(info.key_count, 1);
    /// # Ok(())
    /// # }
    /// ```
    pub fn build_into<W: BTrieWriter>(self, writer: &W) -> Result<BTrieInfo> {
        let (data, info) = self.build_with_info()?;
        writer.write_at(&data, 0)?;
        Ok(info)
    }
}

#[derive(Debug, Default)]
struct BuildNode {
    value: Option<String>,
    inserts: usize,
    children: HashMap<Token, BuildNode, FixedState>,
}

/// Sorted, size-annotated view of a [`BuildNode`] used during layout.
struct PlanNode<'a> {
    token: Option<&'a Token>,
    value: Option<&'a str>,
    children: Vec<PlanNode<'a>>,
    weight: usize,
    leaf_slot: usize,
    block_slot: usize,
}

impl<'a> PlanNode<'a> {
    fn plan(token: Option<&'a Token>, node: &'a BuildNode) -> Result<Self> {
        if let Some(value) = node.value.as_deref() {
            if value.len() > MAX_VALUE_LENGTH {
                return Err(Error::ValueTooLong(value.len()));
            }
        }

        let mut children = node
            .children
            .iter()
            .map(|(t, c)| PlanNode::plan(Some(t), c))
            .collect::<Result<Vec<_>>>()?;
        children.sort_by(PlanNode::scan_order);

        let weight = node.inserts + children.iter().map(|c| c.weight).sum::<usize>();
        Ok(PlanNode {
            token,
            value: node.value.as_deref(),
            children,
            weight,
            leaf_slot: 0,
            block_slot: 0,
        })
    }

    /// Wildcard first, then heavier subtrees, then lexicographic.
    fn scan_order(a: &PlanNode<'_>, b: &PlanNode<'_>) -> Ordering {
        b.is_wildcard()
            .cmp(&a.is_wildcard())
            .then(b.weight.cmp(&a.weight))
            .then(a.token.cmp(&b.token))
    }

    fn is_wildcard(&self) -> bool {
        matches!(self.token, Some(Token::Wildcard))
    }

    /// A node whose key block would hold exactly one entry is inlined.
    fn is_compact(&self) -> bool {
        usize::from(self.value.is_some()) + self.children.len() == 1
    }
}

#[derive(Default)]
struct Layout<'a> {
    buf: Vec<u8>,
    values: HashMap<&'a str, u32, FixedState>,
    key_count: u64,
    data_nodes: u64,
    shared_values: u64,
}

impl<'a> Layout<'a> {
    fn offset(&self) -> Result<u32> {
        u32::try_from(self.buf.len()).map_err(|_| Error::FileTooLarge(self.buf.len()))
    }

    fn patch_u16(&mut self, at: usize, value: u16) {
        self.buf[at..at + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn patch_u32(&mut self, at: usize, value: u32) {
        self.buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn write_edge(&mut self, node: &PlanNode<'_>, kind: NodeKind) {
        let header = NodeHeader::new(kind, node.is_wildcard());
        self.buf.push(header.encode());
        match node.token {
            Some(Token::Word(word)) => {
                // insert() rejected longer words
                self.buf.push(word.len() as u8);
                self.buf.extend_from_slice(word.as_bytes());
            }
            _ => self.buf.push(0),
        }
    }

    fn write_leaf(&mut self, node: &mut PlanNode<'_>) {
        self.buf.push(NodeHeader::new(NodeKind::Leaf, false).encode());
        node.leaf_slot = self.buf.len();
        self.buf.extend_from_slice(&[0; 4]);
        self.key_count += 1;
    }

    fn write_key(&mut self, node: &mut PlanNode<'_>) -> Result<()> {
        if node.is_compact() {
            self.write_edge(node, NodeKind::Compact);
            if node.value.is_some() {
                self.write_leaf(node);
            }
            for child in node.children.iter_mut() {
                self.write_key(child)?;
            }
        } else {
            self.write_edge(node, NodeKind::Intermediate);
            node.block_slot = self.buf.len();
            self.buf.extend_from_slice(&[0; 6]);
        }
        Ok(())
    }

    /// Writes the contiguous sibling run below `node`: its own leaf first,
    /// then each child's key. Returns the run's offset and length.
    fn write_block(&mut self, node: &mut PlanNode<'_>) -> Result<(u32, u16)> {
        let begin = self.offset()?;
        if node.value.is_some() {
            self.write_leaf(node);
        }
        for child in node.children.iter_mut() {
            self.write_key(child)?;
        }
        let length = self.buf.len() - begin as usize;
        if length > MAX_BLOCK_LENGTH {
            return Err(Error::BlockTooLarge(length));
        }
        Ok((begin, length as u16))
    }

    fn write_children(&mut self, node: &mut PlanNode<'_>) -> Result<()> {
        if !node.is_compact() {
            let (begin, length) = self.write_block(node)?;
            self.patch_u32(node.block_slot, begin);
            self.patch_u16(node.block_slot + 4, length);
        }
        for child in node.children.iter_mut() {
            self.write_children(child)?;
        }
        Ok(())
    }

    fn write_data(&mut self, node: &PlanNode<'a>) -> Result<()> {
        if let Some(value) = node.value {
            let target = match self.values.get(value) {
                Some(&existing) => {
                    self.shared_values += 1;
                    existing
                }
                None => {
                    let offset = self.offset()?;
                    self.values.insert(value, offset);
                    self.buf.push(NodeHeader::new(NodeKind::Data, false).encode());
                    self.buf
                        .extend_from_slice(&(value.len() as u16).to_le_bytes());
                    self.buf.extend_from_slice(value.as_bytes());
                    self.data_nodes += 1;
                    offset
                }
            };
            self.patch_u32(node.leaf_slot, target);
        }
        for child in node.children.iter() {
            self.write_data(child)?;
        }
        Ok(())
    }
}
