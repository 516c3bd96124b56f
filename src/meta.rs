use serde::Serialize;

use crate::{Error, Result};

/// Magic bytes opening every btrie file ("Almond Trie").
pub const MAGIC: [u8; 4] = *b"ALTR";

/// Format version understood by this crate.
pub const VERSION: u16 = 1;

/// Mask selecting the node kind from a header byte.
pub const KIND_MASK: u8 = 0b111;

/// Header flag marking an edge as the wildcard edge.
pub const FLAG_WILDCARD: u8 = 0b1000;

/// Longest token, in bytes, that fits in a key length byte.
pub const MAX_TOKEN_LENGTH: usize = u8::MAX as usize;

/// Longest value payload, in bytes, that fits in a data length field.
pub const MAX_VALUE_LENGTH: usize = u16::MAX as usize;

/// Largest children block addressable by a 2-byte length.
pub const MAX_BLOCK_LENGTH: usize = u16::MAX as usize;

/// Fixed header at the start of a btrie file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BTrieHeader {
    /// Format version, always [`VERSION`] for files written by this crate.
    pub version: u16,
}

impl BTrieHeader {
    /// Serialized size: magic followed by a little-endian version.
    pub const SIZE: usize = 6;

    /// Offset of the root's 2-byte children length.
    pub const ROOT_OFFSET: usize = Self::SIZE;

    /// Offset of the first node in the root children block.
    pub const ROOT_BLOCK_OFFSET: usize = Self::SIZE + 2;

    /// Encodes the magic and version.
    pub fn serialize(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[..4].copy_from_slice(&MAGIC);
        bytes[4..].copy_from_slice(&self.version.to_le_bytes());
        bytes
    }

    /// Parses and validates the header at the start of `data`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMagic`] or [`Error::UnsupportedVersion`] when the
    /// buffer does not hold a btrie this crate can read.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::Corrupt {
                offset: 0,
                reason: "file shorter than header",
            });
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&data[..4]);
        if magic != MAGIC {
            return Err(Error::InvalidMagic(magic));
        }
        let version = u16::from_le_bytes([data[4], data[5]]);
        if version != VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        Ok(Self { version })
    }
}

impl Default for BTrieHeader {
    fn default() -> Self {
        Self { version: VERSION }
    }
}

/// Closed set of node kinds stored in the low bits of a header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeKind {
    /// Value payload shared by one or more leaves.
    Data = 1,
    /// End-of-sequence marker pointing at a data node.
    Leaf = 2,
    /// Single-entry edge whose child follows immediately.
    Compact = 3,
    /// Edge pointing at a contiguous block of sibling nodes.
    Intermediate = 4,
}

/// Decoded node header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHeader {
    pub kind: NodeKind,
    pub flags: u8,
}

impl NodeHeader {
    /// Header for a node of `kind`, flagged as the wildcard edge if asked.
    pub fn new(kind: NodeKind, wildcard: bool) -> Self {
        let flags = if wildcard { FLAG_WILDCARD } else { 0 };
        Self { kind, flags }
    }

    /// Whether the edge stands for the wildcard token.
    pub fn is_wildcard(&self) -> bool {
        self.flags & FLAG_WILDCARD != 0
    }

    /// Packs kind and flags into one byte.
    pub fn encode(&self) -> u8 {
        self.kind as u8 | self.flags
    }

    /// Decodes a header byte found at `offset`.
    pub fn decode(byte: u8, offset: usize) -> Result<Self> {
        let kind = match byte & KIND_MASK {
            1 => NodeKind::Data,
            2 => NodeKind::Leaf,
            3 => NodeKind::Compact,
            4 => NodeKind::Intermediate,
            _ => {
                return Err(Error::Corrupt {
                    offset,
                    reason: "unknown node kind",
                })
            }
        };
        Ok(Self {
            kind,
            flags: byte & !KIND_MASK,
        })
    }
}

/// Summary returned by [`BTrieBuilder::build_into`](crate::BTrieBuilder::build_into).
#[derive(Debug, Serialize, Default, Clone, PartialEq, Eq)]
pub struct BTrieInfo {
    /// Final size of the generated btrie in bytes.
    pub file_length: u64,
    /// Number of distinct keys stored.
    pub key_count: u64,
    /// Number of values inserted, counting repeats at the same key.
    pub value_count: u64,
    /// Number of data nodes emitted.
    pub data_nodes: u64,
    /// Number of leaves that reused an existing data node.
    pub shared_values: u64,
    /// Length in bytes of the key-structure section.
    pub key_section_length: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let bytes = BTrieHeader::default().serialize();
        assert_eq!(bytes, [0x41, 0x4c, 0x54, 0x52, 0x01, 0x00]);
        assert_eq!(BTrieHeader::deserialize(&bytes).unwrap().version, 1);

        let mut bad = bytes;
        bad[0] = b'X';
        assert!(matches!(
            BTrieHeader::deserialize(&bad),
            Err(Error::InvalidMagic(_))
        ));

        let mut bad = bytes;
        bad[4] = 2;
        assert!(matches!(
            BTrieHeader::deserialize(&bad),
            Err(Error::UnsupportedVersion(2))
        ));

        BTrieHeader::deserialize(&bytes[..3]).unwrap_err();
    }

    #[test]
    fn test_node_header() {
        let header = NodeHeader::new(NodeKind::Intermediate, true);
        assert_eq!(header.encode(), 0x0c);
        let decoded = NodeHeader::decode(0x0c, 0).unwrap();
        assert_eq!(decoded.kind, NodeKind::Intermediate);
        assert!(decoded.is_wildcard());

        assert!(!NodeHeader::decode(0x02, 0).unwrap().is_wildcard());
        NodeHeader::decode(0x05, 7).unwrap_err();
        NodeHeader::decode(0x00, 7).unwrap_err();
    }
}
