//! Exact-match lookup of taught utterances over memory-mapped binary tries.
//!
//! The `exact_btrie` crate stores token-sequence keys, where a token is either
//! a word or a wildcard, in an immutable binary trie ("btrie") that is read in
//! place without deserializing it. An [`ExactMatcher`] combines one such
//! snapshot with a mutable in-memory overlay of examples taught since the
//! snapshot was compiled, and turns quoted spans of a target program into
//! wildcards so one example answers a whole family of utterances.
//!
//! Snapshots are produced offline with [`ExactCompiler`] (or directly with
//! [`BTrieBuilder`]) and opened with [`BTrie`] or [`ExactMatcher::load`].
//!
//! ```
//! use exact_btrie::{BTrie, ExactCompiler, ExactMatcher, SnapshotBuffer};
//!
//! # fn main() -> exact_btrie::Result<()> {
//! let mut compiler = ExactCompiler::default();
//! compiler.add("search for pizza", "filter text =~ \" pizza \"")?;
//! let bytes = compiler.build()?;
//!
//! let mut matcher = ExactMatcher::default();
//! matcher.install(BTrie::new(SnapshotBuffer::from(bytes))?);
//! matcher.add("get xkcd", "@com.xkcd.get")?;
//!
//! let candidates = matcher.get("search for sushi")?.unwrap();
//! assert_eq!(candidates[0].join(" "), "filter text =~ \" sushi \"");
//! assert!(matcher.get("search for")?.is_none());
//! # Ok(())
//! # }
//! ```

mod error;
pub use error::{Error, Result};

mod meta;
pub use meta::{
    BTrieHeader, BTrieInfo, NodeHeader, NodeKind, MAX_BLOCK_LENGTH, MAX_TOKEN_LENGTH,
    MAX_VALUE_LENGTH,
};

mod token;
pub use token::{display_key, tokenize, Token};

mod trie;
pub use trie::{
    KeepRecent, LastWins, MutableTrie, NulJoin, RecentValues, TrieIter, ValueCombine,
    DEFAULT_VALUE_LIMIT, VALUE_SEPARATOR,
};

mod writer;
pub use writer::BTrieWriter;

mod builder;
pub use builder::BTrieBuilder;

mod reader;
pub use reader::{BTrie, BTrieIter};

mod span;
pub use span::{normalize_example, parse_backref, resolve_backrefs, QUOTE, TRAILING_PERIOD};

mod config;
pub use config::MatcherConfig;

mod store;
pub use store::{
    ExampleProvider, ExampleRow, LocalSnapshotStore, MemoryExampleProvider, SnapshotStore,
};

mod matcher;
pub use matcher::{map_snapshot, Candidates, ExactMatcher, Snapshot, SnapshotBuffer};

mod compile;
pub use compile::{parse_dataset_line, CompileStats, ExactCompiler};
