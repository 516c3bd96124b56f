use std::collections::{HashMap, VecDeque};

use foldhash::fast::FixedState;

use crate::Token;

/// Strategy deciding how repeated insertions at one key aggregate.
///
/// The same trie type serves both the live overlay (bounded recency sets)
/// and the offline compiler (NUL-joined strings); only the strategy differs.
pub trait ValueCombine {
    type Aggregate;

    fn combine(&self, existing: Option<Self::Aggregate>, value: String) -> Self::Aggregate;
}

/// Separator placed between values that share a key in a compiled btrie.
pub const VALUE_SEPARATOR: char = '\0';

/// Joins values with [`VALUE_SEPARATOR`], oldest first.
#[derive(Debug, Default, Clone, Copy)]
pub struct NulJoin;

impl ValueCombine for NulJoin {
    type Aggregate = String;

    fn combine(&self, existing: Option<String>, value: String) -> String {
        match existing {
            None => value,
            Some(mut joined) => {
                joined.push(VALUE_SEPARATOR);
                joined.push_str(&value);
                joined
            }
        }
    }
}

/// Keeps only the most recently inserted value.
#[derive(Debug, Default, Clone, Copy)]
pub struct LastWins;

impl ValueCombine for LastWins {
    type Aggregate = String;

    fn combine(&self, _existing: Option<String>, value: String) -> String {
        value
    }
}

/// Default number of values remembered per key by [`KeepRecent`].
pub const DEFAULT_VALUE_LIMIT: usize = 20;

/// Bounded recency set: re-inserting moves a value to most recent, and the
/// oldest value is evicted once `limit` is exceeded.
#[derive(Debug, Clone, Copy)]
pub struct KeepRecent {
    pub limit: usize,
}

impl Default for KeepRecent {
    fn default() -> Self {
        Self {
            limit: DEFAULT_VALUE_LIMIT,
        }
    }
}

impl ValueCombine for KeepRecent {
    type Aggregate = RecentValues;

    fn combine(&self, existing: Option<RecentValues>, value: String) -> RecentValues {
        let mut values = existing.unwrap_or_default();
        values.push(value, self.limit);
        values
    }
}

/// Distinct values ordered from oldest to newest.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecentValues {
    values: VecDeque<String>,
}

impl RecentValues {
    fn push(&mut self, value: String, limit: usize) {
        if let Some(pos) = self.values.iter().position(|v| *v == value) {
            self.values.remove(pos);
        }
        self.values.push_back(value);
        while self.values.len() > limit.max(1) {
            self.values.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Values in insertion order, oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &str> {
        self.values.iter().map(String::as_str)
    }

    /// Values most recent first.
    pub fn iter_recent(&self) -> impl Iterator<Item = &str> {
        self.iter().rev()
    }
}

#[derive(Debug)]
struct TrieNode<A> {
    value: Option<A>,
    children: Vec<(Token, TrieNode<A>)>,
    index: HashMap<Token, usize, FixedState>,
}

impl<A> TrieNode<A> {
    fn new() -> Self {
        Self {
            value: None,
            children: Vec::new(),
            index: HashMap::with_hasher(FixedState::with_seed(0)),
        }
    }

    fn child(&self, token: &Token) -> Option<&TrieNode<A>> {
        self.index.get(token).map(|&i| &self.children[i].1)
    }

    fn child_or_insert(&mut self, token: &Token) -> &mut TrieNode<A> {
        let i = match self.index.get(token) {
            Some(&i) => i,
            None => {
                self.children.push((token.clone(), TrieNode::new()));
                self.index.insert(token.clone(), self.children.len() - 1);
                self.children.len() - 1
            }
        };
        &mut self.children[i].1
    }
}

/// In-memory, insertion-ordered trie over token sequences.
///
/// Children keep the order in which they were first inserted, so
/// [`iter`](Self::iter) is deterministic.
#[derive(Debug)]
pub struct MutableTrie<C: ValueCombine> {
    root: TrieNode<C::Aggregate>,
    combine: C,
    len: usize,
}

impl<C: ValueCombine + Default> Default for MutableTrie<C> {
    fn default() -> Self {
        Self::new(C::default())
    }
}

impl<C: ValueCombine> MutableTrie<C> {
    /// Creates an empty trie folding repeated values with `combine`.
    pub fn new(combine: C) -> Self {
        Self {
            root: TrieNode::new(),
            combine,
            len: 0,
        }
    }

    /// Number of keys holding a value.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drops every key, keeping the combine strategy.
    pub fn clear(&mut self) {
        self.root = TrieNode::new();
        self.len = 0;
    }

    /// Adds `value` at `sequence`, folding it into any existing aggregate.
    pub fn insert(&mut self, sequence: &[Token], value: String) {
        let mut node = &mut self.root;
        for token in sequence {
            node = node.child_or_insert(token);
        }
        if node.value.is_none() {
            self.len += 1;
        }
        node.value = Some(self.combine.combine(node.value.take(), value));
    }

    /// Looks up the exact key, wildcard tokens matching only wildcard edges.
    pub fn get(&self, sequence: &[Token]) -> Option<&C::Aggregate> {
        let mut node = &self.root;
        for token in sequence {
            node = node.child(token)?;
        }
        node.value.as_ref()
    }

    /// Looks up a query of plain words.
    ///
    /// At each level an exact word edge is preferred; otherwise the wildcard
    /// edge is taken. There is no backtracking once an edge is chosen.
    pub fn search<S: AsRef<str>>(&self, sequence: &[S]) -> Option<&C::Aggregate> {
        let mut node = &self.root;
        for word in sequence {
            node = match node.child(&Token::word(word.as_ref())) {
                Some(child) => child,
                None => node.child(&Token::Wildcard)?,
            };
        }
        node.value.as_ref()
    }

    /// Walks every (key, aggregate) pair depth-first in insertion order.
    ///
    /// The iterator borrows the trie and can be recreated at will.
    pub fn iter(&self) -> TrieIter<'_, C::Aggregate> {
        TrieIter {
            stack: vec![(&self.root, 0)],
            prefix: Vec::new(),
            pending_root: true,
        }
    }
}

/// Iterator over the entries of a [`MutableTrie`].
pub struct TrieIter<'a, A> {
    stack: Vec<(&'a TrieNode<A>, usize)>,
    prefix: Vec<Token>,
    pending_root: bool,
}

impl<'a, A> Iterator for TrieIter<'a, A> {
    type Item = (Vec<Token>, &'a A);

    fn next(&mut self) -> Option<Self::Item> {
        if self.pending_root {
            self.pending_root = false;
            let root: Option<&'a TrieNode<A>> = self.stack.first().map(|&(n, _)| n);
            if let Some(value) = root.and_then(|n| n.value.as_ref()) {
                return Some((Vec::new(), value));
            }
        }

        loop {
            let top = self.stack.last_mut()?;
            let node: &'a TrieNode<A> = top.0;
            let index = top.1;
            if index >= node.children.len() {
                self.stack.pop();
                self.prefix.pop();
                continue;
            }
            top.1 += 1;

            let (token, child) = &node.children[index];
            self.prefix.push(token.clone());
            self.stack.push((child, 0));
            if let Some(value) = child.value.as_ref() {
                return Some((self.prefix.clone(), value));
            }
        }
    }
}
