use std::fmt;

use serde::{Deserialize, Serialize};

/// One element of a trie key.
///
/// The wildcard is its own symbol of the alphabet; it is not a pattern over
/// words. It orders before every word.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Token {
    Wildcard,
    Word(String),
}

impl Token {
    /// Word token; no validation, any string is a word.
    pub fn word(s: impl Into<String>) -> Self {
        Token::Word(s.into())
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Token::Wildcard)
    }

    /// Returns the word, or `None` for the wildcard.
    pub fn as_word(&self) -> Option<&str> {
        match self {
            Token::Word(w) => Some(w),
            Token::Wildcard => None,
        }
    }
}

impl From<&str> for Token {
    fn from(s: &str) -> Self {
        Token::Word(s.to_string())
    }
}

impl From<String> for Token {
    fn from(s: String) -> Self {
        Token::Word(s)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Word(w) => f.write_str(w),
            Token::Wildcard => f.write_str("*"),
        }
    }
}

/// Splits a preprocessed sentence or program into whitespace separated tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_string).collect()
}

/// Renders a key for display, using `*` for wildcards.
pub fn display_key(key: &[Token]) -> String {
    key.iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_sorts_first() {
        let mut tokens = vec![Token::word("b"), Token::Wildcard, Token::word("a")];
        tokens.sort();
        assert_eq!(tokens, vec![Token::Wildcard, Token::word("a"), Token::word("b")]);
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("  play   some music "), vec!["play", "some", "music"]);
        assert!(tokenize("").is_empty());
        assert_eq!(
            display_key(&[Token::word("play"), Token::Wildcard]),
            "play *"
        );
    }
}
