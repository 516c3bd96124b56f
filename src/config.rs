use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::trie::DEFAULT_VALUE_LIMIT;
use crate::{Error, Result};

/// Configuration of an [`ExactMatcher`](crate::ExactMatcher).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct MatcherConfig {
    /// Language code; selects the `<language>.btrie` snapshot.
    pub language: String,
    /// Directory, relative to the snapshot store, holding snapshots.
    pub snapshot_dir: String,
    /// Maximum number of values remembered per key in the overlay.
    pub value_limit: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            snapshot_dir: "exact".to_string(),
            value_limit: DEFAULT_VALUE_LIMIT,
        }
    }
}

impl MatcherConfig {
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_snapshot_dir(mut self, dir: impl Into<String>) -> Self {
        self.snapshot_dir = dir.into();
        self
    }

    /// Caps how many values the overlay keeps for one key before evicting
    /// the oldest.
    pub fn with_value_limit(mut self, limit: usize) -> Self {
        self.value_limit = limit;
        self
    }

    /// File name of this language's snapshot.
    pub fn snapshot_name(&self) -> String {
        format!("{}.btrie", self.language)
    }

    /// Checks that the language is set and the value limit is positive.
    pub fn validate(&self) -> Result<()> {
        if self.language.is_empty() {
            return Err(Error::Config("language must not be empty".to_string()));
        }
        if self.value_limit == 0 {
            return Err(Error::Config("value_limit must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Reads a JSON configuration file; missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let config: Self = serde_json::from_reader(std::io::BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MatcherConfig::default();
        assert_eq!(config.snapshot_name(), "en.btrie");
        assert_eq!(config.value_limit, 20);
        config.validate().unwrap();

        let config = config.with_language("it").with_value_limit(0);
        assert_eq!(config.snapshot_name(), "it.btrie");
        config.validate().unwrap_err();
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matcher.json");
        std::fs::write(&path, r#"{ "language": "de", "value_limit": 5 }"#).unwrap();
        let config = MatcherConfig::from_json_file(&path).unwrap();
        assert_eq!(config.language, "de");
        assert_eq!(config.value_limit, 5);
        assert_eq!(config.snapshot_dir, "exact");

        std::fs::write(&path, r#"{ "value_limit": 0 }"#).unwrap();
        assert!(matches!(
            MatcherConfig::from_json_file(&path),
            Err(Error::Config(_))
        ));

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            MatcherConfig::from_json_file(&path),
            Err(Error::Json(_))
        ));
    }
}
