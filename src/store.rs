//! Collaborators feeding the matcher: snapshot storage and example rows

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Storage holding compiled snapshots.
///
/// Only [`ExactMatcher::load`](crate::ExactMatcher::load) uses it: resolve
/// the snapshot location, download it to a local temporary file, and remove
/// that file once it is mapped.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Resolves `name` inside `dir` to a store location.
    fn resolve(&self, dir: &str, name: &str) -> String;

    /// Copies the object at `location` to a local temporary file.
    async fn download(&self, location: &str) -> Result<PathBuf>;

    /// Removes a file returned by [`download`](Self::download).
    async fn remove_temporary(&self, path: &Path) -> Result<()>;
}

/// Snapshot store over a local directory tree.
///
/// Downloads copy into `temp_dir`, so removing the temporary never touches
/// the published snapshot.
#[derive(Debug, Clone)]
pub struct LocalSnapshotStore {
    root: PathBuf,
    temp_dir: PathBuf,
}

impl LocalSnapshotStore {
    /// Store rooted at `root`, downloading into the system temp directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            temp_dir: std::env::temp_dir(),
        }
    }

    /// Directory receiving downloaded temporaries.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }
}

#[async_trait]
impl SnapshotStore for LocalSnapshotStore {
    fn resolve(&self, dir: &str, name: &str) -> String {
        self.root.join(dir).join(name).to_string_lossy().into_owned()
    }

    async fn download(&self, location: &str) -> Result<PathBuf> {
        let path = tempfile::Builder::new()
            .prefix("snapshot-")
            .suffix(".btrie")
            .tempfile_in(&self.temp_dir)?
            .into_temp_path()
            .keep()
            .map_err(|e| e.error)?;

        if let Err(e) = tokio::fs::copy(location, &path).await {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e.into());
        }
        tracing::debug!(location, path = %path.display(), "downloaded snapshot");
        Ok(path)
    }

    async fn remove_temporary(&self, path: &Path) -> Result<()> {
        tokio::fs::remove_file(path).await?;
        Ok(())
    }
}

/// One taught example, as stored upstream.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ExampleRow {
    /// Tokenized utterance, tokens separated by single spaces.
    pub preprocessed: String,
    /// Tokenized target program.
    pub target_code: String,
}

impl ExampleRow {
    pub fn new(preprocessed: impl Into<String>, target_code: impl Into<String>) -> Self {
        Self {
            preprocessed: preprocessed.into(),
            target_code: target_code.into(),
        }
    }
}

/// Source of example rows by id.
#[async_trait]
pub trait ExampleProvider: Send + Sync {
    async fn exact_example(&self, id: i64) -> Result<ExampleRow>;
}

/// In-memory [`ExampleProvider`].
#[derive(Debug, Default, Clone)]
pub struct MemoryExampleProvider {
    rows: HashMap<i64, ExampleRow>,
}

impl MemoryExampleProvider {
    /// Registers `row` under `id`, replacing any previous row.
    pub fn insert(&mut self, id: i64, row: ExampleRow) {
        self.rows.insert(id, row);
    }
}

#[async_trait]
impl ExampleProvider for MemoryExampleProvider {
    async fn exact_example(&self, id: i64) -> Result<ExampleRow> {
        self.rows.get(&id).cloned().ok_or(Error::ExampleNotFound(id))
    }
}
