use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;

use crate::meta::{MAX_TOKEN_LENGTH, MAX_VALUE_LENGTH};
use crate::span::{normalize_example, resolve_backrefs, strip_trailing_period, TRAILING_PERIOD};
use crate::trie::VALUE_SEPARATOR;
use crate::{
    tokenize, BTrie, Error, ExampleProvider, KeepRecent, MatcherConfig, MutableTrie, Result,
    SnapshotStore, Token,
};

/// Bytes backing a loaded snapshot.
#[derive(Debug)]
pub enum SnapshotBuffer {
    /// Read-only memory map of a snapshot file.
    Mapped(Mmap),
    /// Snapshot held in owned memory.
    Owned(Vec<u8>),
}

impl AsRef<[u8]> for SnapshotBuffer {
    fn as_ref(&self) -> &[u8] {
        match self {
            SnapshotBuffer::Mapped(mmap) => mmap,
            SnapshotBuffer::Owned(data) => data,
        }
    }
}

impl From<Vec<u8>> for SnapshotBuffer {
    fn from(data: Vec<u8>) -> Self {
        SnapshotBuffer::Owned(data)
    }
}

/// An immutable compiled snapshot.
pub type Snapshot = BTrie<SnapshotBuffer>;

/// Maps the snapshot at `path` read-only.
///
/// The file handle is closed before returning; the mapping stays valid on its
/// own, so the file may be unlinked right away. The mapping is released when
/// the returned snapshot is dropped.
pub fn map_snapshot(path: &Path) -> Result<Snapshot> {
    let file = std::fs::File::open(path)?;
    let length = file.metadata()?.len();
    let buffer = if length == 0 {
        // zero-length mappings are rejected on some platforms
        SnapshotBuffer::Owned(Vec::new())
    } else {
        // SAFETY: snapshot files are written once and never modified in place;
        // the temporary copy is unlinked, not truncated.
        SnapshotBuffer::Mapped(unsafe { Mmap::map(&file)? })
    };
    drop(file);
    BTrie::new(buffer)
}

/// Candidate programs for an utterance, most authoritative first; each
/// candidate is a token list with back-references already substituted.
pub type Candidates = Vec<Vec<String>>;

/// Exact-match lookup of previously seen utterances.
///
/// Combines one immutable [`Snapshot`] (replaced wholesale by
/// [`install`](Self::install)) with a mutable overlay holding examples added
/// since that snapshot was compiled. Overlay results rank ahead of snapshot
/// results, and within each source newer values rank first.
///
/// `add` and `get` never suspend, so no caller observes a half-updated
/// overlay. Swapping in a new snapshot is a single assignment; lookups still
/// holding the previous `Arc<Snapshot>` keep its mapping alive until they
/// finish.
#[derive(Debug)]
pub struct ExactMatcher {
    config: MatcherConfig,
    snapshot: Option<Arc<Snapshot>>,
    overlay: MutableTrie<KeepRecent>,
}

impl Default for ExactMatcher {
    fn default() -> Self {
        Self::new(MatcherConfig::default())
    }
}

impl ExactMatcher {
    /// Creates a matcher with an empty overlay and no snapshot.
    pub fn new(config: MatcherConfig) -> Self {
        let overlay = MutableTrie::new(KeepRecent {
            limit: config.value_limit,
        });
        Self {
            config,
            snapshot: None,
            overlay,
        }
    }

    /// Configuration this matcher was created with.
    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Current snapshot, if one has been installed.
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.snapshot.clone()
    }

    /// Number of keys in the overlay.
    pub fn overlay_len(&self) -> usize {
        self.overlay.len()
    }

    /// Teaches a preprocessed utterance and its target code.
    ///
    /// Both are split on whitespace. Quoted spans in the code become
    /// wildcards in the stored key, so the entry also answers utterances that
    /// differ only inside those spans.
    ///
    /// # Errors
    ///
    /// Rejects examples whose quoted spans do not occur in the utterance,
    /// whose quotes are unbalanced, or with a word or target code too long to
    /// compile.
    pub fn add(&mut self, utterance: &str, target_code: &str) -> Result<()> {
        self.add_tokens(&tokenize(utterance), &tokenize(target_code))
    }

    /// Like [`add`](Self::add) with pre-tokenized input.
    pub fn add_tokens<U, C>(&mut self, utterance: &[U], target_code: &[C]) -> Result<()>
    where
        U: AsRef<str>,
        C: AsRef<str>,
    {
        let (key, code) = normalize_example(utterance, target_code)?;
        if let Some(word) = key
            .iter()
            .filter_map(Token::as_word)
            .find(|w| w.len() > MAX_TOKEN_LENGTH)
        {
            return Err(Error::TokenTooLong(word.len()));
        }
        let code = code.join(" ");
        if code.len() > MAX_VALUE_LENGTH {
            return Err(Error::CodeTooLong(code.len()));
        }
        self.insert_template(&key, code);
        Ok(())
    }

    /// Inserts an already normalized key and code into the overlay.
    pub fn insert_template(&mut self, key: &[Token], code: impl Into<String>) {
        let code = code.into();
        tracing::debug!(
            language = %self.config.language,
            key = %crate::display_key(key),
            code = %code,
            "added exact match"
        );
        self.overlay.insert(key, code);
    }

    /// Fetches an example row and [`add`](Self::add)s it.
    pub async fn add_example<P>(&mut self, provider: &P, id: i64) -> Result<()>
    where
        P: ExampleProvider + ?Sized,
    {
        let row = provider.exact_example(id).await?;
        self.add(&row.preprocessed, &row.target_code)?;
        tracing::info!(id, language = %self.config.language, "added example");
        Ok(())
    }

    /// Looks up an utterance. Returns `Ok(None)` when neither the overlay nor
    /// the snapshot knows it.
    ///
    /// # Errors
    ///
    /// Only a corrupt snapshot produces an error.
    pub fn get(&self, utterance: &str) -> Result<Option<Candidates>> {
        self.get_tokens(&tokenize(utterance))
    }

    /// Like [`get`](Self::get) with a pre-tokenized utterance.
    pub fn get_tokens<S: AsRef<str>>(&self, utterance: &[S]) -> Result<Option<Candidates>> {
        let mut query: Vec<&str> = utterance.iter().map(AsRef::as_ref).collect();
        strip_trailing_period(&mut query, |w| *w == TRAILING_PERIOD);

        let from_overlay = self.overlay.search(&query);
        let from_snapshot = match self.snapshot.as_deref() {
            Some(snapshot) => snapshot.search(&query)?,
            None => None,
        };
        if from_overlay.is_none() && from_snapshot.is_none() {
            return Ok(None);
        }

        let mut codes: Vec<&str> = Vec::new();
        if let Some(values) = from_overlay {
            codes.extend(values.iter_recent());
        }
        if let Some(joined) = from_snapshot {
            // compiled values are stored oldest first
            codes.extend(joined.split(VALUE_SEPARATOR).rev());
        }
        Ok(Some(
            codes
                .into_iter()
                .map(|code| resolve_backrefs(code, &query))
                .collect(),
        ))
    }

    /// Adopts a new snapshot and empties the overlay.
    ///
    /// A freshly compiled snapshot is assumed to contain everything the
    /// overlay held. The previous snapshot is released once its last
    /// outstanding `Arc` is dropped.
    pub fn install(&mut self, snapshot: Snapshot) {
        let bytes = snapshot.byte_len();
        let dropped = self.overlay.len();
        self.snapshot = Some(Arc::new(snapshot));
        self.overlay.clear();
        tracing::info!(
            language = %self.config.language,
            bytes,
            dropped_overlay_keys = dropped,
            "installed exact match snapshot"
        );
    }

    /// Downloads and maps the snapshot named by `config`.
    ///
    /// This does not borrow a matcher, so lookups can continue against the
    /// current state while it runs. Callers wanting a deadline should wrap
    /// the future, e.g. in `tokio::time::timeout`.
    pub async fn fetch_snapshot<S>(store: &S, config: &MatcherConfig) -> Result<Snapshot>
    where
        S: SnapshotStore + ?Sized,
    {
        let location = store.resolve(&config.snapshot_dir, &config.snapshot_name());
        let path = store.download(&location).await?;
        let mapped = {
            let path = path.clone();
            tokio::task::spawn_blocking(move || map_snapshot(&path))
                .await
                .unwrap_or_else(|e| Err(Error::Io(e.into())))
        };
        let removed = store.remove_temporary(&path).await;
        let snapshot = mapped?;
        removed?;
        Ok(snapshot)
    }

    /// Fetches this language's snapshot from `store` and installs it.
    pub async fn load<S>(&mut self, store: &S) -> Result<()>
    where
        S: SnapshotStore + ?Sized,
    {
        let snapshot = Self::fetch_snapshot(store, &self.config).await?;
        self.install(snapshot);
        Ok(())
    }

    /// Every (key, code) pair in the overlay, oldest value first per key.
    ///
    /// Keys keep their wildcards and codes their back-references, ready to be
    /// merged into a fresh compile.
    pub fn iter(&self) -> impl Iterator<Item = (Vec<Token>, &str)> + '_ {
        self.overlay
            .iter()
            .flat_map(|(key, values)| values.iter().map(move |code| (key.clone(), code)))
    }
}
