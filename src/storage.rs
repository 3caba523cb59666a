use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::chat::history::HistoryStore;
use crate::chat::ChatMessage;

// Record keys (one JSON file each)
pub const HISTORY_KEY: &str = "chat_history";
pub const ANALYSIS_KEY: &str = "analysis";
const REPORTS_DIR: &str = "reports";

/// Client-side durable storage: one JSON document per key under a data
/// directory, written via temp file + rename so a crash never leaves a
/// half-written record.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)
            .with_context(|| format!("Failed to create data dir {}", root.display()))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", key))
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let path = self.record_path(key);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
        };
        let value = serde_json::from_slice(&bytes)
            .with_context(|| format!("parse {}", path.display()))?;
        Ok(Some(value))
    }

    pub fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let path = self.record_path(key);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(value).context("serialize record")?;
        std::fs::write(&tmp, &bytes).with_context(|| format!("write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path).with_context(|| format!("replace {}", path.display()))?;
        debug!(key, size = bytes.len(), "record stored");
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        match std::fs::remove_file(self.record_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("remove record"),
        }
    }

    /// Write a downloaded report under a content-addressed name.
    /// Idempotent: same bytes = same file.
    pub fn save_report(&self, pdf: &[u8]) -> Result<PathBuf> {
        let dir = self.root.join(REPORTS_DIR);
        std::fs::create_dir_all(&dir).context("create reports dir")?;
        let hash = blake3::hash(pdf).to_hex();
        let path = dir.join(format!("analysis-report-{}.pdf", &hash[..12]));
        std::fs::write(&path, pdf).with_context(|| format!("write {}", path.display()))?;
        debug!(path = %path.display(), size = pdf.len(), "report saved");
        Ok(path)
    }
}

impl HistoryStore for LocalStore {
    fn load(&self) -> Result<Option<Vec<ChatMessage>>> {
        self.get(HISTORY_KEY)
    }

    fn save(&self, messages: &[ChatMessage]) -> Result<()> {
        self.put(HISTORY_KEY, messages)
    }
}
