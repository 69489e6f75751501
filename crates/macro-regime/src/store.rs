//! Cache persistence

use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;

use crate::cache::CacheState;
use crate::error::{MacroError, Result};

/// Loads and saves the whole cache state
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// `Ok(None)` when nothing has been saved yet
    async fn load(&self) -> Result<Option<CacheState>>;

    async fn save(&self, state: &CacheState) -> Result<()>;
}

/// Pretty-printed JSON file
///
/// Each save writes a uniquely named temp file in the target's directory and
/// renames it over the target, so a reader never sees a partial file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_replacing(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| {
        MacroError::StoreError(format!("failed to replace {}: {}", path.display(), e.error))
    })?;
    Ok(())
}

#[async_trait]
impl CacheStore for JsonFileStore {
    async fn load(&self) -> Result<Option<CacheState>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(MacroError::StoreError(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )));
            }
        };

        let state = serde_json::from_str(&raw).map_err(|e| {
            MacroError::StoreError(format!("failed to parse {}: {e}", self.path.display()))
        })?;
        Ok(Some(state))
    }

    async fn save(&self, state: &CacheState) -> Result<()> {
        let json = serde_json::to_string_pretty(state)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_replacing(&path, json.as_bytes()))
            .await
            .map_err(|e| MacroError::StoreError(format!("cache write task failed: {e}")))??;

        tracing::debug!("Saved cache to {}", self.path.display());
        Ok(())
    }
}

/// Keeps the last saved state in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<Option<CacheState>>,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completed saves
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn load(&self) -> Result<Option<CacheState>> {
        Ok(self.state.lock().await.clone())
    }

    async fn save(&self, state: &CacheState) -> Result<()> {
        *self.state.lock().await = Some(state.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
