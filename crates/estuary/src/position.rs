//! Replication position tracking and persistence.
//!
//! A position identifies a point in the replication stream as a binlog file
//! name plus byte offset. Positions are persisted only after the preceding
//! bulk flush succeeded, so a restart replays at most the un-checkpointed
//! tail (at-least-once delivery).

use crate::error::{Result, RiverError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::debug;

/// A point in the replication stream, ordered by file then offset.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Position {
    pub log_name: String,
    pub offset: u32,
}

impl Position {
    pub fn new(log_name: impl Into<String>, offset: u32) -> Self {
        Self {
            log_name: log_name.into(),
            offset,
        }
    }

    /// An empty position means "no checkpoint yet".
    pub fn is_empty(&self) -> bool {
        self.log_name.is_empty()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.log_name, self.offset)
    }
}

/// Persistent storage for the replication position.
#[async_trait]
pub trait PositionStore: Send + Sync {
    /// Load the last saved position, if any.
    async fn load(&self) -> Result<Option<Position>>;

    /// Durably save a position.
    async fn save(&self, pos: &Position) -> Result<()>;
}

/// File-backed position store with atomic writes (temp file + rename +
/// fsync).
pub struct FilePositionStore {
    path: PathBuf,
    fsync: bool,
}

impl FilePositionStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            fsync: true,
        }
    }

    /// Disable fsync after writes. Only useful for tests.
    pub fn without_fsync(mut self) -> Self {
        self.fsync = false;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PositionStore for FilePositionStore {
    async fn load(&self) -> Result<Option<Position>> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let pos: Position = serde_json::from_str(&contents)
                    .map_err(|e| RiverError::persist(format!("corrupt position file: {e}")))?;
                Ok(Some(pos))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RiverError::persist(format!(
                "read {}: {e}",
                self.path.display()
            ))),
        }
    }

    async fn save(&self, pos: &Position) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| RiverError::persist(format!("create {}: {e}", parent.display())))?;
            }
        }

        let temp_path = self.path.with_extension("tmp");
        let json = serde_json::to_string_pretty(pos)
            .map_err(|e| RiverError::persist(format!("encode position: {e}")))?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .await
            .map_err(|e| RiverError::persist(format!("open {}: {e}", temp_path.display())))?;
        file.write_all(json.as_bytes())
            .await
            .map_err(|e| RiverError::persist(format!("write {}: {e}", temp_path.display())))?;
        if self.fsync {
            file.sync_all()
                .await
                .map_err(|e| RiverError::persist(format!("sync {}: {e}", temp_path.display())))?;
        }

        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| RiverError::persist(format!("rename {}: {e}", self.path.display())))?;

        debug!(position = %pos, "saved replication position");
        Ok(())
    }
}

/// In-memory position store for tests.
#[derive(Debug, Default)]
pub struct MemoryPositionStore {
    inner: RwLock<Option<Position>>,
}

impl MemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PositionStore for MemoryPositionStore {
    async fn load(&self) -> Result<Option<Position>> {
        Ok(self.inner.read().await.clone())
    }

    async fn save(&self, pos: &Position) -> Result<()> {
        *self.inner.write().await = Some(pos.clone());
        Ok(())
    }
}
