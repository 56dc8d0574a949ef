// src/storage/mod.rs
//! Durable snapshot of the position state machine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::core::position::Position;
use crate::error::BotError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeStats {
    #[serde(default)]
    pub closed_trades: u64,
    #[serde(default)]
    pub winning_trades: u64,
    #[serde(default)]
    pub realized_pnl: Decimal,
}

impl TradeStats {
    pub fn record_close(&mut self, pnl: Decimal) {
        self.closed_trades += 1;
        if pnl > Decimal::ZERO {
            self.winning_trades += 1;
        }
        self.realized_pnl += pnl;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub revision: u64,
    pub position: Position,
    #[serde(default)]
    pub stats: TradeStats,
    pub updated_at: DateTime<Utc>,
}

impl StateRecord {
    /// Revision 0, FLAT. Used on first run and after a reset.
    pub fn initial(symbol: &str, dry_run: bool) -> Self {
        Self {
            revision: 0,
            position: Position::flat(symbol, dry_run),
            stats: TradeStats::default(),
            updated_at: Utc::now(),
        }
    }

    /// Copy of this record carrying `position` at the next revision.
    pub fn successor(&self, position: Position, stats: TradeStats) -> Self {
        Self {
            revision: self.revision + 1,
            position,
            stats,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt state file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl From<StoreError> for BotError {
    fn from(err: StoreError) -> Self {
        BotError::Persistence(err.to_string())
    }
}

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Durably replaces the stored record. Returns only once the write is on disk.
    async fn save(&self, record: &StateRecord) -> Result<(), StoreError>;

    /// `None` when nothing has been stored yet.
    async fn load(&self) -> Result<Option<StateRecord>, StoreError>;

    /// Operator reset: forget the stored record.
    async fn reset(&self) -> Result<(), StoreError>;
}

/// Single JSON file, replaced atomically via a sibling temp file.
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

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn json_err(&self, source: serde_json::Error) -> StoreError {
        StoreError::Json {
            path: self.path.clone(),
            source,
        }
    }

    async fn sync_parent_dir(&self) {
        let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) else {
            return;
        };
        // Not every platform lets a directory be opened for fsync.
        match tokio::fs::File::open(parent).await {
            Ok(dir) => {
                if let Err(e) = dir.sync_all().await {
                    debug!(error = %e, "directory fsync skipped");
                }
            }
            Err(e) => debug!(error = %e, "directory fsync skipped"),
        }
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn save(&self, record: &StateRecord) -> Result<(), StoreError> {
        let body = serde_json::to_vec_pretty(record).map_err(|e| self.json_err(e))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_err(e))?;
        }

        let tmp = self.tmp_path();
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| self.io_err(e))?;
        file.write_all(&body).await.map_err(|e| self.io_err(e))?;
        file.sync_all().await.map_err(|e| self.io_err(e))?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_err(e))?;
        self.sync_parent_dir().await;

        debug!(revision = record.revision, path = %self.path.display(), "state saved");
        Ok(())
    }

    async fn load(&self) -> Result<Option<StateRecord>, StoreError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_err(e)),
        };
        let record = serde_json::from_slice(&raw).map_err(|e| self.json_err(e))?;
        Ok(Some(record))
    }

    async fn reset(&self) -> Result<(), StoreError> {
        for path in [self.path.clone(), self.tmp_path()] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => warn!(path = %path.display(), "state file removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(self.io_err(e)),
            }
        }
        Ok(())
    }
}

/// Process-local store. Nothing survives a restart; used for tests and
/// embedding. `set_failing(true)` makes every save fail like a full disk.
#[derive(Default)]
pub struct MemoryStore {
    record: Mutex<Option<StateRecord>>,
    failing: AtomicBool,
    saves: AtomicU64,
}

impl MemoryStore {
    pub fn with_record(record: StateRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
            ..Self::default()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Successful saves so far.
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Option<StateRecord> {
        self.record.lock().ok().and_then(|r| r.clone())
    }

    fn unavailable() -> StoreError {
        StoreError::Io {
            path: PathBuf::from("<memory>"),
            source: std::io::Error::new(std::io::ErrorKind::Other, "store unavailable"),
        }
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn save(&self, record: &StateRecord) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        let mut slot = self.record.lock().map_err(|_| Self::unavailable())?;
        *slot = Some(record.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load(&self) -> Result<Option<StateRecord>, StoreError> {
        let slot = self.record.lock().map_err(|_| Self::unavailable())?;
        Ok(slot.clone())
    }

    async fn reset(&self) -> Result<(), StoreError> {
        let mut slot = self.record.lock().map_err(|_| Self::unavailable())?;
        *slot = None;
        Ok(())
    }
}
