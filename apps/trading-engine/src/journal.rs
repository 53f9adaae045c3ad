//! Append-only trade journal.
//!
//! Every recorded execution tranche lands here as one JSON line, giving
//! an audit trail that survives restarts without a database. Journal
//! failures never fail the trade that produced them; callers log and
//! continue.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::models::TradeRecord;

/// Sink for executed-trade records.
#[async_trait]
pub trait TradeJournal: Send + Sync {
    /// Append one trade record.
    async fn record(&self, trade: &TradeRecord) -> io::Result<()>;

    /// The most recent `limit` records, oldest first.
    async fn recent(&self, limit: usize) -> io::Result<Vec<TradeRecord>>;
}

/// JSON-lines journal backed by a single append-only file.
#[derive(Debug)]
pub struct JsonlJournal {
    path: PathBuf,
    file: tokio::sync::Mutex<tokio::fs::File>,
}

impl JsonlJournal {
    /// Open (or create) the journal file at `path`.
    ///
    /// # Errors
    ///
    /// Propagates file-open failures.
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            file: tokio::sync::Mutex::new(file),
        })
    }

    /// Path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TradeJournal for JsonlJournal {
    async fn record(&self, trade: &TradeRecord) -> io::Result<()> {
        let mut line = serde_json::to_vec(trade).map_err(io::Error::other)?;
        line.push(b'\n');
        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await
    }

    async fn recent(&self, limit: usize) -> io::Result<Vec<TradeRecord>> {
        // Hold the write gate so a concurrent append is not half-read.
        let _file = self.file.lock().await;
        let contents = tokio::fs::read_to_string(&self.path).await?;
        let records: Vec<TradeRecord> = contents
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        let skip = records.len().saturating_sub(limit);
        Ok(records.into_iter().skip(skip).collect())
    }
}

/// In-memory journal for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    records: std::sync::Mutex<Vec<TradeRecord>>,
}

impl MemoryJournal {
    /// Create an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<TradeRecord>> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl TradeJournal for MemoryJournal {
    async fn record(&self, trade: &TradeRecord) -> io::Result<()> {
        self.lock().push(trade.clone());
        Ok(())
    }

    async fn recent(&self, limit: usize) -> io::Result<Vec<TradeRecord>> {
        let records = self.lock();
        let skip = records.len().saturating_sub(limit);
        Ok(records.iter().skip(skip).cloned().collect())
    }
}
