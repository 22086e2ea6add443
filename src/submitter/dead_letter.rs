//! Dead letter sinks for mints that could not be delivered

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;

use crate::types::ParsedLockEvent;

/// A mint that exhausted its retry budget or failed permanently
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub event: ParsedLockEvent,
    pub error: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn record(&self, entry: DeadLetter) -> Result<()>;
}

/// Appends one JSON document per line
pub struct JsonlDeadLetterSink {
    path: PathBuf,
    // Serializes appends from concurrent workers
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlDeadLetterSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }
}

#[async_trait]
impl DeadLetterSink for JsonlDeadLetterSink {
    async fn record(&self, entry: DeadLetter) -> Result<()> {
        let mut line = serde_json::to_string(&entry).wrap_err("Failed to encode dead letter")?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .wrap_err_with(|| format!("Failed to open {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .wrap_err("Failed to append dead letter")?;
        file.flush().await?;
        Ok(())
    }
}

/// Keeps dead letters in memory
#[derive(Default, Clone)]
pub struct MemoryDeadLetterSink {
    entries: Arc<Mutex<Vec<DeadLetter>>>,
}

impl MemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<DeadLetter> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetterSink {
    async fn record(&self, entry: DeadLetter) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry);
        Ok(())
    }
}
