//! Hand-off of successful classifications to storage.
//!
//! Storage is optional and best-effort: the controller reports a success
//! whether or not the sink accepts the record.

use crate::error::Result;
use crate::types::{Category, ClassificationResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Separator used to flatten the recommendation list into one column.
pub const RECOMMENDATION_SEPARATOR: &str = "\n";

/// One stored classification, flattened for a row-oriented store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRecord {
    pub user_id: String,
    /// Content reference of the classified image (hex SHA-256)
    pub image_ref: String,
    pub category: Category,
    pub confidence: f32,
    pub material: Option<String>,
    pub recommendations: String,
}

impl ClassificationRecord {
    pub fn new(
        user_id: impl Into<String>,
        image_ref: impl Into<String>,
        result: &ClassificationResult,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            image_ref: image_ref.into(),
            category: result.category,
            confidence: result.confidence,
            material: result.material.clone(),
            recommendations: result.recommendations.join(RECOMMENDATION_SEPARATOR),
        }
    }
}

/// Storage collaborator for successful classifications
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn store(&self, record: ClassificationRecord) -> Result<()>;
}

/// Appends each record as one JSON line to a file.
pub struct JsonLinesSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonLinesSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ResultSink for JsonLinesSink {
    async fn store(&self, record: ClassificationRecord) -> Result<()> {
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
