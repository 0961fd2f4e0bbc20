// knowledge.rs — Knowledge sinks for learning records.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use wf_goal::LearningRecord;

use crate::collaborators::KnowledgeSink;
use crate::error::KnowledgeError;

/// Appends one `LearningRecord` per line to a JSONL file.
#[derive(Debug, Clone)]
pub struct JsonlKnowledgeSink {
    path: PathBuf,
}

impl JsonlKnowledgeSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record back. A missing file is an empty log.
    pub async fn read_all(&self) -> Result<Vec<LearningRecord>, KnowledgeError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(KnowledgeError::IoError {
                    path: self.path.display().to_string(),
                    source,
                })
            }
        };
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(KnowledgeError::from))
            .collect()
    }

    fn io_error(&self, source: std::io::Error) -> KnowledgeError {
        KnowledgeError::IoError {
            path: self.path.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl KnowledgeSink for JsonlKnowledgeSink {
    async fn add_knowledge(&self, record: &LearningRecord) -> Result<(), KnowledgeError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| self.io_error(e))?;
        file.flush().await.map_err(|e| self.io_error(e))?;
        Ok(())
    }
}

/// Discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullKnowledgeSink;

#[async_trait]
impl KnowledgeSink for NullKnowledgeSink {
    async fn add_knowledge(&self, _record: &LearningRecord) -> Result<(), KnowledgeError> {
        Ok(())
    }
}
