//! Append-only score log.

use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// File that receives every new high score as pretty-printed JSON.
#[derive(Debug, Clone)]
pub struct ScoreLog {
    path: PathBuf,
}

impl ScoreLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `record` followed by a newline, creating the file if needed.
    pub async fn append(&self, record: &str) -> std::io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let mut line = String::with_capacity(record.len() + 1);
        line.push_str(record);
        line.push('\n');
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}
