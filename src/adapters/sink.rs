//! Durable report pool: append-only JSONL, one committed report per line.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::Sink;

/// One report committed to the pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommittedReport {
    pub trace_id: Uuid,
    pub committed_at: DateTime<Utc>,
    pub report: String,
}

/// Append-only JSONL sink for accepted reports.
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Read every committed report, oldest first. Missing file reads as empty.
    pub async fn read_all(&self) -> Result<Vec<CommittedReport>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed to read report pool: {}", self.path.display()))?;

        let mut reports = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let report: CommittedReport =
                serde_json::from_str(line).context("corrupt report pool entry")?;
            reports.push(report);
        }
        Ok(reports)
    }
}

#[async_trait]
impl Sink for JsonlSink {
    async fn append(&self, trace_id: Uuid, content: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let entry = CommittedReport {
            trace_id,
            committed_at: Utc::now(),
            report: content.to_string(),
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("failed to open report pool: {}", self.path.display()))?;

        let json = serde_json::to_string(&entry)?;
        file.write_all(format!("{json}\n").as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_append_and_read_back() {
        let temp = TempDir::new().unwrap();
        let sink = JsonlSink::new(temp.path().join("pool.jsonl"));

        let trace_id = Uuid::new_v4();
        sink.append(trace_id, "incident report one").await.unwrap();
        sink.append(Uuid::new_v4(), "incident report two")
            .await
            .unwrap();

        let reports = sink.read_all().await.unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].trace_id, trace_id);
        assert_eq!(reports[0].report, "incident report one");
    }

    #[tokio::test]
    async fn test_missing_pool_reads_as_empty() {
        let temp = TempDir::new().unwrap();
        let sink = JsonlSink::new(temp.path().join("absent.jsonl"));
        assert!(sink.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reports_with_newlines_survive_the_round_trip() {
        let temp = TempDir::new().unwrap();
        let sink = JsonlSink::new(temp.path().join("pool.jsonl"));

        sink.append(Uuid::new_v4(), "line one\nline two")
            .await
            .unwrap();

        let reports = sink.read_all().await.unwrap();
        assert_eq!(reports[0].report, "line one\nline two");
    }
}
