use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

use crate::warehouse::TableLoad;

/// Summary of one loader run, written as JSON on request
#[derive(Debug, Serialize)]
pub struct LoadReport {
    pub run_id: Uuid,
    pub source: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub rows_read: usize,
    pub columns_read: usize,
    pub columns_kept: usize,
    pub dropped_columns: Vec<String>,
    pub tables: Vec<TableLoad>,
}

impl LoadReport {
    pub fn total_rows(&self) -> usize {
        self.tables.iter().map(|t| t.rows).sum()
    }
}

pub async fn write_report(path: &Path, report: &LoadReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize run report")?;
    fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write run report {}", path.display()))?;
    Ok(())
}
