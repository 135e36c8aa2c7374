//! # Catalog Feed
//!
//! Source of catalog records. Records arrive in batches; each batch carries
//! the date the catalog was retrieved, which every statement cites.

use crate::model::SourceRecord;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use std::collections::VecDeque;
use std::path::PathBuf;
use tracing::{info, warn};

/// Records sharing one retrieval date.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogBatch {
    pub retrieved: NaiveDate,
    pub records: Vec<SourceRecord>,
}

/// Yields catalog batches until exhausted.
#[async_trait]
pub trait CatalogFeed: Send {
    async fn next_batch(&mut self) -> Result<Option<CatalogBatch>>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogDocument {
    Wrapped {
        #[serde(default)]
        retrieved: Option<String>,
        entries: Vec<SourceRecord>,
    },
    Bare(Vec<SourceRecord>),
}

/// Parse a retrieval stamp: `YYYY-MM-DD`, optionally with a leading `+` and a
/// time part.
pub fn parse_retrieved(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim().trim_start_matches('+');
    let date = raw.get(..10)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Parse one JSON catalog document. Records without a catalog id are dropped.
pub fn parse_document(raw: &str, default_retrieved: NaiveDate) -> Result<CatalogBatch> {
    let (retrieved, entries) = match serde_json::from_str(raw)? {
        CatalogDocument::Wrapped { retrieved, entries } => {
            let retrieved = match retrieved.as_deref() {
                Some(stamp) => parse_retrieved(stamp).unwrap_or_else(|| {
                    warn!(stamp, "Unparseable retrieval date, using today");
                    default_retrieved
                }),
                None => default_retrieved,
            };
            (retrieved, entries)
        }
        CatalogDocument::Bare(entries) => (default_retrieved, entries),
    };
    let total = entries.len();
    let records: Vec<SourceRecord> = entries
        .into_iter()
        .filter(|record| !record.catalog_id.trim().is_empty())
        .collect();
    if records.len() < total {
        warn!(
            dropped = total - records.len(),
            "Catalog entries without a catalog id dropped"
        );
    }
    Ok(CatalogBatch { retrieved, records })
}

/// Reads one batch per JSON file.
pub struct JsonFeed {
    paths: VecDeque<PathBuf>,
}

impl JsonFeed {
    pub fn new(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            paths: paths.into_iter().collect(),
        }
    }
}

#[async_trait]
impl CatalogFeed for JsonFeed {
    async fn next_batch(&mut self) -> Result<Option<CatalogBatch>> {
        let Some(path) = self.paths.pop_front() else {
            return Ok(None);
        };
        let raw = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading catalog {}", path.display()))?;
        let batch = parse_document(&raw, Utc::now().date_naive())
            .with_context(|| format!("parsing catalog {}", path.display()))?;
        info!(
            path = %path.display(),
            records = batch.records.len(),
            retrieved = %batch.retrieved,
            "Catalog batch loaded"
        );
        Ok(Some(batch))
    }
}

/// Batches held in memory.
#[derive(Debug, Default)]
pub struct MemoryFeed {
    batches: VecDeque<CatalogBatch>,
}

impl MemoryFeed {
    pub fn new(batches: impl IntoIterator<Item = CatalogBatch>) -> Self {
        Self {
            batches: batches.into_iter().collect(),
        }
    }

    pub fn single(retrieved: NaiveDate, records: Vec<SourceRecord>) -> Self {
        Self::new([CatalogBatch { retrieved, records }])
    }
}

#[async_trait]
impl CatalogFeed for MemoryFeed {
    async fn next_batch(&mut self) -> Result<Option<CatalogBatch>> {
        Ok(self.batches.pop_front())
    }
}
