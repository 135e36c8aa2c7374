#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use biblink::cache::MemoryCache;
use biblink::config::BiblinkConfig;
use biblink::kb::{InMemoryKnowledgeBase, KnowledgeBaseWriter, StoredEntity};
use biblink::lookup::{CitationLookup, CitationMetadata};
use biblink::model::{Reference, Snak, Statement, Value};
use biblink::{EntityId, IdentifierExtractor, Pipeline, SourceRecord, Vocabulary, WriteTask};
use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Citation lookup answering from a fixed table. Unknown links yield no
/// results; links listed in `failing` error out.
#[derive(Default)]
pub struct ScriptedLookup {
    answers: HashMap<String, Vec<CitationMetadata>>,
    failing: HashSet<String>,
    delay: Duration,
    calls: AtomicU64,
}

impl ScriptedLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(mut self, link: &str, results: Vec<CitationMetadata>) -> Self {
        self.answers.insert(link.to_string(), results);
        self
    }

    pub fn fail(mut self, link: &str) -> Self {
        self.failing.insert(link.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CitationLookup for ScriptedLookup {
    async fn lookup(&self, link: &str) -> Result<Vec<CitationMetadata>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.contains(link) {
            bail!("lookup service unavailable");
        }
        Ok(self.answers.get(link).cloned().unwrap_or_default())
    }
}

pub fn doi_result(doi: &str) -> CitationMetadata {
    CitationMetadata {
        doi: Some(doi.to_string()),
        ..CitationMetadata::default()
    }
}

/// Writer over an in-memory knowledge base that can be slowed down and told
/// to reject tasks carrying particular labels.
pub struct ScriptedWriter {
    inner: Arc<InMemoryKnowledgeBase>,
    reject_labels: HashSet<String>,
    delay: Duration,
    attempts: AtomicU64,
}

impl ScriptedWriter {
    pub fn new(inner: Arc<InMemoryKnowledgeBase>) -> Self {
        Self {
            inner,
            reject_labels: HashSet::new(),
            delay: Duration::ZERO,
            attempts: AtomicU64::new(0),
        }
    }

    pub fn reject_label(mut self, label: &str) -> Self {
        self.reject_labels.insert(label.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KnowledgeBaseWriter for ScriptedWriter {
    async fn write(&self, task: &WriteTask) -> Result<EntityId> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(label) = &task.label {
            if self.reject_labels.contains(label) {
                bail!("edit rejected for {}", label);
            }
        }
        self.inner.write(task).await
    }
}

pub fn retrieved() -> NaiveDate {
    NaiveDate::from_ymd_opt(2017, 3, 9).expect("valid date")
}

/// Configuration for tests: no lookup spacing, small queue.
pub fn test_config() -> BiblinkConfig {
    let mut config = BiblinkConfig::default();
    config.lookup.min_interval_ms = 0;
    config.lookup.timeout_secs = 5;
    config.queue.capacity = 64;
    config.queue.write_timeout_secs = 5;
    config
}

pub fn pipeline_with(
    kb: Arc<InMemoryKnowledgeBase>,
    writer: Arc<dyn KnowledgeBaseWriter>,
    lookup: Arc<dyn CitationLookup>,
    config: BiblinkConfig,
) -> Pipeline {
    let extractor = IdentifierExtractor::new(
        lookup,
        Arc::new(MemoryCache::with_ttl_days(1024, 180)),
        &config.lookup,
    );
    Pipeline::new(
        kb,
        writer,
        Arc::new(extractor),
        Arc::new(Vocabulary::builtin()),
        config,
    )
}

pub fn pipeline(kb: Arc<InMemoryKnowledgeBase>, lookup: Arc<dyn CitationLookup>) -> Pipeline {
    pipeline_with(kb.clone(), kb, lookup, test_config())
}

/// A complete journal-article record resolving through a DOI link.
pub fn article(catalog_id: &str, doi: &str) -> SourceRecord {
    let mut record = SourceRecord::new(catalog_id);
    record.title = Some(format!("Exposure study {}.", catalog_id));
    record.authors = vec!["Smith J".to_string(), "Doe A".to_string()];
    record.citation_source = Some("J Occup Med 1998 Mar; 40(3):210-5".to_string());
    record.publication_date = Some("19980300".to_string());
    record.document_types = vec!["Journal Article".to_string()];
    record.priority_areas = vec!["Manufacturing".to_string()];
    record.link = Some(format!("https://doi.org/{}", doi));
    record
}

/// An entity carrying one referenced external identifier.
pub fn entity_with(property: &str, value: &str) -> StoredEntity {
    StoredEntity::new().with_statement(
        Statement::new(property, Value::external_id(value)).with_provenance(Reference::new(
            vec![Snak::new("P248", Value::item(&EntityId::new("Q26822184")))],
        )),
    )
}

/// Records pointing at `distinct` works, each repeated `copies` times and
/// shuffled.
pub fn duplicated_articles(distinct: usize, copies: usize, seed: u64) -> Vec<SourceRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut records = Vec::with_capacity(distinct * copies);
    for work in 0..distinct {
        for copy in 0..copies {
            let mut record = article(&format!("{}{:03}", work, copy), &format!("10.1000/w{}", work));
            record.title = Some(format!("Work {}", work));
            records.push(record);
        }
    }
    for i in (1..records.len()).rev() {
        let j = rng.random_range(0..=i);
        records.swap(i, j);
    }
    records
}
