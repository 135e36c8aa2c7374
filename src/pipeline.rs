//! # Reconciliation Pipeline
//!
//! Orchestrates one run: build the identifier index, reconcile records
//! concurrently, build statements, push them through the write queue and
//! drain it. Produces a [`RunReport`].

use crate::cache::{ExtractionCache, MemoryCache, RocksCache};
use crate::classify::Vocabulary;
use crate::config::BiblinkConfig;
use crate::error::{ReconcileError, WriteFailure};
use crate::extract::{ExtractionSummary, IdentifierExtractor};
use crate::feed::CatalogFeed;
use crate::fields::{EntitySnapshot, FieldBuilder, StatementLedger};
use crate::index::IdentifierIndex;
use crate::kb::{KnowledgeBaseReader, KnowledgeBaseWriter};
use crate::lookup::{CitationLookup, CitoidClient};
use crate::model::{EntityId, SourceRecord, WriteTask};
use crate::queue::{QueueStats, WriteQueue};
use crate::reconcile::{
    Decision, InflightSet, LinkTarget, ReconciliationResult, Reconciler, SkipReason,
};
use anyhow::Result;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Cooperative stop signal. Stops submission of new records; queued writes
/// are still drained.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A record skipped because an identifier matched several entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AmbiguousRecord {
    pub catalog_id: String,
    pub identifier: String,
    pub candidates: Vec<EntityId>,
    pub message: String,
}

/// A per-record error that did not stop the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordFailure {
    pub catalog_id: String,
    pub error: String,
}

/// Summary of one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub records: u64,
    pub created: Vec<(String, EntityId)>,
    pub linked: u64,
    pub unchanged: u64,
    pub skipped: BTreeMap<&'static str, u64>,
    pub ambiguous: Vec<AmbiguousRecord>,
    /// Fields left unset because the record lacked them, by field name.
    pub missing_fields: BTreeMap<&'static str, u64>,
    pub statements_written: u64,
    pub failures: Vec<RecordFailure>,
    pub stopped: bool,
    pub queue: QueueStats,
    pub extraction: ExtractionSummary,
}

impl RunReport {
    pub fn skipped_total(&self) -> u64 {
        self.skipped.values().sum()
    }

    fn absorb(&mut self, catalog_id: String, processed: Processed) {
        self.records += 1;
        for &field in &processed.missing {
            *self.missing_fields.entry(field).or_default() += 1;
        }
        match processed.outcome {
            Outcome::Created { entity, statements } => {
                self.statements_written += statements;
                self.created.push((catalog_id, entity));
            }
            Outcome::Linked { statements } => {
                self.statements_written += statements;
                self.linked += 1;
            }
            Outcome::Unchanged => self.unchanged += 1,
            Outcome::Skipped(reason) => {
                *self.skipped.entry(reason.label()).or_default() += 1;
                let message = reason.as_error().map(|error| error.to_string());
                if let (
                    SkipReason::Ambiguous {
                        identifier,
                        candidates,
                    },
                    Some(message),
                ) = (reason, message)
                {
                    self.ambiguous.push(AmbiguousRecord {
                        catalog_id,
                        identifier: identifier.to_string(),
                        candidates,
                        message,
                    });
                }
            }
            Outcome::Failed(error) => self.failures.push(RecordFailure {
                catalog_id,
                error: format!("{:#}", error),
            }),
        }
    }
}

enum Outcome {
    Created { entity: EntityId, statements: u64 },
    Linked { statements: u64 },
    Unchanged,
    Skipped(SkipReason),
    Failed(anyhow::Error),
}

impl Outcome {
    fn failed(failure: WriteFailure) -> Self {
        Outcome::Failed(ReconcileError::from(failure).into())
    }
}

struct Processed {
    outcome: Outcome,
    missing: Vec<&'static str>,
}

impl From<Outcome> for Processed {
    fn from(outcome: Outcome) -> Self {
        Self {
            outcome,
            missing: Vec::new(),
        }
    }
}

/// Shared state of one run.
struct RunContext {
    reader: Arc<dyn KnowledgeBaseReader>,
    reconciler: Reconciler,
    index: Arc<IdentifierIndex>,
    queue: WriteQueue,
    ledger: StatementLedger,
    entity_locks: DashMap<EntityId, Arc<Mutex<()>>>,
    stop: StopHandle,
}

impl RunContext {
    fn entity_lock(&self, entity: &EntityId) -> Arc<Mutex<()>> {
        self.entity_locks.entry(entity.clone()).or_default().clone()
    }

    async fn process(&self, builder: &FieldBuilder, record: &SourceRecord) -> Processed {
        let mut result = self.reconciler.decide(record).await;
        let decision = std::mem::replace(
            &mut result.decision,
            Decision::Skip(SkipReason::NothingNew),
        );
        match decision {
            Decision::Skip(reason) => {
                match reason.as_error() {
                    Some(error) => warn!(record = %record.catalog_id, error = %error, "Record skipped"),
                    None => debug!(record = %record.catalog_id, reason = %reason, "Record skipped"),
                }
                Outcome::Skipped(reason).into()
            }
            Decision::New(guard) => {
                let built = builder.build(
                    None,
                    record,
                    &result,
                    &EntitySnapshot::empty(),
                    &self.index,
                    &self.ledger,
                );
                let missing = self.report_missing(record, built.missing);
                if self.stop.is_stopped() {
                    guard.fail();
                    return Processed {
                        outcome: Outcome::failed(WriteFailure::QueueClosed),
                        missing,
                    };
                }
                let statements = built.task.statements.clone();
                let outcome = match self.write(built.task).await {
                    Ok(entity) => {
                        self.ledger.record_all(&entity, &statements);
                        guard.resolve(entity.clone());
                        info!(record = %record.catalog_id, entity = %entity, "Entity created");
                        Outcome::Created {
                            entity,
                            statements: statements.len() as u64,
                        }
                    }
                    Err(failure) => {
                        guard.fail();
                        Outcome::failed(failure)
                    }
                };
                Processed { outcome, missing }
            }
            Decision::Link(target) => {
                let entity = match target {
                    LinkTarget::Existing(entity) => entity,
                    LinkTarget::Pending(reservation) => match reservation.wait().await {
                        Some(entity) => entity,
                        None => return Outcome::Skipped(SkipReason::CreationFailed).into(),
                    },
                };
                self.extend(builder, record, &result, entity).await
            }
        }
    }

    /// Append to an existing entity. Writes per entity are serialized from
    /// snapshot read until the write outcome is known.
    async fn extend(
        &self,
        builder: &FieldBuilder,
        record: &SourceRecord,
        result: &ReconciliationResult,
        entity: EntityId,
    ) -> Processed {
        let lock = self.entity_lock(&entity);
        let _held = lock.lock().await;

        let snapshot = match EntitySnapshot::load(self.reader.as_ref(), &entity).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(record = %record.catalog_id, entity = %entity, error = %e, "Snapshot read failed");
                return Outcome::Failed(e.context(format!("reading {}", entity))).into();
            }
        };
        let built = builder.build(
            Some(&entity),
            record,
            result,
            &snapshot,
            &self.index,
            &self.ledger,
        );
        let missing = self.report_missing(record, built.missing);
        if built.task.is_empty() {
            return Processed {
                outcome: Outcome::Unchanged,
                missing,
            };
        }
        if self.stop.is_stopped() {
            self.ledger.release(&entity, &built.task.statements);
            return Processed {
                outcome: Outcome::failed(WriteFailure::QueueClosed),
                missing,
            };
        }

        let statements = built.task.statements.clone();
        let outcome = match self.write(built.task).await {
            Ok(written) => {
                debug!(record = %record.catalog_id, entity = %written, statements = statements.len(), "Entity extended");
                Outcome::Linked {
                    statements: statements.len() as u64,
                }
            }
            Err(failure) => {
                self.ledger.release(&entity, &statements);
                Outcome::failed(failure)
            }
        };
        Processed { outcome, missing }
    }

    async fn write(&self, task: WriteTask) -> Result<EntityId, WriteFailure> {
        self.queue.submit(task).await?.outcome().await
    }

    fn report_missing(
        &self,
        record: &SourceRecord,
        missing: Vec<&'static str>,
    ) -> Vec<&'static str> {
        for &field in &missing {
            let error = ReconcileError::MissingField {
                catalog_id: record.catalog_id.clone(),
                field,
            };
            debug!(error = %error, "Field skipped");
        }
        missing
    }
}

/// Runs catalog feeds against one knowledge base.
pub struct Pipeline {
    reader: Arc<dyn KnowledgeBaseReader>,
    writer: Arc<dyn KnowledgeBaseWriter>,
    extractor: Arc<IdentifierExtractor>,
    vocabulary: Arc<Vocabulary>,
    config: BiblinkConfig,
    stop: StopHandle,
}

impl Pipeline {
    pub fn new(
        reader: Arc<dyn KnowledgeBaseReader>,
        writer: Arc<dyn KnowledgeBaseWriter>,
        extractor: Arc<IdentifierExtractor>,
        vocabulary: Arc<Vocabulary>,
        config: BiblinkConfig,
    ) -> Self {
        Self {
            reader,
            writer,
            extractor,
            vocabulary,
            config,
            stop: StopHandle::new(),
        }
    }

    /// Wire the default collaborators from configuration: the citation
    /// lookup service, the configured cache and vocabulary.
    pub fn from_config(
        config: BiblinkConfig,
        reader: Arc<dyn KnowledgeBaseReader>,
        writer: Arc<dyn KnowledgeBaseWriter>,
    ) -> Result<Self> {
        let lookup: Arc<dyn CitationLookup> = Arc::new(CitoidClient::new(&config.lookup)?);
        let cache: Arc<dyn ExtractionCache> = match &config.cache.path {
            Some(path) => Arc::new(RocksCache::open_with_ttl_days(path, config.cache.ttl_days)?),
            None => Arc::new(MemoryCache::with_ttl_days(
                config.cache.capacity,
                config.cache.ttl_days,
            )),
        };
        let vocabulary = match &config.vocabulary {
            Some(path) => Vocabulary::from_json_file(path)?,
            None => Vocabulary::builtin(),
        };
        let extractor = IdentifierExtractor::new(lookup, cache, &config.lookup);
        Ok(Self::new(
            reader,
            writer,
            Arc::new(extractor),
            Arc::new(vocabulary),
            config,
        ))
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Run every batch of `feed`.
    ///
    /// Fails only when the identifier index cannot be built or the feed
    /// cannot be read; per-record problems end up in the report.
    pub async fn run(&self, feed: &mut dyn CatalogFeed) -> Result<RunReport> {
        let index = Arc::new(IdentifierIndex::build(self.reader.as_ref()).await?);
        let reconciler = Reconciler::new(
            self.extractor.clone(),
            self.vocabulary.clone(),
            index.clone(),
            Arc::new(InflightSet::new()),
        );
        let context = Arc::new(RunContext {
            reader: self.reader.clone(),
            reconciler,
            index,
            queue: WriteQueue::start(self.writer.clone(), &self.config.queue),
            ledger: StatementLedger::new(),
            entity_locks: DashMap::new(),
            stop: self.stop.clone(),
        });

        let mut report = RunReport::default();
        let outcome = self.run_batches(&context, feed, &mut report).await;

        report.queue = context.queue.drain().await;
        report.extraction = self.extractor.stats().snapshot();
        report.stopped = self.stop.is_stopped();
        outcome?;

        info!(
            records = report.records,
            created = report.created.len(),
            linked = report.linked,
            skipped = report.skipped_total(),
            ambiguous = report.ambiguous.len(),
            failures = report.failures.len(),
            statements = report.statements_written,
            "Run complete"
        );
        Ok(report)
    }

    async fn run_batches(
        &self,
        context: &Arc<RunContext>,
        feed: &mut dyn CatalogFeed,
        report: &mut RunReport,
    ) -> Result<()> {
        let permits = Arc::new(Semaphore::new(self.config.reconcile.concurrency.max(1)));

        while let Some(batch) = feed.next_batch().await? {
            let builder = Arc::new(FieldBuilder::new(
                self.vocabulary.clone(),
                self.config.provenance.clone(),
                batch.retrieved,
            )?);
            // Sub-works go second so containers created by this batch are
            // already reserved when they look for them.
            let (sub_works, works): (Vec<SourceRecord>, Vec<SourceRecord>) = batch
                .records
                .into_iter()
                .partition(|record| self.vocabulary.describes_sub_work(&record.document_types));

            for records in [works, sub_works] {
                self.run_records(context, &builder, &permits, records, report)
                    .await?;
                if self.stop.is_stopped() {
                    break;
                }
            }

            if self.stop.is_stopped() {
                info!("Stop requested, no further batches");
                break;
            }
        }
        Ok(())
    }

    async fn run_records(
        &self,
        context: &Arc<RunContext>,
        builder: &Arc<FieldBuilder>,
        permits: &Arc<Semaphore>,
        records: Vec<SourceRecord>,
        report: &mut RunReport,
    ) -> Result<()> {
        let mut tasks = JoinSet::new();
        for record in records {
            if self.stop.is_stopped() {
                break;
            }
            let permit = permits.clone().acquire_owned().await?;
            let context = context.clone();
            let builder = builder.clone();
            tasks.spawn(async move {
                let processed = context.process(&builder, &record).await;
                drop(permit);
                (record.catalog_id, processed)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((catalog_id, processed)) => report.absorb(catalog_id, processed),
                Err(e) => warn!(error = %e, "Record task panicked"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Identifier, IdentifierKind};

    #[test]
    fn test_report_groups_outcomes() {
        let mut report = RunReport::default();
        report.absorb(
            "1".to_string(),
            Processed {
                outcome: Outcome::Created {
                    entity: EntityId::from("Q1"),
                    statements: 4,
                },
                missing: vec!["authors", "title"],
            },
        );
        report.absorb(
            "2".to_string(),
            Processed {
                outcome: Outcome::Linked { statements: 1 },
                missing: vec!["authors"],
            },
        );
        report.absorb("3".to_string(), Outcome::Skipped(SkipReason::NothingNew).into());
        report.absorb("4".to_string(), Outcome::Skipped(SkipReason::NothingNew).into());
        report.absorb(
            "5".to_string(),
            Outcome::Skipped(SkipReason::Ambiguous {
                identifier: Identifier::new(IdentifierKind::Doi, "10.1/a").unwrap(),
                candidates: vec![EntityId::from("Q1"), EntityId::from("Q2")],
            })
            .into(),
        );
        report.absorb("6".to_string(), Outcome::failed(WriteFailure::QueueClosed).into());

        assert_eq!(report.records, 6);
        assert_eq!(report.created, vec![("1".to_string(), EntityId::from("Q1"))]);
        assert_eq!(report.linked, 1);
        assert_eq!(report.statements_written, 5);
        assert_eq!(report.skipped.get("nothing new"), Some(&2));
        assert_eq!(report.skipped_total(), 3);
        assert_eq!(report.ambiguous[0].identifier, "DOI 10.1/A");
        assert_eq!(
            report.ambiguous[0].message,
            "DOI 10.1/A matches several entities: Q1, Q2"
        );
        assert_eq!(report.missing_fields.get("authors"), Some(&2));
        assert_eq!(report.failures[0].error, "write queue is closed");
    }

    #[test]
    fn test_stop_handle_is_shared() {
        let handle = StopHandle::new();
        let clone = handle.clone();
        assert!(!handle.is_stopped());
        clone.stop();
        assert!(handle.is_stopped());
    }
}
