//! # Biblink
//!
//! Reconciles bibliographic catalog records against a Wikibase-style
//! knowledge base.
//!
//! Each record is matched by its external identifiers (DOI, PubMed, PMC, ISBN,
//! catalog id). Matches are extended with the statements they lack, unmatched
//! records become new entities, and concurrent creations of the same work are
//! collapsed into one. All writes go through a bounded worker queue that is
//! drained before a run ends.

pub mod cache;
pub mod classify;
pub mod config;
pub mod error;
pub mod extract;
pub mod feed;
pub mod fields;
pub mod index;
pub mod kb;
pub mod lookup;
pub mod model;
pub mod pipeline;
pub mod queue;
pub mod reconcile;

// Re-export main types for convenience
pub use classify::Vocabulary;
pub use config::{BiblinkConfig, ConfigOverrides};
pub use error::{ReconcileError, WriteFailure};
pub use extract::{ExtractedIds, IdentifierExtractor};
pub use feed::{CatalogBatch, CatalogFeed, JsonFeed, MemoryFeed};
pub use fields::{EntitySnapshot, FieldBuilder, StatementLedger};
pub use index::IdentifierIndex;
pub use kb::{InMemoryKnowledgeBase, KnowledgeBaseReader, KnowledgeBaseWriter};
pub use model::{EntityId, Identifier, IdentifierKind, SourceRecord, Statement, WriteTask};
pub use pipeline::{Pipeline, RunReport, StopHandle};
pub use queue::{QueueStats, WriteQueue};
pub use reconcile::{Decision, InflightSet, Reconciler, ReconciliationResult, SkipReason};
