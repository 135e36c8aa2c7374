//! Error taxonomy for a reconciliation run.
//!
//! Only [`ReconcileError::IndexBuild`] is fatal to a run; every other variant is
//! scoped to one record or one write task and is reported, not propagated.

use crate::model::{EntityId, Identifier, IdentifierKind};

/// Errors surfaced while reconciling and writing catalog records.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("citation lookup failed for {link}: {reason}")]
    Extraction { link: String, reason: String },

    #[error("{identifier} matches several entities: {}", join_ids(candidates))]
    AmbiguousMatch {
        identifier: Identifier,
        candidates: Vec<EntityId>,
    },

    #[error("record {catalog_id} has no usable {field}")]
    MissingField {
        catalog_id: String,
        field: &'static str,
    },

    #[error("failed to build identifier index for {kind}: {source}")]
    IndexBuild {
        kind: IdentifierKind,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Write(#[from] WriteFailure),
}

/// Why a single write task failed. Never fatal to the queue.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WriteFailure {
    #[error("write to {target} rejected: {message}")]
    Rejected { target: String, message: String },

    #[error("write to {target} timed out after {seconds}s")]
    Timeout { target: String, seconds: u64 },

    #[error("write queue is closed")]
    QueueClosed,

    #[error("refusing to enqueue an empty write task")]
    EmptyTask,

    #[error("write task was discarded before it ran")]
    Discarded,
}

fn join_ids(ids: &[EntityId]) -> String {
    ids.iter()
        .map(EntityId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ambiguous_message_lists_candidates() {
        let err = ReconcileError::AmbiguousMatch {
            identifier: Identifier::new(IdentifierKind::Doi, "10.1/abc").unwrap(),
            candidates: vec![EntityId::new("Q1"), EntityId::new("Q2")],
        };
        assert_eq!(
            err.to_string(),
            "DOI 10.1/ABC matches several entities: Q1, Q2"
        );
    }
}
