//! # Identifier Index
//!
//! Reverse map from normalized external identifier to the entities claiming
//! it, built once per run before any reconciliation starts. Read-only after
//! construction, so it is shared across tasks without locking.

use crate::error::ReconcileError;
use crate::kb::KnowledgeBaseReader;
use crate::model::{EntityId, Identifier, IdentifierKind};
use std::collections::HashMap;
use tracing::{info, warn};

type ClaimantMap = HashMap<String, Vec<EntityId>>;

/// Identifier → claimant entities, per identifier kind.
///
/// Values claimed by several entities keep every claimant; the index never
/// picks a winner.
#[derive(Debug, Clone, Default)]
pub struct IdentifierIndex {
    maps: HashMap<IdentifierKind, ClaimantMap>,
}

impl IdentifierIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch every identifier kind from the knowledge base.
    ///
    /// Any failure aborts the build; a partial index would let the run create
    /// duplicates of entities it simply failed to see.
    pub async fn build(reader: &dyn KnowledgeBaseReader) -> Result<Self, ReconcileError> {
        let mut index = Self::new();
        for kind in IdentifierKind::ALL {
            let raw = reader
                .identifiers(kind)
                .await
                .map_err(|source| ReconcileError::IndexBuild { kind, source })?;
            index.extend(kind, raw);
            info!(
                kind = %kind,
                values = index.len(kind),
                "Identifier index loaded"
            );
        }

        let conflicts = index.conflicts();
        for (identifier, claimants) in &conflicts {
            warn!(
                identifier = %identifier,
                claimants = ?claimants.iter().map(EntityId::as_str).collect::<Vec<_>>(),
                "Identifier claimed by several entities"
            );
        }
        if !conflicts.is_empty() {
            info!(conflicts = conflicts.len(), "Identifier conflicts found");
        }
        Ok(index)
    }

    /// Merge raw values of one kind, normalizing keys and de-duplicating claimants.
    pub fn extend(&mut self, kind: IdentifierKind, raw: ClaimantMap) {
        let map = self.maps.entry(kind).or_default();
        for (value, entities) in raw {
            let Some(key) = kind.normalize(&value) else {
                continue;
            };
            let claimants = map.entry(key).or_default();
            for entity in entities {
                if !claimants.contains(&entity) {
                    claimants.push(entity);
                }
            }
        }
    }

    /// Register one claimant; used to seed indexes in tests and tools.
    pub fn insert(&mut self, identifier: &Identifier, entity: EntityId) {
        let claimants = self
            .maps
            .entry(identifier.kind())
            .or_default()
            .entry(identifier.value().to_string())
            .or_default();
        if !claimants.contains(&entity) {
            claimants.push(entity);
        }
    }

    /// Entities claiming `identifier`; empty when none.
    pub fn candidates(&self, identifier: &Identifier) -> &[EntityId] {
        self.maps
            .get(&identifier.kind())
            .and_then(|map| map.get(identifier.value()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The single claimant of `identifier`, if there is exactly one.
    pub fn unique(&self, identifier: &Identifier) -> Option<&EntityId> {
        match self.candidates(identifier) {
            [only] => Some(only),
            _ => None,
        }
    }

    /// Number of distinct values indexed for `kind`.
    pub fn len(&self, kind: IdentifierKind) -> usize {
        self.maps.get(&kind).map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.maps.values().all(HashMap::is_empty)
    }

    /// Identifiers claimed by more than one entity, in a stable order.
    pub fn conflicts(&self) -> Vec<(Identifier, Vec<EntityId>)> {
        let mut conflicts: Vec<(Identifier, Vec<EntityId>)> = self
            .maps
            .iter()
            .flat_map(|(kind, map)| {
                map.iter()
                    .filter(|(_, claimants)| claimants.len() > 1)
                    .filter_map(move |(value, claimants)| {
                        Identifier::new(*kind, value).map(|id| (id, claimants.clone()))
                    })
            })
            .collect();
        conflicts.sort();
        conflicts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use crate::model::Statement;

    struct FixedReader {
        fail_on: Option<IdentifierKind>,
    }

    #[async_trait]
    impl KnowledgeBaseReader for FixedReader {
        async fn identifiers(&self, kind: IdentifierKind) -> Result<ClaimantMap> {
            if self.fail_on == Some(kind) {
                bail!("endpoint unavailable");
            }
            let mut map = ClaimantMap::new();
            if kind == IdentifierKind::Doi {
                map.insert("10.1/abc".to_string(), vec![EntityId::from("Q1")]);
                map.insert("10.1/ABC".to_string(), vec![EntityId::from("Q2")]);
                map.insert("10.2/x".to_string(), vec![EntityId::from("Q3")]);
            }
            if kind == IdentifierKind::Pmcid {
                map.insert("PMC77".to_string(), vec![EntityId::from("Q4")]);
            }
            Ok(map)
        }

        async fn has_property(&self, _: &EntityId, _: &str) -> Result<bool> {
            Ok(false)
        }

        async fn referenced_statements(&self, _: &EntityId, _: &str) -> Result<Vec<Statement>> {
            Ok(Vec::new())
        }

        async fn label(&self, _: &EntityId) -> Result<Option<String>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_build_normalizes_and_keeps_all_claimants() {
        let index = IdentifierIndex::build(&FixedReader { fail_on: None })
            .await
            .unwrap();
        let doi = Identifier::new(IdentifierKind::Doi, "10.1/Abc").unwrap();
        assert_eq!(
            index.candidates(&doi),
            &[EntityId::from("Q1"), EntityId::from("Q2")]
        );
        assert_eq!(index.unique(&doi), None);

        let pmcid = Identifier::new(IdentifierKind::Pmcid, "77").unwrap();
        assert_eq!(index.unique(&pmcid), Some(&EntityId::from("Q4")));

        let conflicts = index.conflicts();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].0, doi);
    }

    #[tokio::test]
    async fn test_build_failure_is_reported_per_kind() {
        let err = IdentifierIndex::build(&FixedReader {
            fail_on: Some(IdentifierKind::Cas),
        })
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::IndexBuild {
                kind: IdentifierKind::Cas,
                ..
            }
        ));
    }

    #[test]
    fn test_missing_identifier_has_no_candidates() {
        let mut index = IdentifierIndex::new();
        let isbn = Identifier::isbn("978-1-23-456789-7").unwrap();
        assert!(index.candidates(&isbn).is_empty());
        index.insert(&isbn, EntityId::from("Q9"));
        index.insert(&isbn, EntityId::from("Q9"));
        assert_eq!(index.candidates(&isbn), &[EntityId::from("Q9")]);
        assert_eq!(index.len(IdentifierKind::Isbn13), 1);
    }
}
