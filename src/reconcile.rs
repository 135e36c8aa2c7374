//! # Reconciliation
//!
//! Decides, per catalog record, whether to create a new entity, extend an
//! existing (or pending) one, or skip the record. Creation is gated by the
//! in-flight set so that two records sharing an identifier never both create.

use crate::classify::Vocabulary;
use crate::error::ReconcileError;
use crate::extract::IdentifierExtractor;
use crate::index::IdentifierIndex;
use crate::model::{EntityId, Identifier, IdentifierKind, SourceRecord};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Why a record was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The target already holds every identifier kind relevant to the record.
    AlreadyComplete,
    /// The target is known and the record adds no identifier.
    NothingNew,
    /// No target and no identifier to look up or create from.
    NoIdentifiers,
    /// An identifier resolves to more than one entity.
    Ambiguous {
        identifier: Identifier,
        candidates: Vec<EntityId>,
    },
    /// The record's identifiers are reserved by two different pending creations.
    ConflictingReservations,
    /// A sub-work whose container could not be resolved.
    NoContainer,
    /// A single-page flyer; never created.
    Flyer,
    /// The pending creation this record joined did not produce an entity.
    CreationFailed,
}

impl SkipReason {
    /// Stable short name, used to group skips in reports.
    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::AlreadyComplete => "already complete",
            SkipReason::NothingNew => "nothing new",
            SkipReason::NoIdentifiers => "no identifiers",
            SkipReason::Ambiguous { .. } => "ambiguous",
            SkipReason::ConflictingReservations => "conflicting reservations",
            SkipReason::NoContainer => "no container",
            SkipReason::Flyer => "flyer",
            SkipReason::CreationFailed => "creation failed",
        }
    }
}

impl SkipReason {
    /// The error behind the skip, for skips caused by conflicting data
    /// rather than by the record being done.
    pub fn as_error(&self) -> Option<ReconcileError> {
        match self {
            SkipReason::Ambiguous {
                identifier,
                candidates,
            } => Some(ReconcileError::AmbiguousMatch {
                identifier: identifier.clone(),
                candidates: candidates.clone(),
            }),
            _ => None,
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Ambiguous { identifier, .. } => write!(f, "ambiguous {}", identifier),
            other => f.write_str(other.label()),
        }
    }
}

/// Where a linked record's statements go.
#[derive(Debug, Clone)]
pub enum LinkTarget {
    Existing(EntityId),
    /// An entity another record of this run is creating.
    Pending(Arc<Reservation>),
}

#[derive(Debug)]
pub enum Decision {
    /// Create a new entity. The guard must be resolved with the created id.
    New(ReservationGuard),
    Link(LinkTarget),
    Skip(SkipReason),
}

/// Outcome of reconciling one record.
#[derive(Debug)]
pub struct ReconciliationResult {
    pub decision: Decision,
    /// Identifiers found for the record that its target does not hold yet.
    pub fresh: Vec<Identifier>,
    /// Set when a sub-work is linked to its container: the sub-work's class.
    pub sub_work_class: Option<EntityId>,
    /// Set when a sub-work with its own entity should point at its container.
    pub container: Option<EntityId>,
}

impl ReconciliationResult {
    fn skip(reason: SkipReason) -> Self {
        Self::with(Decision::Skip(reason), Vec::new())
    }

    fn with(decision: Decision, fresh: Vec<Identifier>) -> Self {
        Self {
            decision,
            fresh,
            sub_work_class: None,
            container: None,
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self.decision, Decision::Skip(_))
    }
}

// =============================================================================
// In-flight reservations
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationState {
    Pending,
    Created(EntityId),
    Failed,
}

/// A pending creation other records can wait on.
#[derive(Debug)]
pub struct Reservation {
    owner: String,
    state: watch::Sender<ReservationState>,
}

impl Reservation {
    fn new(owner: &str) -> Self {
        let (state, _) = watch::channel(ReservationState::Pending);
        Self {
            owner: owner.to_string(),
            state,
        }
    }

    /// Catalog id of the record that made the reservation.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn state(&self) -> ReservationState {
        self.state.borrow().clone()
    }

    /// Wait until the creator settles; `None` if the creation failed.
    pub async fn wait(&self) -> Option<EntityId> {
        let mut rx = self.state.subscribe();
        let settled = rx
            .wait_for(|state| *state != ReservationState::Pending)
            .await
            .ok()?
            .clone();
        match settled {
            ReservationState::Created(id) => Some(id),
            _ => None,
        }
    }
}

/// Held by the record that won a reservation. Dropping it unresolved marks
/// the creation as failed so waiters never hang.
#[derive(Debug)]
pub struct ReservationGuard {
    reservation: Arc<Reservation>,
    settled: bool,
}

impl ReservationGuard {
    pub fn reservation(&self) -> &Arc<Reservation> {
        &self.reservation
    }

    pub fn resolve(mut self, id: EntityId) {
        self.reservation
            .state
            .send_replace(ReservationState::Created(id));
        self.settled = true;
    }

    pub fn fail(mut self) {
        self.reservation.state.send_replace(ReservationState::Failed);
        self.settled = true;
    }
}

impl Drop for ReservationGuard {
    fn drop(&mut self) {
        if !self.settled {
            self.reservation.state.send_replace(ReservationState::Failed);
        }
    }
}

/// Result of [`InflightSet::reserve`].
#[derive(Debug)]
pub enum Reserve {
    Acquired(ReservationGuard),
    Joined(Arc<Reservation>),
    Conflict,
}

/// Identifier keys reserved for creation during this run.
///
/// Entries stay for the whole run: later records carrying the same
/// identifier keep linking to the same creation.
#[derive(Debug, Default)]
pub struct InflightSet {
    entries: Mutex<HashMap<String, Arc<Reservation>>>,
}

impl InflightSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve every key of `identifiers` in one step.
    ///
    /// If some keys are already held by a single reservation, the remaining
    /// keys join it; keys held by two different reservations are a conflict.
    pub fn reserve(&self, owner: &str, identifiers: &[Identifier]) -> Reserve {
        let keys: Vec<String> = identifiers.iter().map(Identifier::key).collect();
        let mut entries = self.entries.lock();

        let mut existing: Option<Arc<Reservation>> = None;
        for key in &keys {
            if let Some(held) = entries.get(key) {
                match &existing {
                    Some(current) if !Arc::ptr_eq(current, held) => return Reserve::Conflict,
                    Some(_) => {}
                    None => existing = Some(held.clone()),
                }
            }
        }

        let (reservation, acquired) = match existing {
            Some(reservation) => (reservation, false),
            None => (Arc::new(Reservation::new(owner)), true),
        };
        for key in keys {
            entries
                .entry(key)
                .or_insert_with(|| reservation.clone());
        }

        if acquired {
            Reserve::Acquired(ReservationGuard {
                reservation,
                settled: false,
            })
        } else {
            Reserve::Joined(reservation)
        }
    }

    pub fn get(&self, identifier: &Identifier) -> Option<Arc<Reservation>> {
        self.entries.lock().get(&identifier.key()).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

// =============================================================================
// Reconciler
// =============================================================================

enum Resolution {
    None,
    One(EntityId),
    Ambiguous(SkipReason),
}

pub struct Reconciler {
    extractor: Arc<IdentifierExtractor>,
    vocabulary: Arc<Vocabulary>,
    index: Arc<IdentifierIndex>,
    inflight: Arc<InflightSet>,
}

impl Reconciler {
    pub fn new(
        extractor: Arc<IdentifierExtractor>,
        vocabulary: Arc<Vocabulary>,
        index: Arc<IdentifierIndex>,
        inflight: Arc<InflightSet>,
    ) -> Self {
        Self {
            extractor,
            vocabulary,
            index,
            inflight,
        }
    }

    pub fn index(&self) -> &IdentifierIndex {
        &self.index
    }

    pub fn inflight(&self) -> &InflightSet {
        &self.inflight
    }

    /// Decide what to do with `record`.
    pub async fn decide(&self, record: &SourceRecord) -> ReconciliationResult {
        let classes = self.vocabulary.classify(&record.document_types, true);
        let sub_work = if self.vocabulary.is_sub_work(&classes) {
            self.vocabulary.sub_work_class(&classes).cloned()
        } else {
            None
        };

        // A sub-work's catalog id is stored on its container, qualified with
        // the part it applies to; it never names the sub-work's own entity.
        let target = if sub_work.is_some() && record.target_entity.is_none() {
            None
        } else {
            match self.known_target(record) {
                Ok(target) => target,
                Err(reason) => return ReconciliationResult::skip(reason),
            }
        };
        let known = record.known_identifiers();

        if target.is_some() && is_complete(record, &known) {
            return ReconciliationResult::skip(SkipReason::AlreadyComplete);
        }

        let fresh = self.fresh_identifiers(record, &known).await;
        match target {
            Some(target) => self.decide_known(target, fresh, &known, sub_work),
            None => self.decide_unknown(record, fresh, sub_work),
        }
    }

    /// The record's own entity: carried by the feed, or found through its
    /// catalog id.
    fn known_target(&self, record: &SourceRecord) -> Result<Option<EntityId>, SkipReason> {
        if let Some(target) = &record.target_entity {
            return Ok(Some(target.clone()));
        }
        let Some(catalog_id) = record.catalog_identifier() else {
            return Ok(None);
        };
        match self.index.candidates(&catalog_id) {
            [] => Ok(None),
            [only] => Ok(Some(only.clone())),
            many => Err(SkipReason::Ambiguous {
                identifier: catalog_id.clone(),
                candidates: many.to_vec(),
            }),
        }
    }

    /// Identifiers from the link and the record's ISBN whose kind the target
    /// does not hold yet.
    async fn fresh_identifiers(
        &self,
        record: &SourceRecord,
        known: &[Identifier],
    ) -> Vec<Identifier> {
        let mut found = match record.link.as_deref() {
            Some(link) if !link.trim().is_empty() => self.extractor.extract(link).await.identifiers(),
            _ => Vec::new(),
        };
        found.extend(record.isbn_identifier());

        let known_kinds: BTreeSet<IdentifierKind> = known.iter().map(Identifier::kind).collect();
        let mut fresh: Vec<Identifier> = Vec::new();
        for identifier in found {
            if !known_kinds.contains(&identifier.kind()) && !fresh.contains(&identifier) {
                fresh.push(identifier);
            }
        }
        fresh
    }

    fn decide_known(
        &self,
        target: EntityId,
        mut fresh: Vec<Identifier>,
        known: &[Identifier],
        sub_work: Option<EntityId>,
    ) -> ReconciliationResult {
        let mut container = None;
        if sub_work.is_some() {
            // Identifiers claimed by another entity belong to the container.
            let lookups: Vec<Identifier> = fresh.iter().chain(known).cloned().collect();
            match self.resolve(&lookups, Some(&target)) {
                Resolution::One(found) => container = Some(found),
                Resolution::Ambiguous(reason) => {
                    warn!(entity = %target, reason = %reason, "Sub-work container is ambiguous");
                }
                Resolution::None => {}
            }
            fresh.retain(|identifier| {
                self.index
                    .candidates(identifier)
                    .iter()
                    .all(|candidate| *candidate == target)
            });
        }

        if fresh.is_empty() && container.is_none() {
            return ReconciliationResult::skip(SkipReason::NothingNew);
        }
        let mut result = ReconciliationResult::with(Decision::Link(LinkTarget::Existing(target)), fresh);
        result.container = container;
        result
    }

    fn decide_unknown(
        &self,
        record: &SourceRecord,
        fresh: Vec<Identifier>,
        sub_work: Option<EntityId>,
    ) -> ReconciliationResult {
        if fresh.is_empty() {
            return ReconciliationResult::skip(SkipReason::NoIdentifiers);
        }

        match self.resolve(&fresh, None) {
            Resolution::Ambiguous(reason) => ReconciliationResult::skip(reason),
            Resolution::One(entity) => {
                let mut result =
                    ReconciliationResult::with(Decision::Link(LinkTarget::Existing(entity)), fresh);
                result.sub_work_class = sub_work;
                result
            }
            Resolution::None if sub_work.is_some() => match self.pending_container(&fresh) {
                Ok(Some(reservation)) => {
                    debug!(
                        record = %record.catalog_id,
                        owner = reservation.owner(),
                        "Sub-work waits for its container"
                    );
                    let mut result = ReconciliationResult::with(
                        Decision::Link(LinkTarget::Pending(reservation)),
                        fresh,
                    );
                    result.sub_work_class = sub_work;
                    result
                }
                Ok(None) => ReconciliationResult::skip(SkipReason::NoContainer),
                Err(reason) => ReconciliationResult::skip(reason),
            },
            Resolution::None if is_flyer(record) => ReconciliationResult::skip(SkipReason::Flyer),
            Resolution::None => match self.inflight.reserve(&record.catalog_id, &fresh) {
                Reserve::Acquired(guard) => ReconciliationResult::with(Decision::New(guard), fresh),
                Reserve::Joined(reservation) => {
                    debug!(
                        record = %record.catalog_id,
                        owner = reservation.owner(),
                        "Joining pending creation"
                    );
                    ReconciliationResult::with(
                        Decision::Link(LinkTarget::Pending(reservation)),
                        fresh,
                    )
                }
                Reserve::Conflict => {
                    ReconciliationResult::skip(SkipReason::ConflictingReservations)
                }
            },
        }
    }

    /// A container another record of this run is creating, found through
    /// the sub-work's identifiers.
    fn pending_container(
        &self,
        identifiers: &[Identifier],
    ) -> Result<Option<Arc<Reservation>>, SkipReason> {
        let mut found: Option<Arc<Reservation>> = None;
        for identifier in identifiers {
            let Some(held) = self.inflight.get(identifier) else {
                continue;
            };
            match &found {
                Some(current) if !Arc::ptr_eq(current, &held) => {
                    return Err(SkipReason::ConflictingReservations)
                }
                Some(_) => {}
                None => found = Some(held),
            }
        }
        Ok(found)
    }

    /// Resolve identifiers through the index to a single entity.
    fn resolve(&self, identifiers: &[Identifier], exclude: Option<&EntityId>) -> Resolution {
        let mut found: Vec<EntityId> = Vec::new();
        let mut first_hit: Option<&Identifier> = None;
        for identifier in identifiers {
            let candidates: Vec<&EntityId> = self
                .index
                .candidates(identifier)
                .iter()
                .filter(|candidate| Some(*candidate) != exclude)
                .collect();
            if candidates.len() > 1 {
                return Resolution::Ambiguous(SkipReason::Ambiguous {
                    identifier: identifier.clone(),
                    candidates: candidates.into_iter().cloned().collect(),
                });
            }
            for candidate in candidates {
                first_hit.get_or_insert(identifier);
                if !found.contains(candidate) {
                    found.push(candidate.clone());
                }
            }
        }
        match (found.len(), first_hit) {
            (0, _) => Resolution::None,
            (1, _) => Resolution::One(found.remove(0)),
            (_, Some(identifier)) => Resolution::Ambiguous(SkipReason::Ambiguous {
                identifier: identifier.clone(),
                candidates: found,
            }),
            (_, None) => Resolution::None,
        }
    }
}

/// Every identifier kind relevant to the record is already known: DOI, PMID
/// and PMCID always, plus the ISBN kind when the record has an ISBN.
fn is_complete(record: &SourceRecord, known: &[Identifier]) -> bool {
    let known_kinds: BTreeSet<IdentifierKind> = known.iter().map(Identifier::kind).collect();
    let mut relevant = vec![IdentifierKind::Doi, IdentifierKind::Pmid, IdentifierKind::Pmcid];
    if let Some(isbn) = record.isbn_identifier() {
        relevant.push(isbn.kind());
    }
    relevant.iter().all(|kind| known_kinds.contains(kind))
}

fn is_flyer(record: &SourceRecord) -> bool {
    record
        .citation_source
        .as_deref()
        .is_some_and(|source| source.trim_end().ends_with(" :1"))
}
