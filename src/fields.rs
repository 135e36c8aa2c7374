//! # Field Building
//!
//! Turns a reconciled record into the statements to append to its target.
//! Every rule is add-only-if-absent against a snapshot of the target, every
//! statement carries catalog provenance, and a run-wide ledger keeps the same
//! (entity, property, value) from being appended twice.

use crate::classify::{Vocabulary, SCHOLARLY_ARTICLE};
use crate::config::ProvenanceConfig;
use crate::index::IdentifierIndex;
use crate::kb::KnowledgeBaseReader;
use crate::model::{
    props, DatePrecision, EntityId, Identifier, IdentifierKind, Reference, Snak, SourceRecord,
    Statement, TimeValue, Value, WriteTask,
};
use crate::reconcile::ReconciliationResult;
use anyhow::Result;
use chrono::{Datelike, NaiveDate};
use dashmap::DashSet;
use regex::Regex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

pub const MAX_TITLE_CHARS: usize = 400;
pub const MAX_LABEL_CHARS: usize = 250;

/// Properties read from the target before building.
const SNAPSHOT_PROPERTIES: [&str; 19] = [
    props::DOI,
    props::PMID,
    props::PMCID,
    props::ISBN_10,
    props::ISBN_13,
    props::CATALOG_ID,
    props::INSTANCE_OF,
    props::PUBLICATION_DATE,
    props::TITLE,
    props::AUTHOR,
    props::AUTHOR_NAME_STRING,
    props::VOLUME,
    props::ISSUE,
    props::PAGES,
    props::MAIN_SUBJECT,
    props::PART_OF,
    props::SPONSOR,
    props::CAS,
    props::APPLIES_TO_PART,
];

/// What the target entity already holds.
#[derive(Debug, Clone, Default)]
pub struct EntitySnapshot {
    present: HashSet<String>,
    referenced: HashMap<String, Vec<Statement>>,
    label: Option<String>,
}

impl EntitySnapshot {
    /// Snapshot of an entity that does not exist yet.
    pub fn empty() -> Self {
        Self::default()
    }

    pub async fn load(reader: &dyn KnowledgeBaseReader, entity: &EntityId) -> Result<Self> {
        let mut snapshot = Self::empty();
        for property in SNAPSHOT_PROPERTIES {
            let referenced = reader.referenced_statements(entity, property).await?;
            let present = !referenced.is_empty() || reader.has_property(entity, property).await?;
            if present {
                snapshot.present.insert(property.to_string());
            }
            if !referenced.is_empty() {
                snapshot.referenced.insert(property.to_string(), referenced);
            }
        }
        snapshot.label = reader.label(entity).await?;
        Ok(snapshot)
    }

    pub fn has_property(&self, property: &str) -> bool {
        self.present.contains(property)
    }

    pub fn referenced(&self, property: &str) -> &[Statement] {
        self.referenced
            .get(property)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn has_referenced(&self, property: &str) -> bool {
        !self.referenced(property).is_empty()
    }

    pub fn has_label(&self) -> bool {
        self.label.is_some()
    }

    /// Record a statement as present; used to build snapshots by hand.
    pub fn with_statement(mut self, statement: Statement) -> Self {
        self.present.insert(statement.property.clone());
        if statement.is_referenced() {
            self.referenced
                .entry(statement.property.clone())
                .or_default()
                .push(statement);
        }
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    fn holds_item(&self, property: &str, item: &EntityId) -> bool {
        self.referenced(property)
            .iter()
            .any(|statement| statement.value.as_item() == Some(item))
    }

    fn holds_value(&self, property: &str, value: &Value) -> bool {
        let key = value.match_key();
        self.referenced(property)
            .iter()
            .any(|statement| statement.value.match_key() == key)
    }
}

/// (entity, property, value) triples appended during this run.
#[derive(Debug, Default)]
pub struct StatementLedger {
    seen: DashSet<(EntityId, String, String)>,
}

impl StatementLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(entity: &EntityId, statement: &Statement) -> (EntityId, String, String) {
        (
            entity.clone(),
            statement.property.clone(),
            statement.value.match_key(),
        )
    }

    /// Claim a triple; false if it was already claimed this run.
    pub fn claim(&self, entity: &EntityId, statement: &Statement) -> bool {
        self.seen.insert(Self::key(entity, statement))
    }

    /// Record statements written to a freshly created entity.
    pub fn record_all(&self, entity: &EntityId, statements: &[Statement]) {
        for statement in statements {
            self.seen.insert(Self::key(entity, statement));
        }
    }

    /// Give back claims of a task whose write failed.
    pub fn release(&self, entity: &EntityId, statements: &[Statement]) {
        for statement in statements {
            self.seen.remove(&Self::key(entity, statement));
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Statements for one record plus the fields it lacked.
#[derive(Debug, Clone, Default)]
pub struct BuiltTask {
    pub task: WriteTask,
    pub missing: Vec<&'static str>,
}

/// Collects statements, dropping repeats within the task and across the run.
struct Draft<'a> {
    target: Option<&'a EntityId>,
    ledger: &'a StatementLedger,
    reference: Reference,
    local: HashSet<(String, String)>,
    statements: Vec<Statement>,
}

impl Draft<'_> {
    fn push(&mut self, statement: Statement) {
        let local_key = (statement.property.clone(), statement.value.match_key());
        if self.local.contains(&local_key) {
            return;
        }
        if let Some(target) = self.target {
            if !self.ledger.claim(target, &statement) {
                return;
            }
        }
        self.local.insert(local_key);
        self.statements
            .push(statement.with_provenance(self.reference.clone()));
    }
}

/// Builds write tasks from reconciled records.
pub struct FieldBuilder {
    vocabulary: Arc<Vocabulary>,
    provenance: ProvenanceConfig,
    retrieved: NaiveDate,
    volume_issue_pages: Regex,
}

impl FieldBuilder {
    pub fn new(
        vocabulary: Arc<Vocabulary>,
        provenance: ProvenanceConfig,
        retrieved: NaiveDate,
    ) -> Result<Self> {
        Ok(Self {
            vocabulary,
            provenance,
            retrieved,
            volume_issue_pages: Regex::new(
                r"(?:^|[\s;])([^\s;()]+)\(([^\s()]+)\):(\S+?)\.?\s*$",
            )?,
        })
    }

    /// Provenance attached to every statement built for `record`.
    pub fn reference(&self, record: &SourceRecord) -> Reference {
        Reference::new(vec![
            Snak::new(
                props::STATED_IN,
                Value::item(&EntityId::new(self.provenance.source_item.clone())),
            ),
            Snak::new(props::CATALOG_ID, Value::external_id(record.catalog_id.trim())),
            Snak::new(props::RETRIEVED, Value::Time(TimeValue::day(self.retrieved))),
        ])
    }

    /// Build the task for `record`.
    ///
    /// `target` is `None` when the record creates a new entity; `snapshot`
    /// describes what the target already holds.
    pub fn build(
        &self,
        target: Option<&EntityId>,
        record: &SourceRecord,
        result: &ReconciliationResult,
        snapshot: &EntitySnapshot,
        index: &IdentifierIndex,
        ledger: &StatementLedger,
    ) -> BuiltTask {
        let mut draft = Draft {
            target,
            ledger,
            reference: self.reference(record),
            local: HashSet::new(),
            statements: Vec::new(),
        };
        let mut built = BuiltTask::default();

        if let Some(class) = &result.sub_work_class {
            self.add_part_catalog_id(&mut draft, record, class, snapshot);
            built.task = WriteTask {
                statements: draft.statements,
                ..WriteTask::new(target.cloned())
            };
            return built;
        }

        self.add_identifiers(&mut draft, record, &result.fresh, snapshot);
        let classes = self.add_classes(&mut draft, record, snapshot, &mut built.missing);
        if let Some(container) = &result.container {
            if !snapshot.holds_item(props::PART_OF, container) {
                draft.push(Statement::new(props::PART_OF, Value::item(container)));
            }
        }
        let date = self.add_publication_date(&mut draft, record, snapshot, &mut built.missing);
        let label = self.add_title(&mut draft, record, snapshot, &mut built.missing);
        self.add_authors(&mut draft, record, snapshot, &mut built.missing);
        self.add_volume_issue_pages(&mut draft, record, snapshot);
        self.add_subjects(&mut draft, record, snapshot, index);

        let mut description = None;
        if target.is_none() {
            if let Some(sponsor) = &self.provenance.sponsor {
                draft.push(Statement::new(
                    props::SPONSOR,
                    Value::item(&EntityId::new(sponsor.clone())),
                ));
            }
            if classes.contains(&EntityId::from(SCHOLARLY_ARTICLE)) {
                description =
                    date.map(|date| format!("scientific article published in {}", date.year()));
            }
        }

        built.task = WriteTask {
            target: target.cloned(),
            statements: draft.statements,
            label,
            description,
        };
        built
    }

    fn add_part_catalog_id(
        &self,
        draft: &mut Draft<'_>,
        record: &SourceRecord,
        class: &EntityId,
        snapshot: &EntitySnapshot,
    ) {
        let Some(catalog) = record.catalog_identifier() else {
            return;
        };
        let value = Value::external_id(catalog.value());
        if !snapshot.holds_value(props::CATALOG_ID, &value) {
            draft.push(
                Statement::new(props::CATALOG_ID, value)
                    .with_qualifier(Snak::new(props::APPLIES_TO_PART, Value::item(class))),
            );
        }
    }

    fn add_identifiers(
        &self,
        draft: &mut Draft<'_>,
        record: &SourceRecord,
        fresh: &[Identifier],
        snapshot: &EntitySnapshot,
    ) {
        for identifier in fresh {
            let property = identifier.kind().property();
            if !snapshot.has_referenced(property) {
                draft.push(Statement::new(
                    property,
                    Value::external_id(identifier.value()),
                ));
            }
        }
        // A work may be listed under several catalog ids.
        if let Some(catalog) = record.catalog_identifier() {
            let value = Value::external_id(catalog.value());
            if !snapshot.holds_value(props::CATALOG_ID, &value) {
                draft.push(Statement::new(props::CATALOG_ID, value));
            }
        }
    }

    fn add_classes(
        &self,
        draft: &mut Draft<'_>,
        record: &SourceRecord,
        snapshot: &EntitySnapshot,
        missing: &mut Vec<&'static str>,
    ) -> BTreeSet<EntityId> {
        if record.document_types.is_empty() {
            missing.push("document type");
        }
        let classes = self.vocabulary.classify(
            &record.document_types,
            snapshot.has_property(props::INSTANCE_OF),
        );
        for class in &classes {
            if !snapshot.holds_item(props::INSTANCE_OF, class) {
                draft.push(Statement::new(props::INSTANCE_OF, Value::item(class)));
            }
        }
        classes
    }

    fn add_publication_date(
        &self,
        draft: &mut Draft<'_>,
        record: &SourceRecord,
        snapshot: &EntitySnapshot,
        missing: &mut Vec<&'static str>,
    ) -> Option<NaiveDate> {
        let Some(time) = record
            .publication_date
            .as_deref()
            .and_then(parse_publication_date)
        else {
            missing.push("publication date");
            return None;
        };
        if !snapshot.has_property(props::PUBLICATION_DATE) {
            draft.push(Statement::new(props::PUBLICATION_DATE, Value::Time(time)));
        }
        Some(time.date)
    }

    /// Returns the label to set, if any.
    fn add_title(
        &self,
        draft: &mut Draft<'_>,
        record: &SourceRecord,
        snapshot: &EntitySnapshot,
        missing: &mut Vec<&'static str>,
    ) -> Option<String> {
        let Some(title) = record.title.as_deref().map(clean_title).filter(|t| !t.is_empty())
        else {
            missing.push("title");
            return None;
        };
        let length = title.chars().count();

        let already_sourced = snapshot
            .referenced(props::TITLE)
            .iter()
            .any(|statement| statement.reference_components() >= 3);
        if length <= MAX_TITLE_CHARS && !already_sourced {
            draft.push(Statement::new(
                props::TITLE,
                Value::monolingual(title.clone(), self.provenance.title_language.clone()),
            ));
        }

        if length <= MAX_LABEL_CHARS && !snapshot.has_label() {
            Some(title)
        } else {
            None
        }
    }

    fn add_authors(
        &self,
        draft: &mut Draft<'_>,
        record: &SourceRecord,
        snapshot: &EntitySnapshot,
        missing: &mut Vec<&'static str>,
    ) {
        if record.authors.is_empty() {
            missing.push("authors");
            return;
        }
        if snapshot.has_property(props::AUTHOR) || snapshot.has_property(props::AUTHOR_NAME_STRING)
        {
            return;
        }
        for (position, author) in record.authors.iter().enumerate() {
            draft.push(
                Statement::new(props::AUTHOR_NAME_STRING, Value::string(author.trim()))
                    .with_qualifier(Snak::new(
                        props::SERIES_ORDINAL,
                        Value::string((position + 1).to_string()),
                    )),
            );
        }
    }

    fn add_volume_issue_pages(
        &self,
        draft: &mut Draft<'_>,
        record: &SourceRecord,
        snapshot: &EntitySnapshot,
    ) {
        let Some(source) = record.citation_source.as_deref() else {
            return;
        };
        let Some(parts) = self.split_citation(source) else {
            return;
        };
        for (value, property) in parts.into_iter().zip([props::VOLUME, props::ISSUE, props::PAGES]) {
            if !snapshot.has_property(property) {
                draft.push(Statement::new(property, Value::string(value)));
            }
        }
    }

    /// Volume, issue and pages from a trailing `volume(issue):pages`.
    fn split_citation<'a>(&self, source: &'a str) -> Option<[&'a str; 3]> {
        let captures = self.volume_issue_pages.captures(source)?;
        Some([1, 2, 3].map(|group| captures.get(group).map_or("", |m| m.as_str())))
    }

    fn add_subjects(
        &self,
        draft: &mut Draft<'_>,
        record: &SourceRecord,
        snapshot: &EntitySnapshot,
        index: &IdentifierIndex,
    ) {
        let mut subjects: BTreeSet<EntityId> = record
            .subject_codes
            .iter()
            .filter_map(|code| Identifier::new(IdentifierKind::Cas, code))
            .filter_map(|cas| index.unique(&cas).cloned())
            .collect();
        subjects.extend(self.vocabulary.map_subjects(&record.priority_areas));

        for subject in subjects {
            if !snapshot.holds_item(props::MAIN_SUBJECT, &subject) {
                draft.push(Statement::new(props::MAIN_SUBJECT, Value::item(&subject)));
            }
        }
    }
}

/// Parse a catalog `YYYYMMDD` date. `00` month or day lowers the precision.
pub fn parse_publication_date(raw: &str) -> Option<TimeValue> {
    let raw = raw.trim();
    if raw.len() != 8 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year: i32 = raw[0..4].parse().ok()?;
    let month: u32 = raw[4..6].parse().ok()?;
    let day: u32 = raw[6..8].parse().ok()?;
    if year == 0 {
        return None;
    }
    let precision = match (month, day) {
        (0, _) => DatePrecision::Year,
        (_, 0) => DatePrecision::Month,
        _ => DatePrecision::Day,
    };
    let date = NaiveDate::from_ymd_opt(year, month.max(1), if month == 0 { 1 } else { day.max(1) })?;
    Some(TimeValue { date, precision })
}

/// Normalize a catalog title: collapse whitespace, drop one trailing period
/// and enclosing square brackets.
pub fn clean_title(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut title = collapsed
        .strip_suffix('.')
        .unwrap_or(collapsed.as_str())
        .trim_end();
    if let Some(inner) = title.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
        title = inner.trim();
    }
    title.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::{Decision, LinkTarget};

    fn builder() -> FieldBuilder {
        FieldBuilder::new(
            Arc::new(Vocabulary::builtin()),
            ProvenanceConfig::default(),
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
        )
        .unwrap()
    }

    fn linked(fresh: Vec<Identifier>) -> ReconciliationResult {
        ReconciliationResult {
            decision: Decision::Link(LinkTarget::Existing(EntityId::from("Q1"))),
            fresh,
            sub_work_class: None,
            container: None,
        }
    }

    fn full_record() -> SourceRecord {
        SourceRecord {
            title: Some("Noise  exposure in\n mining.".to_string()),
            authors: vec!["Smith-J".to_string(), "Doe-JA".to_string()],
            citation_source: Some("J Occup Environ Hyg 2004 May; 1(5):300-309".to_string()),
            publication_date: Some("20040500".to_string()),
            document_types: vec!["Journal Article".to_string()],
            priority_areas: vec!["Mining; mining".to_string()],
            subject_codes: vec!["7440-43-9".to_string()],
            ..SourceRecord::new("20025555")
        }
    }

    fn doi(value: &str) -> Identifier {
        Identifier::new(IdentifierKind::Doi, value).unwrap()
    }

    fn referenced(property: &str, value: Value, components: usize) -> Statement {
        let parts = (0..components)
            .map(|i| Snak::new(props::CATALOG_ID, Value::external_id(i.to_string())))
            .collect();
        Statement::new(property, value).with_provenance(Reference::new(parts))
    }

    fn properties(task: &WriteTask) -> Vec<&str> {
        task.statements.iter().map(|s| s.property.as_str()).collect()
    }

    #[test]
    fn test_publication_date_precision() {
        let day = parse_publication_date("20040517").unwrap();
        assert_eq!(day.precision, DatePrecision::Day);
        let month = parse_publication_date("20040500").unwrap();
        assert_eq!(month.precision, DatePrecision::Month);
        assert_eq!(month.date, NaiveDate::from_ymd_opt(2004, 5, 1).unwrap());
        let year = parse_publication_date("20040000").unwrap();
        assert_eq!(year.precision, DatePrecision::Year);
        assert!(parse_publication_date("2004").is_none());
        assert!(parse_publication_date("20041399").is_none());
    }

    #[test]
    fn test_citation_volume_issue_pages() {
        let builder = builder();
        assert_eq!(
            builder.split_citation("J Occup Med 1998 Mar;40(3):210-5."),
            Some(["40", "3", "210-5"])
        );
        assert_eq!(
            builder.split_citation("J Occup Environ Hyg 2004 May; 1(5):300-309"),
            Some(["1", "5", "300-309"])
        );
        assert_eq!(
            builder.split_citation("Am Ind Hyg Assoc J 1985 Jan;46(1 Suppl):S1-S12"),
            None
        );
        assert_eq!(builder.split_citation("Proceedings, 1992"), None);
    }

    #[test]
    fn test_clean_title() {
        assert_eq!(clean_title("  A   study\tof noise. "), "A study of noise");
        assert_eq!(clean_title("[Translated title]."), "Translated title");
        assert_eq!(clean_title("Ends with ellipsis..."), "Ends with ellipsis..");
    }

    #[test]
    fn test_new_entity_gets_every_field_with_provenance() {
        let mut index = IdentifierIndex::new();
        index.insert(
            &Identifier::new(IdentifierKind::Cas, "7440-43-9").unwrap(),
            EntityId::from("Q1091"),
        );
        let built = builder().build(
            None,
            &full_record(),
            &linked(vec![doi("10.1/xyz")]),
            &EntitySnapshot::empty(),
            &index,
            &StatementLedger::new(),
        );
        let task = &built.task;
        assert!(task.target.is_none());
        assert_eq!(task.label.as_deref(), Some("Noise exposure in mining"));
        assert_eq!(
            task.description.as_deref(),
            Some("scientific article published in 2004")
        );
        assert_eq!(
            properties(task),
            vec![
                props::DOI,
                props::CATALOG_ID,
                props::INSTANCE_OF,
                props::PUBLICATION_DATE,
                props::TITLE,
                props::AUTHOR_NAME_STRING,
                props::AUTHOR_NAME_STRING,
                props::VOLUME,
                props::ISSUE,
                props::PAGES,
                props::MAIN_SUBJECT,
                props::MAIN_SUBJECT,
                props::SPONSOR,
            ]
        );
        assert!(task
            .statements
            .iter()
            .all(|statement| statement.reference_components() == 3));

        let second_author = &task.statements[6];
        assert_eq!(second_author.value, Value::string("Doe-JA"));
        assert_eq!(
            second_author.qualifiers,
            vec![Snak::new(props::SERIES_ORDINAL, Value::string("2"))]
        );
        assert_eq!(task.statements[9].value, Value::string("300-309"));
        assert!(built.missing.is_empty());
    }

    #[test]
    fn test_existing_fields_are_not_repeated() {
        let target = EntityId::from("Q1");
        let snapshot = EntitySnapshot::empty()
            .with_label("Existing")
            .with_statement(referenced(props::DOI, Value::external_id("10.1/OTHER"), 1))
            .with_statement(referenced(props::CATALOG_ID, Value::external_id("20025555"), 3))
            .with_statement(referenced(
                props::INSTANCE_OF,
                Value::item(&EntityId::from(SCHOLARLY_ARTICLE)),
                1,
            ))
            .with_statement(Statement::new(
                props::PUBLICATION_DATE,
                Value::Time(TimeValue::day(NaiveDate::from_ymd_opt(2004, 5, 2).unwrap())),
            ))
            .with_statement(referenced(props::TITLE, Value::monolingual("x", "en"), 3))
            .with_statement(Statement::new(props::AUTHOR, Value::item(&EntityId::from("Q9"))))
            .with_statement(Statement::new(props::VOLUME, Value::string("1")))
            .with_statement(Statement::new(props::ISSUE, Value::string("5")))
            .with_statement(Statement::new(props::PAGES, Value::string("300-309")))
            .with_statement(referenced(
                props::MAIN_SUBJECT,
                Value::item(&EntityId::from("Q44497")),
                3,
            ));
        let built = builder().build(
            Some(&target),
            &full_record(),
            &linked(vec![doi("10.1/xyz")]),
            &snapshot,
            &IdentifierIndex::new(),
            &StatementLedger::new(),
        );
        assert!(built.task.is_empty(), "unexpected {:?}", built.task);
    }

    #[test]
    fn test_ledger_blocks_repeats_within_run() {
        let target = EntityId::from("Q1");
        let ledger = StatementLedger::new();
        let builder = builder();
        let record = full_record();
        let first = builder.build(
            Some(&target),
            &record,
            &linked(vec![doi("10.1/xyz")]),
            &EntitySnapshot::empty(),
            &IdentifierIndex::new(),
            &ledger,
        );
        assert!(!first.task.is_empty());
        assert!(first.task.description.is_none());
        assert!(!properties(&first.task).contains(&props::SPONSOR));

        let second = builder.build(
            Some(&target),
            &record,
            &linked(vec![doi("10.1/xyz")]),
            &EntitySnapshot::empty(),
            &IdentifierIndex::new(),
            &ledger,
        );
        assert!(second.task.statements.is_empty());

        ledger.release(&target, &first.task.statements);
        let third = builder.build(
            Some(&target),
            &record,
            &linked(vec![doi("10.1/xyz")]),
            &EntitySnapshot::empty(),
            &IdentifierIndex::new(),
            &ledger,
        );
        assert_eq!(third.task.statements.len(), first.task.statements.len());
    }

    #[test]
    fn test_second_catalog_id_is_added() {
        let target = EntityId::from("Q1");
        let snapshot = EntitySnapshot::empty()
            .with_label("Existing")
            .with_statement(referenced(props::CATALOG_ID, Value::external_id("19990001"), 3))
            .with_statement(Statement::new(
                props::INSTANCE_OF,
                Value::item(&EntityId::from(SCHOLARLY_ARTICLE)),
            ));
        let built = builder().build(
            Some(&target),
            &SourceRecord::new("20025555"),
            &linked(Vec::new()),
            &snapshot,
            &IdentifierIndex::new(),
            &StatementLedger::new(),
        );
        assert_eq!(properties(&built.task), vec![props::CATALOG_ID]);
        assert_eq!(
            built.task.statements[0].value,
            Value::external_id("20025555")
        );
    }

    #[test]
    fn test_sub_work_adds_qualified_catalog_id_only() {
        let container = EntityId::from("Q50");
        let result = ReconciliationResult {
            decision: Decision::Link(LinkTarget::Existing(container.clone())),
            fresh: vec![doi("10.5/book")],
            sub_work_class: Some(EntityId::from("Q1980247")),
            container: None,
        };
        let built = builder().build(
            Some(&container),
            &full_record(),
            &result,
            &EntitySnapshot::empty(),
            &IdentifierIndex::new(),
            &StatementLedger::new(),
        );
        assert_eq!(built.task.statements.len(), 1);
        let statement = &built.task.statements[0];
        assert_eq!(statement.property, props::CATALOG_ID);
        assert_eq!(
            statement.qualifiers,
            vec![Snak::new(
                props::APPLIES_TO_PART,
                Value::item(&EntityId::from("Q1980247"))
            )]
        );
        assert!(built.task.label.is_none());
    }

    #[test]
    fn test_container_reverse_link() {
        let target = EntityId::from("Q51");
        let result = ReconciliationResult {
            container: Some(EntityId::from("Q50")),
            ..linked(Vec::new())
        };
        let built = builder().build(
            Some(&target),
            &SourceRecord::new("7"),
            &result,
            &EntitySnapshot::empty().with_label("Chapter"),
            &IdentifierIndex::new(),
            &StatementLedger::new(),
        );
        assert!(properties(&built.task).contains(&props::PART_OF));
        assert_eq!(
            built.missing,
            vec!["document type", "publication date", "title", "authors"]
        );
    }

    #[test]
    fn test_long_titles() {
        let long = "x".repeat(300);
        let record = SourceRecord {
            title: Some(long.clone()),
            ..SourceRecord::new("1")
        };
        let built = builder().build(
            None,
            &record,
            &linked(Vec::new()),
            &EntitySnapshot::empty(),
            &IdentifierIndex::new(),
            &StatementLedger::new(),
        );
        assert!(built.task.label.is_none());
        assert!(properties(&built.task).contains(&props::TITLE));

        let too_long = SourceRecord {
            title: Some("y".repeat(401)),
            ..SourceRecord::new("1")
        };
        let built = builder().build(
            None,
            &too_long,
            &linked(Vec::new()),
            &EntitySnapshot::empty(),
            &IdentifierIndex::new(),
            &StatementLedger::new(),
        );
        assert!(!properties(&built.task).contains(&props::TITLE));
    }
}
