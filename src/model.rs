//! # Data Model
//!
//! Core data structures for catalog reconciliation: source records, normalized
//! identifiers, knowledge-base statements with provenance, and write tasks.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Knowledge-base property ids used by the pipeline.
pub mod props {
    pub const INSTANCE_OF: &str = "P31";
    pub const AUTHOR: &str = "P50";
    pub const AUTHOR_NAME_STRING: &str = "P2093";
    pub const SERIES_ORDINAL: &str = "P1545";
    pub const TITLE: &str = "P1476";
    pub const PUBLICATION_DATE: &str = "P577";
    pub const VOLUME: &str = "P478";
    pub const ISSUE: &str = "P433";
    pub const PAGES: &str = "P304";
    pub const MAIN_SUBJECT: &str = "P921";
    pub const SPONSOR: &str = "P859";
    pub const PART_OF: &str = "P361";
    pub const APPLIES_TO_PART: &str = "P518";
    pub const STATED_IN: &str = "P248";
    pub const RETRIEVED: &str = "P813";
    pub const DOI: &str = "P356";
    pub const PMID: &str = "P698";
    pub const PMCID: &str = "P932";
    pub const ISBN_10: &str = "P957";
    pub const ISBN_13: &str = "P212";
    pub const CAS: &str = "P231";
    pub const CATALOG_ID: &str = "P2880";
}

/// Knowledge-base entity id (e.g. `Q42`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Kinds of external identifier the pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
    Doi,
    Pmid,
    Pmcid,
    Isbn10,
    Isbn13,
    Cas,
    CatalogId,
}

impl IdentifierKind {
    /// Every kind, in reservation priority order.
    pub const ALL: [IdentifierKind; 7] = [
        IdentifierKind::Doi,
        IdentifierKind::Pmid,
        IdentifierKind::Pmcid,
        IdentifierKind::Isbn13,
        IdentifierKind::Isbn10,
        IdentifierKind::Cas,
        IdentifierKind::CatalogId,
    ];

    /// Kinds that identify the work itself and can justify creating an entity.
    pub const WORK: [IdentifierKind; 5] = [
        IdentifierKind::Doi,
        IdentifierKind::Pmid,
        IdentifierKind::Pmcid,
        IdentifierKind::Isbn13,
        IdentifierKind::Isbn10,
    ];

    /// The knowledge-base property carrying this identifier.
    pub fn property(self) -> &'static str {
        match self {
            IdentifierKind::Doi => props::DOI,
            IdentifierKind::Pmid => props::PMID,
            IdentifierKind::Pmcid => props::PMCID,
            IdentifierKind::Isbn10 => props::ISBN_10,
            IdentifierKind::Isbn13 => props::ISBN_13,
            IdentifierKind::Cas => props::CAS,
            IdentifierKind::CatalogId => props::CATALOG_ID,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            IdentifierKind::Doi => "DOI",
            IdentifierKind::Pmid => "PMID",
            IdentifierKind::Pmcid => "PMCID",
            IdentifierKind::Isbn10 => "ISBN-10",
            IdentifierKind::Isbn13 => "ISBN-13",
            IdentifierKind::Cas => "CAS",
            IdentifierKind::CatalogId => "catalog id",
        }
    }

    /// Normalize a raw value for this kind. Returns `None` when nothing usable remains.
    pub fn normalize(self, raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        let normalized = match self {
            IdentifierKind::Doi => trimmed.to_uppercase(),
            IdentifierKind::Pmcid => {
                let upper = trimmed.to_uppercase();
                upper.strip_prefix("PMC").unwrap_or(&upper).to_string()
            }
            IdentifierKind::Isbn10 | IdentifierKind::Isbn13 => trimmed
                .chars()
                .filter(|c| *c != '-' && !c.is_whitespace())
                .collect::<String>()
                .to_uppercase(),
            IdentifierKind::Pmid | IdentifierKind::Cas | IdentifierKind::CatalogId => {
                trimmed.to_string()
            }
        };
        if normalized.is_empty() {
            None
        } else {
            Some(normalized)
        }
    }
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A normalized external identifier.
///
/// The only constructor normalizes, so two `Identifier`s compare equal exactly
/// when they name the same external id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Identifier {
    kind: IdentifierKind,
    value: String,
}

impl Identifier {
    /// Create a normalized identifier, or `None` if the raw value is blank.
    pub fn new(kind: IdentifierKind, raw: &str) -> Option<Self> {
        kind.normalize(raw).map(|value| Self { kind, value })
    }

    /// Classify an ISBN by its digit count after stripping separators.
    pub fn isbn(raw: &str) -> Option<Self> {
        let stripped = IdentifierKind::Isbn13.normalize(raw)?;
        match stripped.len() {
            10 => Self::new(IdentifierKind::Isbn10, &stripped),
            13 => Self::new(IdentifierKind::Isbn13, &stripped),
            _ => None,
        }
    }

    pub fn kind(&self) -> IdentifierKind {
        self.kind
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Key used by the in-flight reservation set.
    pub fn key(&self) -> String {
        format!("{}:{}", self.kind.property(), self.value)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.value)
    }
}

/// Precision of a time value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatePrecision {
    Year,
    Month,
    Day,
}

/// A calendar date with precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeValue {
    pub date: NaiveDate,
    pub precision: DatePrecision,
}

impl TimeValue {
    pub fn day(date: NaiveDate) -> Self {
        Self {
            date,
            precision: DatePrecision::Day,
        }
    }
}

/// Statement datatype, derived from the value variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Datatype {
    String,
    ExternalId,
    WikibaseItem,
    Time,
    MonolingualText,
}

/// The value of a statement, qualifier, or reference component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Value {
    String { value: String },
    ExternalId { value: String },
    Item { id: EntityId },
    Time(TimeValue),
    Monolingual { text: String, language: String },
}

impl Value {
    pub fn string(value: impl Into<String>) -> Self {
        Value::String {
            value: value.into(),
        }
    }

    pub fn external_id(value: impl Into<String>) -> Self {
        Value::ExternalId {
            value: value.into(),
        }
    }

    pub fn item(id: &EntityId) -> Self {
        Value::Item { id: id.clone() }
    }

    pub fn monolingual(text: impl Into<String>, language: impl Into<String>) -> Self {
        Value::Monolingual {
            text: text.into(),
            language: language.into(),
        }
    }

    pub fn datatype(&self) -> Datatype {
        match self {
            Value::String { .. } => Datatype::String,
            Value::ExternalId { .. } => Datatype::ExternalId,
            Value::Item { .. } => Datatype::WikibaseItem,
            Value::Time(_) => Datatype::Time,
            Value::Monolingual { .. } => Datatype::MonolingualText,
        }
    }

    /// Canonical text used for `(entity, property, value)` comparisons.
    ///
    /// String-like values compare without regard to the string/external-id
    /// distinction, and external identifiers compare case-insensitively.
    pub fn match_key(&self) -> String {
        match self {
            Value::String { value } | Value::ExternalId { value } => value.to_uppercase(),
            Value::Item { id } => id.0.clone(),
            Value::Time(time) => time.date.format("%Y-%m-%d").to_string(),
            Value::Monolingual { text, .. } => text.clone(),
        }
    }

    pub fn as_item(&self) -> Option<&EntityId> {
        match self {
            Value::Item { id } => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String { value } | Value::ExternalId { value } => f.write_str(value),
            Value::Item { id } => write!(f, "{}", id),
            Value::Time(time) => write!(f, "{}", time.date),
            Value::Monolingual { text, language } => write!(f, "{}@{}", text, language),
        }
    }
}

/// A property/value pair, used for qualifiers and reference components.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Snak {
    pub property: String,
    pub value: Value,
}

impl Snak {
    pub fn new(property: impl Into<String>, value: Value) -> Self {
        Self {
            property: property.into(),
            value,
        }
    }
}

/// Provenance attached to a statement: an ordered list of reference components.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Reference {
    pub parts: Vec<Snak>,
}

impl Reference {
    pub fn new(parts: Vec<Snak>) -> Self {
        Self { parts }
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

/// A single knowledge-base claim. Built once, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Statement {
    pub property: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Reference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub qualifiers: Vec<Snak>,
}

impl Statement {
    pub fn new(property: impl Into<String>, value: Value) -> Self {
        Self {
            property: property.into(),
            value,
            provenance: None,
            qualifiers: Vec::new(),
        }
    }

    pub fn with_provenance(mut self, reference: Reference) -> Self {
        self.provenance = Some(reference);
        self
    }

    pub fn with_qualifier(mut self, qualifier: Snak) -> Self {
        self.qualifiers.push(qualifier);
        self
    }

    pub fn datatype(&self) -> Datatype {
        self.value.datatype()
    }

    /// Whether the statement carries any provenance.
    pub fn is_referenced(&self) -> bool {
        self.provenance.as_ref().is_some_and(|r| !r.is_empty())
    }

    /// Number of components in the statement's provenance.
    pub fn reference_components(&self) -> usize {
        self.provenance.as_ref().map_or(0, Reference::len)
    }
}

/// The unit of work submitted to the write queue.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WriteTask {
    /// `None` creates a new entity.
    pub target: Option<EntityId>,
    pub statements: Vec<Statement>,
    pub label: Option<String>,
    pub description: Option<String>,
}

impl WriteTask {
    pub fn new(target: Option<EntityId>) -> Self {
        Self {
            target,
            ..Self::default()
        }
    }

    /// True when the task would not change anything.
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty() && self.label.is_none() && self.description.is_none()
    }
}

/// One catalog entry. Immutable once read from the feed.
///
/// Field names accept both the snake_case names and the catalog's two-letter
/// tags, so associator output can be fed in directly.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceRecord {
    #[serde(alias = "NN")]
    pub catalog_id: String,
    #[serde(alias = "TI")]
    pub title: Option<String>,
    #[serde(alias = "AU", deserialize_with = "delimited")]
    pub authors: Vec<String>,
    #[serde(alias = "SO")]
    pub citation_source: Option<String>,
    #[serde(alias = "KW", deserialize_with = "delimited")]
    pub keywords: Vec<String>,
    #[serde(alias = "CN", deserialize_with = "delimited")]
    pub subject_codes: Vec<String>,
    #[serde(alias = "DP")]
    pub publication_date: Option<String>,
    #[serde(alias = "DT", deserialize_with = "delimited")]
    pub document_types: Vec<String>,
    #[serde(alias = "PA", deserialize_with = "delimited")]
    pub priority_areas: Vec<String>,
    #[serde(alias = "IB")]
    pub isbn: Option<String>,
    #[serde(alias = "LT")]
    pub link: Option<String>,
    #[serde(alias = "Wikidata")]
    pub target_entity: Option<EntityId>,
    #[serde(alias = "DOI")]
    pub known_doi: Option<String>,
    #[serde(alias = "PubMed ID")]
    pub known_pmid: Option<String>,
    #[serde(alias = "PMCID")]
    pub known_pmcid: Option<String>,
    #[serde(alias = "ISBN-10")]
    pub known_isbn10: Option<String>,
    #[serde(alias = "ISBN-13")]
    pub known_isbn13: Option<String>,
}

impl SourceRecord {
    pub fn new(catalog_id: impl Into<String>) -> Self {
        Self {
            catalog_id: catalog_id.into(),
            ..Self::default()
        }
    }

    /// Identifiers already attached to the record's target entity.
    pub fn known_identifiers(&self) -> Vec<Identifier> {
        [
            (IdentifierKind::Doi, &self.known_doi),
            (IdentifierKind::Pmid, &self.known_pmid),
            (IdentifierKind::Pmcid, &self.known_pmcid),
            (IdentifierKind::Isbn10, &self.known_isbn10),
            (IdentifierKind::Isbn13, &self.known_isbn13),
        ]
        .into_iter()
        .filter_map(|(kind, raw)| raw.as_deref().and_then(|raw| Identifier::new(kind, raw)))
        .collect()
    }

    pub fn catalog_identifier(&self) -> Option<Identifier> {
        Identifier::new(IdentifierKind::CatalogId, &self.catalog_id)
    }

    /// The record's own ISBN, if it parses as ISBN-10 or ISBN-13.
    pub fn isbn_identifier(&self) -> Option<Identifier> {
        self.isbn.as_deref().and_then(Identifier::isbn)
    }
}

/// Accepts either a `;`-delimited string or a list of strings.
fn delimited<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
        Missing(()),
    }

    let values = match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(raw) => split_delimited(&raw),
        OneOrMany::Many(items) => items.iter().flat_map(|item| split_delimited(item)).collect(),
        OneOrMany::Missing(()) => Vec::new(),
    };
    Ok(values)
}

/// Split a catalog field on `;`, trimming and dropping blanks.
pub fn split_delimited(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_normalization() {
        let doi = Identifier::new(IdentifierKind::Doi, " 10.1/xyz ").unwrap();
        assert_eq!(doi.value(), "10.1/XYZ");

        let pmcid = Identifier::new(IdentifierKind::Pmcid, "pmc12345").unwrap();
        assert_eq!(pmcid.value(), "12345");

        let isbn = Identifier::isbn("978-0-12-345678-9").unwrap();
        assert_eq!(isbn.kind(), IdentifierKind::Isbn13);
        assert_eq!(isbn.value(), "9780123456789");

        let isbn10 = Identifier::isbn("0-12-345678-x").unwrap();
        assert_eq!(isbn10.kind(), IdentifierKind::Isbn10);
        assert_eq!(isbn10.value(), "012345678X");

        assert!(Identifier::new(IdentifierKind::Pmid, "   ").is_none());
        assert!(Identifier::isbn("12-34").is_none());
    }

    #[test]
    fn test_identifier_equality_after_normalization() {
        let a = Identifier::new(IdentifierKind::Doi, "10.1/abc").unwrap();
        let b = Identifier::new(IdentifierKind::Doi, "10.1/ABC").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.key(), "P356:10.1/ABC");
    }

    #[test]
    fn test_record_from_catalog_tags() {
        let raw = r#"{
            "NN": "20012345",
            "TI": "Noise exposure in mining.",
            "AU": "Smith-J; Doe-JA",
            "DT": "Journal Article; Abstract",
            "PA": ["Mining", "Hearing Loss"],
            "Wikidata": "Q100",
            "DOI": "10.1/abc"
        }"#;
        let record: SourceRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.catalog_id, "20012345");
        assert_eq!(record.authors, vec!["Smith-J", "Doe-JA"]);
        assert_eq!(record.document_types, vec!["Journal Article", "Abstract"]);
        assert_eq!(record.priority_areas.len(), 2);
        assert_eq!(record.target_entity, Some(EntityId::new("Q100")));
        assert_eq!(
            record.known_identifiers(),
            vec![Identifier::new(IdentifierKind::Doi, "10.1/ABC").unwrap()]
        );
    }

    #[test]
    fn test_statement_provenance_helpers() {
        let statement = Statement::new(props::DOI, Value::external_id("10.1/X"));
        assert!(!statement.is_referenced());
        assert_eq!(statement.datatype(), Datatype::ExternalId);

        let referenced = statement.with_provenance(Reference::new(vec![
            Snak::new(props::STATED_IN, Value::item(&EntityId::new("Q1"))),
            Snak::new(props::CATALOG_ID, Value::external_id("1")),
        ]));
        assert!(referenced.is_referenced());
        assert_eq!(referenced.reference_components(), 2);
    }

    #[test]
    fn test_empty_write_task() {
        let task = WriteTask::new(Some(EntityId::new("Q1")));
        assert!(task.is_empty());
    }
}
