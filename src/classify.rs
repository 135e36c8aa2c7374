//! # Classification Mapping
//!
//! Maps the catalog's controlled vocabulary onto knowledge-base ids: document
//! types to classes ("instance of") and priority areas to subjects. Tables are
//! built in, optionally overlaid from a JSON file once at startup, and then
//! shared read-only.

use crate::model::{split_delimited, EntityId};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

pub const SCHOLARLY_ARTICLE: &str = "Q13442814";
pub const BOOK: &str = "Q571";
pub const CHAPTER: &str = "Q1980247";
pub const ABSTRACT: &str = "Q333291";
pub const PUBLICATION: &str = "Q732577";

/// Document type → classes.
const CLASS_TABLE: &[(&str, &[&str])] = &[
    ("journal article", &[SCHOLARLY_ARTICLE]),
    ("book", &[BOOK]),
    ("chapter", &[CHAPTER]),
    ("book chapter", &[CHAPTER]),
    ("book or book chapter", &[BOOK, CHAPTER]),
    ("abstract", &[ABSTRACT]),
    ("report", &["Q10870555"]),
    ("technical report", &["Q10870555"]),
    ("thesis", &["Q1266946"]),
    ("dissertation", &["Q1266946"]),
    ("conference/symposia", &["Q23927052"]),
    ("conference paper", &["Q23927052"]),
    ("conference proceedings", &["Q1143604"]),
    ("patent", &["Q253623"]),
    ("newsletter", &["Q1002697"]),
    ("review", &["Q7318358"]),
    ("letter", &["Q133492"]),
    ("editorial", &["Q871232"]),
];

/// Priority area → subject.
const SUBJECT_TABLE: &[(&str, &str)] = &[
    ("agriculture", "Q11451"),
    ("forestry", "Q38112"),
    ("fishing", "Q14373"),
    ("construction", "Q385378"),
    ("manufacturing", "Q187939"),
    ("mining", "Q44497"),
    ("healthcare and social assistance", "Q31207"),
    ("health care", "Q31207"),
    ("transportation", "Q7590"),
    ("transportation, warehousing and utilities", "Q7590"),
    ("retail trade", "Q126793"),
];

/// Classes that mark a record as part of a larger work.
const SUB_WORK_CLASSES: &[&str] = &[CHAPTER, ABSTRACT];

/// Case- and encoding-normalize a vocabulary term.
pub fn normalize_term(raw: &str) -> String {
    raw.chars()
        .filter(|c| *c != '\u{feff}')
        .map(|c| match c {
            '\u{a0}' | '\u{2007}' | '\u{202f}' => ' ',
            '\u{2018}' | '\u{2019}' => '\'',
            '\u{201c}' | '\u{201d}' => '"',
            '\u{2013}' | '\u{2014}' => '-',
            other => other,
        })
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Overlay file layout. Every section is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VocabularyOverlay {
    classes: HashMap<String, Vec<String>>,
    subjects: HashMap<String, String>,
    sub_work_classes: Option<Vec<String>>,
    fallback: Option<String>,
}

/// Immutable lookup tables for classes and subjects.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    classes: HashMap<String, Vec<EntityId>>,
    subjects: HashMap<String, EntityId>,
    sub_work_classes: BTreeSet<EntityId>,
    fallback: EntityId,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Vocabulary {
    pub fn builtin() -> Self {
        let classes = CLASS_TABLE
            .iter()
            .map(|(term, ids)| {
                (
                    normalize_term(term),
                    ids.iter().map(|id| EntityId::from(*id)).collect(),
                )
            })
            .collect();
        let subjects = SUBJECT_TABLE
            .iter()
            .map(|(term, id)| (normalize_term(term), EntityId::from(*id)))
            .collect();
        Self {
            classes,
            subjects,
            sub_work_classes: SUB_WORK_CLASSES.iter().map(|id| EntityId::from(*id)).collect(),
            fallback: EntityId::from(PUBLICATION),
        }
    }

    /// Built-in tables overlaid with the entries of a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading vocabulary {}", path.display()))?;
        Self::from_json_str(&raw).with_context(|| format!("parsing vocabulary {}", path.display()))
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let overlay: VocabularyOverlay = serde_json::from_str(raw)?;
        let mut vocabulary = Self::builtin();
        for (term, ids) in overlay.classes {
            vocabulary.classes.insert(
                normalize_term(&term),
                ids.into_iter().map(EntityId::new).collect(),
            );
        }
        for (term, id) in overlay.subjects {
            vocabulary.subjects.insert(normalize_term(&term), EntityId::new(id));
        }
        if let Some(classes) = overlay.sub_work_classes {
            vocabulary.sub_work_classes = classes.into_iter().map(EntityId::new).collect();
        }
        if let Some(fallback) = overlay.fallback {
            vocabulary.fallback = EntityId::new(fallback);
        }
        Ok(vocabulary)
    }

    /// Map raw document types to classes.
    ///
    /// Each raw value may hold several `;`-separated types. Unmapped types are
    /// dropped; when nothing maps and the entity has no classification yet,
    /// the generic publication class is returned.
    pub fn classify(&self, raw_types: &[String], has_existing: bool) -> BTreeSet<EntityId> {
        let mut classes: BTreeSet<EntityId> = raw_types
            .iter()
            .flat_map(|raw| split_delimited(raw))
            .filter_map(|term| self.classes.get(&normalize_term(&term)))
            .flatten()
            .cloned()
            .collect();
        if classes.is_empty() && !has_existing {
            classes.insert(self.fallback.clone());
        }
        classes
    }

    /// Map one subject string, if the table knows it.
    pub fn subject(&self, raw: &str) -> Option<&EntityId> {
        self.subjects.get(&normalize_term(raw))
    }

    /// Map every subject string, dropping unknown ones and duplicates.
    pub fn map_subjects(&self, raw: &[String]) -> BTreeSet<EntityId> {
        raw.iter()
            .flat_map(|value| split_delimited(value))
            .filter_map(|term| self.subject(&term).cloned())
            .collect()
    }

    pub fn fallback(&self) -> &EntityId {
        &self.fallback
    }

    /// The sub-work class among `classes`, if any.
    pub fn sub_work_class<'a>(&self, classes: &'a BTreeSet<EntityId>) -> Option<&'a EntityId> {
        classes.iter().find(|class| self.sub_work_classes.contains(*class))
    }

    /// A record is a sub-work when one of its classes marks it as such and it
    /// is not also classed as a standalone book.
    pub fn is_sub_work(&self, classes: &BTreeSet<EntityId>) -> bool {
        self.sub_work_class(classes).is_some() && !classes.contains(&EntityId::from(BOOK))
    }

    /// Whether raw document types describe a sub-work.
    pub fn describes_sub_work(&self, raw_types: &[String]) -> bool {
        self.is_sub_work(&self.classify(raw_types, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_every_table_entry_maps_to_its_ids() {
        let vocabulary = Vocabulary::builtin();
        for (term, ids) in CLASS_TABLE {
            let expected: BTreeSet<EntityId> = ids.iter().map(|id| EntityId::from(*id)).collect();
            assert_eq!(
                vocabulary.classify(&types(&[*term]), false),
                expected,
                "term {:?}",
                term
            );
        }
    }

    #[test]
    fn test_normalization_before_lookup() {
        let vocabulary = Vocabulary::builtin();
        let classes = vocabulary.classify(&types(&["  JOURNAL\u{a0}  Article "]), false);
        assert_eq!(classes, BTreeSet::from([EntityId::from(SCHOLARLY_ARTICLE)]));
    }

    #[test]
    fn test_delimited_types_and_double_mapping() {
        let vocabulary = Vocabulary::builtin();
        let classes = vocabulary.classify(&types(&["Book or Book Chapter; Unknown thing"]), false);
        assert_eq!(
            classes,
            BTreeSet::from([EntityId::from(BOOK), EntityId::from(CHAPTER)])
        );
        assert!(!vocabulary.is_sub_work(&classes));
        assert!(!vocabulary.describes_sub_work(&types(&["Book or Book Chapter"])));
    }

    #[test]
    fn test_fallback_only_without_existing_classification() {
        let vocabulary = Vocabulary::builtin();
        assert_eq!(
            vocabulary.classify(&types(&["Pamphlet"]), false),
            BTreeSet::from([EntityId::from(PUBLICATION)])
        );
        assert!(vocabulary.classify(&types(&["Pamphlet"]), true).is_empty());
        assert_eq!(
            vocabulary.classify(&[], false),
            BTreeSet::from([EntityId::from(PUBLICATION)])
        );
    }

    #[test]
    fn test_sub_work_detection() {
        let vocabulary = Vocabulary::builtin();
        let classes = vocabulary.classify(&types(&["Abstract"]), false);
        assert!(vocabulary.is_sub_work(&classes));
        assert_eq!(
            vocabulary.sub_work_class(&classes),
            Some(&EntityId::from(ABSTRACT))
        );
        assert!(vocabulary.describes_sub_work(&types(&["Journal Article; Chapter"])));
    }

    #[test]
    fn test_subjects_map_and_dedupe() {
        let vocabulary = Vocabulary::builtin();
        let subjects = vocabulary.map_subjects(&types(&[
            "Mining; Construction",
            "mining",
            "Hearing loss",
        ]));
        assert_eq!(
            subjects,
            BTreeSet::from([EntityId::from("Q44497"), EntityId::from("Q385378")])
        );
    }

    #[test]
    fn test_overlay_extends_builtin_tables() {
        let vocabulary = Vocabulary::from_json_str(
            r#"{
                "classes": {"Fact Sheet": ["Q1000"]},
                "subjects": {"Noise": "Q2000"},
                "fallback": "Q3000"
            }"#,
        )
        .unwrap();
        assert_eq!(
            vocabulary.classify(&types(&["fact sheet"]), false),
            BTreeSet::from([EntityId::from("Q1000")])
        );
        assert_eq!(vocabulary.subject("NOISE"), Some(&EntityId::from("Q2000")));
        assert_eq!(vocabulary.fallback(), &EntityId::from("Q3000"));
        // Built-in entries survive the overlay.
        assert!(vocabulary.subject("mining").is_some());
    }

    #[test]
    fn test_overlay_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocabulary.json");
        std::fs::write(&path, r#"{"subjects": {"Hearing Loss": "Q1"}}"#).unwrap();
        let vocabulary = Vocabulary::from_json_file(&path).unwrap();
        assert_eq!(vocabulary.subject("hearing loss"), Some(&EntityId::from("Q1")));
        assert!(Vocabulary::from_json_file(dir.path().join("missing.json")).is_err());
    }
}
