//! Benchmarks for the per-record hot paths: link matching, document-type
//! classification, index lookups and statement building.

use biblink::extract::match_fast;
use biblink::fields::{EntitySnapshot, FieldBuilder, StatementLedger};
use biblink::model::{Identifier, IdentifierKind};
use biblink::reconcile::{Decision, LinkTarget, ReconciliationResult};
use biblink::{EntityId, IdentifierIndex, SourceRecord, Vocabulary};
use chrono::NaiveDate;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;

const LINKS: &[&str] = &[
    "http://dx.doi.org/10.1016/j.jsr.2004.03.002",
    "https://www.ncbi.nlm.nih.gov/pubmed/15507312/",
    "https://www.ncbi.nlm.nih.gov/pmc/articles/PMC1740721/",
    "https://www.cdc.gov/niosh/docs/2004-101/pdfs/2004-101.pdf",
    "https://publisher.example/article/42",
];

fn bench_match_fast(c: &mut Criterion) {
    let mut group = c.benchmark_group("match_fast");
    group.throughput(Throughput::Elements(LINKS.len() as u64));
    group.bench_function("mixed_links", |b| {
        b.iter(|| {
            for link in LINKS {
                black_box(match_fast(black_box(link)));
            }
        })
    });
    group.finish();
}

fn bench_classify(c: &mut Criterion) {
    let vocabulary = Vocabulary::builtin();
    let inputs = [
        vec!["Journal Article".to_string()],
        vec!["Book or book chapter; Abstract".to_string()],
        vec!["Conference\u{a0}Paper".to_string(), "Report".to_string()],
        vec!["Unheard of".to_string()],
    ];

    c.bench_function("classify_document_types", |b| {
        b.iter(|| {
            for types in &inputs {
                black_box(vocabulary.classify(black_box(types), false));
            }
        })
    });
}

fn populated_index(size: usize) -> IdentifierIndex {
    let mut index = IdentifierIndex::new();
    for i in 0..size {
        let doi = Identifier::new(IdentifierKind::Doi, &format!("10.1000/{}", i))
            .expect("valid doi");
        index.insert(&doi, EntityId::new(format!("Q{}", i + 1)));
    }
    index
}

fn bench_index_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_candidates");
    for &size in &[1_000usize, 100_000] {
        let index = populated_index(size);
        let keys: Vec<Identifier> = (0..1_000)
            .map(|i| Identifier::new(IdentifierKind::Doi, &format!("10.1000/{}", i * 7)))
            .collect::<Option<_>>()
            .expect("valid dois");
        group.throughput(Throughput::Elements(keys.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &keys, |b, keys| {
            b.iter(|| {
                for key in keys {
                    black_box(index.candidates(key));
                }
            })
        });
    }
    group.finish();
}

fn bench_build_fields(c: &mut Criterion) {
    let vocabulary = Arc::new(Vocabulary::builtin());
    let builder = FieldBuilder::new(
        vocabulary,
        Default::default(),
        NaiveDate::from_ymd_opt(2017, 3, 9).expect("valid date"),
    )
    .expect("builder");
    let index = IdentifierIndex::new();
    let snapshot = EntitySnapshot::empty();

    let mut record = SourceRecord::new("20040123");
    record.title = Some("Noise exposure in underground coal mining.".to_string());
    record.authors = vec!["Smith-J".to_string(), "Doe-JA".to_string()];
    record.citation_source = Some("J Occup Environ Hyg 2004 May; 1(5):300-309".to_string());
    record.publication_date = Some("20040500".to_string());
    record.document_types = vec!["Journal Article".to_string()];
    record.priority_areas = vec!["Mining".to_string()];

    let target = EntityId::new("Q1");
    c.bench_function("build_existing_entity", |b| {
        b.iter(|| {
            let result = ReconciliationResult {
                decision: Decision::Link(LinkTarget::Existing(target.clone())),
                fresh: Vec::new(),
                sub_work_class: None,
                container: None,
            };
            let ledger = StatementLedger::new();
            black_box(builder.build(Some(&target), &record, &result, &snapshot, &index, &ledger))
        })
    });
}

criterion_group!(extract_benches, bench_match_fast, bench_index_lookup);
criterion_group!(classify_benches, bench_classify, bench_build_fields);
criterion_main!(extract_benches, classify_benches);
