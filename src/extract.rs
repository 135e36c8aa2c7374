//! # Identifier Extraction
//!
//! Derives DOI/PMID/PMCID from a record's citation link. Resolver URLs are
//! recognized by prefix; anything else falls back to the citation lookup
//! service, behind the extraction cache and a rate limiter.

use crate::cache::{CachedLookup, ExtractionCache};
use crate::config::LookupConfig;
use crate::error::ReconcileError;
use crate::lookup::{CitationLookup, CitationMetadata};
use crate::model::{Identifier, IdentifierKind};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore, SemaphorePermit};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Suffixes of raw document files that never resolve to a citation.
const NON_CITABLE_SUFFIXES: [&str; 8] = [
    ".pdf", ".doc", ".docx", ".ppt", ".pptx", ".xls", ".xlsx", ".zip",
];

const DOI_PREFIXES: [&str; 4] = [
    "http://dx.doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "https://doi.org/",
];

const PUBMED_PREFIXES: [&str; 5] = [
    "https://www.ncbi.nlm.nih.gov/pubmed/?term=",
    "http://www.ncbi.nlm.nih.gov/pubmed/?term=",
    "https://www.ncbi.nlm.nih.gov/pubmed/",
    "http://www.ncbi.nlm.nih.gov/pubmed/",
    "https://pubmed.ncbi.nlm.nih.gov/",
];

const PMC_PREFIXES: [&str; 2] = [
    "https://www.ncbi.nlm.nih.gov/pmc/articles/PMC",
    "http://www.ncbi.nlm.nih.gov/pmc/articles/PMC",
];

/// Identifiers derived from one link. Values are already normalized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedIds {
    pub doi: Option<String>,
    pub pmid: Option<String>,
    pub pmcid: Option<String>,
}

impl ExtractedIds {
    fn doi(raw: &str) -> Self {
        Self {
            doi: IdentifierKind::Doi.normalize(raw),
            ..Self::default()
        }
    }

    fn pmid(raw: &str) -> Self {
        Self {
            pmid: IdentifierKind::Pmid.normalize(raw),
            ..Self::default()
        }
    }

    fn pmcid(raw: &str) -> Self {
        Self {
            pmcid: IdentifierKind::Pmcid.normalize(raw),
            ..Self::default()
        }
    }

    fn from_metadata(metadata: &CitationMetadata) -> Self {
        Self {
            doi: metadata
                .doi
                .as_deref()
                .and_then(|raw| IdentifierKind::Doi.normalize(raw)),
            pmid: metadata
                .pmid
                .as_deref()
                .and_then(|raw| IdentifierKind::Pmid.normalize(raw)),
            pmcid: metadata
                .pmcid
                .as_deref()
                .and_then(|raw| IdentifierKind::Pmcid.normalize(raw)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.doi.is_none() && self.pmid.is_none() && self.pmcid.is_none()
    }

    /// The extracted values as typed identifiers.
    pub fn identifiers(&self) -> Vec<Identifier> {
        [
            (IdentifierKind::Doi, &self.doi),
            (IdentifierKind::Pmid, &self.pmid),
            (IdentifierKind::Pmcid, &self.pmcid),
        ]
        .into_iter()
        .filter_map(|(kind, value)| value.as_deref().and_then(|v| Identifier::new(kind, v)))
        .collect()
    }
}

/// Result of the prefix rules alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FastMatch {
    /// Raw document file; nothing to extract.
    NotCitable,
    /// A resolver prefix matched.
    Matched(ExtractedIds),
    /// No rule applied; the fallback lookup is needed.
    NoMatch,
}

/// Strip whitespace the catalog leaves inside links.
pub fn normalize_link(link: &str) -> String {
    link.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Apply the prefix rules to an already-normalized link.
pub fn match_fast(link: &str) -> FastMatch {
    let lower = link.to_ascii_lowercase();
    if NON_CITABLE_SUFFIXES
        .iter()
        .any(|suffix| lower.ends_with(suffix))
    {
        return FastMatch::NotCitable;
    }
    if let Some(rest) = strip_any(link, &DOI_PREFIXES) {
        return FastMatch::Matched(ExtractedIds::doi(rest));
    }
    if let Some(rest) = strip_any(link, &PUBMED_PREFIXES) {
        let id = rest.split(['?', '#']).next().unwrap_or_default();
        return FastMatch::Matched(ExtractedIds::pmid(id.trim_end_matches('/')));
    }
    if let Some(rest) = strip_any(link, &PMC_PREFIXES) {
        return FastMatch::Matched(ExtractedIds::pmcid(&rest.replace('/', "")));
    }
    FastMatch::NoMatch
}

fn strip_any<'a>(link: &'a str, prefixes: &[&str]) -> Option<&'a str> {
    prefixes.iter().find_map(|prefix| link.strip_prefix(prefix))
}

/// Counters for how links were resolved.
#[derive(Debug, Default)]
pub struct ExtractionStats {
    pub not_citable: AtomicU64,
    pub fast_path: AtomicU64,
    pub cache_hits: AtomicU64,
    pub lookups: AtomicU64,
    pub ambiguous_lookups: AtomicU64,
    pub failed_lookups: AtomicU64,
}

impl ExtractionStats {
    pub fn snapshot(&self) -> ExtractionSummary {
        ExtractionSummary {
            not_citable: self.not_citable.load(Ordering::Relaxed),
            fast_path: self.fast_path.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            lookups: self.lookups.load(Ordering::Relaxed),
            ambiguous_lookups: self.ambiguous_lookups.load(Ordering::Relaxed),
            failed_lookups: self.failed_lookups.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ExtractionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionSummary {
    pub not_citable: u64,
    pub fast_path: u64,
    pub cache_hits: u64,
    pub lookups: u64,
    pub ambiguous_lookups: u64,
    pub failed_lookups: u64,
}

/// Bounds concurrent fallback lookups and spaces them out.
pub struct LookupLimiter {
    permits: Semaphore,
    min_interval: Duration,
    next_slot: Mutex<Instant>,
}

impl LookupLimiter {
    pub fn new(max_concurrent: usize, min_interval: Duration) -> Self {
        Self {
            permits: Semaphore::new(max_concurrent.max(1)),
            min_interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    /// Wait for a free slot; the permit is held for the duration of the call.
    pub async fn acquire(&self) -> Option<SemaphorePermit<'_>> {
        let permit = self.permits.acquire().await.ok()?;
        let mut next = self.next_slot.lock().await;
        let now = Instant::now();
        if *next > now {
            tokio::time::sleep_until(*next).await;
        }
        *next = Instant::now() + self.min_interval;
        Some(permit)
    }
}

/// Derives normalized identifiers from citation links.
pub struct IdentifierExtractor {
    lookup: Arc<dyn CitationLookup>,
    cache: Arc<dyn ExtractionCache>,
    limiter: LookupLimiter,
    timeout: Duration,
    stats: ExtractionStats,
}

impl IdentifierExtractor {
    pub fn new(
        lookup: Arc<dyn CitationLookup>,
        cache: Arc<dyn ExtractionCache>,
        config: &LookupConfig,
    ) -> Self {
        Self {
            lookup,
            cache,
            limiter: LookupLimiter::new(config.max_concurrent, config.min_interval()),
            timeout: config.timeout(),
            stats: ExtractionStats::default(),
        }
    }

    pub fn stats(&self) -> &ExtractionStats {
        &self.stats
    }

    /// Extract identifiers from `link`. Never fails: lookup errors yield an
    /// empty result.
    pub async fn extract(&self, link: &str) -> ExtractedIds {
        let link = normalize_link(link);
        if link.is_empty() {
            return ExtractedIds::default();
        }

        match match_fast(&link) {
            FastMatch::NotCitable => {
                self.stats.not_citable.fetch_add(1, Ordering::Relaxed);
                return ExtractedIds::default();
            }
            FastMatch::Matched(ids) => {
                self.stats.fast_path.fetch_add(1, Ordering::Relaxed);
                return ids;
            }
            FastMatch::NoMatch => {}
        }

        match self.cache.get(&link) {
            Ok(Some(CachedLookup::Inconclusive)) => {
                self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                return ExtractedIds::default();
            }
            Ok(Some(CachedLookup::Found(ids))) => {
                self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                return ids;
            }
            Ok(None) => {}
            Err(e) => warn!(link = %link, error = %e, "Extraction cache read failed"),
        }

        self.lookup_remote(&link).await
    }

    async fn lookup_remote(&self, link: &str) -> ExtractedIds {
        let _permit = self.limiter.acquire().await;
        self.stats.lookups.fetch_add(1, Ordering::Relaxed);

        let results = match self.fetch(link).await {
            Ok(results) => results,
            Err(error) => {
                self.stats.failed_lookups.fetch_add(1, Ordering::Relaxed);
                warn!(error = %error, "Citation lookup failed");
                return ExtractedIds::default();
            }
        };

        let outcome = match results.as_slice() {
            [single] => {
                let ids = ExtractedIds::from_metadata(single);
                if ids.is_empty() {
                    CachedLookup::Inconclusive
                } else {
                    CachedLookup::Found(ids)
                }
            }
            [] => CachedLookup::Inconclusive,
            many => {
                self.stats.ambiguous_lookups.fetch_add(1, Ordering::Relaxed);
                debug!(link = %link, results = many.len(), "Citation lookup ambiguous");
                CachedLookup::Inconclusive
            }
        };

        if let Err(e) = self.cache.put(link, outcome.clone()) {
            warn!(link = %link, error = %e, "Extraction cache write failed");
        }

        match outcome {
            CachedLookup::Found(ids) => ids,
            CachedLookup::Inconclusive => ExtractedIds::default(),
        }
    }

    /// One remote call under the lookup timeout.
    async fn fetch(&self, link: &str) -> Result<Vec<CitationMetadata>, ReconcileError> {
        match tokio::time::timeout(self.timeout, self.lookup.lookup(link)).await {
            Ok(Ok(results)) => Ok(results),
            Ok(Err(e)) => Err(ReconcileError::Extraction {
                link: link.to_string(),
                reason: format!("{:#}", e),
            }),
            Err(_) => Err(ReconcileError::Extraction {
                link: link.to_string(),
                reason: format!("timed out after {}s", self.timeout.as_secs()),
            }),
        }
    }
}
