//! Default constants for biblink configuration.
//!
//! All magic numbers are centralized here with documentation.

// =============================================================================
// Write Queue Defaults
// =============================================================================

/// Number of write workers sharing the write client
pub const DEFAULT_WRITE_WORKERS: usize = 6;

/// Queue capacity before `submit` starts applying backpressure
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Per-task write timeout (seconds)
/// A timed-out write is a failure of that task only.
pub const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 60;

// =============================================================================
// Citation Lookup Defaults
// =============================================================================

/// Citation-metadata endpoint; the URL-encoded link is appended as a path segment
pub const DEFAULT_LOOKUP_ENDPOINT: &str =
    "https://en.wikipedia.org/api/rest_v1/data/citation/mediawiki/";

/// Per-lookup timeout (seconds)
pub const DEFAULT_LOOKUP_TIMEOUT_SECS: u64 = 30;

/// Maximum concurrent fallback lookups
/// The lookup service is slow and shared; keep this small.
pub const DEFAULT_LOOKUP_CONCURRENCY: usize = 2;

/// Minimum spacing between two fallback lookups (milliseconds)
pub const DEFAULT_LOOKUP_MIN_INTERVAL_MS: u64 = 250;

/// User agent sent to remote services
pub const DEFAULT_USER_AGENT: &str = concat!("biblink/", env!("CARGO_PKG_VERSION"));

// =============================================================================
// Extraction Cache Defaults
// =============================================================================

/// Expiry of cached lookup results (days)
pub const DEFAULT_CACHE_TTL_DAYS: i64 = 30;

/// In-memory cache capacity (entries)
pub const DEFAULT_CACHE_CAPACITY: usize = 100_000;

// =============================================================================
// Knowledge Base Defaults
// =============================================================================

/// SPARQL endpoint used to build the identifier index
pub const DEFAULT_SPARQL_ENDPOINT: &str = "https://query.wikidata.org/sparql";

/// Action API endpoint used for point queries
pub const DEFAULT_API_ENDPOINT: &str = "https://www.wikidata.org/w/api.php";

/// Prefix stripped from entity URIs in SPARQL results
pub const DEFAULT_ENTITY_PREFIX: &str = "http://www.wikidata.org/entity/";

// =============================================================================
// Reconciliation Defaults
// =============================================================================

/// Records reconciled concurrently
pub const DEFAULT_RECONCILE_CONCURRENCY: usize = 16;

// =============================================================================
// Provenance Defaults
// =============================================================================

/// Item standing for the catalog in "stated in" references
pub const DEFAULT_SOURCE_ITEM: &str = "Q26822184";

/// Sponsor item added to created entities
pub const DEFAULT_SPONSOR_ITEM: &str = "Q60346";

/// Language of title statements
pub const DEFAULT_TITLE_LANGUAGE: &str = "en";
