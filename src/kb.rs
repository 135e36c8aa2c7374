//! # Knowledge Base Collaborators
//!
//! Read and write interfaces to the target knowledge base, with three
//! implementations: an in-memory store (tests and offline snapshot runs), a
//! Wikibase HTTP reader, and a dry-run writer that only logs.

use crate::config::KnowledgeBaseConfig;
use crate::model::{
    DatePrecision, EntityId, IdentifierKind, Reference, Snak, Statement, TimeValue, Value,
    WriteTask,
};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::RwLock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Read side of the knowledge base.
#[async_trait]
pub trait KnowledgeBaseReader: Send + Sync {
    /// Every value of `kind` held by some entity, mapped to its claimants.
    async fn identifiers(&self, kind: IdentifierKind) -> Result<HashMap<String, Vec<EntityId>>>;

    /// Whether the entity has any statement for `property`.
    async fn has_property(&self, entity: &EntityId, property: &str) -> Result<bool>;

    /// Statements for `property` that carry provenance.
    async fn referenced_statements(
        &self,
        entity: &EntityId,
        property: &str,
    ) -> Result<Vec<Statement>>;

    /// The entity's display label, if it has one.
    async fn label(&self, entity: &EntityId) -> Result<Option<String>>;
}

/// Write side of the knowledge base. Implementations hold no per-call state
/// and are shared by every write worker.
#[async_trait]
pub trait KnowledgeBaseWriter: Send + Sync {
    /// Apply the task; returns the id of the written (or created) entity.
    async fn write(&self, task: &WriteTask) -> Result<EntityId>;
}

// =============================================================================
// In-memory knowledge base
// =============================================================================

/// One entity held by [`InMemoryKnowledgeBase`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredEntity {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub statements: Vec<Statement>,
}

impl StoredEntity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_statement(mut self, statement: Statement) -> Self {
        self.statements.push(statement);
        self
    }

    pub fn statements_for<'a>(&'a self, property: &'a str) -> impl Iterator<Item = &'a Statement> {
        self.statements
            .iter()
            .filter(move |statement| statement.property == property)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct KbState {
    next_id: u64,
    entities: BTreeMap<EntityId, StoredEntity>,
}

impl KbState {
    fn observe_id(&mut self, id: &EntityId) {
        if let Some(n) = id.as_str().strip_prefix('Q').and_then(|n| n.parse::<u64>().ok()) {
            self.next_id = self.next_id.max(n + 1);
        }
    }

    fn mint_id(&mut self) -> EntityId {
        self.next_id = self.next_id.max(1);
        let id = EntityId::new(format!("Q{}", self.next_id));
        self.next_id += 1;
        id
    }
}

/// Process-local knowledge base, optionally persisted as a JSON snapshot.
#[derive(Debug, Default)]
pub struct InMemoryKnowledgeBase {
    state: RwLock<KbState>,
    writes: AtomicU64,
}

impl InMemoryKnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot written by [`save_snapshot`](Self::save_snapshot).
    /// A missing file yields an empty knowledge base.
    pub fn load_snapshot(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading snapshot {}", path.display()))?;
        let mut state: KbState = serde_json::from_str(&raw)
            .with_context(|| format!("parsing snapshot {}", path.display()))?;
        let ids: Vec<EntityId> = state.entities.keys().cloned().collect();
        for id in &ids {
            state.observe_id(id);
        }
        Ok(Self {
            state: RwLock::new(state),
            writes: AtomicU64::new(0),
        })
    }

    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let raw = serde_json::to_string_pretty(&*self.state.read())?;
        std::fs::write(path, raw).with_context(|| format!("writing snapshot {}", path.display()))
    }

    /// Seed or replace an entity.
    pub fn insert(&self, id: EntityId, entity: StoredEntity) {
        let mut state = self.state.write();
        state.observe_id(&id);
        state.entities.insert(id, entity);
    }

    pub fn entity(&self, id: &EntityId) -> Option<StoredEntity> {
        self.state.read().entities.get(id).cloned()
    }

    pub fn entity_count(&self) -> usize {
        self.state.read().entities.len()
    }

    pub fn statement_count(&self) -> usize {
        self.state
            .read()
            .entities
            .values()
            .map(|entity| entity.statements.len())
            .sum()
    }

    /// Number of successful writes applied.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl KnowledgeBaseReader for InMemoryKnowledgeBase {
    async fn identifiers(&self, kind: IdentifierKind) -> Result<HashMap<String, Vec<EntityId>>> {
        let state = self.state.read();
        let mut map: HashMap<String, Vec<EntityId>> = HashMap::new();
        for (id, entity) in &state.entities {
            for statement in entity.statements_for(kind.property()) {
                let raw = match &statement.value {
                    Value::String { value } | Value::ExternalId { value } => value,
                    _ => continue,
                };
                if let Some(value) = kind.normalize(raw) {
                    let claimants = map.entry(value).or_default();
                    if !claimants.contains(id) {
                        claimants.push(id.clone());
                    }
                }
            }
        }
        Ok(map)
    }

    async fn has_property(&self, entity: &EntityId, property: &str) -> Result<bool> {
        Ok(self
            .state
            .read()
            .entities
            .get(entity)
            .is_some_and(|stored| stored.statements_for(property).next().is_some()))
    }

    async fn referenced_statements(
        &self,
        entity: &EntityId,
        property: &str,
    ) -> Result<Vec<Statement>> {
        Ok(self
            .state
            .read()
            .entities
            .get(entity)
            .map(|stored| {
                stored
                    .statements_for(property)
                    .filter(|statement| statement.is_referenced())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn label(&self, entity: &EntityId) -> Result<Option<String>> {
        Ok(self
            .state
            .read()
            .entities
            .get(entity)
            .and_then(|stored| stored.label.clone()))
    }
}

#[async_trait]
impl KnowledgeBaseWriter for InMemoryKnowledgeBase {
    async fn write(&self, task: &WriteTask) -> Result<EntityId> {
        let mut state = self.state.write();
        let id = match &task.target {
            Some(id) => {
                if !state.entities.contains_key(id) {
                    bail!("entity {} does not exist", id);
                }
                id.clone()
            }
            None => {
                let id = state.mint_id();
                state.entities.insert(id.clone(), StoredEntity::new());
                id
            }
        };
        let entity = state
            .entities
            .get_mut(&id)
            .ok_or_else(|| anyhow!("entity {} vanished during write", id))?;
        entity.statements.extend(task.statements.iter().cloned());
        if entity.label.is_none() {
            entity.label = task.label.clone();
        }
        if entity.description.is_none() {
            entity.description = task.description.clone();
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }
}

// =============================================================================
// Wikibase HTTP reader
// =============================================================================

/// Reads from a live Wikibase: SPARQL for bulk identifier maps, the action
/// API for per-entity point queries.
#[derive(Debug, Clone)]
pub struct WikibaseReader {
    http: Client,
    sparql_endpoint: String,
    api_endpoint: String,
    entity_prefix: String,
    language: String,
}

impl WikibaseReader {
    pub fn new(
        config: &KnowledgeBaseConfig,
        user_agent: &str,
        timeout: Duration,
        language: &str,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent(user_agent.to_string())
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            sparql_endpoint: config.sparql_endpoint.clone(),
            api_endpoint: config.api_endpoint.clone(),
            entity_prefix: config.entity_prefix.clone(),
            language: language.to_string(),
        })
    }

    async fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<Json> {
        let response = self.http.get(url).query(query).send().await?;
        if !response.status().is_success() {
            bail!("{} returned {}", url, response.status());
        }
        Ok(response.json().await?)
    }

    async fn claims(&self, entity: &EntityId, property: &str) -> Result<Vec<Statement>> {
        let body = self
            .get_json(
                &self.api_endpoint,
                &[
                    ("action", "wbgetclaims"),
                    ("format", "json"),
                    ("entity", entity.as_str()),
                    ("property", property),
                ],
            )
            .await?;
        parse_claims(&body, property)
    }
}

pub fn identifier_query(kind: IdentifierKind) -> String {
    format!(
        "SELECT ?item ?value WHERE {{ ?item wdt:{} ?value . }}",
        kind.property()
    )
}

/// Parse SPARQL JSON results of [`identifier_query`] into a claimant map.
pub fn parse_identifier_bindings(
    body: &Json,
    kind: IdentifierKind,
    entity_prefix: &str,
) -> Result<HashMap<String, Vec<EntityId>>> {
    let bindings = body
        .pointer("/results/bindings")
        .and_then(Json::as_array)
        .ok_or_else(|| anyhow!("SPARQL response has no results.bindings"))?;
    let mut map: HashMap<String, Vec<EntityId>> = HashMap::new();
    for binding in bindings {
        let item = binding.pointer("/item/value").and_then(Json::as_str);
        let value = binding.pointer("/value/value").and_then(Json::as_str);
        let (Some(item), Some(value)) = (item, value) else {
            continue;
        };
        let Some(value) = kind.normalize(value) else {
            continue;
        };
        let id = EntityId::new(item.strip_prefix(entity_prefix).unwrap_or(item));
        let claimants = map.entry(value).or_default();
        if !claimants.contains(&id) {
            claimants.push(id);
        }
    }
    Ok(map)
}

/// Parse a `wbgetclaims` response for one property.
pub fn parse_claims(body: &Json, property: &str) -> Result<Vec<Statement>> {
    if let Some(error) = body.get("error") {
        bail!("wbgetclaims failed: {}", error);
    }
    let claims = body
        .pointer(&format!("/claims/{}", property))
        .and_then(Json::as_array);
    let Some(claims) = claims else {
        return Ok(Vec::new());
    };
    let mut statements = Vec::new();
    for claim in claims {
        let Some(value) = claim.get("mainsnak").and_then(parse_snak_value) else {
            continue;
        };
        let mut statement = Statement::new(property, value);
        // Keep the richest reference; callers only look at its size.
        let reference = claim
            .get("references")
            .and_then(Json::as_array)
            .into_iter()
            .flatten()
            .map(parse_reference)
            .max_by_key(Reference::len);
        if let Some(reference) = reference.filter(|r| !r.is_empty()) {
            statement = statement.with_provenance(reference);
        }
        statements.push(statement);
    }
    Ok(statements)
}

fn parse_reference(reference: &Json) -> Reference {
    let parts = reference
        .get("snaks")
        .and_then(Json::as_object)
        .into_iter()
        .flat_map(|snaks| snaks.iter())
        .flat_map(|(property, snaks)| {
            snaks
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(move |snak| {
                    parse_snak_value(snak).map(|value| Snak::new(property.clone(), value))
                })
        })
        .collect();
    Reference::new(parts)
}

fn parse_snak_value(snak: &Json) -> Option<Value> {
    let datavalue = snak.get("datavalue")?;
    let value = datavalue.get("value")?;
    match datavalue.get("type")?.as_str()? {
        "string" => {
            let text = value.as_str()?;
            if snak.get("datatype").and_then(Json::as_str) == Some("external-id") {
                Some(Value::external_id(text))
            } else {
                Some(Value::string(text))
            }
        }
        "wikibase-entityid" => value
            .get("id")
            .and_then(Json::as_str)
            .map(|id| Value::item(&EntityId::from(id))),
        "monolingualtext" => Some(Value::monolingual(
            value.get("text")?.as_str()?,
            value.get("language")?.as_str()?,
        )),
        "time" => parse_wikibase_time(
            value.get("time")?.as_str()?,
            value.get("precision")?.as_u64()?,
        )
        .map(Value::Time),
        _ => None,
    }
}

/// Parse `+YYYY-MM-DDT00:00:00Z` with a Wikibase precision code.
pub fn parse_wikibase_time(raw: &str, precision: u64) -> Option<TimeValue> {
    let date = raw.trim_start_matches('+').split('T').next()?;
    let mut parts = date.splitn(3, '-');
    let year: i32 = parts.next()?.parse().ok()?;
    let month: u32 = parts.next()?.parse().ok()?;
    let day: u32 = parts.next()?.parse().ok()?;
    let precision = match precision {
        11 => DatePrecision::Day,
        10 => DatePrecision::Month,
        _ => DatePrecision::Year,
    };
    let date = NaiveDate::from_ymd_opt(year, month.max(1), day.max(1))?;
    Some(TimeValue { date, precision })
}

#[async_trait]
impl KnowledgeBaseReader for WikibaseReader {
    async fn identifiers(&self, kind: IdentifierKind) -> Result<HashMap<String, Vec<EntityId>>> {
        let query = identifier_query(kind);
        debug!(kind = %kind, "Fetching identifier map");
        let body = self
            .get_json(
                &self.sparql_endpoint,
                &[("format", "json"), ("query", query.as_str())],
            )
            .await?;
        parse_identifier_bindings(&body, kind, &self.entity_prefix)
    }

    async fn has_property(&self, entity: &EntityId, property: &str) -> Result<bool> {
        Ok(!self.claims(entity, property).await?.is_empty())
    }

    async fn referenced_statements(
        &self,
        entity: &EntityId,
        property: &str,
    ) -> Result<Vec<Statement>> {
        let mut statements = self.claims(entity, property).await?;
        statements.retain(Statement::is_referenced);
        Ok(statements)
    }

    async fn label(&self, entity: &EntityId) -> Result<Option<String>> {
        let body = self
            .get_json(
                &self.api_endpoint,
                &[
                    ("action", "wbgetentities"),
                    ("format", "json"),
                    ("props", "labels"),
                    ("ids", entity.as_str()),
                    ("languages", self.language.as_str()),
                ],
            )
            .await?;
        Ok(parse_label(&body, entity, &self.language))
    }
}

pub fn parse_label(body: &Json, entity: &EntityId, language: &str) -> Option<String> {
    body.pointer(&format!(
        "/entities/{}/labels/{}/value",
        entity.as_str(),
        language
    ))
    .and_then(Json::as_str)
    .map(str::to_string)
}

// =============================================================================
// Dry-run writer
// =============================================================================

/// Logs every task instead of writing it. Creations get placeholder ids.
#[derive(Debug, Default)]
pub struct DryRunWriter {
    created: AtomicU64,
}

impl DryRunWriter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KnowledgeBaseWriter for DryRunWriter {
    async fn write(&self, task: &WriteTask) -> Result<EntityId> {
        let id = match &task.target {
            Some(id) => id.clone(),
            None => {
                let n = self.created.fetch_add(1, Ordering::Relaxed) + 1;
                EntityId::new(format!("dry-run-{}", n))
            }
        };
        info!(
            entity = %id,
            created = task.target.is_none(),
            statements = task.statements.len(),
            label = task.label.as_deref().unwrap_or(""),
            "Dry-run write"
        );
        for statement in &task.statements {
            debug!(entity = %id, property = %statement.property, value = %statement.value, "Dry-run statement");
        }
        Ok(id)
    }
}
