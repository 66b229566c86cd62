//! Bundle processing.
//!
//! Batches process each entry independently; transactions apply every
//! entry atomically inside one database transaction. Transaction entries
//! may reference each other through `urn:uuid:` placeholders: the
//! processor computes the dependency graph between entries, orders them
//! so producers precede consumers, mints the real ids up front, and
//! substitutes placeholders before routing each entry to the repository.

use std::collections::HashMap;

use serde_json::{Map, Value, json};
use uuid::Uuid;

use atrium_fhir::{Resource, generate_id, outcome};

use crate::context::ProjectContext;
use crate::error::{StorageError, StorageResult, TransactionError};
use crate::query::parser::{MAX_COUNT, QueryParser, UnknownParameterBehavior};
use crate::query::planner::QueryPlanner;
use crate::sql::{borrow_params, quote_ident};
use crate::types::{SearchEntryMode, WriteOperation};

use super::{Repository, ensure_resource_type};

/// HTTP-style method of a bundle entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleMethod {
    /// Read or search.
    Get,
    /// Create (or conditional create with If-None-Exist).
    Post,
    /// Update or conditional update.
    Put,
    /// Delete.
    Delete,
}

impl BundleMethod {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(BundleMethod::Get),
            "POST" => Some(BundleMethod::Post),
            "PUT" => Some(BundleMethod::Put),
            "DELETE" => Some(BundleMethod::Delete),
            _ => None,
        }
    }
}

/// One parsed bundle entry.
#[derive(Debug, Clone)]
pub struct BundleEntry {
    /// The entry's fullUrl, often a `urn:uuid:` placeholder.
    pub full_url: Option<String>,
    /// The action method.
    pub method: BundleMethod,
    /// The action URL relative to the base.
    pub url: String,
    /// Conditional-create search parameters.
    pub if_none_exist: Option<String>,
    /// Optimistic-lock version tag.
    pub if_match: Option<String>,
    /// The entry body.
    pub resource: Option<Value>,
}

/// The result of one entry.
#[derive(Debug, Clone)]
struct EntryOutcome {
    status: &'static str,
    location: Option<String>,
    resource: Option<Value>,
}

impl EntryOutcome {
    fn into_entry(self) -> Value {
        let mut response = Map::new();
        response.insert("status".to_string(), json!(self.status));
        if let Some(location) = self.location {
            response.insert("location".to_string(), json!(location));
        }
        let mut entry = Map::new();
        entry.insert("response".to_string(), Value::Object(response));
        if let Some(resource) = self.resource {
            entry.insert("resource".to_string(), resource);
        }
        Value::Object(entry)
    }
}

impl Repository {
    /// Processes a batch or transaction bundle, returning the response
    /// envelope.
    pub async fn process_bundle(
        &self,
        ctx: &ProjectContext,
        bundle: &Value,
    ) -> StorageResult<Value> {
        let bundle_type = bundle
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| bundle_error(0, "Bundle must have a type"))?;

        match bundle_type {
            "batch" => self.process_batch(ctx, bundle).await,
            "transaction" => self.process_transaction(ctx, bundle).await,
            other => Err(bundle_error(
                0,
                &format!("Bundle type must be 'batch' or 'transaction', got '{}'", other),
            )),
        }
    }

    /// Batch: entries are independent; failures do not affect the rest,
    /// and responses preserve input order.
    async fn process_batch(&self, ctx: &ProjectContext, bundle: &Value) -> StorageResult<Value> {
        let raw_entries = bundle
            .get("entry")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut responses = Vec::with_capacity(raw_entries.len());
        for (index, raw) in raw_entries.iter().enumerate() {
            let response = match parse_entry(raw, index) {
                Ok(entry) => match self.execute_batch_entry(ctx, &entry).await {
                    Ok(outcome) => outcome.into_entry(),
                    Err(err) => error_entry(&err),
                },
                Err(err) => error_entry(&err),
            };
            responses.push(response);
        }

        Ok(json!({
            "resourceType": "Bundle",
            "type": "batch-response",
            "entry": responses
        }))
    }

    /// Transaction: all entries commit atomically, with placeholder
    /// resolution and producer-before-consumer ordering.
    async fn process_transaction(
        &self,
        ctx: &ProjectContext,
        bundle: &Value,
    ) -> StorageResult<Value> {
        let raw_entries = bundle
            .get("entry")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut entries = Vec::with_capacity(raw_entries.len());
        for (index, raw) in raw_entries.iter().enumerate() {
            entries.push(parse_entry(raw, index)?);
        }

        // Mint identities for creating entries up front so placeholders
        // can be substituted before anything executes.
        let mut minted: HashMap<usize, Uuid> = HashMap::new();
        let mut placeholders: HashMap<String, String> = HashMap::new();
        for (index, entry) in entries.iter().enumerate() {
            if entry.method != BundleMethod::Post {
                continue;
            }
            let id = generate_id();
            minted.insert(index, id);
            if let (Some(full_url), Some(resource_type)) =
                (&entry.full_url, entry.url.split(['/', '?']).next())
            {
                if full_url.starts_with("urn:uuid:") {
                    placeholders
                        .insert(full_url.clone(), format!("{}/{}", resource_type, id));
                }
            }
        }

        let order = execution_order(&entries, &placeholders)?;

        for entry in &mut entries {
            if let Some(resource) = &mut entry.resource {
                substitute_placeholders(resource, &placeholders);
            }
        }

        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let mut outcomes: Vec<Option<EntryOutcome>> = vec![None; entries.len()];
        let mut writes: Vec<(Resource, WriteOperation)> = Vec::new();
        for index in order {
            let entry = &entries[index];
            let outcome = self
                .execute_transaction_entry(&tx, ctx, entry, minted.get(&index).copied())
                .await
                .map_err(|err| match err {
                    StorageError::Transaction(TransactionError::BundleError { .. }) => err,
                    other => bundle_error(index, &other.to_string()),
                })?;
            outcomes[index] = Some(outcome.0);
            if let Some(write) = outcome.1 {
                writes.push(write);
            }
        }

        tx.commit().await?;

        for (resource, op) in &writes {
            if let Some(id) = resource.id().and_then(|id| Uuid::parse_str(id).ok()) {
                self.cache.invalidate(resource.resource_type(), id);
            }
            self.after_commit(ctx, resource, *op).await;
        }

        let responses: Vec<Value> = outcomes
            .into_iter()
            .map(|outcome| {
                outcome
                    .map(EntryOutcome::into_entry)
                    .unwrap_or_else(|| json!({"response": {"status": "500"}}))
            })
            .collect();

        Ok(json!({
            "resourceType": "Bundle",
            "type": "transaction-response",
            "entry": responses
        }))
    }

    /// Routes one batch entry through the public repository surface.
    async fn execute_batch_entry(
        &self,
        ctx: &ProjectContext,
        entry: &BundleEntry,
    ) -> StorageResult<EntryOutcome> {
        match (entry.method, parse_url(&entry.url)) {
            (BundleMethod::Post, UrlForm::Type(resource_type)) => {
                let resource = required_resource(entry)?;
                if let Some(query) = &entry.if_none_exist {
                    let request = self.parse_query(&resource_type, query)?;
                    let (written, created) =
                        self.conditional_create(ctx, resource, &request).await?;
                    Ok(write_outcome(&written, created))
                } else {
                    let written = self.create(ctx, resource, None).await?;
                    Ok(write_outcome(&written, true))
                }
            }
            (BundleMethod::Put, UrlForm::Instance(resource_type, id)) => {
                let mut resource = required_resource(entry)?;
                resource.set_id(&id);
                if resource.resource_type() != resource_type {
                    return Err(bundle_error(0, "resource type does not match entry URL"));
                }
                let precondition = entry
                    .if_match
                    .as_deref()
                    .and_then(parse_etag);
                let written = self.update(ctx, resource, precondition).await?;
                Ok(write_outcome(&written, false))
            }
            (BundleMethod::Put, UrlForm::Query(resource_type, query)) => {
                let resource = required_resource(entry)?;
                let request = self.parse_query(&resource_type, &query)?;
                let (written, created) = self.conditional_update(ctx, resource, &request).await?;
                Ok(write_outcome(&written, created))
            }
            (BundleMethod::Delete, UrlForm::Instance(resource_type, id)) => {
                self.delete(ctx, &resource_type, id).await?;
                Ok(EntryOutcome {
                    status: "200",
                    location: None,
                    resource: Some(outcome::all_ok()),
                })
            }
            (BundleMethod::Get, UrlForm::Instance(resource_type, id)) => {
                let resource = self.read(ctx, &resource_type, id).await?;
                Ok(EntryOutcome {
                    status: "200",
                    location: None,
                    resource: Some(resource.into_value()),
                })
            }
            (BundleMethod::Get, UrlForm::Type(resource_type))
            | (BundleMethod::Get, UrlForm::Query(resource_type, _)) => {
                let query = match parse_url(&entry.url) {
                    UrlForm::Query(_, query) => query,
                    _ => String::new(),
                };
                let request = self.parse_query(&resource_type, &query)?;
                let page = self.search(ctx, &request).await?;
                Ok(EntryOutcome {
                    status: "200",
                    location: None,
                    resource: Some(searchset(&page.entries)),
                })
            }
            _ => Err(bundle_error(0, &format!("unsupported interaction: {}", entry.url))),
        }
    }

    /// Routes one transaction entry through the transaction-scoped
    /// repository operations.
    async fn execute_transaction_entry(
        &self,
        tx: &deadpool_postgres::Transaction<'_>,
        ctx: &ProjectContext,
        entry: &BundleEntry,
        minted_id: Option<Uuid>,
    ) -> StorageResult<(EntryOutcome, Option<(Resource, WriteOperation)>)> {
        match (entry.method, parse_url(&entry.url)) {
            (BundleMethod::Post, UrlForm::Type(resource_type)) => {
                let resource = required_resource(entry)?;
                if resource.resource_type() != resource_type {
                    return Err(bundle_error(0, "resource type does not match entry URL"));
                }
                if let Some(query) = &entry.if_none_exist {
                    let request = self.parse_query(&resource_type, query)?;
                    let matches = self.search_for_update(tx, ctx, &request).await?;
                    match matches.len() {
                        0 => {
                            let written =
                                self.create_in_tx(tx, ctx, resource, minted_id).await?;
                            Ok((
                                write_outcome(&written, true),
                                Some((written, WriteOperation::Create)),
                            ))
                        }
                        1 => match matches.into_iter().next() {
                            Some(existing) => Ok((write_outcome(&existing, false), None)),
                            None => Err(bundle_error(0, "conditional match vanished")),
                        },
                        count => Err(StorageError::Transaction(
                            TransactionError::MultipleMatches {
                                operation: "create".to_string(),
                                count,
                            },
                        )),
                    }
                } else {
                    let written = self.create_in_tx(tx, ctx, resource, minted_id).await?;
                    Ok((
                        write_outcome(&written, true),
                        Some((written, WriteOperation::Create)),
                    ))
                }
            }
            (BundleMethod::Put, UrlForm::Instance(resource_type, id)) => {
                let mut resource = required_resource(entry)?;
                resource.set_id(&id);
                if resource.resource_type() != resource_type {
                    return Err(bundle_error(0, "resource type does not match entry URL"));
                }
                let precondition = entry.if_match.as_deref().and_then(parse_etag);
                let written = self.update_in_tx(tx, ctx, resource, precondition).await?;
                Ok((
                    write_outcome(&written, false),
                    Some((written, WriteOperation::Update)),
                ))
            }
            (BundleMethod::Put, UrlForm::Query(resource_type, query)) => {
                let mut resource = required_resource(entry)?;
                let request = self.parse_query(&resource_type, &query)?;
                let matches = self.search_for_update(tx, ctx, &request).await?;
                match matches.len() {
                    0 => {
                        let id = minted_id.unwrap_or_else(generate_id);
                        resource.set_id(&id);
                        let written = self.create_in_tx(tx, ctx, resource, Some(id)).await?;
                        Ok((
                            write_outcome(&written, true),
                            Some((written, WriteOperation::Create)),
                        ))
                    }
                    1 => {
                        let id = matches[0]
                            .id()
                            .and_then(|id| Uuid::parse_str(id).ok())
                            .ok_or_else(|| bundle_error(0, "stored resource has no id"))?;
                        resource.set_id(&id);
                        let written = self.update_in_tx(tx, ctx, resource, None).await?;
                        Ok((
                            write_outcome(&written, false),
                            Some((written, WriteOperation::Update)),
                        ))
                    }
                    count => Err(StorageError::Transaction(TransactionError::MultipleMatches {
                        operation: "update".to_string(),
                        count,
                    })),
                }
            }
            (BundleMethod::Delete, UrlForm::Instance(resource_type, id)) => {
                let previous = self.delete_in_tx(tx, ctx, &resource_type, id).await?;
                Ok((
                    EntryOutcome {
                        status: "200",
                        location: None,
                        resource: Some(outcome::all_ok()),
                    },
                    Some((previous, WriteOperation::Delete)),
                ))
            }
            (BundleMethod::Get, UrlForm::Instance(resource_type, id)) => {
                ensure_resource_type(&resource_type)?;
                // Reads inside a transaction see the transaction's own
                // writes.
                let sql = format!(
                    "SELECT \"content\", \"deleted\" FROM {} WHERE \"id\" = $1",
                    quote_ident(&resource_type)
                );
                let row = tx
                    .query_opt(&sql, &[&id])
                    .await?
                    .ok_or_else(|| StorageError::not_found(&resource_type, &id))?;
                if row.get::<_, bool>(1) {
                    return Err(StorageError::gone(&resource_type, &id));
                }
                let content: String = row.get(0);
                let value: Value = serde_json::from_str(&content)?;
                Ok((
                    EntryOutcome {
                        status: "200",
                        location: None,
                        resource: Some(value),
                    },
                    None,
                ))
            }
            (BundleMethod::Get, UrlForm::Type(resource_type))
            | (BundleMethod::Get, UrlForm::Query(resource_type, _)) => {
                ensure_resource_type(&resource_type)?;
                let query = match parse_url(&entry.url) {
                    UrlForm::Query(_, query) => query,
                    _ => String::new(),
                };
                let request = self.parse_query(&resource_type, &query)?;
                let planner = QueryPlanner::new(self.registry());
                let planned = planner.plan(&request, ctx.project_id())?;
                let rows = tx.query(&planned.sql, &borrow_params(&planned.params)).await?;
                let mut entries = Vec::with_capacity(rows.len());
                for row in &rows {
                    let content: String = row.get(1);
                    entries.push(json!({
                        "resource": serde_json::from_str::<Value>(&content)?,
                        "search": {"mode": "match"}
                    }));
                }
                Ok((
                    EntryOutcome {
                        status: "200",
                        location: None,
                        resource: Some(json!({
                            "resourceType": "Bundle",
                            "type": "searchset",
                            "entry": entries
                        })),
                    },
                    None,
                ))
            }
            _ => Err(bundle_error(0, &format!("unsupported interaction: {}", entry.url))),
        }
    }

    fn parse_query(
        &self,
        resource_type: &str,
        query: &str,
    ) -> StorageResult<crate::types::SearchRequest> {
        let pairs: Vec<(String, String)> = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((key, value)) => (key.to_string(), value.to_string()),
                None => (pair.to_string(), String::new()),
            })
            .collect();
        let mut request = QueryParser::new(self.registry())
            .with_unknown_behavior(UnknownParameterBehavior::Error)
            .parse(resource_type, &pairs)?;
        // Conditional operations must see every match, not one page.
        request.count = MAX_COUNT;
        Ok(request)
    }
}

/// The forms an entry URL can take.
enum UrlForm {
    /// `Kind`
    Type(String),
    /// `Kind/id`
    Instance(String, Uuid),
    /// `Kind?query`
    Query(String, String),
}

fn parse_url(url: &str) -> UrlForm {
    if let Some((resource_type, query)) = url.split_once('?') {
        return UrlForm::Query(resource_type.to_string(), query.to_string());
    }
    if let Some((resource_type, id)) = url.split_once('/') {
        if let Ok(id) = Uuid::parse_str(id) {
            return UrlForm::Instance(resource_type.to_string(), id);
        }
    }
    UrlForm::Type(url.to_string())
}

/// Parses one raw bundle entry.
fn parse_entry(raw: &Value, index: usize) -> StorageResult<BundleEntry> {
    let request = raw
        .get("request")
        .ok_or_else(|| bundle_error(index, "entry missing request"))?;
    let method = request
        .get("method")
        .and_then(Value::as_str)
        .and_then(BundleMethod::parse)
        .ok_or_else(|| bundle_error(index, "entry has no valid method"))?;
    let url = request
        .get("url")
        .and_then(Value::as_str)
        .ok_or_else(|| bundle_error(index, "entry has no url"))?
        .to_string();

    Ok(BundleEntry {
        full_url: raw.get("fullUrl").and_then(Value::as_str).map(str::to_string),
        method,
        url,
        if_none_exist: request
            .get("ifNoneExist")
            .and_then(Value::as_str)
            .map(str::to_string),
        if_match: request
            .get("ifMatch")
            .and_then(Value::as_str)
            .map(str::to_string),
        resource: raw.get("resource").cloned(),
    })
}

/// Topological order over placeholder dependencies: the producer of a
/// placeholder executes before every consumer.
fn execution_order(
    entries: &[BundleEntry],
    placeholders: &HashMap<String, String>,
) -> StorageResult<Vec<usize>> {
    let producer_of: HashMap<&str, usize> = entries
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            entry.full_url.as_deref().and_then(|url| {
                placeholders.contains_key(url).then_some((url, index))
            })
        })
        .collect();

    // dependencies[i] = set of entries that must run before i.
    let mut dependency_count = vec![0usize; entries.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); entries.len()];
    for (index, entry) in entries.iter().enumerate() {
        let Some(resource) = &entry.resource else {
            continue;
        };
        let serialized = resource.to_string();
        for (placeholder, producer) in &producer_of {
            if *producer != index && serialized.contains(placeholder) {
                dependency_count[index] += 1;
                dependents[*producer].push(index);
            }
        }
    }

    let mut ready: Vec<usize> = (0..entries.len())
        .filter(|&i| dependency_count[i] == 0)
        .collect();
    let mut order = Vec::with_capacity(entries.len());
    while let Some(index) = ready.first().copied() {
        ready.remove(0);
        order.push(index);
        for &dependent in &dependents[index] {
            dependency_count[dependent] -= 1;
            if dependency_count[dependent] == 0 {
                ready.push(dependent);
                ready.sort_unstable();
            }
        }
    }

    if order.len() != entries.len() {
        return Err(StorageError::Transaction(TransactionError::ReferenceCycle));
    }
    Ok(order)
}

/// Replaces placeholder strings in reference positions.
fn substitute_placeholders(value: &mut Value, placeholders: &HashMap<String, String>) {
    match value {
        Value::String(s) => {
            if let Some(replacement) = placeholders.get(s.as_str()) {
                *s = replacement.clone();
            }
        }
        Value::Array(arr) => {
            for child in arr {
                substitute_placeholders(child, placeholders);
            }
        }
        Value::Object(map) => {
            for child in map.values_mut() {
                substitute_placeholders(child, placeholders);
            }
        }
        _ => {}
    }
}

fn required_resource(entry: &BundleEntry) -> StorageResult<Resource> {
    let value = entry
        .resource
        .clone()
        .ok_or_else(|| bundle_error(0, "entry requires a resource body"))?;
    Ok(Resource::from_value(value)?)
}

fn write_outcome(resource: &Resource, created: bool) -> EntryOutcome {
    let location = resource.id().and_then(|id| {
        resource
            .version_id()
            .map(|vid| format!("{}/{}/_history/{}", resource.resource_type(), id, vid))
    });
    EntryOutcome {
        status: if created { "201" } else { "200" },
        location,
        resource: Some(resource.to_value()),
    }
}

fn searchset(entries: &[crate::types::SearchEntry]) -> Value {
    let rendered: Vec<Value> = entries
        .iter()
        .map(|entry| {
            json!({
                "resource": entry.resource.to_value(),
                "search": {"mode": match entry.mode {
                    SearchEntryMode::Match => "match",
                    SearchEntryMode::Include => "include",
                }}
            })
        })
        .collect();
    json!({
        "resourceType": "Bundle",
        "type": "searchset",
        "entry": rendered
    })
}

fn error_entry(err: &StorageError) -> Value {
    let status = match err {
        StorageError::Resource(resource) => match resource {
            crate::error::ResourceError::NotFound { .. } => "404",
            crate::error::ResourceError::Gone { .. } => "410",
            crate::error::ResourceError::VersionNotFound { .. } => "404",
        },
        StorageError::Concurrency(_) => "409",
        StorageError::Validation(_) => "400",
        StorageError::Search(_) => "400",
        StorageError::Transaction(TransactionError::MultipleMatches { .. }) => "412",
        StorageError::Transaction(_) => "400",
        StorageError::Backend(_) => "500",
    };
    json!({
        "response": {"status": status},
        "resource": outcome::operation_outcome("error", "processing", &err.to_string())
    })
}

fn bundle_error(index: usize, message: &str) -> StorageError {
    StorageError::Transaction(TransactionError::BundleError {
        index,
        message: message.to_string(),
    })
}

/// Parses the inner version id out of a weak ETag (`W/"<vid>"`).
fn parse_etag(tag: &str) -> Option<Uuid> {
    let inner = tag
        .trim()
        .strip_prefix("W/")
        .unwrap_or(tag.trim())
        .trim_matches('"');
    Uuid::parse_str(inner).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post_entry(full_url: &str, resource: Value) -> BundleEntry {
        BundleEntry {
            full_url: Some(full_url.to_string()),
            method: BundleMethod::Post,
            url: resource
                .get("resourceType")
                .and_then(Value::as_str)
                .unwrap()
                .to_string(),
            if_none_exist: None,
            if_match: None,
            resource: Some(resource),
        }
    }

    #[test]
    fn test_parse_url_forms() {
        assert!(matches!(parse_url("Patient"), UrlForm::Type(t) if t == "Patient"));
        let id = Uuid::new_v4();
        assert!(matches!(
            parse_url(&format!("Patient/{}", id)),
            UrlForm::Instance(t, parsed) if t == "Patient" && parsed == id
        ));
        assert!(matches!(
            parse_url("Patient?gender=male"),
            UrlForm::Query(t, q) if t == "Patient" && q == "gender=male"
        ));
    }

    #[test]
    fn test_parse_etag() {
        let id = Uuid::new_v4();
        assert_eq!(parse_etag(&format!("W/\"{}\"", id)), Some(id));
        assert_eq!(parse_etag(&format!("\"{}\"", id)), Some(id));
        assert_eq!(parse_etag(&id.to_string()), Some(id));
        assert_eq!(parse_etag("W/\"not-a-uuid\""), None);
    }

    #[test]
    fn test_execution_order_producers_first() {
        let placeholder = format!("urn:uuid:{}", Uuid::new_v4());
        let consumer = post_entry(
            &format!("urn:uuid:{}", Uuid::new_v4()),
            json!({
                "resourceType": "Observation",
                "status": "final",
                "subject": {"reference": placeholder}
            }),
        );
        let producer = post_entry(&placeholder, json!({"resourceType": "Patient"}));

        let entries = vec![consumer, producer];
        let mut placeholders = HashMap::new();
        placeholders.insert(placeholder.clone(), "Patient/abc".to_string());

        let order = execution_order(&entries, &placeholders).unwrap();
        assert_eq!(order, vec![1, 0]);
    }

    #[test]
    fn test_execution_order_detects_cycles() {
        let a = format!("urn:uuid:{}", Uuid::new_v4());
        let b = format!("urn:uuid:{}", Uuid::new_v4());
        let first = post_entry(
            &a,
            json!({"resourceType": "Patient", "link": [{"other": {"reference": b.clone()}}]}),
        );
        let second = post_entry(
            &b,
            json!({"resourceType": "Patient", "link": [{"other": {"reference": a.clone()}}]}),
        );

        let mut placeholders = HashMap::new();
        placeholders.insert(a, "Patient/1".to_string());
        placeholders.insert(b, "Patient/2".to_string());

        let result = execution_order(&[first, second], &placeholders);
        assert!(matches!(
            result,
            Err(StorageError::Transaction(TransactionError::ReferenceCycle))
        ));
    }

    #[test]
    fn test_substitute_placeholders() {
        let placeholder = format!("urn:uuid:{}", Uuid::new_v4());
        let mut resource = json!({
            "resourceType": "Observation",
            "subject": {"reference": placeholder},
            "note": [{"text": "unrelated"}]
        });
        let mut placeholders = HashMap::new();
        placeholders.insert(placeholder, "Patient/real-id".to_string());

        substitute_placeholders(&mut resource, &placeholders);
        assert_eq!(resource["subject"]["reference"], "Patient/real-id");
        assert_eq!(resource["note"][0]["text"], "unrelated");
    }

    #[test]
    fn test_parse_entry_requires_method_and_url() {
        assert!(parse_entry(&json!({}), 0).is_err());
        assert!(parse_entry(&json!({"request": {"method": "FROB", "url": "Patient"}}), 0).is_err());

        let entry = parse_entry(
            &json!({
                "fullUrl": "urn:uuid:00000000-0000-0000-0000-000000000001",
                "request": {"method": "POST", "url": "Patient", "ifNoneExist": "identifier=x"},
                "resource": {"resourceType": "Patient"}
            }),
            0,
        )
        .unwrap();
        assert_eq!(entry.method, BundleMethod::Post);
        assert_eq!(entry.if_none_exist.as_deref(), Some("identifier=x"));
    }
}
