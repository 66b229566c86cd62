//! The repository: the public persistence surface.
//!
//! Every mutating operation and its conditional variant runs in one
//! database transaction. Update and delete take a `SELECT ... FOR UPDATE`
//! row lock before writing, so optimistic-version checks cannot be
//! defeated by a concurrent writer; conditional variants lock their
//! matches inside the same transaction to eliminate check-then-act races.

pub mod bundle;
pub mod cache;
pub mod includes;
pub mod reindex;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use deadpool_postgres::{Config as PoolConfig, Pool, Runtime};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_postgres::NoTls;
use uuid::Uuid;

use atrium_fhir::{Resource, generate_id};

use crate::audit::{AuditEvent, AuditSink, TracingAuditSink};
use crate::context::ProjectContext;
use crate::error::{
    BackendError, ConcurrencyError, ResourceError, StorageError, StorageResult, TransactionError,
    ValidationError,
};
use crate::query::planner::QueryPlanner;
use crate::schema::{self, BLOB_TYPE, PATIENT_COMPARTMENT_TYPES, SCHEMA_VERSION, SchemaModel};
use crate::search::registry::{ColumnType, SearchParameterRegistry};
use crate::search::rows::{self, IndexedRows};
use crate::search::LookupTable;
use crate::sql::{SqlValue, borrow_params, quote_ident};
use crate::subscriptions::SubscriptionEngine;
use crate::types::{
    HistoryEntry, HistoryOptions, SearchEntry, SearchEntryMode, SearchFilter, SearchRequest,
    SearchResultPage, TotalMode, WriteOperation,
};

pub use cache::ResourceCache;

/// Connection configuration for the PostgreSQL pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// PostgreSQL host.
    pub host: String,
    /// PostgreSQL port.
    pub port: u16,
    /// Database name.
    pub dbname: String,
    /// Database user.
    pub user: String,
    /// Database password.
    pub password: Option<String>,
    /// Maximum number of pooled connections.
    pub max_connections: usize,
    /// Statement timeout applied to every pooled connection, in
    /// milliseconds.
    pub statement_timeout_ms: u64,
    /// Read cache capacity in entries.
    pub cache_capacity: usize,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "atrium".to_string(),
            user: "atrium".to_string(),
            password: None,
            max_connections: 10,
            statement_timeout_ms: 30_000,
            cache_capacity: 1024,
        }
    }
}

impl PostgresConfig {
    /// Reads configuration from `ATRIUM_PG_*` environment variables,
    /// falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("ATRIUM_PG_HOST").unwrap_or(defaults.host),
            port: std::env::var("ATRIUM_PG_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            dbname: std::env::var("ATRIUM_PG_DBNAME").unwrap_or(defaults.dbname),
            user: std::env::var("ATRIUM_PG_USER").unwrap_or(defaults.user),
            password: std::env::var("ATRIUM_PG_PASSWORD").ok(),
            max_connections: std::env::var("ATRIUM_PG_MAX_CONNECTIONS")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.max_connections),
            statement_timeout_ms: std::env::var("ATRIUM_PG_STATEMENT_TIMEOUT_MS")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.statement_timeout_ms),
            cache_capacity: defaults.cache_capacity,
        }
    }
}

/// The persistence engine's public surface.
pub struct Repository {
    pub(crate) pool: Pool,
    registry: Arc<SearchParameterRegistry>,
    pub(crate) cache: ResourceCache,
    subscriptions: RwLock<Option<Arc<SubscriptionEngine>>>,
    audit: Arc<dyn AuditSink>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl Repository {
    /// Creates a repository over a fresh connection pool.
    pub async fn new(config: PostgresConfig) -> StorageResult<Self> {
        let mut pool_config = PoolConfig::new();
        pool_config.host = Some(config.host.clone());
        pool_config.port = Some(config.port);
        pool_config.dbname = Some(config.dbname.clone());
        pool_config.user = Some(config.user.clone());
        pool_config.password = config.password.clone();
        pool_config.options = Some(format!(
            "-c statement_timeout={}",
            config.statement_timeout_ms
        ));

        let pool = pool_config
            .builder(NoTls)
            .map_err(|e| {
                StorageError::Backend(BackendError::Unavailable {
                    message: format!("failed to build pool: {}", e),
                })
            })?
            .max_size(config.max_connections)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| {
                StorageError::Backend(BackendError::Unavailable {
                    message: format!("failed to create pool: {}", e),
                })
            })?;

        // Verify connectivity before accepting work.
        pool.get().await?;

        Ok(Self {
            pool,
            registry: Arc::new(SearchParameterRegistry::new()),
            cache: ResourceCache::new(config.cache_capacity),
            subscriptions: RwLock::new(None),
            audit: Arc::new(TracingAuditSink),
        })
    }

    /// Initializes (or upgrades) the database schema. Idempotent.
    pub async fn init_schema(&self) -> StorageResult<()> {
        let client = self.pool.get().await?;
        schema::initialize_schema(&client, &self.registry).await
    }

    /// The shared search parameter registry.
    pub fn registry(&self) -> &Arc<SearchParameterRegistry> {
        &self.registry
    }

    /// Attaches the subscription engine invoked after every write.
    pub fn attach_subscriptions(&self, engine: Arc<SubscriptionEngine>) {
        *self.subscriptions.write() = Some(engine);
    }

    /// Replaces the audit sink.
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    /// Loads active subscriptions into an engine from storage.
    pub async fn load_subscriptions(&self, engine: &SubscriptionEngine) -> StorageResult<()> {
        let mut request = SearchRequest::new("Subscription")
            .with_filter(SearchFilter::eq("status", "active"));
        request.count = crate::query::parser::MAX_COUNT;
        let page = self.search(&ProjectContext::system(), &request).await?;
        let resources: Vec<Resource> = page.matches().cloned().collect();
        engine.load_active(&resources);
        Ok(())
    }

    // ----- read paths -----

    /// Reads the latest version of a resource.
    pub async fn read(
        &self,
        ctx: &ProjectContext,
        resource_type: &str,
        id: Uuid,
    ) -> StorageResult<Resource> {
        ensure_resource_type(resource_type)?;

        if let Some(cached) = self.cache.get(resource_type, id) {
            return Ok(cached);
        }

        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT \"content\", \"deleted\", \"projectId\" FROM {} WHERE \"id\" = $1",
            quote_ident(resource_type)
        );
        let row = client
            .query_opt(&sql, &[&id])
            .await?
            .ok_or_else(|| StorageError::not_found(resource_type, &id))?;

        let project_id: Option<Uuid> = row.get(2);
        if !visible_in(ctx, project_id) {
            return Err(StorageError::not_found(resource_type, &id));
        }
        let deleted: bool = row.get(1);
        if deleted {
            return Err(StorageError::gone(resource_type, &id));
        }

        let resource = decode_content(&row.get::<_, String>(0))?;
        self.cache.put(resource_type, id, resource.clone());
        Ok(resource)
    }

    /// Reads a historical snapshot by version id.
    pub async fn read_version(
        &self,
        ctx: &ProjectContext,
        resource_type: &str,
        id: Uuid,
        version_id: Uuid,
    ) -> StorageResult<Resource> {
        ensure_resource_type(resource_type)?;
        let client = self.pool.get().await?;

        self.check_instance_visible(&client, ctx, resource_type, id).await?;

        let sql = format!(
            "SELECT \"content\" FROM {} WHERE \"id\" = $1 AND \"versionId\" = $2",
            quote_ident(&format!("{}_History", resource_type))
        );
        let row = client.query_opt(&sql, &[&id, &version_id]).await?.ok_or_else(|| {
            StorageError::Resource(ResourceError::VersionNotFound {
                resource_type: resource_type.to_string(),
                id: id.to_string(),
                version_id: version_id.to_string(),
            })
        })?;

        let content: String = row.get(0);
        if content.is_empty() {
            // Tombstone.
            return Err(StorageError::gone(resource_type, &id));
        }
        decode_content(&content)
    }

    /// Reads an instance's history, newest first.
    pub async fn read_history(
        &self,
        ctx: &ProjectContext,
        resource_type: &str,
        id: Uuid,
        options: &HistoryOptions,
    ) -> StorageResult<Vec<HistoryEntry>> {
        ensure_resource_type(resource_type)?;
        let client = self.pool.get().await?;

        self.check_instance_visible(&client, ctx, resource_type, id).await?;

        let mut sql = format!(
            "SELECT \"versionId\", \"id\", \"content\", \"lastUpdated\" FROM {} WHERE \"id\" = $1",
            quote_ident(&format!("{}_History", resource_type))
        );
        let mut params: Vec<SqlValue> = vec![SqlValue::Uuid(id)];
        if let Some(since) = options.since {
            params.push(SqlValue::Timestamp(since));
            sql.push_str(&format!(" AND \"lastUpdated\" > ${}", params.len()));
        }
        sql.push_str(" ORDER BY \"lastUpdated\" DESC");
        params.push(SqlValue::Integer(
            options.count.unwrap_or(crate::query::parser::DEFAULT_COUNT * 5) as i64,
        ));
        sql.push_str(&format!(" LIMIT ${}", params.len()));

        let rows = client.query(&sql, &borrow_params(&params)).await?;
        rows.iter().map(decode_history_row).collect()
    }

    /// Reads type-level history across instances, newest first.
    pub async fn read_type_history(
        &self,
        ctx: &ProjectContext,
        resource_type: &str,
        options: &HistoryOptions,
    ) -> StorageResult<Vec<HistoryEntry>> {
        ensure_resource_type(resource_type)?;
        let client = self.pool.get().await?;

        let history = quote_ident(&format!("{}_History", resource_type));
        let mut sql = format!(
            "SELECT \"versionId\", \"id\", \"content\", \"lastUpdated\" FROM {} WHERE true",
            history
        );
        let mut params: Vec<SqlValue> = Vec::new();
        if let Some(project_id) = ctx.project_id() {
            params.push(SqlValue::Uuid(project_id));
            sql.push_str(&format!(
                " AND \"id\" IN (SELECT \"id\" FROM {} WHERE \"projectId\" = ${})",
                quote_ident(resource_type),
                params.len()
            ));
        }
        if let Some(since) = options.since {
            params.push(SqlValue::Timestamp(since));
            sql.push_str(&format!(" AND \"lastUpdated\" > ${}", params.len()));
        }
        sql.push_str(" ORDER BY \"lastUpdated\" DESC");
        params.push(SqlValue::Integer(
            options.count.unwrap_or(crate::query::parser::DEFAULT_COUNT * 5) as i64,
        ));
        sql.push_str(&format!(" LIMIT ${}", params.len()));

        let rows = client.query(&sql, &borrow_params(&params)).await?;
        rows.iter().map(decode_history_row).collect()
    }

    /// Executes a search request.
    pub async fn search(
        &self,
        ctx: &ProjectContext,
        request: &SearchRequest,
    ) -> StorageResult<SearchResultPage> {
        ensure_resource_type(&request.resource_type)?;
        let client = self.pool.get().await?;

        let planner = QueryPlanner::new(&self.registry);
        let planned = planner.plan(request, ctx.project_id())?;
        let rows = client.query(&planned.sql, &borrow_params(&planned.params)).await?;

        let mut matches = Vec::with_capacity(rows.len());
        for row in &rows {
            matches.push(decode_content(&row.get::<_, String>(1))?);
        }
        let has_next = matches.len() == request.count;

        let total = if request.total == TotalMode::Accurate {
            let counted = planner.plan_count(request, ctx.project_id())?;
            let row = client
                .query_one(&counted.sql, &borrow_params(&counted.params))
                .await?;
            Some(row.get::<_, i64>(0) as u64)
        } else {
            None
        };

        let included =
            includes::resolve(&self.registry, &client, ctx, request, &matches).await?;

        let mut entries: Vec<SearchEntry> = matches
            .into_iter()
            .map(|resource| SearchEntry {
                resource,
                mode: SearchEntryMode::Match,
            })
            .collect();
        entries.extend(included.into_iter().map(|resource| SearchEntry {
            resource,
            mode: SearchEntryMode::Include,
        }));

        Ok(SearchResultPage {
            entries,
            total,
            has_next,
        })
    }

    /// Loads the focal resource and every resource in its patient
    /// compartment.
    pub async fn everything(
        &self,
        ctx: &ProjectContext,
        id: Uuid,
    ) -> StorageResult<Vec<Resource>> {
        let focal = self.read(ctx, "Patient", id).await?;
        let mut results = vec![focal];

        for resource_type in PATIENT_COMPARTMENT_TYPES {
            let mut request = SearchRequest::new(*resource_type);
            request.compartment = Some(id);
            request.count = crate::query::parser::MAX_COUNT;
            let page = self.search(ctx, &request).await?;
            results.extend(page.matches().cloned());
        }
        Ok(results)
    }

    // ----- write paths -----

    /// Creates a resource; the server assigns the identity unless the
    /// caller provides one.
    pub async fn create(
        &self,
        ctx: &ProjectContext,
        resource: Resource,
        assigned_id: Option<Uuid>,
    ) -> StorageResult<Resource> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let written = self.create_in_tx(&tx, ctx, resource, assigned_id).await?;
        tx.commit().await?;
        self.after_commit(ctx, &written, WriteOperation::Create).await;
        Ok(written)
    }

    /// Updates a resource; `precondition` is the caller's expected
    /// version id (If-Match).
    pub async fn update(
        &self,
        ctx: &ProjectContext,
        resource: Resource,
        precondition: Option<Uuid>,
    ) -> StorageResult<Resource> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let written = self.update_in_tx(&tx, ctx, resource, precondition).await?;
        tx.commit().await?;
        let id = written.id().and_then(|id| Uuid::parse_str(id).ok());
        if let Some(id) = id {
            self.cache.invalidate(written.resource_type(), id);
        }
        self.after_commit(ctx, &written, WriteOperation::Update).await;
        Ok(written)
    }

    /// Soft-deletes a resource.
    pub async fn delete(
        &self,
        ctx: &ProjectContext,
        resource_type: &str,
        id: Uuid,
    ) -> StorageResult<()> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let previous = self.delete_in_tx(&tx, ctx, resource_type, id).await?;
        tx.commit().await?;
        self.cache.invalidate(resource_type, id);
        self.after_commit(ctx, &previous, WriteOperation::Delete).await;
        Ok(())
    }

    /// Conditional create: at most one existing match is returned
    /// unmodified; zero matches creates. Returns `(resource, created)`.
    pub async fn conditional_create(
        &self,
        ctx: &ProjectContext,
        resource: Resource,
        request: &SearchRequest,
    ) -> StorageResult<(Resource, bool)> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let matches = self.search_for_update(&tx, ctx, request).await?;
        match matches.len() {
            0 => {
                let written = self.create_in_tx(&tx, ctx, resource, None).await?;
                tx.commit().await?;
                self.after_commit(ctx, &written, WriteOperation::Create).await;
                Ok((written, true))
            }
            1 => {
                tx.commit().await?;
                match matches.into_iter().next() {
                    Some(existing) => Ok((existing, false)),
                    None => Err(internal("conditional match vanished")),
                }
            }
            count => Err(StorageError::Transaction(TransactionError::MultipleMatches {
                operation: "create".to_string(),
                count,
            })),
        }
    }

    /// Conditional update: one match updates it, zero matches creates
    /// under a newly minted id. Returns `(resource, created)`.
    pub async fn conditional_update(
        &self,
        ctx: &ProjectContext,
        mut resource: Resource,
        request: &SearchRequest,
    ) -> StorageResult<(Resource, bool)> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let matches = self.search_for_update(&tx, ctx, request).await?;
        match matches.len() {
            0 => {
                // Zero matches mint a new identity even when the body
                // carries an id.
                let id = generate_id();
                resource.set_id(&id);
                let written = self.create_in_tx(&tx, ctx, resource, Some(id)).await?;
                tx.commit().await?;
                self.after_commit(ctx, &written, WriteOperation::Create).await;
                Ok((written, true))
            }
            1 => {
                let existing = &matches[0];
                let id = existing
                    .id()
                    .and_then(|id| Uuid::parse_str(id).ok())
                    .ok_or_else(|| internal("stored resource has no id"))?;
                resource.set_id(&id);
                let written = self.update_in_tx(&tx, ctx, resource, None).await?;
                tx.commit().await?;
                self.cache.invalidate(written.resource_type(), id);
                self.after_commit(ctx, &written, WriteOperation::Update).await;
                Ok((written, false))
            }
            count => Err(StorageError::Transaction(TransactionError::MultipleMatches {
                operation: "update".to_string(),
                count,
            })),
        }
    }

    /// Conditional delete: removes every match, returning the count.
    pub async fn conditional_delete(
        &self,
        ctx: &ProjectContext,
        request: &SearchRequest,
    ) -> StorageResult<u64> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let matches = self.search_for_update(&tx, ctx, request).await?;
        let mut deleted = Vec::with_capacity(matches.len());
        for resource in &matches {
            let id = resource
                .id()
                .and_then(|id| Uuid::parse_str(id).ok())
                .ok_or_else(|| internal("stored resource has no id"))?;
            let previous = self
                .delete_in_tx(&tx, ctx, &request.resource_type, id)
                .await?;
            deleted.push((id, previous));
        }
        tx.commit().await?;

        for (id, previous) in &deleted {
            self.cache.invalidate(&request.resource_type, *id);
            self.after_commit(ctx, previous, WriteOperation::Delete).await;
        }
        Ok(deleted.len() as u64)
    }

    // ----- transaction-scoped building blocks -----

    pub(crate) async fn create_in_tx(
        &self,
        tx: &deadpool_postgres::Transaction<'_>,
        ctx: &ProjectContext,
        mut resource: Resource,
        assigned_id: Option<Uuid>,
    ) -> StorageResult<Resource> {
        let resource_type = resource.resource_type().to_string();
        ensure_resource_type(&resource_type)?;

        let id = assigned_id.unwrap_or_else(generate_id);
        resource.set_id(&id);

        // Lock the row if it exists: recreation after delete is allowed,
        // a live row is not.
        let precheck = self.lock_row(tx, &resource_type, id).await?;
        let mut now = Utc::now();
        if let Some(row) = &precheck {
            if !visible_in(ctx, row.project_id) {
                return Err(StorageError::not_found(&resource_type, &id));
            }
            if !row.deleted {
                return Err(StorageError::Validation(ValidationError::InvalidResource {
                    message: format!("resource already exists: {}/{}", resource_type, id),
                }));
            }
            now = monotonic(now, row.last_updated);
        }

        let version_id = generate_id();
        resource.stamp_meta(&version_id, now);
        self.write_snapshot(tx, ctx, &resource, &resource_type, id, now)
            .await?;
        Ok(resource)
    }

    pub(crate) async fn update_in_tx(
        &self,
        tx: &deadpool_postgres::Transaction<'_>,
        ctx: &ProjectContext,
        mut resource: Resource,
        precondition: Option<Uuid>,
    ) -> StorageResult<Resource> {
        let resource_type = resource.resource_type().to_string();
        ensure_resource_type(&resource_type)?;
        let id = resource
            .id()
            .and_then(|id| Uuid::parse_str(id).ok())
            .ok_or_else(|| {
                StorageError::Validation(ValidationError::MissingRequiredField {
                    field: "id".to_string(),
                })
            })?;

        let row = self
            .lock_row(tx, &resource_type, id)
            .await?
            .ok_or_else(|| StorageError::not_found(&resource_type, &id))?;
        if !visible_in(ctx, row.project_id) {
            return Err(StorageError::not_found(&resource_type, &id));
        }
        if row.deleted {
            return Err(StorageError::gone(&resource_type, &id));
        }
        if let Some(expected) = precondition {
            if row.version_id != Some(expected) {
                return Err(StorageError::Concurrency(ConcurrencyError::VersionConflict {
                    resource_type: resource_type.clone(),
                    id: id.to_string(),
                    expected: expected.to_string(),
                    actual: row
                        .version_id
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "unknown".to_string()),
                }));
            }
        }

        let now = monotonic(Utc::now(), row.last_updated);
        let version_id = generate_id();
        resource.stamp_meta(&version_id, now);
        self.write_snapshot(tx, ctx, &resource, &resource_type, id, now)
            .await?;
        Ok(resource)
    }

    /// Deletes inside a transaction, returning the pre-image for
    /// post-commit hooks.
    pub(crate) async fn delete_in_tx(
        &self,
        tx: &deadpool_postgres::Transaction<'_>,
        ctx: &ProjectContext,
        resource_type: &str,
        id: Uuid,
    ) -> StorageResult<Resource> {
        ensure_resource_type(resource_type)?;

        let row = self
            .lock_row(tx, resource_type, id)
            .await?
            .ok_or_else(|| StorageError::not_found(resource_type, &id))?;
        if !visible_in(ctx, row.project_id) {
            return Err(StorageError::not_found(resource_type, &id));
        }
        if row.deleted {
            return Err(StorageError::gone(resource_type, &id));
        }
        let previous = decode_content(&row.content)?;

        let now = monotonic(Utc::now(), row.last_updated);
        let version_id = generate_id();

        // Tombstone main row: empty content, cleared index columns.
        let model = SchemaModel::new(&self.registry);
        let mut names: Vec<String> = base_column_names(resource_type);
        let mut values: Vec<SqlValue> = vec![
            SqlValue::Uuid(id),
            SqlValue::Text(String::new()),
            SqlValue::Timestamp(now),
            SqlValue::Bool(true),
            SqlValue::UuidOpt(row.project_id),
            SqlValue::Int(SCHEMA_VERSION),
            SqlValue::TextOpt(None),
            SqlValue::TextArrayOpt(None),
        ];
        if resource_type != BLOB_TYPE {
            values.push(SqlValue::UuidArray(Vec::new()));
        }
        for (name, column_type) in model.search_columns(resource_type) {
            names.push(name);
            values.push(null_value(column_type));
        }
        tx.execute(&upsert_sql(resource_type, &names), &borrow_params(&values))
            .await?;

        // History tombstone.
        let history_sql = format!(
            "INSERT INTO {} (\"versionId\", \"id\", \"content\", \"lastUpdated\") VALUES ($1, $2, $3, $4)",
            quote_ident(&format!("{}_History", resource_type))
        );
        tx.execute(&history_sql, &[&version_id, &id, &"", &now]).await?;

        self.clear_derived_rows(tx, resource_type, id).await?;
        Ok(previous)
    }

    /// Writes the main row, history row, and derived rows for a snapshot.
    async fn write_snapshot(
        &self,
        tx: &deadpool_postgres::Transaction<'_>,
        ctx: &ProjectContext,
        resource: &Resource,
        resource_type: &str,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        let content = serde_json::to_string(resource)?;
        let version_id = resource
            .version_id()
            .and_then(|v| Uuid::parse_str(v).ok())
            .ok_or_else(|| internal("snapshot missing versionId"))?;

        let indexed = rows::build(&self.registry, resource);

        let mut names: Vec<String> = base_column_names(resource_type);
        let profiles: Vec<String> = resource.profiles().iter().map(|s| s.to_string()).collect();
        let mut values: Vec<SqlValue> = vec![
            SqlValue::Uuid(id),
            SqlValue::Text(content.clone()),
            SqlValue::Timestamp(now),
            SqlValue::Bool(false),
            SqlValue::UuidOpt(ctx.project_id()),
            SqlValue::Int(SCHEMA_VERSION),
            SqlValue::TextOpt(resource.source().map(str::to_string)),
            SqlValue::TextArrayOpt((!profiles.is_empty()).then_some(profiles)),
        ];
        if resource_type != BLOB_TYPE {
            values.push(SqlValue::UuidArray(indexed.compartments.clone()));
        }
        for (name, value) in &indexed.columns {
            names.push(name.clone());
            values.push(value.clone());
        }
        tx.execute(&upsert_sql(resource_type, &names), &borrow_params(&values))
            .await?;

        let history_sql = format!(
            "INSERT INTO {} (\"versionId\", \"id\", \"content\", \"lastUpdated\") VALUES ($1, $2, $3, $4)",
            quote_ident(&format!("{}_History", resource_type))
        );
        tx.execute(&history_sql, &[&version_id, &id, &content, &now])
            .await?;

        self.clear_derived_rows(tx, resource_type, id).await?;
        self.insert_derived_rows(tx, resource_type, id, &indexed).await?;
        Ok(())
    }

    /// Deletes reference and lookup rows for a resource.
    async fn clear_derived_rows(
        &self,
        tx: &deadpool_postgres::Transaction<'_>,
        resource_type: &str,
        id: Uuid,
    ) -> StorageResult<()> {
        let references_sql = format!(
            "DELETE FROM {} WHERE \"resourceId\" = $1",
            quote_ident(&format!("{}_References", resource_type))
        );
        tx.execute(&references_sql, &[&id]).await?;

        for table in LookupTable::all() {
            let sql = format!(
                "DELETE FROM {} WHERE \"resourceId\" = $1",
                quote_ident(table.table_name())
            );
            tx.execute(&sql, &[&id]).await?;
        }
        Ok(())
    }

    /// Inserts reference and lookup rows for a snapshot.
    async fn insert_derived_rows(
        &self,
        tx: &deadpool_postgres::Transaction<'_>,
        resource_type: &str,
        id: Uuid,
        indexed: &IndexedRows,
    ) -> StorageResult<()> {
        let references_sql = format!(
            "INSERT INTO {} (\"resourceId\", \"targetId\", \"code\") VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
            quote_ident(&format!("{}_References", resource_type))
        );
        for row in &indexed.reference_rows {
            tx.execute(&references_sql, &[&id, &row.target_id, &row.code])
                .await?;
        }

        for row in &indexed.lookup_rows {
            let columns = row.table.columns();
            let mut sql = format!(
                "INSERT INTO {} (\"resourceId\"",
                quote_ident(row.table.table_name())
            );
            for column in columns {
                sql.push_str(", ");
                sql.push_str(&quote_ident(column));
            }
            sql.push_str(") VALUES ($1");
            for i in 0..columns.len() {
                sql.push_str(&format!(", ${}", i + 2));
            }
            sql.push(')');

            let mut params: Vec<SqlValue> = vec![SqlValue::Uuid(id)];
            params.extend(row.values.iter().map(|v| SqlValue::TextOpt(v.clone())));
            tx.execute(&sql, &borrow_params(&params)).await?;
        }
        Ok(())
    }

    /// `SELECT ... FOR UPDATE` on a main row.
    async fn lock_row(
        &self,
        tx: &deadpool_postgres::Transaction<'_>,
        resource_type: &str,
        id: Uuid,
    ) -> StorageResult<Option<LockedRow>> {
        let sql = format!(
            "SELECT \"content\", \"deleted\", \"lastUpdated\", \"projectId\" FROM {} WHERE \"id\" = $1 FOR UPDATE",
            quote_ident(resource_type)
        );
        let row = tx.query_opt(&sql, &[&id]).await?;
        Ok(row.map(|row| {
            let content: String = row.get(0);
            let version_id = serde_json::from_str::<serde_json::Value>(&content)
                .ok()
                .and_then(|v| {
                    v.get("meta")
                        .and_then(|m| m.get("versionId"))
                        .and_then(|v| v.as_str())
                        .and_then(|s| Uuid::parse_str(s).ok())
                });
            LockedRow {
                content,
                deleted: row.get(1),
                last_updated: row.get(2),
                project_id: row.get(3),
                version_id,
            }
        }))
    }

    /// Runs a search inside a transaction with row locks on the matches.
    pub(crate) async fn search_for_update(
        &self,
        tx: &deadpool_postgres::Transaction<'_>,
        ctx: &ProjectContext,
        request: &SearchRequest,
    ) -> StorageResult<Vec<Resource>> {
        ensure_resource_type(&request.resource_type)?;
        let planner = QueryPlanner::new(&self.registry);
        let planned = planner.plan(request, ctx.project_id())?;
        let sql = format!("{} FOR UPDATE", planned.sql);
        let rows = tx.query(&sql, &borrow_params(&planned.params)).await?;
        rows.iter()
            .map(|row| decode_content(&row.get::<_, String>(1)))
            .collect()
    }

    /// Instance-level visibility check shared by vread and history.
    async fn check_instance_visible(
        &self,
        client: &deadpool_postgres::Client,
        ctx: &ProjectContext,
        resource_type: &str,
        id: Uuid,
    ) -> StorageResult<()> {
        if ctx.is_system() {
            return Ok(());
        }
        let sql = format!(
            "SELECT \"projectId\" FROM {} WHERE \"id\" = $1",
            quote_ident(resource_type)
        );
        let row = client
            .query_opt(&sql, &[&id])
            .await?
            .ok_or_else(|| StorageError::not_found(resource_type, &id))?;
        let project_id: Option<Uuid> = row.get(0);
        if !visible_in(ctx, project_id) {
            return Err(StorageError::not_found(resource_type, &id));
        }
        Ok(())
    }

    /// Post-commit fan-out: subscriptions then audit, both best-effort.
    pub(crate) async fn after_commit(
        &self,
        ctx: &ProjectContext,
        resource: &Resource,
        op: WriteOperation,
    ) {
        let engine = self.subscriptions.read().clone();
        if let Some(engine) = engine {
            if resource.resource_type() == "Subscription" {
                engine.on_subscription_written(resource, op);
            }
            engine.evaluate(resource, op);
        }

        if let (Some(id), Some(version_id)) = (
            resource.id().and_then(|id| Uuid::parse_str(id).ok()),
            resource.version_id().and_then(|v| Uuid::parse_str(v).ok()),
        ) {
            let event =
                AuditEvent::for_write(ctx, op, resource.resource_type(), id, version_id);
            self.audit.record(event).await;
        }
    }
}

/// Row image captured under the row lock.
struct LockedRow {
    content: String,
    deleted: bool,
    last_updated: DateTime<Utc>,
    project_id: Option<Uuid>,
    version_id: Option<Uuid>,
}

/// Base (non-generated) main-table column names, in insert order.
fn base_column_names(resource_type: &str) -> Vec<String> {
    let mut names = vec![
        "id".to_string(),
        "content".to_string(),
        "lastUpdated".to_string(),
        "deleted".to_string(),
        "projectId".to_string(),
        "__version".to_string(),
        "_source".to_string(),
        "_profile".to_string(),
    ];
    if resource_type != BLOB_TYPE {
        names.push("compartments".to_string());
    }
    names
}

/// `INSERT ... ON CONFLICT ("id") DO UPDATE` over the given columns.
fn upsert_sql(resource_type: &str, names: &[String]) -> String {
    let quoted: Vec<String> = names.iter().map(|n| quote_ident(n)).collect();
    let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("${}", i)).collect();
    let updates: Vec<String> = names
        .iter()
        .skip(1)
        .map(|n| format!("{} = EXCLUDED.{}", quote_ident(n), quote_ident(n)))
        .collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT (\"id\") DO UPDATE SET {}",
        quote_ident(resource_type),
        quoted.join(", "),
        placeholders.join(", "),
        updates.join(", ")
    )
}

/// A typed NULL for clearing a generated column.
fn null_value(column_type: ColumnType) -> SqlValue {
    match column_type {
        ColumnType::Text => SqlValue::TextOpt(None),
        ColumnType::TextArray => SqlValue::TextArrayOpt(None),
        ColumnType::Timestamp => SqlValue::TimestampOpt(None),
        ColumnType::Double => SqlValue::DoubleOpt(None),
        ColumnType::Uuid => SqlValue::UuidOpt(None),
        ColumnType::UuidArray => SqlValue::UuidArrayOpt(None),
    }
}

/// Strict monotonicity of `lastUpdated` within an id.
fn monotonic(now: DateTime<Utc>, previous: DateTime<Utc>) -> DateTime<Utc> {
    if now > previous {
        now
    } else {
        previous + Duration::milliseconds(1)
    }
}

fn visible_in(ctx: &ProjectContext, row_project: Option<Uuid>) -> bool {
    match ctx.project_id() {
        None => true,
        Some(project) => row_project == Some(project),
    }
}

pub(crate) fn ensure_resource_type(resource_type: &str) -> StorageResult<()> {
    if schema::is_resource_type(resource_type) {
        Ok(())
    } else {
        Err(StorageError::Validation(
            ValidationError::UnsupportedResourceType {
                resource_type: resource_type.to_string(),
            },
        ))
    }
}

fn decode_content(content: &str) -> StorageResult<Resource> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    Ok(Resource::from_value(value)?)
}

fn decode_history_row(row: &tokio_postgres::Row) -> StorageResult<HistoryEntry> {
    let content: String = row.get(2);
    let resource = if content.is_empty() {
        None
    } else {
        Some(decode_content(&content)?)
    };
    Ok(HistoryEntry {
        version_id: row.get(0),
        id: row.get(1),
        resource,
        last_updated: row.get(3),
    })
}

fn internal(message: &str) -> StorageError {
    StorageError::Backend(BackendError::QueryError {
        message: message.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_sql_shape() {
        let names = base_column_names("Patient");
        let sql = upsert_sql("Patient", &names);
        assert!(sql.starts_with("INSERT INTO \"Patient\" (\"id\", \"content\""));
        assert!(sql.contains("ON CONFLICT (\"id\") DO UPDATE SET"));
        assert!(sql.contains("\"content\" = EXCLUDED.\"content\""));
        // The conflict key is never updated.
        assert!(!sql.contains("\"id\" = EXCLUDED.\"id\""));
    }

    #[test]
    fn test_base_columns_blob_kind() {
        assert!(base_column_names("Patient").contains(&"compartments".to_string()));
        assert!(!base_column_names(BLOB_TYPE).contains(&"compartments".to_string()));
    }

    #[test]
    fn test_monotonic_last_updated() {
        let earlier = Utc::now();
        let later = earlier + Duration::seconds(5);
        // Clock moved forward: keep now.
        assert_eq!(monotonic(later, earlier), later);
        // Clock stalled or went backwards: bump past the previous write.
        let bumped = monotonic(earlier, later);
        assert!(bumped > later);
    }

    #[test]
    fn test_visibility() {
        let project = Uuid::new_v4();
        let ctx = ProjectContext::new(project);
        assert!(visible_in(&ctx, Some(project)));
        assert!(!visible_in(&ctx, Some(Uuid::new_v4())));
        assert!(!visible_in(&ctx, None));
        assert!(visible_in(&ProjectContext::system(), Some(project)));
    }

    #[test]
    fn test_ensure_resource_type() {
        assert!(ensure_resource_type("Patient").is_ok());
        assert!(matches!(
            ensure_resource_type("Widget"),
            Err(StorageError::Validation(
                ValidationError::UnsupportedResourceType { .. }
            ))
        ));
    }

    #[test]
    fn test_config_defaults() {
        let config = PostgresConfig::default();
        assert_eq!(config.port, 5432);
        assert_eq!(config.dbname, "atrium");
        assert!(config.cache_capacity > 0);
    }
}
