//! Schema model and DDL management.
//!
//! Describes the persisted layout: one main table, one history table, and
//! one references table per kind, plus the four process-wide lookup
//! tables. The main table carries the resource content at its latest
//! version together with every generated search column; history is append
//! only; references and lookup rows are rewritten on every write.

use crate::error::{BackendError, StorageError, StorageResult};
use crate::search::registry::{ColumnType, SearchParameterRegistry};
use crate::search::LookupTable;
use crate::sql::quote_ident;

/// Revision of the indexing schema; stored per row in `__version`.
pub const SCHEMA_VERSION: i32 = 1;

/// The kinds the server persists.
pub const RESOURCE_TYPES: &[&str] = &[
    "Patient",
    "Practitioner",
    "Organization",
    "Observation",
    "Condition",
    "Encounter",
    "DiagnosticReport",
    "ServiceRequest",
    "RiskAssessment",
    "Subscription",
    "Project",
    "Binary",
];

/// The opaque-blob kind; carries no compartments column.
pub const BLOB_TYPE: &str = "Binary";

/// Kinds searched by `$everything` for a Patient compartment.
pub const PATIENT_COMPARTMENT_TYPES: &[&str] = &[
    "Observation",
    "Condition",
    "Encounter",
    "DiagnosticReport",
    "ServiceRequest",
    "RiskAssessment",
];

/// Returns whether a kind is persisted by this server.
pub fn is_resource_type(kind: &str) -> bool {
    RESOURCE_TYPES.contains(&kind)
}

/// The fixed metadata search columns present on every main table.
pub fn metadata_columns() -> Vec<(String, ColumnType)> {
    vec![
        ("__tag".to_string(), ColumnType::UuidArray),
        ("__tagText".to_string(), ColumnType::TextArray),
        ("__tagSort".to_string(), ColumnType::Text),
        ("__security".to_string(), ColumnType::UuidArray),
        ("__securityText".to_string(), ColumnType::TextArray),
        ("__securitySort".to_string(), ColumnType::Text),
        ("__sharedTokens".to_string(), ColumnType::UuidArray),
        ("__sharedTokensText".to_string(), ColumnType::TextArray),
    ]
}

/// Describes the tables and generated columns for the registered kinds.
pub struct SchemaModel<'a> {
    registry: &'a SearchParameterRegistry,
}

impl<'a> SchemaModel<'a> {
    /// Creates a schema model over a registry.
    pub fn new(registry: &'a SearchParameterRegistry) -> Self {
        Self { registry }
    }

    /// The generated search columns of a kind's main table, deduplicated
    /// by name (alias parameters share columns), metadata columns last.
    pub fn search_columns(&self, resource_type: &str) -> Vec<(String, ColumnType)> {
        let mut columns: Vec<(String, ColumnType)> = Vec::new();
        for param in self.registry.params_for(resource_type) {
            for (name, column_type) in param.columns() {
                if !columns.iter().any(|(existing, _)| *existing == name) {
                    columns.push((name, column_type));
                }
            }
        }
        columns.extend(metadata_columns());
        columns
    }

    /// DDL for a kind's main table.
    pub fn main_table_ddl(&self, resource_type: &str) -> String {
        let mut ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \"id\" UUID PRIMARY KEY,\n    \"content\" TEXT NOT NULL,\n    \"lastUpdated\" TIMESTAMPTZ NOT NULL,\n    \"deleted\" BOOLEAN NOT NULL DEFAULT FALSE,\n    \"projectId\" UUID,\n    \"__version\" INTEGER NOT NULL,\n    \"_source\" TEXT,\n    \"_profile\" TEXT[]",
            quote_ident(resource_type)
        );
        if resource_type != BLOB_TYPE {
            ddl.push_str(",\n    \"compartments\" UUID[] NOT NULL DEFAULT '{}'");
        }
        for (name, column_type) in self.search_columns(resource_type) {
            ddl.push_str(",\n    ");
            ddl.push_str(&quote_ident(&name));
            ddl.push(' ');
            ddl.push_str(column_type.ddl());
        }
        ddl.push_str("\n)");
        ddl
    }

    /// DDL for a kind's history table.
    pub fn history_table_ddl(&self, resource_type: &str) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \"versionId\" UUID PRIMARY KEY,\n    \"id\" UUID NOT NULL,\n    \"content\" TEXT NOT NULL,\n    \"lastUpdated\" TIMESTAMPTZ NOT NULL\n)",
            quote_ident(&format!("{}_History", resource_type))
        )
    }

    /// DDL for a kind's references table.
    pub fn references_table_ddl(&self, resource_type: &str) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \"resourceId\" UUID NOT NULL,\n    \"targetId\" UUID NOT NULL,\n    \"code\" TEXT NOT NULL,\n    PRIMARY KEY (\"resourceId\", \"targetId\", \"code\")\n)",
            quote_ident(&format!("{}_References", resource_type))
        )
    }

    /// DDL for a shared lookup table. Lookup rows have no primary key;
    /// they are bulk-rewritten on every write.
    pub fn lookup_table_ddl(&self, table: LookupTable) -> String {
        let mut ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \"resourceId\" UUID NOT NULL",
            quote_ident(table.table_name())
        );
        for column in table.columns() {
            ddl.push_str(",\n    ");
            ddl.push_str(&quote_ident(column));
            ddl.push_str(" TEXT");
        }
        ddl.push_str("\n)");
        ddl
    }

    /// Index DDL for a kind.
    pub fn index_ddl(&self, resource_type: &str) -> Vec<String> {
        let table = quote_ident(resource_type);
        let mut indexes = vec![
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} (\"lastUpdated\")",
                quote_ident(&format!("{}_lastUpdated_idx", resource_type)),
                table
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} (\"projectId\", \"lastUpdated\")",
                quote_ident(&format!("{}_projectId_lastUpdated_idx", resource_type)),
                table
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} (\"projectId\")",
                quote_ident(&format!("{}_projectId_idx", resource_type)),
                table
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} (\"_source\")",
                quote_ident(&format!("{}_source_idx", resource_type)),
                table
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} USING gin (\"_profile\")",
                quote_ident(&format!("{}_profile_idx", resource_type)),
                table
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} (\"__version\")",
                quote_ident(&format!("{}_version_idx", resource_type)),
                table
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} (\"lastUpdated\", \"__version\") WHERE \"deleted\" = false",
                quote_ident(&format!("{}_reindex_idx", resource_type)),
                table
            ),
        ];
        if resource_type != BLOB_TYPE {
            indexes.push(format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} USING gin (\"compartments\")",
                quote_ident(&format!("{}_compartments_idx", resource_type)),
                table
            ));
        }
        for (name, column_type) in self.search_columns(resource_type) {
            let index_name = quote_ident(&format!("{}_{}_idx", resource_type, name));
            let column = quote_ident(&name);
            let ddl = match column_type {
                ColumnType::TextArray | ColumnType::UuidArray => format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {} USING gin ({})",
                    index_name, table, column
                ),
                ColumnType::Text if name.ends_with("Sort") => format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {} USING gin ({} gin_trgm_ops)",
                    index_name, table, column
                ),
                _ => format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                    index_name, table, column
                ),
            };
            indexes.push(ddl);
        }
        indexes.push(format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} (\"id\", \"lastUpdated\" DESC)",
            quote_ident(&format!("{}_History_id_idx", resource_type)),
            quote_ident(&format!("{}_History", resource_type))
        ));
        indexes.push(format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} (\"targetId\", \"code\")",
            quote_ident(&format!("{}_References_target_idx", resource_type)),
            quote_ident(&format!("{}_References", resource_type))
        ));
        indexes
    }

    /// Index DDL for a shared lookup table.
    pub fn lookup_index_ddl(&self, table: LookupTable) -> Vec<String> {
        let name = table.table_name();
        let mut indexes = vec![format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} (\"resourceId\")",
            quote_ident(&format!("{}_resourceId_idx", name)),
            quote_ident(name)
        )];
        for column in table.columns() {
            indexes.push(format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} USING gin ({} gin_trgm_ops)",
                quote_ident(&format!("{}_{}_idx", name, column)),
                quote_ident(name),
                quote_ident(column)
            ));
        }
        indexes
    }
}

/// Initializes the full schema on a pooled client. Idempotent.
pub async fn initialize_schema(
    client: &deadpool_postgres::Client,
    registry: &SearchParameterRegistry,
) -> StorageResult<()> {
    let model = SchemaModel::new(registry);

    client
        .execute("CREATE EXTENSION IF NOT EXISTS pg_trgm", &[])
        .await
        .map_err(|e| ddl_error(format!("failed to enable pg_trgm: {}", e)))?;

    client
        .execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
            &[],
        )
        .await
        .map_err(|e| ddl_error(format!("failed to create schema_version: {}", e)))?;

    for resource_type in RESOURCE_TYPES {
        for ddl in [
            model.main_table_ddl(resource_type),
            model.history_table_ddl(resource_type),
            model.references_table_ddl(resource_type),
        ] {
            client
                .execute(&ddl, &[])
                .await
                .map_err(|e| ddl_error(format!("failed to create {} tables: {}", resource_type, e)))?;
        }
    }

    for table in LookupTable::all() {
        client
            .execute(&model.lookup_table_ddl(table), &[])
            .await
            .map_err(|e| {
                ddl_error(format!(
                    "failed to create lookup table {}: {}",
                    table.table_name(),
                    e
                ))
            })?;
    }

    for resource_type in RESOURCE_TYPES {
        for ddl in model.index_ddl(resource_type) {
            client
                .execute(&ddl, &[])
                .await
                .map_err(|e| ddl_error(format!("failed to create index: {}", e)))?;
        }
    }
    for table in LookupTable::all() {
        for ddl in model.lookup_index_ddl(table) {
            client
                .execute(&ddl, &[])
                .await
                .map_err(|e| ddl_error(format!("failed to create lookup index: {}", e)))?;
        }
    }

    client
        .execute("DELETE FROM schema_version", &[])
        .await
        .map_err(|e| ddl_error(format!("failed to clear schema_version: {}", e)))?;
    client
        .execute(
            "INSERT INTO schema_version (version) VALUES ($1)",
            &[&SCHEMA_VERSION],
        )
        .await
        .map_err(|e| ddl_error(format!("failed to set schema_version: {}", e)))?;

    Ok(())
}

fn ddl_error(message: String) -> StorageError {
    StorageError::Backend(BackendError::QueryError { message })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_registry() -> SearchParameterRegistry {
        SearchParameterRegistry::new()
    }

    #[test]
    fn test_main_table_ddl_shape() {
        let registry = model_registry();
        let model = SchemaModel::new(&registry);
        let ddl = model.main_table_ddl("Patient");

        assert!(ddl.starts_with("CREATE TABLE IF NOT EXISTS \"Patient\""));
        assert!(ddl.contains("\"id\" UUID PRIMARY KEY"));
        assert!(ddl.contains("\"lastUpdated\" TIMESTAMPTZ NOT NULL"));
        assert!(ddl.contains("\"compartments\" UUID[]"));
        assert!(ddl.contains("\"birthdate\" TIMESTAMPTZ"));
        assert!(ddl.contains("\"__genderText\" TEXT[]"));
        assert!(ddl.contains("\"__sharedTokensText\" TEXT[]"));
    }

    #[test]
    fn test_blob_kind_has_no_compartments() {
        let registry = model_registry();
        let model = SchemaModel::new(&registry);
        let ddl = model.main_table_ddl("Binary");
        assert!(!ddl.contains("compartments"));
    }

    #[test]
    fn test_history_and_references_ddl() {
        let registry = model_registry();
        let model = SchemaModel::new(&registry);

        let history = model.history_table_ddl("Patient");
        assert!(history.contains("\"Patient_History\""));
        assert!(history.contains("\"versionId\" UUID PRIMARY KEY"));

        let references = model.references_table_ddl("Patient");
        assert!(references.contains("\"Patient_References\""));
        assert!(references.contains("PRIMARY KEY (\"resourceId\", \"targetId\", \"code\")"));
    }

    #[test]
    fn test_lookup_table_ddl() {
        let registry = model_registry();
        let model = SchemaModel::new(&registry);
        let ddl = model.lookup_table_ddl(LookupTable::Address);
        assert!(ddl.contains("\"Address\""));
        assert!(ddl.contains("\"postalCode\" TEXT"));
        // No primary key on lookup tables.
        assert!(!ddl.contains("PRIMARY KEY"));
    }

    #[test]
    fn test_index_ddl_covers_column_kinds() {
        let registry = model_registry();
        let model = SchemaModel::new(&registry);
        let indexes = model.index_ddl("Patient").join("\n");

        assert!(indexes.contains("USING gin (\"compartments\")"));
        assert!(indexes.contains("USING gin (\"__identifierText\")"));
        assert!(indexes.contains("gin_trgm_ops"));
        assert!(indexes.contains("WHERE \"deleted\" = false"));
        assert!(indexes.contains("\"Patient_History_id_idx\""));
        assert!(indexes.contains("\"Patient_References_target_idx\""));
    }

    #[test]
    fn test_alias_columns_deduplicated() {
        let registry = model_registry();
        let model = SchemaModel::new(&registry);
        let columns = model.search_columns("Observation");
        let subject_count = columns.iter().filter(|(n, _)| n == "subject").count();
        assert_eq!(subject_count, 1);
    }
}
