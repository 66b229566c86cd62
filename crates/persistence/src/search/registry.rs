//! Search parameter registry.
//!
//! The registry is the catalog of declared search parameters, indexed by
//! (resource type, code) with a fallback to the kind-independent special
//! parameters. It is built during initialization and read-only thereafter;
//! every write-path and plan-path decision about a parameter goes through
//! its [`SearchParameterImpl`].

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::SearchParamType;

use super::builtin;

/// The four process-wide lookup tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LookupTable {
    /// Name-like values.
    HumanName,
    /// Address-like values.
    Address,
    /// Contact-point-like values.
    ContactPoint,
    /// Identifier-like values.
    Identifier,
}

impl LookupTable {
    /// The persisted table name.
    pub fn table_name(&self) -> &'static str {
        match self {
            LookupTable::HumanName => "HumanName",
            LookupTable::Address => "Address",
            LookupTable::ContactPoint => "ContactPoint",
            LookupTable::Identifier => "Identifier",
        }
    }

    /// The queryable columns of the table, excluding `resourceId`.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            LookupTable::HumanName => &["name", "given", "family"],
            LookupTable::Address => &["address", "city", "country", "postalCode", "state", "use"],
            LookupTable::ContactPoint => &["system", "value", "use"],
            LookupTable::Identifier => &["system", "value"],
        }
    }

    /// All lookup tables.
    pub fn all() -> [LookupTable; 4] {
        [
            LookupTable::HumanName,
            LookupTable::Address,
            LookupTable::ContactPoint,
            LookupTable::Identifier,
        ]
    }
}

/// How a parameter's extracted values are stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum IndexStrategy {
    /// A single generated column on the main row.
    Column,
    /// The token triad: hash array, text array, and sort column.
    TokenColumn,
    /// A sort column on the main row plus rows in a shared lookup table.
    Lookup {
        /// Which shared table receives the rows.
        table: LookupTable,
        /// The lookup column this parameter queries.
        column: &'static str,
    },
}

/// Canonical relational type of a generated column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    /// TEXT
    Text,
    /// TEXT[]
    TextArray,
    /// TIMESTAMPTZ
    Timestamp,
    /// DOUBLE PRECISION
    Double,
    /// UUID
    Uuid,
    /// UUID[]
    UuidArray,
}

impl ColumnType {
    /// Renders the type for DDL.
    pub fn ddl(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::TextArray => "TEXT[]",
            ColumnType::Timestamp => "TIMESTAMPTZ",
            ColumnType::Double => "DOUBLE PRECISION",
            ColumnType::Uuid => "UUID",
            ColumnType::UuidArray => "UUID[]",
        }
    }
}

/// Declared implementation of one search parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchParameterImpl {
    /// Parameter code (the URL param name).
    pub code: String,
    /// The parameter type.
    pub param_type: SearchParamType,
    /// Extraction expression (restricted path grammar).
    pub expression: String,
    /// Resource types this parameter applies to.
    pub resource_types: Vec<String>,
    /// Storage strategy.
    pub strategy: IndexStrategy,
    /// Suffix used to name generated columns.
    pub column_name: String,
    /// Canonical type of the value column (Column strategy only).
    pub column_type: ColumnType,
    /// Whether the source can yield multiple values.
    pub array: bool,
}

impl SearchParameterImpl {
    /// Creates a parameter definition; the column name defaults to the
    /// camel-cased code.
    pub fn new(
        code: impl Into<String>,
        param_type: SearchParamType,
        expression: impl Into<String>,
        strategy: IndexStrategy,
        column_type: ColumnType,
    ) -> Self {
        let code = code.into();
        let column_name = column_name_for_code(&code);
        Self {
            code,
            param_type,
            expression: expression.into(),
            resource_types: Vec::new(),
            strategy,
            column_name,
            column_type,
            array: false,
        }
    }

    /// Sets the resource types.
    pub fn with_base<I, S>(mut self, base: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resource_types = base.into_iter().map(Into::into).collect();
        self
    }

    /// Overrides the generated column name.
    pub fn with_column_name(mut self, name: impl Into<String>) -> Self {
        self.column_name = name.into();
        self
    }

    /// Marks the source as multi-valued.
    pub fn with_array(mut self) -> Self {
        self.array = true;
        self
    }

    /// The generated main-row columns for this parameter, in order.
    pub fn columns(&self) -> Vec<(String, ColumnType)> {
        match &self.strategy {
            IndexStrategy::Column => {
                let column_type = if self.array && self.column_type == ColumnType::Text {
                    ColumnType::TextArray
                } else {
                    self.column_type
                };
                vec![(self.column_name.clone(), column_type)]
            }
            IndexStrategy::TokenColumn => vec![
                (format!("__{}", self.column_name), ColumnType::UuidArray),
                (format!("__{}Text", self.column_name), ColumnType::TextArray),
                (format!("__{}Sort", self.column_name), ColumnType::Text),
            ],
            IndexStrategy::Lookup { .. } => {
                vec![(format!("__{}Sort", self.column_name), ColumnType::Text)]
            }
        }
    }

    /// The sort column used by ORDER BY for this parameter.
    pub fn sort_column(&self) -> String {
        match &self.strategy {
            IndexStrategy::Column => self.column_name.clone(),
            IndexStrategy::TokenColumn | IndexStrategy::Lookup { .. } => {
                format!("__{}Sort", self.column_name)
            }
        }
    }
}

/// Derives a column name from a parameter code: `address-city` becomes
/// `addressCity`.
pub fn column_name_for_code(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    let mut upper_next = false;
    for ch in code.chars() {
        match ch {
            '-' | '_' => upper_next = true,
            _ if upper_next => {
                out.extend(ch.to_uppercase());
                upper_next = false;
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Codes of the kind-independent special parameters.
pub const SPECIAL_CODES: &[&str] = &[
    "_id",
    "_lastUpdated",
    "_profile",
    "_source",
    "_tag",
    "_security",
    "_compartment",
];

/// Indexed catalog of declared search parameters.
///
/// Built once at startup; read-only thereafter. At most one impl is
/// registered per (resource type, code).
pub struct SearchParameterRegistry {
    params_by_type: HashMap<String, HashMap<String, Arc<SearchParameterImpl>>>,
    specials: HashMap<String, Arc<SearchParameterImpl>>,
}

impl SearchParameterRegistry {
    /// Creates a registry preloaded with the builtin parameter catalog.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        for param in builtin::builtin_parameters() {
            registry.register(param);
        }
        registry
    }

    /// Creates an empty registry (tests and administrative re-indexing).
    pub fn empty() -> Self {
        let mut specials = HashMap::new();
        for code in SPECIAL_CODES {
            // The planner addresses fixed columns for these directly; the
            // type matters for parsing (prefix lifting on _lastUpdated).
            let param_type = match *code {
                "_lastUpdated" => SearchParamType::Date,
                "_tag" | "_security" => SearchParamType::Token,
                _ => SearchParamType::Special,
            };
            let param = SearchParameterImpl::new(
                *code,
                param_type,
                "",
                IndexStrategy::Column,
                ColumnType::Text,
            );
            specials.insert((*code).to_string(), Arc::new(param));
        }
        Self {
            params_by_type: HashMap::new(),
            specials,
        }
    }

    /// Registers a parameter under each of its resource types. A later
    /// registration for the same (kind, code) replaces the earlier one.
    pub fn register(&mut self, param: SearchParameterImpl) {
        let param = Arc::new(param);
        for resource_type in &param.resource_types {
            self.params_by_type
                .entry(resource_type.clone())
                .or_default()
                .insert(param.code.clone(), Arc::clone(&param));
        }
    }

    /// Looks up a parameter by (resource type, code), falling back to the
    /// kind-independent specials.
    pub fn get(&self, resource_type: &str, code: &str) -> Option<Arc<SearchParameterImpl>> {
        self.params_by_type
            .get(resource_type)
            .and_then(|params| params.get(code))
            .cloned()
            .or_else(|| self.specials.get(code).cloned())
    }

    /// All declared parameters for a resource type, excluding specials.
    pub fn params_for(&self, resource_type: &str) -> Vec<Arc<SearchParameterImpl>> {
        self.params_by_type
            .get(resource_type)
            .map(|params| {
                let mut list: Vec<_> = params.values().cloned().collect();
                list.sort_by(|a, b| a.code.cmp(&b.code));
                list
            })
            .unwrap_or_default()
    }

    /// Resource types with at least one declared parameter.
    pub fn resource_types(&self) -> Vec<String> {
        let mut types: Vec<_> = self.params_by_type.keys().cloned().collect();
        types.sort();
        types
    }
}

impl Default for SearchParameterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SearchParameterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchParameterRegistry")
            .field("resource_types", &self.params_by_type.len())
            .finish()
    }
}
