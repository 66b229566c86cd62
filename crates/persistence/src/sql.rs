//! Parameterized SQL composition.
//!
//! Statements are built as SQL text plus an ordered vector of [`SqlValue`]
//! parameters. [`SqlBuilder`] hands out `$N` placeholders as values are
//! pushed, so composed fragments (including recursive chain subqueries)
//! always number their parameters consistently.

use chrono::{DateTime, Utc};
use tokio_postgres::types::ToSql;
use uuid::Uuid;

/// A SQL parameter value.
///
/// Optional variants bind as typed NULLs on the write path, where most
/// search columns are nullable.
#[derive(Debug, Clone)]
pub enum SqlValue {
    /// Text parameter.
    Text(String),
    /// Nullable text parameter.
    TextOpt(Option<String>),
    /// Text array parameter.
    TextArray(Vec<String>),
    /// Nullable text array parameter.
    TextArrayOpt(Option<Vec<String>>),
    /// UUID parameter.
    Uuid(Uuid),
    /// Nullable UUID parameter.
    UuidOpt(Option<Uuid>),
    /// UUID array parameter.
    UuidArray(Vec<Uuid>),
    /// Nullable UUID array parameter.
    UuidArrayOpt(Option<Vec<Uuid>>),
    /// Timestamp parameter.
    Timestamp(DateTime<Utc>),
    /// Nullable timestamp parameter.
    TimestampOpt(Option<DateTime<Utc>>),
    /// Floating point parameter.
    Double(f64),
    /// Nullable floating point parameter.
    DoubleOpt(Option<f64>),
    /// 64-bit integer parameter (LIMIT/OFFSET contexts).
    Integer(i64),
    /// 32-bit integer parameter (INTEGER columns).
    Int(i32),
    /// Boolean parameter.
    Bool(bool),
}

impl SqlValue {
    /// Borrows the value as a driver parameter.
    pub fn as_sql(&self) -> &(dyn ToSql + Sync) {
        match self {
            SqlValue::Text(v) => v,
            SqlValue::TextOpt(v) => v,
            SqlValue::TextArray(v) => v,
            SqlValue::TextArrayOpt(v) => v,
            SqlValue::Uuid(v) => v,
            SqlValue::UuidOpt(v) => v,
            SqlValue::UuidArray(v) => v,
            SqlValue::UuidArrayOpt(v) => v,
            SqlValue::Timestamp(v) => v,
            SqlValue::TimestampOpt(v) => v,
            SqlValue::Double(v) => v,
            SqlValue::DoubleOpt(v) => v,
            SqlValue::Integer(v) => v,
            SqlValue::Int(v) => v,
            SqlValue::Bool(v) => v,
        }
    }

    /// Creates a text parameter.
    pub fn text(s: impl Into<String>) -> Self {
        SqlValue::Text(s.into())
    }
}

/// Borrows a parameter vector as the driver's slice type.
pub fn borrow_params(params: &[SqlValue]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(SqlValue::as_sql).collect()
}

/// Accumulates SQL text and parameters, handing out `$N` placeholders.
#[derive(Debug, Default)]
pub struct SqlBuilder {
    sql: String,
    params: Vec<SqlValue>,
}

impl SqlBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends raw SQL text.
    pub fn push(&mut self, sql: &str) {
        self.sql.push_str(sql);
    }

    /// Registers a parameter and appends its `$N` placeholder.
    pub fn push_param(&mut self, value: SqlValue) {
        self.params.push(value);
        self.sql.push('$');
        self.sql.push_str(&self.params.len().to_string());
    }

    /// Registers a parameter and returns its placeholder without appending.
    pub fn bind(&mut self, value: SqlValue) -> String {
        self.params.push(value);
        format!("${}", self.params.len())
    }

    /// Appends a quoted identifier.
    pub fn push_ident(&mut self, ident: &str) {
        self.sql.push('"');
        self.sql.push_str(ident);
        self.sql.push('"');
    }

    /// Finishes the builder.
    pub fn build(self) -> (String, Vec<SqlValue>) {
        (self.sql, self.params)
    }

    /// The SQL accumulated so far.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// The number of parameters registered so far.
    pub fn param_count(&self) -> usize {
        self.params.len()
    }
}

/// Quotes an identifier for interpolation into SQL text.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident)
}

/// Joins multiple condition strings with a separator, parenthesizing when
/// more than one.
pub fn join_conditions(conditions: &[String], separator: &str) -> String {
    match conditions.len() {
        0 => String::new(),
        1 => conditions[0].clone(),
        _ => format!("({})", conditions.join(separator)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_numbering() {
        let mut builder = SqlBuilder::new();
        builder.push("SELECT 1 WHERE a = ");
        builder.push_param(SqlValue::text("x"));
        builder.push(" AND b = ");
        builder.push_param(SqlValue::Integer(2));
        let (sql, params) = builder.build();
        assert_eq!(sql, "SELECT 1 WHERE a = $1 AND b = $2");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_bind_without_append() {
        let mut builder = SqlBuilder::new();
        let p1 = builder.bind(SqlValue::text("x"));
        let p2 = builder.bind(SqlValue::text("y"));
        assert_eq!(p1, "$1");
        assert_eq!(p2, "$2");
        assert_eq!(builder.param_count(), 2);
    }

    #[test]
    fn test_push_ident() {
        let mut builder = SqlBuilder::new();
        builder.push("SELECT ");
        builder.push_ident("lastUpdated");
        assert_eq!(builder.sql(), "SELECT \"lastUpdated\"");
    }

    #[test]
    fn test_join_conditions() {
        assert_eq!(join_conditions(&[], " OR "), "");
        assert_eq!(join_conditions(&["a = 1".to_string()], " OR "), "a = 1");
        assert_eq!(
            join_conditions(&["a = 1".to_string(), "b = 2".to_string()], " OR "),
            "(a = 1 OR b = 2)"
        );
    }
}
