//! SQL planning.
//!
//! Compiles a parsed [`SearchRequest`] into one parameterized SELECT:
//! WHERE fragments per filter (AND between filters, OR within a value
//! list), the unconditional soft-delete guard, project scoping, ORDER BY
//! from the sort rules, and LIMIT/OFFSET paging. A COUNT variant serves
//! `_total=accurate`.

use uuid::Uuid;

use crate::error::{SearchError, StorageError, StorageResult};
use crate::search::registry::{IndexStrategy, SearchParameterImpl, SearchParameterRegistry};
use crate::sql::{SqlBuilder, SqlValue, join_conditions, quote_ident};
use crate::types::{
    FilterValue, SearchFilter, SearchModifier, SearchParamType, SearchPrefix, SearchRequest,
    parse_partial_datetime,
};

/// A compiled, parameterized statement.
#[derive(Debug)]
pub struct PlannedQuery {
    /// The SQL text with `$N` placeholders.
    pub sql: String,
    /// The parameter values, in placeholder order.
    pub params: Vec<SqlValue>,
}

/// Compiles search requests against the parameter registry.
#[derive(Debug)]
pub struct QueryPlanner<'a> {
    registry: &'a SearchParameterRegistry,
}

impl<'a> QueryPlanner<'a> {
    /// Creates a planner.
    pub fn new(registry: &'a SearchParameterRegistry) -> Self {
        Self { registry }
    }

    /// Plans the row-fetching statement.
    pub fn plan(
        &self,
        request: &SearchRequest,
        project_id: Option<Uuid>,
    ) -> StorageResult<PlannedQuery> {
        let mut builder = SqlBuilder::new();
        builder.push("SELECT \"id\", \"content\" FROM ");
        builder.push_ident(&request.resource_type);
        builder.push(" WHERE ");
        let where_clause = self.build_where(&mut builder, request, project_id)?;
        builder.push(&where_clause);
        builder.push(" ORDER BY ");
        builder.push(&self.order_by(request));
        builder.push(" LIMIT ");
        builder.push_param(SqlValue::Integer(request.count as i64));
        builder.push(" OFFSET ");
        builder.push_param(SqlValue::Integer(request.offset as i64));

        let (sql, params) = builder.build();
        Ok(PlannedQuery { sql, params })
    }

    /// Plans the COUNT(*) variant with an identical WHERE clause.
    pub fn plan_count(
        &self,
        request: &SearchRequest,
        project_id: Option<Uuid>,
    ) -> StorageResult<PlannedQuery> {
        let mut builder = SqlBuilder::new();
        builder.push("SELECT COUNT(*)::BIGINT FROM ");
        builder.push_ident(&request.resource_type);
        builder.push(" WHERE ");
        let where_clause = self.build_where(&mut builder, request, project_id)?;
        builder.push(&where_clause);

        let (sql, params) = builder.build();
        Ok(PlannedQuery { sql, params })
    }

    fn build_where(
        &self,
        builder: &mut SqlBuilder,
        request: &SearchRequest,
        project_id: Option<Uuid>,
    ) -> StorageResult<String> {
        let mut conditions = vec!["\"deleted\" = false".to_string()];

        if let Some(project_id) = project_id {
            let placeholder = builder.bind(SqlValue::Uuid(project_id));
            conditions.push(format!("\"projectId\" = {}", placeholder));
        }

        if let Some(compartment) = request.compartment {
            let placeholder = builder.bind(SqlValue::UuidArray(vec![compartment]));
            conditions.push(format!("\"compartments\" @> {}", placeholder));
        }

        for filter in &request.filters {
            if let Some(condition) =
                self.filter_condition(builder, &request.resource_type, filter)?
            {
                conditions.push(condition);
            }
        }

        Ok(conditions.join(" AND "))
    }

    /// Builds the WHERE fragment for one filter.
    fn filter_condition(
        &self,
        builder: &mut SqlBuilder,
        resource_type: &str,
        filter: &SearchFilter,
    ) -> StorageResult<Option<String>> {
        match filter.code.as_str() {
            "_id" => {
                let conditions: Vec<String> = filter
                    .values
                    .iter()
                    .map(|v| {
                        let placeholder = builder.bind(SqlValue::text(&v.value));
                        format!("\"id\"::text = {}", placeholder)
                    })
                    .collect();
                return Ok(some_nonempty(join_conditions(&conditions, " OR ")));
            }
            "_lastUpdated" => {
                let conditions: Vec<String> = filter
                    .values
                    .iter()
                    .filter_map(|v| {
                        let instant = parse_partial_datetime(&v.value)?;
                        let placeholder = builder.bind(SqlValue::Timestamp(instant));
                        Some(format!(
                            "\"lastUpdated\" {} {}",
                            prefix_operator(v.prefix),
                            placeholder
                        ))
                    })
                    .collect();
                return Ok(some_nonempty(join_conditions(&conditions, " OR ")));
            }
            "_profile" => {
                let conditions: Vec<String> = filter
                    .values
                    .iter()
                    .map(|v| {
                        let placeholder = builder.bind(SqlValue::text(&v.value));
                        format!("{} = ANY(\"_profile\")", placeholder)
                    })
                    .collect();
                return Ok(some_nonempty(join_conditions(&conditions, " OR ")));
            }
            "_source" => {
                let conditions: Vec<String> = filter
                    .values
                    .iter()
                    .map(|v| {
                        let placeholder = builder.bind(SqlValue::text(&v.value));
                        format!("\"_source\" = {}", placeholder)
                    })
                    .collect();
                return Ok(some_nonempty(join_conditions(&conditions, " OR ")));
            }
            "_tag" => return Ok(self.token_condition(builder, "tag", filter)),
            "_security" => return Ok(self.token_condition(builder, "security", filter)),
            "_compartment" => {
                let conditions: Vec<String> = filter
                    .values
                    .iter()
                    .filter_map(|v| {
                        let id = Uuid::parse_str(&v.value).ok()?;
                        let placeholder = builder.bind(SqlValue::UuidArray(vec![id]));
                        Some(format!("\"compartments\" @> {}", placeholder))
                    })
                    .collect();
                return Ok(some_nonempty(join_conditions(&conditions, " OR ")));
            }
            _ => {}
        }

        let param = self
            .registry
            .get(resource_type, &filter.code)
            .ok_or_else(|| {
                StorageError::Search(SearchError::UnknownParameter {
                    resource_type: resource_type.to_string(),
                    code: filter.code.clone(),
                })
            })?;

        let condition = match param.param_type {
            SearchParamType::Token => self.token_condition(builder, &param.column_name, filter),
            SearchParamType::String => self.string_condition(builder, &param, filter),
            SearchParamType::Date => self.comparison_condition(builder, &param, filter, true),
            SearchParamType::Number | SearchParamType::Quantity => {
                self.comparison_condition(builder, &param, filter, false)
            }
            SearchParamType::Reference => self.reference_condition(builder, &param, filter)?,
            SearchParamType::Uri => self.uri_condition(builder, &param, filter),
            SearchParamType::Composite | SearchParamType::Special => None,
        };
        Ok(condition)
    }

    /// Token matching against the triad columns.
    fn token_condition(
        &self,
        builder: &mut SqlBuilder,
        column_name: &str,
        filter: &SearchFilter,
    ) -> Option<String> {
        let text_column = quote_ident(&format!("__{}Text", column_name));
        let sort_column = quote_ident(&format!("__{}Sort", column_name));

        match filter.modifier {
            Some(SearchModifier::Missing) => {
                return Some(missing_condition(&text_column, filter));
            }
            Some(SearchModifier::Text) => {
                let conditions: Vec<String> = filter
                    .values
                    .iter()
                    .map(|v| {
                        let placeholder =
                            builder.bind(SqlValue::Text(format!("%{}%", v.value)));
                        format!("{} ILIKE {}", sort_column, placeholder)
                    })
                    .collect();
                return some_nonempty(join_conditions(&conditions, " OR "));
            }
            _ => {}
        }

        // Plain values collapse into one array-overlap test; system-only
        // forms ("system|") match by prefix over the unnested array.
        let mut plain: Vec<String> = Vec::new();
        let mut conditions: Vec<String> = Vec::new();
        for value in &filter.values {
            if value.value.ends_with('|') {
                let placeholder = builder.bind(SqlValue::Text(format!("{}%", value.value)));
                conditions.push(format!(
                    "EXISTS (SELECT 1 FROM unnest({}) AS token WHERE token LIKE {})",
                    text_column, placeholder
                ));
            } else {
                plain.push(value.value.clone());
            }
        }
        if !plain.is_empty() {
            let placeholder = builder.bind(SqlValue::TextArray(plain));
            conditions.insert(
                0,
                format!("{} && {}::text[]", text_column, placeholder),
            );
        }
        let combined = some_nonempty(join_conditions(&conditions, " OR "))?;
        if filter.modifier == Some(SearchModifier::Not) {
            Some(format!("NOT COALESCE({}, false)", combined))
        } else {
            Some(combined)
        }
    }

    /// String matching: prefix-insensitive by default, equality under
    /// `:exact`, substring under `:contains`. Lookup-table strings go
    /// through a subquery on the shared table.
    fn string_condition(
        &self,
        builder: &mut SqlBuilder,
        param: &SearchParameterImpl,
        filter: &SearchFilter,
    ) -> Option<String> {
        if filter.modifier == Some(SearchModifier::Missing) {
            let column = quote_ident(&param.sort_column());
            return Some(missing_condition(&column, filter));
        }

        match &param.strategy {
            IndexStrategy::Lookup { table, column } => {
                let lookup_column = quote_ident(column);
                let lookup_table = quote_ident(table.table_name());
                let conditions: Vec<String> = filter
                    .values
                    .iter()
                    .map(|v| {
                        let (op, pattern) = match filter.modifier {
                            Some(SearchModifier::Exact) => ("=", v.value.clone()),
                            Some(SearchModifier::Contains) => ("ILIKE", format!("%{}%", v.value)),
                            _ => ("ILIKE", format!("{}%", v.value)),
                        };
                        let placeholder = builder.bind(SqlValue::Text(pattern));
                        format!(
                            "\"id\" IN (SELECT \"resourceId\" FROM {} WHERE {} {} {})",
                            lookup_table, lookup_column, op, placeholder
                        )
                    })
                    .collect();
                some_nonempty(join_conditions(&conditions, " OR "))
            }
            _ => {
                let column = quote_ident(&param.column_name);
                let conditions: Vec<String> = filter
                    .values
                    .iter()
                    .map(|v| match filter.modifier {
                        Some(SearchModifier::Exact) => {
                            let placeholder = builder.bind(SqlValue::text(&v.value));
                            format!("{} = {}", column, placeholder)
                        }
                        Some(SearchModifier::Contains) => {
                            let placeholder = builder
                                .bind(SqlValue::Text(format!("%{}%", v.value.to_lowercase())));
                            format!("LOWER({}) LIKE {}", column, placeholder)
                        }
                        _ => {
                            let placeholder = builder
                                .bind(SqlValue::Text(format!("{}%", v.value.to_lowercase())));
                            format!("LOWER({}) LIKE {}", column, placeholder)
                        }
                    })
                    .collect();
                some_nonempty(join_conditions(&conditions, " OR "))
            }
        }
    }

    /// Date/number/quantity comparison with the lifted prefix.
    fn comparison_condition(
        &self,
        builder: &mut SqlBuilder,
        param: &SearchParameterImpl,
        filter: &SearchFilter,
        is_date: bool,
    ) -> Option<String> {
        let column = quote_ident(&param.column_name);
        if filter.modifier == Some(SearchModifier::Missing) {
            return Some(missing_condition(&column, filter));
        }
        let conditions: Vec<String> = filter
            .values
            .iter()
            .filter_map(|v| {
                let value = if is_date {
                    SqlValue::Timestamp(parse_partial_datetime(&v.value)?)
                } else {
                    // Quantity values may carry "|system|unit" segments.
                    let number = v.value.split('|').next()?.parse::<f64>().ok()?;
                    SqlValue::Double(number)
                };
                let placeholder = builder.bind(value);
                Some(format!(
                    "{} {} {}",
                    column,
                    prefix_operator(v.prefix),
                    placeholder
                ))
            })
            .collect();
        some_nonempty(join_conditions(&conditions, " OR "))
    }

    /// Reference equality; chained parameters compile to a recursive
    /// subquery against the target kind.
    fn reference_condition(
        &self,
        builder: &mut SqlBuilder,
        param: &SearchParameterImpl,
        filter: &SearchFilter,
    ) -> StorageResult<Option<String>> {
        let column = quote_ident(&param.column_name);

        if let Some(chain) = &filter.chain {
            let nested_filter = SearchFilter {
                code: chain.code.clone(),
                modifier: filter.modifier,
                chain: None,
                values: filter.values.clone(),
            };
            let nested = self
                .filter_condition(builder, &chain.resource_type, &nested_filter)?
                .unwrap_or_else(|| "true".to_string());
            let subquery = format!(
                "SELECT '{}/' || \"id\"::text FROM {} WHERE \"deleted\" = false AND {}",
                chain.resource_type,
                quote_ident(&chain.resource_type),
                nested
            );
            return Ok(Some(if param.array {
                format!(
                    "EXISTS (SELECT 1 FROM unnest({}) AS ref WHERE ref IN ({}))",
                    column, subquery
                )
            } else {
                format!("{} IN ({})", column, subquery)
            }));
        }

        if filter.modifier == Some(SearchModifier::Missing) {
            return Ok(Some(missing_condition(&column, filter)));
        }

        // Multi-valued reference parameters live in a text[] column.
        let conditions: Vec<String> = filter
            .values
            .iter()
            .map(|v| {
                if v.value.contains('/') {
                    let placeholder = builder.bind(SqlValue::text(&v.value));
                    if param.array {
                        format!("{} = ANY({})", placeholder, column)
                    } else {
                        format!("{} = {}", column, placeholder)
                    }
                } else {
                    // A bare id matches any target kind.
                    let placeholder = builder.bind(SqlValue::Text(format!("%/{}", v.value)));
                    if param.array {
                        format!(
                            "EXISTS (SELECT 1 FROM unnest({}) AS ref WHERE ref LIKE {})",
                            column, placeholder
                        )
                    } else {
                        format!("{} LIKE {}", column, placeholder)
                    }
                }
            })
            .collect();
        Ok(some_nonempty(join_conditions(&conditions, " OR ")))
    }

    fn uri_condition(
        &self,
        builder: &mut SqlBuilder,
        param: &SearchParameterImpl,
        filter: &SearchFilter,
    ) -> Option<String> {
        let column = quote_ident(&param.column_name);
        if filter.modifier == Some(SearchModifier::Missing) {
            return Some(missing_condition(&column, filter));
        }
        let conditions: Vec<String> = filter
            .values
            .iter()
            .map(|v| {
                let placeholder = builder.bind(SqlValue::text(&v.value));
                format!("{} = {}", column, placeholder)
            })
            .collect();
        some_nonempty(join_conditions(&conditions, " OR "))
    }

    /// Renders the ORDER BY list. Unknown sort codes collapse the whole
    /// ordering to `lastUpdated DESC`.
    fn order_by(&self, request: &SearchRequest) -> String {
        if request.sort.is_empty() {
            return "\"lastUpdated\" DESC".to_string();
        }
        let mut rendered = Vec::with_capacity(request.sort.len());
        for rule in &request.sort {
            let column = match rule.code.as_str() {
                "_lastUpdated" => "\"lastUpdated\"".to_string(),
                "_id" => "\"id\"".to_string(),
                code if code.starts_with('_') => return "\"lastUpdated\" DESC".to_string(),
                code => match self.registry.get(&request.resource_type, code) {
                    Some(param) if param.param_type != SearchParamType::Special => {
                        quote_ident(&param.sort_column())
                    }
                    _ => return "\"lastUpdated\" DESC".to_string(),
                },
            };
            let direction = if rule.descending { " DESC" } else { "" };
            rendered.push(format!("{}{}", column, direction));
        }
        rendered.join(", ")
    }
}

/// `IS NULL` / `IS NOT NULL` for the `:missing` modifier.
fn missing_condition(column: &str, filter: &SearchFilter) -> String {
    let wants_missing = filter
        .values
        .first()
        .map(|v: &FilterValue| v.value == "true")
        .unwrap_or(true);
    if wants_missing {
        format!("{} IS NULL", column)
    } else {
        format!("{} IS NOT NULL", column)
    }
}

fn prefix_operator(prefix: SearchPrefix) -> &'static str {
    match prefix {
        SearchPrefix::Eq => "=",
        SearchPrefix::Ne => "<>",
        SearchPrefix::Gt => ">",
        SearchPrefix::Lt => "<",
        SearchPrefix::Ge => ">=",
        SearchPrefix::Le => "<=",
        // Starts-after and ends-before reduce to strict comparisons on
        // instants.
        SearchPrefix::Sa => ">",
        SearchPrefix::Eb => "<",
        SearchPrefix::Ap => "=",
    }
}

fn some_nonempty(condition: String) -> Option<String> {
    (!condition.is_empty()).then_some(condition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SortRule, TotalMode};

    fn plan(request: &SearchRequest) -> PlannedQuery {
        let registry = SearchParameterRegistry::new();
        QueryPlanner::new(&registry).plan(request, None).unwrap()
    }

    #[test]
    fn test_soft_delete_always_filtered() {
        let request = SearchRequest::new("Patient");
        let planned = plan(&request);
        assert!(planned.sql.contains("\"deleted\" = false"));
        assert!(planned.sql.starts_with("SELECT \"id\", \"content\" FROM \"Patient\""));
    }

    #[test]
    fn test_token_overlap() {
        let request =
            SearchRequest::new("Patient").with_filter(SearchFilter::eq("gender", "male"));
        let planned = plan(&request);
        assert!(planned.sql.contains("\"__genderText\" && $1::text[]"));
    }

    #[test]
    fn test_token_or_values_share_array() {
        let mut filter = SearchFilter::eq("gender", "male");
        filter.values.push(FilterValue::eq("female"));
        let request = SearchRequest::new("Patient").with_filter(filter);
        let planned = plan(&request);
        // Both OR values ride in one array-overlap parameter.
        match &planned.params[0] {
            SqlValue::TextArray(values) => assert_eq!(values, &vec!["male".to_string(), "female".to_string()]),
            other => panic!("unexpected param: {:?}", other),
        }
    }

    #[test]
    fn test_token_system_only_prefix() {
        let request =
            SearchRequest::new("Patient").with_filter(SearchFilter::eq("identifier", "http://ns|"));
        let planned = plan(&request);
        assert!(planned.sql.contains("unnest(\"__identifierText\")"));
        match &planned.params[0] {
            SqlValue::Text(pattern) => assert_eq!(pattern, "http://ns|%"),
            other => panic!("unexpected param: {:?}", other),
        }
    }

    #[test]
    fn test_token_not_modifier() {
        let mut filter = SearchFilter::eq("status", "final");
        filter.modifier = Some(SearchModifier::Not);
        let request = SearchRequest::new("Observation").with_filter(filter);
        let planned = plan(&request);
        assert!(planned.sql.contains("NOT COALESCE(\"__statusText\" &&"));
    }

    #[test]
    fn test_lookup_string_subquery() {
        let request =
            SearchRequest::new("Patient").with_filter(SearchFilter::eq("name", "Chal"));
        let planned = plan(&request);
        assert!(planned
            .sql
            .contains("\"id\" IN (SELECT \"resourceId\" FROM \"HumanName\" WHERE \"name\" ILIKE $1)"));
        match &planned.params[0] {
            SqlValue::Text(pattern) => assert_eq!(pattern, "Chal%"),
            other => panic!("unexpected param: {:?}", other),
        }
    }

    #[test]
    fn test_string_exact_is_equality() {
        let mut filter = SearchFilter::eq("name", "Chalmers");
        filter.modifier = Some(SearchModifier::Exact);
        let request = SearchRequest::new("Patient").with_filter(filter);
        let planned = plan(&request);
        assert!(planned.sql.contains("\"name\" = $1"));
    }

    #[test]
    fn test_date_prefix_comparison() {
        let mut filter = SearchFilter::eq("birthdate", "1970-01-01");
        filter.values[0].prefix = SearchPrefix::Ge;
        let request = SearchRequest::new("Patient").with_filter(filter);
        let planned = plan(&request);
        assert!(planned.sql.contains("\"birthdate\" >= $1"));
        assert!(matches!(planned.params[0], SqlValue::Timestamp(_)));
    }

    #[test]
    fn test_reference_equality_and_bare_id() {
        let request = SearchRequest::new("Observation")
            .with_filter(SearchFilter::eq("subject", "Patient/abc"));
        let planned = plan(&request);
        assert!(planned.sql.contains("\"subject\" = $1"));

        let request =
            SearchRequest::new("Observation").with_filter(SearchFilter::eq("subject", "abc"));
        let planned = plan(&request);
        assert!(planned.sql.contains("\"subject\" LIKE $1"));
        match &planned.params[0] {
            SqlValue::Text(pattern) => assert_eq!(pattern, "%/abc"),
            other => panic!("unexpected param: {:?}", other),
        }
    }

    #[test]
    fn test_chained_reference_subquery() {
        let mut filter = SearchFilter::eq("subject", "Chalmers");
        filter.chain = Some(crate::types::ChainTarget {
            resource_type: "Patient".to_string(),
            code: "name".to_string(),
        });
        let request = SearchRequest::new("Observation").with_filter(filter);
        let planned = plan(&request);
        assert!(planned.sql.contains(
            "\"subject\" IN (SELECT 'Patient/' || \"id\"::text FROM \"Patient\" WHERE \"deleted\" = false AND"
        ));
        assert!(planned.sql.contains("\"HumanName\""));
    }

    #[test]
    fn test_id_and_last_updated_fixed_columns() {
        let request = SearchRequest::new("Patient")
            .with_filter(SearchFilter::eq("_id", "abc"))
            .with_filter({
                let mut f = SearchFilter::eq("_lastUpdated", "2024-01-01");
                f.values[0].prefix = SearchPrefix::Lt;
                f
            });
        let planned = plan(&request);
        assert!(planned.sql.contains("\"id\"::text = $1"));
        assert!(planned.sql.contains("\"lastUpdated\" < $2"));
    }

    #[test]
    fn test_compartment_containment() {
        let compartment = Uuid::new_v4();
        let mut request = SearchRequest::new("Observation");
        request.compartment = Some(compartment);
        let planned = plan(&request);
        assert!(planned.sql.contains("\"compartments\" @> $1"));
    }

    #[test]
    fn test_project_scope() {
        let registry = SearchParameterRegistry::new();
        let project = Uuid::new_v4();
        let planned = QueryPlanner::new(&registry)
            .plan(&SearchRequest::new("Patient"), Some(project))
            .unwrap();
        assert!(planned.sql.contains("\"projectId\" = $1"));
    }

    #[test]
    fn test_order_limit_offset() {
        let mut request = SearchRequest::new("Patient");
        request.sort = vec![SortRule::parse("-birthdate"), SortRule::parse("_id")];
        request.count = 2;
        request.offset = 4;
        let planned = plan(&request);
        assert!(planned
            .sql
            .contains("ORDER BY \"birthdate\" DESC, \"id\" LIMIT $1 OFFSET $2"));
        assert!(matches!(planned.params[0], SqlValue::Integer(2)));
        assert!(matches!(planned.params[1], SqlValue::Integer(4)));
    }

    #[test]
    fn test_unknown_sort_collapses() {
        let mut request = SearchRequest::new("Patient");
        request.sort = vec![SortRule::parse("frobnitz")];
        let planned = plan(&request);
        assert!(planned.sql.contains("ORDER BY \"lastUpdated\" DESC"));
    }

    #[test]
    fn test_count_variant_shares_where() {
        let registry = SearchParameterRegistry::new();
        let planner = QueryPlanner::new(&registry);
        let mut request =
            SearchRequest::new("Patient").with_filter(SearchFilter::eq("gender", "male"));
        request.total = TotalMode::Accurate;

        let planned = planner.plan(&request, None).unwrap();
        let count = planner.plan_count(&request, None).unwrap();
        assert!(count.sql.starts_with("SELECT COUNT(*)::BIGINT FROM \"Patient\""));
        assert!(!count.sql.contains("LIMIT"));
        // Identical WHERE clause modulo the paging parameters.
        let where_of = |sql: &str| {
            sql.split(" WHERE ")
                .nth(1)
                .unwrap()
                .split(" ORDER BY ")
                .next()
                .unwrap()
                .to_string()
        };
        assert_eq!(where_of(&planned.sql), where_of(&count.sql));
    }

    #[test]
    fn test_missing_modifier() {
        let mut filter = SearchFilter::eq("birthdate", "true");
        filter.modifier = Some(SearchModifier::Missing);
        let request = SearchRequest::new("Patient").with_filter(filter);
        let planned = plan(&request);
        assert!(planned.sql.contains("\"birthdate\" IS NULL"));
    }
}
