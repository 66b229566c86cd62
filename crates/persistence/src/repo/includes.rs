//! Include resolution.
//!
//! After the primary page is loaded, `_include` joins forward-referenced
//! resources and `_revinclude` joins resources pointing back at the
//! matches. The `:iterate` variant repeats against the union of primary
//! and already-included resources, bounded to three hops with an early
//! stop when a pass yields nothing new. All variants deduplicate by
//! (kind, id) and never re-yield a primary match.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use uuid::Uuid;

use atrium_fhir::{Reference, Resource};

use crate::context::ProjectContext;
use crate::error::StorageResult;
use crate::schema;
use crate::search::registry::SearchParameterRegistry;
use crate::search::extractor;
use crate::sql::quote_ident;
use crate::types::{IncludeDirective, SearchRequest};

/// Maximum `:iterate` passes.
const MAX_ITERATIONS: usize = 3;

/// Resolves every include directive of a request against the primary
/// matches, returning the joined resources.
pub async fn resolve(
    registry: &SearchParameterRegistry,
    client: &deadpool_postgres::Client,
    ctx: &ProjectContext,
    request: &SearchRequest,
    matches: &[Resource],
) -> StorageResult<Vec<Resource>> {
    let mut seen: HashSet<(String, Uuid)> = matches.iter().filter_map(resource_key).collect();
    let mut included: Vec<Resource> = Vec::new();

    for directive in &request.include {
        if directive.is_wildcard() {
            let targets = wildcard_targets(matches);
            load_targets(client, ctx, targets, &mut seen, &mut included).await?;
        } else if directive.iterate {
            for _ in 0..MAX_ITERATIONS {
                let sources: Vec<&Resource> =
                    matches.iter().chain(included.iter()).collect();
                let targets = forward_targets(registry, directive, &sources);
                let before = included.len();
                load_targets(client, ctx, targets, &mut seen, &mut included).await?;
                if included.len() == before {
                    break;
                }
            }
        } else {
            let sources: Vec<&Resource> = matches.iter().collect();
            let targets = forward_targets(registry, directive, &sources);
            load_targets(client, ctx, targets, &mut seen, &mut included).await?;
        }
    }

    for directive in &request.revinclude {
        let targets = reverse_sources(client, directive, matches).await?;
        load_targets(client, ctx, targets, &mut seen, &mut included).await?;
    }

    Ok(included)
}

fn resource_key(resource: &Resource) -> Option<(String, Uuid)> {
    let id = Uuid::parse_str(resource.id()?).ok()?;
    Some((resource.resource_type().to_string(), id))
}

/// Collects `Kind -> ids` referenced by a directive's parameter out of
/// the source resources.
fn forward_targets(
    registry: &SearchParameterRegistry,
    directive: &IncludeDirective,
    sources: &[&Resource],
) -> HashMap<String, Vec<Uuid>> {
    let mut targets: HashMap<String, Vec<Uuid>> = HashMap::new();
    let Some(param) = registry.get(&directive.resource_type, &directive.code) else {
        return targets;
    };

    for source in sources {
        if source.resource_type() != directive.resource_type {
            continue;
        }
        let content = source.to_value();
        for leaf in extractor::extract(&content, &directive.resource_type, &param.expression) {
            collect_reference(&leaf, &mut targets);
        }
    }
    targets
}

/// Deep-walks primary resources for `{reference: "Kind/id"}` structures.
fn wildcard_targets(matches: &[Resource]) -> HashMap<String, Vec<Uuid>> {
    let mut targets: HashMap<String, Vec<Uuid>> = HashMap::new();
    for resource in matches {
        walk_references(&resource.to_value(), &mut targets);
    }
    targets
}

fn walk_references(value: &Value, targets: &mut HashMap<String, Vec<Uuid>>) {
    match value {
        Value::Object(map) => {
            if map.get("reference").and_then(Value::as_str).is_some() {
                collect_reference(value, targets);
            }
            for child in map.values() {
                walk_references(child, targets);
            }
        }
        Value::Array(arr) => {
            for child in arr {
                walk_references(child, targets);
            }
        }
        _ => {}
    }
}

fn collect_reference(leaf: &Value, targets: &mut HashMap<String, Vec<Uuid>>) {
    let text = match leaf {
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get("reference").and_then(Value::as_str) {
            Some(s) => s.to_string(),
            None => return,
        },
        _ => return,
    };
    let Some(Reference::Local { resource_type, id }) = Reference::parse(&text) else {
        return;
    };
    let Ok(id) = Uuid::parse_str(&id) else {
        return;
    };
    if !schema::is_resource_type(&resource_type) {
        return;
    }
    let ids = targets.entry(resource_type).or_default();
    if !ids.contains(&id) {
        ids.push(id);
    }
}

/// `Kind -> ids` of resources referencing the primary matches, via the
/// source kind's references table.
async fn reverse_sources(
    client: &deadpool_postgres::Client,
    directive: &IncludeDirective,
    matches: &[Resource],
) -> StorageResult<HashMap<String, Vec<Uuid>>> {
    let mut targets: HashMap<String, Vec<Uuid>> = HashMap::new();
    if !schema::is_resource_type(&directive.resource_type) {
        return Ok(targets);
    }
    let primary_ids: Vec<Uuid> = matches
        .iter()
        .filter_map(|r| Uuid::parse_str(r.id()?).ok())
        .collect();
    if primary_ids.is_empty() {
        return Ok(targets);
    }

    let sql = format!(
        "SELECT DISTINCT \"resourceId\" FROM {} WHERE \"targetId\" = ANY($1) AND \"code\" = $2",
        quote_ident(&format!("{}_References", directive.resource_type))
    );
    let rows = client.query(&sql, &[&primary_ids, &directive.code]).await?;
    let ids: Vec<Uuid> = rows.iter().map(|row| row.get(0)).collect();
    if !ids.is_empty() {
        targets.insert(directive.resource_type.clone(), ids);
    }
    Ok(targets)
}

/// Bulk-loads target resources, skipping anything already seen.
async fn load_targets(
    client: &deadpool_postgres::Client,
    ctx: &ProjectContext,
    targets: HashMap<String, Vec<Uuid>>,
    seen: &mut HashSet<(String, Uuid)>,
    included: &mut Vec<Resource>,
) -> StorageResult<()> {
    for (resource_type, ids) in targets {
        let fresh: Vec<Uuid> = ids
            .into_iter()
            .filter(|id| !seen.contains(&(resource_type.clone(), *id)))
            .collect();
        if fresh.is_empty() {
            continue;
        }

        let mut sql = format!(
            "SELECT \"content\" FROM {} WHERE \"id\" = ANY($1) AND \"deleted\" = false",
            quote_ident(&resource_type)
        );
        let rows = if let Some(project_id) = ctx.project_id() {
            sql.push_str(" AND \"projectId\" = $2");
            client.query(&sql, &[&fresh, &project_id]).await?
        } else {
            client.query(&sql, &[&fresh]).await?
        };

        for row in rows {
            let content: String = row.get(0);
            let value: Value = serde_json::from_str(&content)?;
            let resource = Resource::from_value(value)?;
            if let Some(key) = resource_key(&resource) {
                if seen.insert(key) {
                    included.push(resource);
                }
            }
        }
    }
    Ok(())
}
