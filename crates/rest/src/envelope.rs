//! Search and history result envelopes.

use serde_json::{Map, Value, json};

use atrium_persistence::types::{HistoryEntry, SearchEntryMode, SearchRequest, SearchResultPage};

use crate::headers::etag_value;

/// Builds a `searchset` envelope with self and (when a further page
/// exists) next links.
pub fn search_envelope(
    base_url: &str,
    request: &SearchRequest,
    pairs: &[(String, String)],
    page: &SearchResultPage,
) -> Value {
    let self_url = page_url(base_url, &request.resource_type, pairs);
    let mut links = vec![json!({"relation": "self", "url": self_url})];
    if page.has_next {
        let next_pairs = with_offset(pairs, request.offset + request.count);
        links.push(json!({
            "relation": "next",
            "url": page_url(base_url, &request.resource_type, &next_pairs)
        }));
    }

    let entries: Vec<Value> = page
        .entries
        .iter()
        .map(|entry| {
            let mode = match entry.mode {
                SearchEntryMode::Match => "match",
                SearchEntryMode::Include => "include",
            };
            json!({
                "fullUrl": entry
                    .resource
                    .id()
                    .map(|id| format!("{}/{}/{}", base_url, entry.resource.resource_type(), id)),
                "resource": entry.resource.to_value(),
                "search": {"mode": mode}
            })
        })
        .collect();

    let mut envelope = Map::new();
    envelope.insert("resourceType".to_string(), json!("Bundle"));
    envelope.insert("type".to_string(), json!("searchset"));
    if let Some(total) = page.total {
        envelope.insert("total".to_string(), json!(total));
    }
    envelope.insert("link".to_string(), json!(links));
    envelope.insert("entry".to_string(), json!(entries));
    Value::Object(envelope)
}

/// Builds a `history` envelope, newest first.
pub fn history_envelope(base_url: &str, self_path: &str, entries: &[HistoryEntry]) -> Value {
    let rendered: Vec<Value> = entries
        .iter()
        .map(|entry| {
            let mut map = Map::new();
            let (method, status) = if entry.is_tombstone() {
                ("DELETE", "204")
            } else {
                ("PUT", "200")
            };
            if let Some(resource) = &entry.resource {
                map.insert("resource".to_string(), resource.to_value());
                map.insert(
                    "request".to_string(),
                    json!({
                        "method": method,
                        "url": format!("{}/{}", resource.resource_type(), entry.id)
                    }),
                );
            } else {
                map.insert(
                    "request".to_string(),
                    json!({"method": method, "url": entry.id.to_string()}),
                );
            }
            map.insert(
                "response".to_string(),
                json!({
                    "status": status,
                    "etag": etag_value(&entry.version_id.to_string()),
                    "lastModified": entry.last_updated.to_rfc3339()
                }),
            );
            Value::Object(map)
        })
        .collect();

    json!({
        "resourceType": "Bundle",
        "type": "history",
        "total": entries.len(),
        "link": [{"relation": "self", "url": format!("{}/{}", base_url, self_path)}],
        "entry": rendered
    })
}

/// Renders `base/Kind?pairs`.
fn page_url(base_url: &str, resource_type: &str, pairs: &[(String, String)]) -> String {
    if pairs.is_empty() {
        return format!("{}/{}", base_url, resource_type);
    }
    let query: Vec<String> = pairs
        .iter()
        .map(|(key, value)| format!("{}={}", encode(key), encode(value)))
        .collect();
    format!("{}/{}?{}", base_url, resource_type, query.join("&"))
}

/// Replaces (or appends) the `_offset` pair.
fn with_offset(pairs: &[(String, String)], offset: usize) -> Vec<(String, String)> {
    let mut next: Vec<(String, String)> = pairs
        .iter()
        .filter(|(key, _)| key != "_offset")
        .cloned()
        .collect();
    next.push(("_offset".to_string(), offset.to_string()));
    next
}

/// Minimal percent-encoding for link reconstruction.
fn encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b',' | b'|'
            | b':' | b'/' => out.push(byte as char),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use atrium_fhir::Resource;
    use atrium_persistence::types::SearchEntry;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn page(has_next: bool) -> SearchResultPage {
        let resource = Resource::from_value(json!({
            "resourceType": "Patient",
            "id": Uuid::new_v4().to_string()
        }))
        .unwrap();
        SearchResultPage {
            entries: vec![SearchEntry {
                resource,
                mode: SearchEntryMode::Match,
            }],
            total: Some(3),
            has_next,
        }
    }

    #[test]
    fn test_search_envelope_links() {
        let mut request = SearchRequest::new("Patient");
        request.count = 2;
        request.offset = 0;
        let pairs = vec![
            ("gender".to_string(), "male,female".to_string()),
            ("_count".to_string(), "2".to_string()),
        ];

        let envelope = search_envelope("http://example.com/fhir/R4", &request, &pairs, &page(true));
        assert_eq!(envelope["type"], "searchset");
        assert_eq!(envelope["total"], 3);

        let links = envelope["link"].as_array().unwrap();
        assert_eq!(links[0]["relation"], "self");
        assert_eq!(links[1]["relation"], "next");
        let next_url = links[1]["url"].as_str().unwrap();
        // Parameters are preserved and the offset advances by one page.
        assert!(next_url.contains("gender=male,female"));
        assert!(next_url.contains("_count=2"));
        assert!(next_url.contains("_offset=2"));
    }

    #[test]
    fn test_no_next_link_without_further_page() {
        let request = SearchRequest::new("Patient");
        let envelope = search_envelope("http://example.com/fhir/R4", &request, &[], &page(false));
        assert_eq!(envelope["link"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_search_entry_modes() {
        let request = SearchRequest::new("Patient");
        let envelope = search_envelope("http://example.com/fhir/R4", &request, &[], &page(false));
        assert_eq!(envelope["entry"][0]["search"]["mode"], "match");
    }

    #[test]
    fn test_history_envelope_tombstone() {
        let id = Uuid::new_v4();
        let entries = vec![
            HistoryEntry {
                version_id: Uuid::new_v4(),
                id,
                resource: None,
                last_updated: Utc::now(),
            },
            HistoryEntry {
                version_id: Uuid::new_v4(),
                id,
                resource: Some(
                    Resource::from_value(json!({"resourceType": "Patient", "id": id.to_string()}))
                        .unwrap(),
                ),
                last_updated: Utc::now(),
            },
        ];

        let envelope =
            history_envelope("http://example.com/fhir/R4", "Patient/x/_history", &entries);
        assert_eq!(envelope["type"], "history");
        assert_eq!(envelope["total"], 2);
        assert_eq!(envelope["entry"][0]["request"]["method"], "DELETE");
        assert!(envelope["entry"][0].get("resource").is_none());
        assert_eq!(envelope["entry"][1]["request"]["method"], "PUT");
    }

    #[test]
    fn test_encode() {
        assert_eq!(encode("http://ns|abc"), "http://ns|abc");
        assert_eq!(encode("a b&c"), "a%20b%26c");
    }
}
