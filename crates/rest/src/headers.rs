//! Response headers and version-tag parsing.
//!
//! The version tag wire form is a weak ETag, `W/"<versionId>"`. If-Match
//! parses the quoted inner value as the version id to compare.

use axum::http::{HeaderMap, HeaderValue, header};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use atrium_fhir::Resource;

use crate::error::RestError;

/// Renders the weak ETag for a version id.
pub fn etag_value(version_id: &str) -> String {
    format!("W/\"{}\"", version_id)
}

/// Parses an If-Match header value into the version id it names.
pub fn parse_if_match(value: &str) -> Option<Uuid> {
    let inner = value
        .trim()
        .strip_prefix("W/")
        .unwrap_or(value.trim())
        .trim_matches('"');
    Uuid::parse_str(inner).ok()
}

/// Extracts the If-Match precondition from request headers; a malformed
/// header fails rather than silently skipping the optimistic lock.
pub fn if_match_precondition(headers: &HeaderMap) -> Result<Option<Uuid>, RestError> {
    let Some(value) = headers.get(header::IF_MATCH) else {
        return Ok(None);
    };
    let text = value
        .to_str()
        .map_err(|_| RestError::bad_request("If-Match is not valid ASCII"))?;
    parse_if_match(text)
        .map(Some)
        .ok_or_else(|| RestError::bad_request("If-Match must be W/\"<versionId>\""))
}

/// The If-None-Exist conditional-create query, if present.
pub fn if_none_exist(headers: &HeaderMap) -> Option<String> {
    headers
        .get("if-none-exist")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Standard headers for a resource response: ETag and Last-Modified.
pub fn resource_headers(resource: &Resource) -> HeaderMap {
    let mut map = HeaderMap::new();
    if let Some(version_id) = resource.version_id() {
        if let Ok(value) = HeaderValue::from_str(&etag_value(version_id)) {
            map.insert(header::ETAG, value);
        }
    }
    if let Some(last_updated) = resource.last_updated() {
        if let Ok(value) = HeaderValue::from_str(&http_date(last_updated)) {
            map.insert(header::LAST_MODIFIED, value);
        }
    }
    map
}

/// The Location of a freshly written version.
pub fn location(base_url: &str, resource: &Resource) -> Option<String> {
    let id = resource.id()?;
    let version_id = resource.version_id()?;
    Some(format!(
        "{}/{}/{}/_history/{}",
        base_url,
        resource.resource_type(),
        id,
        version_id
    ))
}

/// The caller's `Prefer: return=` choice on write interactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnPreference {
    /// Headers only.
    Minimal,
    /// The resource body (default).
    #[default]
    Representation,
    /// An OperationOutcome body.
    OperationOutcome,
}

/// Parses the Prefer header, defaulting to `return=representation`.
pub fn prefer_return(headers: &HeaderMap) -> ReturnPreference {
    let Some(value) = headers.get("prefer").and_then(|v| v.to_str().ok()) else {
        return ReturnPreference::default();
    };
    for directive in value.split(',') {
        match directive.trim() {
            "return=minimal" => return ReturnPreference::Minimal,
            "return=representation" => return ReturnPreference::Representation,
            "return=OperationOutcome" => return ReturnPreference::OperationOutcome,
            _ => {}
        }
    }
    ReturnPreference::default()
}

/// RFC 7231 HTTP-date rendering.
fn http_date(instant: DateTime<Utc>) -> String {
    instant.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_etag_round_trip() {
        let id = Uuid::new_v4();
        let tag = etag_value(&id.to_string());
        assert_eq!(parse_if_match(&tag), Some(id));
        assert_eq!(parse_if_match(&format!("\"{}\"", id)), Some(id));
        assert_eq!(parse_if_match("W/\"garbage\""), None);
    }

    #[test]
    fn test_resource_headers() {
        let vid = Uuid::new_v4();
        let resource = Resource::from_value(json!({
            "resourceType": "Patient",
            "id": Uuid::new_v4().to_string(),
            "meta": {
                "versionId": vid.to_string(),
                "lastUpdated": "2024-03-01T12:30:00.000Z"
            }
        }))
        .unwrap();

        let headers = resource_headers(&resource);
        assert_eq!(
            headers.get(header::ETAG).unwrap().to_str().unwrap(),
            format!("W/\"{}\"", vid)
        );
        assert_eq!(
            headers.get(header::LAST_MODIFIED).unwrap().to_str().unwrap(),
            "Fri, 01 Mar 2024 12:30:00 GMT"
        );
    }

    #[test]
    fn test_prefer_return() {
        let mut map = HeaderMap::new();
        assert_eq!(prefer_return(&map), ReturnPreference::Representation);

        map.insert("prefer", HeaderValue::from_static("return=minimal"));
        assert_eq!(prefer_return(&map), ReturnPreference::Minimal);

        map.insert(
            "prefer",
            HeaderValue::from_static("respond-async, return=OperationOutcome"),
        );
        assert_eq!(prefer_return(&map), ReturnPreference::OperationOutcome);
    }

    #[test]
    fn test_location() {
        let id = Uuid::new_v4();
        let vid = Uuid::new_v4();
        let resource = Resource::from_value(json!({
            "resourceType": "Patient",
            "id": id.to_string(),
            "meta": {"versionId": vid.to_string()}
        }))
        .unwrap();

        assert_eq!(
            location("http://localhost:8103/fhir/R4", &resource).unwrap(),
            format!("http://localhost:8103/fhir/R4/Patient/{}/_history/{}", id, vid)
        );
    }
}
