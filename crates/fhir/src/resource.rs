//! The untyped resource handle.
//!
//! Resources are polymorphic over their kind. Rather than a generated
//! struct per kind, a [`Resource`] is a JSON object with a required
//! `resourceType` discriminator; per-kind behavior is driven entirely by
//! declared search parameter expressions.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised when interpreting a JSON value as a resource.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// The value is not a JSON object.
    #[error("resource must be a JSON object")]
    NotAnObject,

    /// The object has no usable `resourceType`.
    #[error("resource is missing resourceType")]
    MissingResourceType,

    /// The declared kind does not match the expected kind.
    #[error("resource type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// The kind the caller expected.
        expected: String,
        /// The kind the body declared.
        actual: String,
    },
}

/// An untyped FHIR resource: a declared kind plus a JSON object map.
///
/// The wrapper guarantees that `resourceType` is present and a string; all
/// other fields are accessed through the map. Cloning is cheap enough for
/// the repository cache since content is shared on read via `as_value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resource {
    content: Map<String, Value>,
}

impl Resource {
    /// Wraps a JSON value, validating the `resourceType` discriminator.
    pub fn from_value(value: Value) -> Result<Self, ResourceError> {
        let content = match value {
            Value::Object(map) => map,
            _ => return Err(ResourceError::NotAnObject),
        };
        match content.get("resourceType") {
            Some(Value::String(s)) if !s.is_empty() => {}
            _ => return Err(ResourceError::MissingResourceType),
        }
        Ok(Resource { content })
    }

    /// Wraps a JSON value and additionally checks the declared kind.
    pub fn from_value_of_type(value: Value, expected: &str) -> Result<Self, ResourceError> {
        let resource = Self::from_value(value)?;
        if resource.resource_type() != expected {
            return Err(ResourceError::TypeMismatch {
                expected: expected.to_string(),
                actual: resource.resource_type().to_string(),
            });
        }
        Ok(resource)
    }

    /// Returns the declared kind.
    pub fn resource_type(&self) -> &str {
        self.content
            .get("resourceType")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Returns the logical id, if assigned.
    pub fn id(&self) -> Option<&str> {
        self.content.get("id").and_then(Value::as_str)
    }

    /// Assigns the logical id.
    pub fn set_id(&mut self, id: &Uuid) {
        self.content
            .insert("id".to_string(), Value::String(id.to_string()));
    }

    /// Returns the current version id from `meta.versionId`, if present.
    pub fn version_id(&self) -> Option<&str> {
        self.content
            .get("meta")
            .and_then(|m| m.get("versionId"))
            .and_then(Value::as_str)
    }

    /// Returns `meta.lastUpdated` parsed as a UTC instant, if present.
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.content
            .get("meta")
            .and_then(|m| m.get("lastUpdated"))
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Stamps server-assigned version metadata, preserving caller-supplied
    /// meta fields such as profile, tag, security, and source.
    pub fn stamp_meta(&mut self, version_id: &Uuid, last_updated: DateTime<Utc>) {
        let meta = self
            .content
            .entry("meta".to_string())
            .or_insert_with(|| json!({}));
        if let Some(obj) = meta.as_object_mut() {
            obj.insert(
                "versionId".to_string(),
                Value::String(version_id.to_string()),
            );
            obj.insert(
                "lastUpdated".to_string(),
                Value::String(last_updated.to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
        }
    }

    /// Returns `meta.profile` entries.
    pub fn profiles(&self) -> Vec<&str> {
        self.meta_array("profile")
    }

    /// Returns `meta.source`, if present.
    pub fn source(&self) -> Option<&str> {
        self.content
            .get("meta")
            .and_then(|m| m.get("source"))
            .and_then(Value::as_str)
    }

    /// Returns `meta.tag` codings.
    pub fn tags(&self) -> Vec<&Value> {
        self.meta_codings("tag")
    }

    /// Returns `meta.security` codings.
    pub fn security(&self) -> Vec<&Value> {
        self.meta_codings("security")
    }

    /// Reads a top-level field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.content.get(field)
    }

    /// Returns the underlying object map.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.content
    }

    /// Consumes the handle and returns the underlying JSON.
    pub fn into_value(self) -> Value {
        Value::Object(self.content)
    }

    /// Returns an owned JSON value of the resource.
    pub fn to_value(&self) -> Value {
        Value::Object(self.content.clone())
    }

    fn meta_array(&self, field: &str) -> Vec<&str> {
        self.content
            .get("meta")
            .and_then(|m| m.get(field))
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    fn meta_codings(&self, field: &str) -> Vec<&Value> {
        self.content
            .get("meta")
            .and_then(|m| m.get(field))
            .and_then(Value::as_array)
            .map(|arr| arr.iter().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value_requires_object() {
        assert!(matches!(
            Resource::from_value(json!("Patient")),
            Err(ResourceError::NotAnObject)
        ));
    }

    #[test]
    fn test_from_value_requires_resource_type() {
        assert!(matches!(
            Resource::from_value(json!({"id": "x"})),
            Err(ResourceError::MissingResourceType)
        ));
    }

    #[test]
    fn test_type_mismatch() {
        let result =
            Resource::from_value_of_type(json!({"resourceType": "Patient"}), "Observation");
        assert!(matches!(result, Err(ResourceError::TypeMismatch { .. })));
    }

    #[test]
    fn test_stamp_meta_preserves_caller_fields() {
        let mut resource = Resource::from_value(json!({
            "resourceType": "Patient",
            "meta": {"profile": ["http://example.org/p"], "source": "ehr-7"}
        }))
        .unwrap();

        let vid = Uuid::new_v4();
        resource.stamp_meta(&vid, Utc::now());

        assert_eq!(resource.version_id(), Some(vid.to_string().as_str()));
        assert!(resource.last_updated().is_some());
        assert_eq!(resource.profiles(), vec!["http://example.org/p"]);
        assert_eq!(resource.source(), Some("ehr-7"));
    }

    #[test]
    fn test_meta_codings() {
        let resource = Resource::from_value(json!({
            "resourceType": "Patient",
            "meta": {
                "tag": [{"system": "http://ns", "code": "a"}],
                "security": [{"code": "R"}]
            }
        }))
        .unwrap();

        assert_eq!(resource.tags().len(), 1);
        assert_eq!(resource.security().len(), 1);
    }

    #[test]
    fn test_serde_transparent() {
        let value = json!({"resourceType": "Patient", "id": "p1"});
        let resource: Resource = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(serde_json::to_value(&resource).unwrap(), value);
    }
}
