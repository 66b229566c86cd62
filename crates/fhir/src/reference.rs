//! Literal reference parsing.

use std::fmt;

use uuid::Uuid;

/// A parsed literal reference.
///
/// References come in two wire forms: `Kind/id` relative literals and
/// `urn:uuid:` placeholders local to a transaction bundle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    /// A relative literal such as `Patient/9d6a…`.
    Local {
        /// Target kind.
        resource_type: String,
        /// Target id (not necessarily a UUID on input).
        id: String,
    },
    /// A bundle-local placeholder, `urn:uuid:<uuid>`.
    Placeholder(Uuid),
}

impl Reference {
    /// Parses a reference string; returns `None` for absolute URLs and
    /// other forms the store does not resolve.
    pub fn parse(value: &str) -> Option<Reference> {
        if let Some(raw) = value.strip_prefix("urn:uuid:") {
            return Uuid::parse_str(raw).ok().map(Reference::Placeholder);
        }
        if value.contains("://") {
            return None;
        }
        let (resource_type, id) = value.split_once('/')?;
        if resource_type.is_empty()
            || id.is_empty()
            || id.contains('/')
            || !resource_type.chars().next().is_some_and(char::is_uppercase)
        {
            return None;
        }
        Some(Reference::Local {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
        })
    }

    /// Target id parsed as a UUID, when the reference is local and its id
    /// is UUID-shaped. Non-UUID targets are not indexable.
    pub fn target_uuid(&self) -> Option<Uuid> {
        match self {
            Reference::Local { id, .. } => Uuid::parse_str(id).ok(),
            Reference::Placeholder(_) => None,
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Local { resource_type, id } => write!(f, "{}/{}", resource_type, id),
            Reference::Placeholder(uuid) => write!(f, "urn:uuid:{}", uuid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_local() {
        let parsed = Reference::parse("Patient/123").unwrap();
        assert_eq!(
            parsed,
            Reference::Local {
                resource_type: "Patient".to_string(),
                id: "123".to_string(),
            }
        );
        assert_eq!(parsed.to_string(), "Patient/123");
    }

    #[test]
    fn test_parse_placeholder() {
        let uuid = Uuid::new_v4();
        let parsed = Reference::parse(&format!("urn:uuid:{}", uuid)).unwrap();
        assert_eq!(parsed, Reference::Placeholder(uuid));
    }

    #[test]
    fn test_rejects_absolute_and_malformed() {
        assert!(Reference::parse("http://other.example/Patient/1").is_none());
        assert!(Reference::parse("patient/1").is_none());
        assert!(Reference::parse("Patient/").is_none());
        assert!(Reference::parse("Patient/a/b").is_none());
        assert!(Reference::parse("#contained").is_none());
    }

    #[test]
    fn test_target_uuid() {
        let uuid = Uuid::new_v4();
        let parsed = Reference::parse(&format!("Patient/{}", uuid)).unwrap();
        assert_eq!(parsed.target_uuid(), Some(uuid));

        let non_uuid = Reference::parse("Patient/mrn-17").unwrap();
        assert_eq!(non_uuid.target_uuid(), None);
    }
}
