//! Identity and hashing primitives.
//!
//! Resource ids and version ids are UUIDs minted with [`generate_id`].
//! Token search values additionally get a deterministic 128-bit digest via
//! [`TokenHash`], so that exact token matches can be answered from a
//! fixed-width UUID array column regardless of how long the system URI is.

use uuid::Uuid;

/// Namespace under which token digests are computed.
///
/// Fixed for the lifetime of the stored data: changing it invalidates every
/// `__<param>` hash column.
const TOKEN_NAMESPACE: Uuid = Uuid::from_bytes([
    0x8a, 0x54, 0xc1, 0x2e, 0x3b, 0x0d, 0x4f, 0x6a, 0x9c, 0x7e, 0x11, 0xd2, 0x5f, 0x08, 0xaa, 0x42,
]);

/// Mints a new random resource or version id.
pub fn generate_id() -> Uuid {
    Uuid::new_v4()
}

/// Deterministic fixed-width digest of a token.
///
/// Two tokens hash equal iff their `system|code` renderings are equal; a
/// bare code (no system) hashes as `|code` so it never collides with a
/// system-qualified token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenHash(Uuid);

impl TokenHash {
    /// Computes the digest of a (system, code) pair.
    pub fn of(system: Option<&str>, code: &str) -> Self {
        let rendered = format!("{}|{}", system.unwrap_or(""), code);
        TokenHash(Uuid::new_v5(&TOKEN_NAMESPACE, rendered.as_bytes()))
    }

    /// Computes the digest of an already-rendered `system|code` string.
    pub fn of_rendered(rendered: &str) -> Self {
        match rendered.split_once('|') {
            Some((system, code)) => TokenHash::of(Some(system), code),
            None => TokenHash::of(None, rendered),
        }
    }

    /// Returns the digest as a UUID for storage in a `uuid[]` column.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for TokenHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_unique() {
        assert_ne!(generate_id(), generate_id());
    }

    #[test]
    fn test_token_hash_deterministic() {
        let a = TokenHash::of(Some("http://loinc.org"), "8867-4");
        let b = TokenHash::of(Some("http://loinc.org"), "8867-4");
        assert_eq!(a, b);
    }

    #[test]
    fn test_token_hash_system_sensitive() {
        let loinc = TokenHash::of(Some("http://loinc.org"), "1234");
        let snomed = TokenHash::of(Some("http://snomed.info/sct"), "1234");
        assert_ne!(loinc, snomed);
    }

    #[test]
    fn test_bare_code_distinct_from_empty_system() {
        // A bare code renders as "|code", identical to an explicit empty
        // system. Both forms must land on the same digest.
        assert_eq!(TokenHash::of(None, "active"), TokenHash::of(Some(""), "active"));
    }

    #[test]
    fn test_of_rendered_splits_on_first_pipe() {
        let direct = TokenHash::of(Some("http://ns"), "a|b");
        let rendered = TokenHash::of_rendered("http://ns|a|b");
        assert_eq!(direct, rendered);
    }
}
