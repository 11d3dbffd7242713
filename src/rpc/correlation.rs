//! Correlation identifiers.
//!
//! One is minted per call and travels with the job and its reply. It is only
//! ever compared for equality; it carries no ordering.

use std::fmt;

use uuid::Uuid;

/// Token linking a request to its reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Mint a fresh random (UUID v4) id.
    pub fn mint() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether a received id refers to this call.
    pub fn matches(&self, received: &str) -> bool {
        self.0 == received
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for CorrelationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_minted_ids_are_distinct() {
        let ids: HashSet<_> = (0..10_000).map(|_| CorrelationId::mint()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[tokio::test]
    async fn test_concurrently_minted_ids_are_distinct() {
        let tasks: Vec<_> = (0..64)
            .map(|_| tokio::spawn(async { CorrelationId::mint() }))
            .collect();

        let mut ids = HashSet::new();
        for task in tasks {
            assert!(ids.insert(task.await.unwrap()));
        }
    }

    #[test]
    fn test_matches() {
        let id = CorrelationId::from("3f1c");
        assert!(id.matches("3f1c"));
        assert!(!id.matches("3f1d"));
        assert!(!id.matches(""));
    }

    #[test]
    fn test_minted_id_is_uuid() {
        let id = CorrelationId::mint();
        assert!(Uuid::parse_str(id.as_str()).is_ok());
    }
}
