//! Entity identifiers.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;

/// Globally unique identifier of a persistent entity.
///
/// Identifiers are opaque strings. Freshly generated ids are UUIDv7 (time-ordered),
/// but callers may also supply their own (e.g. ids read back from the store).
/// Once assigned, an identifier is never reused for another entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Generate a new identifier.
    ///
    /// Prefer passing ids explicitly in tests for determinism.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Wrap an existing identifier, rejecting blank input.
    pub fn parse(value: impl Into<String>) -> Result<Self, EngineError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(EngineError::illegal_argument("entity id is empty"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl core::fmt::Display for EntityId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EntityId {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<Uuid> for EntityId {
    fn from(value: Uuid) -> Self {
        Self(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = EntityId::generate();
        let b = EntityId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn blank_id_is_rejected() {
        assert!(matches!(
            EntityId::parse("   "),
            Err(EngineError::IllegalArgument(_))
        ));
        assert_eq!(EntityId::parse("job-1").unwrap().as_str(), "job-1");
    }
}
