//! Validated admin identity.
//!
//! Admin identifiers arrive from the external identity provider as strings.
//! The provider is trusted for authenticity; this module validates only the
//! *format*: a well-formed UUID v4 with the RFC 4122 variant, the shape every
//! upstream account id carries. Anything else is rejected before it can reach
//! the admission ledger or the vote map.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::{Uuid, Variant, Version};

/// Errors produced when parsing an [`AdminId`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum AdminIdError {
    /// The string is not a parseable UUID.
    #[error("admin id is not a valid uuid: {0}")]
    Malformed(String),

    /// The UUID parsed but is not version 4.
    #[error("admin id must be a version-4 uuid, got version {version:?}")]
    WrongVersion {
        /// The version that was found, if any.
        version: Option<usize>,
    },

    /// The UUID parsed but does not carry the RFC 4122 variant.
    #[error("admin id must carry the RFC 4122 variant")]
    WrongVariant,
}

/// A format-validated admin identifier.
///
/// Construction goes through [`AdminId::parse`], which enforces UUID v4 with
/// the RFC 4122 variant. Once constructed, the id is known well-formed, so
/// the tracker and lifecycle can key maps on it without re-validating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AdminId(Uuid);

impl AdminId {
    /// Parse and validate an admin id string.
    ///
    /// # Errors
    ///
    /// Returns an [`AdminIdError`] when the string is not a UUID, is not
    /// version 4, or does not carry the RFC 4122 variant.
    pub fn parse(raw: &str) -> Result<Self, AdminIdError> {
        let uuid = Uuid::parse_str(raw).map_err(|_| AdminIdError::Malformed(raw.to_string()))?;
        if uuid.get_version() != Some(Version::Random) {
            return Err(AdminIdError::WrongVersion {
                version: Some(uuid.get_version_num()),
            });
        }
        if uuid.get_variant() != Variant::RFC4122 {
            return Err(AdminIdError::WrongVariant);
        }
        Ok(Self(uuid))
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for AdminId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for AdminId {
    type Err = AdminIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AdminId {
    type Error = AdminIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AdminId> for String {
    fn from(id: AdminId) -> Self {
        id.0.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_v4_rfc4122() {
        let id = AdminId::parse("a1b2c3d4-5678-4abc-9def-112233445566").unwrap();
        assert_eq!(id.to_string(), "a1b2c3d4-5678-4abc-9def-112233445566");
    }

    #[test]
    fn accepts_generated_v4() {
        let raw = Uuid::new_v4().to_string();
        assert!(AdminId::parse(&raw).is_ok());
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            AdminId::parse("not-a-uuid"),
            Err(AdminIdError::Malformed(_))
        ));
        assert!(AdminId::parse("").is_err());
    }

    #[test]
    fn rejects_wrong_version() {
        // Version nibble is 1 (time-based), not 4.
        let err = AdminId::parse("a1b2c3d4-5678-1abc-9def-112233445566").unwrap_err();
        assert!(matches!(err, AdminIdError::WrongVersion { .. }));
    }

    #[test]
    fn rejects_wrong_variant() {
        // Variant nibble is 7, outside the RFC 4122 range [89ab].
        let err = AdminId::parse("a1b2c3d4-5678-4abc-7def-112233445566").unwrap_err();
        assert!(matches!(err, AdminIdError::WrongVariant));
    }

    #[test]
    fn serde_round_trip_validates() {
        let id: AdminId = serde_json::from_str("\"a1b2c3d4-5678-4abc-9def-112233445566\"").unwrap();
        assert_eq!(
            serde_json::to_string(&id).unwrap(),
            "\"a1b2c3d4-5678-4abc-9def-112233445566\""
        );
        let bad: Result<AdminId, _> = serde_json::from_str("\"a1b2c3d4-5678-1abc-9def-112233445566\"");
        assert!(bad.is_err());
    }
}
