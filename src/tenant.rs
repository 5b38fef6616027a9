//! # Tenant identity.
//!
//! [`TenantId`] is the opaque key every registry lookup goes through. It is cheap
//! to clone (`Arc<str>`) because it travels with events, log lines and watcher tasks.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;

/// Identifier of one managed service.
///
/// Allowed characters: ASCII alphanumerics, `-`, `_` and `.`; must not be empty.
/// The restriction keeps ids usable as log file names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TenantId(Arc<str>);

impl TenantId {
    /// Validates and wraps `id`.
    pub fn new(id: impl AsRef<str>) -> Result<Self, RuntimeError> {
        let id = id.as_ref();
        Self::validate(id)?;
        Ok(Self(Arc::from(id)))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(id: &str) -> Result<(), RuntimeError> {
        if id.is_empty() {
            return Err(RuntimeError::InvalidTenant {
                id: id.to_string(),
                reason: "must not be empty",
            });
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(RuntimeError::InvalidTenant {
                id: id.to_string(),
                reason: "only ASCII alphanumerics, '-', '_' and '.' are allowed",
            });
        }
        if id.starts_with('.') {
            return Err(RuntimeError::InvalidTenant {
                id: id.to_string(),
                reason: "must not start with '.'",
            });
        }
        Ok(())
    }
}

impl Serialize for TenantId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TenantId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<TenantId> for Arc<str> {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

impl From<&TenantId> for Arc<str> {
    fn from(id: &TenantId) -> Self {
        Arc::clone(&id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_common_ids() {
        for id in ["billing", "shop-eu_2", "a.b"] {
            assert_eq!(TenantId::new(id).unwrap().as_str(), id);
        }
    }

    #[test]
    fn rejects_empty_and_path_like_ids() {
        for id in ["", "../etc", "a/b", ".hidden", "sp ace"] {
            let err = TenantId::new(id).unwrap_err();
            assert_eq!(err.as_label(), "runtime_invalid_tenant", "id {id:?}");
        }
    }

    #[test]
    fn deserializes_with_validation() {
        let ok: TenantId = serde_json::from_str("\"shop\"").unwrap();
        assert_eq!(ok.to_string(), "shop");
        assert!(serde_json::from_str::<TenantId>("\"\"").is_err());
    }

    #[test]
    fn serializes_as_a_plain_string() {
        let id = TenantId::new("shop.eu-1").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"shop.eu-1\"");
        let back: TenantId = serde_json::from_value(serde_json::to_value(&id).unwrap()).unwrap();
        assert_eq!(back, id);
    }
}
