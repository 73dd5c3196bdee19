//! Metadata shared by every persisted record.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity, version and lifecycle markers of a stored record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Storage key.
    pub name: String,
    /// Version marker assigned by the registry on every write.
    #[serde(default)]
    pub resource_version: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Set while the record is being deleted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ObjectMeta {
    /// Metadata for a new, not yet stored record.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource_version: 0,
            created_at: Utc::now(),
            deletion_timestamp: None,
            labels: BTreeMap::new(),
        }
    }
}

/// A record the registries can store, select and watch.
pub trait Object: Clone + Send + Sync + fmt::Debug + 'static {
    /// Record kind used in errors and logs.
    const KIND: &'static str;

    fn meta(&self) -> &ObjectMeta;

    fn meta_mut(&mut self) -> &mut ObjectMeta;

    /// Field value for field selectors (e.g. `userName`).
    fn field(&self, _key: &str) -> Option<&str> {
        None
    }

    /// When the record stops being valid, if ever.
    fn expires_at(&self) -> Option<DateTime<Utc>> {
        None
    }

    fn name(&self) -> &str {
        &self.meta().name
    }

    fn resource_version(&self) -> u64 {
        self.meta().resource_version
    }
}
