//! Request-scoped identity and grant values.

use serde::{Deserialize, Serialize};

/// An authenticated identity, as produced by an identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub name: String,
    /// Unique per identity instance; a recreated user gets a new UID.
    pub uid: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl UserInfo {
    #[must_use]
    pub fn new(name: impl Into<String>, uid: impl Into<String>) -> Self {
        Self { name: name.into(), uid: uid.into(), groups: Vec::new() }
    }
}

/// What a client asks a user to approve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    /// Client id.
    pub client: String,
    /// Space-delimited scopes.
    pub scope: String,
    pub redirect_uri: String,
}
