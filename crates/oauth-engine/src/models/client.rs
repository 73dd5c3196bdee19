//! Registered OAuth clients.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::meta::{Object, ObjectMeta};
use crate::codec;

/// How consent is obtained for a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantMethod {
    /// Record the authorization without asking.
    Auto,
    /// Send the user to the consent page.
    #[default]
    Prompt,
    /// Refuse any grant not already authorized.
    Deny,
}

impl FromStr for GrantMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "prompt" => Ok(Self::Prompt),
            "deny" => Ok(Self::Deny),
            other => Err(format!("unknown grant method '{other}'")),
        }
    }
}

impl fmt::Display for GrantMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Prompt => "prompt",
            Self::Deny => "deny",
        })
    }
}

/// An OAuth client. The client id is the record name.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub metadata: ObjectMeta,
    /// Empty for public clients.
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    /// Overrides the configured default when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_method: Option<GrantMethod>,
}

impl Client {
    #[must_use]
    pub fn new(id: impl Into<String>, secret: impl Into<String>, redirect_uris: Vec<String>) -> Self {
        Self {
            metadata: ObjectMeta::named(id),
            secret: secret.into(),
            redirect_uris,
            grant_method: None,
        }
    }

    #[must_use]
    pub fn with_grant_method(mut self, method: GrantMethod) -> Self {
        self.grant_method = Some(method);
        self
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.metadata.name
    }

    /// Exact match against the registered redirect URIs.
    #[must_use]
    pub fn allows_redirect(&self, redirect_uri: &str) -> bool {
        self.redirect_uris.iter().any(|u| u == redirect_uri)
    }

    /// Check a presented client secret. Public clients accept an empty one.
    #[must_use]
    pub fn check_secret(&self, presented: Option<&str>) -> bool {
        match presented {
            Some(secret) if !self.secret.is_empty() => {
                codec::verify_hash(secret, &codec::hash(&self.secret))
            }
            None | Some("") => self.secret.is_empty(),
            Some(_) => false,
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id())
            .field("redirect_uris", &self.redirect_uris)
            .field("grant_method", &self.grant_method)
            .finish()
    }
}

impl Object for Client {
    const KIND: &'static str = "client";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
