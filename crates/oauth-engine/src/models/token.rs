//! Access and authorize token records.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::meta::{Object, ObjectMeta};
use crate::codec::pkce::CodeChallengeMethod;

/// Common view of a token for validators.
pub trait TokenRecord: Object {
    fn user_uid(&self) -> &str;

    /// Lifetime in seconds; `0` never expires.
    fn expires_in(&self) -> i64;

    /// `createdAt + expiresIn`, or `None` for non-expiring tokens. A lifetime
    /// past the representable time range never expires.
    fn expiry(&self) -> Option<DateTime<Utc>> {
        offset(self.meta().created_at, self.expires_in())
    }

    /// Instant after which an unused token lapses, if it has an inactivity timeout.
    fn inactivity_deadline(&self) -> Option<DateTime<Utc>> {
        None
    }
}

/// `at + seconds` for positive `seconds`; `None` for zero, negative or
/// out-of-range offsets.
fn offset(at: DateTime<Utc>, seconds: i64) -> Option<DateTime<Utc>> {
    if seconds <= 0 {
        return None;
    }
    at.checked_add_signed(Duration::try_seconds(seconds)?)
}

/// A long-lived credential issued to a client on behalf of a user.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    pub metadata: ObjectMeta,
    /// Only populated on the value returned from issuance; never persisted.
    #[serde(skip)]
    pub bearer_token: String,
    pub client_name: String,
    pub user_name: String,
    #[serde(rename = "userUID")]
    pub user_uid: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub redirect_uri: String,
    pub expires_in: i64,
    /// Seconds of disuse after which the token lapses; `0` disables the check.
    #[serde(default)]
    pub inactivity_timeout_seconds: i64,
    /// Last successful lookup. Creation counts as the first use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Name of the authorize token this was exchanged from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorize_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    /// `salted_hash(secret, salt)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salted_hash: Option<String>,
}

impl AccessToken {
    /// Seconds until expiry, clamped at zero. `None` for non-expiring tokens.
    #[must_use]
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expiry().map(|at| (at - now).num_seconds().max(0))
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("name", &self.metadata.name)
            .field("client_name", &self.client_name)
            .field("user_name", &self.user_name)
            .field("scopes", &self.scopes)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

impl TokenRecord for AccessToken {
    fn user_uid(&self) -> &str {
        &self.user_uid
    }

    fn expires_in(&self) -> i64 {
        self.expires_in
    }

    fn inactivity_deadline(&self) -> Option<DateTime<Utc>> {
        let last_used = self.last_used_at.unwrap_or(self.metadata.created_at);
        offset(last_used, self.inactivity_timeout_seconds)
    }
}

impl Object for AccessToken {
    const KIND: &'static str = "accesstoken";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn field(&self, key: &str) -> Option<&str> {
        match key {
            "userName" => Some(&self.user_name),
            "userUID" => Some(&self.user_uid),
            "clientName" => Some(&self.client_name),
            "authorizeToken" => self.authorize_token.as_deref(),
            _ => None,
        }
    }

    /// The earlier of the lifetime and inactivity deadlines.
    fn expires_at(&self) -> Option<DateTime<Utc>> {
        match (self.expiry(), self.inactivity_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Short-lived, single-use code exchanged for an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeToken {
    pub metadata: ObjectMeta,
    pub client_name: String,
    pub user_name: String,
    #[serde(rename = "userUID")]
    pub user_uid: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default)]
    pub state: String,
    pub expires_in: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<CodeChallengeMethod>,
}

impl TokenRecord for AuthorizeToken {
    fn user_uid(&self) -> &str {
        &self.user_uid
    }

    fn expires_in(&self) -> i64 {
        self.expires_in
    }
}

impl Object for AuthorizeToken {
    const KIND: &'static str = "authorizetoken";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn field(&self, key: &str) -> Option<&str> {
        match key {
            "userName" => Some(&self.user_name),
            "clientName" => Some(&self.client_name),
            _ => None,
        }
    }

    fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expiry()
    }
}
