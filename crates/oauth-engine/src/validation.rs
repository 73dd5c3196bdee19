//! Token validators and the client-authorization grant check.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{EngineError, EngineResult, OptionalExt};
use crate::models::{ClientAuthorization, Grant, TokenRecord, UserInfo, authorization_name};
use crate::registry::Registry;
use crate::scope;

/// What validators see of a token. Implemented for every [`TokenRecord`].
pub trait ValidatableToken {
    fn user_uid(&self) -> &str;
    fn expiry(&self) -> Option<DateTime<Utc>>;
    fn inactivity_deadline(&self) -> Option<DateTime<Utc>>;
    fn deletion_timestamp(&self) -> Option<DateTime<Utc>>;
}

impl<T: TokenRecord> ValidatableToken for T {
    fn user_uid(&self) -> &str {
        TokenRecord::user_uid(self)
    }

    fn expiry(&self) -> Option<DateTime<Utc>> {
        TokenRecord::expiry(self)
    }

    fn inactivity_deadline(&self) -> Option<DateTime<Utc>> {
        TokenRecord::inactivity_deadline(self)
    }

    fn deletion_timestamp(&self) -> Option<DateTime<Utc>> {
        self.meta().deletion_timestamp
    }
}

/// A single check run against a resolved token and its user.
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &dyn ValidatableToken, user: &UserInfo) -> EngineResult<()>;
}

/// Rejects tokens whose lifetime elapsed or that are being deleted.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpirationValidator;

impl TokenValidator for ExpirationValidator {
    fn validate(&self, token: &dyn ValidatableToken, _user: &UserInfo) -> EngineResult<()> {
        if token.deletion_timestamp().is_some() {
            return Err(EngineError::Expired);
        }
        match token.expiry() {
            Some(at) if at < Utc::now() => Err(EngineError::Expired),
            _ => Ok(()),
        }
    }
}

/// Rejects tokens left unused for longer than their inactivity timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct InactivityValidator;

impl TokenValidator for InactivityValidator {
    fn validate(&self, token: &dyn ValidatableToken, _user: &UserInfo) -> EngineResult<()> {
        match token.inactivity_deadline() {
            Some(at) if at < Utc::now() => Err(EngineError::Expired),
            _ => Ok(()),
        }
    }
}

/// Rejects tokens issued to a different incarnation of the user.
#[derive(Debug, Clone, Copy, Default)]
pub struct UidValidator;

impl TokenValidator for UidValidator {
    fn validate(&self, token: &dyn ValidatableToken, user: &UserInfo) -> EngineResult<()> {
        if token.user_uid() != user.uid {
            return Err(EngineError::uid_mismatch(token.user_uid(), &user.uid));
        }
        Ok(())
    }
}

/// Ordered validators; the first failure wins.
#[derive(Clone)]
pub struct ValidatorChain {
    validators: Vec<Arc<dyn TokenValidator>>,
}

impl ValidatorChain {
    #[must_use]
    pub fn new(validators: Vec<Arc<dyn TokenValidator>>) -> Self {
        Self { validators }
    }

    pub fn validate(&self, token: &dyn ValidatableToken, user: &UserInfo) -> EngineResult<()> {
        self.validators.iter().try_for_each(|v| v.validate(token, user))
    }
}

impl Default for ValidatorChain {
    fn default() -> Self {
        Self::new(vec![Arc::new(ExpirationValidator), Arc::new(InactivityValidator), Arc::new(UidValidator)])
    }
}

impl std::fmt::Debug for ValidatorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorChain").field("len", &self.validators.len()).finish()
    }
}

/// Decides whether a user already approved a client for the requested scopes.
#[derive(Clone)]
pub struct ClientAuthorizationGrantChecker {
    authorizations: Arc<dyn Registry<ClientAuthorization>>,
}

impl ClientAuthorizationGrantChecker {
    #[must_use]
    pub fn new(authorizations: Arc<dyn Registry<ClientAuthorization>>) -> Self {
        Self { authorizations }
    }

    /// `Ok(false)` when nothing is recorded or the recorded scopes fall short.
    ///
    /// # Errors
    ///
    /// [`EngineError::UidMismatch`] when the record belongs to an earlier
    /// incarnation of the user; registry failures other than not-found.
    pub async fn has_authorized_client(&self, user: &UserInfo, grant: &Grant) -> EngineResult<bool> {
        let name = authorization_name(&user.name, &grant.client)?;
        let Some(existing) = self.authorizations.get(&name).await.optional()? else {
            return Ok(false);
        };

        if existing.user_uid != user.uid {
            tracing::warn!(
                authorization = %name,
                "Client authorization belongs to a different user UID"
            );
            return Err(EngineError::uid_mismatch(existing.user_uid, &user.uid));
        }

        Ok(scope::covers(&existing.scopes, &scope::split(&grant.scope)))
    }
}

impl std::fmt::Debug for ClientAuthorizationGrantChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientAuthorizationGrantChecker").finish_non_exhaustive()
    }
}
