//! Token issuance: codes, access tokens, lookup and revocation.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::UserDirectory;
use crate::codec::pkce::{self, CodeChallengeMethod};
use crate::codec::{self, SECRET_BYTES, TokenCodec};
use crate::config::Config;
use crate::error::{EngineError, EngineResult, OptionalExt};
use crate::models::{AccessToken, AuthorizeToken, Grant, Object, ObjectMeta, UserInfo};
use crate::observer::QuorumObserver;
use crate::registry::{ListOptions, Registries, Registry};
use crate::scope;
use crate::validation::ValidatorChain;

/// PKCE parameters captured at authorization time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceChallenge {
    pub challenge: String,
    pub method: CodeChallengeMethod,
}

/// A stored authorize token together with the code handed to the client.
#[derive(Clone)]
pub struct IssuedCode {
    pub code: String,
    pub token: AuthorizeToken,
}

/// A stored access token together with its one-time bearer credential.
#[derive(Clone)]
pub struct IssuedAccessToken {
    pub bearer: String,
    pub token: AccessToken,
}

impl std::fmt::Debug for IssuedCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCode").field("token", &self.token.metadata.name).finish()
    }
}

impl std::fmt::Debug for IssuedAccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedAccessToken").field("token", &self.token).finish()
    }
}

/// Composes codec, registries, validators and the replication observer.
pub struct TokenIssuer {
    codec: TokenCodec,
    registries: Registries,
    users: Arc<dyn UserDirectory>,
    validators: ValidatorChain,
    observer: QuorumObserver<AccessToken>,
    authorize_token_max_age: Duration,
    access_token_max_age: Duration,
    access_token_inactivity_timeout: Option<Duration>,
}

impl TokenIssuer {
    #[must_use]
    pub fn new(
        config: &Config,
        registries: Registries,
        users: Arc<dyn UserDirectory>,
        observer: QuorumObserver<AccessToken>,
    ) -> Self {
        Self {
            codec: TokenCodec::new(config.hash_on_write),
            registries,
            users,
            validators: ValidatorChain::default(),
            observer,
            authorize_token_max_age: config.authorize_token_max_age,
            access_token_max_age: config.access_token_max_age,
            access_token_inactivity_timeout: config.access_token_inactivity_timeout,
        }
    }

    #[must_use]
    pub fn with_validators(mut self, validators: ValidatorChain) -> Self {
        self.validators = validators;
        self
    }

    #[must_use]
    pub const fn codec(&self) -> TokenCodec {
        self.codec
    }

    #[must_use]
    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    /// Mint and persist a single-use authorization code for `grant`.
    pub async fn issue_authorize_token(
        &self,
        user: &UserInfo,
        grant: &Grant,
        state: &str,
        pkce: Option<PkceChallenge>,
    ) -> EngineResult<IssuedCode> {
        let minted = self.codec.generate(&user.name)?;
        let (code_challenge, code_challenge_method) = match pkce {
            Some(p) => (Some(p.challenge), Some(p.method)),
            None => (None, None),
        };

        let token = AuthorizeToken {
            metadata: ObjectMeta::named(minted.name),
            client_name: grant.client.clone(),
            user_name: user.name.clone(),
            user_uid: user.uid.clone(),
            scopes: scope::split(&grant.scope),
            redirect_uri: grant.redirect_uri.clone(),
            state: state.to_owned(),
            expires_in: seconds(self.authorize_token_max_age),
            code_challenge,
            code_challenge_method,
        };
        let stored = self.registries.authorize_tokens.create(token).await?;

        tracing::info!(
            client = %stored.client_name,
            user = %stored.user_name,
            scopes = %scope::join(&stored.scopes),
            "Issued authorize token"
        );
        Ok(IssuedCode { code: minted.bearer, token: stored })
    }

    /// Redeem a code for an access token. A `redirect_uri` given here must
    /// equal the one the code was issued for.
    ///
    /// The code is deleted before any other check, so it can be redeemed at
    /// most once even when the exchange then fails.
    pub async fn exchange_authorize_token(
        &self,
        code: &str,
        client_id: &str,
        redirect_uri: Option<&str>,
        code_verifier: Option<&str>,
    ) -> EngineResult<IssuedAccessToken> {
        let name = self.codec.token_name_for(code)?;
        let authorize = self
            .registries
            .authorize_tokens
            .delete(&name)
            .await
            .optional()?
            .ok_or_else(|| EngineError::invalid_token("authorization code is unknown or already used"))?;

        let user = self.resolve_user(&authorize.user_name).await?;
        self.validators.validate(&authorize, &user)?;

        if authorize.client_name != client_id {
            tracing::warn!(client = client_id, "Authorization code presented by a different client");
            return Err(EngineError::invalid_token("authorization code was issued to another client"));
        }
        if redirect_uri.is_some_and(|uri| uri != authorize.redirect_uri) {
            return Err(EngineError::invalid_token("redirect_uri does not match the authorization request"));
        }
        if let Some(challenge) = &authorize.code_challenge {
            let method = authorize.code_challenge_method.unwrap_or_default();
            let verified = code_verifier.is_some_and(|v| pkce::verify(method, v, challenge));
            if !verified {
                tracing::warn!(client = client_id, "PKCE verification failed");
                return Err(EngineError::invalid_token("code_verifier does not match code_challenge"));
            }
        }

        let scopes = authorize.scopes.clone();
        self.create_access_token(&user, &authorize.client_name, scopes, &authorize.redirect_uri, Some(name))
            .await
    }

    /// Mint, persist and replicate an access token.
    pub async fn create_access_token(
        &self,
        user: &UserInfo,
        client_name: &str,
        scopes: Vec<String>,
        redirect_uri: &str,
        authorize_token: Option<String>,
    ) -> EngineResult<IssuedAccessToken> {
        let secret = codec::random_bytes(SECRET_BYTES);
        let minted = self.codec.mint(&user.name, &secret)?;

        let (bearer_token, salt, salted_hash) = if self.codec.hash_on_write() {
            let salt = codec::random_bytes(SECRET_BYTES);
            let digest = codec::salted_hash(&secret, &salt);
            (String::new(), Some(salt), Some(digest))
        } else {
            (minted.bearer.clone(), None, None)
        };

        let token = AccessToken {
            metadata: ObjectMeta::named(minted.name),
            bearer_token,
            client_name: client_name.to_owned(),
            user_name: user.name.clone(),
            user_uid: user.uid.clone(),
            scopes,
            redirect_uri: redirect_uri.to_owned(),
            expires_in: seconds(self.access_token_max_age),
            inactivity_timeout_seconds: self.access_token_inactivity_timeout.map_or(0, seconds),
            last_used_at: None,
            refresh_token: None,
            authorize_token,
            salt,
            salted_hash,
        };
        let stored = self.registries.access_tokens.create(token).await?;

        self.observer.observe(stored.name(), stored.resource_version()).await?;

        tracing::info!(
            client = %stored.client_name,
            user = %stored.user_name,
            scopes = %scope::join(&stored.scopes),
            "Issued access token"
        );
        Ok(IssuedAccessToken { bearer: minted.bearer, token: stored })
    }

    /// Resolve a presented bearer to its record and current owner.
    pub async fn lookup_access_token(&self, bearer: &str) -> EngineResult<(AccessToken, UserInfo)> {
        let name = self.codec.token_name_for(bearer)?;
        let token = self
            .registries
            .access_tokens
            .get(&name)
            .await
            .optional()?
            .ok_or_else(|| EngineError::invalid_token("access token not found"))?;

        if let (Some(salt), Some(digest)) = (&token.salt, &token.salted_hash) {
            let secret = TokenCodec::recover_claims(bearer)?
                .secret
                .ok_or_else(|| EngineError::invalid_token("bearer carries no secret"))?;
            if !codec::verify_salted_hash(&secret, salt, digest) {
                tracing::warn!(token = %name, "Salted hash mismatch");
                return Err(EngineError::invalid_token("access token does not match its record"));
            }
        }

        let user = self.resolve_user(&token.user_name).await?;
        if let Err(err) = self.validators.validate(&token, &user) {
            tracing::warn!(token = %name, user = %user.name, error = %err, "Access token rejected");
            return Err(err);
        }
        Ok((self.touch(token).await, user))
    }

    /// Record a use of a token that lapses when idle. A failed write keeps
    /// the previous marker; the lookup itself has already succeeded.
    async fn touch(&self, token: AccessToken) -> AccessToken {
        if token.inactivity_timeout_seconds <= 0 {
            return token;
        }
        let mut refreshed = token.clone();
        refreshed.last_used_at = Some(chrono::Utc::now());
        match self.registries.access_tokens.update(refreshed).await {
            Ok(stored) => stored,
            Err(err) => {
                tracing::debug!(token = %token.name(), error = %err, "Could not record token use");
                token
            }
        }
    }

    /// Delete the token a bearer resolves to.
    pub async fn revoke(&self, bearer: &str) -> EngineResult<()> {
        let name = self.codec.token_name_for(bearer)?;
        let token = self.registries.access_tokens.delete(&name).await?;
        tracing::info!(client = %token.client_name, user = %token.user_name, "Revoked access token");
        Ok(())
    }

    /// Delete every access and authorize token issued to `user_name`.
    /// Returns the number of records removed.
    pub async fn revoke_user_tokens(&self, user_name: &str) -> EngineResult<usize> {
        let selector = ListOptions::field("userName", user_name);
        let mut removed = 0;

        for token in self.registries.access_tokens.list(&selector).await? {
            if self.registries.access_tokens.delete(token.name()).await.optional()?.is_some() {
                removed += 1;
            }
        }
        for code in self.registries.authorize_tokens.list(&selector).await? {
            if self.registries.authorize_tokens.delete(code.name()).await.optional()?.is_some() {
                removed += 1;
            }
        }

        tracing::info!(user = user_name, count = removed, "Revoked user tokens");
        Ok(removed)
    }

    async fn resolve_user(&self, name: &str) -> EngineResult<UserInfo> {
        self.users
            .get_user(name)
            .await
            .optional()?
            .ok_or_else(|| EngineError::invalid_token(format!("user \"{name}\" no longer exists")))
    }
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("codec", &self.codec)
            .field("observer", &self.observer)
            .field("authorize_token_max_age", &self.authorize_token_max_age)
            .field("access_token_max_age", &self.access_token_max_age)
            .field("access_token_inactivity_timeout", &self.access_token_inactivity_timeout)
            .finish_non_exhaustive()
    }
}

fn seconds(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}
