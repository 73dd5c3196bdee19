//! Token codec: turns `(userName, secret)` into a storage name and a bearer credential.
//!
//! With hashing on write the stored name only ever contains `hash(secret)`, so
//! a leaked registry listing cannot be replayed as bearer tokens. In legacy
//! plain mode the name, the bearer and the secret are the same string.

mod claims;
pub mod hash;
pub mod pkce;

pub use claims::TokenClaims;
pub use hash::{HASH_LEN, constant_time_eq, hash, random_bytes, salted_hash, verify_format, verify_hash, verify_salted_hash};

use crate::error::{EngineError, EngineResult};

/// Minimum accepted secret length.
pub const MIN_SECRET_LEN: usize = 32;

/// Entropy drawn for generated secrets and salts, in bytes.
pub const SECRET_BYTES: usize = 32;

/// A freshly minted token: where it is stored and what the caller receives.
#[derive(Clone, PartialEq, Eq)]
pub struct MintedToken {
    /// Registry key.
    pub name: String,
    /// Credential handed back to the caller exactly once.
    pub bearer: String,
}

impl std::fmt::Debug for MintedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MintedToken").field("name", &self.name).finish()
    }
}

/// Codec configured for one hashing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenCodec {
    hash_on_write: bool,
}

impl TokenCodec {
    #[must_use]
    pub const fn new(hash_on_write: bool) -> Self {
        Self { hash_on_write }
    }

    #[must_use]
    pub const fn hash_on_write(&self) -> bool {
        self.hash_on_write
    }

    /// Derive the storage name and bearer string for a user's secret.
    pub fn mint(&self, user_name: &str, secret: &str) -> EngineResult<MintedToken> {
        if user_name.is_empty() {
            return Err(EngineError::invalid_input("user_name", "cannot be empty"));
        }
        if secret.len() < MIN_SECRET_LEN {
            return Err(EngineError::invalid_input(
                "secret",
                format!("must be at least {MIN_SECRET_LEN} characters"),
            ));
        }

        if !self.hash_on_write {
            return Ok(MintedToken { name: secret.to_owned(), bearer: secret.to_owned() });
        }

        let user_hash = hash(user_name);
        Ok(MintedToken {
            name: claims::encode_name(&user_hash, &hash(secret))?,
            bearer: claims::encode_bearer(&user_hash, secret)?,
        })
    }

    /// Mint a token for `user_name` around a freshly generated secret.
    pub fn generate(&self, user_name: &str) -> EngineResult<MintedToken> {
        self.mint(user_name, &random_bytes(SECRET_BYTES))
    }

    /// Decode a token string's claims envelope.
    pub fn recover_claims(token: &str) -> EngineResult<TokenClaims> {
        claims::decode(token)
    }

    /// Registry key for a presented bearer string.
    ///
    /// Envelope bearers map to their name envelope. Strings that are not an
    /// envelope are legacy plain tokens whose name is the bearer itself, so
    /// tokens issued before hashing was enabled keep resolving.
    pub fn token_name_for(&self, bearer: &str) -> EngineResult<String> {
        match claims::decode(bearer) {
            Ok(claims) if claims.is_bearer() => {
                claims::encode_name(&claims.user_hash, &claims.secret_hash)
            }
            Ok(_) => Err(EngineError::invalid_token("a stored token name is not a bearer credential")),
            Err(_) if bearer.len() >= MIN_SECRET_LEN => Ok(bearer.to_owned()),
            Err(err) => Err(err),
        }
    }
}

impl Default for TokenCodec {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> String {
        "0123456789abcdefghijklmnopqrstuvwxyz".to_string()
    }

    #[test]
    fn test_mint_rejects_short_secret_and_empty_user() {
        let codec = TokenCodec::new(true);
        assert!(matches!(codec.mint("alice", "short"), Err(EngineError::InvalidInput { .. })));
        assert!(matches!(codec.mint("", &secret()), Err(EngineError::InvalidInput { .. })));
    }

    #[test]
    fn test_plain_mode_uses_secret_everywhere() {
        let minted = TokenCodec::new(false).mint("alice", &secret()).unwrap();
        assert_eq!(minted.name, secret());
        assert_eq!(minted.bearer, secret());
    }

    #[test]
    fn test_hashed_mode_keeps_secret_out_of_name() {
        let minted = TokenCodec::new(true).mint("alice", &secret()).unwrap();
        assert_ne!(minted.name, minted.bearer);

        let name_claims = TokenCodec::recover_claims(&minted.name).unwrap();
        assert!(name_claims.secret.is_none());
        assert_eq!(name_claims.user_hash, hash("alice"));
        assert_eq!(name_claims.secret_hash, hash(&secret()));

        let bearer_claims = TokenCodec::recover_claims(&minted.bearer).unwrap();
        assert_eq!(bearer_claims.secret.as_deref(), Some(secret().as_str()));
        assert_eq!(bearer_claims.secret_hash, hash(&secret()));
    }

    #[test]
    fn test_token_name_for_bearer() {
        let codec = TokenCodec::new(true);
        let minted = codec.generate("alice").unwrap();
        assert_eq!(codec.token_name_for(&minted.bearer).unwrap(), minted.name);
    }

    #[test]
    fn test_token_name_for_refuses_stored_name() {
        let codec = TokenCodec::new(true);
        let minted = codec.generate("alice").unwrap();
        assert!(matches!(codec.token_name_for(&minted.name), Err(EngineError::InvalidToken(_))));
    }

    #[test]
    fn test_token_name_for_legacy_plain_token() {
        let legacy = TokenCodec::new(false).generate("alice").unwrap();
        let codec = TokenCodec::new(true);
        assert_eq!(codec.token_name_for(&legacy.bearer).unwrap(), legacy.name);
        assert!(codec.token_name_for("too-short").is_err());
    }

    #[test]
    fn test_debug_hides_bearer() {
        let minted = TokenCodec::new(true).generate("alice").unwrap();
        assert!(!format!("{minted:?}").contains(&minted.bearer));
    }
}
