//! Unsigned claims envelope embedded in token names and bearer strings.
//!
//! The envelope is structure only: compact JSON, base64url without padding.
//! It carries no signature; integrity comes from comparing against the
//! stored (salted) hash, never from the envelope decoding successfully.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

use super::MIN_SECRET_LEN;
use super::hash::{hash, verify_format};
use crate::error::{EngineError, EngineResult};

/// Wire form. Field order is fixed so encoding is deterministic.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Envelope {
    #[serde(rename = "u")]
    user_hash: String,
    #[serde(rename = "s", default, skip_serializing_if = "Option::is_none")]
    secret: Option<String>,
    #[serde(rename = "h", default, skip_serializing_if = "Option::is_none")]
    secret_hash: Option<String>,
}

/// Claims recovered from a token string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    /// `hash(userName)`.
    pub user_hash: String,
    /// Plain secret, present only in the bearer form.
    pub secret: Option<String>,
    /// `hash(secret)`; filled from `secret` when the envelope omits it.
    pub secret_hash: String,
}

impl TokenClaims {
    /// True when the claims came from a bearer string rather than a stored name.
    #[must_use]
    pub const fn is_bearer(&self) -> bool {
        self.secret.is_some()
    }
}

/// Encode the bearer form `{userHash, secret}`.
pub(crate) fn encode_bearer(user_hash: &str, secret: &str) -> EngineResult<String> {
    encode(&Envelope {
        user_hash: user_hash.to_owned(),
        secret: Some(secret.to_owned()),
        secret_hash: None,
    })
}

/// Encode the stored-name form `{userHash, secretHash}`.
pub(crate) fn encode_name(user_hash: &str, secret_hash: &str) -> EngineResult<String> {
    encode(&Envelope {
        user_hash: user_hash.to_owned(),
        secret: None,
        secret_hash: Some(secret_hash.to_owned()),
    })
}

fn encode(envelope: &Envelope) -> EngineResult<String> {
    Ok(URL_SAFE_NO_PAD.encode(serde_json::to_vec(envelope)?))
}

/// Decode and validate an envelope. Fails closed on anything ambiguous.
pub(crate) fn decode(token: &str) -> EngineResult<TokenClaims> {
    let raw = URL_SAFE_NO_PAD
        .decode(token.as_bytes())
        .map_err(|e| EngineError::invalid_token(format!("not base64url: {e}")))?;
    let envelope: Envelope = serde_json::from_slice(&raw)
        .map_err(|e| EngineError::invalid_token(format!("bad claims envelope: {e}")))?;

    if !verify_format(&envelope.user_hash) {
        return Err(EngineError::invalid_token("user hash is not a well-formed digest"));
    }

    let secret_hash = match (&envelope.secret, envelope.secret_hash) {
        (Some(secret), None) => {
            if secret.len() < MIN_SECRET_LEN {
                return Err(EngineError::invalid_token("secret is too short"));
            }
            hash(secret)
        }
        (None, Some(secret_hash)) => {
            if !verify_format(&secret_hash) {
                return Err(EngineError::invalid_token("secret hash is not a well-formed digest"));
            }
            secret_hash
        }
        _ => {
            return Err(EngineError::invalid_token(
                "exactly one of secret or secret hash must be present",
            ));
        }
    };

    Ok(TokenClaims { user_hash: envelope.user_hash, secret: envelope.secret, secret_hash })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(json: &str) -> String {
        URL_SAFE_NO_PAD.encode(json.as_bytes())
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let user_hash = hash("alice");
        let a = encode_name(&user_hash, &hash("s")).unwrap();
        let b = encode_name(&user_hash, &hash("s")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_decode_fills_secret_hash() {
        let secret = "s".repeat(MIN_SECRET_LEN);
        let token = encode_bearer(&hash("alice"), &secret).unwrap();
        let claims = decode(&token).unwrap();
        assert!(claims.is_bearer());
        assert_eq!(claims.secret_hash, hash(&secret));
    }

    #[test]
    fn test_decode_rejects_both_or_neither() {
        let u = hash("alice");
        let both = raw(&format!(
            r#"{{"u":"{u}","s":"{}","h":"{}"}}"#,
            "s".repeat(40),
            hash("x")
        ));
        assert!(matches!(decode(&both), Err(EngineError::InvalidToken(_))));

        let neither = raw(&format!(r#"{{"u":"{u}"}}"#));
        assert!(matches!(decode(&neither), Err(EngineError::InvalidToken(_))));
    }

    #[test]
    fn test_decode_rejects_malformed_user_hash() {
        let token = raw(&format!(r#"{{"u":"alice","h":"{}"}}"#, hash("x")));
        assert!(decode(&token).is_err());
    }

    #[test]
    fn test_decode_rejects_unknown_fields_and_garbage() {
        let token = raw(&format!(r#"{{"u":"{}","h":"{}","admin":true}}"#, hash("a"), hash("x")));
        assert!(decode(&token).is_err());
        assert!(decode("%%%").is_err());
        assert!(decode("").is_err());
        assert!(decode(&raw("[1,2,3]")).is_err());
    }
}
