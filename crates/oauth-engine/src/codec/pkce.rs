//! PKCE (Proof Key for Code Exchange) verification.
//!
//! Implements `plain` and `S256` code challenge verification per RFC 7636.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::hash::{constant_time_eq, hash};

/// Transform applied to the verifier before comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CodeChallengeMethod {
    /// Verifier compared as-is.
    #[serde(rename = "plain")]
    Plain,
    /// `BASE64URL(SHA256(code_verifier))`.
    #[default]
    #[serde(rename = "S256")]
    S256,
}

impl FromStr for CodeChallengeMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plain" => Ok(Self::Plain),
            "S256" => Ok(Self::S256),
            other => Err(format!("unsupported code_challenge_method '{other}'")),
        }
    }
}

impl fmt::Display for CodeChallengeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Plain => "plain",
            Self::S256 => "S256",
        })
    }
}

/// Verify a code verifier against the stored challenge.
pub fn verify(method: CodeChallengeMethod, code_verifier: &str, code_challenge: &str) -> bool {
    match method {
        CodeChallengeMethod::Plain => constant_time_eq(code_verifier.as_bytes(), code_challenge.as_bytes()),
        CodeChallengeMethod::S256 => constant_time_eq(hash(code_verifier).as_bytes(), code_challenge.as_bytes()),
    }
}
