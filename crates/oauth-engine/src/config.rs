//! Configuration for the OAuth engine.

use std::str::FromStr;
use std::time::Duration;

use crate::models::GrantMethod;

/// Default values.
pub mod defaults {
    use std::time::Duration;

    /// Integration prefix the protocol endpoints are mounted under.
    pub const PREFIX: &str = "/oauth";

    /// Authorize (code) token lifetime: 5 minutes.
    pub const AUTHORIZE_TOKEN_MAX_AGE: Duration = Duration::from_secs(300);

    /// Access token lifetime: 24 hours.
    pub const ACCESS_TOKEN_MAX_AGE: Duration = Duration::from_secs(24 * 3600);

    /// Per-backend wait for a write to become visible on a replica.
    pub const REPLICA_TIMEOUT: Duration = Duration::from_secs(10);

    /// Bounded retries for a conflicting client authorization update.
    pub const CONFLICT_RETRIES: usize = 5;

    /// Interval of the registry expiry sweep.
    pub const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

    /// Name of the CSRF cookie set by the consent page.
    pub const CSRF_COOKIE: &str = "csrf";
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Store salted/hashed token names instead of the legacy secret-as-name.
    pub hash_on_write: bool,

    /// Replicas that must observe a new access token. `0` means every backend.
    pub success_threshold: usize,

    /// Per-backend observation timeout.
    pub replica_timeout: Duration,

    /// Authorize token lifetime.
    pub authorize_token_max_age: Duration,

    /// Access token lifetime.
    pub access_token_max_age: Duration,

    /// Disuse after which an access token lapses. `None` disables the check.
    pub access_token_inactivity_timeout: Option<Duration>,

    /// Consent policy for clients without their own grant method.
    pub default_grant_method: GrantMethod,

    /// Retries of a conflicting client authorization write.
    pub conflict_retries: usize,

    /// Mark the CSRF cookie `Secure`.
    pub secure_cookies: bool,

    /// Path prefix for `/authorize`, `/token`, `/info` and `/grant`.
    pub prefix: String,

    /// Where unauthenticated authorize requests are sent (with `then=`).
    pub login_url: Option<String>,
}

impl Config {
    /// Create a configuration with the hashing mode set explicitly.
    #[must_use]
    pub fn new(hash_on_write: bool) -> Self {
        Self {
            hash_on_write,
            success_threshold: 0,
            replica_timeout: defaults::REPLICA_TIMEOUT,
            authorize_token_max_age: defaults::AUTHORIZE_TOKEN_MAX_AGE,
            access_token_max_age: defaults::ACCESS_TOKEN_MAX_AGE,
            access_token_inactivity_timeout: None,
            default_grant_method: GrantMethod::Prompt,
            conflict_retries: defaults::CONFLICT_RETRIES,
            secure_cookies: false,
            prefix: defaults::PREFIX.to_string(),
            login_url: None,
        }
    }

    /// Create a test configuration with short timeouts.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            replica_timeout: Duration::from_millis(200),
            ..Self::new(true)
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns error if environment variables are invalid.
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenv::dotenv();

        let mut config = Self::new(env_or("OAUTH_HASH_ON_WRITE", true)?);
        config.success_threshold = env_or("OAUTH_REPLICA_SUCCESS_THRESHOLD", 0)?;
        config.replica_timeout = Duration::from_secs(env_or(
            "OAUTH_REPLICA_TIMEOUT_SECS",
            defaults::REPLICA_TIMEOUT.as_secs(),
        )?);
        config.authorize_token_max_age = Duration::from_secs(env_or(
            "OAUTH_AUTHORIZE_TOKEN_MAX_AGE_SECS",
            defaults::AUTHORIZE_TOKEN_MAX_AGE.as_secs(),
        )?);
        config.access_token_max_age = Duration::from_secs(env_or(
            "OAUTH_ACCESS_TOKEN_MAX_AGE_SECS",
            defaults::ACCESS_TOKEN_MAX_AGE.as_secs(),
        )?);
        config.access_token_inactivity_timeout =
            match env_or("OAUTH_ACCESS_TOKEN_INACTIVITY_TIMEOUT_SECS", 0u64)? {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            };
        config.default_grant_method = env_or("OAUTH_GRANT_METHOD", GrantMethod::Prompt)?;
        config.conflict_retries = env_or("OAUTH_CONFLICT_RETRIES", defaults::CONFLICT_RETRIES)?;
        config.secure_cookies = env_or("OAUTH_SECURE_COOKIES", false)?;
        if let Ok(prefix) = std::env::var("OAUTH_PREFIX") {
            config.prefix = prefix;
        }
        config.login_url = std::env::var("OAUTH_LOGIN_URL").ok();
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(true)
    }
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|e| anyhow::anyhow!("invalid value for {key}: {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.hash_on_write);
        assert_eq!(config.success_threshold, 0);
        assert_eq!(config.prefix, "/oauth");
        assert_eq!(config.default_grant_method, GrantMethod::Prompt);
        assert!(config.access_token_inactivity_timeout.is_none());
    }

    #[test]
    fn test_config_for_testing() {
        let config = Config::for_testing();
        assert!(config.replica_timeout < defaults::REPLICA_TIMEOUT);
        assert_eq!(config.authorize_token_max_age, defaults::AUTHORIZE_TOKEN_MAX_AGE);
    }

    #[test]
    fn test_env_or_falls_back_when_unset() {
        assert_eq!(env_or("OAUTH_ENGINE_UNSET_TEST_VARIABLE", 3usize).unwrap(), 3);
        assert!(env_or("OAUTH_ENGINE_UNSET_TEST_VARIABLE", true).unwrap());
    }
}
