//! Cookie-backed CSRF tokens for the consent form.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

use crate::codec::constant_time_eq;

/// Issues and checks CSRF tokens.
pub trait CsrfProvider: Send + Sync {
    /// Issue a fresh token, returning the updated jar and the form value.
    fn generate(&self, jar: CookieJar) -> (CookieJar, String);

    /// True when `value` matches the token in `jar`.
    fn check(&self, jar: &CookieJar, value: &str) -> bool;
}

/// Stores the token in an `HttpOnly`, `SameSite=Lax` cookie.
#[derive(Debug, Clone)]
pub struct CookieCsrf {
    name: String,
    secure: bool,
}

impl CookieCsrf {
    #[must_use]
    pub fn new(name: impl Into<String>, secure: bool) -> Self {
        Self { name: name.into(), secure }
    }
}

impl CsrfProvider for CookieCsrf {
    fn generate(&self, jar: CookieJar) -> (CookieJar, String) {
        let token = uuid::Uuid::new_v4().simple().to_string();
        let cookie = Cookie::build((self.name.clone(), token.clone()))
            .http_only(true)
            .same_site(SameSite::Lax)
            .path("/")
            .secure(self.secure);
        (jar.add(cookie), token)
    }

    fn check(&self, jar: &CookieJar, value: &str) -> bool {
        !value.is_empty()
            && jar
                .get(&self.name)
                .is_some_and(|cookie| constant_time_eq(cookie.value().as_bytes(), value.as_bytes()))
    }
}
