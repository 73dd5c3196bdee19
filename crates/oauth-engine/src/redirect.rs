//! Redirect responses and query-string building.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use url::form_urlencoded;

/// `302 Found` to `location`.
pub fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_owned())]).into_response()
}

/// Append url-encoded `pairs` to the query of `target`, which may be a
/// relative reference. A fragment stays at the end.
#[must_use]
pub fn append_query(target: &str, pairs: &[(&str, &str)]) -> String {
    let (base, fragment) = match target.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (target, None),
    };
    if pairs.is_empty() {
        return target.to_owned();
    }

    let encoded = form_urlencoded::Serializer::new(String::new()).extend_pairs(pairs).finish();
    let mut out = String::with_capacity(target.len() + encoded.len() + 1);
    out.push_str(base);
    if !base.contains('?') {
        out.push('?');
    } else if !base.ends_with('?') && !base.ends_with('&') {
        out.push('&');
    }
    out.push_str(&encoded);
    if let Some(fragment) = fragment {
        out.push('#');
        out.push_str(fragment);
    }
    out
}
