//! Set operations over space-delimited scope lists.

use std::collections::BTreeSet;

/// Split a scope string on whitespace, dropping empty segments.
#[must_use]
pub fn split(scopes: &str) -> Vec<String> {
    scopes.split_whitespace().map(str::to_owned).collect()
}

/// Join scopes with single spaces.
#[must_use]
pub fn join<S: AsRef<str>>(scopes: &[S]) -> String {
    scopes.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(" ")
}

/// Sorted, de-duplicated union of two scope lists.
#[must_use]
pub fn add<A: AsRef<str>, B: AsRef<str>>(existing: &[A], incoming: &[B]) -> Vec<String> {
    existing
        .iter()
        .map(AsRef::as_ref)
        .chain(incoming.iter().map(AsRef::as_ref))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_owned)
        .collect()
}

/// True iff `requested` is non-empty and every requested scope is in `has`.
///
/// An empty request is never covered, even by an empty grant: nothing was
/// explicitly asked for, so nothing counts as approved.
#[must_use]
pub fn covers<H: AsRef<str>, R: AsRef<str>>(has: &[H], requested: &[R]) -> bool {
    if requested.is_empty() {
        return false;
    }
    let has: BTreeSet<&str> = has.iter().map(AsRef::as_ref).collect();
    requested.iter().all(|scope| has.contains(scope.as_ref()))
}

/// Canonical form of a scope string: sorted, de-duplicated, single-spaced.
#[must_use]
pub fn normalize(scopes: &str) -> String {
    join(&add::<&str, String>(&[], &split(scopes)))
}
