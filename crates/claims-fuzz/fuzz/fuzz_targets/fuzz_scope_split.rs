#![no_main]

use libfuzzer_sys::fuzz_target;
use oauth_engine::scope;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    let scopes = scope::split(input);
    assert!(scopes.iter().all(|s| !s.is_empty() && !s.chars().any(char::is_whitespace)));

    let merged = scope::add::<String, String>(&[], &scopes);
    assert!(merged.windows(2).all(|w| w[0] < w[1]));
    assert!(scopes.is_empty() || scope::covers(&merged, &scopes));
    assert_eq!(scope::normalize(&scope::join(&merged)), scope::join(&merged));
});
