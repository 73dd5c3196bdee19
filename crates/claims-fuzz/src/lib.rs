//! Fuzzing library for oauth-engine.
//!
//! Targets cover the parsers that see attacker-supplied strings: the token
//! claims envelope, scope lists and client authorization names.
//!
//! # Usage
//!
//! ```bash
//! cd crates/claims-fuzz
//! cargo +nightly fuzz run fuzz_recover_claims -- -max_total_time=60
//! ```

pub use oauth_engine::{codec, models, scope};
