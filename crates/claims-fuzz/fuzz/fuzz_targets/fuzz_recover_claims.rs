#![no_main]

use libfuzzer_sys::fuzz_target;
use oauth_engine::TokenCodec;

fuzz_target!(|data: &[u8]| {
    let Ok(token) = std::str::from_utf8(data) else {
        return;
    };
    // Must never panic; a decoded bearer must map to a stable name.
    if TokenCodec::recover_claims(token).is_ok() {
        let codec = TokenCodec::new(true);
        let first = codec.token_name_for(token);
        let second = codec.token_name_for(token);
        assert_eq!(first.is_ok(), second.is_ok());
        if let (Ok(a), Ok(b)) = (first, second) {
            assert_eq!(a, b);
        }
    }
});
