#![no_main]

use libfuzzer_sys::fuzz_target;
use oauth_engine::models::{authorization_name, split_authorization_name};

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok((user, client)) = split_authorization_name(input) {
        assert_eq!(authorization_name(&user, &client).ok().as_deref(), Some(input));
    }
});
