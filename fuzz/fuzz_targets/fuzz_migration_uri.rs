//! Fuzz target: migration URI parsing.
//!
//! Any string that parses must render back to a string that parses to the
//! same URI.
#![no_main]

use ferry_core::MigrationUri;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(uri) = text.parse::<MigrationUri>() else {
        return;
    };
    let rendered = uri.to_string();
    let reparsed: MigrationUri = rendered.parse().expect("rendered URI must parse");
    assert_eq!(reparsed, uri, "render/parse must be stable for {rendered}");
    assert_eq!(reparsed.transport(), uri.transport());
});
