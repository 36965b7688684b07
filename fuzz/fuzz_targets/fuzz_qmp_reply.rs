//! Fuzz target: QMP reply decoding.
//!
//! Arbitrary monitor lines must decode or fail with an error, never panic.
//! Valid `return` payloads are also pushed through the typed status views.
#![no_main]

use ferry_core::{MigrationInfo, StatusInfo};
use ferry_executor::qmp::{parse_reply, Reply};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(line) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(Reply::Return(value)) = parse_reply(line) {
        let _ = serde_json::from_value::<MigrationInfo>(value.clone());
        let _ = serde_json::from_value::<StatusInfo>(value);
    }
});
