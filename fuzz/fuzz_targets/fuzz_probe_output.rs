//! Fuzz target: `rdma link show` and `ip addr` output parsers.
#![no_main]

use ferry_executor::probe::{parse_ipv4_address, parse_rdma_netdev};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    if let Some(iface) = parse_rdma_netdev(&text) {
        assert!(!iface.is_empty());
        assert!(!iface.contains(char::is_whitespace));
    }
    let _ = parse_ipv4_address(&text);
});
