//! Fuzz target for FTN address parsing

#![no_main]

use binkp_core::{FtnAddress, parse_address_list};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(addr) = text.parse::<FtnAddress>() {
        let again: FtnAddress = addr.to_string().parse().expect("displayed address parses");
        assert_eq!(again, addr);
    }
    for addr in parse_address_list(text) {
        assert!(addr.same_node(&addr));
    }
});
