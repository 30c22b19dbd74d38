//! Fuzz target: `BleAddress` parsing and UUID derivation
//!
//! Feeds arbitrary text to `BleAddress::from_str` and arbitrary bytes to
//! `ble_address_from_uuid_bytes`, verifying:
//! - No panics under arbitrary input
//! - Every accepted address prints back to text that parses to itself
//! - Derivation succeeds exactly for 16-byte input and always yields a
//!   static random address
//!
//! cargo fuzz run fuzz_address_parse

#![no_main]

use libfuzzer_sys::fuzz_target;
use sesame_server::identity::address::{BleAddress, ble_address_from_uuid_bytes};

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = core::str::from_utf8(data) {
        if let Ok(address) = text.parse::<BleAddress>() {
            let printed = address.to_string();
            assert_eq!(printed.parse::<BleAddress>(), Ok(address));
        }
    }

    match ble_address_from_uuid_bytes(data) {
        Some(address) => {
            assert_eq!(data.len(), 16);
            assert!(address.is_static_random());
        }
        None => assert_ne!(data.len(), 16),
    }
});
