//! Fuzz target: identity record loader
//!
//! Fills the `sesameserver` namespace with arbitrary blobs and runs
//! `IdentityStore::load` for both key schemes, verifying:
//! - No panics under arbitrary byte inputs
//! - A `Valid` record always carries the requested identity tag
//! - A `Valid` record is always in the layout of the requested scheme
//!
//! cargo fuzz run fuzz_identity_record

#![no_main]

use libfuzzer_sys::fuzz_target;
use sesame_server::adapters::nvs::NvsAdapter;
use sesame_server::app::ports::StoragePort;
use sesame_server::identity::store::{
    IdentityStore, KEY_PRIVKEY, KEY_SECRET, KEY_UUID, NAMESPACE, RecordLookup,
};
use sesame_server::identity::KeyScheme;
use uuid::Uuid;

const UUID: Uuid = Uuid::from_bytes([0x5E; 16]);

fuzz_target!(|data: &[u8]| {
    if data.len() < 3 {
        return;
    }

    // Header: three length bytes (0xFF = absent), then the blobs back to back.
    let (header, mut rest) = data.split_at(3);
    let mut nvs = match NvsAdapter::new() {
        Ok(nvs) => nvs,
        Err(_) => return,
    };
    for (key, len) in [KEY_UUID, KEY_SECRET, KEY_PRIVKEY].into_iter().zip(header) {
        if *len == 0xFF {
            continue;
        }
        let take = (*len as usize).min(rest.len());
        let (blob, tail) = rest.split_at(take);
        let _ = nvs.write(NAMESPACE, key, blob);
        rest = tail;
    }

    let store = IdentityStore::new(&mut nvs);
    for scheme in [KeyScheme::KeyPair, KeyScheme::SharedSecretOnly] {
        if let RecordLookup::Valid(record) = store.load(&UUID, scheme) {
            assert!(record.belongs_to(&UUID));
            assert_eq!(record.key_material.scheme(), scheme);
        }
    }
});
