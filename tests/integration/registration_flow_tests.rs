//! Registration lifecycle end to end: fresh boot, registration, restart,
//! factory reset, foreign records and fatal storage failures.

use std::cell::RefCell;
use std::rc::Rc;

use sesame_server::app::ports::{
    BleTransport, Characteristic, EngineError, StorageError, TransportError, TransportEvents,
};
use sesame_server::drivers::button::StaticTrigger;
use sesame_server::identity::address::BleAddress;
use sesame_server::identity::store::{KEY_PRIVKEY, KEY_SECRET, KEY_UUID, NAMESPACE};
use sesame_server::protocol::SharedSecret;
use sesame_server::{BootOrigin, Error, FreshReason, KeyScheme};
use uuid::Uuid;

use crate::mock_hw::{
    EngineCall, MockStorage, TEST_SECRET, TestServer, central, config, device_uuid,
    register_frame, server_with,
};

type Registrations = Rc<RefCell<Vec<(BleAddress, SharedSecret)>>>;

fn boot(storage: MockStorage, reset: bool) -> TestServer {
    let mut server = server_with(config(), storage);
    server.begin(&mut StaticTrigger(reset)).unwrap();
    server.start_advertising().unwrap();
    server
}

fn record_registrations(server: &mut TestServer) -> Registrations {
    let log: Registrations = Rc::default();
    let sink = Rc::clone(&log);
    server.set_on_registration_callback(move |peer: BleAddress, secret: &SharedSecret| {
        sink.borrow_mut().push((peer, *secret));
    });
    log
}

fn register(server: &mut TestServer, n: u8, secret: &SharedSecret) {
    let handle = server.transport_mut().sim_connect(central(n));
    server.update();
    server
        .transport_mut()
        .sim_write(handle, Characteristic::Write, &register_frame(secret));
    server.update();
}

/// Boot, register with the test secret and return the flash contents.
fn registered_flash() -> MockStorage {
    let mut server = boot(MockStorage::new(), false);
    register(&mut server, 1, &TEST_SECRET);
    assert!(server.is_registered());
    server.storage().reboot()
}

#[test]
fn fresh_device_registration() {
    let mut server = boot(MockStorage::new(), false);
    let registrations = record_registrations(&mut server);

    assert_eq!(server.boot_origin(), Some(BootOrigin::Fresh(FreshReason::NoRecord)));
    assert!(!server.is_registered());
    assert_eq!(server.engine().count(|c| *c == EngineCall::GenerateKeypair), 1);
    let private_key = server.engine().private_key().unwrap();
    assert_eq!(server.storage().raw(NAMESPACE, KEY_PRIVKEY), Some(&private_key[..]));
    assert_eq!(
        server.storage().raw(NAMESPACE, KEY_UUID),
        Some(&device_uuid().as_bytes()[..])
    );
    assert_eq!(server.storage().raw(NAMESPACE, KEY_SECRET), None);

    let payload_before = server.advertising().payload().cloned().unwrap();
    let adv_before = server.transport().adv_data().to_vec();

    register(&mut server, 1, &TEST_SECRET);

    assert!(server.is_registered());
    assert_eq!(server.storage().raw(NAMESPACE, KEY_SECRET), Some(&TEST_SECRET[..]));
    assert_eq!(*registrations.borrow(), vec![(central(1), TEST_SECRET)]);

    let payload_after = server.advertising().payload().cloned().unwrap();
    assert_ne!(payload_before, payload_after);
    assert_ne!(adv_before, server.transport().adv_data());
    assert!(server.transport().is_advertising());

    // Key material is the one generated at boot plus the new secret.
    assert_eq!(server.engine().private_key(), Some(private_key));
    assert!(
        server
            .transport()
            .sim_notifications()
            .iter()
            .any(|(_, frame)| frame.first() == Some(&0x01))
    );
}

#[test]
fn identity_written_tag_last() {
    let server = boot(MockStorage::new(), false);
    assert_eq!(server.storage().writes, vec![KEY_PRIVKEY, KEY_UUID]);
}

#[test]
fn registration_survives_restart() {
    let flash = registered_flash();
    let stored_key: [u8; 32] = flash.raw(NAMESPACE, KEY_PRIVKEY).unwrap().try_into().unwrap();

    let server = boot(flash, false);
    assert_eq!(server.boot_origin(), Some(BootOrigin::Restored));
    assert!(server.is_registered());
    let engine = server.engine();
    assert_eq!(engine.count(|c| *c == EngineCall::GenerateKeypair), 0);
    assert_eq!(engine.count(|c| *c == EngineCall::LoadKey(stored_key)), 1);
    assert_eq!(engine.count(|c| *c == EngineCall::SetRegistered(TEST_SECRET)), 1);
    assert_eq!(server.storage().writes, Vec::<String>::new());
}

#[test]
fn factory_reset_discards_registration() {
    let flash = registered_flash();
    let old_key = flash.raw(NAMESPACE, KEY_PRIVKEY).unwrap().to_vec();

    let server = boot(flash, true);
    assert_eq!(
        server.boot_origin(),
        Some(BootOrigin::Fresh(FreshReason::ResetRequested))
    );
    assert!(!server.is_registered());
    let new_key = server.storage().raw(NAMESPACE, KEY_PRIVKEY).unwrap().to_vec();
    assert_ne!(old_key, new_key);
    assert_eq!(server.storage().raw(NAMESPACE, KEY_SECRET), None);

    // The reset sticks on the next plain boot.
    let server = boot(server.storage().reboot(), false);
    assert_eq!(server.boot_origin(), Some(BootOrigin::Restored));
    assert!(!server.is_registered());
}

#[test]
fn record_for_other_uuid_is_ignored() {
    let flash = registered_flash();
    let other = Uuid::parse_str("00000000-0000-4000-8000-000000000001").unwrap();

    let mut cfg = config();
    cfg.uuid = other;
    let mut server = server_with(cfg, flash);
    server.begin(&mut StaticTrigger(false)).unwrap();

    assert_eq!(
        server.boot_origin(),
        Some(BootOrigin::Fresh(FreshReason::TagMismatch))
    );
    assert!(!server.is_registered());
    assert_eq!(
        server.storage().raw(NAMESPACE, KEY_UUID),
        Some(&other.as_bytes()[..])
    );
    assert_eq!(server.storage().raw(NAMESPACE, KEY_SECRET), None);
}

#[test]
fn truncated_key_starts_fresh() {
    let mut flash = registered_flash();
    flash.put_raw(NAMESPACE, KEY_PRIVKEY, &[0xAB; 31]);

    let server = boot(flash, false);
    assert_eq!(server.boot_origin(), Some(BootOrigin::Fresh(FreshReason::Corrupt)));
    assert!(!server.is_registered());
}

#[test]
fn refused_stored_key_aborts_begin_and_keeps_record() {
    let flash = registered_flash();
    let key = flash.raw(NAMESPACE, KEY_PRIVKEY).map(<[u8]>::to_vec);
    let mut server = server_with(config(), flash);
    server.engine_mut().reject_stored_key = true;

    assert_eq!(
        server.begin(&mut StaticTrigger(false)),
        Err(Error::Engine(EngineError::KeyFailure))
    );
    assert_eq!(server.boot_origin(), None);
    assert_eq!(server.engine().count(|c| *c == EngineCall::GenerateKeypair), 0);
    assert_eq!(server.storage().raw(NAMESPACE, KEY_PRIVKEY).map(<[u8]>::to_vec), key);
    assert_eq!(server.storage().raw(NAMESPACE, KEY_SECRET), Some(&TEST_SECRET[..]));
    assert!(server.transport().services().is_none());
}

#[test]
fn refused_secret_keeps_secret_only_pairing() {
    let mut cfg = config();
    cfg.key_scheme = KeyScheme::SharedSecretOnly;
    let mut server = server_with(cfg.clone(), MockStorage::new());
    server.begin(&mut StaticTrigger(false)).unwrap();
    register(&mut server, 1, &TEST_SECRET);

    let mut server = server_with(cfg.clone(), server.storage().reboot());
    server.engine_mut().refuse_secret = true;
    assert_eq!(
        server.begin(&mut StaticTrigger(false)),
        Err(Error::Engine(EngineError::KeyFailure))
    );
    assert_eq!(server.storage().raw(NAMESPACE, KEY_SECRET), Some(&TEST_SECRET[..]));

    // Once the engine cooperates again the pairing is still there.
    let mut server = server_with(cfg, server.storage().reboot());
    server.begin(&mut StaticTrigger(false)).unwrap();
    assert_eq!(server.boot_origin(), Some(BootOrigin::Restored));
    assert!(server.is_registered());
}

#[test]
fn registration_raised_on_subscribe_completes_immediately() {
    let mut server = boot(MockStorage::new(), false);
    let registrations = record_registrations(&mut server);
    server.engine_mut().register_on_subscribe = Some(TEST_SECRET);

    let handle = server.transport_mut().sim_connect(central(1));
    server.update();
    server.on_subscribe(handle, Characteristic::Notify, 0x0001);

    assert!(server.is_registered());
    assert_eq!(*registrations.borrow(), vec![(central(1), TEST_SECRET)]);
    assert_eq!(server.storage().raw(NAMESPACE, KEY_SECRET), Some(&TEST_SECRET[..]));
    assert_eq!(server.transport().adv_data().last(), Some(&0x01));
}

#[test]
fn legacy_record_migrates_to_keypair() {
    let mut flash = MockStorage::new();
    flash.put_raw(NAMESPACE, KEY_UUID, device_uuid().as_bytes());
    flash.put_raw(NAMESPACE, KEY_SECRET, &TEST_SECRET);

    let server = boot(flash, false);
    assert_eq!(
        server.boot_origin(),
        Some(BootOrigin::Fresh(FreshReason::SchemeMigration))
    );
    assert!(!server.is_registered());
    assert_eq!(server.storage().raw(NAMESPACE, KEY_SECRET), None);
    assert!(server.storage().raw(NAMESPACE, KEY_PRIVKEY).is_some());
}

#[test]
fn keypair_record_dropped_by_secret_only_build() {
    let flash = registered_flash();
    let mut cfg = config();
    cfg.key_scheme = KeyScheme::SharedSecretOnly;
    let mut server = server_with(cfg, flash);
    server.begin(&mut StaticTrigger(false)).unwrap();

    assert_eq!(
        server.boot_origin(),
        Some(BootOrigin::Fresh(FreshReason::SchemeMigration))
    );
    assert!(!server.is_registered());
    assert_eq!(server.engine().count(|c| *c == EngineCall::GenerateKeypair), 0);
    assert_eq!(server.storage().raw(NAMESPACE, KEY_PRIVKEY), None);
    assert_eq!(server.storage().raw(NAMESPACE, KEY_SECRET), None);
}

#[test]
fn secret_only_scheme_round_trip() {
    let mut cfg = config();
    cfg.key_scheme = KeyScheme::SharedSecretOnly;
    let mut server = server_with(cfg.clone(), MockStorage::new());
    server.begin(&mut StaticTrigger(false)).unwrap();
    server.start_advertising().unwrap();
    assert!(!server.is_registered());

    register(&mut server, 1, &TEST_SECRET);
    assert!(server.is_registered());
    assert_eq!(server.storage().raw(NAMESPACE, KEY_PRIVKEY), None);

    let mut server = server_with(cfg, server.storage().reboot());
    server.begin(&mut StaticTrigger(false)).unwrap();
    assert_eq!(server.boot_origin(), Some(BootOrigin::Restored));
    assert!(server.is_registered());
}

#[test]
fn second_registration_overwrites_secret_only() {
    let mut server = boot(MockStorage::new(), false);
    let registrations = record_registrations(&mut server);
    register(&mut server, 1, &TEST_SECRET);
    let rebuilds = server.advertising().rebuilds();

    let other: SharedSecret = [0xA5; 16];
    register(&mut server, 2, &other);

    assert!(server.is_registered());
    assert_eq!(server.storage().raw(NAMESPACE, KEY_SECRET), Some(&other[..]));
    assert_eq!(server.advertising().rebuilds(), rebuilds);
    assert_eq!(registrations.borrow().len(), 2);
    assert_eq!(registrations.borrow()[1], (central(2), other));
}

#[test]
fn failed_secret_write_keeps_device_usable() {
    let mut server = boot(MockStorage::new(), false);
    let registrations = record_registrations(&mut server);
    server.storage_mut().fail_writes = true;

    register(&mut server, 1, &TEST_SECRET);
    assert!(server.is_registered());
    assert_eq!(registrations.borrow().len(), 1);

    // Nothing reached flash, so the next boot is unregistered again.
    let server = boot(server.storage().reboot(), false);
    assert!(!server.is_registered());
}

// ── Fatal startup failures ────────────────────────────────────

#[test]
fn storage_open_failure_is_fatal() {
    let mut storage = MockStorage::new();
    storage.fail_open = true;
    let mut server = server_with(config(), storage);

    assert_eq!(
        server.begin(&mut StaticTrigger(false)),
        Err(Error::Storage(StorageError::Unavailable))
    );
    assert_eq!(server.start_advertising(), Err(Error::NotStarted));
    assert!(!server.transport().is_advertising());
    assert!(server.transport().services().is_none());
}

#[test]
fn short_write_is_fatal() {
    let mut storage = MockStorage::new();
    storage.short_writes = true;
    let mut server = server_with(config(), storage);

    assert!(matches!(
        server.begin(&mut StaticTrigger(false)),
        Err(Error::ShortWrite { .. })
    ));
    assert_eq!(server.start_advertising(), Err(Error::NotStarted));
}

#[test]
fn write_error_is_fatal() {
    let mut storage = MockStorage::new();
    storage.fail_writes = true;
    let mut server = server_with(config(), storage);

    assert_eq!(
        server.begin(&mut StaticTrigger(false)),
        Err(Error::Storage(StorageError::IoError))
    );
}

#[test]
fn key_generation_failure_is_fatal() {
    let mut server = server_with(config(), MockStorage::new());
    server.engine_mut().fail_keygen = true;
    assert!(matches!(
        server.begin(&mut StaticTrigger(false)),
        Err(Error::Engine(_))
    ));
    assert!(server.transport().services().is_none());
}

#[test]
fn engine_begin_failure_is_fatal() {
    let mut server = server_with(config(), MockStorage::new());
    server.engine_mut().fail_begin = true;
    assert!(matches!(
        server.begin(&mut StaticTrigger(false)),
        Err(Error::Engine(_))
    ));
    assert_eq!(server.storage().opens, 0);
}

#[test]
fn radio_init_failure_is_fatal() {
    let mut server = server_with(config(), MockStorage::new());
    server.transport_mut().sim_fail_init(true);
    assert_eq!(
        server.begin(&mut StaticTrigger(false)),
        Err(Error::Transport(TransportError::InitFailed))
    );
}

#[test]
fn invalid_config_is_rejected_before_io() {
    let mut cfg = config();
    cfg.max_sessions = 0;
    let mut server = server_with(cfg, MockStorage::new());
    assert!(matches!(
        server.begin(&mut StaticTrigger(false)),
        Err(Error::Config(_))
    ));
    assert!(server.transport().address().is_none());
}

#[test]
fn begin_twice_is_rejected() {
    let mut server = boot(MockStorage::new(), false);
    assert!(matches!(
        server.begin(&mut StaticTrigger(false)),
        Err(Error::Init(_))
    ));
    assert!(server.transport().is_advertising());
}
