//! Advertising: startup data, explicit start/stop, rebuild on registration
//! and the frozen GATT table.

use sesame_server::app::ports::{BleTransport, Characteristic, ServiceLayout, TransportError};
use sesame_server::drivers::button::StaticTrigger;
use sesame_server::identity::address::BleAddress;
use sesame_server::protocol::SESAME_SERVICE_UUID16;
use sesame_server::Error;

use crate::mock_hw::{
    MockStorage, TEST_SECRET, TestServer, central, config, device_uuid, register_frame,
    server_with,
};

fn begun(storage: MockStorage) -> TestServer {
    let mut server = server_with(config(), storage);
    server.begin(&mut StaticTrigger(false)).unwrap();
    server
}

fn register(server: &mut TestServer) {
    let handle = server.transport_mut().sim_connect(central(1));
    server.update();
    server
        .transport_mut()
        .sim_write(handle, Characteristic::Write, &register_frame(&TEST_SECRET));
    server.update();
}

#[test]
fn begin_prepares_but_does_not_advertise() {
    let server = begun(MockStorage::new());
    let ble = server.transport();

    assert!(!ble.is_advertising());
    assert_eq!(ble.services(), Some(&ServiceLayout::SESAME));

    let params = ble.advertising_params().unwrap();
    assert_eq!(params.min_interval, 1000);
    assert_eq!(params.max_interval, 1500);
    assert_eq!(params.service_uuid16, SESAME_SERVICE_UUID16);

    assert_eq!(
        ble.adv_data(),
        &[0x02, 0x01, 0x06, 0x03, 0x03, 0x81, 0xFD, 0x05, 0xFF, 0x5A, 0x05, 0x05, 0x00]
    );
    assert_eq!(&ble.scan_response()[2..], b"Sesame Server");
    assert_eq!(ble.sim_advertisement_updates(), 1);
}

#[test]
fn address_derived_from_uuid() {
    let server = begun(MockStorage::new());
    let expected = TestServer::uuid_to_ble_address(&device_uuid());
    assert_eq!(expected.to_string(), "d6:78:90:ab:cd:ef");
    assert_eq!(server.address(), expected);
    assert_eq!(server.transport().address(), Some(expected));
}

#[test]
fn configured_address_overrides_derivation() {
    let own: BleAddress = "c1:22:33:44:55:66".parse().unwrap();
    let mut cfg = config();
    cfg.address = Some(own);
    let mut server = server_with(cfg, MockStorage::new());
    server.begin(&mut StaticTrigger(false)).unwrap();
    assert_eq!(server.transport().address(), Some(own));
}

#[test]
fn public_configured_address_is_rejected() {
    let mut cfg = config();
    cfg.address = Some("01:22:33:44:55:66".parse().unwrap());
    let mut server = server_with(cfg, MockStorage::new());
    assert!(matches!(
        server.begin(&mut StaticTrigger(false)),
        Err(Error::Config(_))
    ));
}

#[test]
fn configured_intervals_reach_the_radio() {
    let mut cfg = config();
    cfg.adv_min_interval = 160;
    cfg.adv_max_interval = 320;
    let mut server = server_with(cfg, MockStorage::new());
    server.begin(&mut StaticTrigger(false)).unwrap();
    let params = server.transport().advertising_params().unwrap();
    assert_eq!((params.min_interval, params.max_interval), (160, 320));
}

#[test]
fn start_and_stop_are_idempotent() {
    let mut server = begun(MockStorage::new());
    let updates = server.transport().sim_advertisement_updates();

    server.start_advertising().unwrap();
    server.start_advertising().unwrap();
    assert!(server.transport().is_advertising());

    server.stop_advertising().unwrap();
    server.stop_advertising().unwrap();
    assert!(!server.transport().is_advertising());

    assert_eq!(server.transport().sim_advertisement_updates(), updates);
    assert_eq!(server.advertising().rebuilds(), 1);
}

#[test]
fn advertising_requires_begin() {
    let mut server = server_with(config(), MockStorage::new());
    assert_eq!(server.start_advertising(), Err(Error::NotStarted));
    assert_eq!(server.stop_advertising(), Err(Error::NotStarted));
    assert!(!server.transport().is_advertising());
}

#[test]
fn unchanged_state_gives_identical_bytes() {
    let flash = {
        let mut server = begun(MockStorage::new());
        server.start_advertising().unwrap();
        register(&mut server);
        server.storage().reboot()
    };
    let first = begun(flash.reboot());
    let second = begun(flash);
    assert_eq!(first.transport().adv_data(), second.transport().adv_data());
    assert_eq!(first.advertising().payload(), second.advertising().payload());
}

#[test]
fn registration_rebuilds_exactly_once_and_restarts() {
    let mut server = begun(MockStorage::new());
    server.start_advertising().unwrap();
    let updates = server.transport().sim_advertisement_updates();

    register(&mut server);

    assert_eq!(server.advertising().rebuilds(), 2);
    assert_eq!(server.transport().sim_advertisement_updates(), updates + 1);
    assert_eq!(server.transport().adv_data().last(), Some(&0x01));
    assert!(server.transport().is_advertising());
}

#[test]
fn registration_rebuild_keeps_stopped_radio_stopped() {
    let mut server = begun(MockStorage::new());
    register(&mut server);

    assert!(server.is_registered());
    assert_eq!(server.transport().adv_data().last(), Some(&0x01));
    assert!(!server.transport().is_advertising());
}

#[test]
fn gatt_table_is_frozen_once_advertising() {
    let mut server = begun(MockStorage::new());
    server.start_advertising().unwrap();
    assert_eq!(
        server
            .transport_mut()
            .register_services(&ServiceLayout::SESAME),
        Err(TransportError::ServicesLocked)
    );
}

#[test]
fn failed_rebuild_restarts_radio_with_old_payload() {
    let mut server = begun(MockStorage::new());
    server.start_advertising().unwrap();
    let before = server.transport().adv_data().to_vec();

    server.engine_mut().fail_payload = true;
    register(&mut server);
    server.engine_mut().fail_payload = false;
    for _ in 0..5 {
        server.update();
    }

    assert!(server.is_registered());
    assert!(server.advertising().is_wanted());
    assert!(server.transport().is_advertising());
    assert_eq!(server.transport().adv_data(), &before[..]);
    assert_eq!(server.advertising().rebuilds(), 1);
}

#[test]
fn failed_rebuild_keeps_stopped_radio_stopped() {
    let mut server = begun(MockStorage::new());
    server.engine_mut().fail_payload = true;
    register(&mut server);

    assert!(server.is_registered());
    assert!(!server.transport().is_advertising());
    assert_eq!(server.advertising().rebuilds(), 1);
}
