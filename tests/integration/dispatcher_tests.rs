//! Application callbacks: connect/disconnect, command handling, the
//! unsupported-command default and deferred lock-status publishing.

use std::cell::RefCell;
use std::rc::Rc;

use sesame_server::adapters::ble::REASON_REMOTE_TERMINATED;
use sesame_server::app::deferred::DeferredQueue;
use sesame_server::app::ports::{
    Characteristic, CommandRequest, NotifyTarget, TransportEvents,
};
use sesame_server::drivers::button::StaticTrigger;
use sesame_server::identity::address::BleAddress;
use sesame_server::protocol::{
    ConnHandle, ItemCode, MechStatus, OpCode, ResultCode, TriggerType,
};

use crate::mock_hw::{
    EngineCall, FRAME_COMMAND, MockStorage, TEST_SECRET, TestServer, central, command_frame,
    config, register_frame, server_with,
};

fn started() -> TestServer {
    let mut server = server_with(config(), MockStorage::new());
    server.begin(&mut StaticTrigger(false)).unwrap();
    server.start_advertising().unwrap();
    server
}

/// Connect central `n` and log it in by registering.
fn logged_in(server: &mut TestServer, n: u8) -> ConnHandle {
    let handle = server.transport_mut().sim_connect(central(n));
    server.update();
    server
        .transport_mut()
        .sim_write(handle, Characteristic::Write, &register_frame(&TEST_SECRET));
    server.update();
    server.transport_mut().sim_take_notifications();
    handle
}

fn command_replies(server: &TestServer, handle: ConnHandle) -> Vec<Vec<u8>> {
    server
        .transport()
        .sim_notifications()
        .iter()
        .filter(|(h, frame)| *h == handle && frame.first() == Some(&FRAME_COMMAND))
        .map(|(_, frame)| frame.clone())
        .collect()
}

#[test]
fn command_without_handler_is_not_supported() {
    let mut server = started();
    let h = logged_in(&mut server, 1);

    server
        .transport_mut()
        .sim_write(h, Characteristic::Write, &command_frame(ItemCode::Lock, None, "app"));
    server.update();

    assert_eq!(
        command_replies(&server, h),
        vec![vec![FRAME_COMMAND, u8::from(ItemCode::Lock), ResultCode::NotSupported.code()]]
    );
    assert!(server.transport().sim_is_connected(h));
}

#[test]
fn command_handler_sees_peer_and_request() {
    let mut server = started();
    let seen: Rc<RefCell<Vec<(BleAddress, CommandRequest)>>> = Rc::default();
    let sink = Rc::clone(&seen);
    server.set_on_command_callback(
        move |peer: BleAddress, request: &CommandRequest, _deferred: &mut DeferredQueue| {
            sink.borrow_mut().push((peer, request.clone()));
            ResultCode::Success
        },
    );
    let h = logged_in(&mut server, 1);

    server.transport_mut().sim_write(
        h,
        Characteristic::Write,
        &command_frame(ItemCode::Unlock, Some(3), "remote"),
    );
    server
        .transport_mut()
        .sim_write(h, Characteristic::Write, &command_frame(ItemCode::Lock, None, "app"));
    server.update();

    let seen = seen.borrow();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].0, central(1));
    assert_eq!(seen[0].1.item, ItemCode::Unlock);
    assert_eq!(seen[0].1.tag, "remote");
    assert_eq!(seen[0].1.trigger, Some(TriggerType(3)));
    assert_eq!(seen[1].1.item, ItemCode::Lock);
    assert_eq!(seen[1].1.trigger, None);

    let replies = command_replies(&server, h);
    assert!(replies.iter().all(|r| r[2] == ResultCode::Success.code()));
}

#[test]
fn deferred_lock_status_runs_on_update() {
    let mut server = started();
    server.set_on_command_callback(
        |_peer: BleAddress, request: &CommandRequest, deferred: &mut DeferredQueue| {
            let locked = request.item == ItemCode::Lock;
            deferred.publish_lock_status(locked);
            ResultCode::Success
        },
    );
    let h = logged_in(&mut server, 1);
    let publishes =
        |s: &TestServer| s.engine().count(|c| matches!(c, EngineCall::Notify { .. }));

    // Delivered straight to the server: the handler answers, nothing is
    // published until the next tick.
    server.on_write(h, Characteristic::Write, &command_frame(ItemCode::Lock, None, "app"));
    assert_eq!(command_replies(&server, h).len(), 1);
    assert_eq!(publishes(&server), 0);

    server.update();
    assert_eq!(publishes(&server), 1);
    assert_eq!(
        server.engine().notifications()[0],
        &EngineCall::Notify {
            target: NotifyTarget::Broadcast,
            op: OpCode::Publish,
            item: ItemCode::MechStatus,
            payload: MechStatus::settled(true).to_bytes().to_vec(),
        }
    );

    let status_frames: Vec<_> = server
        .transport()
        .sim_notifications()
        .iter()
        .filter(|(_, f)| f.first() == Some(&(OpCode::Publish as u8)))
        .collect();
    assert_eq!(status_frames.len(), 1);
    assert_eq!(status_frames[0].0, h);

    // Drained: another tick publishes nothing new.
    server.update();
    assert_eq!(publishes(&server), 1);
}

#[test]
fn send_lock_status_broadcasts_to_logged_in_sessions() {
    let mut server = started();
    let h1 = logged_in(&mut server, 1);
    let h2 = server.transport_mut().sim_connect(central(2));
    server.update();

    assert!(server.send_lock_status(false));

    let recipients: Vec<ConnHandle> = server
        .transport()
        .sim_notifications()
        .iter()
        .map(|(h, _)| *h)
        .collect();
    assert_eq!(recipients, vec![h1]);
    assert!(!recipients.contains(&h2));
    let frame = &server.transport().sim_notifications()[0].1;
    assert_eq!(&frame[2..], &MechStatus::settled(false).to_bytes());
}

#[test]
fn send_lock_status_before_begin_fails() {
    let mut server = server_with(config(), MockStorage::new());
    assert!(!server.send_lock_status(true));
    assert!(server.engine().notifications().is_empty());
}

#[test]
fn connect_and_disconnect_callbacks() {
    let mut server = started();
    let events: Rc<RefCell<Vec<String>>> = Rc::default();
    let on_connect = Rc::clone(&events);
    server.set_on_connect_callback(move |peer: BleAddress| {
        on_connect.borrow_mut().push(format!("up {peer}"));
    });
    let on_disconnect = Rc::clone(&events);
    server.set_on_disconnect_callback(move |peer: BleAddress, reason: i32| {
        on_disconnect.borrow_mut().push(format!("down {peer} {reason:#x}"));
    });

    let h = server.transport_mut().sim_connect(central(9));
    server.update();
    server.transport_mut().sim_disconnect(h, REASON_REMOTE_TERMINATED);
    server.update();

    assert_eq!(
        *events.borrow(),
        vec![
            "up c0:00:00:00:00:09".to_owned(),
            "down c0:00:00:00:00:09 0x13".to_owned()
        ]
    );
}

#[test]
fn refused_connection_reaches_no_callback() {
    let mut cfg = config();
    cfg.max_sessions = 1;
    let mut server = server_with(cfg, MockStorage::new());
    server.begin(&mut StaticTrigger(false)).unwrap();
    let count = Rc::new(RefCell::new(0));
    let sink = Rc::clone(&count);
    server.set_on_connect_callback(move |_peer: BleAddress| *sink.borrow_mut() += 1);
    let drops = Rc::new(RefCell::new(0));
    let drop_sink = Rc::clone(&drops);
    server.set_on_disconnect_callback(move |_peer: BleAddress, _reason: i32| {
        *drop_sink.borrow_mut() += 1;
    });

    server.transport_mut().sim_connect(central(1));
    server.transport_mut().sim_connect(central(2));
    server.update();

    assert_eq!(*count.borrow(), 1);
    assert_eq!(*drops.borrow(), 0);
    assert_eq!(server.get_session_count(), 1);
}
