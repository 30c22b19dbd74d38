//! Routes protocol events to application callbacks.

use log::debug;

use super::deferred::DeferredQueue;
use crate::app::ports::CommandRequest;
use crate::identity::address::BleAddress;
use crate::protocol::{ResultCode, SharedSecret};

pub type RegistrationCallback = Box<dyn FnMut(BleAddress, &SharedSecret)>;
pub type CommandCallback =
    Box<dyn FnMut(BleAddress, &CommandRequest, &mut DeferredQueue) -> ResultCode>;
pub type ConnectCallback = Box<dyn FnMut(BleAddress)>;
pub type DisconnectCallback = Box<dyn FnMut(BleAddress, i32)>;

#[derive(Default)]
pub struct Dispatcher {
    on_registration: Option<RegistrationCallback>,
    on_command: Option<CommandCallback>,
    on_connect: Option<ConnectCallback>,
    on_disconnect: Option<DisconnectCallback>,
    deferred: DeferredQueue,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_on_registration(&mut self, callback: RegistrationCallback) {
        self.on_registration = Some(callback);
    }

    pub fn set_on_command(&mut self, callback: CommandCallback) {
        self.on_command = Some(callback);
    }

    pub fn set_on_connect(&mut self, callback: ConnectCallback) {
        self.on_connect = Some(callback);
    }

    pub fn set_on_disconnect(&mut self, callback: DisconnectCallback) {
        self.on_disconnect = Some(callback);
    }

    pub fn registration(&mut self, peer: BleAddress, secret: &SharedSecret) {
        if let Some(cb) = self.on_registration.as_mut() {
            cb(peer, secret);
        }
    }

    /// Run the command handler.  Without one the peer gets `NotSupported`.
    pub fn command(&mut self, peer: BleAddress, request: &CommandRequest) -> ResultCode {
        let Some(cb) = self.on_command.as_mut() else {
            debug!("Dispatcher: no command handler for {:?}", request.item);
            return ResultCode::NotSupported;
        };
        cb(peer, request, &mut self.deferred)
    }

    pub fn connected(&mut self, peer: BleAddress) {
        if let Some(cb) = self.on_connect.as_mut() {
            cb(peer);
        }
    }

    pub fn disconnected(&mut self, peer: BleAddress, reason: i32) {
        if let Some(cb) = self.on_disconnect.as_mut() {
            cb(peer, reason);
        }
    }

    pub fn deferred(&mut self) -> &mut DeferredQueue {
        &mut self.deferred
    }
}
