//! Sesame server: the hexagonal core.
//!
//! [`SesameServer`] owns the registration lifecycle, the session directory,
//! the advertising controller and the callback dispatcher.  The radio, the
//! protocol engine and secure storage are injected as port implementations,
//! so the whole server runs on the host against simulated adapters.
//!
//! ```text
//!  BleTransport ──▶ ┌──────────────────────────────┐ ──▶ callbacks
//!                   │         SesameServer         │
//! ProtocolEngine ◀─▶│ Lifecycle · Sessions · Adv   │
//!                   └──────────────────────────────┘
//!                                  │
//!                             StoragePort
//! ```
//!
//! Everything runs on one thread.  Stack events arrive either through the
//! [`TransportEvents`] impl or are drained from the transport by
//! [`SesameServer::update`]; each runs to completion.

use core::fmt;

use log::{debug, error, info, warn};

use super::advertising::AdvertisingController;
use super::deferred::{DeferredAction, DeferredQueue};
use super::dispatcher::Dispatcher;
use super::ports::{
    BleTransport, Characteristic, CommandRequest, EngineHost, NotifyTarget, ProtocolEngine,
    ResetTrigger, ServiceLayout, StoragePort, TransportEvents,
};
use super::sessions::{SessionDirectory, SessionError};
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::identity::address::{self, BleAddress};
use crate::identity::lifecycle::{BootOrigin, RegistrationLifecycle};
use crate::identity::{DeviceIdentity, RegistrationState};
use crate::protocol::{
    ConnHandle, ItemCode, MechStatus, OpCode, ResultCode, SessionId, SharedSecret,
};

/// CCCD bit enabling notifications.
const CCCD_NOTIFY: u16 = 0x0001;

// ───────────────────────────────────────────────────────────────
// Status snapshot
// ───────────────────────────────────────────────────────────────

/// Point-in-time view for periodic diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerStatus {
    pub started: bool,
    pub registration: RegistrationState,
    pub sessions: usize,
    /// Sessions the engine reports as logged in.
    pub authenticated: usize,
    pub max_sessions: usize,
    pub advertising: bool,
    pub address: BleAddress,
    pub boot_origin: Option<BootOrigin>,
    pub advertisement_rebuilds: u32,
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.started {
            return write!(f, "not started");
        }
        if !self.registration.is_registered() {
            return write!(f, "NOT registered, advertising={}", self.advertising);
        }
        write!(
            f,
            "sessions {}/{} ({} logged in), advertising={}",
            self.sessions, self.max_sessions, self.authenticated, self.advertising
        )
    }
}

// ───────────────────────────────────────────────────────────────
// Engine host shim
// ───────────────────────────────────────────────────────────────

/// The parts of the server the engine may call back into while it is
/// itself borrowed.
struct Host<'a, T: BleTransport> {
    transport: &'a mut T,
    sessions: &'a mut SessionDirectory,
    dispatcher: &'a mut Dispatcher,
    pending_registration: &'a mut Option<(SessionId, SharedSecret)>,
}

impl<T: BleTransport> Host<'_, T> {
    fn peer_of(&mut self, session: SessionId) -> Option<BleAddress> {
        let handle = self.sessions.handle_of(session)?;
        let transport = &*self.transport;
        Some(
            self.sessions
                .peer_address(handle, |h| transport.peer_address(h))
                .unwrap_or(BleAddress::NULL),
        )
    }
}

impl<T: BleTransport> EngineHost for Host<'_, T> {
    fn write_to_central(&mut self, session: SessionId, data: &[u8]) -> bool {
        let Some(handle) = self.sessions.handle_of(session) else {
            debug!("Server: write to closed session {session}");
            return false;
        };
        match self.transport.notify(handle, data) {
            Ok(()) => true,
            Err(e) => {
                warn!("Server: notify to session {session} failed: {e}");
                false
            }
        }
    }

    fn disconnect(&mut self, session: SessionId) {
        if let Some(handle) = self.sessions.handle_of(session) {
            self.transport.disconnect(handle);
        }
    }

    fn on_registration(&mut self, session: SessionId, secret: &SharedSecret) {
        // Completed once the engine call returns; the advertisement
        // rebuild needs the engine.
        *self.pending_registration = Some((session, *secret));
    }

    fn on_command(&mut self, session: SessionId, command: &CommandRequest) -> ResultCode {
        let Some(peer) = self.peer_of(session) else {
            warn!("Server: command {:?} on unknown session {session}", command.item);
            return ResultCode::NotFound;
        };
        info!(
            "Server: command {:?} from {peer} (tag '{}', trigger {:?})",
            command.item, command.tag, command.trigger
        );
        self.dispatcher.command(peer, command)
    }
}

// ───────────────────────────────────────────────────────────────
// SesameServer
// ───────────────────────────────────────────────────────────────

pub struct SesameServer<T: BleTransport, E: ProtocolEngine, S: StoragePort> {
    config: ServerConfig,
    transport: T,
    engine: E,
    storage: S,
    lifecycle: RegistrationLifecycle,
    sessions: SessionDirectory,
    advertising: AdvertisingController,
    dispatcher: Dispatcher,
    pending_registration: Option<(SessionId, SharedSecret)>,
    boot_origin: Option<BootOrigin>,
    address: BleAddress,
    started: bool,
}

impl<T: BleTransport, E: ProtocolEngine, S: StoragePort> SesameServer<T, E, S> {
    /// Construct the server.  Nothing touches the radio or storage until
    /// [`begin`](Self::begin).
    pub fn new(config: ServerConfig, transport: T, engine: E, storage: S) -> Self {
        let identity = DeviceIdentity {
            protocol_uuid: config.uuid,
            model: config.model,
        };
        Self {
            lifecycle: RegistrationLifecycle::new(identity, config.key_scheme),
            sessions: SessionDirectory::new(config.max_sessions),
            advertising: AdvertisingController::new(
                config.advertising_params(),
                config.device_name.clone(),
            ),
            dispatcher: Dispatcher::new(),
            pending_registration: None,
            boot_origin: None,
            address: config.effective_address(),
            started: false,
            config,
            transport,
            engine,
            storage,
        }
    }

    /// Derive the BLE address controllers expect for `uuid`.
    pub fn uuid_to_ble_address(uuid: &uuid::Uuid) -> BleAddress {
        address::uuid_to_ble_address(uuid)
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Bring the server up: radio, engine, identity, GATT table and the
    /// initial advertisement.  Any error is fatal and leaves the device
    /// silent.  Advertising itself starts with
    /// [`start_advertising`](Self::start_advertising).
    pub fn begin<R: ResetTrigger + ?Sized>(&mut self, reset: &mut R) -> Result<()> {
        if self.started {
            return Err(Error::Init("begin called twice"));
        }
        self.config.validate()?;

        self.transport.init(self.address).inspect_err(|e| {
            error!("Server: BLE init failed: {e}");
        })?;
        self.engine
            .begin(self.config.model, self.config.uuid.as_bytes())
            .inspect_err(|e| error!("Server: engine begin failed: {e}"))?;

        let origin =
            self.lifecycle
                .prepare_identity(&mut self.storage, &mut self.engine, reset)?;

        self.transport.register_services(&ServiceLayout::SESAME)?;
        self.advertising.configure(&mut self.transport)?;
        self.advertising
            .set_advertising_data(&mut self.transport, &self.engine)?;

        self.boot_origin = Some(origin);
        self.started = true;
        info!(
            "Server: {} {} up as {} ({:?}, {})",
            self.config.model,
            self.config.uuid,
            self.address,
            origin,
            if self.is_registered() {
                "registered"
            } else {
                "not registered"
            }
        );
        Ok(())
    }

    pub fn start_advertising(&mut self) -> Result<()> {
        if !self.started {
            return Err(Error::NotStarted);
        }
        self.advertising.start(&mut self.transport)
    }

    pub fn stop_advertising(&mut self) -> Result<()> {
        if !self.started {
            return Err(Error::NotStarted);
        }
        self.advertising.stop(&mut self.transport)
    }

    /// One cooperative tick: drain stack events, let the engine run its
    /// housekeeping, then execute actions deferred by command handlers.
    pub fn update(&mut self) {
        if !self.started {
            return;
        }
        while let Some(event) = self.transport.poll_event() {
            event.deliver(self);
        }

        {
            let (engine, mut host) = self.split();
            engine.update(&mut host);
        }
        self.complete_registration();

        while let Some(action) = self.dispatcher.deferred().pop() {
            match action {
                DeferredAction::PublishLockStatus { locked } => {
                    if !self.send_lock_status(locked) {
                        warn!("Server: deferred lock status publish failed");
                    }
                }
            }
        }
    }

    // ── Callbacks ─────────────────────────────────────────────

    pub fn set_on_registration_callback<F>(&mut self, callback: F)
    where
        F: FnMut(BleAddress, &SharedSecret) + 'static,
    {
        self.dispatcher.set_on_registration(Box::new(callback));
    }

    pub fn set_on_command_callback<F>(&mut self, callback: F)
    where
        F: FnMut(BleAddress, &CommandRequest, &mut DeferredQueue) -> ResultCode + 'static,
    {
        self.dispatcher.set_on_command(Box::new(callback));
    }

    pub fn set_on_connect_callback<F>(&mut self, callback: F)
    where
        F: FnMut(BleAddress) + 'static,
    {
        self.dispatcher.set_on_connect(Box::new(callback));
    }

    pub fn set_on_disconnect_callback<F>(&mut self, callback: F)
    where
        F: FnMut(BleAddress, i32) + 'static,
    {
        self.dispatcher.set_on_disconnect(Box::new(callback));
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn get_session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_registered(&self) -> bool {
        self.lifecycle.is_registered()
    }

    pub fn has_session(&mut self, address: &BleAddress) -> bool {
        self.get_session_id(address).is_some()
    }

    pub fn get_session_id(&mut self, address: &BleAddress) -> Option<SessionId> {
        let transport = &self.transport;
        self.sessions
            .find_by_address(address, |h| transport.peer_address(h))
            .map(|s| s.id)
    }

    pub fn identity(&self) -> &DeviceIdentity {
        self.lifecycle.identity()
    }

    /// Own BLE address.
    pub fn address(&self) -> BleAddress {
        self.address
    }

    pub fn boot_origin(&self) -> Option<BootOrigin> {
        self.boot_origin
    }

    pub fn lifecycle(&self) -> &RegistrationLifecycle {
        &self.lifecycle
    }

    pub fn advertising(&self) -> &AdvertisingController {
        &self.advertising
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn status(&self) -> ServerStatus {
        ServerStatus {
            started: self.started,
            registration: self.lifecycle.state(),
            sessions: self.sessions.len(),
            authenticated: self
                .sessions
                .iter()
                .filter(|s| self.engine.has_session(s.id))
                .count(),
            max_sessions: self.sessions.max_sessions(),
            advertising: self.transport.is_advertising(),
            address: self.address,
            boot_origin: self.boot_origin,
            advertisement_rebuilds: self.advertising.rebuilds(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    // ── Actions ───────────────────────────────────────────────

    /// Publish the settled mechanism status to every logged-in session.
    pub fn send_lock_status(&mut self, locked: bool) -> bool {
        if !self.started {
            return false;
        }
        let status = MechStatus::settled(locked).to_bytes();
        let (engine, mut host) = self.split();
        match engine.send_notify(
            &mut host,
            NotifyTarget::Broadcast,
            OpCode::Publish,
            ItemCode::MechStatus,
            &status,
        ) {
            Ok(()) => true,
            Err(e) => {
                warn!("Server: lock status publish failed: {e}");
                false
            }
        }
    }

    /// Drop the link to `address`.  No-op if it has no session.
    pub fn disconnect(&mut self, address: &BleAddress) {
        let transport = &self.transport;
        if let Some(session) = self
            .sessions
            .find_by_address(address, |h| transport.peer_address(h))
        {
            info!("Server: disconnecting {address}");
            self.transport.disconnect(session.handle);
        }
    }

    /// Drop the link behind session `id`.  No-op if it is gone.
    pub fn disconnect_session(&mut self, id: SessionId) {
        if let Some(handle) = self.sessions.handle_of(id) {
            self.transport.disconnect(handle);
        }
    }

    // ── Internals ─────────────────────────────────────────────

    fn split(&mut self) -> (&mut E, Host<'_, T>) {
        (
            &mut self.engine,
            Host {
                transport: &mut self.transport,
                sessions: &mut self.sessions,
                dispatcher: &mut self.dispatcher,
                pending_registration: &mut self.pending_registration,
            },
        )
    }

    fn resolve_peer(&mut self, handle: ConnHandle) -> Option<BleAddress> {
        let transport = &self.transport;
        self.sessions
            .peer_address(handle, |h| transport.peer_address(h))
    }

    /// Persist a registration reported by the engine, republish the
    /// advertisement on the first one, then tell the application.
    fn complete_registration(&mut self) {
        let Some((session, secret)) = self.pending_registration.take() else {
            return;
        };
        let peer = self
            .sessions
            .handle_of(session)
            .and_then(|h| self.resolve_peer(h))
            .unwrap_or(BleAddress::NULL);
        info!("Server: registration by {peer} (session {session})");

        let outcome = self.lifecycle.on_registration(&mut self.storage, &secret);
        if outcome.transitioned {
            if let Err(e) = self
                .advertising
                .set_advertising_data(&mut self.transport, &self.engine)
            {
                error!("Server: advertisement rebuild after registration failed: {e}");
            }
        }
        self.dispatcher.registration(peer, &secret);
    }

    /// Pause advertising while the session table is full, resume it once a
    /// slot is free.
    fn refresh_advertising(&mut self) {
        let result = if self.sessions.is_full() {
            self.advertising.suspend(&mut self.transport)
        } else {
            self.advertising.resume(&mut self.transport)
        };
        if let Err(e) = result {
            warn!("Server: advertising refresh failed: {e}");
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Transport callbacks
// ───────────────────────────────────────────────────────────────

impl<T: BleTransport, E: ProtocolEngine, S: StoragePort> TransportEvents for SesameServer<T, E, S> {
    fn on_connect(&mut self, handle: ConnHandle) {
        if !self.started {
            warn!("Server: connection {handle} before begin, dropping");
            self.transport.disconnect(handle);
            return;
        }
        match self.sessions.on_connect(handle) {
            Ok(id) => {
                let peer = self.resolve_peer(handle).unwrap_or(BleAddress::NULL);
                info!(
                    "Server: {peer} connected (handle {handle}, session {id}, {}/{})",
                    self.sessions.len(),
                    self.sessions.max_sessions()
                );
                self.dispatcher.connected(peer);
                self.refresh_advertising();
            }
            Err(SessionError::CapacityExceeded) => {
                warn!("Server: session limit reached, refusing handle {handle}");
                self.transport.disconnect(handle);
            }
            Err(e) => warn!("Server: handle {handle}: {e}"),
        }
    }

    fn on_disconnect(&mut self, handle: ConnHandle, reason: i32) {
        let live_peer = self.resolve_peer(handle);
        let Some(session) = self.sessions.on_disconnect(handle) else {
            debug!("Server: disconnect of handle {handle} without session");
            return;
        };
        let peer = session
            .peer_address()
            .or(live_peer)
            .unwrap_or(BleAddress::NULL);
        info!(
            "Server: {peer} disconnected (session {}, reason {reason:#x})",
            session.id
        );
        self.engine.on_disconnected(session.id);
        self.dispatcher.disconnected(peer, reason);
        self.refresh_advertising();
    }

    fn on_subscribe(&mut self, handle: ConnHandle, characteristic: Characteristic, sub_value: u16) {
        if characteristic != Characteristic::Notify {
            warn!("Server: unexpected subscription on {characteristic:?}, disconnecting {handle}");
            self.transport.disconnect(handle);
            return;
        }
        if sub_value & CCCD_NOTIFY == 0 {
            debug!("Server: handle {handle} unsubscribed ({sub_value:#06x})");
            return;
        }
        let Some(id) = self.sessions.session_id_of(handle) else {
            warn!("Server: subscription from unknown handle {handle}");
            self.transport.disconnect(handle);
            return;
        };
        let result = {
            let (engine, mut host) = self.split();
            engine.on_subscribed(&mut host, id)
        };
        if let Err(e) = result {
            warn!("Server: engine refused subscription on session {id}: {e}");
            self.transport.disconnect(handle);
        }
        self.complete_registration();
    }

    fn on_read(&mut self, handle: ConnHandle, characteristic: Characteristic) {
        debug!("Server: read of {characteristic:?} by {handle} ignored");
    }

    fn on_write(&mut self, handle: ConnHandle, characteristic: Characteristic, data: &[u8]) {
        if characteristic != Characteristic::Write {
            debug!("Server: write to {characteristic:?} by {handle} ignored");
            return;
        }
        let Some(id) = self.sessions.session_id_of(handle) else {
            warn!("Server: write from unknown handle {handle}");
            self.transport.disconnect(handle);
            return;
        };
        let result = {
            let (engine, mut host) = self.split();
            engine.on_received(&mut host, id, data)
        };
        if let Err(e) = result {
            warn!("Server: rejected frame on session {id} ({e}), disconnecting");
            self.transport.disconnect(handle);
        }
        self.complete_registration();
    }
}
