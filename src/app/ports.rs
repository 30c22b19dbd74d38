//! Port traits — the hexagonal boundary between the server core and the
//! outside world.
//!
//! ```text
//!   BLE stack ──▶ TransportEvents ──▶ SesameServer ──▶ ProtocolEngine
//!       ▲                                  │  ▲               │
//!       └────────── BleTransport ◀─────────┘  └── EngineHost ◀┘
//! ```
//!
//! Driven adapters (radio, secure storage, reset button) implement these
//! traits.  [`SesameServer`](super::server::SesameServer) consumes them via
//! generics, so the core never touches hardware directly and runs unchanged
//! on the host under test.
//!
//! ## Security notes
//!
//! - **StoragePort** implementations SHOULD place the `sesameserver`
//!   namespace on an encrypted partition; it holds the device private key.
//! - A short write is reported through the returned length, never hidden.
//! - All port errors are typed; callers must handle every variant explicitly.

use core::fmt;

use crate::identity::address::BleAddress;
use crate::protocol::{
    ConnHandle, ItemCode, Model, OpCode, PrivateKey, PublicKey, ResultCode, SessionId,
    SharedSecret, TriggerType, UUID_SIZE,
};

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: core ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage of named byte blobs.
///
/// # Security
///
/// - Keys are namespaced to prevent collisions between subsystems.
/// - Each write MUST be atomic per key: no torn blobs on power loss.
///   Ordering across keys is the caller's concern.
pub trait StoragePort {
    /// Make `namespace` available for reads and writes.  Failure here means
    /// the storage backend itself is unusable.
    fn open(&mut self, namespace: &str) -> Result<(), StorageError>;

    /// Read a value into `buf`.  Returns the stored length.  A value longer
    /// than `buf` yields [`StorageError::InvalidLength`].
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value.  Returns the number of bytes persisted.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<usize, StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Generic I/O error.
    IoError,
    /// Stored value does not fit the caller's buffer.
    InvalidLength,
    /// Backend or namespace could not be opened.
    Unavailable,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
            Self::InvalidLength => write!(f, "stored value has unexpected length"),
            Self::Unavailable => write!(f, "storage unavailable"),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Reset trigger (driven adapter: button → core)
// ───────────────────────────────────────────────────────────────

/// Factory-reset request, sampled exactly once during `begin`.
pub trait ResetTrigger {
    fn is_asserted(&mut self) -> bool;
}

// ───────────────────────────────────────────────────────────────
// BLE transport port (driven adapter: core → radio)
// ───────────────────────────────────────────────────────────────

/// Which attribute of the Sesame service an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Characteristic {
    /// Central → peripheral (write / write without response).
    Write,
    /// Peripheral → central (notify / read).
    Notify,
    /// Any attribute outside the Sesame service.
    Other,
}

/// GATT layout the transport must expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceLayout {
    pub service_uuid16: u16,
    pub write_char_uuid: u128,
    pub notify_char_uuid: u128,
    /// Empty primary service registered after the Sesame service.
    pub handle_limit_uuid32: u32,
}

impl ServiceLayout {
    pub const SESAME: Self = Self {
        service_uuid16: crate::protocol::SESAME_SERVICE_UUID16,
        write_char_uuid: crate::protocol::CHAR_WRITE_UUID,
        notify_char_uuid: crate::protocol::CHAR_NOTIFY_UUID,
        handle_limit_uuid32: crate::protocol::HANDLE_LIMIT_SERVICE_UUID32,
    };
}

/// Advertising timing and the service UUID listed in the advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvertisingParams {
    /// Units of 0.625 ms.
    pub min_interval: u16,
    /// Units of 0.625 ms.
    pub max_interval: u16,
    pub service_uuid16: u16,
}

/// Legacy advertising PDU payload limit.
pub const ADV_DATA_CAPACITY: usize = 31;
/// Longest device name that fits next to the flags in a scan response.
pub const DEVICE_NAME_CAPACITY: usize = 29;

pub type ManufacturerData = heapless::Vec<u8, ADV_DATA_CAPACITY>;
pub type DeviceName = heapless::String<DEVICE_NAME_CAPACITY>;

/// Everything the transport needs to build advertising PDUs.  Rebuilt from
/// scratch on every change.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AdvertisementPayload {
    pub manufacturer_data: ManufacturerData,
    pub device_name: DeviceName,
}

/// Errors from [`BleTransport`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// Host stack failed to come up or rejected the own address.
    InitFailed,
    /// Operation requires `init` first.
    NotInitialized,
    /// GATT table is frozen once advertising has started.
    ServicesLocked,
    /// Controller refused the advertising command.
    AdvertisingFailed,
    /// Notification could not be queued.
    NotifyFailed,
    /// No such connection handle.
    UnknownConnection,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitFailed => write!(f, "BLE init failed"),
            Self::NotInitialized => write!(f, "BLE not initialised"),
            Self::ServicesLocked => write!(f, "GATT services locked after advertising start"),
            Self::AdvertisingFailed => write!(f, "advertising command failed"),
            Self::NotifyFailed => write!(f, "notify failed"),
            Self::UnknownConnection => write!(f, "unknown connection handle"),
        }
    }
}

/// Outbound half of the BLE stack.
pub trait BleTransport {
    /// Bring up the host stack with `address` as the own static random
    /// address.
    fn init(&mut self, address: BleAddress) -> Result<(), TransportError>;

    fn register_services(&mut self, layout: &ServiceLayout) -> Result<(), TransportError>;

    fn configure_advertising(&mut self, params: &AdvertisingParams) -> Result<(), TransportError>;

    fn set_advertisement(&mut self, payload: &AdvertisementPayload) -> Result<(), TransportError>;

    /// Idempotent: starting while advertising is `Ok`.
    fn start_advertising(&mut self) -> Result<(), TransportError>;

    /// Idempotent: stopping while idle is `Ok`.
    fn stop_advertising(&mut self) -> Result<(), TransportError>;

    fn is_advertising(&self) -> bool;

    /// Notify `data` on the notify characteristic of connection `handle`.
    fn notify(&mut self, handle: ConnHandle, data: &[u8]) -> Result<(), TransportError>;

    /// Request link termination.  Fire-and-forget; unknown handles are
    /// ignored.
    fn disconnect(&mut self, handle: ConnHandle);

    /// Resolve the peer address of a live connection.
    fn peer_address(&self, handle: ConnHandle) -> Option<BleAddress>;

    /// Next inbound event queued by the stack, if the adapter buffers them.
    fn poll_event(&mut self) -> Option<TransportEvent> {
        None
    }
}

/// Largest attribute value the stack hands up (ATT limit).
pub const MAX_ATTR_LEN: usize = 512;

/// Inbound stack event buffered by an adapter until the owner drains it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected {
        handle: ConnHandle,
    },
    Disconnected {
        handle: ConnHandle,
        reason: i32,
    },
    Subscribed {
        handle: ConnHandle,
        characteristic: Characteristic,
        sub_value: u16,
    },
    Read {
        handle: ConnHandle,
        characteristic: Characteristic,
    },
    Written {
        handle: ConnHandle,
        characteristic: Characteristic,
        data: heapless::Vec<u8, MAX_ATTR_LEN>,
    },
}

impl TransportEvent {
    /// Hand the event to its [`TransportEvents`] callback.
    pub fn deliver<H: TransportEvents + ?Sized>(self, handler: &mut H) {
        match self {
            Self::Connected { handle } => handler.on_connect(handle),
            Self::Disconnected { handle, reason } => handler.on_disconnect(handle, reason),
            Self::Subscribed {
                handle,
                characteristic,
                sub_value,
            } => handler.on_subscribe(handle, characteristic, sub_value),
            Self::Read {
                handle,
                characteristic,
            } => handler.on_read(handle, characteristic),
            Self::Written {
                handle,
                characteristic,
                data,
            } => handler.on_write(handle, characteristic, &data),
        }
    }
}

/// Inbound half of the BLE stack.  The adapter calls these from its event
/// loop; each call runs to completion.
pub trait TransportEvents {
    fn on_connect(&mut self, handle: ConnHandle);
    fn on_disconnect(&mut self, handle: ConnHandle, reason: i32);
    fn on_subscribe(&mut self, handle: ConnHandle, characteristic: Characteristic, sub_value: u16);
    fn on_read(&mut self, handle: ConnHandle, characteristic: Characteristic);
    fn on_write(&mut self, handle: ConnHandle, characteristic: Characteristic, data: &[u8]);
}

// ───────────────────────────────────────────────────────────────
// Protocol engine port (core ↔ crypto / codec)
// ───────────────────────────────────────────────────────────────

/// Errors from [`ProtocolEngine`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    /// Engine not started or started with bad parameters.
    NotReady,
    /// Key generation or key import failed.
    KeyFailure,
    /// Inbound frame failed to decode or authenticate.
    InvalidFrame,
    /// No protocol session with that id.
    UnknownSession,
    /// Outbound frame could not be delivered.
    SendFailed,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReady => write!(f, "engine not ready"),
            Self::KeyFailure => write!(f, "key operation failed"),
            Self::InvalidFrame => write!(f, "invalid frame"),
            Self::UnknownSession => write!(f, "unknown session"),
            Self::SendFailed => write!(f, "send failed"),
        }
    }
}

/// Recipient of an engine notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyTarget {
    Session(SessionId),
    /// Every logged-in session.
    Broadcast,
}

/// A decoded command handed to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub item: ItemCode,
    /// Free-form history tag supplied by the controller.
    pub tag: String,
    /// Present only for commands from Remote-class controllers.
    pub trigger: Option<TriggerType>,
}

/// Server-side callbacks the engine drives while processing input.
pub trait EngineHost {
    /// Deliver an encoded frame to the central behind `session`.
    fn write_to_central(&mut self, session: SessionId, data: &[u8]) -> bool;

    /// Drop the link behind `session`.
    fn disconnect(&mut self, session: SessionId);

    /// A registration exchange completed on `session`.
    fn on_registration(&mut self, session: SessionId, secret: &SharedSecret);

    /// A command was decoded on `session`.
    fn on_command(&mut self, session: SessionId, command: &CommandRequest) -> ResultCode;
}

/// Frame cryptography and command codec.
///
/// Methods that may emit frames or events take the [`EngineHost`] they
/// should call back into.
pub trait ProtocolEngine {
    fn begin(&mut self, model: Model, uuid: &[u8; UUID_SIZE]) -> Result<(), EngineError>;

    /// Periodic housekeeping (timeouts, retransmits).
    fn update(&mut self, host: &mut dyn EngineHost);

    fn generate_keypair(&mut self) -> Result<(), EngineError>;

    /// Import a previously exported private key.
    fn load_key(&mut self, private_key: &PrivateKey) -> Result<(), EngineError>;

    fn export_keypair(&self) -> Option<(PublicKey, PrivateKey)>;

    /// Install a shared secret; the engine then answers as registered.
    fn set_registered(&mut self, secret: &SharedSecret) -> Result<(), EngineError>;

    fn is_registered(&self) -> bool;

    fn on_received(
        &mut self,
        host: &mut dyn EngineHost,
        session: SessionId,
        data: &[u8],
    ) -> Result<(), EngineError>;

    fn on_subscribed(&mut self, host: &mut dyn EngineHost, session: SessionId) -> Result<(), EngineError>;

    fn on_disconnected(&mut self, session: SessionId);

    fn has_session(&self, session: SessionId) -> bool;

    /// Manufacturer data for the current registration state.
    fn create_advertisement_payload(&self) -> Result<ManufacturerData, EngineError>;

    fn send_notify(
        &mut self,
        host: &mut dyn EngineHost,
        target: NotifyTarget,
        op: OpCode,
        item: ItemCode,
        payload: &[u8],
    ) -> Result<(), EngineError>;
}
