//! Sesame peripheral server library.
//!
//! Session bookkeeping, the registration lifecycle and advertising control
//! for a device speaking the Sesame BLE protocol.  All ESP-IDF-specific code
//! is guarded by `#[cfg(target_os = "espidf")]` within each module; the rest
//! builds and tests on the host.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod drivers;
pub mod error;
pub mod identity;
pub mod protocol;

pub use app::dispatcher::Dispatcher;
pub use app::ports::{
    BleTransport, CommandRequest, EngineHost, ProtocolEngine, ResetTrigger, StoragePort,
    TransportEvents,
};
pub use app::server::{SesameServer, ServerStatus};
pub use config::ServerConfig;
pub use error::{Error, Result};
pub use identity::address::{BleAddress, uuid_to_ble_address};
pub use identity::lifecycle::{BootOrigin, FreshReason};
pub use identity::{KeyScheme, RegistrationState};
