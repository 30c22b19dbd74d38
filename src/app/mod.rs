//! Application core — session and registration logic, zero I/O.
//!
//! Everything the server decides lives here: which sessions exist, when the
//! advertisement is rebuilt, which callback a command reaches.  The radio,
//! the protocol engine and secure storage are reached only through the
//! **port traits** defined in [`ports`], so this layer runs unchanged on the
//! host against simulated adapters.

pub mod advertising;
pub mod deferred;
pub mod dispatcher;
pub mod ports;
pub mod server;
pub mod sessions;
