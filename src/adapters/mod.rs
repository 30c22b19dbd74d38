//! Adapters — concrete implementations of the hexagonal port traits.
//!
//! | Adapter | Implements   | Connects to                       |
//! |---------|--------------|-----------------------------------|
//! | `ble`   | BleTransport | Bluedroid GATT server / simulator |
//! | `nvs`   | StoragePort  | NVS / in-memory store             |

pub mod ble;
pub mod nvs;
