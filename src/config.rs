//! Server configuration.
//!
//! Everything a deployment chooses up front: which device it impersonates,
//! how many controllers may hold a session, and how it advertises.  Values
//! are validated once by [`ServerConfig::validate`] before `begin`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app::ports::{AdvertisingParams, DEVICE_NAME_CAPACITY, DeviceName};
use crate::identity::KeyScheme;
use crate::identity::address::{BleAddress, uuid_to_ble_address};
use crate::protocol::{Model, SESAME_SERVICE_UUID16};

/// NimBLE's hard connection limit.
pub const MAX_SESSIONS_LIMIT: usize = 9;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    // --- Sessions ---
    /// Concurrent controller sessions (1–9).
    pub max_sessions: usize,

    // --- Identity ---
    pub model: Model,
    /// Protocol UUID shared with the controllers.
    pub uuid: Uuid,
    /// Own static random address.  Derived from `uuid` when absent.
    pub address: Option<BleAddress>,
    pub key_scheme: KeyScheme,

    // --- Advertising ---
    /// Minimum advertising interval (0.625 ms units)
    pub adv_min_interval: u16,
    /// Maximum advertising interval (0.625 ms units)
    pub adv_max_interval: u16,
    pub device_name: DeviceName,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let mut device_name = DeviceName::new();
        // Fits: the literal is shorter than DEVICE_NAME_CAPACITY.
        let _ = device_name.push_str("Sesame Server");
        Self {
            max_sessions: 3,

            model: Model::Sesame5,
            uuid: Uuid::nil(),
            address: None,
            key_scheme: KeyScheme::KeyPair,

            adv_min_interval: 1000, // 625 ms
            adv_max_interval: 1500, // 937.5 ms
            device_name,
        }
    }
}

impl ServerConfig {
    pub fn new(model: Model, uuid: Uuid) -> Self {
        Self {
            model,
            uuid,
            ..Self::default()
        }
    }

    /// Reject values the server cannot honour.
    pub fn validate(&self) -> Result<(), crate::error::Error> {
        use crate::error::Error::Config;

        if !(1..=MAX_SESSIONS_LIMIT).contains(&self.max_sessions) {
            return Err(Config("max_sessions must be 1–9"));
        }
        if self.uuid.is_nil() {
            return Err(Config("uuid must be set"));
        }
        if self.adv_min_interval == 0 || self.adv_min_interval > self.adv_max_interval {
            return Err(Config("adv_min_interval must be > 0 and ≤ adv_max_interval"));
        }
        if let Some(addr) = self.address {
            if !addr.is_static_random() {
                return Err(Config("address must be a static random address"));
            }
        }
        if self.device_name.is_empty() || self.device_name.len() > DEVICE_NAME_CAPACITY {
            return Err(Config("device_name must be 1–29 bytes"));
        }
        Ok(())
    }

    /// Configured address, or the one derived from the UUID.
    pub fn effective_address(&self) -> BleAddress {
        self.address
            .unwrap_or_else(|| uuid_to_ble_address(&self.uuid))
    }

    pub fn advertising_params(&self) -> AdvertisingParams {
        AdvertisingParams {
            min_interval: self.adv_min_interval,
            max_interval: self.adv_max_interval,
            service_uuid16: SESAME_SERVICE_UUID16,
        }
    }
}
