//! Device identity and long-term key material.
//!
//! | Module      | Role                                                    |
//! |-------------|---------------------------------------------------------|
//! | `address`   | UUID → BLE address derivation (pure)                    |
//! | `store`     | Persisted record layout on top of [`StoragePort`]       |
//! | `lifecycle` | Load-or-generate on boot, factory reset, registration   |
//!
//! [`StoragePort`]: crate::app::ports::StoragePort

pub mod address;
pub mod lifecycle;
pub mod store;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::{Model, PrivateKey, SharedSecret};

/// Who this device claims to be.  Fixed once `begin` succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub protocol_uuid: Uuid,
    pub model: Model,
}

/// Which key material a build persists.  Exactly one is active per build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum KeyScheme {
    /// Legacy scheme: only the registration secret is stored.
    SharedSecretOnly,
    /// Current scheme: a device keypair plus the secret derived at
    /// registration.
    #[default]
    KeyPair,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMaterial {
    SharedSecretOnly {
        secret: SharedSecret,
    },
    KeyPair {
        private_key: PrivateKey,
        derived_shared_secret: Option<SharedSecret>,
    },
}

impl KeyMaterial {
    pub fn scheme(&self) -> KeyScheme {
        match self {
            Self::SharedSecretOnly { .. } => KeyScheme::SharedSecretOnly,
            Self::KeyPair { .. } => KeyScheme::KeyPair,
        }
    }

    /// The registration secret, if one has been established.
    pub fn shared_secret(&self) -> Option<&SharedSecret> {
        match self {
            Self::SharedSecretOnly { secret } => Some(secret),
            Self::KeyPair {
                derived_shared_secret,
                ..
            } => derived_shared_secret.as_ref(),
        }
    }
}

/// Key material plus the UUID it was stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedRecord {
    pub identity_tag: Uuid,
    pub key_material: KeyMaterial,
}

impl PersistedRecord {
    /// A record is only trusted for the UUID it was written under.
    pub fn belongs_to(&self, uuid: &Uuid) -> bool {
        self.identity_tag == *uuid
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    Registered,
}

impl RegistrationState {
    pub fn is_registered(self) -> bool {
        matches!(self, Self::Registered)
    }
}
