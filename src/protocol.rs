//! Sesame protocol vocabulary.
//!
//! Plain data shared between the server core, the protocol engine port and
//! application callbacks.  Nothing here performs I/O; the discriminants are
//! the on-air values the engine encodes.
//!
//! ## GATT layout
//!
//! | Attribute              | UUID                                   | Perms        |
//! |------------------------|----------------------------------------|--------------|
//! | Sesame service         | `0xFD81`                               | Primary      |
//! | Write (central → lock) | `16860002-a5ae-9856-b6d3-dbb4c676993e` | Write/WriteNR|
//! | Notify (lock → central)| `16860003-a5ae-9856-b6d3-dbb4c676993e` | Notify/Read  |
//! | Handle limiter         | `0xfefefefe`                           | Primary      |

use core::fmt;
use serde::{Deserialize, Serialize};

// ───────────────────────────────────────────────────────────────
// Sizes and identifiers
// ───────────────────────────────────────────────────────────────

/// Shared secret established by registration.
pub const SECRET_SIZE: usize = 16;
/// Private half of the device keypair (P-256 scalar).
pub const PRIVATE_KEY_SIZE: usize = 32;
/// Public half of the device keypair (uncompressed, without prefix).
pub const PUBLIC_KEY_SIZE: usize = 64;
/// Protocol UUID length in bytes.
pub const UUID_SIZE: usize = 16;

pub type SharedSecret = [u8; SECRET_SIZE];
pub type PrivateKey = [u8; PRIVATE_KEY_SIZE];
pub type PublicKey = [u8; PUBLIC_KEY_SIZE];

/// Logical session id handed to the protocol engine.
pub type SessionId = u16;
/// Transport-assigned connection handle.
pub type ConnHandle = u16;

pub const SESAME_SERVICE_UUID16: u16 = 0xFD81;
pub const CHAR_WRITE_UUID: u128 = 0x16860002_a5ae_9856_b6d3_dbb4c676993e;
pub const CHAR_NOTIFY_UUID: u128 = 0x16860003_a5ae_9856_b6d3_dbb4c676993e;
/// Empty service registered right after the Sesame service so that the
/// Sesame service group ends at a fixed handle.
pub const HANDLE_LIMIT_SERVICE_UUID32: u32 = 0xfefe_fefe;

// ───────────────────────────────────────────────────────────────
// Device model
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Model {
    Sesame3 = 0,
    Wm2 = 1,
    SesameBot = 2,
    SesameBike = 3,
    Sesame4 = 4,
    Sesame5 = 5,
    SesameBike2 = 6,
    Sesame5Pro = 7,
    OpenSensor1 = 8,
    SesameTouchPro = 9,
    SesameTouch = 10,
}

impl Model {
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sesame3 => "SESAME 3",
            Self::Wm2 => "WM2",
            Self::SesameBot => "SESAME bot",
            Self::SesameBike => "SESAME Cycle",
            Self::Sesame4 => "SESAME 4",
            Self::Sesame5 => "SESAME 5",
            Self::SesameBike2 => "SESAME Cycle 2",
            Self::Sesame5Pro => "SESAME 5 PRO",
            Self::OpenSensor1 => "Open Sensor",
            Self::SesameTouchPro => "SESAME Touch PRO",
            Self::SesameTouch => "SESAME Touch",
        };
        f.write_str(name)
    }
}

// ───────────────────────────────────────────────────────────────
// Item / op / result codes
// ───────────────────────────────────────────────────────────────

/// Item code carried by every Sesame message.  Codes the core does not
/// interpret are preserved in [`ItemCode::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemCode {
    Registration,
    Login,
    MechStatus,
    MechSetting,
    Lock,
    Unlock,
    Other(u8),
}

impl From<u8> for ItemCode {
    fn from(code: u8) -> Self {
        match code {
            1 => Self::Registration,
            2 => Self::Login,
            80 => Self::MechStatus,
            81 => Self::MechSetting,
            82 => Self::Lock,
            83 => Self::Unlock,
            other => Self::Other(other),
        }
    }
}

impl From<ItemCode> for u8 {
    fn from(item: ItemCode) -> Self {
        match item {
            ItemCode::Registration => 1,
            ItemCode::Login => 2,
            ItemCode::MechStatus => 80,
            ItemCode::MechSetting => 81,
            ItemCode::Lock => 82,
            ItemCode::Unlock => 83,
            ItemCode::Other(code) => code,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Create = 1,
    Read = 2,
    Update = 3,
    Delete = 4,
    Sync = 5,
    Async = 6,
    Response = 7,
    Publish = 8,
}

/// Result code returned to the peer for every command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResultCode {
    Success = 0,
    InvalidFormat = 1,
    NotSupported = 2,
    StorageFail = 3,
    InvalidSig = 4,
    NotFound = 5,
    Unknown = 6,
    Busy = 7,
    InvalidParam = 8,
}

impl ResultCode {
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// Trigger kind attached to commands from Remote-class controllers.
/// The value is opaque to the core and passed through to the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TriggerType(pub u8);

// ───────────────────────────────────────────────────────────────
// Mechanism status
// ───────────────────────────────────────────────────────────────

pub const MECH_STATUS_SIZE: usize = 7;

/// Lock mechanism status published to subscribed controllers.
///
/// Wire layout (little-endian): `battery:i16 target:i16 position:i16 flags:u8`
/// with flag bits `clutch_failed(0) in_lock(1) in_unlock(2) critical(3)
/// stop(4) battery_critical(5) clockwise(6)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MechStatus {
    pub battery: i16,
    pub target: i16,
    pub position: i16,
    pub clutch_failed: bool,
    pub in_lock: bool,
    pub in_unlock: bool,
    pub critical: bool,
    pub stop: bool,
    pub battery_critical: bool,
    pub clockwise: bool,
}

impl MechStatus {
    /// Status reported after a lock/unlock command settles.
    pub fn settled(locked: bool) -> Self {
        Self {
            battery: 10,
            in_lock: locked,
            in_unlock: !locked,
            stop: true,
            ..Default::default()
        }
    }

    pub fn to_bytes(&self) -> [u8; MECH_STATUS_SIZE] {
        let mut out = [0u8; MECH_STATUS_SIZE];
        out[0..2].copy_from_slice(&self.battery.to_le_bytes());
        out[2..4].copy_from_slice(&self.target.to_le_bytes());
        out[4..6].copy_from_slice(&self.position.to_le_bytes());
        let bits = [
            self.clutch_failed,
            self.in_lock,
            self.in_unlock,
            self.critical,
            self.stop,
            self.battery_critical,
            self.clockwise,
        ];
        out[6] = bits
            .iter()
            .enumerate()
            .fold(0u8, |acc, (i, &set)| acc | (u8::from(set) << i));
        out
    }
}
