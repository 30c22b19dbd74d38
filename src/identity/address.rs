//! BLE device address and its derivation from the protocol UUID.
//!
//! Controllers compute the lock's address from the shared UUID alone, so the
//! transform below is fixed forever:
//!
//! 1. Reverse the canonical (big-endian) UUID bytes.
//! 2. Take the first 6 bytes of the reversed sequence as the address,
//!    least significant byte first.
//! 3. Set the two top bits of the most significant byte (static random).
//!
//! For canonical bytes `u[0..16]` the result displays as
//! `(u[10]|C0):u[11]:u[12]:u[13]:u[14]:u[15]`.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::protocol::UUID_SIZE;

pub const ADDRESS_SIZE: usize = 6;

/// Top two bits of the most significant byte of a static random address.
const STATIC_RANDOM_MASK: u8 = 0xC0;

/// 48-bit BLE device address, stored least significant byte first (the
/// order used on air and by the host stack).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BleAddress([u8; ADDRESS_SIZE]);

impl BleAddress {
    /// The all-zero address, used when a peer address cannot be resolved.
    pub const NULL: Self = Self([0; ADDRESS_SIZE]);

    /// Build from bytes in little-endian (on-air) order.
    pub const fn from_le_bytes(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Self(bytes)
    }

    pub const fn to_le_bytes(self) -> [u8; ADDRESS_SIZE] {
        self.0
    }

    pub fn is_null(&self) -> bool {
        self.0 == [0; ADDRESS_SIZE]
    }

    /// A static random address has both top bits of its most significant
    /// byte set and is neither all-zero nor all-one in the remaining bits.
    pub fn is_static_random(&self) -> bool {
        let msb = self.0[ADDRESS_SIZE - 1];
        if msb & STATIC_RANDOM_MASK != STATIC_RANDOM_MASK {
            return false;
        }
        let mut rest = self.0;
        rest[ADDRESS_SIZE - 1] &= !STATIC_RANDOM_MASK;
        let all_ones = rest[..ADDRESS_SIZE - 1].iter().all(|&b| b == 0xFF)
            && rest[ADDRESS_SIZE - 1] == !STATIC_RANDOM_MASK;
        rest != [0; ADDRESS_SIZE] && !all_ones
    }
}

/// Error returned when parsing an address string fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressParseError;

impl fmt::Display for AddressParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BLE address must be six hex octets, e.g. C1:02:03:04:05:06")
    }
}

impl fmt::Display for BleAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[5], b[4], b[3], b[2], b[1], b[0]
        )
    }
}

impl FromStr for BleAddress {
    type Err = AddressParseError;

    /// Parse `AA:BB:CC:DD:EE:FF` (most significant octet first; `-` is
    /// accepted as separator too).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; ADDRESS_SIZE];
        let mut octets = s.split([':', '-']);
        for slot in out.iter_mut().rev() {
            let part = octets.next().ok_or(AddressParseError)?;
            if part.len() != 2 {
                return Err(AddressParseError);
            }
            *slot = u8::from_str_radix(part, 16).map_err(|_| AddressParseError)?;
        }
        if octets.next().is_some() {
            return Err(AddressParseError);
        }
        Ok(Self(out))
    }
}

impl Serialize for BleAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut text = heapless::String::<17>::new();
        use core::fmt::Write;
        write!(text, "{}", self).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&text)
    }
}

impl<'de> Deserialize<'de> for BleAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = heapless::String::<24>::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Derive the device address from raw canonical UUID bytes.
///
/// Returns `None` when `uuid` is not exactly 128 bits.
pub fn ble_address_from_uuid_bytes(uuid: &[u8]) -> Option<BleAddress> {
    let bytes: &[u8; UUID_SIZE] = uuid.try_into().ok()?;
    Some(derive(bytes))
}

/// Derive the device address from a protocol UUID.
pub fn uuid_to_ble_address(uuid: &Uuid) -> BleAddress {
    derive(uuid.as_bytes())
}

fn derive(uuid: &[u8; UUID_SIZE]) -> BleAddress {
    let mut out = [0u8; ADDRESS_SIZE];
    for (slot, byte) in out.iter_mut().zip(uuid.iter().rev()) {
        *slot = *byte;
    }
    out[ADDRESS_SIZE - 1] |= STATIC_RANDOM_MASK;
    BleAddress(out)
}
