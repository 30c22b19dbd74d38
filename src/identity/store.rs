//! Persisted identity record.
//!
//! Layout in namespace `sesameserver`:
//!
//! | Key       | Size | Present when                         |
//! |-----------|------|--------------------------------------|
//! | `uuid`    | 16   | a record has been committed          |
//! | `secret`  | 16   | registered                           |
//! | `privkey` | 32   | key-pair scheme only                 |
//!
//! The `uuid` entry is the identity tag and is always written last, so an
//! interrupted sequence leaves a record the next boot ignores.

use log::{debug, warn};
use uuid::Uuid;

use super::{KeyMaterial, KeyScheme, PersistedRecord};
use crate::app::ports::{StorageError, StoragePort};
use crate::error::{Error, Result};
use crate::protocol::{PRIVATE_KEY_SIZE, PrivateKey, SECRET_SIZE, SharedSecret, UUID_SIZE};

pub const NAMESPACE: &str = "sesameserver";
pub const KEY_UUID: &str = "uuid";
pub const KEY_SECRET: &str = "secret";
pub const KEY_PRIVKEY: &str = "privkey";

/// Result of looking up the stored record for the current identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordLookup {
    /// Tag matches and the key material is complete.
    Valid(PersistedRecord),
    /// Nothing stored.
    Absent,
    /// Stored under a different UUID.
    Mismatch,
    /// A blob has the wrong length or could not be read.
    Corrupt,
    /// Stored in the layout of the other key scheme.
    ForeignScheme,
}

enum Blob<const N: usize> {
    Found([u8; N]),
    Missing,
    Bad,
}

/// Typed access to the identity record on top of a [`StoragePort`].
pub struct IdentityStore<'a, S: StoragePort + ?Sized> {
    storage: &'a mut S,
}

impl<'a, S: StoragePort + ?Sized> IdentityStore<'a, S> {
    pub fn new(storage: &'a mut S) -> Self {
        Self { storage }
    }

    pub fn open(&mut self) -> Result<()> {
        self.storage.open(NAMESPACE).map_err(Error::Storage)
    }

    /// Look up the record for `uuid` in the layout of `scheme`.
    pub fn load(&self, uuid: &Uuid, scheme: KeyScheme) -> RecordLookup {
        let tag = match self.read_exact::<UUID_SIZE>(KEY_UUID) {
            Blob::Found(bytes) => Uuid::from_bytes(bytes),
            Blob::Missing => return RecordLookup::Absent,
            Blob::Bad => return RecordLookup::Corrupt,
        };
        if tag != *uuid {
            debug!("IdentityStore: stored tag {tag} does not match {uuid}");
            return RecordLookup::Mismatch;
        }

        let has_privkey = self.storage.exists(NAMESPACE, KEY_PRIVKEY);
        let key_material = match scheme {
            KeyScheme::KeyPair => {
                if !has_privkey {
                    return if self.storage.exists(NAMESPACE, KEY_SECRET) {
                        RecordLookup::ForeignScheme
                    } else {
                        RecordLookup::Corrupt
                    };
                }
                let private_key = match self.read_exact::<PRIVATE_KEY_SIZE>(KEY_PRIVKEY) {
                    Blob::Found(key) => key,
                    Blob::Missing | Blob::Bad => return RecordLookup::Corrupt,
                };
                let derived_shared_secret = match self.read_exact::<SECRET_SIZE>(KEY_SECRET) {
                    Blob::Found(secret) => Some(secret),
                    Blob::Missing => None,
                    Blob::Bad => return RecordLookup::Corrupt,
                };
                KeyMaterial::KeyPair {
                    private_key,
                    derived_shared_secret,
                }
            }
            KeyScheme::SharedSecretOnly => {
                if has_privkey {
                    return RecordLookup::ForeignScheme;
                }
                match self.read_exact::<SECRET_SIZE>(KEY_SECRET) {
                    Blob::Found(secret) => KeyMaterial::SharedSecretOnly { secret },
                    Blob::Missing | Blob::Bad => return RecordLookup::Corrupt,
                }
            }
        };

        RecordLookup::Valid(PersistedRecord {
            identity_tag: tag,
            key_material,
        })
    }

    /// Replace the record with a fresh key pair and no secret.
    pub fn store_keypair(&mut self, uuid: &Uuid, private_key: &PrivateKey) -> Result<()> {
        self.remove(KEY_UUID)?;
        self.remove(KEY_SECRET)?;
        self.put(KEY_PRIVKEY, private_key)?;
        self.put(KEY_UUID, uuid.as_bytes())
    }

    /// Persist the registration secret under `uuid`.
    pub fn store_secret(&mut self, uuid: &Uuid, secret: &SharedSecret) -> Result<()> {
        self.put(KEY_SECRET, secret)?;
        self.put(KEY_UUID, uuid.as_bytes())
    }

    /// Drop every entry of the record.
    pub fn clear(&mut self) -> Result<()> {
        self.remove(KEY_UUID)?;
        self.remove(KEY_SECRET)?;
        self.remove(KEY_PRIVKEY)
    }

    fn read_exact<const N: usize>(&self, key: &str) -> Blob<N> {
        let mut buf = [0u8; N];
        match self.storage.read(NAMESPACE, key, &mut buf) {
            Ok(len) if len == N => Blob::Found(buf),
            Ok(len) => {
                warn!("IdentityStore: '{key}' is {len} bytes, expected {N}");
                Blob::Bad
            }
            Err(StorageError::NotFound) => Blob::Missing,
            Err(e) => {
                warn!("IdentityStore: reading '{key}' failed: {e}");
                Blob::Bad
            }
        }
    }

    fn put(&mut self, key: &'static str, data: &[u8]) -> Result<()> {
        let written = self.storage.write(NAMESPACE, key, data)?;
        if written != data.len() {
            return Err(Error::ShortWrite {
                key,
                expected: data.len(),
                written,
            });
        }
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.storage.delete(NAMESPACE, key)?;
        Ok(())
    }
}
