//! Registration lifecycle: load-or-generate on boot, factory reset, and the
//! single Unregistered → Registered transition.
//!
//! ```text
//!            reset asserted / no record / tag mismatch / corrupt
//!   boot ──────────────────────────────────────────────▶ fresh ──▶ Unregistered
//!    │                                                                   │
//!    └── valid record ──▶ Restored ──▶ Registered | Unregistered         │
//!                                                                        ▼
//!                                          on_registration(secret) ──▶ Registered
//! ```

use log::{error, info};

use super::store::{IdentityStore, RecordLookup};
use super::{DeviceIdentity, KeyMaterial, KeyScheme, PersistedRecord, RegistrationState};
use crate::app::ports::{EngineError, ProtocolEngine, ResetTrigger, StoragePort};
use crate::error::{Error, Result};
use crate::protocol::SharedSecret;

/// Why the fresh path ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshReason {
    ResetRequested,
    NoRecord,
    TagMismatch,
    Corrupt,
    /// Record written by the other key scheme.
    SchemeMigration,
}

/// How the identity was established at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootOrigin {
    Restored,
    Fresh(FreshReason),
}

/// Result of handling a registration event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct RegistrationOutcome {
    /// This event moved the device from Unregistered to Registered.
    pub transitioned: bool,
    /// Persisting the secret failed.  The in-memory state still changed.
    pub persist_error: Option<Error>,
}

pub struct RegistrationLifecycle {
    identity: DeviceIdentity,
    scheme: KeyScheme,
    state: RegistrationState,
    key_material: Option<KeyMaterial>,
}

impl RegistrationLifecycle {
    pub fn new(identity: DeviceIdentity, scheme: KeyScheme) -> Self {
        Self {
            identity,
            scheme,
            state: RegistrationState::Unregistered,
            key_material: None,
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn scheme(&self) -> KeyScheme {
        self.scheme
    }

    pub fn state(&self) -> RegistrationState {
        self.state
    }

    pub fn is_registered(&self) -> bool {
        self.state.is_registered()
    }

    pub fn key_material(&self) -> Option<&KeyMaterial> {
        self.key_material.as_ref()
    }

    /// Establish the device's key material before anything is advertised.
    ///
    /// The reset trigger is sampled once.  Write failures, an unusable
    /// storage backend and an engine that refuses a valid record are fatal,
    /// with the record left in place.  Read-side problems only send the
    /// device down the fresh path.
    pub fn prepare_identity<S, E, R>(
        &mut self,
        storage: &mut S,
        engine: &mut E,
        reset: &mut R,
    ) -> Result<BootOrigin>
    where
        S: StoragePort + ?Sized,
        E: ProtocolEngine + ?Sized,
        R: ResetTrigger + ?Sized,
    {
        let reset_requested = reset.is_asserted();

        let mut store = IdentityStore::new(storage);
        if let Err(e) = store.open() {
            error!("Lifecycle: secure storage unavailable: {e}");
            return Err(e);
        }

        let reason = if reset_requested {
            info!("Lifecycle: factory reset requested");
            FreshReason::ResetRequested
        } else {
            match store.load(&self.identity.protocol_uuid, self.scheme) {
                RecordLookup::Valid(record) => match self.restore(engine, record) {
                    Ok(()) => {
                        info!(
                            "Lifecycle: restored identity ({})",
                            if self.is_registered() {
                                "registered"
                            } else {
                                "not registered"
                            }
                        );
                        return Ok(BootOrigin::Restored);
                    }
                    Err(e) => {
                        error!("Lifecycle: failed to restore stored key material: {e}");
                        return Err(e.into());
                    }
                },
                RecordLookup::Absent => FreshReason::NoRecord,
                RecordLookup::Mismatch => FreshReason::TagMismatch,
                RecordLookup::Corrupt => FreshReason::Corrupt,
                RecordLookup::ForeignScheme => FreshReason::SchemeMigration,
            }
        };

        info!("Lifecycle: starting fresh ({reason:?})");
        self.state = RegistrationState::Unregistered;
        self.key_material = None;

        match self.scheme {
            KeyScheme::KeyPair => {
                engine.generate_keypair()?;
                let (_public, private_key) =
                    engine.export_keypair().ok_or(Error::Engine(EngineError::KeyFailure))?;
                store.store_keypair(&self.identity.protocol_uuid, &private_key)?;
                self.key_material = Some(KeyMaterial::KeyPair {
                    private_key,
                    derived_shared_secret: None,
                });
            }
            KeyScheme::SharedSecretOnly => {
                store.clear()?;
            }
        }

        Ok(BootOrigin::Fresh(reason))
    }

    fn restore<E: ProtocolEngine + ?Sized>(
        &mut self,
        engine: &mut E,
        record: PersistedRecord,
    ) -> core::result::Result<(), EngineError> {
        if let KeyMaterial::KeyPair { private_key, .. } = &record.key_material {
            engine.load_key(private_key)?;
        }
        if let Some(secret) = record.key_material.shared_secret() {
            engine.set_registered(secret)?;
            self.state = RegistrationState::Registered;
        } else {
            self.state = RegistrationState::Unregistered;
        }
        self.key_material = Some(record.key_material);
        Ok(())
    }

    /// Record a completed registration and persist its secret.
    ///
    /// A second registration while Registered rewrites the stored secret
    /// and reports no transition.
    pub fn on_registration<S: StoragePort + ?Sized>(
        &mut self,
        storage: &mut S,
        secret: &SharedSecret,
    ) -> RegistrationOutcome {
        let transitioned = !self.is_registered();
        self.state = RegistrationState::Registered;
        self.key_material = Some(match self.key_material.take() {
            Some(KeyMaterial::KeyPair { private_key, .. }) => KeyMaterial::KeyPair {
                private_key,
                derived_shared_secret: Some(*secret),
            },
            _ => KeyMaterial::SharedSecretOnly { secret: *secret },
        });

        let mut store = IdentityStore::new(storage);
        let persisted = store
            .open()
            .and_then(|()| store.store_secret(&self.identity.protocol_uuid, secret));
        if let Err(e) = persisted {
            error!("Lifecycle: failed to persist registration secret: {e}");
        } else {
            info!("Lifecycle: registration secret stored");
        }

        RegistrationOutcome {
            transitioned,
            persist_error: persisted.err(),
        }
    }
}
