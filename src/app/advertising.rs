//! Advertising state controller.
//!
//! The payload is always rebuilt from the engine's encoder and applied
//! whole; nothing patches a live advertisement.  `wanted` remembers whether
//! the application asked for advertising, so the server can pause it while
//! the session table is full and resume it when a slot frees up.

use log::{debug, info};

use crate::app::ports::{
    AdvertisementPayload, AdvertisingParams, BleTransport, DeviceName, ProtocolEngine,
};
use crate::error::{Error, Result};

pub struct AdvertisingController {
    params: AdvertisingParams,
    device_name: DeviceName,
    payload: Option<AdvertisementPayload>,
    wanted: bool,
    rebuilds: u32,
}

impl AdvertisingController {
    pub fn new(params: AdvertisingParams, device_name: DeviceName) -> Self {
        Self {
            params,
            device_name,
            payload: None,
            wanted: false,
            rebuilds: 0,
        }
    }

    pub fn configure<T: BleTransport>(&self, transport: &mut T) -> Result<()> {
        transport.configure_advertising(&self.params)?;
        Ok(())
    }

    /// Rebuild the payload and apply it.  Advertising is stopped around the
    /// update and restarted if it was running, also when the rebuild fails;
    /// the previously applied payload is kept in that case.  Returns whether
    /// the bytes changed.
    pub fn set_advertising_data<T, E>(&mut self, transport: &mut T, engine: &E) -> Result<bool>
    where
        T: BleTransport,
        E: ProtocolEngine + ?Sized,
    {
        let was_running = transport.is_advertising();
        if was_running {
            transport.stop_advertising()?;
        }

        let rebuilt = self.rebuild(transport, engine);

        if was_running {
            transport.start_advertising()?;
        }
        rebuilt
    }

    fn rebuild<T, E>(&mut self, transport: &mut T, engine: &E) -> Result<bool>
    where
        T: BleTransport,
        E: ProtocolEngine + ?Sized,
    {
        let payload = AdvertisementPayload {
            manufacturer_data: engine.create_advertisement_payload()?,
            device_name: self.device_name.clone(),
        };
        transport.set_advertisement(&payload)?;
        let changed = self.payload.as_ref() != Some(&payload);
        self.payload = Some(payload);
        self.rebuilds = self.rebuilds.wrapping_add(1);
        debug!("Advertising: payload rebuilt (changed={changed})");
        Ok(changed)
    }

    pub fn start<T: BleTransport>(&mut self, transport: &mut T) -> Result<()> {
        if self.payload.is_none() {
            return Err(Error::NotStarted);
        }
        self.wanted = true;
        if !transport.is_advertising() {
            transport.start_advertising()?;
            info!("Advertising: started");
        }
        Ok(())
    }

    pub fn stop<T: BleTransport>(&mut self, transport: &mut T) -> Result<()> {
        self.wanted = false;
        self.suspend(transport)
    }

    /// Stop on the radio but keep the application's request.
    pub fn suspend<T: BleTransport>(&self, transport: &mut T) -> Result<()> {
        if transport.is_advertising() {
            transport.stop_advertising()?;
            info!("Advertising: stopped");
        }
        Ok(())
    }

    /// Restart if the application wants advertising and it is not running.
    pub fn resume<T: BleTransport>(&mut self, transport: &mut T) -> Result<()> {
        if self.wanted {
            self.start(transport)?;
        }
        Ok(())
    }

    pub fn is_wanted(&self) -> bool {
        self.wanted
    }

    pub fn payload(&self) -> Option<&AdvertisementPayload> {
        self.payload.as_ref()
    }

    /// Number of times the payload has been rebuilt.
    pub fn rebuilds(&self) -> u32 {
        self.rebuilds
    }
}
