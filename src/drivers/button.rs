//! Factory-reset button.
//!
//! ## Hardware
//!
//! Active-low momentary switch with pull-up.  Holding it while the device
//! boots discards the stored registration.  The pin is sampled once, the
//! first time the server asks; later calls return the cached level so a
//! release mid-boot cannot change the decision.

use embedded_hal::digital::InputPin;
use log::{info, warn};

use crate::app::ports::ResetTrigger;

/// Reset button on any `embedded-hal` input pin.
pub struct ResetButton<P> {
    pin: P,
    sample: Option<bool>,
}

impl<P: InputPin> ResetButton<P> {
    pub fn new(pin: P) -> Self {
        Self { pin, sample: None }
    }

    pub fn release(self) -> P {
        self.pin
    }
}

impl<P: InputPin> ResetTrigger for ResetButton<P> {
    fn is_asserted(&mut self) -> bool {
        if let Some(pressed) = self.sample {
            return pressed;
        }
        // Unreadable pin counts as released.
        let pressed = match self.pin.is_low() {
            Ok(low) => low,
            Err(_) => {
                warn!("ResetButton: pin read failed, assuming released");
                false
            }
        };
        if pressed {
            info!("ResetButton: held at boot");
        }
        self.sample = Some(pressed);
        pressed
    }
}

#[cfg(target_os = "espidf")]
mod gpio {
    use esp_idf_hal::gpio::{Input, InputPin, OutputPin, PinDriver, Pull};
    use esp_idf_hal::peripheral::Peripheral;
    use esp_idf_hal::sys::EspError;

    use super::ResetButton;

    impl<'d, T: InputPin + OutputPin> ResetButton<PinDriver<'d, T, Input>> {
        /// Drive `pin` as an input with the internal pull-up enabled.
        pub fn from_gpio(pin: impl Peripheral<P = T> + 'd) -> Result<Self, EspError> {
            let mut driver = PinDriver::input(pin)?;
            driver.set_pull(Pull::Up)?;
            Ok(Self::new(driver))
        }
    }
}

/// Fixed trigger level, for boards without a button and for tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StaticTrigger(pub bool);

impl ResetTrigger for StaticTrigger {
    fn is_asserted(&mut self) -> bool {
        self.0
    }
}
