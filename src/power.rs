//! Power management - System OFF after inactivity.
//!
//! nRF52840 power modes used here:
//! - System ON: normal operation, HX711 sampling, BLE advertising/connected
//! - System OFF: deep sleep (~0.4 µA), wake on the button's GPIO SENSE
//!
//! Waking from System OFF is a reset, so the firmware comes back through
//! boot with settings reloaded from flash and a fresh inactivity timer.
//!
//! The inactivity policy lives in `power_logic`; it asks for sleep through
//! [`SleepControl`]. The request is deferred here so the scale task can
//! power down the HX711 and blank the display (both async) before the
//! final, synchronous [`enter_system_off`].

use crate::config::BUTTON_PIN_NUMBER;
pub use crate::power_logic::WakeSource;
use crate::power_logic::SleepControl;
use defmt::info;
use embassy_nrf::pac;
use nrf_softdevice::raw;

/// Why System OFF was not entered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum SleepDeclined {
    /// The wake line is already asserted; sleeping would never wake.
    ButtonHeld,
    /// `sd_power_system_off` returned an error code.
    Raw(u32),
}

/// Records a sleep request for the scale task to carry out.
pub struct DeferredSleep {
    requested: Option<WakeSource>,
}

impl DeferredSleep {
    pub const fn new() -> Self {
        Self { requested: None }
    }

    pub fn take(&mut self) -> Option<WakeSource> {
        self.requested.take()
    }
}

impl SleepControl for DeferredSleep {
    fn request_sleep(&mut self, wake: WakeSource) {
        self.requested = Some(wake);
    }
}

/// Arm the wake source, then enter System OFF.
///
/// Only returns if sleep was declined.
pub fn enter_system_off(wake: WakeSource) -> SleepDeclined {
    match wake {
        WakeSource::ButtonEdge => {
            // Button is active-low with the pull-up already configured.
            pac::P0
                .pin_cnf(BUTTON_PIN_NUMBER)
                .modify(|w| w.set_sense(pac::gpio::vals::Sense::LOW));

            // Sense is armed: a press from here on wakes us. A press that
            // is already in progress would not produce a new edge.
            if !pac::P0.in_().read().pin(BUTTON_PIN_NUMBER) {
                pac::P0
                    .pin_cnf(BUTTON_PIN_NUMBER)
                    .modify(|w| w.set_sense(pac::gpio::vals::Sense::DISABLED));
                return SleepDeclined::ButtonHeld;
            }
        }
    }

    info!("Power: System OFF");
    let ret = unsafe { raw::sd_power_system_off() };
    SleepDeclined::Raw(ret)
}
