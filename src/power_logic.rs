//! Inactivity tracking for deep sleep.
//!
//! Activity is a button press or a weight change of at least
//! `ACTIVITY_THRESHOLD_GRAMS` relative to the weight recorded at the last
//! activity. Comparing against that reference (not the previous sample)
//! means slow drift counts once it has added up to the threshold.

use crate::config::{ACTIVITY_THRESHOLD_GRAMS, INACTIVITY_TIMEOUT_MS};

/// What may wake the device from sleep.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WakeSource {
    /// Falling edge on the user button.
    ButtonEdge,
}

/// Platform hook that actually powers the device down.
///
/// On hardware this does not return when sleep is entered. It may return
/// if sleep was declined, e.g. the wake source is already asserted.
pub trait SleepControl {
    fn request_sleep(&mut self, wake: WakeSource);
}

pub struct ActivityMonitor {
    last_activity_ms: u64,
    reference_grams: f32,
    threshold_grams: f32,
    timeout_ms: u64,
}

impl ActivityMonitor {
    pub fn new(now_ms: u64) -> Self {
        Self::with_limits(now_ms, ACTIVITY_THRESHOLD_GRAMS, INACTIVITY_TIMEOUT_MS)
    }

    pub fn with_limits(now_ms: u64, threshold_grams: f32, timeout_ms: u64) -> Self {
        Self {
            last_activity_ms: now_ms,
            reference_grams: 0.0,
            threshold_grams,
            timeout_ms,
        }
    }

    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms
    }

    /// Returns true if the weight counts as activity.
    pub fn observe_weight(&mut self, grams: f32, now_ms: u64) -> bool {
        if libm::fabsf(grams - self.reference_grams) >= self.threshold_grams {
            self.reference_grams = grams;
            self.last_activity_ms = now_ms;
            return true;
        }
        false
    }

    pub fn observe_press(&mut self, now_ms: u64) {
        self.last_activity_ms = now_ms;
    }

    pub fn idle_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_activity_ms)
    }

    /// Request sleep once the inactivity timeout has elapsed.
    ///
    /// Returns true if sleep was requested. If the request returns (sleep
    /// declined) the idle clock restarts from `now_ms`.
    pub fn poll(&mut self, now_ms: u64, sleep: &mut impl SleepControl) -> bool {
        if self.idle_ms(now_ms) < self.timeout_ms {
            return false;
        }
        sleep.request_sleep(WakeSource::ButtonEdge);
        self.wake(now_ms);
        true
    }

    /// Restart the idle clock, keeping the weight reference.
    pub fn wake(&mut self, now_ms: u64) {
        self.last_activity_ms = now_ms;
    }
}
