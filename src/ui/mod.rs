//! User interface subsystem - OLED display + physical button.
//!
//! ## Components
//!
//! - **Display**: SSD1306 128×32 OLED via I²C, refreshed at 10 Hz
//! - **Button**: one active-low tactile switch, polled and classified
//!   into Short/Long presses

pub mod buttons;
pub mod display;
pub mod press;

use crate::calibration::CalibrationPhase;
use defmt::Format;

/// Screens (views) the display can be in.
#[derive(Clone, Copy, PartialEq, Eq, Format)]
pub enum Screen {
    /// Live weight, name and peak.
    Weight,
    /// Trigger sequence is well under way (presses so far).
    Sequence(u8),
    /// Calibration step 1: scale must be empty.
    RemoveLoad,
    /// Calibration step 2: reference weight on, confirm.
    PlaceWeight,
    /// Calibration result being written to flash.
    Saving,
}

impl Screen {
    pub fn for_phase(phase: CalibrationPhase) -> Self {
        match phase {
            CalibrationPhase::Idle => Screen::Weight,
            // A few short presses are normal use; only hint once the
            // sequence is unmistakable.
            CalibrationPhase::Accumulating(count) if count < 3 => Screen::Weight,
            CalibrationPhase::Accumulating(count) => Screen::Sequence(count),
            CalibrationPhase::AwaitingZero => Screen::RemoveLoad,
            CalibrationPhase::AwaitingKnownWeight => Screen::PlaceWeight,
            CalibrationPhase::Committing => Screen::Saving,
        }
    }
}
