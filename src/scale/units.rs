//! Weight units and display formatting.
//!
//! Conversions are pure functions of grams; nothing here is filtered or
//! stateful.

use core::fmt::Write;

use heapless::String;

use crate::config::{GRAMS_TO_KG, GRAMS_TO_LBS, GRAMS_TO_OZ};
use crate::error::Error;

/// Unit the OLED shows. Persisted as `0 = lbs`, `1 = kg`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DisplayUnit {
    #[default]
    Lbs,
    Kg,
}

impl DisplayUnit {
    pub fn from_code(code: u8) -> Result<Self, Error> {
        match code {
            0 => Ok(DisplayUnit::Lbs),
            1 => Ok(DisplayUnit::Kg),
            other => Err(Error::UnsupportedUnit(other)),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            DisplayUnit::Lbs => 0,
            DisplayUnit::Kg => 1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DisplayUnit::Lbs => "lbs",
            DisplayUnit::Kg => "kg",
        }
    }

    /// Convert grams into this unit.
    pub fn convert(self, grams: f32) -> f32 {
        match self {
            DisplayUnit::Lbs => grams_to_lbs(grams),
            DisplayUnit::Kg => grams_to_kg(grams),
        }
    }

    /// Half of the last printed digit; anything smaller prints as zero.
    fn rounding_floor(self) -> f32 {
        match self {
            DisplayUnit::Lbs => 0.05,
            DisplayUnit::Kg => 0.005,
        }
    }
}

pub fn grams_to_kg(grams: f32) -> f32 {
    grams * GRAMS_TO_KG
}

pub fn grams_to_lbs(grams: f32) -> f32 {
    grams * GRAMS_TO_LBS
}

pub fn grams_to_oz(grams: f32) -> f32 {
    grams * GRAMS_TO_OZ
}

/// Format a weight for the display: lbs with one decimal, kg with two.
///
/// Values that round to zero are printed unsigned so a small negative
/// drift never shows as "-0.0".
pub fn format_weight(grams: f32, unit: DisplayUnit) -> String<16> {
    let mut value = unit.convert(grams);
    if libm::fabsf(value) < unit.rounding_floor() {
        value = 0.0;
    }

    let mut out = String::new();
    let _ = match unit {
        DisplayUnit::Lbs => write!(out, "{:.1}", value),
        DisplayUnit::Kg => write!(out, "{:.2}", value),
    };
    out
}
