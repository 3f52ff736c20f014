//! Host-testable library interface for openscale.
//!
//! This module re-exports the pure logic modules (sampling, calibration,
//! settings, power policy, BLE payload codec) and the pin-generic HX711
//! driver so they can be tested on the host with no embedded hardware.
//!
//! Usage: `cargo test --lib` or `cargo test`
//!
//! Note: The embedded binary uses main.rs with #![no_std] and #![no_main]
//! and declares the full module tree itself, including the hardware tasks.

#![cfg_attr(not(test), no_std)]

pub mod calibration;
pub mod config;
pub mod error;
pub mod hx711;
pub mod power_logic;
pub mod scale;
pub mod settings;

// Internal module paths for files that live next to embedded-only code
#[path = "ui/press.rs"]
mod ui_press_impl;

#[path = "ble/codec.rs"]
mod ble_codec_impl;

pub mod ui {
    pub mod press {
        pub use crate::ui_press_impl::*;
    }
}

pub mod ble {
    pub mod codec {
        pub use crate::ble_codec_impl::*;
    }
}

pub use error::Error;
pub use scale::{Scale, ScaleCommand};

// ═══════════════════════════════════════════════════════════════════════════
// Cross-module tests
// ═══════════════════════════════════════════════════════════════════════════
