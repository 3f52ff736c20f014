//! Application-wide constants and compile-time configuration.
//!
//! All hardware pin assignments, timing parameters, thresholds and factory
//! defaults live here so they can be tuned in one place.

// Load cell (HX711)

/// Number of raw readings averaged into one sampling cycle.
/// 1-4 for fast response, 5-10 for stability.
pub const READINGS_TO_AVERAGE: usize = 2;

/// Extra SCK pulses after the 24 data bits. 1 = channel A, gain 128.
pub const HX711_GAIN_PULSES: u8 = 1;

/// Reported weights with a magnitude below this are clamped to zero (grams).
pub const NOISE_THRESHOLD_GRAMS: f32 = 5.0;

/// Factory calibration factor (raw counts per gram).
/// Positive = reading increases when weight is applied.
pub const FACTORY_CALIBRATION_FACTOR: f32 = 420.0;

// Sampling

pub const DEFAULT_SAMPLE_RATE_HZ: u8 = 10;

/// HX711 tops out at 80 Hz in high-speed mode.
pub const MAX_SAMPLE_RATE_HZ: u8 = 80;
pub const MIN_SAMPLE_RATE_HZ: u8 = 1;

/// Display refresh rate, independent of the sample rate.
pub const DISPLAY_UPDATE_RATE_HZ: u8 = 10;

// Button

/// Button debounce time (ms).
pub const BUTTON_DEBOUNCE_MS: u64 = 50;

/// Button polling period (ms). Must stay below the debounce window.
pub const BUTTON_POLL_MS: u64 = 10;

/// Longest press still classified as short (ms).
pub const SHORT_PRESS_MAX_MS: u64 = 500;

/// Shortest press classified as long (ms).
pub const LONG_PRESS_MS: u64 = 1000;

/// Maximum gap between presses of the calibration sequence (ms).
pub const SEQUENCE_TIMEOUT_MS: u64 = 3000;

// Calibration

/// Known calibration weight: 10 lb.
pub const CALIBRATION_WEIGHT_GRAMS: f32 = 4535.92;
pub const CALIBRATION_WEIGHT_LBS: f32 = 10.0;

/// How long the controller waits for the reference weight to be confirmed.
pub const CALIBRATION_CONFIRM_TIMEOUT_MS: u64 = 60_000;

/// Settling delay used by `ConfirmTrigger::Settle`.
pub const CALIBRATION_SETTLE_MS: u64 = 5_000;

/// Time the user gets to empty the scale before the zero is captured.
pub const CALIBRATION_UNLOAD_MS: u64 = 3_000;

// Power management

/// Inactivity before the device powers off (10 minutes).
pub const INACTIVITY_TIMEOUT_MS: u64 = 600_000;

/// Weight change that counts as user activity (grams).
pub const ACTIVITY_THRESHOLD_GRAMS: f32 = 50.0;

// BLE

/// Advertised name when nothing is stored.
pub const DEFAULT_DEVICE_NAME: &str = "OpenScale";

/// Maximum custom device name length in bytes.
pub const MAX_DEVICE_NAME_LENGTH: usize = 20;

/// Service UUID in little-endian byte order for the advertising payload
/// (4fafc201-1fb5-459e-8fcc-c5c9c331914b).
pub const SERVICE_UUID_LE: [u8; 16] = [
    0x4b, 0x91, 0x31, 0xc3, 0xc9, 0xc5, 0xcc, 0x8f, 0x9e, 0x45, 0xb5, 0x1f, 0x01, 0xc2, 0xaf, 0x4f,
];

/// Advertising interval (in 0.625 ms units). 400 = 250 ms.
pub const BLE_ADV_INTERVAL: u32 = 400;

// GPIO pin assignments (nRF52840-DK defaults)
//
// These are logical names; actual `embassy_nrf::peripherals::*` types are
// selected in `main.rs`.  Adjust for your custom PCB.
//
//   HX711 DT (DOUT) → P0.03
//   HX711 SCK       → P0.04
//   Button          → P0.11 (active low, wake source)
//   I²C SDA         → P0.26
//   I²C SCL         → P0.27

/// Port 0 pin number of the button, needed to arm the System OFF wake sense.
pub const BUTTON_PIN_NUMBER: usize = 11;

// Display

pub const OLED_ADDRESS: u8 = 0x3C;

// Settings storage

/// Flash page index where settings storage starts (4 KB per page on nRF52840).
pub const STORAGE_FLASH_PAGE_START: u32 = 240;

/// Number of flash pages reserved for settings storage.
pub const STORAGE_FLASH_PAGE_COUNT: u32 = 4;

pub const KEY_DEVICE_NAME: &str = "device_name";
pub const KEY_DISPLAY_UNIT: &str = "display_unit";
pub const KEY_CALIBRATION: &str = "calibration";

// Unit conversions

pub const GRAMS_TO_KG: f32 = 0.001;
pub const GRAMS_TO_LBS: f32 = 0.002_204_62;
pub const GRAMS_TO_OZ: f32 = 0.035_274;
