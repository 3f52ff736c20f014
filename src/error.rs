//! Unified error type for openscale.
//!
//! We avoid `alloc` - all error variants carry only fixed-size data.
//! Implements `defmt::Format` (behind the `defmt` feature) for efficient
//! on-target logging.

/// Top-level error type used across the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    // Validation
    /// Calibration factor is zero, NaN or infinite.
    InvalidCalibration,

    /// Device name longer than `MAX_DEVICE_NAME_LENGTH` bytes.
    NameTooLong,

    /// Display unit code is neither lbs (0) nor kg (1).
    UnsupportedUnit(u8),

    /// Requested sample rate was outside [1, 80] Hz and has been clamped.
    SampleRateOutOfRange { requested: u8, applied: u8 },

    /// Payload has the wrong length or is empty where a value is required.
    InvalidPayload,

    /// Device name bytes are not valid UTF-8.
    InvalidUtf8,

    // Load cell
    /// HX711 clock or data pin could not be driven or read.
    Sensor,

    // Storage
    /// The key/value engine failed to read or write.
    Persistence(StoreError),

    // BLE
    /// The SoftDevice returned a BLE-level error.
    Ble(BleError),

    // UI / Display
    /// I²C transaction to the display failed.
    Display,
}

/// Subset of BLE errors we propagate (keeps the enum `Copy`-friendly).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BleError {
    /// GAP / GATT raw error code from the SoftDevice.
    Raw(u32),
    /// Advertising could not start or was aborted.
    AdvertiseFailed,
    /// Characteristic notify failed.
    NotifyFailed,
    /// Updating a local characteristic value failed.
    SetValueFailed,
}

/// Failures of the underlying key/value persistence engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    /// Flash read failed.
    Read,
    /// Flash write/erase failed.
    Write,
    /// Stored item or caller buffer larger than the scratch buffer.
    BufferOverflow,
    /// The storage task queue was full; the write was not attempted.
    Busy,
    /// Key is not part of the settings namespace.
    UnknownKey,
}

// Convenience conversions

impl From<BleError> for Error {
    fn from(e: BleError) -> Self {
        Error::Ble(e)
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Error::Persistence(e)
    }
}
