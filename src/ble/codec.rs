//! Payload encoding/decoding for the scale GATT service.
//!
//! All multi-byte values are little-endian. Every write is decoded into a
//! [`ScaleCommand`] here before anything touches scale state, so a bad
//! payload can never reach the pipeline or the store.

use crate::error::Error;
use crate::scale::pipeline::validate_calibration_factor;
use crate::scale::units::DisplayUnit;
use crate::scale::ScaleCommand;
use crate::settings::{validate_device_name, DeviceName};

/// Writable characteristics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WriteTarget {
    Tare,
    SampleRate,
    Calibration,
    DeviceName,
    DisplayUnit,
}

pub fn encode_weight(grams: f32) -> [u8; 4] {
    grams.to_le_bytes()
}

pub fn encode_calibration(factor: f32) -> [u8; 4] {
    factor.to_le_bytes()
}

/// Sample rate is a single byte; the pipeline clamps it.
pub fn decode_sample_rate(data: &[u8]) -> Result<u8, Error> {
    match data {
        [hz] => Ok(*hz),
        _ => Err(Error::InvalidPayload),
    }
}

pub fn decode_calibration(data: &[u8]) -> Result<f32, Error> {
    let bytes: [u8; 4] = data.try_into().map_err(|_| Error::InvalidPayload)?;
    validate_calibration_factor(f32::from_le_bytes(bytes))
}

pub fn decode_device_name(data: &[u8]) -> Result<DeviceName, Error> {
    let name = core::str::from_utf8(data).map_err(|_| Error::InvalidUtf8)?;
    validate_device_name(name)
}

pub fn decode_display_unit(data: &[u8]) -> Result<DisplayUnit, Error> {
    match data {
        [code] => DisplayUnit::from_code(*code),
        _ => Err(Error::InvalidPayload),
    }
}

/// Decode a write into a command. Tare accepts any payload.
pub fn decode_write(target: WriteTarget, data: &[u8]) -> Result<ScaleCommand, Error> {
    match target {
        WriteTarget::Tare => Ok(ScaleCommand::Tare),
        WriteTarget::SampleRate => decode_sample_rate(data).map(ScaleCommand::SetSampleRate),
        WriteTarget::Calibration => decode_calibration(data).map(ScaleCommand::SetCalibration),
        WriteTarget::DeviceName => decode_device_name(data).map(ScaleCommand::SetDeviceName),
        WriteTarget::DisplayUnit => decode_display_unit(data).map(ScaleCommand::SetDisplayUnit),
    }
}
