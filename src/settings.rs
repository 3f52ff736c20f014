//! Persistent device configuration.
//!
//! The settings adapter sits on a narrow key/value interface so the flash
//! engine can be swapped for an in-memory fake in tests.
//!
//! Storage layout (one item per key):
//!   - `device_name`  - UTF-8 bytes, at most `MAX_DEVICE_NAME_LENGTH`
//!   - `display_unit` - one byte, 0 = lbs, 1 = kg
//!   - `calibration`  - f32, little-endian
//!
//! A missing key falls back to the compiled-in default. A stored value
//! that no longer validates is treated the same way.

use heapless::String;

use crate::config::{
    DEFAULT_DEVICE_NAME, FACTORY_CALIBRATION_FACTOR, KEY_CALIBRATION, KEY_DEVICE_NAME,
    KEY_DISPLAY_UNIT, MAX_DEVICE_NAME_LENGTH,
};
use crate::error::{Error, StoreError};
use crate::scale::pipeline::validate_calibration_factor;
use crate::scale::units::DisplayUnit;

pub type DeviceName = String<MAX_DEVICE_NAME_LENGTH>;

/// Platform key/value engine. Writes are atomic per key.
#[allow(async_fn_in_trait)]
pub trait KeyValueStore {
    /// Copy the value for `key` into `buf`, returning its length, or
    /// `None` if the key was never written.
    async fn get(&mut self, key: &str, buf: &mut [u8]) -> Result<Option<usize>, StoreError>;

    async fn set(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError>;
}

/// Validate a device name and copy it into a bounded string.
pub fn validate_device_name(name: &str) -> Result<DeviceName, Error> {
    if name.is_empty() {
        return Err(Error::InvalidPayload);
    }
    if name.len() > MAX_DEVICE_NAME_LENGTH {
        return Err(Error::NameTooLong);
    }
    let mut out = String::new();
    out.push_str(name).map_err(|_| Error::NameTooLong)?;
    Ok(out)
}

/// User-visible persisted settings.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceConfig {
    pub name: DeviceName,
    pub unit: DisplayUnit,
    pub calibration: f32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        let mut name = String::new();
        let _ = name.push_str(DEFAULT_DEVICE_NAME);
        Self {
            name,
            unit: DisplayUnit::default(),
            calibration: FACTORY_CALIBRATION_FACTOR,
        }
    }
}

impl DeviceConfig {
    pub fn validate(&self) -> Result<(), Error> {
        validate_device_name(&self.name)?;
        validate_calibration_factor(self.calibration)?;
        Ok(())
    }
}

/// Settings adapter over a [`KeyValueStore`].
pub struct SettingsStore<S> {
    kv: S,
}

impl<S: KeyValueStore> SettingsStore<S> {
    pub fn new(kv: S) -> Self {
        Self { kv }
    }

    pub fn into_inner(self) -> S {
        self.kv
    }

    /// Load the stored config, falling back per key to factory defaults.
    pub async fn load(&mut self) -> DeviceConfig {
        let mut config = DeviceConfig::default();
        let mut buf = [0u8; MAX_DEVICE_NAME_LENGTH];

        if let Ok(Some(len)) = self.kv.get(KEY_DEVICE_NAME, &mut buf).await {
            if let Some(name) = core::str::from_utf8(&buf[..len])
                .ok()
                .and_then(|s| validate_device_name(s).ok())
            {
                config.name = name;
            }
        }

        if let Ok(Some(1)) = self.kv.get(KEY_DISPLAY_UNIT, &mut buf).await {
            if let Ok(unit) = DisplayUnit::from_code(buf[0]) {
                config.unit = unit;
            }
        }

        if let Ok(Some(4)) = self.kv.get(KEY_CALIBRATION, &mut buf).await {
            let factor = f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
            if let Ok(factor) = validate_calibration_factor(factor) {
                config.calibration = factor;
            }
        }

        config
    }

    /// Validate the whole config, then write every key.
    pub async fn save(&mut self, config: &DeviceConfig) -> Result<(), Error> {
        config.validate()?;
        self.save_name(&config.name).await?;
        self.save_unit(config.unit).await?;
        self.save_calibration(config.calibration).await
    }

    pub async fn save_name(&mut self, name: &str) -> Result<(), Error> {
        let name = validate_device_name(name)?;
        self.kv.set(KEY_DEVICE_NAME, name.as_bytes()).await?;
        Ok(())
    }

    pub async fn save_unit(&mut self, unit: DisplayUnit) -> Result<(), Error> {
        self.kv.set(KEY_DISPLAY_UNIT, &[unit.code()]).await?;
        Ok(())
    }

    pub async fn save_calibration(&mut self, factor: f32) -> Result<(), Error> {
        let factor = validate_calibration_factor(factor)?;
        self.kv.set(KEY_CALIBRATION, &factor.to_le_bytes()).await?;
        Ok(())
    }
}
