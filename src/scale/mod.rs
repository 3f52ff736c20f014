//! Scale core - the single owner of all mutable scale state.
//!
//! The sampling pipeline, calibration controller, activity monitor and the
//! in-memory [`DeviceConfig`] live together here. Button events, BLE writes
//! and sample batches are fed in one at a time by the scale task, so there
//! is never more than one writer.

pub mod pipeline;
pub mod units;

use crate::calibration::{
    CalibrationController, CalibrationEffect, CalibrationInput, CalibrationPhase, ControllerConfig,
};
use crate::error::Error;
use crate::power_logic::{ActivityMonitor, SleepControl};
use crate::settings::{DeviceConfig, DeviceName};
use crate::ui::press::ButtonEvent;

use self::pipeline::{FilteredWeight, SamplingPipeline};
use self::units::DisplayUnit;

/// A validated state change, decoded from a BLE write.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScaleCommand {
    Tare,
    SetSampleRate(u8),
    SetCalibration(f32),
    SetDeviceName(DeviceName),
    SetDisplayUnit(DisplayUnit),
}

/// One setting that must reach flash.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Persist {
    Calibration(f32),
    Name(DeviceName),
    Unit(DisplayUnit),
}

/// Who asked for a write. A calibration commit holds the controller in
/// `Committing` until its result comes back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PersistOrigin {
    Ble,
    Calibration,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PersistRequest {
    pub origin: PersistOrigin,
    pub item: Persist,
}

/// Result of a successfully applied command.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Applied {
    Tared,
    /// Rate that will be used from the next cycle (after clamping).
    SampleRate(u8),
    Persist(PersistRequest),
}

/// Side effects of a press or tick.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Outcome {
    pub calibration: Option<CalibrationEffect>,
    pub persist: Option<PersistRequest>,
}

/// Side effects of one sampling cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct CycleReport {
    pub weight: FilteredWeight,
    /// The weight moved enough to count as activity.
    pub active: bool,
    pub calibration: Option<CalibrationEffect>,
    pub persist: Option<PersistRequest>,
}

/// Read-only view published to the BLE and display tasks.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub weight: FilteredWeight,
    pub sample_rate: u8,
    pub factor: f32,
    pub name: DeviceName,
    pub unit: DisplayUnit,
    pub phase: CalibrationPhase,
    /// Failure of the most recent settings write, cleared by the next success.
    pub save_error: Option<Error>,
}

impl Default for Snapshot {
    fn default() -> Self {
        let config = DeviceConfig::default();
        Self {
            weight: FilteredWeight::default(),
            sample_rate: crate::config::DEFAULT_SAMPLE_RATE_HZ,
            factor: config.calibration,
            name: config.name,
            unit: config.unit,
            phase: CalibrationPhase::Idle,
            save_error: None,
        }
    }
}

pub struct Scale {
    pipeline: SamplingPipeline,
    calibration: CalibrationController,
    activity: ActivityMonitor,
    config: DeviceConfig,
    save_error: Option<Error>,
}

impl Scale {
    pub fn new(config: DeviceConfig, now_ms: u64) -> Result<Self, Error> {
        Self::with_controller(config, ControllerConfig::default(), now_ms)
    }

    pub fn with_controller(
        config: DeviceConfig,
        controller: ControllerConfig,
        now_ms: u64,
    ) -> Result<Self, Error> {
        Ok(Self {
            pipeline: SamplingPipeline::new(config.calibration)?,
            calibration: CalibrationController::new(controller),
            activity: ActivityMonitor::new(now_ms),
            config,
            save_error: None,
        })
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn weight(&self) -> FilteredWeight {
        self.pipeline.read_weight()
    }

    pub fn sample_rate(&self) -> u8 {
        self.pipeline.sample_rate()
    }

    pub fn calibration_factor(&self) -> f32 {
        self.pipeline.profile().factor()
    }

    pub fn tare_offset(&self) -> i32 {
        self.pipeline.profile().offset()
    }

    pub fn phase(&self) -> CalibrationPhase {
        self.calibration.phase()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            weight: self.weight(),
            sample_rate: self.sample_rate(),
            factor: self.calibration_factor(),
            name: self.config.name.clone(),
            unit: self.config.unit,
            phase: self.phase(),
            save_error: self.save_error,
        }
    }

    /// Start a sampling cycle and return its period in ms.
    pub fn begin_cycle(&mut self) -> u64 {
        self.pipeline.begin_cycle()
    }

    /// Feed one batch of raw counts.
    pub fn on_samples(&mut self, samples: &[i32], now_ms: u64) -> Option<CycleReport> {
        let weight = self.pipeline.process(samples)?;
        let active = self.activity.observe_weight(weight.grams, now_ms);
        let calibration = self
            .calibration
            .handle(CalibrationInput::RawMean(weight.raw_mean), now_ms);
        let persist = self.absorb(calibration);
        Some(CycleReport {
            weight,
            active,
            calibration,
            persist,
        })
    }

    pub fn on_press(&mut self, event: ButtonEvent) -> Outcome {
        self.activity.observe_press(event.at_ms);
        let calibration = self
            .calibration
            .handle(CalibrationInput::Press(event), event.at_ms);
        Outcome {
            calibration,
            persist: self.absorb(calibration),
        }
    }

    pub fn on_tick(&mut self, now_ms: u64) -> Outcome {
        let calibration = self.calibration.handle(CalibrationInput::Tick, now_ms);
        Outcome {
            calibration,
            persist: self.absorb(calibration),
        }
    }

    /// Apply a validated command. In-memory state changes immediately;
    /// persistence is requested separately so a flash failure never
    /// reverts the running value.
    pub fn apply(&mut self, command: ScaleCommand) -> Result<Applied, Error> {
        match command {
            ScaleCommand::Tare => {
                self.pipeline.tare();
                Ok(Applied::Tared)
            }
            ScaleCommand::SetSampleRate(hz) => {
                Ok(Applied::SampleRate(self.pipeline.set_sample_rate(hz)))
            }
            ScaleCommand::SetCalibration(factor) => {
                self.pipeline.set_calibration_factor(factor)?;
                self.config.calibration = factor;
                Ok(Applied::Persist(PersistRequest {
                    origin: PersistOrigin::Ble,
                    item: Persist::Calibration(factor),
                }))
            }
            ScaleCommand::SetDeviceName(name) => {
                self.config.name = name.clone();
                Ok(Applied::Persist(PersistRequest {
                    origin: PersistOrigin::Ble,
                    item: Persist::Name(name),
                }))
            }
            ScaleCommand::SetDisplayUnit(unit) => {
                self.config.unit = unit;
                Ok(Applied::Persist(PersistRequest {
                    origin: PersistOrigin::Ble,
                    item: Persist::Unit(unit),
                }))
            }
        }
    }

    /// Report the outcome of a persist request. The in-memory value is kept
    /// either way; a failure stays visible in the snapshot until a later
    /// write succeeds.
    pub fn persisted(&mut self, origin: PersistOrigin, result: Result<(), Error>) {
        self.save_error = result.err();
        if origin == PersistOrigin::Calibration {
            self.calibration.finish_commit();
        }
    }

    /// Ask for sleep if the inactivity timeout has elapsed.
    pub fn poll_sleep(&mut self, now_ms: u64, sleep: &mut impl SleepControl) -> bool {
        self.activity.poll(now_ms, sleep)
    }

    /// Install a committed calibration and build its persist request.
    fn absorb(&mut self, effect: Option<CalibrationEffect>) -> Option<PersistRequest> {
        let CalibrationEffect::Commit { factor, raw_zero } = effect? else {
            return None;
        };
        // The controller only emits validated factors.
        self.pipeline.set_calibration_factor(factor).ok()?;
        self.pipeline.set_offset(raw_zero);
        self.config.calibration = factor;
        Some(PersistRequest {
            origin: PersistOrigin::Calibration,
            item: Persist::Calibration(factor),
        })
    }
}
