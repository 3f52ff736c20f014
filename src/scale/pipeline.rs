//! Sampling pipeline - raw HX711 counts to a filtered, calibrated weight.
//!
//! Each cycle takes `READINGS_TO_AVERAGE` raw counts, averages them,
//! subtracts the tare offset and divides by the calibration factor.
//! Magnitudes under `NOISE_THRESHOLD_GRAMS` are *reported* as zero, but the
//! offset and the raw mean are left exactly as measured, so a slowly loaded
//! scale responds as soon as it crosses the threshold.

use crate::config::{
    DEFAULT_SAMPLE_RATE_HZ, MAX_SAMPLE_RATE_HZ, MIN_SAMPLE_RATE_HZ, NOISE_THRESHOLD_GRAMS,
};
use crate::error::Error;
use crate::scale::units::{grams_to_kg, grams_to_lbs, grams_to_oz, DisplayUnit};

/// Reject calibration factors that would poison every division.
pub fn validate_calibration_factor(factor: f32) -> Result<f32, Error> {
    if factor == 0.0 || !factor.is_finite() {
        return Err(Error::InvalidCalibration);
    }
    Ok(factor)
}

/// Clamp a requested sample rate into the supported range.
pub fn clamp_sample_rate(hz: u8) -> u8 {
    hz.clamp(MIN_SAMPLE_RATE_HZ, MAX_SAMPLE_RATE_HZ)
}

/// Like [`clamp_sample_rate`], but reports when clamping happened.
pub fn check_sample_rate(hz: u8) -> Result<u8, Error> {
    let applied = clamp_sample_rate(hz);
    if applied != hz {
        return Err(Error::SampleRateOutOfRange {
            requested: hz,
            applied,
        });
    }
    Ok(hz)
}

/// Arithmetic mean of a batch of raw counts, truncated toward zero.
pub fn raw_mean(samples: &[i32]) -> Option<i32> {
    if samples.is_empty() {
        return None;
    }
    let sum: i64 = samples.iter().map(|&s| s as i64).sum();
    Some((sum / samples.len() as i64) as i32)
}

/// Decode one 24-bit HX711 frame (two's complement, MSB first) into a count.
pub fn raw_count_from_frame(frame: u32) -> i32 {
    ((frame << 8) as i32) >> 8
}

/// Scale + zero-offset mapping from raw counts to grams.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationProfile {
    factor: f32,
    offset: i32,
}

impl CalibrationProfile {
    pub fn new(factor: f32, offset: i32) -> Result<Self, Error> {
        Ok(Self {
            factor: validate_calibration_factor(factor)?,
            offset,
        })
    }

    pub fn factor(&self) -> f32 {
        self.factor
    }

    pub fn offset(&self) -> i32 {
        self.offset
    }

    /// Unclamped grams for a raw mean.
    pub fn grams(&self, raw_mean: i32) -> f32 {
        let counts = raw_mean as i64 - self.offset as i64;
        counts as f32 / self.factor
    }
}

/// The weight reported for one sampling cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FilteredWeight {
    /// Reported grams (zero inside the noise band).
    pub grams: f32,
    /// Calibrated grams before the noise clamp.
    pub unclamped_grams: f32,
    /// Raw mean the value was computed from.
    pub raw_mean: i32,
    /// Highest reported weight since the last tare.
    pub peak_grams: f32,
}

impl FilteredWeight {
    pub fn kg(&self) -> f32 {
        grams_to_kg(self.grams)
    }

    pub fn lbs(&self) -> f32 {
        grams_to_lbs(self.grams)
    }

    pub fn oz(&self) -> f32 {
        grams_to_oz(self.grams)
    }

    pub fn in_unit(&self, unit: DisplayUnit) -> f32 {
        unit.convert(self.grams)
    }
}

pub struct SamplingPipeline {
    profile: CalibrationProfile,
    /// Rate the current cycle period is derived from.
    active_rate_hz: u8,
    /// Rate requested since the last cycle started.
    pending_rate_hz: Option<u8>,
    last_raw_mean: Option<i32>,
    tare_pending: bool,
    latest: FilteredWeight,
}

impl SamplingPipeline {
    pub fn new(factor: f32) -> Result<Self, Error> {
        Ok(Self {
            profile: CalibrationProfile::new(factor, 0)?,
            active_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
            pending_rate_hz: None,
            last_raw_mean: None,
            tare_pending: false,
            latest: FilteredWeight::default(),
        })
    }

    pub fn profile(&self) -> CalibrationProfile {
        self.profile
    }

    /// Latest reported weight. Never waits for a new sample.
    pub fn read_weight(&self) -> FilteredWeight {
        self.latest
    }

    pub fn last_raw_mean(&self) -> Option<i32> {
        self.last_raw_mean
    }

    /// Run one cycle over a batch of raw counts.
    ///
    /// Returns `None` for an empty batch; the previous weight stays current.
    pub fn process(&mut self, samples: &[i32]) -> Option<FilteredWeight> {
        let mean = raw_mean(samples)?;
        self.last_raw_mean = Some(mean);

        if self.tare_pending {
            self.capture_tare(mean);
        }

        let unclamped = self.profile.grams(mean);
        let grams = if libm::fabsf(unclamped) < NOISE_THRESHOLD_GRAMS {
            0.0
        } else {
            unclamped
        };

        self.latest = FilteredWeight {
            grams,
            unclamped_grams: unclamped,
            raw_mean: mean,
            peak_grams: self.latest.peak_grams.max(grams),
        };
        Some(self.latest)
    }

    /// Use the current raw mean as the new zero. The factor is untouched.
    ///
    /// Before the first sample the tare is remembered and applied to the
    /// first raw mean.
    pub fn tare(&mut self) {
        match self.last_raw_mean {
            Some(mean) => {
                self.capture_tare(mean);
                self.latest.grams = 0.0;
                self.latest.unclamped_grams = 0.0;
            }
            None => self.tare_pending = true,
        }
    }

    fn capture_tare(&mut self, mean: i32) {
        self.profile.offset = mean;
        self.tare_pending = false;
        self.latest.peak_grams = 0.0;
    }

    /// Install a zero offset captured elsewhere (two-point calibration).
    pub fn set_offset(&mut self, offset: i32) {
        self.profile.offset = offset;
        self.latest.peak_grams = 0.0;
    }

    /// Replace the calibration factor; invalid factors leave the old one.
    pub fn set_calibration_factor(&mut self, factor: f32) -> Result<(), Error> {
        self.profile.factor = validate_calibration_factor(factor)?;
        Ok(())
    }

    /// Request a new sample rate. Clamped to [1, 80] Hz and applied when
    /// the next cycle starts. Returns the rate that will be used.
    pub fn set_sample_rate(&mut self, hz: u8) -> u8 {
        let rate = clamp_sample_rate(hz);
        self.pending_rate_hz = Some(rate);
        rate
    }

    /// Configured rate, including a change not yet applied.
    pub fn sample_rate(&self) -> u8 {
        self.pending_rate_hz.unwrap_or(self.active_rate_hz)
    }

    /// Start a cycle: apply any pending rate change and return the period.
    pub fn begin_cycle(&mut self) -> u64 {
        if let Some(rate) = self.pending_rate_hz.take() {
            self.active_rate_hz = rate;
        }
        1000 / self.active_rate_hz as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FACTORY_CALIBRATION_FACTOR;

    fn pipeline() -> SamplingPipeline {
        SamplingPipeline::new(FACTORY_CALIBRATION_FACTOR).unwrap()
    }

    #[test]
    fn mean_truncates_and_handles_empty() {
        assert_eq!(raw_mean(&[]), None);
        assert_eq!(raw_mean(&[10, 11]), Some(10));
        assert_eq!(raw_mean(&[-10, -11]), Some(-10));
        assert_eq!(raw_mean(&[i32::MAX, i32::MAX]), Some(i32::MAX));
    }

    #[test]
    fn frame_decoding_sign_extends() {
        assert_eq!(raw_count_from_frame(0x00_0001), 1);
        assert_eq!(raw_count_from_frame(0x7F_FFFF), 8_388_607);
        assert_eq!(raw_count_from_frame(0x80_0000), -8_388_608);
        assert_eq!(raw_count_from_frame(0xFF_FFFF), -1);
    }

    #[test]
    fn weight_is_offset_then_scaled() {
        let mut p = pipeline();
        p.set_offset(1000);
        let w = p.process(&[1000 + 42_000, 1000 + 42_000]).unwrap();
        assert!((w.grams - 100.0).abs() < 1e-3);
        assert_eq!(w.raw_mean, 43_000);
    }

    #[test]
    fn noise_band_reports_zero_without_touching_offset() {
        let mut p = pipeline();
        // 4.99 g
        let w = p.process(&[2096, 2096]).unwrap();
        assert_eq!(w.grams, 0.0);
        assert!(w.unclamped_grams > 4.9);
        assert_eq!(p.profile().offset(), 0);
        assert_eq!(p.last_raw_mean(), Some(2096));
    }

    #[test]
    fn exactly_at_threshold_is_not_snapped() {
        let mut p = pipeline();
        let w = p.process(&[2100, 2100]).unwrap();
        assert_eq!(w.grams, 5.0);
        let w = p.process(&[-2100, -2100]).unwrap();
        assert_eq!(w.grams, -5.0);
    }

    #[test]
    fn incremental_load_crosses_threshold_immediately() {
        let mut p = pipeline();
        for raw in [0, 420, 840, 1260, 1680] {
            assert_eq!(p.process(&[raw, raw]).unwrap().grams, 0.0);
        }
        let w = p.process(&[2520, 2520]).unwrap();
        assert_eq!(w.grams, 6.0);
    }

    #[test]
    fn invalid_factor_keeps_previous() {
        let mut p = pipeline();
        p.set_calibration_factor(210.0).unwrap();
        assert_eq!(p.set_calibration_factor(0.0), Err(Error::InvalidCalibration));
        assert_eq!(p.set_calibration_factor(f32::NAN), Err(Error::InvalidCalibration));
        assert_eq!(
            p.set_calibration_factor(f32::INFINITY),
            Err(Error::InvalidCalibration)
        );
        assert_eq!(p.profile().factor(), 210.0);
        let w = p.process(&[21_000, 21_000]).unwrap();
        assert_eq!(w.grams, 100.0);
    }

    #[test]
    fn negative_factor_is_valid() {
        let mut p = pipeline();
        p.set_calibration_factor(-420.0).unwrap();
        let w = p.process(&[-42_000, -42_000]).unwrap();
        assert_eq!(w.grams, 100.0);
    }

    #[test]
    fn tare_captures_mean_and_keeps_factor() {
        let mut p = pipeline();
        p.process(&[84_000, 84_000]);
        p.tare();
        assert_eq!(p.profile().offset(), 84_000);
        assert_eq!(p.profile().factor(), FACTORY_CALIBRATION_FACTOR);
        assert_eq!(p.read_weight().grams, 0.0);
        let w = p.process(&[84_000 + 4200, 84_000 + 4200]).unwrap();
        assert_eq!(w.grams, 10.0);
    }

    #[test]
    fn tare_before_first_sample_applies_to_first_mean() {
        let mut p = pipeline();
        p.tare();
        let w = p.process(&[50_000, 50_000]).unwrap();
        assert_eq!(w.grams, 0.0);
        assert_eq!(p.profile().offset(), 50_000);
    }

    #[test]
    fn peak_tracks_max_until_tare() {
        let mut p = pipeline();
        p.process(&[42_000, 42_000]);
        p.process(&[84_000, 84_000]);
        let w = p.process(&[4200, 4200]).unwrap();
        assert_eq!(w.peak_grams, 200.0);
        p.tare();
        let w = p.process(&[4200, 4200]).unwrap();
        assert_eq!(w.peak_grams, 0.0);
    }

    #[test]
    fn sample_rate_is_clamped_and_deferred() {
        let mut p = pipeline();
        assert_eq!(p.set_sample_rate(0), 1);
        assert_eq!(p.sample_rate(), 1);
        assert_eq!(p.set_sample_rate(200), 80);
        assert_eq!(p.set_sample_rate(10), 10);
        assert_eq!(p.sample_rate(), 10);

        p.set_sample_rate(80);
        // Period change lands only when the next cycle begins.
        assert_eq!(p.begin_cycle(), 12);
        p.set_sample_rate(1);
        assert_eq!(p.begin_cycle(), 1000);
    }

    #[test]
    fn check_sample_rate_reports_clamping() {
        assert_eq!(check_sample_rate(10), Ok(10));
        assert_eq!(
            check_sample_rate(0),
            Err(Error::SampleRateOutOfRange {
                requested: 0,
                applied: 1
            })
        );
        assert_eq!(
            check_sample_rate(200),
            Err(Error::SampleRateOutOfRange {
                requested: 200,
                applied: 80
            })
        );
    }

    #[test]
    fn unit_views_follow_grams() {
        let w = FilteredWeight {
            grams: 1000.0,
            ..Default::default()
        };
        assert_eq!(w.kg(), 1.0);
        assert!((w.lbs() - 2.20462).abs() < 1e-4);
        assert!((w.oz() - 35.274).abs() < 1e-3);
        assert_eq!(w.in_unit(DisplayUnit::Kg), 1.0);
    }
}
