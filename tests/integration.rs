//! Integration tests for openscale host-testable logic.

use std::collections::HashMap;

use embassy_futures::block_on;
use openscale::ble::codec::{decode_write, encode_weight, WriteTarget};
use openscale::calibration::{CalibrationEffect, CalibrationPhase, CALIBRATION_SEQUENCE};
use openscale::config::{
    CALIBRATION_UNLOAD_MS, CALIBRATION_WEIGHT_GRAMS, INACTIVITY_TIMEOUT_MS, MAX_SAMPLE_RATE_HZ,
};
use openscale::error::StoreError;
use openscale::power_logic::{SleepControl, WakeSource};
use openscale::scale::pipeline::SamplingPipeline;
use openscale::scale::units::{format_weight, DisplayUnit};
use openscale::scale::{Applied, Persist, PersistOrigin, PersistRequest};
use openscale::settings::{DeviceConfig, KeyValueStore, SettingsStore};
use openscale::ui::press::{ButtonEvent, PressKind};
use openscale::{Error, Scale, ScaleCommand};

#[derive(Default)]
struct HashStore {
    items: HashMap<String, Vec<u8>>,
}

impl KeyValueStore for HashStore {
    async fn get(&mut self, key: &str, buf: &mut [u8]) -> Result<Option<usize>, StoreError> {
        match self.items.get(key) {
            None => Ok(None),
            Some(value) if value.len() > buf.len() => Err(StoreError::BufferOverflow),
            Some(value) => {
                buf[..value.len()].copy_from_slice(value);
                Ok(Some(value.len()))
            }
        }
    }

    async fn set(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.items.insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

#[derive(Default)]
struct SleepLog {
    requests: Vec<WakeSource>,
}

impl SleepControl for SleepLog {
    fn request_sleep(&mut self, wake: WakeSource) {
        self.requests.push(wake);
    }
}

fn scale() -> Scale {
    Scale::new(DeviceConfig::default(), 0).expect("default config is valid")
}

#[test]
fn pipeline_reports_calibrated_weight_after_tare() {
    let mut pipeline = SamplingPipeline::new(420.0).unwrap();
    pipeline.process(&[5_000, 5_000]);
    pipeline.tare();

    let w = pipeline.process(&[5_000 + 42_000, 5_000 + 42_000]).unwrap();
    assert!((w.grams - 100.0).abs() < 0.01);
    assert!((w.kg() - 0.1).abs() < 1e-4);

    // Inside the noise band the weight reads zero but the offset stays put.
    let w = pipeline.process(&[5_000 + 420, 5_000 + 420]).unwrap();
    assert_eq!(w.grams, 0.0);
    assert_eq!(pipeline.profile().offset(), 5_000);
}

#[test]
fn button_sequence_drives_two_point_calibration() {
    let mut scale = scale();
    let mut t = 1_000;
    for kind in CALIBRATION_SEQUENCE {
        scale.on_press(ButtonEvent { kind, at_ms: t });
        t += 600;
    }
    assert_eq!(scale.phase(), CalibrationPhase::AwaitingZero);

    // Samples taken while the user is still unloading are not a zero.
    assert_eq!(scale.on_samples(&[90_000, 90_000], t).unwrap().calibration, None);
    t += CALIBRATION_UNLOAD_MS;

    let raw_zero = 10_000;
    let report = scale.on_samples(&[raw_zero, raw_zero], t).unwrap();
    assert_eq!(
        report.calibration,
        Some(CalibrationEffect::ZeroCaptured { raw_zero })
    );

    t += 2_000;
    let outcome = scale.on_press(ButtonEvent {
        kind: PressKind::Short,
        at_ms: t,
    });
    assert_eq!(outcome.calibration, Some(CalibrationEffect::LoadConfirmed));

    let loaded = raw_zero + (420.0 * CALIBRATION_WEIGHT_GRAMS) as i32;
    let report = scale.on_samples(&[loaded, loaded], t + 100).unwrap();
    let Some(PersistRequest {
        origin: PersistOrigin::Calibration,
        item: Persist::Calibration(factor),
    }) = report.persist
    else {
        panic!("expected a calibration persist request, got {:?}", report.persist);
    };
    assert!((factor - 420.0).abs() < 0.1);
    assert_eq!(scale.tare_offset(), raw_zero);
    assert_eq!(scale.phase(), CalibrationPhase::Committing);

    scale.persisted(PersistOrigin::Calibration, Ok(()));
    assert_eq!(scale.phase(), CalibrationPhase::Idle);

    let w = scale.on_samples(&[loaded, loaded], t + 200).unwrap().weight;
    assert!((w.grams - CALIBRATION_WEIGHT_GRAMS).abs() < 1.0);
}

#[test]
fn long_press_cancels_without_touching_calibration() {
    let mut scale = scale();
    let before = (scale.calibration_factor(), scale.tare_offset());
    let mut t = 0;
    for kind in CALIBRATION_SEQUENCE {
        scale.on_press(ButtonEvent { kind, at_ms: t });
        t += 400;
    }
    t += CALIBRATION_UNLOAD_MS;
    scale.on_samples(&[7_000, 7_000], t);
    scale.on_press(ButtonEvent {
        kind: PressKind::Long,
        at_ms: t + 1_500,
    });

    assert_eq!(scale.phase(), CalibrationPhase::Idle);
    assert_eq!((scale.calibration_factor(), scale.tare_offset()), before);
}

#[test]
fn ble_writes_are_validated_before_reaching_the_scale() {
    let mut scale = scale();

    assert_eq!(
        decode_write(WriteTarget::Calibration, &0.0f32.to_le_bytes()),
        Err(Error::InvalidCalibration)
    );
    assert_eq!(
        decode_write(WriteTarget::DeviceName, "ABCDEFGHIJKLMNOPQRSTU".as_bytes()),
        Err(Error::NameTooLong)
    );
    assert_eq!(
        decode_write(WriteTarget::DisplayUnit, &[2]),
        Err(Error::UnsupportedUnit(2))
    );
    assert_eq!(
        decode_write(WriteTarget::DeviceName, &[0xFF, 0xFE]),
        Err(Error::InvalidUtf8)
    );
    assert_eq!(scale.calibration_factor(), 420.0);

    let command = decode_write(WriteTarget::SampleRate, &[200]).unwrap();
    assert_eq!(
        scale.apply(command),
        Ok(Applied::SampleRate(MAX_SAMPLE_RATE_HZ))
    );
    scale.begin_cycle();
    assert_eq!(scale.sample_rate(), MAX_SAMPLE_RATE_HZ);

    let command = decode_write(WriteTarget::DisplayUnit, &[1]).unwrap();
    assert!(matches!(scale.apply(command), Ok(Applied::Persist(_))));
    assert_eq!(scale.snapshot().unit, DisplayUnit::Kg);
}

#[test]
fn tare_write_zeroes_the_reading() {
    let mut scale = scale();
    scale.on_samples(&[84_000, 84_000], 10);
    assert!((scale.weight().grams - 200.0).abs() < 0.01);

    assert_eq!(scale.apply(ScaleCommand::Tare), Ok(Applied::Tared));
    assert_eq!(scale.weight().grams, 0.0);
    assert_eq!(encode_weight(scale.weight().grams), [0; 4]);
    assert_eq!(format_weight(scale.weight().grams, DisplayUnit::Lbs), "0.0");
}

#[test]
fn settings_survive_a_reboot() {
    let mut settings = SettingsStore::new(HashStore::default());
    let mut config = DeviceConfig::default();
    config.name = openscale::settings::validate_device_name("Kitchen").unwrap();
    config.unit = DisplayUnit::Kg;
    config.calibration = 398.5;
    block_on(settings.save(&config)).unwrap();

    let mut rebooted = SettingsStore::new(settings.into_inner());
    let loaded = block_on(rebooted.load());
    assert_eq!(loaded, config);

    let scale = Scale::new(loaded, 0).unwrap();
    assert_eq!(scale.calibration_factor(), 398.5);
    assert_eq!(scale.snapshot().name.as_str(), "Kitchen");
}

#[test]
fn invalid_settings_are_never_written() {
    let mut settings = SettingsStore::new(HashStore::default());
    assert_eq!(
        block_on(settings.save_calibration(f32::NAN)),
        Err(Error::InvalidCalibration)
    );
    assert_eq!(
        block_on(settings.save_name("a name that is far too long")),
        Err(Error::NameTooLong)
    );
    assert!(settings.into_inner().items.is_empty());
}

#[test]
fn idle_scale_requests_sleep_once() {
    let mut scale = scale();
    let mut log = SleepLog::default();

    scale.on_samples(&[0, 0], 0);
    assert!(!scale.poll_sleep(INACTIVITY_TIMEOUT_MS - 1, &mut log));

    // A load change counts as activity and restarts the timer.
    scale.on_samples(&[42_000, 42_000], INACTIVITY_TIMEOUT_MS - 1);
    assert!(!scale.poll_sleep(INACTIVITY_TIMEOUT_MS, &mut log));

    assert!(scale.poll_sleep(2 * INACTIVITY_TIMEOUT_MS, &mut log));
    assert_eq!(log.requests, vec![WakeSource::ButtonEdge]);
}
