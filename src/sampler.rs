//! Scale task - the only context that mutates scale state.
//!
//! Each cycle reads `READINGS_TO_AVERAGE` conversions from the HX711,
//! feeds them to the [`Scale`] core and publishes the result. Between
//! cycles it serves button events, BLE commands and persistence results
//! until the next cycle is due.

use core::cell::RefCell;

use crate::calibration::CalibrationEffect;
use crate::config::READINGS_TO_AVERAGE;
use crate::error::{Error, StoreError};
use crate::hx711::Hx711;
use crate::power::{self, DeferredSleep};
use crate::scale::pipeline::check_sample_rate;
use crate::scale::{Applied, Outcome, PersistRequest, Scale, ScaleCommand, Snapshot};
use crate::storage::PersistResult;
use crate::ui::display;
use crate::ui::press::ButtonEvent;
use defmt::{debug, info, warn};
use embassy_futures::select::{select4, Either4};
use embassy_nrf::gpio::{Input, Output};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::{Receiver, Sender};
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Timer};

/// The load cell as wired on the board.
pub type LoadCell = Hx711<Output<'static>, Input<'static>, CycleDelay>;

/// Busy-wait delay for the HX711 clock, in CPU cycles at 64 MHz.
pub struct CycleDelay;

impl embedded_hal::delay::DelayNs for CycleDelay {
    fn delay_ns(&mut self, ns: u32) {
        let cycles = (ns as u64 * 64).div_ceil(1000);
        cortex_m::asm::delay(cycles.min(u32::MAX as u64) as u32);
    }
}

/// Latest published state, read by the BLE and display tasks.
static SNAPSHOT: Mutex<CriticalSectionRawMutex, RefCell<Option<Snapshot>>> =
    Mutex::new(RefCell::new(None));

/// Weight of the latest cycle, for BLE notification.
pub static WEIGHT: Signal<CriticalSectionRawMutex, f32> = Signal::new();

/// Settings visible over BLE changed (rate, factor, name, unit).
pub static SETTINGS_CHANGED: Signal<CriticalSectionRawMutex, ()> = Signal::new();

pub fn snapshot() -> Snapshot {
    SNAPSHOT.lock(|s| s.borrow().clone().unwrap_or_default())
}

fn publish(scale: &Scale) {
    SNAPSHOT.lock(|s| *s.borrow_mut() = Some(scale.snapshot()));
}

pub fn now_ms() -> u64 {
    Instant::now().as_millis()
}

fn log_calibration(effect: Option<CalibrationEffect>) {
    match effect {
        Some(CalibrationEffect::Started) => info!("Calibration: remove all weight"),
        Some(CalibrationEffect::ZeroCaptured { raw_zero }) => {
            info!("Calibration: zero captured at {}", raw_zero)
        }
        Some(CalibrationEffect::LoadConfirmed) => info!("Calibration: reference weight confirmed"),
        Some(CalibrationEffect::Commit { factor, raw_zero }) => {
            info!("Calibration: factor {} (zero {})", factor, raw_zero)
        }
        Some(CalibrationEffect::Aborted(reason)) => warn!("Calibration aborted: {}", reason),
        None => {}
    }
}

/// Hand a write to the storage task without blocking the sampling loop.
fn request_persist(
    scale: &mut Scale,
    persist_tx: &Sender<'static, CriticalSectionRawMutex, PersistRequest, 4>,
    request: PersistRequest,
) {
    let origin = request.origin;
    if persist_tx.try_send(request).is_err() {
        warn!("Storage queue full - {} kept in memory only", origin);
        scale.persisted(origin, Err(Error::Persistence(StoreError::Busy)));
    }
}

fn handle_outcome(
    scale: &mut Scale,
    persist_tx: &Sender<'static, CriticalSectionRawMutex, PersistRequest, 4>,
    outcome: Outcome,
) {
    log_calibration(outcome.calibration);
    if let Some(request) = outcome.persist {
        request_persist(scale, persist_tx, request);
    }
}

fn handle_press(
    scale: &mut Scale,
    persist_tx: &Sender<'static, CriticalSectionRawMutex, PersistRequest, 4>,
    event: ButtonEvent,
) {
    debug!("Button: {}", event);
    let outcome = scale.on_press(event);
    handle_outcome(scale, persist_tx, outcome);
}

fn handle_command(
    scale: &mut Scale,
    persist_tx: &Sender<'static, CriticalSectionRawMutex, PersistRequest, 4>,
    command: ScaleCommand,
) {
    if let ScaleCommand::SetSampleRate(hz) = command {
        if let Err(e) = check_sample_rate(hz) {
            warn!("{}", e);
        }
    }

    match scale.apply(command) {
        Ok(Applied::Tared) => info!("Tare"),
        Ok(Applied::SampleRate(hz)) => info!("Sample rate {} Hz from next cycle", hz),
        Ok(Applied::Persist(request)) => {
            debug!("Applied {}", request.item);
            request_persist(scale, persist_tx, request);
        }
        Err(e) => warn!("Command rejected: {}", e),
    }
    SETTINGS_CHANGED.signal(());
}

/// Drain everything already queued so a slow HX711 never starves input.
fn drain(
    scale: &mut Scale,
    press_rx: &Receiver<'static, CriticalSectionRawMutex, ButtonEvent, 4>,
    command_rx: &Receiver<'static, CriticalSectionRawMutex, ScaleCommand, 4>,
    persist_tx: &Sender<'static, CriticalSectionRawMutex, PersistRequest, 4>,
    result_rx: &Receiver<'static, CriticalSectionRawMutex, PersistResult, 4>,
) {
    while let Ok(event) = press_rx.try_receive() {
        handle_press(scale, persist_tx, event);
    }
    while let Ok(command) = command_rx.try_receive() {
        handle_command(scale, persist_tx, command);
    }
    while let Ok(done) = result_rx.try_receive() {
        scale.persisted(done.origin, done.result);
    }
}

/// Power down peripherals and enter System OFF. Returns if sleep was
/// declined; peripherals are powered back up first.
async fn sleep(hx711: &mut LoadCell, wake: power::WakeSource) {
    info!("Inactive - entering System OFF");
    if let Err(e) = hx711.power_down() {
        warn!("HX711 power down: {}", e);
    }
    display::blank().await;

    let declined = power::enter_system_off(wake);
    warn!("Sleep declined: {}", declined);

    if let Err(e) = hx711.power_up() {
        warn!("HX711 power up: {}", e);
    }
    display::unblank();
}

pub async fn scale_task(
    mut scale: Scale,
    mut hx711: LoadCell,
    press_rx: &Receiver<'static, CriticalSectionRawMutex, ButtonEvent, 4>,
    command_rx: &Receiver<'static, CriticalSectionRawMutex, ScaleCommand, 4>,
    persist_tx: &Sender<'static, CriticalSectionRawMutex, PersistRequest, 4>,
    result_rx: &Receiver<'static, CriticalSectionRawMutex, PersistResult, 4>,
) -> ! {
    let mut samples = [0i32; READINGS_TO_AVERAGE];
    let mut sleep_request = DeferredSleep::new();

    publish(&scale);
    SETTINGS_CHANGED.signal(());
    info!(
        "Scale ready: factor {}, {} Hz",
        scale.calibration_factor(),
        scale.sample_rate()
    );

    loop {
        let period = scale.begin_cycle();
        let deadline = Instant::now() + Duration::from_millis(period);

        // A sample read is never cancelled; input waits in the channels.
        let report = match hx711.read_into(&mut samples).await {
            Ok(()) => scale.on_samples(&samples, now_ms()),
            Err(e) => {
                warn!("HX711: {}", e);
                None
            }
        };
        if let Some(report) = report {
            if report.active {
                debug!("Activity: {} g", report.weight.grams);
            }
            log_calibration(report.calibration);
            if let Some(request) = report.persist {
                request_persist(&mut scale, persist_tx, request);
                SETTINGS_CHANGED.signal(());
            }
            WEIGHT.signal(report.weight.grams);
        }

        drain(&mut scale, press_rx, command_rx, persist_tx, result_rx);
        publish(&scale);

        loop {
            let input = select4(
                Timer::at(deadline),
                press_rx.receive(),
                command_rx.receive(),
                result_rx.receive(),
            )
            .await;
            match input {
                Either4::First(()) => break,
                Either4::Second(event) => handle_press(&mut scale, persist_tx, event),
                Either4::Third(command) => handle_command(&mut scale, persist_tx, command),
                Either4::Fourth(done) => scale.persisted(done.origin, done.result),
            }
            publish(&scale);
        }

        let outcome = scale.on_tick(now_ms());
        handle_outcome(&mut scale, persist_tx, outcome);

        if scale.poll_sleep(now_ms(), &mut sleep_request) {
            if let Some(wake) = sleep_request.take() {
                sleep(&mut hx711, wake).await;
            }
        }
        publish(&scale);
    }
}
