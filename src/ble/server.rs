//! Scale GATT service and peripheral connection loop.

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::ble::codec::{decode_write, encode_calibration, encode_weight, WriteTarget};
use crate::config::{BLE_ADV_INTERVAL, SERVICE_UUID_LE};
use crate::error::{BleError, Error};
use crate::sampler::{self, SETTINGS_CHANGED, WEIGHT};
use crate::scale::{ScaleCommand, Snapshot};
use defmt::{debug, info, warn};
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Sender;
use heapless::Vec;
use nrf_softdevice::ble::advertisement_builder::{
    Flag, LegacyAdvertisementBuilder, LegacyAdvertisementPayload, ServiceList,
};
use nrf_softdevice::ble::{gatt_server, peripheral, Connection};
use nrf_softdevice::{raw, Softdevice};

#[nrf_softdevice::gatt_service(uuid = "4fafc201-1fb5-459e-8fcc-c5c9c331914b")]
pub struct ScaleService {
    /// Current weight, f32 LE grams.
    #[characteristic(uuid = "beb5483e-36e1-4688-b7f5-ea07361b26a8", read, notify)]
    weight: [u8; 4],

    /// Any write tares the scale.
    #[characteristic(uuid = "1c95d5e3-d8f7-413a-bf3d-7a2e5d7be87e", write)]
    tare: Vec<u8, 1>,

    /// u8 Hz, clamped to [1, 80].
    #[characteristic(uuid = "a8985fae-51a4-4e28-b0a2-6c1aeede3f3d", read, write)]
    sample_rate: u8,

    /// f32 LE calibration factor.
    #[characteristic(uuid = "d5875408-fa51-4e89-a0f7-3c7e8e8c5e41", read, write)]
    calibration: [u8; 4],

    /// UTF-8 advertised name (up to 20 bytes; longer writes are rejected).
    #[characteristic(uuid = "8a2c5f47-b91e-4d36-a6c8-9f0e7d3b1c28", read, write)]
    device_name: Vec<u8, 32>,

    /// 0 = lbs, 1 = kg.
    #[characteristic(uuid = "8a2c5f48-b91e-4d36-a6c8-9f0e7d3b1c28", read, write)]
    display_unit: u8,
}

#[nrf_softdevice::gatt_server]
pub struct Server {
    pub scale: ScaleService,
}

/// The single central link, if any.
static CONNECTION: Mutex<CriticalSectionRawMutex, RefCell<Option<Connection>>> =
    Mutex::new(RefCell::new(None));

static WEIGHT_SUBSCRIBED: AtomicBool = AtomicBool::new(false);

fn set(result: Result<(), gatt_server::SetValueError>) -> Result<(), Error> {
    result.map_err(|_| Error::Ble(BleError::SetValueFailed))
}

/// Copy every readable value from the snapshot into the attribute table.
///
/// Also used to restore a characteristic after a rejected write; the
/// SoftDevice has already stored the bad value by then.
fn sync_values(server: &Server, snapshot: &Snapshot) -> Result<(), Error> {
    let service = &server.scale;
    set(service.weight_set(&encode_weight(snapshot.weight.grams)))?;
    set(service.sample_rate_set(&snapshot.sample_rate))?;
    set(service.calibration_set(&encode_calibration(snapshot.factor)))?;
    let name = Vec::from_slice(snapshot.name.as_bytes()).map_err(|_| Error::NameTooLong)?;
    set(service.device_name_set(&name))?;
    set(service.display_unit_set(&snapshot.unit.code()))
}

/// Set the GAP device name used in the next advertisement.
fn set_gap_name(name: &str) -> Result<(), Error> {
    let mut mode: raw::ble_gap_conn_sec_mode_t = unsafe { core::mem::zeroed() };
    mode.set_sm(1);
    mode.set_lv(1);
    let ret = unsafe { raw::sd_ble_gap_device_name_set(&mode, name.as_ptr(), name.len() as u16) };
    if ret != raw::NRF_SUCCESS {
        return Err(Error::Ble(BleError::Raw(ret)));
    }
    Ok(())
}

fn handle_write(
    server: &Server,
    target: WriteTarget,
    data: &[u8],
    tx: &Sender<'static, CriticalSectionRawMutex, ScaleCommand, 4>,
) {
    debug!("BLE write {}: {=[u8]:x}", target, data);

    let command = match decode_write(target, data) {
        Ok(command) => command,
        Err(e) => {
            warn!("BLE write {} rejected: {}", target, e);
            restore(server);
            return;
        }
    };

    if tx.try_send(command).is_err() {
        warn!("BLE write {} dropped: command queue full", target);
        restore(server);
    }
}

fn restore(server: &Server) {
    if let Err(e) = sync_values(server, &sampler::snapshot()) {
        warn!("BLE restore failed: {}", e);
    }
}

/// Advertise with the current device name until a central connects.
async fn advertise(sd: &'static Softdevice) -> Result<Connection, Error> {
    let snapshot = sampler::snapshot();
    set_gap_name(&snapshot.name)?;

    let adv_data: LegacyAdvertisementPayload = LegacyAdvertisementBuilder::new()
        .flags(&[Flag::GeneralDiscovery, Flag::LE_Only])
        .services_128(ServiceList::Complete, &[SERVICE_UUID_LE])
        .build();
    let scan_data: LegacyAdvertisementPayload = LegacyAdvertisementBuilder::new()
        .full_name(&snapshot.name)
        .build();

    let config = peripheral::Config {
        interval: BLE_ADV_INTERVAL,
        ..Default::default()
    };
    let adv = peripheral::ConnectableAdvertisement::ScannableUndirected {
        adv_data: &adv_data,
        scan_data: &scan_data,
    };

    info!("BLE: advertising as {}", snapshot.name.as_str());
    peripheral::advertise_connectable(sd, adv, &config)
        .await
        .map_err(|_| Error::Ble(BleError::AdvertiseFailed))
}

/// Advertise, serve one connection, repeat.
pub async fn ble_task(
    sd: &'static Softdevice,
    server: &'static Server,
    tx: &Sender<'static, CriticalSectionRawMutex, ScaleCommand, 4>,
) -> ! {
    loop {
        let conn = match advertise(sd).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("BLE: {}", e);
                embassy_time::Timer::after_secs(1).await;
                continue;
            }
        };

        info!("BLE: connected");
        CONNECTION.lock(|c| *c.borrow_mut() = Some(conn.clone()));

        let reason = gatt_server::run(&conn, server, |event| match event {
            ServerEvent::Scale(e) => match e {
                ScaleServiceEvent::WeightCccdWrite { notifications } => {
                    info!("BLE: weight notifications {}", notifications);
                    WEIGHT_SUBSCRIBED.store(notifications, Ordering::Relaxed);
                }
                ScaleServiceEvent::TareWrite(data) => {
                    handle_write(server, WriteTarget::Tare, &data, tx)
                }
                ScaleServiceEvent::SampleRateWrite(hz) => {
                    handle_write(server, WriteTarget::SampleRate, &[hz], tx)
                }
                ScaleServiceEvent::CalibrationWrite(bytes) => {
                    handle_write(server, WriteTarget::Calibration, &bytes, tx)
                }
                ScaleServiceEvent::DeviceNameWrite(name) => {
                    handle_write(server, WriteTarget::DeviceName, &name, tx)
                }
                ScaleServiceEvent::DisplayUnitWrite(code) => {
                    handle_write(server, WriteTarget::DisplayUnit, &[code], tx)
                }
            },
        })
        .await;

        CONNECTION.lock(|c| *c.borrow_mut() = None);
        WEIGHT_SUBSCRIBED.store(false, Ordering::Relaxed);
        info!("BLE: disconnected: {:?}", defmt::Debug2Format(&reason));
    }
}

/// Keep the attribute table in step with the scale task and push weight
/// notifications, once per sampling cycle, while subscribed.
pub async fn mirror_task(server: &'static Server) -> ! {
    loop {
        match select(WEIGHT.wait(), SETTINGS_CHANGED.wait()).await {
            Either::First(grams) => {
                let value = encode_weight(grams);
                if let Err(e) = set(server.scale.weight_set(&value)) {
                    warn!("BLE: {}", e);
                }
                if !WEIGHT_SUBSCRIBED.load(Ordering::Relaxed) {
                    continue;
                }
                let conn = CONNECTION.lock(|c| c.borrow().clone());
                if let Some(conn) = conn {
                    // Fire and forget; a full TX queue just drops this sample.
                    if server.scale.weight_notify(&conn, &value).is_err() {
                        debug!("BLE: {}", Error::Ble(BleError::NotifyFailed));
                    }
                }
            }
            Either::Second(()) => {
                if let Err(e) = sync_values(server, &sampler::snapshot()) {
                    warn!("BLE: {}", e);
                }
            }
        }
    }
}
