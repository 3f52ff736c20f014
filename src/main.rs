//! openscale firmware entry point.
//!
//! Boot order:
//!   1. embassy-nrf init (interrupt priorities kept clear of the SoftDevice)
//!   2. SoftDevice enable + GATT server registration
//!   3. settings loaded from flash (per-key fallback to factory defaults)
//!   4. tasks spawned: scale, button, display, storage, BLE, BLE mirror
//!
//! All mutable scale state lives in the scale task; everything else talks
//! to it through the channels below.

#![no_std]
#![no_main]

mod ble;
mod calibration;
mod config;
mod error;
mod hx711;
mod power;
mod power_logic;
mod sampler;
mod scale;
mod settings;
mod storage;
mod ui;

use core::mem;

use ble::server::Server;
use config::{DEFAULT_DEVICE_NAME, MAX_DEVICE_NAME_LENGTH};
use defmt::{info, unwrap};
use embassy_executor::Spawner;
use embassy_nrf::gpio::{Input, Level, Output, OutputDrive, Pull};
use embassy_nrf::interrupt::{self, InterruptExt, Priority};
use embassy_nrf::twim::{self, Twim};
use embassy_nrf::{bind_interrupts, peripherals};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use hx711::Hx711;
use nrf_softdevice::{raw, Flash, Softdevice};
use sampler::{CycleDelay, LoadCell};
use scale::{PersistRequest, Scale, ScaleCommand};
use settings::SettingsStore;
use static_cell::StaticCell;
use storage::{FlashStore, PersistResult};
use ui::display::{self, Display};
use ui::press::ButtonEvent;
use {defmt_rtt as _, panic_probe as _};

bind_interrupts!(struct Irqs {
    TWISPI0 => twim::InterruptHandler<peripherals::TWISPI0>;
});

// ═══════════════════════════════════════════════════════════════════════════
// Inter-task channels
// ═══════════════════════════════════════════════════════════════════════════

/// Button task -> scale task.
static PRESS_CHANNEL: Channel<CriticalSectionRawMutex, ButtonEvent, 4> = Channel::new();
/// BLE write callback -> scale task (validated commands only).
static COMMAND_CHANNEL: Channel<CriticalSectionRawMutex, ScaleCommand, 4> = Channel::new();
/// Scale task -> storage task.
static PERSIST_CHANNEL: Channel<CriticalSectionRawMutex, PersistRequest, 4> = Channel::new();
/// Storage task -> scale task.
static RESULT_CHANNEL: Channel<CriticalSectionRawMutex, PersistResult, 4> = Channel::new();

static SERVER: StaticCell<Server> = StaticCell::new();

// ═══════════════════════════════════════════════════════════════════════════
// Tasks
// ═══════════════════════════════════════════════════════════════════════════

#[embassy_executor::task]
async fn softdevice_task(sd: &'static Softdevice) -> ! {
    sd.run().await
}

#[embassy_executor::task]
async fn scale_task(scale: Scale, hx711: LoadCell) -> ! {
    let press_rx = PRESS_CHANNEL.receiver();
    let command_rx = COMMAND_CHANNEL.receiver();
    let persist_tx = PERSIST_CHANNEL.sender();
    let result_rx = RESULT_CHANNEL.receiver();
    sampler::scale_task(scale, hx711, &press_rx, &command_rx, &persist_tx, &result_rx).await
}

#[embassy_executor::task]
async fn button_task(btn: Input<'static>) -> ! {
    let tx = PRESS_CHANNEL.sender();
    ui::buttons::button_task(btn, &tx).await
}

#[embassy_executor::task]
async fn display_task(display: Display<Twim<'static, peripherals::TWISPI0>>) -> ! {
    display::display_task(display).await
}

#[embassy_executor::task]
async fn storage_task(settings: SettingsStore<FlashStore<Flash>>) -> ! {
    let rx = PERSIST_CHANNEL.receiver();
    let tx = RESULT_CHANNEL.sender();
    storage::storage_task(settings, &rx, &tx).await
}

#[embassy_executor::task]
async fn ble_task(sd: &'static Softdevice, server: &'static Server) -> ! {
    let tx = COMMAND_CHANNEL.sender();
    ble::server::ble_task(sd, server, &tx).await
}

#[embassy_executor::task]
async fn mirror_task(server: &'static Server) -> ! {
    ble::server::mirror_task(server).await
}

fn softdevice_config() -> nrf_softdevice::Config {
    nrf_softdevice::Config {
        clock: Some(raw::nrf_clock_lf_cfg_t {
            source: raw::NRF_CLOCK_LF_SRC_XTAL as u8,
            rc_ctiv: 0,
            rc_temp_ctiv: 0,
            accuracy: raw::NRF_CLOCK_LF_ACCURACY_20_PPM as u8,
        }),
        conn_gap: Some(raw::ble_gap_conn_cfg_t {
            conn_count: 1,
            event_length: 24,
        }),
        conn_gatt: Some(raw::ble_gatt_conn_cfg_t { att_mtu: 128 }),
        gatts_attr_tab_size: Some(raw::ble_gatts_cfg_attr_tab_size_t {
            attr_tab_size: raw::BLE_GATTS_ATTR_TAB_SIZE_DEFAULT,
        }),
        gap_role_count: Some(raw::ble_gap_cfg_role_count_t {
            adv_set_count: 1,
            periph_role_count: 1,
            central_role_count: 0,
            central_sec_count: 0,
            _bitfield_1: raw::ble_gap_cfg_role_count_t::new_bitfield_1(0),
        }),
        gap_device_name: Some(raw::ble_gap_cfg_device_name_t {
            p_value: DEFAULT_DEVICE_NAME.as_ptr() as _,
            current_len: DEFAULT_DEVICE_NAME.len() as u16,
            max_len: MAX_DEVICE_NAME_LENGTH as u16,
            write_perm: unsafe { mem::zeroed() },
            _bitfield_1: raw::ble_gap_cfg_device_name_t::new_bitfield_1(
                raw::BLE_GATTS_VLOC_STACK as u8,
            ),
        }),
        ..Default::default()
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("openscale starting");

    // The SoftDevice reserves priorities 0, 1 and 4.
    let mut config = embassy_nrf::config::Config::default();
    config.gpiote_interrupt_priority = Priority::P2;
    config.time_interrupt_priority = Priority::P2;
    let p = embassy_nrf::init(config);
    interrupt::TWISPI0.set_priority(Priority::P3);

    let sd = Softdevice::enable(&softdevice_config());
    let server: &'static Server = SERVER.init(unwrap!(Server::new(sd)));
    unwrap!(spawner.spawn(softdevice_task(sd)));

    // Settings must be loaded before the scale exists.
    let mut settings = SettingsStore::new(FlashStore::new(Flash::take(sd)));
    let device_config = settings.load().await;
    info!(
        "Settings: name {}, unit {}, factor {}",
        device_config.name.as_str(),
        device_config.unit,
        device_config.calibration
    );

    let scale = unwrap!(Scale::new(device_config, sampler::now_ms()));
    let hx711 = unwrap!(Hx711::new(
        Output::new(p.P0_04, Level::Low, OutputDrive::Standard),
        Input::new(p.P0_03, Pull::None),
        CycleDelay,
    ));
    let button = Input::new(p.P0_11, Pull::Up);
    let i2c = Twim::new(p.TWISPI0, Irqs, p.P0_26, p.P0_27, twim::Config::default());
    let display = display::init(i2c);

    unwrap!(spawner.spawn(storage_task(settings)));
    unwrap!(spawner.spawn(scale_task(scale, hx711)));
    unwrap!(spawner.spawn(button_task(button)));
    unwrap!(spawner.spawn(display_task(display)));
    unwrap!(spawner.spawn(ble_task(sd, server)));
    unwrap!(spawner.spawn(mirror_task(server)));

    info!("All tasks started");
}
