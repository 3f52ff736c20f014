//! Persistent settings on the nRF52840's internal flash.
//!
//! Uses the `sequential-storage` map over the pages reserved in `memory.x`.
//! The settings keys are mapped onto one-byte map keys:
//!   - `device_name`  -> 0x01
//!   - `display_unit` -> 0x02
//!   - `calibration`  -> 0x03
//!
//! `sequential-storage` handles wear levelling and GC; a write is either
//! fully stored or not visible at all.

use core::ops::Range;

use crate::config::{
    KEY_CALIBRATION, KEY_DEVICE_NAME, KEY_DISPLAY_UNIT, STORAGE_FLASH_PAGE_COUNT,
    STORAGE_FLASH_PAGE_START,
};
use crate::error::{Error, StoreError};
use crate::scale::{Persist, PersistOrigin, PersistRequest};
use crate::settings::{KeyValueStore, SettingsStore};
use defmt::{debug, error, info};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Receiver, Sender};
use embedded_storage_async::nor_flash::NorFlash;
use sequential_storage::cache::NoCache;
use sequential_storage::map::{fetch_item, store_item};

/// Flash page size for nRF52840 (4 KB).
const FLASH_PAGE_SIZE: u32 = 4096;

/// Start address of our storage region.
const STORAGE_START: u32 = STORAGE_FLASH_PAGE_START * FLASH_PAGE_SIZE;

/// End address (exclusive) of our storage region.
const STORAGE_END: u32 = (STORAGE_FLASH_PAGE_START + STORAGE_FLASH_PAGE_COUNT) * FLASH_PAGE_SIZE;

/// Scratch buffer for one item: key byte + largest value (20-byte name)
/// + item header, rounded up to the flash word size.
const ITEM_BUFFER_SIZE: usize = 64;

const FLASH_RANGE: Range<u32> = STORAGE_START..STORAGE_END;

fn map_key(key: &str) -> Option<u8> {
    match key {
        KEY_DEVICE_NAME => Some(0x01),
        KEY_DISPLAY_UNIT => Some(0x02),
        KEY_CALIBRATION => Some(0x03),
        _ => None,
    }
}

/// [`KeyValueStore`] backed by a `sequential-storage` map.
pub struct FlashStore<F> {
    flash: F,
}

impl<F: NorFlash> FlashStore<F> {
    pub fn new(flash: F) -> Self {
        Self { flash }
    }
}

impl<F: NorFlash> KeyValueStore for FlashStore<F> {
    async fn get(&mut self, key: &str, buf: &mut [u8]) -> Result<Option<usize>, StoreError> {
        let id = map_key(key).ok_or(StoreError::UnknownKey)?;
        let mut scratch = [0u8; ITEM_BUFFER_SIZE];

        match fetch_item::<u8, &[u8], _>(
            &mut self.flash,
            FLASH_RANGE,
            &mut NoCache::new(),
            &mut scratch,
            &id,
        )
        .await
        {
            Ok(Some(data)) => {
                let dst = buf
                    .get_mut(..data.len())
                    .ok_or(StoreError::BufferOverflow)?;
                dst.copy_from_slice(data);
                debug!("Flash: read {} ({} bytes)", key, data.len());
                Ok(Some(data.len()))
            }
            Ok(None) => {
                debug!("Flash: {} not stored", key);
                Ok(None)
            }
            Err(e) => {
                error!("Flash read error: {:?}", defmt::Debug2Format(&e));
                Err(StoreError::Read)
            }
        }
    }

    async fn set(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let id = map_key(key).ok_or(StoreError::UnknownKey)?;
        let mut scratch = [0u8; ITEM_BUFFER_SIZE];

        store_item::<u8, &[u8], _>(
            &mut self.flash,
            FLASH_RANGE,
            &mut NoCache::new(),
            &mut scratch,
            &id,
            &value,
        )
        .await
        .map_err(|e| {
            error!("Flash write error: {:?}", defmt::Debug2Format(&e));
            StoreError::Write
        })
    }
}

/// Completion report for one [`PersistRequest`].
#[derive(Clone, Copy, defmt::Format)]
pub struct PersistResult {
    pub origin: PersistOrigin,
    pub result: Result<(), Error>,
}

/// Write one setting through the adapter (validated again before writing).
pub async fn persist<S: KeyValueStore>(
    settings: &mut SettingsStore<S>,
    item: &Persist,
) -> Result<(), Error> {
    match item {
        Persist::Calibration(factor) => settings.save_calibration(*factor).await,
        Persist::Name(name) => settings.save_name(name).await,
        Persist::Unit(unit) => settings.save_unit(*unit).await,
    }
}

/// Serve persist requests from the scale task, one at a time.
///
/// Flash operations on the SoftDevice are asynchronous and never run in
/// interrupt context.
pub async fn storage_task<F: NorFlash>(
    mut settings: SettingsStore<FlashStore<F>>,
    rx: &Receiver<'static, CriticalSectionRawMutex, PersistRequest, 4>,
    tx: &Sender<'static, CriticalSectionRawMutex, PersistResult, 4>,
) -> ! {
    loop {
        let request = rx.receive().await;
        let result = persist(&mut settings, &request.item).await;

        match result {
            Ok(()) => info!("Saved {} to flash", request.item),
            Err(e) => error!("Failed to save {}: {}", request.item, e),
        }

        tx.send(PersistResult {
            origin: request.origin,
            result,
        })
        .await;
    }
}
