//! Persistent bond store for the wearable (C2).
//!
//! Uses the nRF52840's internal flash via the `sequential-storage` crate
//! to durably remember the single BLE address this dongle is allowed to
//! treat as `Wearable`. Only one bond is kept at a time: a fresh
//! `store()` replaces whatever was there before.
//!
//! Storage layout: a single key-value record (`KEY_BOND`) holding the
//! serialized `BondRecord`. `sequential-storage` handles wear levelling
//! and garbage collection across the reserved flash pages.

use crate::config::{STORAGE_FLASH_PAGE_COUNT, STORAGE_FLASH_PAGE_START};
use defmt::{debug, error, info};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use nrf_softdevice::ble::Address;

const FLASH_PAGE_SIZE: u32 = 4096;
const STORAGE_START: u32 = STORAGE_FLASH_PAGE_START * FLASH_PAGE_SIZE;
const STORAGE_END: u32 = (STORAGE_FLASH_PAGE_START + STORAGE_FLASH_PAGE_COUNT) * FLASH_PAGE_SIZE;

/// Key for the single bond record in the map storage.
const KEY_BOND: u8 = 0x01;

/// Serialized bond record: 6 address bytes + 1 address-type byte.
const RECORD_SIZE: usize = 7;

/// `{address}` - the one wearable this dongle is bonded to (spec.md §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BondRecord {
    pub address: Address,
}

impl BondRecord {
    fn serialize(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[0..6].copy_from_slice(&self.address.bytes());
        buf[6] = address_type_tag(&self.address);
        buf
    }

    fn deserialize(data: &[u8]) -> Option<Self> {
        if data.len() < RECORD_SIZE {
            return None;
        }
        let mut addr_bytes = [0u8; 6];
        addr_bytes.copy_from_slice(&data[0..6]);
        let addr_type = address_type_from_tag(data[6]);
        Some(Self {
            address: Address::new(addr_type, addr_bytes),
        })
    }
}

fn address_type_tag(addr: &Address) -> u8 {
    match addr.address_type() {
        nrf_softdevice::ble::AddressType::Public => 0,
        nrf_softdevice::ble::AddressType::RandomStatic => 1,
        nrf_softdevice::ble::AddressType::RandomPrivateResolvable => 2,
        nrf_softdevice::ble::AddressType::RandomPrivateNonResolvable => 3,
        nrf_softdevice::ble::AddressType::Anonymous => 4,
    }
}

fn address_type_from_tag(tag: u8) -> nrf_softdevice::ble::AddressType {
    match tag {
        0 => nrf_softdevice::ble::AddressType::Public,
        1 => nrf_softdevice::ble::AddressType::RandomStatic,
        2 => nrf_softdevice::ble::AddressType::RandomPrivateResolvable,
        3 => nrf_softdevice::ble::AddressType::RandomPrivateNonResolvable,
        _ => nrf_softdevice::ble::AddressType::RandomStatic,
    }
}

/// In-memory cache of the bond record, synced with flash.
pub struct BondStore {
    bond: Option<BondRecord>,
    dirty: bool,
}

impl BondStore {
    pub const fn new() -> Self {
        Self {
            bond: None,
            dirty: false,
        }
    }

    /// Load the bond record from flash. Called once at boot.
    pub async fn load_from_flash(&mut self, flash: &mut impl embedded_storage_async::nor_flash::NorFlash) {
        let flash_range = STORAGE_START..STORAGE_END;
        let mut buf = [0u8; 32];

        match sequential_storage::map::fetch_item::<u8, &[u8], _>(
            flash,
            flash_range,
            &mut sequential_storage::cache::NoCache::new(),
            &mut buf,
            &KEY_BOND,
        )
        .await
        {
            Ok(Some(data)) => {
                self.bond = BondRecord::deserialize(data);
                info!("Bond store: loaded bond = {}", self.bond.is_some());
            }
            Ok(None) => {
                info!("Bond store: no bond in flash");
                self.bond = None;
            }
            Err(e) => {
                error!("Bond store: flash read error: {:?}", defmt::Debug2Format(&e));
                self.bond = None;
            }
        }
        self.dirty = false;
    }

    /// Persist the current bond record (or its absence) to flash.
    /// Writes are atomic via `sequential-storage`: either the new
    /// record is fully durable or the previous state is preserved.
    pub async fn save_to_flash(&mut self, flash: &mut impl embedded_storage_async::nor_flash::NorFlash) {
        if !self.dirty {
            debug!("Bond store: no changes to save");
            return;
        }

        let flash_range = STORAGE_START..STORAGE_END;
        let mut buf = [0u8; 32];

        let result = match self.bond {
            Some(record) => {
                let data = record.serialize();
                sequential_storage::map::store_item::<u8, &[u8], _>(
                    flash,
                    flash_range,
                    &mut sequential_storage::cache::NoCache::new(),
                    &mut buf,
                    &KEY_BOND,
                    &data.as_slice(),
                )
                .await
            }
            None => {
                sequential_storage::map::remove_item::<u8, _>(
                    flash,
                    flash_range,
                    &mut sequential_storage::cache::NoCache::new(),
                    &mut buf,
                    &KEY_BOND,
                )
                .await
            }
        };

        match result {
            Ok(_) => {
                info!("Bond store: saved (present={})", self.bond.is_some());
                self.dirty = false;
            }
            Err(e) => error!("Bond store: flash write error: {:?}", defmt::Debug2Format(&e)),
        }
    }

    /// `has()` - is a bond currently recorded?
    pub fn has(&self) -> bool {
        self.bond.is_some()
    }

    /// `get()` - the bonded address, if any.
    pub fn get(&self) -> Option<Address> {
        self.bond.map(|b| b.address)
    }

    /// `store(addr)` - replace the bond with a new address.
    pub fn store(&mut self, address: Address) {
        self.bond = Some(BondRecord { address });
        self.dirty = true;
    }

    /// `clear()` - forget the bond. Callers are responsible for
    /// unpairing any live link bearing the stored address (spec.md
    /// §4.2); this only updates the persisted record.
    pub fn clear(&mut self) {
        if self.bond.is_some() {
            self.bond = None;
            self.dirty = true;
        }
    }

    /// True if `address` matches the stored bond (spec.md §3 invariant:
    /// only a device matching this address may become a `Wearable`).
    pub fn matches(&self, address: &Address) -> bool {
        self.bond.map(|b| &b.address == address).unwrap_or(false)
    }
}

/// Global bond store (protected by mutex for async access).
pub static BOND_STORE: Mutex<CriticalSectionRawMutex, BondStore> = Mutex::new(BondStore::new());
