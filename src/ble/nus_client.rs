//! NUS client table (C5): one Nordic UART Service GATT client per
//! active link (spec.md §4.5). Grounded in the teacher's
//! `#[nrf_softdevice::gatt_client]` pattern from `hid_client.rs`; the
//! "table of N clients with a serialized discovery queue" shape has
//! no teacher counterpart, since the teacher only ever talks to one
//! HID service at a time, so it is built fresh in the teacher's idiom.

use crate::ble::registry::LinkHandle;
use crate::config::MAX_LINKS;
use crate::error::{BleError, Error};
use defmt::{info, warn};
use heapless::{Deque, Vec};
use nrf_softdevice::ble::{gatt_client, Connection};

/// Nordic UART Service: RX (write, app→peripheral) and TX (notify,
/// peripheral→app) characteristics. NUS is a de-facto serial port, so
/// both are variable-length (`Vec`, not a fixed-size array) up to the
/// 244-byte write-without-response budget.
#[nrf_softdevice::gatt_client(uuid = "6e400001-b5a3-f393-e0a9-e50e24dcca9e")]
pub struct NusServiceClient {
    #[characteristic(uuid = "6e400002-b5a3-f393-e0a9-e50e24dcca9e", write)]
    pub rx: Vec<u8, 244>,

    #[characteristic(uuid = "6e400003-b5a3-f393-e0a9-e50e24dcca9e", notify)]
    pub tx: Vec<u8, 244>,
}

struct Entry {
    handle: LinkHandle,
    client: Option<NusServiceClient>,
    discovered: bool,
    mtu: u16,
}

/// `{handle → nusClient, discovered, mtu}` (spec.md §4.5), with a
/// FIFO of handles awaiting discovery because the underlying
/// discovery manager is single-threaded and must run one at a time.
pub struct NusClientTable {
    entries: Vec<Entry, MAX_LINKS>,
    discovery_queue: Deque<LinkHandle, MAX_LINKS>,
    discovery_in_flight: bool,
}

impl NusClientTable {
    pub const fn new() -> Self {
        Self { entries: Vec::new(), discovery_queue: Deque::new(), discovery_in_flight: false }
    }

    /// `add(handle)` - register a new link, queuing it for discovery.
    pub fn add(&mut self, handle: LinkHandle) -> Result<(), Error> {
        if self.entries.iter().any(|e| e.handle == handle) {
            return Ok(());
        }
        self.entries
            .push(Entry { handle, client: None, discovered: false, mtu: 23 })
            .map_err(|_| Error::Capacity)?;
        let _ = self.discovery_queue.push_back(handle);
        Ok(())
    }

    /// `remove(handle)` - drop the entry and any queued discovery.
    pub fn remove(&mut self, handle: LinkHandle) {
        if let Some(pos) = self.entries.iter().position(|e| e.handle == handle) {
            self.entries.remove(pos);
        }
        let mut kept: Deque<LinkHandle, MAX_LINKS> = Deque::new();
        while let Some(h) = self.discovery_queue.pop_front() {
            if h != handle {
                let _ = kept.push_back(h);
            }
        }
        self.discovery_queue = kept;
    }

    /// Whether `handle`'s discovery should start now: it must be at
    /// the front of the FIFO and no other discovery may be running.
    pub fn should_discover_now(&self, handle: LinkHandle) -> bool {
        !self.discovery_in_flight && self.discovery_queue.front() == Some(&handle)
    }

    /// `discover(handle)` - run GATT discovery on `handle`'s
    /// connection. The caller must have checked `should_discover_now`
    /// first; this always advances the FIFO on completion, success or
    /// not, so a hung service-not-found case can't wedge the queue.
    pub async fn discover(&mut self, handle: LinkHandle, conn: &Connection) -> Result<(), Error> {
        self.discovery_in_flight = true;
        let result = gatt_client::discover::<NusServiceClient>(conn).await;
        self.discovery_in_flight = false;
        let _ = self.discovery_queue.pop_front();

        match result {
            Ok(client) => {
                if let Some(entry) = self.entries.iter_mut().find(|e| e.handle == handle) {
                    entry.client = Some(client);
                    entry.discovered = true;
                }
                if let Some(entry) = self.entries.iter().find(|e| e.handle == handle) {
                    if let Some(c) = &entry.client {
                        if c.tx_cccd_write(true).await.is_err() {
                            warn!("NUS TX notify subscribe failed on handle {}", handle);
                        }
                    }
                }
                info!("NUS discovered on handle {}", handle);
                Ok(())
            }
            Err(_) => {
                warn!("NUS discovery failed on handle {}", handle);
                Err(Error::Ble(BleError::DiscoveryFailed))
            }
        }
    }

    pub fn on_mtu(&mut self, handle: LinkHandle, mtu: u16) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.handle == handle) {
            entry.mtu = mtu;
        }
    }

    pub fn is_discovered(&self, handle: LinkHandle) -> bool {
        self.entries.iter().any(|e| e.handle == handle && e.discovered)
    }

    /// `send(handle, bytes)` - `NotReady` until discovery+CCCD
    /// completed; `NotConnected` for an unknown handle; `Capacity` if
    /// `bytes` exceeds the negotiated MTU's write-without-response
    /// payload budget.
    pub async fn send(&self, handle: LinkHandle, conn: &Connection, bytes: &[u8]) -> Result<(), Error> {
        let entry = self.entries.iter().find(|e| e.handle == handle).ok_or(Error::NotConnected)?;
        if !entry.discovered {
            return Err(Error::NotReady);
        }
        let client = entry.client.as_ref().ok_or(Error::NotReady)?;
        let max_payload = (entry.mtu as usize).saturating_sub(3).max(20);
        if bytes.len() > max_payload {
            return Err(Error::Capacity);
        }
        let value: Vec<u8, 244> = Vec::from_slice(bytes).map_err(|_| Error::Capacity)?;
        client.rx_write(&value).await.map_err(|_| Error::Congestion)?;
        let _ = conn;
        Ok(())
    }
}

impl Default for NusClientTable {
    fn default() -> Self {
        Self::new()
    }
}
