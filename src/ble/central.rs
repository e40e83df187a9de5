//! Central controller (C4): decides whom to connect, drives each link
//! from raw connect to app-ready, and runs the dual-arm glasses FSM
//! (spec.md §4.4). Replaces the teacher's `multi_conn.rs`, which
//! managed up to `MAX_CONNECTIONS` same-shaped peripherals; here the
//! three link kinds (wearable, glasses left, glasses right) follow
//! distinct readiness paths and the glasses pair must be serialised.

use crate::ble::classifier::DeviceKind;
use crate::ble::registry::{LinkHandle, LinkRecord, Registry};
use crate::ble::scanner::{self, ScanHit, ScanMode};
use crate::config::{
    BLE_CONN_INTERVAL_MAX, BLE_CONN_INTERVAL_MIN, BLE_SLAVE_LATENCY, BLE_SUP_TIMEOUT, CONNECT_ATTEMPT_COOLDOWN_MS,
    DUAL_ARM_FSM_CEILING_SECS, SCAN_STOP_SETTLE_MS,
};
use crate::error::{BleError, Error};
use crate::storage::BOND_STORE;
use core::cell::RefCell;
use defmt::{info, warn, Format};
use embassy_time::{Duration, Instant, Timer};
use heapless::Vec;
use nrf_softdevice::ble::gatt_client::DiscoverError;
use nrf_softdevice::ble::security::{IoCapabilities, SecurityHandler};
use nrf_softdevice::ble::{central, gatt_client, Connection, EncryptError, MasterId, SecurityMode};
use nrf_softdevice::Softdevice;

/// Per-connection state machine applied to every successful connect
/// (spec.md §4.4 "per-link sub-machine").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum LinkState {
    Connected,
    ParamUpdateReq,
    SecurityElev,
    ServiceDiscovery,
    MtuExchange,
    ReadyForApp,
    Teardown,
}

/// Dual-arm glasses adoption FSM (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum DualArmState {
    Idle,
    ConnectingLeft,
    LeftConnected,
    LeftDiscovering,
    LeftMtuExchanging,
    LeftReady,
    ConnectingRight,
    RightConnected,
    RightDiscovering,
    RightMtuExchanging,
    BothReady,
}

/// Drives the dual-arm FSM's bookkeeping: cached hits waiting for
/// their complementary arm, handles pending for the arm currently
/// being brought up, and the cooldown/ceiling timers from the edge
/// case policies.
pub struct DualArmController {
    state: DualArmState,
    cached_left: Option<ScanHit>,
    cached_right: Option<ScanHit>,
    pending_handle: Option<LinkHandle>,
    fsm_started_at: Option<Instant>,
    last_attempt_at: Option<Instant>,
}

impl DualArmController {
    pub const fn new() -> Self {
        Self {
            state: DualArmState::Idle,
            cached_left: None,
            cached_right: None,
            pending_handle: None,
            fsm_started_at: None,
            last_attempt_at: None,
        }
    }

    pub fn state(&self) -> DualArmState {
        self.state
    }

    /// Cache a glasses advertisement (spec.md §4.4 step 1). Duplicate
    /// adverts for an arm already cached or already connected are
    /// dropped silently.
    pub fn note_scan_hit(&mut self, hit: ScanHit, registry: &Registry) {
        match hit.kind {
            DeviceKind::GlassesLeft => {
                if registry.has_kind(DeviceKind::GlassesLeft) || self.cached_left.is_some() {
                    return;
                }
                self.cached_left = Some(hit);
            }
            DeviceKind::GlassesRight => {
                if registry.has_kind(DeviceKind::GlassesRight) || self.cached_right.is_some() {
                    return;
                }
                self.cached_right = Some(hit);
            }
            _ => return,
        }
        if self.state == DualArmState::Idle && (self.cached_left.is_some() || self.cached_right.is_some()) {
            self.fsm_started_at = Some(now());
        }
    }

    /// Whether the cooldown from the last connect attempt has elapsed
    /// (spec.md §4.4 edge-case policy: ≥2 s between attempts).
    fn cooldown_elapsed(&self) -> bool {
        match self.last_attempt_at {
            None => true,
            Some(t) => now().duration_since(t) >= Duration::from_millis(CONNECT_ATTEMPT_COOLDOWN_MS),
        }
    }

    /// Whether the whole adoption process has run past its ceiling
    /// and should be abandoned (spec.md §4.4 edge-case policy).
    fn past_ceiling(&self) -> bool {
        match self.fsm_started_at {
            None => false,
            Some(t) => now().duration_since(t) >= Duration::from_secs(DUAL_ARM_FSM_CEILING_SECS),
        }
    }

    /// Reset to `Idle` on disconnect of a pending arm, or on ceiling
    /// breach; caches are invalidated and scanning resumes.
    pub fn reset(&mut self) {
        self.state = DualArmState::Idle;
        self.cached_left = None;
        self.cached_right = None;
        self.pending_handle = None;
        self.fsm_started_at = None;
    }

    /// Which arm (if any) is ready to connect next, honouring
    /// serialisation (left must finish before right starts) and the
    /// attempt cooldown.
    pub fn next_connect_target(&mut self) -> Option<ScanHit> {
        if self.past_ceiling() {
            self.reset();
            return None;
        }
        if !self.cooldown_elapsed() {
            return None;
        }
        match self.state {
            DualArmState::Idle => {
                if let Some(hit) = self.cached_left.clone() {
                    self.state = DualArmState::ConnectingLeft;
                    self.last_attempt_at = Some(now());
                    Some(hit)
                } else {
                    None
                }
            }
            DualArmState::LeftReady => {
                if let Some(hit) = self.cached_right.clone() {
                    self.state = DualArmState::ConnectingRight;
                    self.last_attempt_at = Some(now());
                    Some(hit)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    pub fn on_connected(&mut self, handle: LinkHandle) {
        self.pending_handle = Some(handle);
        self.state = match self.state {
            DualArmState::ConnectingLeft => DualArmState::LeftConnected,
            DualArmState::ConnectingRight => DualArmState::RightConnected,
            other => other,
        };
    }

    pub fn on_discovered(&mut self, handle: LinkHandle) {
        if self.pending_handle != Some(handle) {
            return;
        }
        self.state = match self.state {
            DualArmState::LeftConnected => DualArmState::LeftDiscovering,
            DualArmState::RightConnected => DualArmState::RightDiscovering,
            other => other,
        };
    }

    pub fn on_mtu_exchanged(&mut self, handle: LinkHandle) {
        if self.pending_handle != Some(handle) {
            return;
        }
        self.state = match self.state {
            DualArmState::LeftDiscovering => DualArmState::LeftMtuExchanging,
            DualArmState::RightDiscovering => DualArmState::RightMtuExchanging,
            other => other,
        };
    }

    /// Mark the arm currently pending as fully ready for the glasses
    /// engine. Left transitions to `LeftReady` (the right arm can then
    /// be attempted); right transitions to `BothReady`.
    pub fn on_ready(&mut self, handle: LinkHandle) -> Option<DualArmState> {
        if self.pending_handle != Some(handle) {
            return None;
        }
        match self.state {
            DualArmState::LeftMtuExchanging => {
                self.state = DualArmState::LeftReady;
                self.cached_left = None;
                self.pending_handle = None;
                Some(self.state)
            }
            DualArmState::RightMtuExchanging => {
                self.state = DualArmState::BothReady;
                self.cached_right = None;
                self.pending_handle = None;
                self.fsm_started_at = None;
                Some(self.state)
            }
            other => Some(other),
        }
    }

    /// Whether `handle` is the arm this FSM is currently bringing up
    /// (spec.md §4.4 step 5: disconnect of a pending arm resets the
    /// whole FSM).
    pub fn is_pending(&self, handle: LinkHandle) -> bool {
        self.pending_handle == Some(handle)
    }
}

impl Default for DualArmController {
    fn default() -> Self {
        Self::new()
    }
}

fn now() -> Instant {
    Instant::now()
}

/// Bonding policy: exactly one bonded peer is remembered (the
/// wearable, spec.md §3), persisted via `storage::BOND_STORE`.
/// Generalises the teacher's `Bonder` (which kept a ring of peers in
/// a `RefCell<Vec<PeerBond, N>>`) down to a single slot.
pub struct Bonder {
    peer: RefCell<Option<(MasterId, nrf_softdevice::ble::EncryptionInfo, nrf_softdevice::ble::IdentityKey)>>,
}

impl Bonder {
    pub fn new() -> Self {
        Self { peer: RefCell::new(None) }
    }
}

impl Default for Bonder {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityHandler for Bonder {
    fn io_capabilities(&self) -> IoCapabilities {
        IoCapabilities::None
    }

    fn can_bond(&self, _conn: &Connection) -> bool {
        true
    }

    fn on_bonded(
        &self,
        _conn: &Connection,
        master_id: MasterId,
        key: nrf_softdevice::ble::EncryptionInfo,
        peer_id: nrf_softdevice::ble::IdentityKey,
    ) {
        info!("BLE bonded, storing single-slot key");
        self.peer.borrow_mut().replace((master_id, key, peer_id));
    }

    fn get_key(&self, _conn: &Connection, master_id: MasterId) -> Option<nrf_softdevice::ble::EncryptionInfo> {
        self.peer.borrow().as_ref().and_then(|(id, key, _)| if *id == master_id { Some(*key) } else { None })
    }

    fn get_peripheral_key(
        &self,
        conn: &Connection,
    ) -> Option<(MasterId, nrf_softdevice::ble::EncryptionInfo)> {
        self.peer.borrow().as_ref().and_then(|(id, key, peer_id)| {
            peer_id.is_match(conn.peer_address()).then_some((*id, *key))
        })
    }

    fn on_security_update(&self, _conn: &Connection, security_mode: SecurityMode) {
        info!("security level updated: {:?}", defmt::Debug2Format(&security_mode));
    }
}

/// Poll `conn.security_mode()` until it reaches at least
/// `JustWorks`/encrypted, or time out. Mirrors the teacher's
/// `wait_for_secure_link` poll loop.
async fn wait_for_secure_link(conn: &Connection) -> Result<(), Error> {
    for _ in 0..25 {
        if !matches!(conn.security_mode(), SecurityMode::NoAccess | SecurityMode::Open) {
            return Ok(());
        }
        Timer::after(Duration::from_millis(200)).await;
    }
    Err(Error::Ble(BleError::SecurityFailed))
}

/// Connect to `hit.address`, elevate security, and return the raw
/// connection plus its assigned handle. Caller runs per-client
/// discovery (NUS/HID/BAS) afterwards and drives the per-link
/// sub-machine via `Registry`/`DualArmController` callbacks.
pub async fn connect_and_secure(
    sd: &Softdevice,
    bonder: &'static Bonder,
    hit: &ScanHit,
) -> Result<Connection, Error> {
    Timer::after(Duration::from_millis(SCAN_STOP_SETTLE_MS)).await;

    let whitelist = [&hit.address];
    let conn_cfg = central::ConnectConfig {
        scan_config: central::ScanConfig { whitelist: Some(&whitelist), ..Default::default() },
        conn_params: nrf_softdevice::raw::ble_gap_conn_params_t {
            min_conn_interval: BLE_CONN_INTERVAL_MIN,
            max_conn_interval: BLE_CONN_INTERVAL_MAX,
            slave_latency: BLE_SLAVE_LATENCY,
            conn_sup_timeout: BLE_SUP_TIMEOUT,
        },
        ..Default::default()
    };

    let conn = central::connect_with_security(sd, &conn_cfg, bonder)
        .await
        .map_err(|_| Error::Ble(BleError::ConnectFailed))?;

    let secure_ok = match conn.encrypt() {
        Ok(()) => wait_for_secure_link(&conn).await.is_ok(),
        Err(EncryptError::PeerKeysNotFound) => conn.request_pairing().is_ok() && wait_for_secure_link(&conn).await.is_ok(),
        Err(_) => false,
    };

    if !secure_ok {
        let _ = conn.disconnect();
        return Err(Error::Ble(BleError::SecurityFailed));
    }

    Ok(conn)
}

/// Exchange ATT MTU on an already-secured connection.
pub async fn exchange_mtu(conn: &Connection) -> Result<u16, Error> {
    gatt_client::att_mtu_exchange(conn).await.map_err(|_| Error::Ble(BleError::MtuFailed))
}

/// Translate a discovery failure into the taxonomy callers expect.
pub fn discovery_error(_e: DiscoverError) -> Error {
    Error::Ble(BleError::DiscoveryFailed)
}

/// Translate an encrypt failure for logging call sites that don't
/// need the exact variant.
pub fn encrypt_error(_e: EncryptError) -> Error {
    Error::Ble(BleError::SecurityFailed)
}

/// Build a `LinkRecord` from a scan hit plus the live connection,
/// ready for `Registry::insert`.
pub fn link_record_from_hit(hit: &ScanHit, handle: LinkHandle, name: &str) -> LinkRecord {
    LinkRecord::new(handle, hit.kind, hit.address.bytes(), name)
}

/// Run one iteration of the adoption loop: scan (smart mode once any
/// slot is free), note hits, and attempt the next serialised connect.
/// Intended to be called in a loop from `main`'s central task.
///
/// A `Wearable` hit only becomes a connect target if it matches the
/// stored bond, or there is no bond yet (first-time pairing adopts
/// whichever `Wearable` is seen first, per spec.md §3/§4.2).
pub async fn adoption_tick(
    sd: &Softdevice,
    registry: &Registry,
    dual_arm: &mut DualArmController,
) -> Option<ScanHit> {
    if registry.fully_populated() {
        return None;
    }
    let mode = if registry.has_kind(DeviceKind::Wearable) && registry.need_glasses_pair() {
        ScanMode::Smart
    } else {
        ScanMode::Open
    };
    let hits: Vec<ScanHit, 8> = match scanner::scan(sd, mode, registry).await {
        Ok(h) => h,
        Err(e) => {
            warn!("adoption scan failed: {:?}", e);
            return None;
        }
    };
    for hit in hits.iter() {
        if matches!(hit.kind, DeviceKind::GlassesLeft | DeviceKind::GlassesRight) {
            dual_arm.note_scan_hit(hit.clone(), registry);
        }
    }
    if let Some(target) = dual_arm.next_connect_target() {
        return Some(target);
    }
    if registry.has_kind(DeviceKind::Wearable) {
        return None;
    }
    let bond = BOND_STORE.lock().await;
    hits.iter()
        .find(|h| h.kind == DeviceKind::Wearable && (!bond.has() || bond.matches(&h.address)))
        .cloned()
}
