//! Connection registry (C3): the in-memory table of active BLE links.
//!
//! Pure state container plus the invariants from spec.md §3/§8; the
//! mutex discipline (shared lock for readers, exclusive for writers)
//! is applied by the caller (`ble::central`) which owns a
//! `Mutex<CriticalSectionRawMutex, Registry>`. Kept hardware-free so
//! its invariants are host-testable.

use crate::ble::classifier::DeviceKind;
use crate::config::MAX_LINKS;
use heapless::{String, Vec};

/// Opaque per-connection handle. In the embedded build this is the
/// SoftDevice's raw `u16` connection handle; kept as a bare integer
/// here so the registry has no BLE-stack dependency.
pub type LinkHandle = u16;

/// `{handle, kind, address, name[≤31], mtu, rssi, nusReady, hidReady,
/// basReady, securityLevel}` (spec.md §3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkRecord {
    pub handle: LinkHandle,
    pub kind: DeviceKind,
    pub address: [u8; 6],
    pub name: String<31>,
    pub mtu: u16,
    pub rssi: i8,
    pub nus_ready: bool,
    pub hid_ready: bool,
    pub bas_ready: bool,
    pub security_level: u8,
}

impl LinkRecord {
    pub fn new(handle: LinkHandle, kind: DeviceKind, address: [u8; 6], name: &str) -> Self {
        let mut n = String::new();
        for c in name.chars().take(31) {
            let _ = n.push(c);
        }
        Self {
            handle,
            kind,
            address,
            name: n,
            mtu: 23, // default ATT_MTU before exchange
            rssi: 0,
            nus_ready: false,
            hid_ready: false,
            bas_ready: false,
            security_level: 0,
        }
    }
}

/// A per-link boolean readiness flag the central controller can flip
/// via `set_flag`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkFlag {
    NusReady,
    HidReady,
    BasReady,
}

/// Errors from registry operations (translate to `crate::error::Error`
/// at the call site as needed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// Table is at `MAX_LINKS` capacity.
    Full,
    /// Insert would violate a per-kind cardinality invariant
    /// (spec.md §8: at most one Wearable/GlassesLeft/GlassesRight).
    KindConflict,
    /// No link with the given handle/address exists.
    NotFound,
}

/// In-memory table of up to `MAX_LINKS` simultaneous BLE connections.
pub struct Registry {
    links: Vec<LinkRecord, MAX_LINKS>,
}

impl Registry {
    pub const fn new() -> Self {
        Self { links: Vec::new() }
    }

    /// `insert` - add a newly-connected link. Enforces spec.md §8's
    /// cardinality invariant before accepting: at most one `Wearable`,
    /// at most one of each glasses arm.
    pub fn insert(&mut self, link: LinkRecord) -> Result<(), RegistryError> {
        if matches!(
            link.kind,
            DeviceKind::Wearable | DeviceKind::GlassesLeft | DeviceKind::GlassesRight
        ) && self.has_kind(link.kind)
        {
            return Err(RegistryError::KindConflict);
        }
        if self.links.is_full() {
            return Err(RegistryError::Full);
        }
        self.links.push(link).map_err(|_| RegistryError::Full)
    }

    /// `remove(handle)` - drop a link on disconnect.
    pub fn remove(&mut self, handle: LinkHandle) -> Result<LinkRecord, RegistryError> {
        let pos = self
            .links
            .iter()
            .position(|l| l.handle == handle)
            .ok_or(RegistryError::NotFound)?;
        Ok(self.links.remove(pos))
    }

    /// `lookup(handle)`.
    pub fn lookup(&self, handle: LinkHandle) -> Option<&LinkRecord> {
        self.links.iter().find(|l| l.handle == handle)
    }

    /// `lookup(addr)`.
    pub fn lookup_by_address(&self, address: &[u8; 6]) -> Option<&LinkRecord> {
        self.links.iter().find(|l| &l.address == address)
    }

    /// `lookup(kind)` - first link of the given kind, if any.
    pub fn lookup_by_kind(&self, kind: DeviceKind) -> Option<&LinkRecord> {
        self.links.iter().find(|l| l.kind == kind)
    }

    /// `count`.
    pub fn count(&self) -> usize {
        self.links.len()
    }

    /// `hasKind(kind)`.
    pub fn has_kind(&self, kind: DeviceKind) -> bool {
        self.links.iter().any(|l| l.kind == kind)
    }

    /// `setFlag(handle, flag, value)`.
    pub fn set_flag(&mut self, handle: LinkHandle, flag: LinkFlag, value: bool) -> Result<(), RegistryError> {
        let link = self
            .links
            .iter_mut()
            .find(|l| l.handle == handle)
            .ok_or(RegistryError::NotFound)?;
        match flag {
            LinkFlag::NusReady => link.nus_ready = value,
            LinkFlag::HidReady => link.hid_ready = value,
            LinkFlag::BasReady => link.bas_ready = value,
        }
        Ok(())
    }

    pub fn set_rssi(&mut self, handle: LinkHandle, rssi: i8) -> Result<(), RegistryError> {
        let link = self
            .links
            .iter_mut()
            .find(|l| l.handle == handle)
            .ok_or(RegistryError::NotFound)?;
        link.rssi = rssi;
        Ok(())
    }

    pub fn set_mtu(&mut self, handle: LinkHandle, mtu: u16) -> Result<(), RegistryError> {
        let link = self
            .links
            .iter_mut()
            .find(|l| l.handle == handle)
            .ok_or(RegistryError::NotFound)?;
        link.mtu = mtu;
        Ok(())
    }

    /// `needGlassesPair()` - true iff zero or exactly one glasses arm
    /// is connected (so scanning must continue to find the pair).
    pub fn need_glasses_pair(&self) -> bool {
        let left = self.has_kind(DeviceKind::GlassesLeft);
        let right = self.has_kind(DeviceKind::GlassesRight);
        !(left && right)
    }

    /// Whether both a wearable and both glasses arms are connected,
    /// i.e. the scanner should stop entirely (spec.md §4.1).
    pub fn fully_populated(&self) -> bool {
        self.has_kind(DeviceKind::Wearable) && !self.need_glasses_pair()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LinkRecord> {
        self.links.iter()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(handle: u16, kind: DeviceKind) -> LinkRecord {
        LinkRecord::new(handle, kind, [handle as u8; 6], "dev")
    }

    #[test]
    fn insert_and_lookup_roundtrip() {
        let mut reg = Registry::new();
        reg.insert(link(1, DeviceKind::Wearable)).unwrap();
        assert_eq!(reg.count(), 1);
        assert!(reg.lookup(1).is_some());
        assert!(reg.lookup(2).is_none());
    }

    #[test]
    fn at_most_one_wearable() {
        let mut reg = Registry::new();
        reg.insert(link(1, DeviceKind::Wearable)).unwrap();
        let err = reg.insert(link(2, DeviceKind::Wearable)).unwrap_err();
        assert_eq!(err, RegistryError::KindConflict);
    }

    #[test]
    fn at_most_one_of_each_glasses_arm() {
        let mut reg = Registry::new();
        reg.insert(link(1, DeviceKind::GlassesLeft)).unwrap();
        reg.insert(link(2, DeviceKind::GlassesRight)).unwrap();
        assert_eq!(
            reg.insert(link(3, DeviceKind::GlassesLeft)).unwrap_err(),
            RegistryError::KindConflict
        );
    }

    #[test]
    fn generic_uart_has_no_cardinality_limit() {
        let mut reg = Registry::new();
        reg.insert(link(1, DeviceKind::GenericUart)).unwrap();
        reg.insert(link(2, DeviceKind::GenericUart)).unwrap();
        assert_eq!(reg.count(), 2);
    }

    #[test]
    fn remove_drops_the_link() {
        let mut reg = Registry::new();
        reg.insert(link(1, DeviceKind::Wearable)).unwrap();
        let removed = reg.remove(1).unwrap();
        assert_eq!(removed.handle, 1);
        assert_eq!(reg.count(), 0);
        assert_eq!(reg.remove(1).unwrap_err(), RegistryError::NotFound);
    }

    #[test]
    fn need_glasses_pair_true_when_zero_or_one_arm() {
        let mut reg = Registry::new();
        assert!(reg.need_glasses_pair());
        reg.insert(link(1, DeviceKind::GlassesLeft)).unwrap();
        assert!(reg.need_glasses_pair());
        reg.insert(link(2, DeviceKind::GlassesRight)).unwrap();
        assert!(!reg.need_glasses_pair());
    }

    #[test]
    fn fully_populated_requires_wearable_and_both_arms() {
        let mut reg = Registry::new();
        reg.insert(link(1, DeviceKind::Wearable)).unwrap();
        assert!(!reg.fully_populated());
        reg.insert(link(2, DeviceKind::GlassesLeft)).unwrap();
        reg.insert(link(3, DeviceKind::GlassesRight)).unwrap();
        assert!(reg.fully_populated());
    }

    #[test]
    fn set_flag_updates_the_right_link() {
        let mut reg = Registry::new();
        reg.insert(link(1, DeviceKind::Wearable)).unwrap();
        reg.set_flag(1, LinkFlag::HidReady, true).unwrap();
        assert!(reg.lookup(1).unwrap().hid_ready);
        assert!(!reg.lookup(1).unwrap().nus_ready);
    }

    #[test]
    fn insert_fails_when_table_is_full() {
        let mut reg = Registry::new();
        for i in 0..MAX_LINKS {
            reg.insert(link(i as u16, DeviceKind::GenericUart)).unwrap();
        }
        assert_eq!(
            reg.insert(link(99, DeviceKind::GenericUart)).unwrap_err(),
            RegistryError::Full
        );
    }
}
