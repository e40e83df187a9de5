//! Checksums used by the two wire protocols.
//!
//! * `crc16_ccitt_false` — host framing (spec.md §4.9): init `0xFFFF`,
//!   poly `0x1021`, no input/output reflection, no final XOR.
//! * `crc32_xz` — glasses bitmap integrity (spec.md §4.10 step 4):
//!   reflected CRC-32 with init `0xFFFFFFFF` and final XOR `0xFFFFFFFF`,
//!   i.e. the `CRC-32/XZ` catalogue entry.
//!
//! Built on the `crc` crate's const-table algorithm so both checksums
//! are computed with the same machinery the rest of the ecosystem uses
//! for framed serial protocols, rather than hand-rolled tables.

use crc::{Algorithm, Crc};

/// `CRC-16/CCITT-FALSE`: init 0xFFFF, poly 0x1021, refin=false,
/// refout=false, xorout=0x0000.
const CCITT_FALSE: Algorithm<u16> = Algorithm {
    width: 16,
    poly: 0x1021,
    init: 0xFFFF,
    refin: false,
    refout: false,
    xorout: 0x0000,
    check: 0x29B1,
    residue: 0x0000,
};

/// `CRC-32/XZ` (a.k.a. `CRC-32`): init 0xFFFFFFFF, poly 0x04C11DB7,
/// refin=true, refout=true, xorout=0xFFFFFFFF.
const CRC32_XZ: Algorithm<u32> = Algorithm {
    width: 32,
    poly: 0x04C1_1DB7,
    init: 0xFFFF_FFFF,
    refin: true,
    refout: true,
    xorout: 0xFFFF_FFFF,
    check: 0xCBF4_3926,
    residue: 0xDEBB_20E3,
};

/// Computes the CRC-16/CCITT-FALSE checksum used to trailer framed host
/// packets.
pub fn crc16_ccitt_false(data: &[u8]) -> u16 {
    let crc = Crc::<u16>::new(&CCITT_FALSE);
    crc.checksum(data)
}

/// Computes the CRC-32/XZ checksum used to validate a completed bitmap
/// transfer. Callers pass the 4-byte display address concatenated with
/// the full transmitted payload, per spec.md §4.10 step 4.
pub fn crc32_xz(data: &[u8]) -> u32 {
    let crc = Crc::<u32>::new(&CRC32_XZ);
    crc.checksum(data)
}

/// Incremental CRC-32/XZ accumulator, used by the bitmap FSM so it does
/// not need to retain the whole transmitted payload in memory just to
/// compute the trailing checksum.
pub struct Crc32XzDigest {
    digest: crc::Digest<'static, u32>,
}

impl Crc32XzDigest {
    pub fn new() -> Self {
        static CRC: Crc<u32> = Crc::<u32>::new(&CRC32_XZ);
        Self {
            digest: CRC.digest(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.digest.update(data);
    }

    pub fn finalize(self) -> u32 {
        self.digest.finalize()
    }
}

impl Default for Crc32XzDigest {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc16_ccitt_false_matches_check_value() {
        // The CRC catalogue's "check" value is the CRC of the ASCII
        // string "123456789".
        assert_eq!(crc16_ccitt_false(b"123456789"), 0x29B1);
    }

    #[test]
    fn crc32_xz_matches_check_value() {
        assert_eq!(crc32_xz(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn crc32_xz_incremental_matches_one_shot() {
        let whole = crc32_xz(b"123456789");
        let mut digest = Crc32XzDigest::new();
        digest.update(b"1234");
        digest.update(b"56789");
        assert_eq!(digest.finalize(), whole);
    }

    #[test]
    fn framed_packet_example_from_spec_round_trips() {
        // spec.md §8 scenario 5: payload "AB" framed correctly should
        // produce a specific CRC; we only assert internal consistency
        // here since the spec's own "wrong CRC" example is deliberately
        // invalid.
        let payload = b"AB";
        let crc = crc16_ccitt_false(payload);
        assert_ne!(crc, 0x0000);
    }
}
