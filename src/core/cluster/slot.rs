// src/core/cluster/slot.rs

//! Key-to-slot hashing: hash-tag extraction plus a CRC16 checksum, the same
//! scheme Redis Cluster popularized and the one this crate's teacher already
//! carries as a dependency.

use bytes::Bytes;
use crc::{Crc, CRC_16_IBM_3740};

/// Number of fixed-size partitions the key space is divided into. Production
/// clusters would want something on this order rather than the handful used
/// by the reference implementation's own test harness.
pub const NUM_SLOTS: usize = 4096;

static CRC16_ALGO: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Returns the substring of `key` used for hashing: the content of the
/// first balanced `{...}` pair if one exists and is non-empty, otherwise the
/// whole key. This lets callers pin related keys to the same slot by
/// wrapping a shared substring in braces.
fn hash_tag(key: &[u8]) -> &[u8] {
    if let Some(open) = key.iter().position(|&b| b == b'{') {
        if let Some(close_rel) = key[open + 1..].iter().position(|&b| b == b'}') {
            let close = open + 1 + close_rel;
            if close > open + 1 {
                return &key[open + 1..close];
            }
        }
    }
    key
}

/// Maps a key to its owning slot in `0..NUM_SLOTS`.
pub fn get_slot(key: &Bytes) -> u16 {
    let tag = hash_tag(key);
    let checksum = CRC16_ALGO.checksum(tag);
    (checksum as usize % NUM_SLOTS) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_hash_tag_maps_to_same_slot() {
        let a = Bytes::from_static(b"user:{42}:name");
        let b = Bytes::from_static(b"user:{42}:email");
        assert_eq!(get_slot(&a), get_slot(&b));
    }

    #[test]
    fn empty_braces_fall_back_to_whole_key() {
        let a = Bytes::from_static(b"a{}b");
        let b = Bytes::from_static(b"c{}d");
        assert_ne!(get_slot(&a), get_slot(&b));
    }

    #[test]
    fn unmatched_brace_falls_back_to_whole_key() {
        let key = Bytes::from_static(b"no-closing-brace{here");
        // Should not panic, and should just hash the whole key.
        let whole = CRC16_ALGO.checksum(key.as_ref());
        assert_eq!(get_slot(&key), (whole as usize % NUM_SLOTS) as u16);
    }

    #[test]
    fn slot_is_always_in_range() {
        for key in ["", "a", "{}", "{a}", "averylongkeynamehere"] {
            let slot = get_slot(&Bytes::from(key.as_bytes().to_vec()));
            assert!((slot as usize) < NUM_SLOTS);
        }
    }
}
