// tests/hash_tag_properties.rs

//! Property-based coverage of the hash-tag routing primitive, mirroring the
//! teacher's `tests/property/` proptest style.

use bytes::Bytes;
use proptest::prelude::*;
use slotkv::core::cluster::slot::{get_slot, NUM_SLOTS};

proptest! {
    #[test]
    fn slot_is_always_in_range(key in ".{0,200}") {
        let slot = get_slot(&Bytes::from(key.into_bytes()));
        prop_assert!((slot as usize) < NUM_SLOTS);
    }

    #[test]
    fn same_hash_tag_always_maps_to_the_same_slot(
        tag in "[a-zA-Z0-9]{1,40}",
        prefix in "[a-zA-Z0-9]{0,20}",
        suffix in "[a-zA-Z0-9]{0,20}",
    ) {
        let a = format!("{prefix}{{{tag}}}a");
        let b = format!("{prefix}{{{tag}}}b{suffix}");
        prop_assert_eq!(
            get_slot(&Bytes::from(a.into_bytes())),
            get_slot(&Bytes::from(b.into_bytes()))
        );
    }

    #[test]
    fn hashing_is_deterministic(key in ".{0,200}") {
        let bytes = Bytes::from(key.into_bytes());
        prop_assert_eq!(get_slot(&bytes), get_slot(&bytes));
    }
}
