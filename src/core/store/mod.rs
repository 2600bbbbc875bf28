// src/core/store/mod.rs

//! The in-memory key/value table owned by a single node. Slot ownership and
//! migration state live in `cluster::state`; this module only knows about
//! keys and bytes.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};

use crate::core::error::NodeError;

/// A single key's stored value. `put` with a non-zero offset extends an
/// existing entry rather than replacing it, mirroring the "write at offset"
/// semantics of the wire protocol's `PUT` command.
#[derive(Debug, Default, Clone)]
pub struct Store {
    entries: HashMap<String, BytesMut>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Result<Bytes, NodeError> {
        self.entries
            .get(key)
            .map(|v| v.clone().freeze())
            .ok_or(NodeError::NotFound)
    }

    /// Writes `value` at `offset` within the key's stored buffer, creating
    /// the entry if it doesn't exist and zero-padding any gap before
    /// `offset`. A plain write (`offset == 0` on a fresh key) is the common
    /// case; non-zero offsets support incremental assembly of large values.
    pub fn put(&mut self, key: String, offset: u64, value: Bytes) {
        let entry = self.entries.entry(key).or_insert_with(BytesMut::new);
        let offset = offset as usize;
        if entry.len() < offset {
            entry.resize(offset, 0);
        }
        if offset + value.len() > entry.len() {
            entry.resize(offset + value.len(), 0);
        }
        entry[offset..offset + value.len()].copy_from_slice(&value);
    }

    pub fn erase(&mut self, key: &str) -> Result<(), NodeError> {
        self.entries.remove(key).map(|_| ()).ok_or(NodeError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let mut store = Store::new();
        store.put("k".into(), 0, Bytes::from_static(b"hello"));
        assert_eq!(store.get("k").unwrap(), Bytes::from_static(b"hello"));
    }

    #[test]
    fn put_at_offset_extends_existing_value() {
        let mut store = Store::new();
        store.put("k".into(), 0, Bytes::from_static(b"hello"));
        store.put("k".into(), 5, Bytes::from_static(b" world"));
        assert_eq!(store.get("k").unwrap(), Bytes::from_static(b"hello world"));
    }

    #[test]
    fn get_missing_key_is_not_found() {
        let store = Store::new();
        assert!(matches!(store.get("missing"), Err(NodeError::NotFound)));
    }

    #[test]
    fn erase_removes_key_and_reports_missing() {
        let mut store = Store::new();
        store.put("k".into(), 0, Bytes::from_static(b"v"));
        store.erase("k").unwrap();
        assert!(matches!(store.erase("k"), Err(NodeError::NotFound)));
        assert!(!store.contains_key("k"));
    }
}
