// src/core/cluster/state.rs

//! Cluster membership and slot ownership. Unlike the teacher's
//! `DashMap`-plus-per-field-`RwLock` scheme, everything here is reached
//! through a single outer mutex (see `NodeState`), so the types themselves
//! need no internal synchronization.

use std::collections::HashMap;

use tokio::net::TcpStream;

use crate::core::store::Store;

use super::slot::NUM_SLOTS;

/// The wire-marshalled identity of a node: the fields exchanged by gossip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub name: String,
    pub ip: String,
    pub cluster_port: u16,
    pub client_port: u16,
}

impl NodeIdentity {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.ip, self.client_port)
    }

    pub fn cluster_addr(&self) -> String {
        format!("{}:{}", self.ip, self.cluster_port)
    }
}

/// A row in the node table: identity plus the (lazily opened) outgoing
/// gossip connection to that peer. `served_slots`/`num_slots_served` are
/// kept as a cache derived from the slot table rather than duplicated truth;
/// they exist so a gossip round can cheaply describe "what I serve" without
/// re-scanning the whole slot table on every ping.
#[derive(Debug)]
pub struct NodeEntry {
    pub identity: NodeIdentity,
    pub served_slots: Vec<bool>,
    pub link: Option<TcpStream>,
}

impl NodeEntry {
    pub fn new(identity: NodeIdentity) -> Self {
        Self {
            identity,
            served_slots: vec![false; NUM_SLOTS],
            link: None,
        }
    }

    pub fn num_slots_served(&self) -> usize {
        self.served_slots.iter().filter(|&&b| b).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Normal,
    Migrating,
    Importing,
}

/// One entry in the fixed-length slot table.
#[derive(Debug, Clone)]
pub struct Slot {
    pub served_by: Option<String>,
    pub amount_of_keys: u64,
    pub state: SlotState,
    pub migration_partner: Option<String>,
}

impl Slot {
    fn unowned() -> Self {
        Self {
            served_by: None,
            amount_of_keys: 0,
            state: SlotState::Normal,
            migration_partner: None,
        }
    }
}

/// Node table, slot table, and local identity, aggregated as described by
/// the data model. `myself` is kept out of `nodes` so local lookups never
/// need a name comparison to special-case "is this me."
#[derive(Debug)]
pub struct ClusterState {
    pub myself: NodeIdentity,
    pub nodes: HashMap<String, NodeEntry>,
    pub slots: Vec<Slot>,
    /// Whether *this* node currently accepts client traffic for slot `i`.
    /// Distinct from `slots[i].served_by`: an IMPORTING slot is accepted
    /// locally (this bit is set) while `served_by` still names the migrator
    /// until `CLUSTER_MIGRATION_FINISHED` arrives.
    pub local_served_slots: Vec<bool>,
    pub part_of_cluster: bool,
}

impl ClusterState {
    pub fn new(myself: NodeIdentity) -> Self {
        Self {
            myself,
            nodes: HashMap::new(),
            slots: vec![Slot::unowned(); NUM_SLOTS],
            local_served_slots: vec![false; NUM_SLOTS],
            part_of_cluster: false,
        }
    }

    /// Seeds a single-node cluster that owns every slot, for `--serve-all-slots`.
    pub fn claim_all_slots(&mut self) {
        for slot in &mut self.slots {
            slot.served_by = Some(self.myself.name.clone());
            slot.state = SlotState::Normal;
        }
        self.local_served_slots.fill(true);
        self.part_of_cluster = true;
    }

    pub fn size(&self) -> usize {
        self.nodes.len() + 1
    }

    /// Finds the node whose client-facing address matches `ip:client_port`,
    /// as used to resolve a migration partner named only by address.
    pub fn find_by_addr(&self, ip: &str, client_port: u16) -> Option<&str> {
        self.nodes
            .values()
            .find(|entry| entry.identity.ip == ip && entry.identity.client_port == client_port)
            .map(|entry| entry.identity.name.as_str())
    }

    pub fn is_served_locally(&self, slot: u16) -> bool {
        self.local_served_slots[slot as usize]
    }

    /// Inserts or updates a node's identity, opening an outgoing connection
    /// only when one doesn't already exist and is alive.
    pub fn upsert_node(&mut self, identity: NodeIdentity) -> &mut NodeEntry {
        // The outgoing link (if any) is untouched here; only identity fields
        // are refreshed on an existing entry.
        self.nodes
            .entry(identity.name.clone())
            .and_modify(|entry| entry.identity = identity.clone())
            .or_insert_with(|| NodeEntry::new(identity))
    }
}

/// Everything reached through the single coarse lock: cluster membership,
/// slot ownership, and the local key/value table. One `tokio::sync::Mutex`
/// around this struct is the entire synchronization story for the node.
pub struct NodeState {
    pub cluster: ClusterState,
    pub store: Store,
}

impl NodeState {
    pub fn new(myself: NodeIdentity) -> Self {
        Self {
            cluster: ClusterState::new(myself),
            store: Store::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(name: &str, port: u16) -> NodeIdentity {
        NodeIdentity {
            name: name.to_string(),
            ip: "127.0.0.1".to_string(),
            cluster_port: port + 10000,
            client_port: port,
        }
    }

    #[test]
    fn claim_all_slots_marks_every_slot_normal_and_local() {
        let mut state = ClusterState::new(identity("a", 5000));
        state.claim_all_slots();
        assert!(state.part_of_cluster);
        for i in 0..NUM_SLOTS as u16 {
            assert!(state.is_served_locally(i));
            assert_eq!(state.slots[i as usize].state, SlotState::Normal);
        }
    }

    #[test]
    fn fresh_slot_table_has_no_owner() {
        let state = ClusterState::new(identity("a", 5000));
        assert!(!state.is_served_locally(0));
        assert!(state.slots[0].served_by.is_none());
    }

    #[test]
    fn upsert_node_inserts_new_entry() {
        let mut state = ClusterState::new(identity("a", 5000));
        state.upsert_node(identity("b", 5001));
        assert_eq!(state.nodes.len(), 1);
        assert_eq!(state.size(), 2);
    }
}
