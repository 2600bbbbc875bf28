// src/core/cluster/mod.rs

//! Cluster membership, slot ownership, and the gossip protocol that keeps
//! them converging across nodes.

pub mod gossip;
pub mod slot;
pub mod state;

pub use slot::{get_slot, NUM_SLOTS};
pub use state::{ClusterState, NodeEntry, NodeIdentity, NodeState, Slot, SlotState};
