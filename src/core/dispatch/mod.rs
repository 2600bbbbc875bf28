// src/core/dispatch/mod.rs

//! One handler per opcode, driving the slot state machine described by the
//! routing policy: a request for a key whose slot isn't owned locally gets
//! redirected (MOVE), a request that lands mid-migration gets redirected to
//! the migration partner (ASK / NO_ASKING_ERROR), and everything else goes
//! straight to the store.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::core::cluster::gossip::{self, merge_ping};
use crate::core::cluster::slot::{get_slot, NUM_SLOTS};
use crate::core::cluster::state::{NodeState, SlotState};
use crate::core::error::{NodeError, StatusKind};
use crate::core::protocol::Message;

fn error(text: impl Into<String>) -> Message {
    Message::ErrorResponse { text: text.into() }
}

/// Handles one incoming message against shared node state, returning the
/// single reply to send back on the same connection (`None` for opcodes
/// that never reply: `CLUSTER_PING`, `CLUSTER_MIGRATION_FINISHED`).
pub async fn dispatch(node: &Arc<Mutex<NodeState>>, message: Message) -> Option<Message> {
    match message {
        Message::Put { key, offset, value } => Some(handle_put(node, key, offset, value).await),
        Message::Get {
            key,
            size,
            offset,
            asking,
        } => Some(handle_get(node, key, size, offset, asking).await),
        Message::Erase { key, asking } => Some(handle_erase(node, key, asking).await),
        Message::Meet {
            name,
            ip,
            cluster_port,
            client_port,
        } => Some(handle_meet(node, name, ip, cluster_port, client_port).await),
        Message::ImportSlot {
            slot,
            other_ip,
            other_client_port,
        } => Some(handle_import_slot(node, slot, other_ip, other_client_port).await),
        Message::MigrateSlot {
            slot,
            other_ip,
            other_client_port,
        } => Some(handle_migrate_slot(node, slot, other_ip, other_client_port).await),
        Message::ClusterMigrationFinished { slot } => {
            handle_migration_finished(node, slot).await;
            None
        }
        Message::GetSlots => Some(handle_get_slots(node).await),
        Message::ClusterPing {
            sender_name,
            nodes,
            slots,
        } => {
            handle_cluster_ping(node, sender_name, nodes, slots).await;
            None
        }
        // Response-only opcodes never arrive as a request to dispatch.
        Message::GetResponse { .. }
        | Message::OkResponse
        | Message::ErrorResponse { .. }
        | Message::Move { .. }
        | Message::Ask { .. }
        | Message::NoAskingError { .. } => Some(error("unexpected response opcode as request")),
    }
}

/// Slot ownership as observed by the caller just before it runs a
/// request-specific handler: `None` if locally owned, `Some(reply)` if the
/// caller must send `reply` (a MOVE or an unserved-slot error) and stop.
fn routing_check(state: &NodeState, slot: u16) -> Option<Message> {
    if state.cluster.is_served_locally(slot) {
        return None;
    }
    match &state.cluster.slots[slot as usize].served_by {
        Some(owner_name) => {
            if let Some(entry) = state.cluster.nodes.get(owner_name) {
                Some(Message::Move {
                    ip: entry.identity.ip.clone(),
                    client_port: entry.identity.client_port,
                })
            } else {
                Some(error("slot owner unknown to this node"))
            }
        }
        None => Some(error("slot not served by any node")),
    }
}

fn ask_reply(state: &NodeState, slot: u16) -> Message {
    let partner = state.cluster.slots[slot as usize].migration_partner.clone();
    match partner.and_then(|name| state.cluster.nodes.get(&name)) {
        Some(entry) => Message::Ask {
            ip: entry.identity.ip.clone(),
            client_port: entry.identity.client_port,
        },
        None => error("migration partner unknown"),
    }
}

fn no_asking_reply(state: &NodeState, slot: u16) -> Message {
    let partner = state.cluster.slots[slot as usize].migration_partner.clone();
    match partner.and_then(|name| state.cluster.nodes.get(&name)) {
        Some(entry) => Message::NoAskingError {
            ip: entry.identity.ip.clone(),
            client_port: entry.identity.client_port,
        },
        None => error("migration partner unknown"),
    }
}

async fn handle_put(node: &Arc<Mutex<NodeState>>, key: String, offset: u64, value: Bytes) -> Message {
    let slot = get_slot(&Bytes::from(key.clone().into_bytes()));
    let mut state = node.lock().await;

    if let Some(reply) = routing_check(&state, slot) {
        return reply;
    }

    let already_present = state.store.contains_key(&key);
    let slot_state = state.cluster.slots[slot as usize].state;

    if !already_present && slot_state == SlotState::Migrating {
        return ask_reply(&state, slot);
    }

    state.store.put(key, offset, value);
    if !already_present {
        state.cluster.slots[slot as usize].amount_of_keys += 1;
    }
    Message::OkResponse
}

async fn handle_get(node: &Arc<Mutex<NodeState>>, key: String, size: u64, offset: u64, asking: bool) -> Message {
    let slot = get_slot(&Bytes::from(key.clone().into_bytes()));
    let state = node.lock().await;

    if let Some(reply) = routing_check(&state, slot) {
        return reply;
    }

    let slot_state = state.cluster.slots[slot as usize].state;
    if slot_state == SlotState::Importing && !asking {
        return no_asking_reply(&state, slot);
    }

    match state.store.get(&key) {
        Ok(value) => {
            let total_size = value.len() as u64;
            let start = (offset as usize).min(value.len());
            let end = start.saturating_add(size as usize).min(value.len());
            Message::GetResponse {
                total_size,
                offset,
                value: value.slice(start..end),
            }
        }
        Err(e) if e.kind() == StatusKind::NotFound && slot_state == SlotState::Migrating => ask_reply(&state, slot),
        Err(e) => error(e.message()),
    }
}

async fn handle_erase(node: &Arc<Mutex<NodeState>>, key: String, asking: bool) -> Message {
    let slot = get_slot(&Bytes::from(key.clone().into_bytes()));
    let mut state = node.lock().await;

    if let Some(reply) = routing_check(&state, slot) {
        return reply;
    }

    let slot_state = state.cluster.slots[slot as usize].state;
    let present = state.store.contains_key(&key);

    if !present {
        return if slot_state == SlotState::Migrating && !asking {
            ask_reply(&state, slot)
        } else {
            error(NodeError::NotFound.message())
        };
    }

    state.store.erase(&key).expect("presence checked above");
    let record = &mut state.cluster.slots[slot as usize];
    record.amount_of_keys = record.amount_of_keys.saturating_sub(1);

    if record.state == SlotState::Migrating && record.amount_of_keys == 0 {
        let partner_name = record.migration_partner.clone();
        record.state = SlotState::Normal;
        record.served_by = partner_name.clone();
        record.migration_partner = None;
        state.cluster.local_served_slots[slot as usize] = false;

        if let Some(partner_name) = partner_name {
            if let Some(entry) = state.cluster.nodes.get(&partner_name) {
                let addr = entry.identity.cluster_addr();
                drop(state);
                if let Err(e) =
                    gossip::send_cluster_message(&addr, Message::ClusterMigrationFinished { slot }).await
                {
                    warn!(peer = %partner_name, error = %e, "failed to notify migration partner of completion");
                }
                return Message::OkResponse;
            }
        }
    }

    Message::OkResponse
}

async fn handle_meet(
    node: &Arc<Mutex<NodeState>>,
    name: String,
    ip: String,
    cluster_port: u16,
    client_port: u16,
) -> Message {
    use crate::core::cluster::state::NodeIdentity;

    let mut state = node.lock().await;
    state.cluster.upsert_node(NodeIdentity {
        name: name.clone(),
        ip,
        cluster_port,
        client_port,
    });
    info!(peer = %name, "met new node");
    Message::OkResponse
}

async fn handle_migrate_slot(
    node: &Arc<Mutex<NodeState>>,
    slot: u16,
    other_ip: String,
    other_client_port: u16,
) -> Message {
    if slot as usize >= NUM_SLOTS {
        return error("slot out of range");
    }
    let mut state = node.lock().await;

    if state.cluster.slots[slot as usize].state != SlotState::Normal {
        return error("slot is not in a migratable state");
    }
    let Some(partner_name) = state
        .cluster
        .find_by_addr(&other_ip, other_client_port)
        .map(str::to_string)
    else {
        return error("no known node at that address");
    };

    let record = &mut state.cluster.slots[slot as usize];
    if record.amount_of_keys == 0 {
        // Nothing to move; the partner still needs an explicit IMPORT_SLOT.
        return Message::OkResponse;
    }
    record.state = SlotState::Migrating;
    record.migration_partner = Some(partner_name);
    Message::OkResponse
}

async fn handle_import_slot(
    node: &Arc<Mutex<NodeState>>,
    slot: u16,
    other_ip: String,
    other_client_port: u16,
) -> Message {
    if slot as usize >= NUM_SLOTS {
        return error("slot out of range");
    }
    let mut state = node.lock().await;

    let Some(partner_name) = state
        .cluster
        .find_by_addr(&other_ip, other_client_port)
        .map(str::to_string)
    else {
        return error("no known node at that address");
    };

    let record = &mut state.cluster.slots[slot as usize];
    record.state = SlotState::Importing;
    record.served_by = Some(partner_name.clone());
    record.migration_partner = Some(partner_name);
    state.cluster.local_served_slots[slot as usize] = true;
    Message::OkResponse
}

async fn handle_migration_finished(node: &Arc<Mutex<NodeState>>, slot: u16) {
    if slot as usize >= NUM_SLOTS {
        return;
    }
    let mut state = node.lock().await;
    if state.cluster.slots[slot as usize].state != SlotState::Importing {
        warn!(slot, "received migration-finished for a slot not being imported");
        return;
    }
    let myself = state.cluster.myself.name.clone();
    let record = &mut state.cluster.slots[slot as usize];
    record.state = SlotState::Normal;
    record.served_by = Some(myself);
    record.migration_partner = None;
    info!(slot, "slot import completed");
}

async fn handle_get_slots(node: &Arc<Mutex<NodeState>>) -> Message {
    let state = node.lock().await;
    let mut lines = Vec::new();
    let mut run_start = 0usize;

    let addr_of = |served_by: &Option<String>| -> String {
        match served_by {
            Some(name) if *name == state.cluster.myself.name => state.cluster.myself.addr(),
            Some(name) => state
                .cluster
                .nodes
                .get(name)
                .map(|e| e.identity.addr())
                .unwrap_or_else(|| "NULL".to_string()),
            None => "NULL".to_string(),
        }
    };

    for i in 1..=state.cluster.slots.len() {
        let boundary = i == state.cluster.slots.len()
            || addr_of(&state.cluster.slots[i].served_by) != addr_of(&state.cluster.slots[run_start].served_by);
        if boundary {
            lines.push(format!(
                "{}\t{}\t{}",
                run_start,
                i - 1,
                addr_of(&state.cluster.slots[run_start].served_by)
            ));
            run_start = i;
        }
    }

    let value = Bytes::from(lines.join("\n"));
    Message::GetResponse {
        total_size: value.len() as u64,
        offset: 0,
        value,
    }
}

async fn handle_cluster_ping(node: &Arc<Mutex<NodeState>>, sender_name: String, nodes: Bytes, slots: Bytes) {
    let mut state = node.lock().await;
    if let Err(e) = merge_ping(&mut state, &sender_name, nodes, slots) {
        warn!(peer = %sender_name, error = %e, "discarding malformed gossip ping");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cluster::state::NodeIdentity;

    fn identity(name: &str, port: u16) -> NodeIdentity {
        NodeIdentity {
            name: name.to_string(),
            ip: "127.0.0.1".to_string(),
            cluster_port: port + 10000,
            client_port: port,
        }
    }

    fn single_node() -> Arc<Mutex<NodeState>> {
        let mut state = NodeState::new(identity("a", 5000));
        state.cluster.claim_all_slots();
        Arc::new(Mutex::new(state))
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let node = single_node();
        let reply = dispatch(
            &node,
            Message::Put {
                key: "k".into(),
                offset: 0,
                value: Bytes::from_static(b"v"),
            },
        )
        .await;
        assert!(matches!(reply, Some(Message::OkResponse)));

        let reply = dispatch(
            &node,
            Message::Get {
                key: "k".into(),
                size: u64::MAX,
                offset: 0,
                asking: false,
            },
        )
        .await;
        match reply {
            Some(Message::GetResponse { value, total_size, .. }) => {
                assert_eq!(value, Bytes::from_static(b"v"));
                assert_eq!(total_size, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn get_unowned_slot_returns_move() {
        let node = Arc::new(Mutex::new(NodeState::new(identity("a", 5000))));
        {
            let mut state = node.lock().await;
            state.cluster.upsert_node(identity("b", 5001));
            let slot = get_slot(&Bytes::from_static(b"k"));
            state.cluster.slots[slot as usize].served_by = Some("b".to_string());
        }
        let reply = dispatch(
            &node,
            Message::Get {
                key: "k".into(),
                size: u64::MAX,
                offset: 0,
                asking: false,
            },
        )
        .await;
        assert!(matches!(reply, Some(Message::Move { .. })));
    }

    #[tokio::test]
    async fn migrate_slot_with_zero_keys_is_a_no_op() {
        let node = single_node();
        {
            let mut state = node.lock().await;
            state.cluster.upsert_node(identity("b", 5001));
        }
        let reply = handle_migrate_slot(&node, 0, "127.0.0.1".to_string(), 5001).await;
        assert!(matches!(reply, Message::OkResponse));
        let state = node.lock().await;
        assert_eq!(state.cluster.slots[0].state, SlotState::Normal);
    }

    #[tokio::test]
    async fn migrate_slot_with_keys_enters_migrating_state() {
        let node = single_node();
        {
            let mut state = node.lock().await;
            state.cluster.upsert_node(identity("b", 5001));
            state.cluster.slots[0].amount_of_keys = 1;
        }
        let reply = handle_migrate_slot(&node, 0, "127.0.0.1".to_string(), 5001).await;
        assert!(matches!(reply, Message::OkResponse));
        let state = node.lock().await;
        assert_eq!(state.cluster.slots[0].state, SlotState::Migrating);
        assert_eq!(state.cluster.slots[0].migration_partner.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn import_slot_accepts_local_traffic_immediately() {
        let node = Arc::new(Mutex::new(NodeState::new(identity("b", 5001))));
        {
            let mut state = node.lock().await;
            state.cluster.upsert_node(identity("a", 5000));
        }
        let reply = handle_import_slot(&node, 0, "127.0.0.1".to_string(), 5000).await;
        assert!(matches!(reply, Message::OkResponse));
        let state = node.lock().await;
        assert!(state.cluster.is_served_locally(0));
        assert_eq!(state.cluster.slots[0].state, SlotState::Importing);
    }

    #[tokio::test]
    async fn get_on_importing_slot_without_asking_is_rejected() {
        let node = Arc::new(Mutex::new(NodeState::new(identity("b", 5001))));
        {
            let mut state = node.lock().await;
            state.cluster.upsert_node(identity("a", 5000));
        }
        handle_import_slot(&node, 0, "127.0.0.1".to_string(), 5000).await;

        // "k" doesn't necessarily hash to slot 0, so force whichever slot it
        // does land on into the importing state under test.
        let key = "k".to_string();
        let slot = get_slot(&Bytes::from(key.clone().into_bytes()));
        {
            let mut state = node.lock().await;
            state.cluster.slots[slot as usize].state = SlotState::Importing;
            state.cluster.slots[slot as usize].migration_partner = Some("a".to_string());
            state.cluster.local_served_slots[slot as usize] = true;
        }
        let reply = dispatch(
            &node,
            Message::Get {
                key,
                size: u64::MAX,
                offset: 0,
                asking: false,
            },
        )
        .await;
        assert!(matches!(reply, Some(Message::NoAskingError { .. })));
    }
}
