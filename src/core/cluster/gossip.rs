// src/core/cluster/gossip.rs

//! Periodic membership and slot-table exchange between peers. Each round
//! pushes a random sample of the node table plus the full slot table to a
//! random sample of peers; the receiver applies the convergence rules
//! below. There is no failure detector: a dead peer just stops answering
//! and its link fails on the next attempt.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::seq::SliceRandom;
use tokio::sync::{broadcast, Mutex};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::core::error::NodeError;
use crate::core::protocol::{FrameCodec, Message};

use super::slot::NUM_SLOTS;
use super::state::{NodeEntry, NodeIdentity, NodeState, Slot, SlotState};

/// How often a node initiates a gossip round.
pub const PING_INTERVAL: Duration = Duration::from_secs(1);

const NAME_LEN: usize = 40;
const IP_LEN: usize = 15;
const BITMAP_LEN: usize = NUM_SLOTS.div_ceil(8);

fn put_fixed(dst: &mut BytesMut, s: &str, len: usize) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(len);
    dst.extend_from_slice(&bytes[..n]);
    dst.put_bytes(0, len - n);
}

fn get_fixed(src: &mut Bytes, len: usize) -> Result<String, NodeError> {
    if src.len() < len {
        return Err(NodeError::Protocol("truncated gossip record".into()));
    }
    let raw = src.split_to(len);
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8(raw[..end].to_vec())
        .map_err(|_| NodeError::Protocol("gossip record is not valid utf-8".into()))
}

/// Encodes a single node's gossip identity: fixed-width name/ip, ports, a
/// served-slots bitmap, and the derived slot count.
fn encode_node_record(dst: &mut BytesMut, identity: &NodeIdentity, served_slots: &[bool]) {
    put_fixed(dst, &identity.name, NAME_LEN);
    put_fixed(dst, &identity.ip, IP_LEN);
    dst.put_u16(identity.cluster_port);
    dst.put_u16(identity.client_port);

    let mut bitmap = vec![0u8; BITMAP_LEN];
    let mut count: u32 = 0;
    for (i, &served) in served_slots.iter().enumerate() {
        if served {
            bitmap[i / 8] |= 1 << (i % 8);
            count += 1;
        }
    }
    dst.extend_from_slice(&bitmap);
    dst.put_u32(count);
}

struct NodeRecord {
    identity: NodeIdentity,
    served_slots: Vec<bool>,
}

fn decode_node_record(src: &mut Bytes) -> Result<NodeRecord, NodeError> {
    let name = get_fixed(src, NAME_LEN)?;
    let ip = get_fixed(src, IP_LEN)?;
    if src.len() < 4 + BITMAP_LEN + 4 {
        return Err(NodeError::Protocol("truncated node record".into()));
    }
    let cluster_port = src.get_u16();
    let client_port = src.get_u16();
    let bitmap = src.split_to(BITMAP_LEN);
    let _num_slots_served = src.get_u32();

    let mut served_slots = vec![false; NUM_SLOTS];
    for i in 0..NUM_SLOTS {
        served_slots[i] = bitmap[i / 8] & (1 << (i % 8)) != 0;
    }

    Ok(NodeRecord {
        identity: NodeIdentity {
            name,
            ip,
            cluster_port,
            client_port,
        },
        served_slots,
    })
}

fn encode_slot_record(dst: &mut BytesMut, slot_number: u16, slot: &Slot) {
    dst.put_u16(slot_number);
    dst.put_u64(slot.amount_of_keys);
    dst.put_u8(match slot.state {
        SlotState::Normal => 0,
        SlotState::Migrating => 1,
        SlotState::Importing => 2,
    });
    put_fixed(dst, slot.migration_partner.as_deref().unwrap_or(""), NAME_LEN);
    put_fixed(dst, slot.served_by.as_deref().unwrap_or(""), NAME_LEN);
}

struct SlotRecord {
    slot_number: u16,
    amount_of_keys: u64,
    state: SlotState,
    migration_partner: Option<String>,
    served_by: Option<String>,
}

fn decode_slot_record(src: &mut Bytes) -> Result<SlotRecord, NodeError> {
    if src.len() < 2 + 8 + 1 {
        return Err(NodeError::Protocol("truncated slot record".into()));
    }
    let slot_number = src.get_u16();
    let amount_of_keys = src.get_u64();
    let state = match src.get_u8() {
        0 => SlotState::Normal,
        1 => SlotState::Migrating,
        2 => SlotState::Importing,
        other => return Err(NodeError::Protocol(format!("unknown slot state {other}"))),
    };
    let migration_partner = get_fixed(src, NAME_LEN)?;
    let served_by = get_fixed(src, NAME_LEN)?;
    Ok(SlotRecord {
        slot_number,
        amount_of_keys,
        state,
        migration_partner: (!migration_partner.is_empty()).then_some(migration_partner),
        served_by: (!served_by.is_empty()).then_some(served_by),
    })
}

/// Picks `ceil(n / 10)` peer names uniformly at random, excluding nobody
/// (the whole node table is eligible).
fn sample_peers(names: &[String]) -> Vec<String> {
    let n = names.len();
    if n == 0 {
        return Vec::new();
    }
    let k = n.div_ceil(10).max(1).min(n);
    let mut rng = rand::thread_rng();
    names.choose_multiple(&mut rng, k).cloned().collect()
}

/// Builds the `(nodes, slots)` payload for one outgoing ping: `myself` plus
/// a random sample of peers, then the full slot table.
pub fn build_ping_payload(state: &NodeState) -> (Bytes, Bytes) {
    let cluster = &state.cluster;
    let names: Vec<String> = cluster.nodes.keys().cloned().collect();
    let sampled = sample_peers(&names);

    let mut nodes = BytesMut::new();
    let myself_served: Vec<bool> = (0..NUM_SLOTS as u16)
        .map(|i| cluster.is_served_locally(i))
        .collect();
    encode_node_record(&mut nodes, &cluster.myself, &myself_served);

    for name in sampled {
        if let Some(entry) = cluster.nodes.get(&name) {
            encode_node_record(&mut nodes, &entry.identity, &entry.served_slots);
        }
    }

    let mut slots = BytesMut::new();
    for (i, slot) in cluster.slots.iter().enumerate() {
        encode_slot_record(&mut slots, i as u16, slot);
    }

    (nodes.freeze(), slots.freeze())
}

/// Applies an incoming ping to local state per the convergence rules: learn
/// unknown nodes (and connect to them lazily, i.e. leave `link: None` for
/// the dispatch task to fill in), refresh known identities, and update slot
/// ownership/migration fields only from the slot's authoritative owner.
pub fn merge_ping(state: &mut NodeState, sender_name: &str, mut nodes: Bytes, mut slots: Bytes) -> Result<(), NodeError> {
    let cluster = &mut state.cluster;

    while !nodes.is_empty() {
        let record = decode_node_record(&mut nodes)?;
        if record.identity.name == cluster.myself.name {
            continue;
        }
        cluster
            .nodes
            .entry(record.identity.name.clone())
            .and_modify(|entry: &mut NodeEntry| {
                entry.identity = record.identity.clone();
                entry.served_slots = record.served_slots.clone();
            })
            .or_insert_with(|| {
                debug!(node = %record.identity.name, "learned new node via gossip");
                let mut entry = NodeEntry::new(record.identity.clone());
                entry.served_slots = record.served_slots.clone();
                entry
            });
    }

    while !slots.is_empty() {
        let record = decode_slot_record(&mut slots)?;
        let idx = record.slot_number as usize;
        if idx >= NUM_SLOTS {
            return Err(NodeError::Protocol("slot number out of range".into()));
        }
        if cluster.is_served_locally(record.slot_number) {
            // The receiver is authoritative for slots it owns.
            continue;
        }

        let slot = &mut cluster.slots[idx];
        if let Some(served_by) = &record.served_by {
            if cluster.nodes.contains_key(served_by) || served_by == &cluster.myself.name {
                slot.served_by = Some(served_by.clone());
            }
        }
        if let Some(partner) = &record.migration_partner {
            if cluster.nodes.contains_key(partner) || partner == &cluster.myself.name {
                slot.migration_partner = Some(partner.clone());
            }
        }

        let is_authoritative = slot.served_by.as_deref() == Some(sender_name);
        if is_authoritative {
            slot.amount_of_keys = record.amount_of_keys;
            slot.state = record.state;
        }
    }

    cluster.part_of_cluster = true;
    Ok(())
}

/// The long-lived gossip task: one round every `PING_INTERVAL` while the
/// node considers itself part of a cluster, racing a shutdown signal.
pub async fn run(node: Arc<Mutex<NodeState>>, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = interval(PING_INTERVAL);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => {
                info!("gossip task shutting down");
                return;
            }
            _ = ticker.tick() => {
                if let Err(e) = run_round(&node).await {
                    warn!(error = %e, "gossip round failed");
                }
            }
        }
    }
}

async fn run_round(node: &Arc<Mutex<NodeState>>) -> Result<(), NodeError> {
    let (myself_name, targets, nodes_payload, slots_payload) = {
        let state = node.lock().await;
        if !state.cluster.part_of_cluster {
            return Ok(());
        }
        let names: Vec<String> = state.cluster.nodes.keys().cloned().collect();
        let targets = sample_peers(&names);
        let (nodes_payload, slots_payload) = build_ping_payload(&state);
        (state.cluster.myself.name.clone(), targets, nodes_payload, slots_payload)
    };

    for target in targets {
        let addr = {
            let state = node.lock().await;
            state.cluster.nodes.get(&target).map(|e| e.identity.cluster_addr())
        };
        let Some(addr) = addr else { continue };

        let message = Message::ClusterPing {
            sender_name: myself_name.clone(),
            nodes: nodes_payload.clone(),
            slots: slots_payload.clone(),
        };
        if let Err(e) = send_cluster_message(&addr, message).await {
            debug!(peer = %target, error = %e, "gossip ping failed, will retry next round");
        }
    }
    Ok(())
}

/// Opens a short-lived connection to `addr` on the cluster channel and
/// sends a single framed message, without waiting for a reply. Used both
/// for gossip pings and for one-off cluster-channel notifications such as
/// `CLUSTER_MIGRATION_FINISHED`.
pub async fn send_cluster_message(addr: &str, message: Message) -> Result<(), NodeError> {
    use tokio_util::codec::Encoder;

    let stream = tokio::time::timeout(Duration::from_millis(500), tokio::net::TcpStream::connect(addr))
        .await
        .map_err(|_| NodeError::Protocol("gossip connect timed out".into()))??;
    let mut codec = FrameCodec;
    let mut buf = BytesMut::new();
    codec.encode(message.into(), &mut buf)?;

    use tokio::io::AsyncWriteExt;
    let mut stream = stream;
    stream.write_all(&buf).await?;
    Ok(())
}
