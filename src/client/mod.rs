// src/client/mod.rs

//! A cluster-aware client: keeps one connection per known node address and a
//! slot→address cache, retrying MOVE/ASK/NO_ASKING_ERROR redirects the way
//! the component design describes. One bounded retry per redirect opcode,
//! mirroring the teacher's `ClusterClient::send_and_receive` pattern.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use rand::seq::IteratorRandom;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use crate::core::cluster::slot::{get_slot, NUM_SLOTS};
use crate::core::error::NodeError;
use crate::core::protocol::{FrameCodec, Message};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const ROUNDTRIP_TIMEOUT: Duration = Duration::from_secs(5);

/// The outcome of a successful `put`/`get`/`erase` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Value(Bytes),
}

pub struct Client {
    connections: HashMap<String, Framed<TcpStream, FrameCodec>>,
    slots: Vec<Option<String>>,
}

impl Client {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
            slots: vec![None; NUM_SLOTS],
        }
    }

    /// Connects to `addr` (if not already connected) and remembers it as a
    /// bootstrap target for keys whose slot owner is still unknown.
    pub async fn connect(&mut self, addr: &str) -> Result<(), NodeError> {
        self.ensure_connection(addr).await?;
        Ok(())
    }

    pub async fn put(&mut self, key: &str, value: Bytes) -> Result<(), NodeError> {
        self.call_with_retry(key, false, |_asking| Message::Put {
            key: key.to_string(),
            offset: 0,
            value: value.clone(),
        })
        .await?;
        Ok(())
    }

    pub async fn get(&mut self, key: &str) -> Result<Bytes, NodeError> {
        self.get_range(key, 0, u64::MAX).await
    }

    /// Reads up to `size` bytes of `key`'s stored value starting at
    /// `offset`, the partial-read form the wire protocol's `GET` carries
    /// alongside the full-read convenience above.
    pub async fn get_range(&mut self, key: &str, offset: u64, size: u64) -> Result<Bytes, NodeError> {
        match self
            .call_with_retry(key, false, |asking| Message::Get {
                key: key.to_string(),
                size,
                offset,
                asking,
            })
            .await?
        {
            Outcome::Value(v) => Ok(v),
            Outcome::Ok => Err(NodeError::UnknownResponse("expected GET_RESPONSE".into())),
        }
    }

    pub async fn erase(&mut self, key: &str) -> Result<(), NodeError> {
        self.call_with_retry(key, false, |asking| Message::Erase {
            key: key.to_string(),
            asking,
        })
        .await?;
        Ok(())
    }

    /// Fetches the slot map from a random connected peer and fills `slots`.
    pub async fn get_update_slot_info(&mut self) -> Result<(), NodeError> {
        let addr = self.random_connected_addr()?;
        let reply = self.send_and_receive(&addr, Message::GetSlots).await?;
        let Message::GetResponse { value, .. } = reply else {
            return Err(NodeError::UnknownResponse("expected GET_RESPONSE for GET_SLOTS".into()));
        };
        let text = String::from_utf8_lossy(&value);
        for line in text.lines() {
            let mut fields = line.splitn(3, '\t');
            let (Some(first), Some(last), Some(owner)) = (fields.next(), fields.next(), fields.next()) else {
                continue;
            };
            let (Ok(first), Ok(last)) = (first.parse::<usize>(), last.parse::<usize>()) else {
                continue;
            };
            let owner = (owner != "NULL").then(|| owner.to_string());
            for slot in first..=last {
                if slot < self.slots.len() {
                    self.slots[slot] = owner.clone();
                }
            }
        }
        Ok(())
    }

    pub async fn add_node_to_cluster(
        &mut self,
        name: &str,
        ip: &str,
        client_port: u16,
        cluster_port: u16,
    ) -> Result<(), NodeError> {
        let addr = self.random_connected_addr()?;
        let reply = self
            .send_and_receive(
                &addr,
                Message::Meet {
                    name: name.to_string(),
                    ip: ip.to_string(),
                    cluster_port,
                    client_port,
                },
            )
            .await?;
        expect_ok(reply)?;
        self.ensure_connection(&format!("{ip}:{client_port}")).await
    }

    pub async fn migrate_slot(&mut self, slot: u16, owner_addr: &str, target_ip: &str, target_client_port: u16) -> Result<(), NodeError> {
        let reply = self
            .send_and_receive(
                owner_addr,
                Message::MigrateSlot {
                    slot,
                    other_ip: target_ip.to_string(),
                    other_client_port: target_client_port,
                },
            )
            .await?;
        expect_ok(reply)
    }

    pub async fn import_slot(&mut self, slot: u16, target_addr: &str, source_ip: &str, source_client_port: u16) -> Result<(), NodeError> {
        let reply = self
            .send_and_receive(
                target_addr,
                Message::ImportSlot {
                    slot,
                    other_ip: source_ip.to_string(),
                    other_client_port: source_client_port,
                },
            )
            .await?;
        expect_ok(reply)
    }

    async fn ensure_connection(&mut self, addr: &str) -> Result<(), NodeError> {
        if self.connections.contains_key(addr) {
            return Ok(());
        }
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| NodeError::Protocol(format!("connect to {addr} timed out")))??;
        stream.set_nodelay(true).ok();
        self.connections.insert(addr.to_string(), Framed::new(stream, FrameCodec));
        Ok(())
    }

    fn random_connected_addr(&self) -> Result<String, NodeError> {
        self.connections
            .keys()
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| NodeError::Protocol("no connections available".into()))
    }

    async fn send_and_receive(&mut self, addr: &str, message: Message) -> Result<Message, NodeError> {
        self.ensure_connection(addr).await?;
        let framed = self
            .connections
            .get_mut(addr)
            .expect("just ensured connection exists");

        tokio::time::timeout(ROUNDTRIP_TIMEOUT, async {
            framed.send(message.into()).await?;
            let frame = framed
                .next()
                .await
                .ok_or_else(|| NodeError::Protocol("connection closed by peer".into()))??;
            Message::try_from(frame)
        })
        .await
        .map_err(|_| NodeError::Protocol(format!("request to {addr} timed out")))?
    }

    /// Sends `build` (with `asking` initially false) against the slot's
    /// known owner, following at most one MOVE redirect (updating the slot
    /// cache) and one ASK/NO_ASKING_ERROR redirect (not updating the cache,
    /// retried with `asking = true` against the named peer specifically).
    async fn call_with_retry(
        &mut self,
        key: &str,
        asking: bool,
        build: impl Fn(bool) -> Message,
    ) -> Result<Outcome, NodeError> {
        let slot = get_slot(&Bytes::from(key.as_bytes().to_vec())) as usize;
        let addr = match &self.slots[slot] {
            Some(addr) => addr.clone(),
            None => self.random_connected_addr()?,
        };

        let reply = self.send_and_receive(&addr, build(asking)).await?;
        self.interpret(reply, slot, build, MAX_REDIRECTS).await
    }

    /// Follows redirects until a terminal reply arrives or `hops_left`
    /// is exhausted. MOVE updates the slot cache (it is a permanent
    /// reassignment); ASK and NO_ASKING_ERROR never do, since both are
    /// only valid for the duration of an in-progress migration.
    fn interpret<'a>(
        &'a mut self,
        reply: Message,
        slot: usize,
        build: impl Fn(bool) -> Message + 'a,
        hops_left: u32,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Outcome, NodeError>> + 'a>> {
        Box::pin(async move {
            if hops_left == 0 {
                return Err(NodeError::Protocol("too many redirects".into()));
            }
            match reply {
                Message::OkResponse => Ok(Outcome::Ok),
                Message::GetResponse { value, .. } => Ok(Outcome::Value(value)),
                Message::ErrorResponse { text } => Err(NodeError::Error(text)),
                Message::Move { ip, client_port } => {
                    let addr = format!("{ip}:{client_port}");
                    self.ensure_connection(&addr).await?;
                    self.slots[slot] = Some(addr.clone());
                    let reply = self.send_and_receive(&addr, build(false)).await?;
                    self.interpret(reply, slot, build, hops_left - 1).await
                }
                Message::Ask { ip, client_port } => {
                    let addr = format!("{ip}:{client_port}");
                    self.ensure_connection(&addr).await?;
                    let reply = self.send_and_receive(&addr, build(true)).await?;
                    self.interpret(reply, slot, build, hops_left - 1).await
                }
                Message::NoAskingError { ip, client_port } => {
                    let addr = format!("{ip}:{client_port}");
                    self.ensure_connection(&addr).await?;
                    let reply = self.send_and_receive(&addr, build(false)).await?;
                    self.interpret(reply, slot, build, hops_left - 1).await
                }
                other => Err(NodeError::UnknownResponse(format!("{other:?}"))),
            }
        })
    }
}

/// Bounds redirect chains so a misbehaving or flapping cluster can't spin a
/// client request forever; a correctly converging cluster resolves any
/// request within a couple of hops.
const MAX_REDIRECTS: u32 = 8;

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

fn expect_ok(message: Message) -> Result<(), NodeError> {
    match message {
        Message::OkResponse => Ok(()),
        Message::ErrorResponse { text } => Err(NodeError::Error(text)),
        other => Err(NodeError::UnknownResponse(format!("{other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_client_has_no_known_slot_owners() {
        let client = Client::new();
        assert!(client.slots.iter().all(Option::is_none));
    }
}
