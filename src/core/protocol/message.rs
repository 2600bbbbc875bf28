// src/core/protocol/message.rs

//! Typed commands and responses, built from the untyped `WireFrame`. This is
//! the layer dispatch and the client actually match on; nothing downstream
//! touches argument indices directly.

use crate::core::error::NodeError;
use bytes::Bytes;

use super::frame::{Instruction, WireFrame};

// Missing or malformed *arguments* (wrong count, wrong type) are
// `InvalidArgument` failures, reported back as an `ERROR_RESPONSE`. Garbled
// bytes that aren't even valid UTF-8 are a `Protocol` failure instead: that
// signals a corrupted stream rather than a miscounted argument, so
// `NodeError::is_transport_failure` routes it to a connection close.

fn arg(args: &[Bytes], idx: usize) -> Result<Bytes, NodeError> {
    args.get(idx)
        .cloned()
        .ok_or_else(|| NodeError::InvalidArgument(format!("missing argument {idx}")))
}

fn arg_str(args: &[Bytes], idx: usize) -> Result<String, NodeError> {
    let b = arg(args, idx)?;
    String::from_utf8(b.to_vec()).map_err(|_| NodeError::Protocol(format!("argument {idx} is not valid utf-8")))
}

fn arg_u16(args: &[Bytes], idx: usize) -> Result<u16, NodeError> {
    arg_str(args, idx)?
        .parse()
        .map_err(|_| NodeError::InvalidArgument(format!("argument {idx} is not a u16")))
}

fn arg_u64(args: &[Bytes], idx: usize) -> Result<u64, NodeError> {
    arg_str(args, idx)?
        .parse()
        .map_err(|_| NodeError::InvalidArgument(format!("argument {idx} is not a u64")))
}

fn arg_bool(args: &[Bytes], idx: usize) -> Result<bool, NodeError> {
    match arg(args, idx)?.as_ref() {
        b"true" => Ok(true),
        b"false" => Ok(false),
        _ => Err(NodeError::InvalidArgument(format!("argument {idx} is not a bool"))),
    }
}

/// One variant per opcode. Requests carry their arguments as typed fields;
/// the store value / gossip payload (if any) rides in a dedicated field
/// rather than the generic `WireFrame::payload`, so a handler never has to
/// re-derive which field means what.
#[derive(Debug, Clone)]
pub enum Message {
    Put {
        key: String,
        offset: u64,
        value: Bytes,
    },
    Get {
        key: String,
        /// Maximum number of bytes requested starting at `offset`; a full
        /// read asks for `u64::MAX` and lets the handler clamp it to the
        /// value's actual remaining length.
        size: u64,
        offset: u64,
        asking: bool,
    },
    Erase {
        key: String,
        asking: bool,
    },
    GetResponse {
        /// Total size of the stored value (not necessarily `value.len()`
        /// when the request only asked for a sub-range).
        total_size: u64,
        offset: u64,
        value: Bytes,
    },
    OkResponse,
    ErrorResponse {
        text: String,
    },
    ClusterPing {
        sender_name: String,
        nodes: Bytes,
        slots: Bytes,
    },
    Meet {
        name: String,
        ip: String,
        cluster_port: u16,
        client_port: u16,
    },
    Move {
        ip: String,
        client_port: u16,
    },
    ImportSlot {
        slot: u16,
        other_ip: String,
        other_client_port: u16,
    },
    MigrateSlot {
        slot: u16,
        other_ip: String,
        other_client_port: u16,
    },
    Ask {
        ip: String,
        client_port: u16,
    },
    NoAskingError {
        ip: String,
        client_port: u16,
    },
    ClusterMigrationFinished {
        slot: u16,
    },
    GetSlots,
}

impl TryFrom<WireFrame> for Message {
    type Error = NodeError;

    fn try_from(frame: WireFrame) -> Result<Self, NodeError> {
        let WireFrame {
            instruction,
            args,
            payload,
        } = frame;

        Ok(match instruction {
            Instruction::Put => Message::Put {
                key: arg_str(&args, 0)?,
                offset: arg_u64(&args, 1)?,
                value: payload,
            },
            Instruction::Get => Message::Get {
                key: arg_str(&args, 0)?,
                size: arg_u64(&args, 1)?,
                offset: arg_u64(&args, 2)?,
                asking: arg_bool(&args, 3)?,
            },
            Instruction::Erase => Message::Erase {
                key: arg_str(&args, 0)?,
                asking: arg_bool(&args, 1)?,
            },
            Instruction::GetResponse => Message::GetResponse {
                total_size: arg_u64(&args, 0)?,
                offset: arg_u64(&args, 1)?,
                value: payload,
            },
            Instruction::OkResponse => Message::OkResponse,
            Instruction::ErrorResponse => Message::ErrorResponse {
                text: String::from_utf8_lossy(&payload).into_owned(),
            },
            Instruction::ClusterPing => Message::ClusterPing {
                sender_name: arg_str(&args, 0)?,
                nodes: arg(&args, 1)?,
                slots: payload,
            },
            Instruction::Meet => Message::Meet {
                name: arg_str(&args, 0)?,
                ip: arg_str(&args, 1)?,
                cluster_port: arg_u16(&args, 2)?,
                client_port: arg_u16(&args, 3)?,
            },
            Instruction::Move => Message::Move {
                ip: arg_str(&args, 0)?,
                client_port: arg_u16(&args, 1)?,
            },
            Instruction::ImportSlot => Message::ImportSlot {
                slot: arg_u16(&args, 0)?,
                other_ip: arg_str(&args, 1)?,
                other_client_port: arg_u16(&args, 2)?,
            },
            Instruction::MigrateSlot => Message::MigrateSlot {
                slot: arg_u16(&args, 0)?,
                other_ip: arg_str(&args, 1)?,
                other_client_port: arg_u16(&args, 2)?,
            },
            Instruction::Ask => Message::Ask {
                ip: arg_str(&args, 0)?,
                client_port: arg_u16(&args, 1)?,
            },
            Instruction::NoAskingError => Message::NoAskingError {
                ip: arg_str(&args, 0)?,
                client_port: arg_u16(&args, 1)?,
            },
            Instruction::ClusterMigrationFinished => Message::ClusterMigrationFinished {
                slot: arg_u16(&args, 0)?,
            },
            Instruction::GetSlots => Message::GetSlots,
        })
    }
}

impl From<Message> for WireFrame {
    fn from(message: Message) -> Self {
        match message {
            Message::Put { key, offset, value } => WireFrame {
                instruction: Instruction::Put,
                args: vec![Bytes::from(key), Bytes::from(offset.to_string())],
                payload: value,
            },
            Message::Get {
                key,
                size,
                offset,
                asking,
            } => WireFrame {
                instruction: Instruction::Get,
                args: vec![
                    Bytes::from(key),
                    Bytes::from(size.to_string()),
                    Bytes::from(offset.to_string()),
                    bool_arg(asking),
                ],
                payload: Bytes::new(),
            },
            Message::Erase { key, asking } => WireFrame {
                instruction: Instruction::Erase,
                args: vec![Bytes::from(key), bool_arg(asking)],
                payload: Bytes::new(),
            },
            Message::GetResponse {
                total_size,
                offset,
                value,
            } => WireFrame {
                instruction: Instruction::GetResponse,
                args: vec![Bytes::from(total_size.to_string()), Bytes::from(offset.to_string())],
                payload: value,
            },
            Message::OkResponse => WireFrame {
                instruction: Instruction::OkResponse,
                args: vec![],
                payload: Bytes::new(),
            },
            Message::ErrorResponse { text } => WireFrame {
                instruction: Instruction::ErrorResponse,
                args: vec![],
                payload: Bytes::from(text),
            },
            Message::ClusterPing {
                sender_name,
                nodes,
                slots,
            } => WireFrame {
                instruction: Instruction::ClusterPing,
                args: vec![Bytes::from(sender_name), nodes],
                payload: slots,
            },
            Message::Meet {
                name,
                ip,
                cluster_port,
                client_port,
            } => WireFrame {
                instruction: Instruction::Meet,
                args: vec![
                    Bytes::from(name),
                    Bytes::from(ip),
                    Bytes::from(cluster_port.to_string()),
                    Bytes::from(client_port.to_string()),
                ],
                payload: Bytes::new(),
            },
            Message::Move { ip, client_port } => WireFrame {
                instruction: Instruction::Move,
                args: vec![Bytes::from(ip), Bytes::from(client_port.to_string())],
                payload: Bytes::new(),
            },
            Message::ImportSlot {
                slot,
                other_ip,
                other_client_port,
            } => WireFrame {
                instruction: Instruction::ImportSlot,
                args: vec![
                    Bytes::from(slot.to_string()),
                    Bytes::from(other_ip),
                    Bytes::from(other_client_port.to_string()),
                ],
                payload: Bytes::new(),
            },
            Message::MigrateSlot {
                slot,
                other_ip,
                other_client_port,
            } => WireFrame {
                instruction: Instruction::MigrateSlot,
                args: vec![
                    Bytes::from(slot.to_string()),
                    Bytes::from(other_ip),
                    Bytes::from(other_client_port.to_string()),
                ],
                payload: Bytes::new(),
            },
            Message::Ask { ip, client_port } => WireFrame {
                instruction: Instruction::Ask,
                args: vec![Bytes::from(ip), Bytes::from(client_port.to_string())],
                payload: Bytes::new(),
            },
            Message::NoAskingError { ip, client_port } => WireFrame {
                instruction: Instruction::NoAskingError,
                args: vec![Bytes::from(ip), Bytes::from(client_port.to_string())],
                payload: Bytes::new(),
            },
            Message::ClusterMigrationFinished { slot } => WireFrame {
                instruction: Instruction::ClusterMigrationFinished,
                args: vec![Bytes::from(slot.to_string())],
                payload: Bytes::new(),
            },
            Message::GetSlots => WireFrame {
                instruction: Instruction::GetSlots,
                args: vec![],
                payload: Bytes::new(),
            },
        }
    }
}

fn bool_arg(b: bool) -> Bytes {
    Bytes::from_static(if b { b"true" } else { b"false" })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_round_trips_through_wire_frame() {
        let msg = Message::Put {
            key: "hello".to_string(),
            offset: 0,
            value: Bytes::from_static(b"world"),
        };
        let frame: WireFrame = msg.into();
        let back = Message::try_from(frame).unwrap();
        match back {
            Message::Put { key, offset, value } => {
                assert_eq!(key, "hello");
                assert_eq!(offset, 0);
                assert_eq!(value, Bytes::from_static(b"world"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn get_round_trips_through_wire_frame() {
        let msg = Message::Get {
            key: "k".to_string(),
            size: u64::MAX,
            offset: 0,
            asking: true,
        };
        let frame: WireFrame = msg.into();
        match Message::try_from(frame).unwrap() {
            Message::Get {
                key,
                size,
                offset,
                asking,
            } => {
                assert_eq!(key, "k");
                assert_eq!(size, u64::MAX);
                assert_eq!(offset, 0);
                assert!(asking);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn get_missing_asking_argument_is_a_protocol_error() {
        let frame = WireFrame {
            instruction: Instruction::Get,
            args: vec![
                Bytes::from_static(b"k"),
                Bytes::from_static(b"0"),
                Bytes::from_static(b"0"),
            ],
            payload: Bytes::new(),
        };
        assert!(Message::try_from(frame).is_err());
    }

    #[test]
    fn missing_required_argument_is_a_protocol_error() {
        let frame = WireFrame {
            instruction: Instruction::Meet,
            args: vec![Bytes::from_static(b"node-a")],
            payload: Bytes::new(),
        };
        assert!(Message::try_from(frame).is_err());
    }
}
