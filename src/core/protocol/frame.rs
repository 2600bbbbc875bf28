// src/core/protocol/frame.rs

//! The low-level wire shape: header, length-prefixed command arguments, and
//! a raw payload. This is the single source of truth for byte layout; the
//! `Message` type built on top of it is what dispatch and the client
//! actually interpret.

use crate::core::error::NodeError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Fixed size of the header: argc(2) + instruction(1) + pad(1) + command_size(8) + payload_size(8).
pub const HEADER_LEN: usize = 20;

/// Opcodes carried in the header's `instruction` byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Put = 0,
    Get = 1,
    Erase = 2,
    GetResponse = 3,
    OkResponse = 4,
    ErrorResponse = 5,
    ClusterPing = 6,
    Meet = 7,
    Move = 8,
    ImportSlot = 9,
    MigrateSlot = 10,
    Ask = 11,
    NoAskingError = 12,
    ClusterMigrationFinished = 13,
    GetSlots = 14,
}

impl Instruction {
    fn from_u8(v: u8) -> Option<Self> {
        use Instruction::*;
        Some(match v {
            0 => Put,
            1 => Get,
            2 => Erase,
            3 => GetResponse,
            4 => OkResponse,
            5 => ErrorResponse,
            6 => ClusterPing,
            7 => Meet,
            8 => Move,
            9 => ImportSlot,
            10 => MigrateSlot,
            11 => Ask,
            12 => NoAskingError,
            13 => ClusterMigrationFinished,
            14 => GetSlots,
            _ => return None,
        })
    }
}

/// A fully-framed message before it has been interpreted as a `Message`:
/// the opcode, its positional arguments, and the raw payload bytes.
#[derive(Debug, Clone)]
pub struct WireFrame {
    pub instruction: Instruction,
    pub args: Vec<Bytes>,
    pub payload: Bytes,
}

/// A `tokio_util::codec` implementation for `WireFrame`s, mirroring the way
/// the teacher separates "parse the wire shape" from "interpret it as a
/// typed command."
#[derive(Debug, Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = WireFrame;
    type Error = NodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<WireFrame>, NodeError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut header = &src[..HEADER_LEN];
        let argc = header.get_u16();
        let instruction_byte = header.get_u8();
        let _pad = header.get_u8();
        let command_size = header.get_u64();
        let payload_size = header.get_u64();

        let instruction = Instruction::from_u8(instruction_byte)
            .ok_or_else(|| NodeError::Protocol(format!("unknown instruction {instruction_byte}")))?;

        let total_len = HEADER_LEN as u64 + command_size + payload_size;
        let total_len: usize = total_len
            .try_into()
            .map_err(|_| NodeError::Protocol("frame too large".into()))?;
        if src.len() < total_len {
            // Not enough data buffered yet; wait for more to arrive.
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let mut command = src.split_to(command_size as usize);
        let payload = src.split_to(payload_size as usize).freeze();

        let mut args = Vec::with_capacity(argc as usize);
        for _ in 0..argc {
            if command.len() < 8 {
                return Err(NodeError::Protocol(
                    "command region shorter than argc length prefixes".into(),
                ));
            }
            let len = command.get_u64() as usize;
            if command.len() < len {
                return Err(NodeError::Protocol(
                    "command argument length prefix exceeds remaining command bytes".into(),
                ));
            }
            args.push(command.split_to(len).freeze());
        }

        Ok(Some(WireFrame {
            instruction,
            args,
            payload,
        }))
    }
}

impl Encoder<WireFrame> for FrameCodec {
    type Error = NodeError;

    fn encode(&mut self, item: WireFrame, dst: &mut BytesMut) -> Result<(), NodeError> {
        let command_size: u64 = item
            .args
            .iter()
            .map(|a| 8 + a.len() as u64)
            .sum();
        let payload_size = item.payload.len() as u64;

        dst.reserve(HEADER_LEN + command_size as usize + payload_size as usize);
        dst.put_u16(item.args.len() as u16);
        dst.put_u8(item.instruction as u8);
        dst.put_u8(0); // padding
        dst.put_u64(command_size);
        dst.put_u64(payload_size);

        for arg in &item.args {
            dst.put_u64(arg.len() as u64);
            dst.extend_from_slice(arg);
        }
        dst.extend_from_slice(&item.payload);
        Ok(())
    }
}
