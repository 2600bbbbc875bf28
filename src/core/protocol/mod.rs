// src/core/protocol/mod.rs

//! The framed wire protocol shared by the client channel and the cluster
//! channel: a 20-byte big-endian header, a sequence of length-prefixed
//! command arguments, and a raw payload region.

mod frame;
mod message;

pub use frame::{FrameCodec, Instruction, WireFrame, HEADER_LEN};
pub use message::Message;
