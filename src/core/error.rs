// src/core/error.rs

//! Defines the primary error type for the entire application.

use std::sync::Arc;
use thiserror::Error;

/// The seven-kind status vocabulary carried by every response on the wire.
///
/// `Ok` is never constructed directly as an error; it exists so that callers
/// which need to pattern-match a `StatusKind` (e.g. the client) have a single
/// enum to switch on instead of an `Option<NodeError>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Ok,
    NotFound,
    NotSupported,
    InvalidArgument,
    NotEnoughMemory,
    Error,
    UnknownResponse,
}

/// The main error enum, representing all possible failures within the node.
///
/// `thiserror` gives clean error definitions and automatic `From` impls, the
/// same shape the rest of the Rust ecosystem (and this crate's teacher) use.
#[derive(Error, Debug, Clone)]
pub enum NodeError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("key not found")]
    NotFound,

    #[error("{0}")]
    NotSupported(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("not enough memory: {0}")]
    NotEnoughMemory(String),

    #[error("{0}")]
    Error(String),

    #[error("unknown response from peer: {0}")]
    UnknownResponse(String),
}

impl NodeError {
    /// The status kind a handler should report for this error; dispatch
    /// uses this instead of matching on `NodeError` variants directly so
    /// routing decisions (e.g. "reply ASK only on a not-found") read the
    /// same vocabulary the wire's status kinds describe.
    pub fn kind(&self) -> StatusKind {
        match self {
            NodeError::Io(_) | NodeError::Protocol(_) => StatusKind::Error,
            NodeError::NotFound => StatusKind::NotFound,
            NodeError::NotSupported(_) => StatusKind::NotSupported,
            NodeError::InvalidArgument(_) => StatusKind::InvalidArgument,
            NodeError::NotEnoughMemory(_) => StatusKind::NotEnoughMemory,
            NodeError::Error(_) => StatusKind::Error,
            NodeError::UnknownResponse(_) => StatusKind::UnknownResponse,
        }
    }

    /// The human-readable message to place in an `ERROR_RESPONSE` payload.
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// True if this failure should close the connection rather than produce
    /// an `ERROR_RESPONSE` frame. The connection loop calls this on every
    /// error surfaced while interpreting a frame as a `Message`.
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, NodeError::Io(_) | NodeError::Protocol(_))
    }
}

impl From<std::io::Error> for NodeError {
    fn from(e: std::io::Error) -> Self {
        NodeError::Io(Arc::new(e))
    }
}

pub type Result<T> = std::result::Result<T, NodeError>;
