// src/server/listener.rs

//! Listener construction with address/port reuse enabled before the socket
//! is bound, so a restarted node doesn't have to wait out `TIME_WAIT`.

use std::net::SocketAddr;

use socket2::{Domain, Socket, Type};
use tokio::net::TcpListener;

use crate::core::error::NodeError;

pub fn bind_reusable(addr: &str) -> Result<TcpListener, NodeError> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| NodeError::InvalidArgument(format!("invalid bind address {addr}: {e}")))?;

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    TcpListener::from_std(socket.into()).map_err(NodeError::from)
}
