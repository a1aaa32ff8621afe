//! Rendezvous endpoint allocation.

use std::net::TcpListener;

use matcomm_common::Result;

/// Allocate a shared rendezvous endpoint via an ephemeral-port
/// bind-then-release.
///
/// Not collision-proof — another process could grab the port between
/// release and the kernel's bind — but practically reliable on loopback,
/// and it is the only rendezvous mechanism the kernel contract offers.
pub fn allocate_endpoint() -> Result<String> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(format!("tcp://127.0.0.1:{port}"))
}
