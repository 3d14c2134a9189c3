//! Fallback connection setup through a rendezvous service.

use std::net::SocketAddr;

use crate::{TcpConnection, TransportError};

/// Resolves a target the joiner cannot reach directly (an invite code,
/// a NAT-ed host) to an address it can.
///
/// Only used when the direct connection attempt fails.
pub trait Rendezvous: Send + Sync {
    async fn resolve(&self, target: &str) -> Result<SocketAddr, TransportError>;
}

/// No rendezvous service: the fallback always fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRendezvous;

impl Rendezvous for NoRendezvous {
    async fn resolve(&self, target: &str) -> Result<SocketAddr, TransportError> {
        Err(TransportError::Rendezvous(format!(
            "no rendezvous service to resolve {target}"
        )))
    }
}

/// Connects to `target` directly, asking `rendezvous` for another address
/// if that fails.
pub async fn connect_with_fallback<R: Rendezvous>(
    target: &str,
    rendezvous: &R,
) -> Result<TcpConnection, TransportError> {
    let direct_error = match TcpConnection::connect(target).await {
        Ok(conn) => return Ok(conn),
        Err(e) => e,
    };
    tracing::warn!(target, error = %direct_error, "direct connect failed, trying rendezvous");

    let addr = rendezvous.resolve(target).await.map_err(|e| {
        tracing::warn!(target, error = %e, "rendezvous fallback failed");
        TransportError::ConnectFailed {
            target: target.to_string(),
            source: direct_error,
        }
    })?;

    TcpConnection::connect(addr)
        .await
        .map_err(|source| TransportError::ConnectFailed {
            target: addr.to_string(),
            source,
        })
}
