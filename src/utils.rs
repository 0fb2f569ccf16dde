// src/utils.rs
use log::debug;
use std::net::SocketAddr;
use crate::query::QueryError;

/// Resolves a `host:port` roster entry to the first address it names.
pub async fn resolve_connection_string(connection: &str) -> Result<SocketAddr, QueryError> {
    let connection = connection.trim();
    if connection.rsplit_once(':').map_or(true, |(host, port)| host.is_empty() || port.is_empty()) {
        return Err(QueryError::Resolve(format!("{:?} is not host:port", connection)));
    }

    if let Ok(addr) = connection.parse::<SocketAddr>() {
        return Ok(addr);
    }

    let mut addrs = tokio::net::lookup_host(connection)
        .await
        .map_err(|e| QueryError::Resolve(format!("{}: {}", connection, e)))?;

    match addrs.next() {
        Some(addr) => {
            debug!("Resolved {} to {}", connection, addr);
            Ok(addr)
        }
        None => Err(QueryError::Resolve(format!("{} has no addresses", connection))),
    }
}
