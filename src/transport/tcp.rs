//! TCP connect and bind.

use tokio::net::{TcpListener, TcpStream};

use super::endpoint::Endpoint;
use crate::error::{Result, XicError};

/// Connect to an endpoint with Nagle disabled.
pub async fn connect(endpoint: &Endpoint) -> Result<TcpStream> {
    let stream = TcpStream::connect((endpoint.connect_host(), endpoint.port()))
        .await
        .map_err(|e| XicError::ConnectFailed(format!("{}: {}", endpoint, e)))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Bind a listener for an endpoint.
pub async fn bind(endpoint: &Endpoint) -> Result<TcpListener> {
    TcpListener::bind((endpoint.bind_host(), endpoint.port()))
        .await
        .map_err(|e| XicError::ConnectFailed(format!("bind {}: {}", endpoint, e)))
}
