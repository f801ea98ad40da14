//! QUIC transport layer for CSI messages.
//!
//! [`client::CsiClient`] and [`server::CsiServer`] exchange JSON-encoded
//! [`CsiMessage`] values over QUIC bi-directional streams using `quinn`,
//! one request and one response per stream.

pub mod client;
pub mod server;

use crate::error::CsiError;
use crate::message::CsiMessage;

/// Upper bound on a single encoded message.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Write `msg` to `send` and finish the stream.
async fn write_message(send: &mut quinn::SendStream, msg: &CsiMessage) -> Result<(), CsiError> {
    let payload = serde_json::to_vec(msg).map_err(CsiError::internal)?;
    send.write_all(&payload)
        .await
        .map_err(CsiError::transport)?;
    send.finish().map_err(CsiError::transport)?;
    Ok(())
}

/// Read one message from `recv` until the peer finishes the stream.
async fn read_message(recv: &mut quinn::RecvStream) -> Result<CsiMessage, CsiError> {
    let buf = recv
        .read_to_end(MAX_MESSAGE_SIZE)
        .await
        .map_err(CsiError::transport)?;
    serde_json::from_slice(&buf)
        .map_err(|e| CsiError::Transport(format!("malformed message: {e}")))
}
