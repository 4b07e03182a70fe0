pub mod maker;
pub mod taker;

use crate::error::EngineError;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const WS_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connects with a bounded timeout, translating every failure mode into
/// `EngineError::Connection` so adapters never need to match on
/// `tokio_tungstenite`'s error type directly.
pub(crate) async fn connect_with_timeout(url: &str) -> Result<WsStream, EngineError> {
    match tokio::time::timeout(WS_CONNECT_TIMEOUT, connect_async(url)).await {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(e)) => Err(EngineError::Connection(e.to_string())),
        Err(_) => Err(EngineError::Connection(format!(
            "connect to {url} timed out after {WS_CONNECT_TIMEOUT:?}"
        ))),
    }
}

pub(crate) fn text_of(msg: &Message) -> Option<&str> {
    match msg {
        Message::Text(t) => Some(t),
        _ => None,
    }
}
