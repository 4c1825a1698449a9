//! WebSocket transport.
//!
//! The engine treats the transport as an ordered but unreliable pipe of
//! text frames: any frame may be the last one delivered. The contract the
//! rest of the engine relies on is small — open a socket, send text frames
//! without interleaving, surface incoming text frames and the close — so
//! any conforming WebSocket client would do; this module binds it to
//! `tokio-tungstenite`.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use roswire_types::RosError;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub type WsSink = SplitSink<WsStream, Message>;
pub type WsSource = SplitStream<WsStream>;

/// Open a WebSocket connection and split it into send and receive halves.
///
/// # Errors
///
/// Returns [`RosError::ConnectionFailed`] when the URL is malformed or the
/// server refuses the handshake.
pub async fn connect(url: &str) -> Result<(WsSink, WsSource), RosError> {
    let parsed = Url::parse(url).map_err(|e| RosError::ConnectionFailed(format!("{url}: {e}")))?;

    let (stream, response) = connect_async(parsed.as_str())
        .await
        .map_err(|e| RosError::ConnectionFailed(format!("{url}: {e}")))?;
    debug!(%url, status = %response.status(), "websocket handshake complete");

    Ok(stream.split())
}

/// Send one text frame.
pub async fn send_text(sink: &mut WsSink, text: String) -> Result<(), RosError> {
    sink.send(Message::Text(text.into()))
        .await
        .map_err(|e| RosError::ConnectionLost(e.to_string()))
}
