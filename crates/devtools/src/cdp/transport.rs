//! Transport - the duplex text pipe under a CDP connection
//!
//! The client only needs "a sink of text frames" and "a stream of text frames".
//! A `Connector` produces a fresh pair on every connect, which is what lets the
//! client connect lazily and reconnect once after the pipe dies.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::error::{CDPError, Result};

/// Outgoing half: serialized commands
pub type FrameSink = Pin<Box<dyn Sink<String, Error = CDPError> + Send>>;

/// Incoming half: raw text frames, ends when the peer goes away
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// One live duplex connection
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Transport {
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

/// Opens transports to one protocol endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    /// Endpoint description for logs
    fn endpoint(&self) -> &str;

    /// Open a new transport
    async fn connect(&self) -> Result<Transport>;
}

/// WebSocket connector (the real thing)
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(ws_url: &str) -> Result<Self> {
        let url = Url::parse(ws_url)
            .map_err(|e| CDPError::Config(format!("invalid endpoint {}: {}", ws_url, e)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(CDPError::Config(format!(
                "endpoint must be ws:// or wss://, got {}",
                ws_url
            )));
        }
        Ok(Self {
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn connect(&self) -> Result<Transport> {
        let (ws_stream, _) = connect_async(self.url.as_str()).await?;
        let (sink, stream) = ws_stream.split();

        let sink = sink.with(|text: String| async move { Ok::<_, CDPError>(Message::Text(text)) });

        let stream = stream.filter_map(|msg| async move {
            match msg {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(bytes)) => binary_frame(bytes).map(Ok),
                // Ping/Pong are answered by tungstenite; Close ends the stream
                Ok(_) => None,
                Err(e) => Some(Err(CDPError::from(e))),
            }
        });

        Ok(Transport::new(Box::pin(sink), Box::pin(stream)))
    }
}

/// Binary frames carry the same JSON text; anything else is dropped
fn binary_frame(bytes: Vec<u8>) -> Option<String> {
    match String::from_utf8(bytes) {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::warn!(len = e.as_bytes().len(), error = %e.utf8_error(), "Dropping non-UTF-8 binary frame");
            None
        }
    }
}
