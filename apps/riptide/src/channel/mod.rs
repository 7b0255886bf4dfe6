//! Duplex text channel to the live server.
//!
//! The client only sees [`ChannelSignal`]s coming in and [`Channel::send_text`]
//! going out; framing and handshake stay inside the implementation.

use thiserror::Error;
use tokio_tungstenite::tungstenite;

pub mod loopback;
pub mod websocket;

pub use loopback::RecordingChannel;
pub use websocket::{ChannelRequest, WebSocketChannel};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSignal {
    Open,
    Message(String),
    Error(String),
    Closed,
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel is closed")]
    Closed,
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("invalid channel request: {0}")]
    Request(String),
}

pub trait Channel: Send {
    /// Queues one text frame. Frames sent before the channel opens are
    /// delivered in order once it does.
    fn send_text(&self, text: String) -> Result<(), ChannelError>;

    /// Starts a graceful close; a `Closed` signal follows.
    fn close(&self);

    fn is_closed(&self) -> bool;
}
