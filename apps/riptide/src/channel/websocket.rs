use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};
use url::Url;

use super::{Channel, ChannelError, ChannelSignal};

/// Where to connect and which session cookie to present on the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRequest {
    pub url: Url,
    pub cookie: Option<(String, String)>,
}

impl ChannelRequest {
    pub fn new(url: Url) -> Self {
        Self { url, cookie: None }
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookie = Some((name.into(), value.into()));
        self
    }

    fn into_request(self) -> Result<Request, ChannelError> {
        let mut request = self.url.as_str().into_client_request()?;
        if let Some((name, value)) = &self.cookie {
            let header = HeaderValue::from_str(&format!("{name}={value}"))
                .map_err(|err| ChannelError::Request(err.to_string()))?;
            request.headers_mut().insert(COOKIE, header);
        }
        Ok(request)
    }
}

enum Outgoing {
    Text(String),
    Close,
}

/// WebSocket channel driven by a spawned task. The task owns the socket and
/// only moves text frames between the stream and two unbounded queues.
pub struct WebSocketChannel {
    outbound: mpsc::UnboundedSender<Outgoing>,
    closed: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl WebSocketChannel {
    /// Starts connecting in the background and returns immediately. Must be
    /// called from within a tokio runtime.
    pub fn open(
        request: ChannelRequest,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ChannelSignal>), ChannelError> {
        let target = request.url.clone();
        let request = request.into_request()?;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        debug!(target: "riptide::channel", url = %target, "connecting");
        let task = tokio::spawn(drive(request, outbound_rx, signal_tx, closed.clone()));

        Ok((
            Self {
                outbound: outbound_tx,
                closed,
                task: Some(task),
            },
            signal_rx,
        ))
    }
}

impl Channel for WebSocketChannel {
    fn send_text(&self, text: String) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        self.outbound
            .send(Outgoing::Text(text))
            .map_err(|_| ChannelError::Closed)
    }

    fn close(&self) {
        let _ = self.outbound.send(Outgoing::Close);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for WebSocketChannel {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn drive(
    request: Request,
    mut outbound: mpsc::UnboundedReceiver<Outgoing>,
    signals: mpsc::UnboundedSender<ChannelSignal>,
    closed: Arc<AtomicBool>,
) {
    let stream = match connect_async(request).await {
        Ok((stream, _response)) => stream,
        Err(err) => {
            warn!(target: "riptide::channel", error = %err, "websocket connect failed");
            closed.store(true, Ordering::SeqCst);
            let _ = signals.send(ChannelSignal::Error(err.to_string()));
            let _ = signals.send(ChannelSignal::Closed);
            return;
        }
    };
    info!(target: "riptide::channel", "websocket open");
    if signals.send(ChannelSignal::Open).is_err() {
        return;
    }

    let (mut sink, mut source) = stream.split();
    loop {
        tokio::select! {
            outgoing = outbound.recv() => match outgoing {
                Some(Outgoing::Text(text)) => {
                    trace!(target: "riptide::channel", bytes = text.len(), "sending frame");
                    if let Err(err) = sink.send(Message::Text(text)).await {
                        let _ = signals.send(ChannelSignal::Error(err.to_string()));
                        break;
                    }
                }
                Some(Outgoing::Close) | None => {
                    debug!(target: "riptide::channel", "closing websocket");
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if signals.send(ChannelSignal::Message(text)).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => {
                    let signal = match String::from_utf8(bytes) {
                        Ok(text) => ChannelSignal::Message(text),
                        Err(err) => ChannelSignal::Error(format!("binary frame is not utf-8: {err}")),
                    };
                    if signals.send(signal).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(target: "riptide::channel", ?frame, "server closed websocket");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(target: "riptide::channel", error = %err, "websocket read failed");
                    let _ = signals.send(ChannelSignal::Error(err.to_string()));
                    break;
                }
                None => break,
            },
        }
    }

    closed.store(true, Ordering::SeqCst);
    let _ = signals.send(ChannelSignal::Closed);
    info!(target: "riptide::channel", "websocket closed");
}
