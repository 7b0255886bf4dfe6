//! Session lifecycle of one live page.
//!
//! A [`LiveClient`] owns the document, the channel and the event bus. It is
//! driven from a single task: every channel signal and user action is handled
//! to completion before the next one.

use std::collections::HashMap;

use riptide_bus::{BusHost, BusResult, EventBus, Handler, HandlerId, OnceCallback, OnceGate};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::binder::{self, BindReport, UserAction};
use crate::channel::{Channel, ChannelSignal};
use crate::dom::{Document, NodeId, SelectorError};
use crate::patch::{self, BatchReport};
use crate::protocol::{
    self, CHANNEL_OPEN, InboundMessage, Navigate, OutboundMessage, PatchBatch, ServerError, attr, kind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Connecting,
    Open,
    Closed,
}

/// What the outer loop should do with this session once it ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionRequest {
    /// The server lost the session; fetch the page again.
    Reload,
    /// Load another page of the same site.
    Navigate(String),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Selector(#[from] SelectorError),
    #[error("no element matches {0:?}")]
    NoMatch(String),
}

pub struct LiveClient {
    document: Document,
    channel: Box<dyn Channel>,
    bus: EventBus<LiveClient, InboundMessage>,
    once: OnceGate<LiveClient>,
    phase: ConnectionPhase,
    components: HashMap<String, HandlerId>,
    request: Option<SessionRequest>,
}

impl BusHost<InboundMessage> for LiveClient {
    fn bus(&mut self) -> &mut EventBus<Self, InboundMessage> {
        &mut self.bus
    }
}

impl LiveClient {
    pub fn new(document: Document, channel: Box<dyn Channel>) -> Self {
        let mut client = Self {
            document,
            channel,
            bus: EventBus::new(),
            once: OnceGate::new(),
            phase: ConnectionPhase::Connecting,
            components: HashMap::new(),
            request: None,
        };
        client.once(CHANNEL_OPEN, Box::new(LiveClient::install_session_handlers));
        client
    }

    fn install_session_handlers(&mut self) {
        self.bus.on(
            kind::CONNECT_ELEMENT,
            Box::new(|client: &mut LiveClient, message: &InboundMessage| {
                if let InboundMessage::ConnectElement(connect) = message {
                    client.connect_component(&connect.component_id);
                }
            }),
        );
        self.bus.on(
            kind::ERROR,
            Box::new(|client: &mut LiveClient, message: &InboundMessage| {
                if let InboundMessage::Error(err) = message {
                    client.on_server_error(err);
                }
            }),
        );
        self.bus.on(
            kind::NAVIGATE,
            Box::new(|client: &mut LiveClient, message: &InboundMessage| {
                if let InboundMessage::Navigate(navigate) = message {
                    client.on_navigate(navigate);
                }
            }),
        );
        debug!(target: "riptide::session", "session handlers installed");
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    pub fn on(&mut self, name: &str, handler: Handler<LiveClient, InboundMessage>) -> HandlerId {
        self.bus.on(name, handler)
    }

    pub fn off(&mut self, id: HandlerId) -> BusResult<()> {
        self.bus.off(id)
    }

    pub fn handler_count(&self, name: &str) -> usize {
        self.bus.handler_count(name)
    }

    /// Runs `callback` on the first emission of `name`, or right away if
    /// `name` has already fired.
    pub fn once(&mut self, name: &str, callback: OnceCallback<LiveClient>) {
        if let Some(callback) = self.once.on(name, callback) {
            callback(self);
        }
    }

    pub fn handle_signal(&mut self, signal: ChannelSignal) {
        match signal {
            ChannelSignal::Open => self.on_open(),
            ChannelSignal::Message(raw) => {
                self.on_message(&raw);
            }
            ChannelSignal::Error(err) => self.on_error(&err),
            ChannelSignal::Closed => self.on_close(),
        }
    }

    pub fn on_open(&mut self) {
        if self.phase != ConnectionPhase::Connecting {
            debug!(target: "riptide::session", phase = ?self.phase, "ignoring open signal");
            return;
        }
        self.phase = ConnectionPhase::Open;
        info!(target: "riptide::session", "channel open");
        for callback in self.once.emit(CHANNEL_OPEN) {
            callback(self);
        }
    }

    /// Decodes and dispatches one raw inbound payload. Returns how many
    /// handlers ran; malformed payloads are logged and dropped.
    pub fn on_message(&mut self, raw: &str) -> usize {
        if self.phase == ConnectionPhase::Closed {
            debug!(target: "riptide::session", "dropping message received after close");
            return 0;
        }
        match protocol::decode_inbound(raw) {
            Ok(frame) => {
                trace!(target: "riptide::session", kind = %frame.kind, "dispatching message");
                EventBus::emit(self, &frame.kind, &frame.message)
            }
            Err(err) => {
                warn!(target: "riptide::session", error = %err, payload = raw, "dropping malformed message");
                0
            }
        }
    }

    pub fn on_error(&mut self, err: &str) {
        warn!(target: "riptide::session", error = err, "channel error");
    }

    pub fn on_close(&mut self) {
        if self.phase != ConnectionPhase::Closed {
            info!(target: "riptide::session", "channel closed");
        }
        self.phase = ConnectionPhase::Closed;
    }

    fn on_server_error(&mut self, err: &ServerError) {
        error!(target: "riptide::session", message = %err.message, "server reported an error");
        if err.is_session_not_found() {
            info!(target: "riptide::session", "session lost; requesting reload");
            self.request = Some(SessionRequest::Reload);
        }
    }

    fn on_navigate(&mut self, navigate: &Navigate) {
        if navigate.value.is_empty() {
            warn!(target: "riptide::session", component = %navigate.component_id, "navigate without a target");
            return;
        }
        info!(target: "riptide::session", to = %navigate.value, "server requested navigation");
        self.request = Some(SessionRequest::Navigate(navigate.value.clone()));
    }

    /// Binds the component's subtree and, the first time, installs its patch
    /// handler. Returns whether the component root was found.
    pub fn connect_component(&mut self, component_id: &str) -> bool {
        let root = self.component_root(component_id);
        match root {
            Some(root) => {
                let report = binder::connect(&mut self.document, root);
                debug!(
                    target: "riptide::session",
                    component = component_id,
                    bound = report.total(),
                    "component bound"
                );
            }
            None => warn!(
                target: "riptide::session",
                component = component_id,
                "component root not found in document"
            ),
        }

        if !self.components.contains_key(component_id) {
            let owned = component_id.to_string();
            let handler = self.bus.on(
                kind::LIVE_DOM,
                Box::new(move |client: &mut LiveClient, message: &InboundMessage| {
                    if let InboundMessage::LiveDom(batch) = message {
                        client.apply_patch(&owned, batch);
                    }
                }),
            );
            self.components.insert(component_id.to_string(), handler);
        }
        root.is_some()
    }

    pub fn apply_patch(&mut self, component_id: &str, batch: &PatchBatch) -> Option<BatchReport> {
        patch::apply(&mut self.document, component_id, batch)
    }

    pub fn component_root(&self, component_id: &str) -> Option<NodeId> {
        let doc = &self.document;
        doc.descendants(doc.root())
            .into_iter()
            .find(|node| doc.attr(*node, attr::COMPONENT_ID) == Some(component_id))
    }

    pub fn is_component_connected(&self, component_id: &str) -> bool {
        self.components.contains_key(component_id)
    }

    pub fn connected_components(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.components.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Binds anything interactive under every component that is not bound yet.
    pub fn rescan(&mut self) -> BindReport {
        let root = self.document.root();
        binder::connect_children(&mut self.document, root)
    }

    /// Encodes and sends `message`. Failures are logged; returns whether the
    /// frame was handed to the channel.
    pub fn send(&self, message: &OutboundMessage) -> bool {
        let text = match protocol::encode_outbound(message) {
            Ok(text) => text,
            Err(err) => {
                error!(target: "riptide::session", error = %err, "failed to encode message");
                return false;
            }
        };
        match self.channel.send_text(text) {
            Ok(()) => true,
            Err(err) => {
                warn!(target: "riptide::session", error = %err, ?message, "dropping outbound message");
                false
            }
        }
    }

    /// Delivers a user action to `node` and sends what its listeners produce.
    /// Returns how many messages were sent.
    pub fn interact(&mut self, node: NodeId, action: &UserAction) -> usize {
        let messages = binder::fire(&mut self.document, node, action);
        messages.iter().filter(|message| self.send(message)).count()
    }

    pub fn interact_selector(&mut self, selector: &str, action: &UserAction) -> Result<usize, ClientError> {
        let root = self.document.root();
        let node = self
            .document
            .query_selector(root, selector)?
            .ok_or_else(|| ClientError::NoMatch(selector.to_string()))?;
        Ok(self.interact(node, action))
    }

    /// Tells the server every connected component is going away.
    pub fn disconnect_all(&mut self) -> usize {
        self.connected_components()
            .into_iter()
            .filter(|component_id| {
                self.send(&OutboundMessage::Disconnect {
                    component_id: component_id.clone(),
                })
            })
            .count()
    }

    pub fn close(&mut self) {
        self.channel.close();
    }

    pub fn take_request(&mut self) -> Option<SessionRequest> {
        self.request.take()
    }

    pub fn pending_request(&self) -> Option<&SessionRequest> {
        self.request.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RecordingChannel;
    use serde_json::json;
    use std::cell::Cell;
    use std::rc::Rc;

    const PAGE: &str = concat!(
        r#"<html><body>"#,
        r#"<div go-live-component-id="counter" gl-uid="1">"#,
        r#"<span id="count">0</span>"#,
        r#"<button id="inc" go-live-click="Increment" go-live-data-step="1">+</button>"#,
        r#"</div>"#,
        r#"<div go-live-component-id="todo" gl-uid="2"><input id="item" go-live-input="Item"></div>"#,
        r#"</body></html>"#,
    );

    fn client() -> (LiveClient, RecordingChannel) {
        let channel = RecordingChannel::new();
        let client = LiveClient::new(Document::parse(PAGE), Box::new(channel.clone()));
        (client, channel)
    }

    fn open_client() -> (LiveClient, RecordingChannel) {
        let (mut client, channel) = client();
        client.handle_signal(ChannelSignal::Open);
        (client, channel)
    }

    fn find(client: &LiveClient, selector: &str) -> NodeId {
        let doc = client.document();
        doc.query_selector(doc.root(), selector)
            .expect("valid selector")
            .unwrap_or_else(|| panic!("no match for {selector}"))
    }

    fn frame(value: serde_json::Value) -> String {
        value.to_string()
    }

    #[test]
    fn phases_move_forward_only() {
        let (mut client, _) = client();
        assert_eq!(client.phase(), ConnectionPhase::Connecting);
        client.handle_signal(ChannelSignal::Open);
        assert_eq!(client.phase(), ConnectionPhase::Open);
        client.handle_signal(ChannelSignal::Closed);
        assert_eq!(client.phase(), ConnectionPhase::Closed);
        client.handle_signal(ChannelSignal::Open);
        assert_eq!(client.phase(), ConnectionPhase::Closed);
    }

    #[test]
    fn steady_state_handlers_wait_for_open() {
        let (mut client, _) = client();
        let connect = frame(json!({"t": "lce", "cid": "counter"}));

        assert_eq!(client.on_message(&connect), 0);
        assert!(!client.is_component_connected("counter"));

        client.handle_signal(ChannelSignal::Open);
        assert_eq!(client.on_message(&connect), 1);
        assert!(client.is_component_connected("counter"));
        assert!(client.document().is_bound(find(&client, "#inc")));
    }

    #[test]
    fn late_once_subscriber_runs_immediately_and_only_once() {
        let (mut client, _) = open_client();
        let runs = Rc::new(Cell::new(0));

        let counter = runs.clone();
        client.once(
            CHANNEL_OPEN,
            Box::new(move |_: &mut LiveClient| counter.set(counter.get() + 1)),
        );
        assert_eq!(runs.get(), 1);

        client.on_open();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn malformed_message_does_not_block_the_next_one() {
        let (mut client, _) = open_client();
        assert_eq!(client.on_message("{not json"), 0);
        assert_eq!(client.on_message(r#"{"cid":"counter"}"#), 0);
        assert_eq!(client.on_message(&frame(json!({"t": "lce", "cid": "counter"}))), 1);
        assert!(client.is_component_connected("counter"));
    }

    #[test]
    fn repeated_connect_installs_one_patch_handler() {
        let (mut client, _) = open_client();
        let connect = frame(json!({"t": "lce", "cid": "counter"}));
        client.on_message(&connect);
        client.on_message(&connect);
        assert_eq!(client.handler_count(kind::LIVE_DOM), 1);

        let inc = find(&client, "#inc");
        assert_eq!(client.document().listeners(inc).len(), 1);
    }

    #[test]
    fn patches_apply_only_to_their_component() {
        let (mut client, _) = open_client();
        client.on_message(&frame(json!({"t": "lce", "cid": "counter"})));
        client.on_message(&frame(json!({"t": "lce", "cid": "todo"})));

        let patch = frame(json!({
            "t": "ld",
            "cid": "counter",
            "i": [{"t": "2", "s": "div[gl-uid=\"1\"] span", "c": "1"}]
        }));
        assert_eq!(client.on_message(&patch), 2);
        let count = find(&client, "#count");
        assert_eq!(client.document().text_content(count), "1");

        let stray = frame(json!({
            "t": "ld",
            "cid": "nobody",
            "i": [{"t": "1", "s": "#count"}]
        }));
        client.on_message(&stray);
        assert!(client.document().is_attached(count));
    }

    #[test]
    fn only_session_not_found_requests_reload() {
        let (mut client, _) = open_client();
        client.on_message(&frame(json!({"t": "le", "m": "component_not_found"})));
        assert_eq!(client.take_request(), None);

        client.on_message(&frame(json!({"t": "le", "m": "session_not_found"})));
        assert_eq!(client.take_request(), Some(SessionRequest::Reload));
        assert_eq!(client.take_request(), None);
    }

    #[test]
    fn navigate_requests_another_page() {
        let (mut client, _) = open_client();
        client.on_message(&frame(json!({"t": "ln", "cid": "counter", "value": "/todo"})));
        assert_eq!(
            client.pending_request(),
            Some(&SessionRequest::Navigate("/todo".into()))
        );
    }

    #[test]
    fn clicks_are_sent_as_invoke_method() {
        let (mut client, channel) = open_client();
        client.on_message(&frame(json!({"t": "lce", "cid": "counter"})));

        let sent = client
            .interact_selector("#inc", &UserAction::Click)
            .expect("button exists");
        assert_eq!(sent, 1);
        assert_eq!(
            channel.sent_json(),
            [json!({
                "name": "lm",
                "component_id": "counter",
                "method_name": "Increment",
                "method_data": {"step": "1"}
            })]
        );
    }

    #[test]
    fn sends_after_close_are_dropped() {
        let (mut client, channel) = open_client();
        client.on_message(&frame(json!({"t": "lce", "cid": "todo"})));
        channel.close();
        client.handle_signal(ChannelSignal::Closed);

        let sent = client
            .interact_selector("#item", &UserAction::Input { value: "milk".into() })
            .expect("input exists");
        assert_eq!(sent, 0);
        assert!(channel.sent().is_empty());
        assert_eq!(client.on_message(&frame(json!({"t": "lce", "cid": "counter"}))), 0);
    }

    #[test]
    fn interacting_with_missing_element_is_an_error() {
        let (mut client, _) = open_client();
        assert!(matches!(
            client.interact_selector("#nope", &UserAction::Click),
            Err(ClientError::NoMatch(_))
        ));
        assert!(matches!(
            client.interact_selector("[", &UserAction::Click),
            Err(ClientError::Selector(_))
        ));
    }

    #[test]
    fn disconnect_all_announces_each_component() {
        let (mut client, channel) = open_client();
        client.on_message(&frame(json!({"t": "lce", "cid": "todo"})));
        client.on_message(&frame(json!({"t": "lce", "cid": "counter"})));

        assert_eq!(client.disconnect_all(), 2);
        assert_eq!(
            channel.sent_json(),
            [
                json!({"name": "lx", "component_id": "counter"}),
                json!({"name": "lx", "component_id": "todo"}),
            ]
        );
    }

    #[test]
    fn custom_handlers_can_be_removed() {
        let (mut client, _) = open_client();
        let seen = Rc::new(Cell::new(0));
        let counter = seen.clone();
        let id = client.on(
            "custom",
            Box::new(move |_: &mut LiveClient, _: &InboundMessage| counter.set(counter.get() + 1)),
        );

        assert_eq!(client.on_message(r#"{"t":"custom"}"#), 1);
        client.off(id).expect("registered");
        assert_eq!(client.on_message(r#"{"t":"custom"}"#), 0);
        assert_eq!(seen.get(), 1);
    }
}
