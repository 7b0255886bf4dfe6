//! Wire messages exchanged with the live server.
//!
//! Keys follow the compact encoding the server emits (`t`, `cid`, `i`, ...);
//! the long spellings are accepted as aliases on input.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Attributes recognised on document elements.
pub mod attr {
    pub const COMPONENT_ID: &str = "go-live-component-id";
    pub const CONNECTED: &str = "go-live-connected";
    pub const CLICK: &str = "go-live-click";
    pub const KEYDOWN: &str = "go-live-keydown";
    pub const INPUT: &str = "go-live-input";
    pub const KEY_FILTER: &str = "go-live-key";
    pub const KEY_FILTER_PREFIX: &str = "go-live-key-";
    pub const DATA_PREFIX: &str = "go-live-data-";
}

/// Message type discriminators.
pub mod kind {
    pub const LIVE_DOM: &str = "ld";
    pub const ERROR: &str = "le";
    pub const CONNECT_ELEMENT: &str = "lce";
    pub const NAVIGATE: &str = "ln";

    pub const INVOKE_METHOD: &str = "lm";
    pub const INPUT_CHANGED: &str = "li";
    pub const DISCONNECT: &str = "lx";
}

/// Once-gate signal fired when the channel opens.
pub const CHANNEL_OPEN: &str = "channel-open";

/// Error code the server reports when it no longer knows this client's session.
pub const SESSION_NOT_FOUND: &str = "session_not_found";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message has no type discriminator")]
    MissingType,
}

/// Decoded inbound message together with the discriminator it arrived under.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    pub kind: String,
    pub message: InboundMessage,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "t")]
pub enum InboundMessage {
    #[serde(rename = "ld")]
    LiveDom(PatchBatch),
    #[serde(rename = "le")]
    Error(ServerError),
    #[serde(rename = "lce")]
    ConnectElement(ConnectElement),
    #[serde(rename = "ln")]
    Navigate(Navigate),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PatchBatch {
    #[serde(rename = "cid", alias = "component_id", default)]
    pub component_id: String,
    #[serde(rename = "i", alias = "instructions", default)]
    pub instructions: Vec<PatchInstruction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServerError {
    #[serde(rename = "m", alias = "message", default)]
    pub message: String,
}

impl ServerError {
    pub fn is_session_not_found(&self) -> bool {
        self.message == SESSION_NOT_FOUND
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConnectElement {
    #[serde(rename = "cid", alias = "component_id")]
    pub component_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Navigate {
    #[serde(rename = "cid", alias = "component_id", default)]
    pub component_id: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PatchInstruction {
    #[serde(rename = "t", alias = "type", default)]
    pub kind: PatchKind,
    #[serde(rename = "s", alias = "selector", default)]
    pub selector: String,
    #[serde(rename = "c", alias = "content", default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(rename = "a", alias = "attr", default, skip_serializing_if = "Option::is_none")]
    pub attr: Option<AttrChange>,
    #[serde(rename = "i", alias = "index", default)]
    pub index: usize,
}

impl PatchInstruction {
    pub fn new(kind: PatchKind, selector: impl Into<String>) -> Self {
        Self {
            kind,
            selector: selector.into(),
            content: None,
            attr: None,
            index: 0,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attr = Some(AttrChange {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AttrChange {
    #[serde(rename = "Name", alias = "name")]
    pub name: String,
    #[serde(rename = "Value", alias = "value", default)]
    pub value: String,
}

/// Mutation kind of a patch instruction.
///
/// The server sends ordinals as strings; numbers and variant names are also
/// accepted. Anything else decodes to [`PatchKind::Unrecognized`] instead of
/// failing the whole message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PatchKind {
    Append,
    Remove,
    SetInnerHtml,
    SetAttr,
    RemoveAttr,
    Replace,
    Move,
    Unrecognized(String),
}

impl Default for PatchKind {
    fn default() -> Self {
        PatchKind::Unrecognized(String::new())
    }
}

impl PatchKind {
    pub fn from_wire(raw: &str) -> Self {
        match raw.trim() {
            "0" | "Append" => PatchKind::Append,
            "1" | "Remove" => PatchKind::Remove,
            "2" | "SetInnerHTML" | "SetInnerHtml" => PatchKind::SetInnerHtml,
            "3" | "SetAttr" => PatchKind::SetAttr,
            "4" | "RemoveAttr" => PatchKind::RemoveAttr,
            "5" | "Replace" => PatchKind::Replace,
            "6" | "Move" => PatchKind::Move,
            other => PatchKind::Unrecognized(other.to_string()),
        }
    }

    pub fn wire_code(&self) -> &str {
        match self {
            PatchKind::Append => "0",
            PatchKind::Remove => "1",
            PatchKind::SetInnerHtml => "2",
            PatchKind::SetAttr => "3",
            PatchKind::RemoveAttr => "4",
            PatchKind::Replace => "5",
            PatchKind::Move => "6",
            PatchKind::Unrecognized(raw) => raw,
        }
    }
}

impl fmt::Display for PatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchKind::Append => f.write_str("Append"),
            PatchKind::Remove => f.write_str("Remove"),
            PatchKind::SetInnerHtml => f.write_str("SetInnerHTML"),
            PatchKind::SetAttr => f.write_str("SetAttr"),
            PatchKind::RemoveAttr => f.write_str("RemoveAttr"),
            PatchKind::Replace => f.write_str("Replace"),
            PatchKind::Move => f.write_str("Move"),
            PatchKind::Unrecognized(raw) => write!(f, "unrecognized({raw:?})"),
        }
    }
}

impl<'de> Deserialize<'de> for PatchKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Code(i64),
            Text(String),
            Other(serde_json::Value),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Code(code) => PatchKind::from_wire(&code.to_string()),
            Raw::Text(text) => PatchKind::from_wire(&text),
            Raw::Other(value) => PatchKind::Unrecognized(value.to_string()),
        })
    }
}

impl Serialize for PatchKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.wire_code())
    }
}

/// Messages sent from the client to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum OutboundMessage {
    #[serde(rename = "lm")]
    InvokeMethod {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        component_id: Option<String>,
        method_name: String,
        method_data: BTreeMap<String, String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        dom_event: Option<DomEvent>,
    },
    #[serde(rename = "li")]
    InputChanged {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        component_id: Option<String>,
        key: String,
        value: String,
    },
    #[serde(rename = "lx")]
    Disconnect { component_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomEvent {
    #[serde(rename = "keyCode")]
    pub key_code: String,
}

/// Parses one raw inbound payload. The discriminator is kept even when it
/// names a message type this client does not model.
pub fn decode_inbound(raw: &str) -> Result<InboundFrame, ProtocolError> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let kind = value
        .get("t")
        .and_then(|t| t.as_str())
        .ok_or(ProtocolError::MissingType)?
        .to_string();
    let message = serde_json::from_value(value)?;
    Ok(InboundFrame { kind, message })
}

pub fn encode_outbound(message: &OutboundMessage) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}
