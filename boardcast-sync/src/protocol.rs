//! JSON wire protocol for live tab synchronization.
//!
//! Every frame is one JSON object (or several, newline-separated, when the
//! server coalesces a drain):
//! ```text
//! {"type":"update","tabId":"t2","content":"# Hi"}\n{"type":"rename",...}
//! ```
//!
//! Only `type` is always present. The remaining fields depend on the
//! operation:
//!
//! | type     | direction        | fields            |
//! |----------|------------------|-------------------|
//! | `init`   | server → client  | `tabs`            |
//! | `update` | both             | `tabId`, `content`|
//! | `create` | both             | `tabId`, `name`   |
//! | `rename` | both             | `tabId`, `name`   |
//! | `delete` | both             | `tabId`           |

use serde::{Deserialize, Serialize};

use crate::storage::{HistoryRecord, SnapshotRecord};
use crate::tabs::Tab;

/// Recognized live-sync message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Full tab list sent to a freshly registered connection
    Init,
    /// Replace a tab's content
    Update,
    /// Insert a new, empty tab
    Create,
    /// Replace a tab's name
    Rename,
    /// Remove a tab
    Delete,
}

impl MessageType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "init" => Some(Self::Init),
            "update" => Some(Self::Update),
            "create" => Some(Self::Create),
            "rename" => Some(Self::Rename),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Update => "update",
            Self::Create => "create",
            Self::Rename => "rename",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The wire message shape.
///
/// `msg_type` is kept as a raw string so that frames carrying an
/// unrecognized type still decode and can be rejected with a precise
/// [`ProtocolError::UnknownType`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tabs: Option<Vec<Tab>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<HistoryRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshots: Option<Vec<SnapshotRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl WireMessage {
    fn typed(msg_type: MessageType) -> Self {
        Self {
            msg_type: msg_type.as_str().to_string(),
            ..Self::default()
        }
    }

    /// Create the `init` message carrying the full tab list.
    pub fn init(tabs: Vec<Tab>) -> Self {
        Self {
            tabs: Some(tabs),
            ..Self::typed(MessageType::Init)
        }
    }

    /// The recognized message type, if any.
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::parse(&self.msg_type)
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize a single JSON message.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// A validated client operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Update { tab_id: String, content: String },
    Create { tab_id: String, name: String },
    Rename { tab_id: String, name: String },
    Delete { tab_id: String },
}

impl Operation {
    /// Decode and validate one inbound JSON message.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Self::try_from(WireMessage::decode(text)?)
    }

    pub fn kind(&self) -> MessageType {
        match self {
            Self::Update { .. } => MessageType::Update,
            Self::Create { .. } => MessageType::Create,
            Self::Rename { .. } => MessageType::Rename,
            Self::Delete { .. } => MessageType::Delete,
        }
    }

    pub fn tab_id(&self) -> &str {
        match self {
            Self::Update { tab_id, .. }
            | Self::Create { tab_id, .. }
            | Self::Rename { tab_id, .. }
            | Self::Delete { tab_id } => tab_id,
        }
    }

    pub fn to_message(&self) -> WireMessage {
        let mut msg = WireMessage::typed(self.kind());
        msg.tab_id = Some(self.tab_id().to_string());
        match self {
            Self::Update { content, .. } => msg.content = Some(content.clone()),
            Self::Create { name, .. } | Self::Rename { name, .. } => msg.name = Some(name.clone()),
            Self::Delete { .. } => {}
        }
        msg
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        self.to_message().encode()
    }
}

impl TryFrom<WireMessage> for Operation {
    type Error = ProtocolError;

    fn try_from(msg: WireMessage) -> Result<Self, Self::Error> {
        let kind = msg
            .message_type()
            .ok_or_else(|| ProtocolError::UnknownType(msg.msg_type.clone()))?;
        if kind == MessageType::Init {
            return Err(ProtocolError::ServerOnly(kind));
        }

        let tab_id = match msg.tab_id {
            Some(id) if !id.is_empty() => id,
            _ => return Err(ProtocolError::MissingField { kind, field: "tabId" }),
        };

        let op = match kind {
            MessageType::Update => Self::Update {
                tab_id,
                content: msg.content.unwrap_or_default(),
            },
            MessageType::Create => Self::Create {
                tab_id,
                name: msg.name.unwrap_or_default(),
            },
            MessageType::Rename => Self::Rename {
                tab_id,
                name: msg.name.ok_or(ProtocolError::MissingField { kind, field: "name" })?,
            },
            MessageType::Delete => Self::Delete { tab_id },
            MessageType::Init => return Err(ProtocolError::ServerOnly(kind)),
        };
        Ok(op)
    }
}

/// Split a transport frame into its newline-separated JSON messages.
///
/// Blank lines (and a trailing `\r`) are skipped.
pub fn split_frame(frame: &str) -> impl Iterator<Item = &str> {
    frame
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.trim().is_empty())
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(String),
    #[error("Unrecognized message type `{0}`")]
    UnknownType(String),
    #[error("`{field}` is required for `{kind}` messages")]
    MissingField { kind: MessageType, field: &'static str },
    #[error("`{0}` messages are only sent by the server")]
    ServerOnly(MessageType),
    #[error("Serialization error: {0}")]
    SerializationError(String),
}
