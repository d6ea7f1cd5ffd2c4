//! Named-event wire protocol.
//!
//! Every event is one WebSocket text frame holding a JSON object:
//! ```text
//! { "event": "text-change", "data": { "documentId": "doc1", "newText": "Hello" } }
//! ```
//!
//! | Direction      | Event                   | Data                                   |
//! |----------------|-------------------------|----------------------------------------|
//! | client → core  | `join-document`         | `{documentId, identity}` or `"docId"`  |
//! | client → core  | `text-change`           | `{documentId, newText}`                |
//! | client → core  | `cursor-change`         | `{documentId, position, identity}`     |
//! | core → clients | `update-user-list`      | `[identity, …]`                        |
//! | core → clients | `receive-change`        | `"newText"`                            |
//! | core → clients | `receive-cursor-change` | `{position, identity}`                 |
//! | core → clients | `clear-cursor`          | `{identityId}`                         |

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Participant descriptor supplied by the caller. Never verified here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Stable id, used for roster dedup.
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Avatar reference (URL or opaque key).
    #[serde(default)]
    pub image_ref: String,
}

impl Identity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            image_ref: String::new(),
        }
    }

    pub fn with_image(mut self, image_ref: impl Into<String>) -> Self {
        self.image_ref = image_ref.into();
        self
    }

    /// Placeholder identity for joins that carry none.
    pub fn anonymous(id: impl Into<String>) -> Self {
        Self::new(id, "Anonymous")
    }
}

/// `join-document` payload.
///
/// Early clients sent only the document id as a bare string; both shapes
/// are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JoinPayload {
    Document(JoinDocument),
    Legacy(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinDocument {
    #[serde(default)]
    pub document_id: String,
    pub identity: Identity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextChange {
    #[serde(default)]
    pub document_id: String,
    /// Full buffer content, not a delta.
    pub new_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorChange {
    #[serde(default)]
    pub document_id: String,
    pub position: i64,
    pub identity: Identity,
}

/// Events a client sends to the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinDocument(JoinPayload),
    TextChange(TextChange),
    CursorChange(CursorChange),
}

impl ClientEvent {
    pub fn join(document_id: impl Into<String>, identity: Identity) -> Self {
        Self::JoinDocument(JoinPayload::Document(JoinDocument {
            document_id: document_id.into(),
            identity,
        }))
    }

    pub fn text_change(document_id: impl Into<String>, new_text: impl Into<String>) -> Self {
        Self::TextChange(TextChange {
            document_id: document_id.into(),
            new_text: new_text.into(),
        })
    }

    pub fn cursor_change(document_id: impl Into<String>, position: i64, identity: Identity) -> Self {
        Self::CursorChange(CursorChange {
            document_id: document_id.into(),
            position,
            identity,
        })
    }

    /// Wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinDocument(_) => "join-document",
            Self::TextChange(_) => "text-change",
            Self::CursorChange(_) => "cursor-change",
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(frame).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

/// Cursor position relayed to the other members of a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorUpdate {
    pub position: i64,
    pub identity: Identity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorCleared {
    pub identity_id: String,
}

/// Events the core pushes to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Full roster of the room, never a diff.
    UpdateUserList(Vec<Identity>),
    ReceiveChange(String),
    ReceiveCursorChange(CursorUpdate),
    /// Only emitted when cursor clearing on leave is enabled.
    ClearCursor(CursorCleared),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::UpdateUserList(_) => "update-user-list",
            Self::ReceiveChange(_) => "receive-change",
            Self::ReceiveCursorChange(_) => "receive-cursor-change",
            Self::ClearCursor(_) => "clear-cursor",
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(frame).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Not connected")]
    NotConnected,
}
