//! Typed views over CDP command results
//!
//! Key design principles:
//! 1. Every field the resolver branches on is an explicit `Option`, never a deep key lookup
//! 2. Parse once at the boundary, then pass typed values around
//! 3. Ignore fields we don't use - CDP adds new ones all the time

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DomError, Result};

/// Frame identifier from CDP
pub type FrameId = String;

/// Target identifier from CDP
pub type TargetId = String;

/// Session identifier from CDP
pub type SessionId = String;

/// Stable DOM node identifier, valid across describe calls
pub type BackendNodeId = u64;

/// Remote object handle (Runtime.RemoteObjectId)
pub type RemoteObjectId = String;

/// DOM node type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum NodeType {
    Element = 1,
    Attribute = 2,
    Text = 3,
    CdataSection = 4,
    EntityReference = 5,
    Entity = 6,
    ProcessingInstruction = 7,
    Comment = 8,
    Document = 9,
    DocumentType = 10,
    DocumentFragment = 11,
    Notation = 12,
}

impl NodeType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(NodeType::Element),
            2 => Some(NodeType::Attribute),
            3 => Some(NodeType::Text),
            4 => Some(NodeType::CdataSection),
            5 => Some(NodeType::EntityReference),
            6 => Some(NodeType::Entity),
            7 => Some(NodeType::ProcessingInstruction),
            8 => Some(NodeType::Comment),
            9 => Some(NodeType::Document),
            10 => Some(NodeType::DocumentType),
            11 => Some(NodeType::DocumentFragment),
            12 => Some(NodeType::Notation),
            _ => None,
        }
    }
}

/// Read `key` out of a command result and deserialize it
fn field<T: serde::de::DeserializeOwned>(result: &Value, key: &'static str) -> Result<T> {
    let value = result.get(key).ok_or(DomError::MissingField(key))?;
    Ok(T::deserialize(value)?)
}

/// Embedded document of a frame owner element (`contentDocument`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentDocument {
    #[serde(default)]
    pub frame_id: Option<FrameId>,
    #[serde(default, rename = "documentURL")]
    pub document_url: Option<String>,
    #[serde(default, rename = "baseURL")]
    pub base_url: Option<String>,
}

/// Node description from DOM.describeNode
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDescription {
    #[serde(default)]
    pub node_id: Option<u64>,
    #[serde(default)]
    pub backend_node_id: Option<BackendNodeId>,
    #[serde(default)]
    pub node_type: Option<u8>,
    #[serde(default)]
    pub node_name: String,
    /// Frame the node belongs to, as reported for frame owner elements
    #[serde(default)]
    pub frame_id: Option<FrameId>,
    #[serde(default)]
    pub content_document: Option<ContentDocument>,
}

impl NodeDescription {
    /// Parse `{"node": {...}}`
    pub fn from_result(result: &Value) -> Result<Self> {
        field(result, "node")
    }

    /// Frame id of the embedded document, if it lives in this process
    pub fn content_frame_id(&self) -> Option<&str> {
        self.content_document.as_ref()?.frame_id.as_deref()
    }

    /// Document URL of the embedded document, preferring `documentURL`
    pub fn content_document_url(&self) -> Option<&str> {
        let doc = self.content_document.as_ref()?;
        doc.document_url.as_deref().or(doc.base_url.as_deref())
    }

    pub fn kind(&self) -> Option<NodeType> {
        self.node_type.and_then(NodeType::from_u8)
    }

    /// True for `<iframe>` and `<frame>`
    pub fn is_frame_owner(&self) -> bool {
        is_frame_owner_tag(&self.node_name)
    }
}

/// True for the tags that embed a document
pub fn is_frame_owner_tag(node_name: &str) -> bool {
    node_name.eq_ignore_ascii_case("iframe") || node_name.eq_ignore_ascii_case("frame")
}

/// Frame entry from Page.getFrameTree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameInfo {
    pub id: FrameId,
    #[serde(default)]
    pub parent_id: Option<FrameId>,
    #[serde(default)]
    pub loader_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: String,
}

/// Result of DOM.getFrameOwner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameOwner {
    pub backend_node_id: BackendNodeId,
    #[serde(default)]
    pub node_id: Option<u64>,
}

impl FrameOwner {
    pub fn from_result(result: &Value) -> Result<Self> {
        Ok(Self::deserialize(result)?)
    }
}

/// Target record from Target.getTargets
///
/// Always treated as possibly stale - never cached across resolution attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    pub target_id: TargetId,
    #[serde(rename = "type")]
    pub target_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub attached: bool,
    #[serde(default)]
    pub parent_frame_id: Option<FrameId>,
    #[serde(default)]
    pub opener_frame_id: Option<FrameId>,
}

impl TargetInfo {
    /// Parse `{"targetInfos": [...]}`
    pub fn list_from_result(result: &Value) -> Result<Vec<Self>> {
        field(result, "targetInfos")
    }

    /// Targets that may host a document (iframe or page)
    pub fn hosts_document(&self) -> bool {
        matches!(self.target_type.as_str(), "iframe" | "page")
    }
}

/// Runtime remote object (only the fields we act on)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    #[serde(rename = "type")]
    pub object_type: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub object_id: Option<RemoteObjectId>,
}

impl RemoteObject {
    /// Parse `{"result": {...}}` from Runtime.evaluate / callFunctionOn
    pub fn from_result(result: &Value) -> Result<Self> {
        field(result, "result")
    }
}

/// Parse `{"executionContextId": N}` from Page.createIsolatedWorld
pub fn execution_context_id(result: &Value) -> Result<i64> {
    field(result, "executionContextId")
}

/// Parse `{"sessionId": "..."}` from Target.attachToTarget
pub fn attached_session_id(result: &Value) -> Result<SessionId> {
    field(result, "sessionId")
}
