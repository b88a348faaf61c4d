//! Inbound request shapes.

use serde::{Deserialize, Serialize};

/// One inbound unit of work, resolved to its concrete shape at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboundRequest {
    /// A free-form message from a user.
    Message {
        caller_id: String,
        chat_id: i64,
        text: String,
    },
    /// A button press or other callback carrying an opaque payload.
    Callback {
        caller_id: String,
        query_id: String,
        data: String,
    },
}

impl InboundRequest {
    pub fn caller_id(&self) -> &str {
        match self {
            InboundRequest::Message { caller_id, .. } => caller_id,
            InboundRequest::Callback { caller_id, .. } => caller_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InboundRequest::Message { .. } => "message",
            InboundRequest::Callback { .. } => "callback",
        }
    }
}
