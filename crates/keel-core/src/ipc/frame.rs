//! Wire frames exchanged between processes.
//!
//! Every frame is serialized to JSON bytes before it reaches the transport,
//! which gives the receiver a deep copy of the payload and nothing else.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{IpcError, IpcResult};
use crate::process::ProcessId;

/// Opaque token correlating a request with its replies.
pub type CorrelationId = String;

/// Registry lookup: returns every channel with its bindings.
pub const GET_IPC: &str = "get-ipc";
/// Registry insertion of one binding.
pub const ADD_IPC: &str = "add-ipc";
/// Registry removal of one binding.
pub const REMOVE_IPC: &str = "remove-ipc";
/// Tells a process to drop all of its own bindings.
pub const CLEAR_IPC: &str = "clear-ipc";

const REPLY_PREFIX: &str = "r-";
const PROGRESS_PREFIX: &str = "r-cb-";

/// Channel on which the final answer to `channel` travels.
pub fn reply_channel(channel: &str) -> String {
    format!("{REPLY_PREFIX}{channel}")
}

/// Channel on which progress notifications for `channel` travel.
pub fn progress_channel(channel: &str) -> String {
    format!("{PROGRESS_PREFIX}{channel}")
}

/// Classifies a reply channel name.
///
/// Returns the original request channel and whether the reply is a progress
/// notification. `None` for names that are not reply channels.
pub fn parse_reply_channel(name: &str) -> Option<(&str, bool)> {
    if let Some(channel) = name.strip_prefix(PROGRESS_PREFIX) {
        Some((channel, true))
    } else {
        name.strip_prefix(REPLY_PREFIX).map(|channel| (channel, false))
    }
}

/// Correlation record generated for each outbound call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeRequest {
    pub id: CorrelationId,
    pub is_main: bool,
}

impl InvokeRequest {
    pub fn new(is_main: bool) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            is_main,
        }
    }
}

/// A message on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frame {
    /// A call to the handler bound to `channel` in the receiving process.
    Request {
        channel: String,
        sender: ProcessId,
        request: InvokeRequest,
        args: Vec<Value>,
    },
    /// A final answer (`r-<channel>`) or a progress notification (`r-cb-<channel>`).
    Reply {
        channel: String,
        id: CorrelationId,
        result: Value,
    },
    /// A one-way housekeeping notification.
    Notify { channel: String, sender: ProcessId },
}

impl Frame {
    pub fn encode(&self) -> IpcResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| IpcError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> IpcResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| IpcError::Decode(e.to_string()))
    }

    pub fn channel(&self) -> &str {
        match self {
            Self::Request { channel, .. }
            | Self::Reply { channel, .. }
            | Self::Notify { channel, .. } => channel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reply_channel_names() {
        assert_eq!(reply_channel("plugin-call"), "r-plugin-call");
        assert_eq!(progress_channel("plugin-call"), "r-cb-plugin-call");
        assert_eq!(parse_reply_channel("r-cb-x"), Some(("x", true)));
        assert_eq!(parse_reply_channel("r-x"), Some(("x", false)));
        assert_eq!(parse_reply_channel("x"), None);
    }

    #[test]
    fn test_request_ids_are_unique() {
        let a = InvokeRequest::new(true);
        let b = InvokeRequest::new(true);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_frame_wire_shape() {
        let frame = Frame::Request {
            channel: "sum".into(),
            sender: -1,
            request: InvokeRequest {
                id: "abc".into(),
                is_main: true,
            },
            args: vec![json!(1), json!(2)],
        };
        let value: Value = serde_json::from_slice(&frame.encode().unwrap()).unwrap();
        assert_eq!(value["kind"], "request");
        assert_eq!(value["request"]["isMain"], true);
        assert_eq!(value["args"], json!([1, 2]));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            Frame::decode(b"not json"),
            Err(IpcError::Decode(_))
        ));
    }
}
