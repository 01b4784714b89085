//! Queue payloads exchanged between request handlers and background workers,
//! plus the async-task status record they write back through the cache.
//!
//! All payloads are JSON objects with `snake_case` field names. `input` is
//! carried verbatim as the string the originating HTTP request supplied.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Prefix of generated async-task references.
pub const ASYNC_REF_PREFIX: &str = "atask-";

/// Consumer group shared by all async-task workers.
pub const ASYNC_TASK_GROUP: &str = "atask";

/// Consumer group shared by all parallel-task workers.
pub const PTASK_GROUP: &str = "ptask";

// ---------------------------------------------------------------------------
// Parallel tasks
// ---------------------------------------------------------------------------

/// One unit of fanned-out work, published once per worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerMessage {
    /// Cache key of the owning task (already prefixed).
    pub task_id: String,
    pub worker_id: String,
    #[serde(default)]
    pub input: String,
}

// ---------------------------------------------------------------------------
// Async tasks
// ---------------------------------------------------------------------------

/// Background job handed from the request path to the task's consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncTaskMessage {
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(default)]
    pub input: String,
}

/// Progress of an async task as seen by polling clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AsyncStatus {
    Processing,
    Success,
}

/// Cache record stored under an async-task reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsyncTaskStatus {
    pub status: AsyncStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl AsyncTaskStatus {
    /// Placeholder written when the request is accepted.
    #[must_use]
    pub fn processing() -> Self {
        Self {
            status: AsyncStatus::Processing,
            code: None,
            data: Value::Null,
        }
    }

    /// Final record written by the background handler.
    #[must_use]
    pub fn success(code: u16, data: Value) -> Self {
        Self {
            status: AsyncStatus::Success,
            code: Some(code),
            data,
        }
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.status == AsyncStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn async_message_uses_ref_field() {
        let msg = AsyncTaskMessage {
            reference: "atask-1".into(),
            input: "{\"a\":1}".into(),
        };
        let raw = serde_json::to_value(&msg).unwrap();
        assert_eq!(raw, json!({"ref": "atask-1", "input": "{\"a\":1}"}));
        let back: AsyncTaskMessage = serde_json::from_value(raw).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn processing_status_is_minimal() {
        let raw = serde_json::to_string(&AsyncTaskStatus::processing()).unwrap();
        assert_eq!(raw, r#"{"status":"processing"}"#);
    }

    #[test]
    fn success_status_carries_code_and_data() {
        let status = AsyncTaskStatus::success(200, json!({"id": 7}));
        assert!(status.is_done());
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            json!({"status": "success", "code": 200, "data": {"id": 7}})
        );
    }

    #[test]
    fn worker_message_tolerates_missing_input() {
        let msg: WorkerMessage =
            serde_json::from_str(r#"{"task_id":"ptask-1","worker_id":"w"}"#).unwrap();
        assert_eq!(msg.input, "");
    }
}
