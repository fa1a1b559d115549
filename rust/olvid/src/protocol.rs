//! Wire frames for the daemon protocol.
//!
//! The daemon speaks newline-delimited JSON over a single TCP connection.
//! Every client-to-daemon frame carries the call id and the client key; the
//! daemon answers unary calls with a single `result` or `error` frame, and
//! server streams with zero or more `item` frames followed by a `done`
//! frame (or an `error` frame, which terminates the call).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A frame sent from the client to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum ClientFrame {
    /// Opens a unary call or a server-streaming subscription.
    Call {
        /// Call id, unique per connection.
        id: u64,
        /// Method name, e.g. `MessageSend` or `SubscribeToMessageReceived`.
        method: String,
        /// Client key metadata, attached to every call.
        #[serde(rename = "daemon-client-key")]
        client_key: String,
        /// Method parameters.
        #[serde(default, skip_serializing_if = "Value::is_null")]
        params: Value,
    },
    /// Cancels an open server stream.
    Cancel {
        /// Call id of the stream to cancel.
        id: u64,
        /// Always true; distinguishes the frame shape on the wire.
        cancel: bool,
    },
}

impl ClientFrame {
    pub(crate) fn cancel(id: u64) -> Self {
        ClientFrame::Cancel { id, cancel: true }
    }
}

/// A frame sent from the daemon to the client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct ServerFrame {
    /// Call id this frame answers.
    pub id: u64,
    /// Unary call result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// One element of a server stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<Value>,
    /// Daemon-side error; terminates the call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Clean end of a server stream.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub done: bool,
}

impl ServerFrame {
    pub(crate) fn result(id: u64, result: Value) -> Self {
        ServerFrame {
            id,
            result: Some(result),
            ..Default::default()
        }
    }

    pub(crate) fn item(id: u64, item: Value) -> Self {
        ServerFrame {
            id,
            item: Some(item),
            ..Default::default()
        }
    }

    pub(crate) fn error(id: u64, error: impl Into<String>) -> Self {
        ServerFrame {
            id,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub(crate) fn done(id: u64) -> Self {
        ServerFrame {
            id,
            done: true,
            ..Default::default()
        }
    }
}
