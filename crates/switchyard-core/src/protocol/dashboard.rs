//! Dashboard broadcast frames.
//!
//! Two shapes exist on the wire, kept for compatibility with the browser
//! client:
//!
//! - **flat**: payload fields sit beside `type` and `timestamp`
//!   (`ssh_log`, `cert_progress`, `frpc_control_result`, `log_data`)
//! - **wrapped**: payload sits under `data`
//!   (`server_status_update`, `client_update_progress`, …)

use serde_json::{Map, Value};

/// Payload layout of a [`DashboardFrame`].
#[derive(Clone, Debug, PartialEq)]
pub enum FrameBody {
    /// Fields merged into the top-level object.
    Flat(Map<String, Value>),
    /// Value placed under `data`.
    Wrapped(Value),
}

/// One frame broadcast to dashboards (or log viewers).
#[derive(Clone, Debug, PartialEq)]
pub struct DashboardFrame {
    /// Wire `type`.
    pub frame_type: &'static str,
    /// Unix milliseconds.
    pub timestamp: i64,
    /// Payload.
    pub body: FrameBody,
}

impl DashboardFrame {
    /// Frame whose fields sit at the top level. Non-object values are wrapped.
    pub fn flat(frame_type: &'static str, timestamp: i64, fields: Value) -> Self {
        let body = match fields {
            Value::Object(map) => FrameBody::Flat(map),
            other => FrameBody::Wrapped(other),
        };
        Self {
            frame_type,
            timestamp,
            body,
        }
    }

    /// Frame whose payload sits under `data`.
    pub fn wrapped(frame_type: &'static str, timestamp: i64, data: Value) -> Self {
        Self {
            frame_type,
            timestamp,
            body: FrameBody::Wrapped(data),
        }
    }

    /// Build the JSON object sent on the socket.
    pub fn to_value(&self) -> Value {
        let mut out = Map::new();
        let _ = out.insert("type".into(), Value::from(self.frame_type));
        match &self.body {
            FrameBody::Flat(fields) => {
                for (k, v) in fields {
                    let _ = out.insert(k.clone(), v.clone());
                }
            }
            FrameBody::Wrapped(data) => {
                let _ = out.insert("data".into(), data.clone());
            }
        }
        let _ = out.insert("timestamp".into(), Value::from(self.timestamp));
        Value::Object(out)
    }

    /// Serialize to JSON text.
    pub fn to_json(&self) -> String {
        self.to_value().to_string()
    }
}
