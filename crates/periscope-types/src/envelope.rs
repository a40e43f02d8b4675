//! Message Envelope
//!
//! The single routed message unit exchanged between a remote app and the
//! host's plugins.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One routed message unit.
///
/// `api` names the plugin the message is addressed to, `method` a
/// plugin-defined event. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Plugin identifier this message is addressed to
    pub api: String,

    /// Plugin-defined event name
    pub method: String,

    /// Opaque payload, interpreted only by the plugin
    #[serde(default)]
    pub params: Value,
}

impl Envelope {
    /// Create a new envelope
    pub fn new(api: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self {
            api: api.into(),
            method: method.into(),
            params,
        }
    }
}
