use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Declared runtime type of an event parameter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ParameterKind {
    /// Any JSON number.
    Number,
    /// JSON string.
    String,
    /// JSON boolean.
    Boolean,
}

/// Per-parameter declaration inside an event configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ParameterConfig {
    /// Declared type checked by the validator.
    pub kind: ParameterKind,
    /// Whether the parameter must be present on every report.
    pub mandatory: bool,
}

/// Tenant-declared configuration for one event name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EventConfig {
    /// Backend event id.
    pub id: u32,
    /// Whether the analytics component accepts this event.
    pub supported_on_analytics: bool,
    /// Whether the realtime component accepts this event.
    #[serde(rename = "supportedOnRealTime")]
    pub supported_on_realtime: bool,
    /// Declared parameters keyed by normalized parameter name.
    pub parameters: HashMap<String, ParameterConfig>,
}

/// Tenant configuration consumed by the pipeline.
///
/// Built by the out-of-scope configuration-fetch subsystem and treated as
/// read-only here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    /// Tenant account id; scopes storage records and backend endpoints.
    pub tenant_id: u32,
    /// Event configurations keyed by normalized event name.
    pub events: HashMap<String, EventConfig>,
}

impl Configuration {
    /// Look up the configuration for a normalized event name.
    pub fn event_config(&self, name: &str) -> Option<&EventConfig> {
        self.events.get(name)
    }
}
