//! Owner Configuration
//!
//! Settings that change how an owner behaves without changing what its
//! providers compute. Serializable so a host can keep them next to the
//! rest of its configuration.

use serde::{Deserialize, Serialize};

/// When queued notifications are delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushPolicy {
    /// Ask the host through `on_needs_flush` and wait for it to call
    /// `flush`.
    #[default]
    Deferred,

    /// Flush synchronously at the end of every `set`/`modify` that is not
    /// nested inside a flush or an initializer.
    Immediate,
}

/// Configuration for one owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OwnerConfig {
    /// Name used in logs, errors and snapshots.
    pub label: Option<String>,

    pub flush: FlushPolicy,

    /// Catch panics in observers, listeners and disposal callbacks and
    /// send them to the uncaught handler.
    pub isolate_panics: bool,

    /// Render node values with `Debug` in snapshots.
    pub trace_values: bool,
}

impl Default for OwnerConfig {
    fn default() -> Self {
        Self {
            label: None,
            flush: FlushPolicy::Deferred,
            isolate_panics: true,
            trace_values: false,
        }
    }
}

impl OwnerConfig {
    /// Parse a configuration from JSON. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize the configuration to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_isolate_panics_and_defer_flushes() {
        let config = OwnerConfig::default();
        assert_eq!(config.flush, FlushPolicy::Deferred);
        assert!(config.isolate_panics);
        assert!(!config.trace_values);
        assert!(config.label.is_none());
    }

    #[test]
    fn parse_partial_config() {
        let json = r#"{
            "label": "session",
            "flush": "immediate"
        }"#;

        let config = OwnerConfig::from_json(json).unwrap();
        assert_eq!(config.label.as_deref(), Some("session"));
        assert_eq!(config.flush, FlushPolicy::Immediate);
        assert!(config.isolate_panics);
    }

    #[test]
    fn unknown_flush_policy_is_rejected() {
        assert!(OwnerConfig::from_json(r#"{"flush": "eventually"}"#).is_err());
    }

    #[test]
    fn json_round_trip_preserves_fields() {
        let config = OwnerConfig {
            label: Some("root".into()),
            flush: FlushPolicy::Immediate,
            isolate_panics: false,
            trace_values: true,
        };
        let parsed = OwnerConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }
}
