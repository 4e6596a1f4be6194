//! Runtime configuration.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default limit on nested guest invocations per call chain.
pub const DEFAULT_MAX_CALL_DEPTH: u32 = 256;

/// Knobs shared by every store created from one [`Engine`](crate::Engine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Maximum nesting of guest invocations (host → guest → host → guest …).
    pub max_call_depth: u32,
    /// Attach a call-chain frame snapshot to every trap record.
    pub capture_frames: bool,
    /// Cache call plans of static accessors per instance and export.
    pub cache_plans: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            capture_frames: true,
            cache_plans: true,
        }
    }
}

impl RuntimeConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(source: &str) -> Result<Self> {
        Ok(serde_json::from_str(source)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = RuntimeConfig::from_json("{}").unwrap();
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn partial_document_overrides_fields() {
        let config = RuntimeConfig::from_json(r#"{ "max_call_depth": 8, "cache_plans": false }"#)
            .unwrap();
        assert_eq!(config.max_call_depth, 8);
        assert!(!config.cache_plans);
        assert!(config.capture_frames);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = RuntimeConfig::from_json(r#"{ "fuel": 10 }"#).unwrap_err();
        assert!(err.to_string().contains("unknown field"));
    }
}
