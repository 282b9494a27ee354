//! Engine configuration that the binary and embedders can serialize/deserialize.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Auto-field flag for targets opened implicitly by a query registration.
    pub default_auto_field: bool,

    /// Max rounds of loopback re-injection per `send` call.
    pub max_loopback_rounds: usize,

    /// Optional cap on buffered output records per query (oldest dropped first).
    pub output_pool_limit: Option<usize>,

    /// Hex chars of the content fingerprint used in generated type names.
    pub type_name_digest_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_auto_field: true,
            max_loopback_rounds: 16,
            output_pool_limit: None,
            type_name_digest_len: 16,
        }
    }
}

impl EngineConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `STRATA_DEFAULT_AUTO_FIELD`: `true`/`false`
    /// - `STRATA_MAX_LOOPBACK_ROUNDS`: loopback rounds per send
    /// - `STRATA_OUTPUT_POOL_LIMIT`: per-query output buffer cap
    /// - `STRATA_TYPE_NAME_DIGEST_LEN`: digest length in generated type names
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Same as `from_env`, reading through `lookup` (testable without touching
    /// the process environment).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(s) = lookup("STRATA_DEFAULT_AUTO_FIELD") {
            if let Ok(v) = s.trim().parse::<bool>() {
                cfg.default_auto_field = v;
            }
        }

        if let Some(s) = lookup("STRATA_MAX_LOOPBACK_ROUNDS") {
            if let Ok(v) = s.trim().parse::<usize>() {
                cfg.max_loopback_rounds = v;
            }
        }

        if let Some(s) = lookup("STRATA_OUTPUT_POOL_LIMIT") {
            if let Ok(v) = s.trim().parse::<usize>() {
                cfg.output_pool_limit = Some(v);
            }
        }

        if let Some(s) = lookup("STRATA_TYPE_NAME_DIGEST_LEN") {
            if let Ok(v) = s.trim().parse::<usize>() {
                cfg.type_name_digest_len = v;
            }
        }

        cfg.normalized()
    }

    /// Clamp values into their supported ranges.
    pub fn normalized(mut self) -> Self {
        self.type_name_digest_len = self.type_name_digest_len.clamp(8, 64);
        self
    }
}
