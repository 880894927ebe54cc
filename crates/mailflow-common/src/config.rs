//! Configuration for Mailflow

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Routing engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Maximum alias->alias links chased during address resolution.
    /// Exceeding the bound yields an unresolved address, not a crash.
    #[serde(default = "default_max_alias_depth")]
    pub max_alias_depth: u32,

    /// Maximum forward/auto-reply hops before the loop guard refuses to
    /// derive further envelopes.
    #[serde(default = "default_max_hops")]
    pub max_hops: u32,

    /// Bound on a single event handler invocation, in milliseconds.
    #[serde(default = "default_hook_timeout_ms")]
    pub hook_timeout_ms: u64,

    /// Whether local parts are compared case-sensitively. Domains are
    /// always compared case-insensitively.
    #[serde(default)]
    pub case_sensitive_local_parts: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            max_alias_depth: default_max_alias_depth(),
            max_hops: default_max_hops(),
            hook_timeout_ms: default_hook_timeout_ms(),
            case_sensitive_local_parts: false,
        }
    }
}

fn default_max_alias_depth() -> u32 {
    10
}

fn default_max_hops() -> u32 {
    10
}

fn default_hook_timeout_ms() -> u64 {
    5000
}

impl RoutingConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Invalid configuration: {}", e)))
    }
}
