//! Build-time environment for layer commands.
//!
//! The ambient environment is passed in as an explicit snapshot so the
//! result depends only on its inputs.

use std::collections::BTreeMap;

use regex::Regex;

use crate::error::{Result, StratumError};
use crate::layer::Layer;

/// Variable that tells commands which layer they are building.
pub const LAYER_NAME_VAR: &str = "STRATUM_LAYER_NAME";

/// Variables passed through when a layer declares no passthrough list.
pub const DEFAULT_PASSTHROUGH: &[&str] = &[
    "ftp_proxy",
    "http_proxy",
    "https_proxy",
    "no_proxy",
    "FTP_PROXY",
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "NO_PROXY",
    "TERM",
];

/// Snapshot of the process environment, for callers that want the real one.
pub fn process_env() -> BTreeMap<String, String> {
    std::env::vars().collect()
}

/// Keep the variables of `env` whose names fully match one of `patterns`.
pub fn filter_env(
    patterns: &[String],
    env: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>> {
    let matchers = patterns
        .iter()
        .map(|p| {
            Regex::new(&format!("^(?:{})$", p)).map_err(|e| {
                StratumError::ConfigError(format!("Invalid passthrough pattern '{}': {}", p, e))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(env
        .iter()
        .filter(|(key, _)| matchers.iter().any(|m| m.is_match(key)))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect())
}

impl Layer {
    /// Environment for the layer's build commands.
    ///
    /// Filters `snapshot` through `build_env_passthrough` (or
    /// [`DEFAULT_PASSTHROUGH`] when empty), overlays `build_env`, and sets
    /// [`LAYER_NAME_VAR`].
    pub fn build_environment(
        &self,
        name: &str,
        snapshot: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>> {
        let patterns: Vec<String> = if self.build_env_passthrough.is_empty() {
            DEFAULT_PASSTHROUGH.iter().map(|s| s.to_string()).collect()
        } else {
            self.build_env_passthrough.clone()
        };

        let mut env = filter_env(&patterns, snapshot)?;
        for (k, v) in &self.build_env {
            env.insert(k.clone(), v.clone());
        }
        env.insert(LAYER_NAME_VAR.to_string(), name.to_string());
        Ok(env)
    }
}
