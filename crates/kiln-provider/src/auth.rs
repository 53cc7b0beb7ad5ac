//! API key lookup for hosted providers

use kiln_core::{KilnError, Result};
use std::env;

/// Read the API key from `env_name`
///
/// Empty values count as missing.
pub fn resolve_api_key(env_name: &str) -> Result<String> {
    match env::var(env_name) {
        Ok(key) if !key.trim().is_empty() => {
            tracing::debug!("Using API key from {}", env_name);
            Ok(key.trim().to_string())
        }
        _ => Err(KilnError::Auth(format!(
            "No API key found. Set {}=<key> or point provider.api_key_env at another variable.",
            env_name
        ))),
    }
}
