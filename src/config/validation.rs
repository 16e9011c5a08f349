use std::collections::HashSet;

use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_upstream(config)?;
    validate_models(config)?;
    validate_client_auth(config)?;
    validate_log_level(config)?;
    validate_sampling_defaults(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.http_pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "server.http_pool_max_idle_per_host must be greater than 0",
        ));
    }
    if server.max_concurrent_upstream_requests == 0 {
        return Err(validation_err(
            "server.max_concurrent_upstream_requests must be greater than 0",
        ));
    }
    if server.runtime_worker_threads == Some(0) {
        return Err(validation_err(
            "server.runtime_worker_threads must be greater than 0 when set",
        ));
    }
    if server.runtime_max_blocking_threads == Some(0) {
        return Err(validation_err(
            "server.runtime_max_blocking_threads must be greater than 0 when set",
        ));
    }
    Ok(())
}

fn validate_upstream(config: &AppConfig) -> Result<(), ConfigError> {
    let upstream = &config.upstream;
    if upstream.endpoints.is_empty() {
        return Err(validation_err("upstream.endpoints cannot be empty"));
    }
    for endpoint in &upstream.endpoints {
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(validation_err(format!(
                "upstream endpoint '{endpoint}' must start with http:// or https://"
            )));
        }
        if url::Url::parse(endpoint).is_err() {
            return Err(validation_err(format!(
                "upstream endpoint '{endpoint}' is not a valid URL"
            )));
        }
    }

    let has_inline_action = upstream
        .next_action
        .as_deref()
        .is_some_and(|value| !value.trim().is_empty());
    let has_action_file = upstream
        .next_action_file
        .as_deref()
        .is_some_and(|value| !value.trim().is_empty());
    if !has_inline_action && !has_action_file {
        return Err(validation_err(
            "upstream.next_action or upstream.next_action_file is required",
        ));
    }

    if let Some(proxy) = upstream.proxy.as_deref() {
        let valid_scheme = ["http://", "https://", "socks5://", "socks5h://"]
            .iter()
            .any(|scheme| proxy.starts_with(scheme));
        if !valid_scheme {
            return Err(validation_err(format!(
                "upstream.proxy '{proxy}' must use http, https, socks5 or socks5h"
            )));
        }
    }
    Ok(())
}

fn validate_models(config: &AppConfig) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for model in &config.models {
        if model.name.trim().is_empty() {
            return Err(validation_err("models contains an entry with an empty name"));
        }
        if model.upstream_model.trim().is_empty() {
            return Err(validation_err(format!(
                "model '{}': upstream_model cannot be empty",
                model.name
            )));
        }
        if !seen.insert(model.name.as_str()) {
            return Err(validation_err(format!(
                "model '{}' is listed more than once",
                model.name
            )));
        }
    }
    Ok(())
}

fn validate_client_auth(config: &AppConfig) -> Result<(), ConfigError> {
    let auth = &config.client_authentication;
    if !auth.enabled {
        return Ok(());
    }
    if auth.allowed_keys.is_empty() {
        return Err(validation_err(
            "client_authentication.allowed_keys cannot be empty when enabled",
        ));
    }
    for key in &auth.allowed_keys {
        if key.trim().is_empty() {
            return Err(validation_err(
                "client_authentication.allowed_keys contains an empty key",
            ));
        }
    }
    Ok(())
}

const VALID_LOG_LEVELS: &[&str] = &["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let level = config.features.log_level.to_uppercase();
    if !VALID_LOG_LEVELS.contains(&level.as_str()) {
        return Err(validation_err(format!(
            "features.log_level '{}' must be one of: {}",
            config.features.log_level,
            VALID_LOG_LEVELS.join(", ")
        )));
    }
    Ok(())
}

fn validate_sampling_defaults(config: &AppConfig) -> Result<(), ConfigError> {
    let features = &config.features;
    if !(0.0..=2.0).contains(&features.default_temperature) {
        return Err(validation_err(
            "features.default_temperature must be within 0.0..=2.0",
        ));
    }
    if !(0.0..=1.0).contains(&features.default_top_p) {
        return Err(validation_err(
            "features.default_top_p must be within 0.0..=1.0",
        ));
    }
    Ok(())
}
