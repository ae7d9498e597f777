use std::collections::HashSet;

use super::{AppConfig, ConfigError, VendorConfig};
use crate::protocol::canonical::VendorId;

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_app_section(config)?;
    for vendor in VendorId::ALL {
        validate_vendor(vendor, config.vendors.get(vendor))?;
    }
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.port == 0 {
        return Err(validation_err("server.port must be greater than 0"));
    }
    if server.body_size_limit_bytes == 0 {
        return Err(validation_err(
            "server.body_size_limit_bytes must be greater than 0",
        ));
    }
    if server.timeout == 0 {
        return Err(validation_err("server.timeout must be greater than 0"));
    }
    if let Some(worker_threads) = server.runtime_worker_threads {
        if worker_threads == 0 {
            return Err(validation_err(
                "server.runtime_worker_threads must be greater than 0 when set",
            ));
        }
    }
    let base_path = server.base_path.trim();
    if !base_path.is_empty() && !base_path.starts_with('/') {
        return Err(validation_err("server.base_path must start with '/'"));
    }
    Ok(())
}

fn validate_app_section(config: &AppConfig) -> Result<(), ConfigError> {
    if config.app.name.trim().is_empty() {
        return Err(validation_err("app.name cannot be empty"));
    }
    Ok(())
}

fn validate_vendor(vendor: VendorId, cfg: &VendorConfig) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(&cfg.base_url).map_err(|err| {
        validation_err(format!("Vendor '{vendor}': base_url is not a valid URL: {err}"))
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err(format!(
            "Vendor '{vendor}': base_url must start with http:// or https://"
        )));
    }

    for (project, key) in &cfg.projects {
        if project.trim().is_empty() {
            return Err(validation_err(format!(
                "Vendor '{vendor}': project name cannot be empty"
            )));
        }
        if key.trim().is_empty() {
            return Err(validation_err(format!(
                "Vendor '{vendor}': api key for project '{project}' cannot be empty"
            )));
        }
    }

    let mut seen = HashSet::new();
    for model in &cfg.models {
        if model.id.trim().is_empty() {
            return Err(validation_err(format!(
                "Vendor '{vendor}': model id cannot be empty"
            )));
        }
        if !seen.insert(model.id.as_str()) {
            return Err(validation_err(format!(
                "Vendor '{vendor}': duplicate model '{}'",
                model.id
            )));
        }
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}
