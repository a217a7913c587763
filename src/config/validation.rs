use super::{AppConfig, ConfigError};

/// Log levels accepted in `features.log_level` (case-insensitive).
pub const VALID_LOG_LEVELS: [&str; 6] = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_upstream_config(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.host.trim().is_empty() {
        return Err(validation_err("server.host cannot be empty"));
    }
    if server.http_pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "server.http_pool_max_idle_per_host must be greater than 0",
        ));
    }
    if server.connect_timeout_secs == 0 {
        return Err(validation_err(
            "server.connect_timeout_secs must be greater than 0",
        ));
    }
    if server.read_timeout_secs == 0 {
        return Err(validation_err(
            "server.read_timeout_secs must be greater than 0",
        ));
    }
    if let Some(worker_threads) = server.runtime_worker_threads {
        if worker_threads == 0 {
            return Err(validation_err(
                "server.runtime_worker_threads must be greater than 0 when set",
            ));
        }
    }
    let base_path = server.base_path.as_str();
    if !base_path.is_empty() && (!base_path.starts_with('/') || base_path.ends_with('/')) {
        return Err(validation_err(
            "server.base_path must start with '/' and must not end with '/'",
        ));
    }
    Ok(())
}

fn validate_upstream_config(config: &AppConfig) -> Result<(), ConfigError> {
    let upstream = &config.upstream;
    if upstream.user_agent.trim().is_empty() {
        return Err(validation_err("upstream.user_agent cannot be empty"));
    }
    if http::HeaderValue::from_str(&upstream.user_agent).is_err() {
        return Err(validation_err(
            "upstream.user_agent contains characters not allowed in a header",
        ));
    }
    validate_proxy_url("upstream.proxy", upstream.proxy.as_deref())
}

fn validate_proxy_url(field_name: &str, proxy: Option<&str>) -> Result<(), ConfigError> {
    let Some(proxy) = proxy.map(str::trim) else {
        return Ok(());
    };
    if proxy.is_empty() {
        return Err(validation_err(format!(
            "{field_name} cannot be empty when set"
        )));
    }
    let parsed = url::Url::parse(proxy)
        .map_err(|err| validation_err(format!("{field_name} is not a valid URL: {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err(format!(
            "{field_name} must use http:// or https://"
        )));
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    if !VALID_LOG_LEVELS.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {VALID_LOG_LEVELS:?}"
        )));
    }
    Ok(())
}
