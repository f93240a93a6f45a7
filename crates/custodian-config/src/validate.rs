//! Post-merge validation.

use crate::error::{ConfigError, ConfigResult};
use crate::types::{Config, MAX_RETENTION_DAYS, MIN_PBKDF2_ITERATIONS};

/// Largest page any reader may be configured to return.
const MAX_PAGE_SIZE_UPPER_BOUND: u32 = 10_000;

/// Validate a merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_keys(config)?;
    validate_crypto(config)?;
    validate_audit(config)?;
    validate_database(config)?;
    validate_logging(config)?;
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.into(),
    }
}

fn validate_keys(config: &Config) -> ConfigResult<()> {
    if config.keys.directory.as_os_str().is_empty() {
        return Err(invalid("keys.directory", "key directory must not be empty"));
    }
    Ok(())
}

fn validate_crypto(config: &Config) -> ConfigResult<()> {
    let c = &config.crypto;

    if c.pbkdf2_iterations < MIN_PBKDF2_ITERATIONS {
        return Err(invalid(
            "crypto.pbkdf2_iterations",
            format!(
                "{} iterations is below the minimum of {MIN_PBKDF2_ITERATIONS}",
                c.pbkdf2_iterations
            ),
        ));
    }

    if c.signing_secret.as_ref().is_some_and(String::is_empty) {
        return Err(invalid(
            "crypto.signing_secret",
            "signing secret must not be empty; omit it to use an ephemeral secret",
        ));
    }

    Ok(())
}

fn validate_audit(config: &Config) -> ConfigResult<()> {
    let a = &config.audit;

    if !(1..=MAX_RETENTION_DAYS).contains(&a.retention_days) {
        return Err(invalid(
            "audit.retention_days",
            format!("retention_days must be between 1 and {MAX_RETENTION_DAYS}"),
        ));
    }

    if !(1..=MAX_PAGE_SIZE_UPPER_BOUND).contains(&a.max_page_size) {
        return Err(invalid(
            "audit.max_page_size",
            format!("max_page_size must be between 1 and {MAX_PAGE_SIZE_UPPER_BOUND}"),
        ));
    }

    if a.default_page_size == 0 || a.default_page_size > a.max_page_size {
        return Err(invalid(
            "audit.default_page_size",
            format!(
                "default_page_size {} must be between 1 and max_page_size ({})",
                a.default_page_size, a.max_page_size
            ),
        ));
    }

    Ok(())
}

fn validate_database(config: &Config) -> ConfigResult<()> {
    let d = &config.database;

    if d.url.is_empty() {
        return Err(invalid("database.url", "database url must not be empty"));
    }

    if d.max_connections == 0 {
        return Err(invalid(
            "database.max_connections",
            "max_connections must be at least 1",
        ));
    }

    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.logging.level.as_str()) {
        return Err(invalid(
            "logging.level",
            format!(
                "unsupported log level '{}'; expected one of: {}",
                config.logging.level,
                valid_levels.join(", ")
            ),
        ));
    }

    let valid_formats = ["pretty", "compact", "json", "full"];
    if !valid_formats.contains(&config.logging.format.as_str()) {
        return Err(invalid(
            "logging.format",
            format!(
                "unsupported log format '{}'; expected one of: {}",
                config.logging.format,
                valid_formats.join(", ")
            ),
        ));
    }

    Ok(())
}
