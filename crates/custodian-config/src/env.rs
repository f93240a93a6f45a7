//! Environment variable fallbacks.
//!
//! Env vars are a fallback, not an override: each is applied only to a
//! field that no config file set.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::merge::{ConfigLayer, FieldSources};

/// How a variable's string value is coerced into TOML.
#[derive(Clone, Copy)]
enum Kind {
    Text,
    Integer,
    Boolean,
}

/// Mapping from environment variable name to config field path.
struct EnvMapping {
    var_name: &'static str,
    field_path: &'static str,
    kind: Kind,
}

const ENV_MAPPINGS: &[EnvMapping] = &[
    EnvMapping {
        var_name: "CUSTODIAN_KEY_DIRECTORY",
        field_path: "keys.directory",
        kind: Kind::Text,
    },
    EnvMapping {
        var_name: "CUSTODIAN_PBKDF2_ITERATIONS",
        field_path: "crypto.pbkdf2_iterations",
        kind: Kind::Integer,
    },
    EnvMapping {
        var_name: "CUSTODIAN_SIGNING_SECRET",
        field_path: "crypto.signing_secret",
        kind: Kind::Text,
    },
    EnvMapping {
        var_name: "CUSTODIAN_AUDIT_RETENTION_DAYS",
        field_path: "audit.retention_days",
        kind: Kind::Integer,
    },
    EnvMapping {
        var_name: "CUSTODIAN_AUDIT_ENCRYPT_PAYLOADS",
        field_path: "audit.encrypt_payloads",
        kind: Kind::Boolean,
    },
    EnvMapping {
        var_name: "CUSTODIAN_AUDIT_MAX_PAGE_SIZE",
        field_path: "audit.max_page_size",
        kind: Kind::Integer,
    },
    EnvMapping {
        var_name: "CUSTODIAN_DATABASE_URL",
        field_path: "database.url",
        kind: Kind::Text,
    },
    // Conventional name used by most Postgres tooling.
    EnvMapping {
        var_name: "DATABASE_URL",
        field_path: "database.url",
        kind: Kind::Text,
    },
    EnvMapping {
        var_name: "CUSTODIAN_DATABASE_MAX_CONNECTIONS",
        field_path: "database.max_connections",
        kind: Kind::Integer,
    },
    EnvMapping {
        var_name: "CUSTODIAN_LOG_LEVEL",
        field_path: "logging.level",
        kind: Kind::Text,
    },
    EnvMapping {
        var_name: "CUSTODIAN_LOG_FORMAT",
        field_path: "logging.format",
        kind: Kind::Text,
    },
];

/// Apply environment fallbacks to fields that no config file set.
///
/// Defaults do not count as "set". Earlier mappings win when two
/// variables target the same field. Returns the number applied.
///
/// # Errors
///
/// Returns [`ConfigError::EnvError`] if a numeric or boolean variable does
/// not parse.
pub fn apply_env_fallbacks<S: ::std::hash::BuildHasher>(
    merged: &mut toml::Value,
    sources: &mut FieldSources,
    env_vars: &HashMap<String, String, S>,
) -> ConfigResult<usize> {
    let mut count: usize = 0;

    for mapping in ENV_MAPPINGS {
        let set_by_file = sources
            .get(mapping.field_path)
            .is_some_and(|layer| *layer != ConfigLayer::Defaults);
        if set_by_file {
            continue;
        }

        let Some(raw) = env_vars.get(mapping.var_name) else {
            continue;
        };

        debug!(
            var = mapping.var_name,
            field = mapping.field_path,
            "applying env var fallback"
        );

        let value = coerce(mapping, raw)?;
        set_field(merged, mapping.field_path, value);
        sources.insert(mapping.field_path.to_owned(), ConfigLayer::Environment);
        count = count.saturating_add(1);
    }

    Ok(count)
}

/// Collect all current environment variables into a map.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars().collect()
}

fn coerce(mapping: &EnvMapping, raw: &str) -> ConfigResult<toml::Value> {
    let invalid = |expected: &str| ConfigError::EnvError {
        var_name: mapping.var_name.to_owned(),
        message: format!("expected {expected}, got '{raw}'"),
    };

    match mapping.kind {
        Kind::Text => Ok(toml::Value::String(raw.to_owned())),
        Kind::Integer => raw
            .trim()
            .parse::<i64>()
            .map(toml::Value::Integer)
            .map_err(|_| invalid("an integer")),
        Kind::Boolean => raw
            .trim()
            .parse::<bool>()
            .map(toml::Value::Boolean)
            .map_err(|_| invalid("true or false")),
    }
}

/// Set `path` in the tree, creating intermediate tables as needed.
fn set_field(root: &mut toml::Value, path: &str, value: toml::Value) {
    let (parents, leaf) = match path.rsplit_once('.') {
        Some((parents, leaf)) => (Some(parents), leaf),
        None => (None, path),
    };

    let mut current = root;
    for segment in parents.into_iter().flat_map(|p| p.split('.')) {
        let Some(table) = current.as_table_mut() else {
            return;
        };
        current = table
            .entry(segment)
            .or_insert(toml::Value::Table(toml::map::Map::new()));
    }

    if let Some(table) = current.as_table_mut() {
        table.insert(leaf.to_owned(), value);
    }
}
