//! Config file discovery and layered loading.
//!
//! 1. Parse embedded `defaults.toml`
//! 2. Merge `/etc/custodian/config.toml`, then `~/.custodian/config.toml`,
//!    or only the explicit path when one is given
//! 3. Apply `CUSTODIAN_*` fallbacks to fields no file set
//! 4. Deserialize and validate

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::env::{apply_env_fallbacks, collect_env_vars};
use crate::error::{ConfigError, ConfigResult};
use crate::merge::{ConfigLayer, FieldSources, deep_merge_tracking, record_leaves};
use crate::types::Config;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

const SYSTEM_CONFIG_PATH: &str = "/etc/custodian/config.toml";

/// A loaded configuration and where its values came from.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// The validated configuration.
    pub config: Config,
    /// Layer that set each leaf field.
    pub field_sources: FieldSources,
    /// Files merged, in order.
    pub loaded_files: Vec<String>,
}

impl ResolvedConfig {
    /// Layer that supplied `field` (dotted path), if known.
    #[must_use]
    pub fn source_of(&self, field: &str) -> Option<ConfigLayer> {
        self.field_sources.get(field).copied()
    }
}

/// Load configuration with layered file precedence.
///
/// With `explicit_path`, that file must exist and replaces the system and
/// user layers. `home_override` replaces the home directory used to find
/// `~/.custodian/config.toml`.
///
/// # Errors
///
/// Returns a [`ConfigError`] if a file is unreadable or malformed, an
/// environment variable does not parse, or the merged configuration fails
/// validation.
pub fn load(
    explicit_path: Option<&Path>,
    home_override: Option<&Path>,
) -> ConfigResult<ResolvedConfig> {
    let env_vars = collect_env_vars();
    let sources = match explicit_path {
        Some(path) => vec![(path.to_path_buf(), ConfigLayer::Explicit)],
        None => {
            let home = match home_override {
                Some(h) => h.to_path_buf(),
                None => home_directory()?,
            };
            vec![
                (PathBuf::from(SYSTEM_CONFIG_PATH), ConfigLayer::System),
                (home.join(".custodian").join("config.toml"), ConfigLayer::User),
            ]
        },
    };
    load_layers(&sources, &env_vars)
}

/// Merge `layers` over the defaults, then apply `env_vars`.
///
/// Missing files are skipped except for [`ConfigLayer::Explicit`].
fn load_layers<S: ::std::hash::BuildHasher>(
    layers: &[(PathBuf, ConfigLayer)],
    env_vars: &HashMap<String, String, S>,
) -> ConfigResult<ResolvedConfig> {
    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
            path: "<embedded defaults>".to_owned(),
            source: e,
        })?;

    let mut field_sources = FieldSources::new();
    let mut loaded_files = Vec::new();
    record_leaves(&merged, "", ConfigLayer::Defaults, &mut field_sources);

    for (path, layer) in layers {
        let overlay = if *layer == ConfigLayer::Explicit {
            Some(read_toml(path)?)
        } else {
            try_load_file(path)?
        };
        if let Some(overlay) = overlay {
            deep_merge_tracking(&mut merged, &overlay, "", *layer, &mut field_sources);
            loaded_files.push(path.display().to_string());
            info!(path = %path.display(), layer = %layer, "loaded config");
        }
    }

    let env_count = apply_env_fallbacks(&mut merged, &mut field_sources, env_vars)?;
    if env_count > 0 {
        debug!(count = env_count, "applied environment variable fallbacks");
    }

    let config: Config =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: "<merged config>".to_owned(),
                source: e,
            })?;

    validate::validate(&config)?;

    Ok(ResolvedConfig {
        config,
        field_sources,
        loaded_files,
    })
}

/// Load a config from a single file over the defaults, without env
/// fallbacks.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read or parsed, or the
/// result fails validation.
pub fn load_file(path: &Path) -> ConfigResult<Config> {
    let no_env: HashMap<String, String> = HashMap::new();
    load_layers(&[(path.to_path_buf(), ConfigLayer::Explicit)], &no_env).map(|r| r.config)
}

/// Try to load a file, returning `None` if it does not exist.
fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    match read_toml(path) {
        Ok(value) => Ok(Some(value)),
        Err(ConfigError::ReadError { source, .. })
            if source.kind() == std::io::ErrorKind::NotFound =>
        {
            debug!(path = %path.display(), "config file not found, skipping");
            Ok(None)
        },
        Err(e) => Err(e),
    }
}

/// Read and parse one file. Size is checked after the read so there is no
/// window between stat and read.
fn read_toml(path: &Path) -> ConfigResult<toml::Value> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        source: e,
    })?;

    let len = u64::try_from(content.len()).unwrap_or(u64::MAX);
    if len > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {len} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit"
            ),
        });
    }

    toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })
}

/// Determine the user's home directory.
fn home_directory() -> ConfigResult<PathBuf> {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .ok_or(ConfigError::NoHomeDir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env() -> HashMap<String, String> {
        HashMap::new()
    }

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_defaults_parse() {
        let val: toml::Value = toml::from_str(DEFAULTS_TOML).unwrap();
        let table = val.as_table().unwrap();
        for section in ["keys", "crypto", "audit", "database", "logging"] {
            assert!(table.contains_key(section), "missing [{section}]");
        }
    }

    #[test]
    fn test_defaults_match_struct_defaults() {
        let from_file: Config = toml::from_str(DEFAULTS_TOML).unwrap();
        let from_code = Config::default();
        assert_eq!(from_file.keys.directory, from_code.keys.directory);
        assert_eq!(
            from_file.crypto.pbkdf2_iterations,
            from_code.crypto.pbkdf2_iterations
        );
        assert_eq!(from_file.audit.retention_days, from_code.audit.retention_days);
        assert_eq!(from_file.audit.max_page_size, from_code.audit.max_page_size);
        assert_eq!(from_file.database.url, from_code.database.url);
        assert_eq!(from_file.logging.level, from_code.logging.level);
    }

    #[test]
    fn test_only_defaults_when_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let layers = [(dir.path().join("absent.toml"), ConfigLayer::User)];

        let resolved = load_layers(&layers, &no_env()).unwrap();

        assert!(resolved.loaded_files.is_empty());
        assert_eq!(resolved.config.audit.retention_days, 2555);
        assert_eq!(resolved.source_of("audit.retention_days"), Some(ConfigLayer::Defaults));
    }

    #[test]
    fn test_user_overrides_system() {
        let dir = tempfile::tempdir().unwrap();
        let system = write(
            dir.path(),
            "system.toml",
            "[audit]\nretention_days = 365\nmax_page_size = 500\n",
        );
        let user = write(dir.path(), "user.toml", "[audit]\nretention_days = 90\n");
        let layers = [(system, ConfigLayer::System), (user, ConfigLayer::User)];

        let resolved = load_layers(&layers, &no_env()).unwrap();

        assert_eq!(resolved.config.audit.retention_days, 90);
        assert_eq!(resolved.config.audit.max_page_size, 500);
        assert_eq!(resolved.source_of("audit.retention_days"), Some(ConfigLayer::User));
        assert_eq!(resolved.source_of("audit.max_page_size"), Some(ConfigLayer::System));
        assert_eq!(resolved.loaded_files.len(), 2);
    }

    #[test]
    fn test_env_fills_only_unset_fields() {
        let dir = tempfile::tempdir().unwrap();
        let user = write(dir.path(), "user.toml", "[crypto]\npbkdf2_iterations = 20000\n");
        let env: HashMap<String, String> = [
            ("CUSTODIAN_PBKDF2_ITERATIONS", "50000"),
            ("CUSTODIAN_SIGNING_SECRET", "from-env"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect();

        let resolved = load_layers(&[(user, ConfigLayer::User)], &env).unwrap();

        assert_eq!(resolved.config.crypto.pbkdf2_iterations, 20_000);
        assert_eq!(resolved.config.crypto.signing_secret.as_deref(), Some("from-env"));
        assert_eq!(
            resolved.source_of("crypto.signing_secret"),
            Some(ConfigLayer::Environment)
        );
    }

    #[test]
    fn test_merged_config_is_validated() {
        let dir = tempfile::tempdir().unwrap();
        let user = write(dir.path(), "user.toml", "[crypto]\npbkdf2_iterations = 10\n");

        let err = load_layers(&[(user, ConfigLayer::User)], &no_env()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ValidationError { ref field, .. } if field == "crypto.pbkdf2_iterations"
        ));
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let result = load_file(Path::new("/nonexistent/custodian.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn test_load_file_merges_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "c.toml", "[logging]\nformat = \"json\"\n");

        let config = load_file(&path).unwrap();

        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_try_load_file_missing() {
        let result = try_load_file(Path::new("/nonexistent/config.toml")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "bad.toml", "[audit\nretention_days = ");
        assert!(matches!(
            try_load_file(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn test_oversized_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let padding = "#".repeat(1_048_577);
        let path = write(dir.path(), "huge.toml", &padding);
        assert!(matches!(
            try_load_file(&path),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_load_with_home_reads_user_file() {
        let home = tempfile::tempdir().unwrap();
        std::fs::create_dir(home.path().join(".custodian")).unwrap();
        write(
            &home.path().join(".custodian"),
            "config.toml",
            "[keys]\ndirectory = \"/srv/keys\"\n",
        );

        let resolved = load(None, Some(home.path())).unwrap();
        assert_eq!(resolved.config.keys.directory, PathBuf::from("/srv/keys"));
    }
}
