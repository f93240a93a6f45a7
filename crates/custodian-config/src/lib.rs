#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
//! Layered configuration for the Custodian compliance core.
//!
//! # Usage
//!
//! ```rust,no_run
//! use custodian_config::Config;
//!
//! let resolved = Config::load(None).unwrap();
//! println!("keys in {}", resolved.config.keys.directory.display());
//! ```
//!
//! # Precedence
//!
//! From highest to lowest priority:
//!
//! 1. An explicit path, when given (replaces 2 and 3)
//! 2. **User** (`~/.custodian/config.toml`)
//! 3. **System** (`/etc/custodian/config.toml`)
//! 4. **Environment variables** (`CUSTODIAN_*`, `DATABASE_URL`), fallback only
//! 5. **Embedded defaults** (`defaults.toml` compiled into the binary)
//!
//! This crate depends on no other custodian crate. Sections are mapped onto
//! component settings where the process is wired together.

/// Environment variable fallbacks.
pub mod env;
/// Configuration error types.
pub mod error;
/// File discovery and layered loading.
pub mod loader;
/// Layer merging with source tracking.
pub mod merge;
/// Configuration struct definitions.
pub mod types;
/// Validation rules.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::ResolvedConfig;
pub use merge::ConfigLayer;
pub use types::*;

impl Config {
    /// Load with the full precedence chain, or from `explicit_path` over the
    /// defaults when given.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if any file is malformed or the final
    /// configuration fails validation.
    pub fn load(explicit_path: Option<&std::path::Path>) -> ConfigResult<ResolvedConfig> {
        loader::load(explicit_path, None)
    }

    /// Load with an alternate home directory for user config discovery.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if any file is malformed or the final
    /// configuration fails validation.
    pub fn load_with_home(home_dir: &std::path::Path) -> ConfigResult<ResolvedConfig> {
        loader::load(None, Some(home_dir))
    }

    /// Load a single file over the defaults, ignoring the environment.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read or parsed, or
    /// fails validation.
    pub fn load_file(path: &std::path::Path) -> ConfigResult<Self> {
        loader::load_file(path)
    }
}
