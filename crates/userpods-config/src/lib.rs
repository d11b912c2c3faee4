// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Layered configuration for the user pod provisioning backend.
//!
//! Sources are merged in precedence order:
//! built-in defaults, then a TOML file, then `USERPODS_*` environment variables.
//!
//! # Usage
//!
//! ```ignore
//! use userpods_config::load_config;
//!
//! let config = load_config()?;
//! println!("provisioning into namespace {}", config.namespace);
//! ```

pub mod error;
pub mod layer;
pub mod logging;
pub mod sources;

pub use error::ConfigError;
pub use layer::{BackendConfig, BackendConfigLayer, RestartPolicy};
pub use logging::{LogFormat, LoggingConfig, LoggingConfigLayer};
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use tracing::{debug, info};

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`USERPODS_*`)
/// 2. Config file (`/etc/userpods/backend.toml`)
/// 3. Built-in defaults
pub fn load_config() -> Result<BackendConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource::new()),
	])
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<BackendConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource::new()),
	])
}

/// Merge the given sources in precedence order and resolve the result.
pub fn load_from_sources(
	mut sources: Vec<Box<dyn ConfigSource>>,
) -> Result<BackendConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = BackendConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		merged.merge(source.load()?);
	}

	let config = merged.resolve()?;
	info!(
		namespace = %config.namespace,
		timeout_create_secs = config.timeout_create_secs,
		timeout_delete_secs = config.timeout_delete_secs,
		token_dir = %config.token_dir.display(),
		restart_policy = config.restart_policy.map(|p| p.as_str()).unwrap_or("unchanged"),
		mandatory_env_vars = config.mandatory_env_vars.len(),
		"configuration loaded"
	);
	Ok(config)
}
