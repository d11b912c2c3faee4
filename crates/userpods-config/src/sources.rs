// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: environment variables and TOML files.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::str::FromStr;

use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::BackendConfigLayer;
use crate::logging::{LogFormat, LoggingConfigLayer};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<BackendConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<BackendConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(BackendConfigLayer::default())
	}
}

/// TOML file configuration source. A missing file contributes nothing.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/userpods/backend.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<BackendConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(BackendConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: BackendConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: USERPODS_<FIELD>. `USERPODS_MANDATORY_ENV_VARS` takes
/// comma-separated `NAME=value` pairs.
pub struct EnvSource {
	vars: Option<HashMap<String, String>>,
}

impl EnvSource {
	/// Read from the process environment.
	pub fn new() -> Self {
		Self { vars: None }
	}

	/// Read from a fixed set of variables instead of the process environment.
	pub fn from_vars<I, K, V>(vars: I) -> Self
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		Self {
			vars: Some(
				vars.into_iter()
					.map(|(k, v)| (k.into(), v.into()))
					.collect(),
			),
		}
	}

	fn var(&self, name: &str) -> Option<String> {
		let value = match &self.vars {
			Some(vars) => vars.get(name).cloned(),
			None => std::env::var(name).ok(),
		};
		value.filter(|s| !s.is_empty())
	}

	fn parsed<T: FromStr>(&self, name: &str) -> Result<Option<T>, ConfigError> {
		match self.var(name) {
			Some(v) => v.parse::<T>().map(Some).map_err(|_| {
				ConfigError::invalid_value(
					name,
					format!("invalid {} value '{v}'", std::any::type_name::<T>()),
				)
			}),
			None => Ok(None),
		}
	}

	fn env_map(&self, name: &str) -> Result<Option<BTreeMap<String, String>>, ConfigError> {
		let Some(raw) = self.var(name) else {
			return Ok(None);
		};
		raw.split(',')
			.map(str::trim)
			.filter(|pair| !pair.is_empty())
			.map(|pair| {
				pair.split_once('=')
					.filter(|(key, _)| !key.is_empty())
					.map(|(key, value)| (key.to_string(), value.to_string()))
					.ok_or_else(|| {
						ConfigError::invalid_value(name, format!("expected NAME=value, got '{pair}'"))
					})
			})
			.collect::<Result<BTreeMap<_, _>, _>>()
			.map(Some)
	}

	fn logging(&self) -> Result<Option<LoggingConfigLayer>, ConfigError> {
		let level = self.var("USERPODS_LOG_LEVEL");
		let format = self
			.var("USERPODS_LOG_FORMAT")
			.map(|f| f.parse::<LogFormat>())
			.transpose()?;
		if level.is_none() && format.is_none() {
			return Ok(None);
		}
		Ok(Some(LoggingConfigLayer { level, format }))
	}
}

impl Default for EnvSource {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<BackendConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(BackendConfigLayer {
			namespace: self.var("USERPODS_NAMESPACE"),
			timeout_create_secs: self.parsed("USERPODS_TIMEOUT_CREATE_SECS")?,
			timeout_delete_secs: self.parsed("USERPODS_TIMEOUT_DELETE_SECS")?,
			token_dir: self.var("USERPODS_TOKEN_DIR").map(PathBuf::from),
			token_byte_limit: self.parsed("USERPODS_TOKEN_BYTE_LIMIT")?,
			restart_policy: self.var("USERPODS_RESTART_POLICY"),
			nfs_storage_root: self.var("USERPODS_NFS_STORAGE_ROOT"),
			storage_capacity: self.var("USERPODS_STORAGE_CAPACITY"),
			mandatory_env_vars: self.env_map("USERPODS_MANDATORY_ENV_VARS")?,
			new_pod_attempts: self.parsed("USERPODS_NEW_POD_ATTEMPTS")?,
			new_pod_retry_delay_ms: self.parsed("USERPODS_NEW_POD_RETRY_DELAY_MS")?,
			logging: self.logging()?,
		})
	}
}
