// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Backend configuration layer and its resolved form.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::logging::{LoggingConfig, LoggingConfigLayer};

/// Restart policy that may be forced onto created pods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
	Always,
	OnFailure,
	Never,
}

impl RestartPolicy {
	pub fn as_str(&self) -> &'static str {
		match self {
			RestartPolicy::Always => "Always",
			RestartPolicy::OnFailure => "OnFailure",
			RestartPolicy::Never => "Never",
		}
	}
}

impl fmt::Display for RestartPolicy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for RestartPolicy {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"Always" => Ok(RestartPolicy::Always),
			"OnFailure" => Ok(RestartPolicy::OnFailure),
			"Never" => Ok(RestartPolicy::Never),
			other => Err(ConfigError::validation(format!(
				"restart_policy must be one of Always, OnFailure, Never or empty, got '{other}'"
			))),
		}
	}
}

/// Backend configuration layer (for merging).
///
/// All fields are optional to support layered configuration from
/// multiple sources (defaults, files, environment).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfigLayer {
	pub namespace: Option<String>,
	pub timeout_create_secs: Option<u64>,
	pub timeout_delete_secs: Option<u64>,
	pub token_dir: Option<PathBuf>,
	pub token_byte_limit: Option<usize>,
	/// Empty string means "leave pods' own policy alone"
	pub restart_policy: Option<String>,
	pub nfs_storage_root: Option<String>,
	pub storage_capacity: Option<String>,
	pub mandatory_env_vars: Option<BTreeMap<String, String>>,
	pub new_pod_attempts: Option<u32>,
	pub new_pod_retry_delay_ms: Option<u64>,
	pub logging: Option<LoggingConfigLayer>,
}

impl BackendConfigLayer {
	/// Merges another layer on top of this one.
	/// Values from `other` take precedence when present; environment
	/// variable maps are combined key by key.
	pub fn merge(&mut self, other: BackendConfigLayer) {
		if other.namespace.is_some() {
			self.namespace = other.namespace;
		}
		if other.timeout_create_secs.is_some() {
			self.timeout_create_secs = other.timeout_create_secs;
		}
		if other.timeout_delete_secs.is_some() {
			self.timeout_delete_secs = other.timeout_delete_secs;
		}
		if other.token_dir.is_some() {
			self.token_dir = other.token_dir;
		}
		if other.token_byte_limit.is_some() {
			self.token_byte_limit = other.token_byte_limit;
		}
		if other.restart_policy.is_some() {
			self.restart_policy = other.restart_policy;
		}
		if other.nfs_storage_root.is_some() {
			self.nfs_storage_root = other.nfs_storage_root;
		}
		if other.storage_capacity.is_some() {
			self.storage_capacity = other.storage_capacity;
		}
		if let Some(vars) = other.mandatory_env_vars {
			self.mandatory_env_vars
				.get_or_insert_with(BTreeMap::new)
				.extend(vars);
		}
		if other.new_pod_attempts.is_some() {
			self.new_pod_attempts = other.new_pod_attempts;
		}
		if other.new_pod_retry_delay_ms.is_some() {
			self.new_pod_retry_delay_ms = other.new_pod_retry_delay_ms;
		}
		if let Some(logging) = other.logging {
			self.logging
				.get_or_insert_with(LoggingConfigLayer::default)
				.merge(logging);
		}
	}

	/// Fill in defaults and validate.
	pub fn resolve(self) -> Result<BackendConfig, ConfigError> {
		let restart_policy = match self.restart_policy.as_deref() {
			None | Some("") => None,
			Some(policy) => Some(policy.parse::<RestartPolicy>()?),
		};

		let config = BackendConfig {
			namespace: self
				.namespace
				.unwrap_or_else(|| "sciencedata-dev".to_string()),
			timeout_create_secs: self.timeout_create_secs.unwrap_or(90),
			timeout_delete_secs: self.timeout_delete_secs.unwrap_or(90),
			token_dir: self
				.token_dir
				.unwrap_or_else(|| PathBuf::from("/tmp/tokens")),
			token_byte_limit: self.token_byte_limit.unwrap_or(4096),
			restart_policy,
			nfs_storage_root: self
				.nfs_storage_root
				.unwrap_or_else(|| "/tank/storage".to_string()),
			storage_capacity: self
				.storage_capacity
				.unwrap_or_else(|| "10Gi".to_string()),
			mandatory_env_vars: self.mandatory_env_vars.unwrap_or_default(),
			new_pod_attempts: self.new_pod_attempts.unwrap_or(10),
			new_pod_retry_delay_ms: self.new_pod_retry_delay_ms.unwrap_or(1000),
			logging: self.logging.unwrap_or_default().finalize(),
		};
		config.validate()?;
		Ok(config)
	}
}

/// Fully resolved backend configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
	pub namespace: String,
	pub timeout_create_secs: u64,
	pub timeout_delete_secs: u64,
	pub token_dir: PathBuf,
	pub token_byte_limit: usize,
	pub restart_policy: Option<RestartPolicy>,
	pub nfs_storage_root: String,
	pub storage_capacity: String,
	pub mandatory_env_vars: BTreeMap<String, String>,
	pub new_pod_attempts: u32,
	pub new_pod_retry_delay_ms: u64,
	pub logging: LoggingConfig,
}

impl BackendConfig {
	fn validate(&self) -> Result<(), ConfigError> {
		if self.namespace.trim().is_empty() {
			return Err(ConfigError::validation("namespace must not be empty"));
		}
		if self.token_byte_limit == 0 {
			return Err(ConfigError::validation(
				"token_byte_limit must be greater than zero",
			));
		}
		if self.new_pod_attempts == 0 {
			return Err(ConfigError::validation(
				"new_pod_attempts must be at least 1",
			));
		}
		if self.storage_capacity.trim().is_empty() {
			return Err(ConfigError::validation("storage_capacity must not be empty"));
		}
		Ok(())
	}
}

impl Default for BackendConfig {
	fn default() -> Self {
		Self {
			namespace: "sciencedata-dev".to_string(),
			timeout_create_secs: 90,
			timeout_delete_secs: 90,
			token_dir: PathBuf::from("/tmp/tokens"),
			token_byte_limit: 4096,
			restart_policy: None,
			nfs_storage_root: "/tank/storage".to_string(),
			storage_capacity: "10Gi".to_string(),
			mandatory_env_vars: BTreeMap::new(),
			new_pod_attempts: 10,
			new_pod_retry_delay_ms: 1000,
			logging: LoggingConfig::default(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::logging::LogFormat;
	use proptest::prelude::*;

	#[test]
	fn empty_layer_resolves_to_defaults() {
		let config = BackendConfigLayer::default().resolve().unwrap();
		assert_eq!(config, BackendConfig::default());
	}

	#[test]
	fn merge_overrides_present_fields() {
		let mut base = BackendConfigLayer {
			namespace: Some("base".to_string()),
			timeout_create_secs: Some(30),
			..Default::default()
		};
		base.merge(BackendConfigLayer {
			namespace: Some("overlay".to_string()),
			..Default::default()
		});
		assert_eq!(base.namespace.as_deref(), Some("overlay"));
		assert_eq!(base.timeout_create_secs, Some(30));
	}

	#[test]
	fn merge_combines_env_var_maps() {
		let mut base = BackendConfigLayer {
			mandatory_env_vars: Some(BTreeMap::from([
				("A".to_string(), "1".to_string()),
				("B".to_string(), "1".to_string()),
			])),
			..Default::default()
		};
		base.merge(BackendConfigLayer {
			mandatory_env_vars: Some(BTreeMap::from([("B".to_string(), "2".to_string())])),
			..Default::default()
		});
		let vars = base.mandatory_env_vars.unwrap();
		assert_eq!(vars["A"], "1");
		assert_eq!(vars["B"], "2");
	}

	#[test]
	fn merge_nested_logging() {
		let mut base = BackendConfigLayer {
			logging: Some(LoggingConfigLayer {
				level: Some("debug".to_string()),
				format: None,
			}),
			..Default::default()
		};
		base.merge(BackendConfigLayer {
			logging: Some(LoggingConfigLayer {
				level: None,
				format: Some(LogFormat::Json),
			}),
			..Default::default()
		});
		let config = base.resolve().unwrap();
		assert_eq!(config.logging.level, "debug");
		assert_eq!(config.logging.format, LogFormat::Json);
	}

	#[test]
	fn restart_policy_values() {
		for (raw, expected) in [
			("", None),
			("Always", Some(RestartPolicy::Always)),
			("OnFailure", Some(RestartPolicy::OnFailure)),
			("Never", Some(RestartPolicy::Never)),
		] {
			let layer = BackendConfigLayer {
				restart_policy: Some(raw.to_string()),
				..Default::default()
			};
			assert_eq!(layer.resolve().unwrap().restart_policy, expected);
		}

		let layer = BackendConfigLayer {
			restart_policy: Some("Sometimes".to_string()),
			..Default::default()
		};
		assert!(matches!(layer.resolve(), Err(ConfigError::Validation(_))));
	}

	#[test]
	fn validation_rejects_bad_values() {
		let cases = [
			BackendConfigLayer {
				namespace: Some(" ".to_string()),
				..Default::default()
			},
			BackendConfigLayer {
				token_byte_limit: Some(0),
				..Default::default()
			},
			BackendConfigLayer {
				new_pod_attempts: Some(0),
				..Default::default()
			},
		];
		for layer in cases {
			assert!(matches!(layer.resolve(), Err(ConfigError::Validation(_))));
		}
	}

	proptest! {
		#[test]
		fn merging_empty_layer_is_identity(
			namespace in proptest::option::of("[a-z][a-z0-9-]{0,20}"),
			timeout in proptest::option::of(1u64..10_000),
			attempts in proptest::option::of(1u32..100),
		) {
			let layer = BackendConfigLayer {
				namespace,
				timeout_create_secs: timeout,
				new_pod_attempts: attempts,
				..Default::default()
			};
			let mut merged = layer.clone();
			merged.merge(BackendConfigLayer::default());
			prop_assert_eq!(merged, layer);
		}
	}
}
