// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Provisioner configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::extract::ExtractionPolicy;

/// Configuration for the provisioner, built once at startup and passed in.
#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
	/// Kubernetes namespace for user pods, claims and services
	pub namespace: String,
	/// How long to wait for created resources to become ready
	pub timeout_create: Duration,
	/// How long to wait for deleted resources to disappear
	pub timeout_delete: Duration,
	/// Directory holding one metadata cache file per pod
	pub token_dir: PathBuf,
	/// Maximum number of bytes kept from each extracted file
	pub token_byte_limit: usize,
	/// Restart policy forced onto created pods, if any
	pub restart_policy: Option<String>,
	/// Export root on the storage hosts; user directories live beneath it
	pub nfs_storage_root: String,
	/// Capacity requested for each user's storage pair
	pub storage_capacity: String,
	/// Environment variables injected into every container of created pods
	pub mandatory_env_vars: BTreeMap<String, String>,
	/// Retry policy used when filling the cache of a freshly created pod
	pub new_pod_extraction: ExtractionPolicy,
}

impl Default for ProvisionerConfig {
	fn default() -> Self {
		Self {
			namespace: "sciencedata-dev".to_string(),
			timeout_create: Duration::from_secs(90),
			timeout_delete: Duration::from_secs(90),
			token_dir: PathBuf::from("/tmp/tokens"),
			token_byte_limit: 4096,
			restart_policy: None,
			nfs_storage_root: "/tank/storage".to_string(),
			storage_capacity: "10Gi".to_string(),
			mandatory_env_vars: BTreeMap::new(),
			new_pod_extraction: ExtractionPolicy::new_pod(),
		}
	}
}
