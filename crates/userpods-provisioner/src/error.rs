// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Provisioner error types.

use std::path::PathBuf;

/// Errors that can occur during provisioning operations.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionerError {
	/// Pod not found
	#[error("Pod not found: {name}")]
	PodNotFound { name: String },

	/// The request cannot be provisioned as given
	#[error("Invalid pod request: {reason}")]
	InvalidRequest { reason: String },

	/// Kubernetes error
	#[error(transparent)]
	K8sError(#[from] userpods_k8s::K8sError),

	/// Metadata cache error
	#[error(transparent)]
	Cache(#[from] CacheError),
}

/// Errors reading or writing a pod's metadata cache file.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
	#[error("Failed to access cache file {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("Failed to decode cache file {path}: {source}")]
	Decode {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},

	#[error("Failed to encode cache for pod {pod_name}: {source}")]
	Encode {
		pod_name: String,
		#[source]
		source: serde_json::Error,
	},
}

/// Errors extracting a file from inside a pod.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
	#[error("Couldn't call pod exec for pod {pod_name}: {source}")]
	Exec {
		pod_name: String,
		#[source]
		source: userpods_k8s::K8sError,
	},

	#[error("Empty response. Stderr: {stderr}")]
	Empty { stderr: String },

	#[error("Pod {pod_name} has no containers")]
	NoContainer { pod_name: String },
}
