// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

use crate::types::ResourceKind;

/// Errors that can occur during K8s operations.
#[derive(Error, Debug)]
pub enum K8sError {
	#[error("K8s API error: {message}")]
	ApiError { message: String },

	#[error("{kind} not found: {name}")]
	NotFound { kind: ResourceKind, name: String },

	#[error("Unsupported resource kind for watch: {kind}")]
	UnsupportedResourceKind { kind: String },

	#[error("Watch stream error: {message}")]
	StreamError { message: String },

	#[error("Exec error: {message}")]
	ExecError { message: String },
}

impl K8sError {
	/// Whether this error reports a resource that does not exist.
	pub fn is_not_found(&self) -> bool {
		matches!(self, K8sError::NotFound { .. })
	}
}

impl From<kube::Error> for K8sError {
	fn from(err: kube::Error) -> Self {
		K8sError::ApiError {
			message: err.to_string(),
		}
	}
}
