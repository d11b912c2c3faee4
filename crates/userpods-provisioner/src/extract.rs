// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Reading small files out of running containers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use userpods_k8s::{K8sClient, Pod};

use crate::error::ExtractError;

/// Bounded retry policy for in-container file reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionPolicy {
	max_attempts: u32,
	delay: Duration,
}

impl ExtractionPolicy {
	/// `max_attempts` is clamped to at least one.
	pub fn new(max_attempts: u32, delay: Duration) -> Self {
		Self {
			max_attempts: max_attempts.max(1),
			delay,
		}
	}

	/// Tolerant policy for a pod that was just created and may not have
	/// written its files yet.
	pub fn new_pod() -> Self {
		Self::new(10, Duration::from_secs(1))
	}

	/// Strict policy for a pod that is already running: one attempt.
	pub fn existing_pod() -> Self {
		Self::new(1, Duration::ZERO)
	}

	pub fn max_attempts(&self) -> u32 {
		self.max_attempts
	}

	pub fn delay(&self) -> Duration {
		self.delay
	}
}

/// Reads `/tmp/<key>` files from a pod's first container.
pub struct Extractor<'a> {
	client: &'a Arc<dyn K8sClient>,
	namespace: &'a str,
	byte_limit: usize,
}

impl<'a> Extractor<'a> {
	pub fn new(client: &'a Arc<dyn K8sClient>, namespace: &'a str, byte_limit: usize) -> Self {
		Self {
			client,
			namespace,
			byte_limit,
		}
	}

	/// One read of `/tmp/<key>`, truncated to the byte limit.
	pub async fn read_tmp_file(&self, pod: &Pod, key: &str) -> Result<String, ExtractError> {
		let pod_name = pod.metadata.name.clone().unwrap_or_default();
		let container = pod
			.spec
			.as_ref()
			.and_then(|spec| spec.containers.first())
			.map(|c| c.name.clone())
			.ok_or_else(|| ExtractError::NoContainer {
				pod_name: pod_name.clone(),
			})?;

		let command = vec!["cat".to_string(), format!("/tmp/{key}")];
		let output = self
			.client
			.exec(&pod_name, self.namespace, &container, &command)
			.await
			.map_err(|source| ExtractError::Exec {
				pod_name: pod_name.clone(),
				source,
			})?;

		if output.stdout.is_empty() {
			return Err(ExtractError::Empty {
				stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
			});
		}

		Ok(truncate_utf8(&output.stdout, self.byte_limit))
	}

	/// Read `key` under `policy`. Failures are logged; `None` after the last
	/// attempt fails.
	pub async fn read_with_retry(
		&self,
		pod: &Pod,
		key: &str,
		policy: ExtractionPolicy,
	) -> Option<String> {
		let pod_name = pod.metadata.name.as_deref().unwrap_or_default();
		for attempt in 1..=policy.max_attempts() {
			match self.read_tmp_file(pod, key).await {
				Ok(value) => {
					debug!(pod_name, key, attempt, "extracted file");
					return Some(value);
				}
				Err(e) if attempt < policy.max_attempts() => {
					debug!(pod_name, key, attempt, error = %e, "extraction attempt failed, retrying");
					tokio::time::sleep(policy.delay()).await;
				}
				Err(e) => {
					warn!(pod_name, key, attempts = attempt, error = %e, "giving up on file extraction");
				}
			}
		}
		None
	}

	/// Extract every key in `keys`. Keys that could not be read are absent.
	pub async fn extract_tokens(
		&self,
		pod: &Pod,
		keys: &[String],
		policy: ExtractionPolicy,
	) -> BTreeMap<String, String> {
		let mut tokens = BTreeMap::new();
		for key in keys {
			if let Some(value) = self.read_with_retry(pod, key, policy).await {
				tokens.insert(key.clone(), value);
			}
		}
		tokens
	}
}

/// Decode `bytes` into at most `limit` bytes of UTF-8, never splitting a
/// character. Invalid sequences are replaced before the limit is applied.
fn truncate_utf8(bytes: &[u8], limit: usize) -> String {
	let head = &bytes[..bytes.len().min(limit)];
	let mut text = match std::str::from_utf8(head) {
		Ok(text) => return text.to_string(),
		// A character cut in half by the limit is dropped whole.
		Err(e) if e.error_len().is_none() => {
			return String::from_utf8_lossy(&head[..e.valid_up_to()]).into_owned();
		}
		Err(_) => String::from_utf8_lossy(head).into_owned(),
	};
	let mut end = text.len().min(limit);
	while !text.is_char_boundary(end) {
		end -= 1;
	}
	text.truncate(end);
	text
}
