// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Persisted per-pod metadata for fast pod listings.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::CacheError;

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Values pulled out of a pod and facts about its sibling resources.
///
/// A missing key means extraction has not succeeded yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodCache {
	/// Extracted file contents keyed by annotation key.
	#[serde(default)]
	pub tokens: BTreeMap<String, String>,
	/// Derived facts such as the SSH node port.
	#[serde(default, rename = "otherResourceInfo")]
	pub other_resource_info: BTreeMap<String, String>,
}

impl PodCache {
	pub fn is_empty(&self) -> bool {
		self.tokens.is_empty() && self.other_resource_info.is_empty()
	}
}

/// One cache file per pod, named by pod name, under a directory.
///
/// Saves write a scratch file and rename it over the cache file, so readers
/// see either the old or the new contents. Concurrent saves for the same pod
/// are not coordinated; the last writer wins.
#[derive(Debug, Clone)]
pub struct CacheStore {
	dir: PathBuf,
}

impl CacheStore {
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Self { dir: dir.into() }
	}

	pub fn path_for(&self, pod_name: &str) -> PathBuf {
		self.dir.join(pod_name)
	}

	/// A scratch file next to the pod's cache file, unique to this save.
	fn temp_path_for(&self, pod_name: &str) -> PathBuf {
		let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
		self.dir
			.join(format!(".{pod_name}.{}.{seq}.tmp", std::process::id()))
	}

	/// Write `cache` as the pod's cache file, replacing any previous one.
	pub async fn save(&self, pod_name: &str, cache: &PodCache) -> Result<(), CacheError> {
		let path = self.path_for(pod_name);
		let encoded = serde_json::to_vec(cache).map_err(|source| CacheError::Encode {
			pod_name: pod_name.to_string(),
			source,
		})?;

		tokio::fs::create_dir_all(&self.dir)
			.await
			.map_err(|source| CacheError::Io {
				path: self.dir.clone(),
				source,
			})?;

		let temp_path = self.temp_path_for(pod_name);
		let mut options = tokio::fs::OpenOptions::new();
		options.write(true).create(true).truncate(true);
		#[cfg(unix)]
		options.mode(0o600);

		let temp_err = |source| CacheError::Io {
			path: temp_path.clone(),
			source,
		};
		let mut file = options.open(&temp_path).await.map_err(temp_err)?;
		file.write_all(&encoded).await.map_err(temp_err)?;
		file.sync_all().await.map_err(temp_err)?;
		drop(file);

		if let Err(source) = tokio::fs::rename(&temp_path, &path).await {
			let _ = tokio::fs::remove_file(&temp_path).await;
			return Err(CacheError::Io { path, source });
		}

		debug!(pod_name, path = %path.display(), "saved pod cache");
		Ok(())
	}

	/// Read the pod's cache file. `Ok(None)` means no cache has been saved yet.
	pub async fn load(&self, pod_name: &str) -> Result<Option<PodCache>, CacheError> {
		let path = self.path_for(pod_name);
		let bytes = match tokio::fs::read(&path).await {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
			Err(source) => return Err(CacheError::Io { path, source }),
		};
		let cache = serde_json::from_slice(&bytes).map_err(|source| CacheError::Decode {
			path: path.clone(),
			source,
		})?;
		Ok(Some(cache))
	}

	/// Delete the pod's cache file. Returns whether one existed.
	pub async fn remove(&self, pod_name: &str) -> Result<bool, CacheError> {
		let path = self.path_for(pod_name);
		match tokio::fs::remove_file(&path).await {
			Ok(()) => Ok(true),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
			Err(source) => Err(CacheError::Io { path, source }),
		}
	}
}
