// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Read-through view of a user pod and the metadata shown to the front end.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use userpods_k8s::{IntOrString, ObjectMeta, Pod, Service, ServicePort, ServiceSpec};

use crate::cache::{CacheStore, PodCache};
use crate::user::User;

/// Annotation value marking the annotation key as a file to extract.
pub const COPY_FOR_FRONTEND: &str = "copyForFrontend";
/// Label tying a service to the pod it was created for.
pub const LABEL_CREATED_FOR_POD: &str = "createdForPod";
/// Label carrying a pod's own name, used as the SSH service selector.
pub const LABEL_POD_NAME: &str = "podName";
/// Key of the discovered SSH node port in `other_resource_info`.
pub const SSH_PORT_KEY: &str = "sshPort";
pub const SSH_PORT: i32 = 22;

/// Name of the NodePort service exposing a pod's SSH port.
pub fn ssh_service_name(pod_name: &str) -> String {
	format!("{pod_name}-ssh")
}

/// Selector for the services created for a pod.
pub fn services_selector(pod_name: &str) -> String {
	format!("{LABEL_CREATED_FOR_POD}={pod_name}")
}

/// NodePort service exposing the SSH port of the pod labelled `podName=<pod_name>`.
pub fn target_ssh_service(pod_name: &str, namespace: &str) -> Service {
	Service {
		metadata: ObjectMeta {
			name: Some(ssh_service_name(pod_name)),
			namespace: Some(namespace.to_string()),
			labels: Some(BTreeMap::from([(
				LABEL_CREATED_FOR_POD.to_string(),
				pod_name.to_string(),
			)])),
			..Default::default()
		},
		spec: Some(ServiceSpec {
			type_: Some("NodePort".to_string()),
			selector: Some(BTreeMap::from([(
				LABEL_POD_NAME.to_string(),
				pod_name.to_string(),
			)])),
			ports: Some(vec![ServicePort {
				name: Some("ssh".to_string()),
				protocol: Some("TCP".to_string()),
				port: SSH_PORT,
				target_port: Some(IntOrString::Int(SSH_PORT)),
				..Default::default()
			}]),
			..Default::default()
		}),
		status: None,
	}
}

/// Metadata for one pod as served to the front end.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodInfo {
	pub pod_name: String,
	pub container_name: String,
	pub image_name: String,
	pub pod_ip: String,
	pub node_ip: String,
	pub owner: String,
	pub age: String,
	pub status: String,
	pub url: String,
	pub tokens: BTreeMap<String, String>,
	#[serde(rename = "k8s_pod_info")]
	pub other_resource_info: BTreeMap<String, String>,
}

/// A cluster pod together with its owner and metadata cache.
///
/// Built fresh from the authoritative pod list on every query.
#[derive(Debug, Clone)]
pub struct ManagedPod {
	object: Pod,
	owner: User,
	cache: PodCache,
}

impl ManagedPod {
	pub fn new(object: Pod) -> Self {
		let owner = object
			.metadata
			.labels
			.as_ref()
			.map(User::from_labels)
			.unwrap_or_default();
		Self {
			object,
			owner,
			cache: PodCache::default(),
		}
	}

	pub fn name(&self) -> &str {
		self.object.metadata.name.as_deref().unwrap_or_default()
	}

	pub fn object(&self) -> &Pod {
		&self.object
	}

	pub fn owner(&self) -> &User {
		&self.owner
	}

	pub fn cache(&self) -> &PodCache {
		&self.cache
	}

	pub fn set_cache(&mut self, cache: PodCache) {
		self.cache = cache;
	}

	pub fn phase(&self) -> &str {
		self.object
			.status
			.as_ref()
			.and_then(|s| s.phase.as_deref())
			.unwrap_or_default()
	}

	pub fn is_running(&self) -> bool {
		self.phase() == "Running"
	}

	/// Whether any container listens on the SSH port.
	pub fn needs_ssh_service(&self) -> bool {
		self.object
			.spec
			.iter()
			.flat_map(|spec| spec.containers.iter())
			.flat_map(|c| c.ports.iter().flatten())
			.any(|p| p.container_port == SSH_PORT)
	}

	/// Annotation keys naming files to extract, sorted.
	pub fn copy_keys(&self) -> Vec<String> {
		let mut keys: Vec<String> = self
			.object
			.metadata
			.annotations
			.iter()
			.flatten()
			.filter(|(_, value)| value.as_str() == COPY_FOR_FRONTEND)
			.map(|(key, _)| key.clone())
			.collect();
		keys.sort();
		keys
	}

	/// Whether a volume of the pod mounts the claim named `claim_name`.
	pub fn mounts_claim(&self, claim_name: &str) -> bool {
		self.object
			.spec
			.iter()
			.flat_map(|spec| spec.volumes.iter().flatten())
			.filter_map(|v| v.persistent_volume_claim.as_ref())
			.any(|claim| claim.claim_name == claim_name)
	}

	/// Node port of the pod's SSH service, from the services created for it.
	///
	/// `None` means no port entry targets the SSH port. A found port of zero
	/// is still returned.
	pub fn ssh_node_port(&self, services: &[Service]) -> Option<i32> {
		let wanted = ssh_service_name(self.name());
		services
			.iter()
			.find(|svc| svc.metadata.name.as_deref() == Some(wanted.as_str()))?
			.spec
			.as_ref()?
			.ports
			.iter()
			.flatten()
			.find(|p| p.target_port == Some(IntOrString::Int(SSH_PORT)))?
			.node_port
	}

	/// Facts about the pod's sibling resources worth caching.
	pub fn other_resource_info(&self, services: &[Service]) -> BTreeMap<String, String> {
		let mut info = BTreeMap::new();
		if self.needs_ssh_service() {
			match self.ssh_node_port(services) {
				Some(port) => {
					info.insert(SSH_PORT_KEY.to_string(), port.to_string());
				}
				None => warn!(pod_name = self.name(), "ssh service node port not found"),
			}
		}
		info
	}

	/// Load the persisted cache into this pod. A missing file leaves the cache
	/// empty; an unreadable one is logged and also leaves it empty.
	pub async fn load_cache(&mut self, store: &CacheStore) {
		match store.load(self.name()).await {
			Ok(Some(cache)) => self.cache = cache,
			Ok(None) => {}
			Err(e) => warn!(pod_name = self.name(), error = %e, "failed to load pod cache"),
		}
	}

	pub async fn info(&mut self, store: &CacheStore) -> PodInfo {
		self.load_cache(store).await;
		self.info_at(Utc::now())
	}

	/// Build [`PodInfo`] from the pod and its current cache, with age measured
	/// up to `now`.
	pub fn info_at(&self, now: DateTime<Utc>) -> PodInfo {
		let start = self
			.object
			.status
			.as_ref()
			.and_then(|s| s.start_time.as_ref())
			.map(|t| t.0);
		let age_secs = start.map(|s| (now - s).num_seconds().max(0)).unwrap_or(0);
		let start_str = start
			.map(|s| s.to_rfc3339_opts(SecondsFormat::Secs, true))
			.unwrap_or_default();

		let first = self
			.object
			.spec
			.as_ref()
			.and_then(|spec| spec.containers.first());
		let status = self.object.status.as_ref();

		PodInfo {
			pod_name: self.name().to_string(),
			container_name: first.map(|c| c.name.clone()).unwrap_or_default(),
			image_name: first.and_then(|c| c.image.clone()).unwrap_or_default(),
			pod_ip: status.and_then(|s| s.pod_ip.clone()).unwrap_or_default(),
			node_ip: status.and_then(|s| s.host_ip.clone()).unwrap_or_default(),
			owner: self.owner.user_id().to_string(),
			age: format_age(age_secs),
			status: format!("{}:{}", self.phase(), start_str),
			url: String::new(),
			tokens: self.cache.tokens.clone(),
			other_resource_info: self.cache.other_resource_info.clone(),
		}
	}
}

fn format_age(secs: i64) -> String {
	format!("{}:{}:{}", secs / 3600, (secs / 60) % 60, secs % 60)
}
