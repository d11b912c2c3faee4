// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! User identity and the deterministic names and labels of everything a user owns.

use std::collections::BTreeMap;

use userpods_k8s::{
	NFSVolumeSource, ObjectMeta, ObjectReference, PersistentVolume, PersistentVolumeClaim,
	PersistentVolumeClaimSpec, PersistentVolumeSpec, Quantity, VolumeResourceRequirements,
};

use crate::config::ProvisionerConfig;

pub const LABEL_USER: &str = "user";
pub const LABEL_DOMAIN: &str = "domain";
pub const LABEL_NAME: &str = "name";
pub const LABEL_SERVER: &str = "server";
const STORAGE_PREFIX: &str = "user-storage";
const STORAGE_CLASS: &str = "nfs";
const ACCESS_MODE: &str = "ReadWriteMany";
const RECLAIM_POLICY: &str = "Retain";
const NFS_MOUNT_OPTIONS: [&str; 2] = ["hard", "nfsvers=4.1"];

/// A platform user identified by `name@domain`, with the domain optional.
///
/// The empty user id denotes no particular user: its selectors match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct User {
	user_id: String,
	name: String,
	domain: String,
	silo_ip: String,
}

impl User {
	pub fn new(user_id: impl Into<String>) -> Self {
		let user_id = user_id.into();
		let (name, domain) = match user_id.split_once('@') {
			Some((name, domain)) => (name.to_string(), domain.to_string()),
			None => (user_id.clone(), String::new()),
		};
		Self {
			user_id,
			name,
			domain,
			silo_ip: String::new(),
		}
	}

	/// Attach the address of the storage host serving this user's files.
	pub fn with_silo_ip(mut self, silo_ip: impl Into<String>) -> Self {
		self.silo_ip = silo_ip.into();
		self
	}

	/// Recover the owner recorded in a resource's `user` and `domain` labels.
	pub fn from_labels(labels: &BTreeMap<String, String>) -> Self {
		let user = match labels.get(LABEL_USER) {
			Some(user) if !user.is_empty() => user,
			_ => return Self::default(),
		};
		match labels.get(LABEL_DOMAIN) {
			Some(domain) if !domain.is_empty() => Self::new(format!("{user}@{domain}")),
			_ => Self::new(user.clone()),
		}
	}

	pub fn user_id(&self) -> &str {
		&self.user_id
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn domain(&self) -> &str {
		&self.domain
	}

	pub fn silo_ip(&self) -> &str {
		&self.silo_ip
	}

	pub fn is_anonymous(&self) -> bool {
		self.user_id.is_empty()
	}

	/// Label selector matching the user's pods; empty for the anonymous user.
	pub fn label_selector(&self) -> String {
		if self.is_anonymous() {
			return String::new();
		}
		format!(
			"{LABEL_USER}={},{LABEL_DOMAIN}={}",
			self.name, self.domain
		)
	}

	/// Ownership labels stamped on the user's pods.
	pub fn labels(&self) -> BTreeMap<String, String> {
		BTreeMap::from([
			(LABEL_USER.to_string(), self.name.clone()),
			(LABEL_DOMAIN.to_string(), self.domain.clone()),
		])
	}

	/// The user id made safe for use inside resource names.
	pub fn user_string(&self) -> String {
		self.user_id.replace(['@', '.'], "-")
	}

	/// Name shared by the user's storage volume and claim.
	pub fn storage_name(&self) -> String {
		format!("{STORAGE_PREFIX}-{}", self.user_string())
	}

	/// Label selector matching both halves of the user's storage pair.
	pub fn storage_selector(&self) -> String {
		format!("{LABEL_NAME}={}", self.storage_name())
	}

	fn storage_labels(&self) -> BTreeMap<String, String> {
		BTreeMap::from([
			(LABEL_NAME.to_string(), self.storage_name()),
			(LABEL_USER.to_string(), self.name.clone()),
			(LABEL_DOMAIN.to_string(), self.domain.clone()),
			(LABEL_SERVER.to_string(), self.silo_ip.clone()),
		])
	}

	fn storage_request(config: &ProvisionerConfig) -> BTreeMap<String, Quantity> {
		BTreeMap::from([(
			"storage".to_string(),
			Quantity(config.storage_capacity.clone()),
		)])
	}

	/// The NFS-backed volume exporting the user's directory from their silo.
	pub fn target_storage_pv(&self, config: &ProvisionerConfig) -> PersistentVolume {
		let name = self.storage_name();
		PersistentVolume {
			metadata: ObjectMeta {
				name: Some(name.clone()),
				labels: Some(self.storage_labels()),
				..Default::default()
			},
			spec: Some(PersistentVolumeSpec {
				access_modes: Some(vec![ACCESS_MODE.to_string()]),
				persistent_volume_reclaim_policy: Some(RECLAIM_POLICY.to_string()),
				storage_class_name: Some(STORAGE_CLASS.to_string()),
				mount_options: Some(NFS_MOUNT_OPTIONS.iter().map(|o| o.to_string()).collect()),
				nfs: Some(NFSVolumeSource {
					server: self.silo_ip.clone(),
					path: format!(
						"{}/{}",
						config.nfs_storage_root.trim_end_matches('/'),
						self.user_id
					),
					read_only: None,
				}),
				claim_ref: Some(ObjectReference {
					namespace: Some(config.namespace.clone()),
					name: Some(name),
					kind: Some("PersistentVolumeClaim".to_string()),
					..Default::default()
				}),
				capacity: Some(Self::storage_request(config)),
				..Default::default()
			}),
			status: None,
		}
	}

	/// The claim that binds to [`User::target_storage_pv`].
	pub fn target_storage_pvc(&self, config: &ProvisionerConfig) -> PersistentVolumeClaim {
		let name = self.storage_name();
		PersistentVolumeClaim {
			metadata: ObjectMeta {
				name: Some(name.clone()),
				namespace: Some(config.namespace.clone()),
				labels: Some(self.storage_labels()),
				..Default::default()
			},
			spec: Some(PersistentVolumeClaimSpec {
				access_modes: Some(vec![ACCESS_MODE.to_string()]),
				storage_class_name: Some(STORAGE_CLASS.to_string()),
				volume_name: Some(name),
				resources: Some(VolumeResourceRequirements {
					requests: Some(Self::storage_request(config)),
					limits: None,
				}),
				..Default::default()
			}),
			status: None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn splits_name_and_domain() {
		let user = User::new("alice@example.org");
		assert_eq!(user.name(), "alice");
		assert_eq!(user.domain(), "example.org");
		assert_eq!(user.label_selector(), "user=alice,domain=example.org");
	}

	#[test]
	fn domain_is_optional() {
		let user = User::new("bob");
		assert_eq!(user.name(), "bob");
		assert_eq!(user.domain(), "");
		assert_eq!(user.label_selector(), "user=bob,domain=");
	}

	#[test]
	fn anonymous_user_selects_everything() {
		let user = User::new("");
		assert!(user.is_anonymous());
		assert_eq!(user.label_selector(), "");
	}

	#[test]
	fn storage_names_are_deterministic() {
		let user = User::new("alice@example.org");
		assert_eq!(user.user_string(), "alice-example-org");
		assert_eq!(user.storage_name(), "user-storage-alice-example-org");
		assert_eq!(user.storage_selector(), "name=user-storage-alice-example-org");
	}

	#[test]
	fn from_labels_rebuilds_user_id() {
		let labels = BTreeMap::from([
			("user".to_string(), "alice".to_string()),
			("domain".to_string(), "example.org".to_string()),
		]);
		assert_eq!(User::from_labels(&labels).user_id(), "alice@example.org");

		let labels = BTreeMap::from([
			("user".to_string(), "bob".to_string()),
			("domain".to_string(), String::new()),
		]);
		assert_eq!(User::from_labels(&labels).user_id(), "bob");

		let labels = BTreeMap::from([("domain".to_string(), "example.org".to_string())]);
		assert!(User::from_labels(&labels).is_anonymous());
	}

	#[test]
	fn storage_pair_shares_name_and_labels() {
		let config = ProvisionerConfig::default();
		let user = User::new("alice@example.org").with_silo_ip("10.2.0.20");
		let pv = user.target_storage_pv(&config);
		let pvc = user.target_storage_pvc(&config);

		assert_eq!(pv.metadata.name, pvc.metadata.name);
		assert_eq!(pv.metadata.labels, pvc.metadata.labels);

		let labels = pv.metadata.labels.unwrap();
		assert_eq!(labels["name"], "user-storage-alice-example-org");
		assert_eq!(labels["user"], "alice");
		assert_eq!(labels["domain"], "example.org");
		assert_eq!(labels["server"], "10.2.0.20");

		let spec = pv.spec.unwrap();
		let nfs = spec.nfs.unwrap();
		assert_eq!(nfs.server, "10.2.0.20");
		assert_eq!(nfs.path, "/tank/storage/alice@example.org");
		assert_eq!(
			spec.claim_ref.unwrap().namespace.as_deref(),
			Some(config.namespace.as_str())
		);

		let pvc_spec = pvc.spec.unwrap();
		assert_eq!(
			pvc_spec.volume_name.as_deref(),
			Some("user-storage-alice-example-org")
		);
		assert_eq!(pvc.metadata.namespace.as_deref(), Some(config.namespace.as_str()));
	}

	proptest! {
		#[test]
		fn user_string_has_no_separators(id in "[a-z0-9._-]{1,16}(@[a-z0-9.-]{1,16})?") {
			let user = User::new(id);
			let s = user.user_string();
			prop_assert!(!s.contains('@'));
			prop_assert!(!s.contains('.'));
			prop_assert!(user.storage_name().starts_with("user-storage-"));
		}

		#[test]
		fn labels_round_trip_to_same_user(id in "[a-z0-9._-]{1,16}(@[a-z0-9.-]{1,16})?") {
			let user = User::new(id.clone());
			let rebuilt = User::from_labels(&user.labels());
			prop_assert_eq!(rebuilt.user_id(), id.as_str());
		}
	}
}
