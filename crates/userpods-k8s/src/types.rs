// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use futures::Stream;

use crate::error::K8sError;

pub use k8s_openapi::api::core::v1::{
	Container, ContainerPort, EnvVar, NFSVolumeSource, ObjectReference, PersistentVolume,
	PersistentVolumeClaim, PersistentVolumeClaimSpec, PersistentVolumeClaimStatus,
	PersistentVolumeClaimVolumeSource, PersistentVolumeSpec, PersistentVolumeStatus, Pod,
	PodCondition, PodSpec, PodStatus, Service, ServicePort, ServiceSpec, Volume,
	VolumeResourceRequirements,
};
pub use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
pub use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

/// The resource kinds the provisioner creates, deletes and watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
	Pod,
	PersistentVolume,
	PersistentVolumeClaim,
	Service,
}

impl ResourceKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			ResourceKind::Pod => "Pod",
			ResourceKind::PersistentVolume => "PersistentVolume",
			ResourceKind::PersistentVolumeClaim => "PersistentVolumeClaim",
			ResourceKind::Service => "Service",
		}
	}
}

impl fmt::Display for ResourceKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for ResourceKind {
	type Err = K8sError;

	/// Accepts both the full kind names and the short forms used by kubectl.
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"Pod" => Ok(ResourceKind::Pod),
			"PersistentVolume" | "PV" => Ok(ResourceKind::PersistentVolume),
			"PersistentVolumeClaim" | "PVC" => Ok(ResourceKind::PersistentVolumeClaim),
			"Service" | "SVC" => Ok(ResourceKind::Service),
			other => Err(K8sError::UnsupportedResourceKind {
				kind: other.to_string(),
			}),
		}
	}
}

/// A single named resource to observe, with the maximum time to wait for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
	kind: ResourceKind,
	name: String,
	timeout: Duration,
}

impl WatchTarget {
	pub fn new(kind: ResourceKind, name: impl Into<String>, timeout: Duration) -> Self {
		Self {
			kind,
			name: name.into(),
			timeout,
		}
	}

	/// Build a target from a textual kind, failing on kinds that cannot be watched.
	pub fn parse(kind: &str, name: impl Into<String>, timeout: Duration) -> Result<Self, K8sError> {
		Ok(Self::new(kind.parse::<ResourceKind>()?, name, timeout))
	}

	pub fn kind(&self) -> ResourceKind {
		self.kind
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn timeout(&self) -> Duration {
		self.timeout
	}
}

/// A resource object as carried by a watch event.
#[derive(Debug, Clone)]
pub enum ResourceObject {
	Pod(Box<Pod>),
	PersistentVolume(Box<PersistentVolume>),
	PersistentVolumeClaim(Box<PersistentVolumeClaim>),
	Service(Box<Service>),
}

impl ResourceObject {
	pub fn kind(&self) -> ResourceKind {
		match self {
			ResourceObject::Pod(_) => ResourceKind::Pod,
			ResourceObject::PersistentVolume(_) => ResourceKind::PersistentVolume,
			ResourceObject::PersistentVolumeClaim(_) => ResourceKind::PersistentVolumeClaim,
			ResourceObject::Service(_) => ResourceKind::Service,
		}
	}

	pub fn name(&self) -> Option<&str> {
		let meta = match self {
			ResourceObject::Pod(o) => &o.metadata,
			ResourceObject::PersistentVolume(o) => &o.metadata,
			ResourceObject::PersistentVolumeClaim(o) => &o.metadata,
			ResourceObject::Service(o) => &o.metadata,
		};
		meta.name.as_deref()
	}
}

impl From<Pod> for ResourceObject {
	fn from(o: Pod) -> Self {
		ResourceObject::Pod(Box::new(o))
	}
}

impl From<PersistentVolume> for ResourceObject {
	fn from(o: PersistentVolume) -> Self {
		ResourceObject::PersistentVolume(Box::new(o))
	}
}

impl From<PersistentVolumeClaim> for ResourceObject {
	fn from(o: PersistentVolumeClaim) -> Self {
		ResourceObject::PersistentVolumeClaim(Box::new(o))
	}
}

impl From<Service> for ResourceObject {
	fn from(o: Service) -> Self {
		ResourceObject::Service(Box::new(o))
	}
}

/// A state change reported by a watch.
#[derive(Debug, Clone)]
pub enum ResourceEvent {
	Added(ResourceObject),
	Modified(ResourceObject),
	Deleted(ResourceObject),
	Bookmark,
}

/// A pinned stream of watch events for a single resource.
///
/// Dropping the stream stops the underlying watch.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<ResourceEvent, K8sError>> + Send>>;

/// Captured output of a command run inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
	pub stdout: Vec<u8>,
	pub stderr: Vec<u8>,
}
