// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Recognition of terminal resource states in a watch event stream.

use futures::StreamExt;
use tracing::{debug, warn};
use userpods_k8s::{
	EventStream, PersistentVolume, PersistentVolumeClaim, Pod, ResourceEvent, ResourceKind,
	ResourceObject, Service,
};

use crate::signal::ReadinessSignal;

const POD_READY_CONDITION: &str = "Ready";
const PV_AVAILABLE_PHASE: &str = "Available";
const PVC_BOUND_PHASE: &str = "Bound";
const NODE_PORT_SERVICE: &str = "NodePort";

/// The terminal state a classifier waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
	/// Pod ready, volume available, claim bound, or service exposed.
	Ready,
	/// The resource has been deleted.
	Deleted,
}

/// Recognizes one terminal condition for one resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classifier {
	kind: ResourceKind,
	condition: Condition,
}

impl Classifier {
	pub fn new(kind: ResourceKind, condition: Condition) -> Self {
		Self { kind, condition }
	}

	pub fn kind(&self) -> ResourceKind {
		self.kind
	}

	pub fn condition(&self) -> Condition {
		self.condition
	}

	/// Whether `event` shows the resource in the terminal condition.
	pub fn is_terminal(&self, event: &ResourceEvent) -> bool {
		match self.condition {
			Condition::Deleted => {
				matches!(event, ResourceEvent::Deleted(object) if object.kind() == self.kind)
			}
			Condition::Ready => match event {
				ResourceEvent::Modified(object) => self.object_is_ready(object),
				// Services are allocated on creation and may never be modified.
				ResourceEvent::Added(object @ ResourceObject::Service(_)) => {
					self.object_is_ready(object)
				}
				_ => false,
			},
		}
	}

	fn object_is_ready(&self, object: &ResourceObject) -> bool {
		match (self.kind, object) {
			(ResourceKind::Pod, ResourceObject::Pod(pod)) => pod_is_ready(pod),
			(ResourceKind::PersistentVolume, ResourceObject::PersistentVolume(pv)) => {
				volume_is_available(pv)
			}
			(ResourceKind::PersistentVolumeClaim, ResourceObject::PersistentVolumeClaim(pvc)) => {
				claim_is_bound(pvc)
			}
			(ResourceKind::Service, ResourceObject::Service(service)) => service_is_exposed(service),
			_ => false,
		}
	}

	/// Consume `events` until the terminal condition is seen, then send `true`.
	///
	/// Returns whether the condition was observed. The stream is dropped on
	/// return, which ends the subscription. Never sends `false`.
	pub async fn run(&self, mut events: EventStream, signal: &ReadinessSignal) -> bool {
		while let Some(item) = events.next().await {
			match item {
				Ok(event) if self.is_terminal(&event) => {
					debug!(kind = %self.kind, condition = ?self.condition, "terminal state observed");
					signal.send(true);
					return true;
				}
				Ok(_) => {}
				Err(e) => {
					warn!(kind = %self.kind, error = %e, "error in watch stream");
				}
			}
		}
		false
	}
}

/// A pod is ready when its `Ready` condition has status true.
pub fn pod_is_ready(pod: &Pod) -> bool {
	pod
		.status
		.as_ref()
		.and_then(|s| s.conditions.as_ref())
		.and_then(|conditions| conditions.iter().find(|c| c.type_ == POD_READY_CONDITION))
		.map(|c| c.status.eq_ignore_ascii_case("true"))
		.unwrap_or(false)
}

pub fn volume_is_available(pv: &PersistentVolume) -> bool {
	pv.status.as_ref().and_then(|s| s.phase.as_deref()) == Some(PV_AVAILABLE_PHASE)
}

pub fn claim_is_bound(pvc: &PersistentVolumeClaim) -> bool {
	pvc.status.as_ref().and_then(|s| s.phase.as_deref()) == Some(PVC_BOUND_PHASE)
}

/// A service is exposed once it has a cluster IP and, for `NodePort`
/// services, a node port on every port entry.
pub fn service_is_exposed(service: &Service) -> bool {
	let Some(spec) = service.spec.as_ref() else {
		return false;
	};
	let has_cluster_ip = spec
		.cluster_ip
		.as_deref()
		.map(|ip| !ip.is_empty())
		.unwrap_or(false);
	if !has_cluster_ip {
		return false;
	}
	if spec.type_.as_deref() == Some(NODE_PORT_SERVICE) {
		return spec
			.ports
			.as_ref()
			.map(|ports| ports.iter().all(|p| p.node_port.is_some()))
			.unwrap_or(false);
	}
	true
}
