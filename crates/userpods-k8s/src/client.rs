// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;

use crate::error::K8sError;
use crate::types::{
	EventStream, ExecOutput, PersistentVolume, PersistentVolumeClaim, Pod, ResourceKind, Service,
};

/// Trait for K8s client operations.
///
/// This abstraction allows for easy mocking in tests while providing
/// a clean interface for the operations needed by the user pod provisioner.
/// Persistent volumes are cluster scoped; everything else lives in a namespace.
#[async_trait]
pub trait K8sClient: Send + Sync {
	/// List pods in a namespace matching the given label selector.
	async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, K8sError>;

	/// Create a new pod in the specified namespace.
	async fn create_pod(&self, namespace: &str, pod: Pod) -> Result<Pod, K8sError>;

	/// Delete a pod by name from the specified namespace.
	async fn delete_pod(&self, name: &str, namespace: &str) -> Result<(), K8sError>;

	/// List persistent volumes matching the given label selector.
	async fn list_persistent_volumes(
		&self,
		label_selector: &str,
	) -> Result<Vec<PersistentVolume>, K8sError>;

	async fn create_persistent_volume(
		&self,
		pv: PersistentVolume,
	) -> Result<PersistentVolume, K8sError>;

	async fn delete_persistent_volume(&self, name: &str) -> Result<(), K8sError>;

	/// List persistent volume claims in a namespace matching the given label selector.
	async fn list_persistent_volume_claims(
		&self,
		namespace: &str,
		label_selector: &str,
	) -> Result<Vec<PersistentVolumeClaim>, K8sError>;

	async fn create_persistent_volume_claim(
		&self,
		namespace: &str,
		pvc: PersistentVolumeClaim,
	) -> Result<PersistentVolumeClaim, K8sError>;

	async fn delete_persistent_volume_claim(&self, name: &str, namespace: &str)
		-> Result<(), K8sError>;

	/// List services in a namespace matching the given label selector.
	async fn list_services(
		&self,
		namespace: &str,
		label_selector: &str,
	) -> Result<Vec<Service>, K8sError>;

	async fn create_service(&self, namespace: &str, service: Service) -> Result<Service, K8sError>;

	async fn delete_service(&self, name: &str, namespace: &str) -> Result<(), K8sError>;

	/// Open a watch on the single resource of `kind` called `name`.
	///
	/// The returned stream yields events until it is dropped or the server
	/// closes the watch. `namespace` is ignored for cluster-scoped kinds.
	async fn watch(
		&self,
		kind: ResourceKind,
		name: &str,
		namespace: &str,
	) -> Result<EventStream, K8sError>;

	/// Run `command` inside `container` of pod `name` and capture its output.
	async fn exec(
		&self,
		name: &str,
		namespace: &str,
		container: &str,
		command: &[String],
	) -> Result<ExecOutput, K8sError>;
}
