// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Dependency-ordered provisioning of user pods, storage and services.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn, Instrument};
use userpods_k8s::{Container, EnvVar, K8sClient, K8sError, Pod, ResourceKind, WatchTarget};

use crate::cache::{CacheStore, PodCache};
use crate::classifier::Condition;
use crate::config::ProvisionerConfig;
use crate::error::ProvisionerError;
use crate::extract::{ExtractionPolicy, Extractor};
use crate::pod::{services_selector, target_ssh_service, ManagedPod, PodInfo, LABEL_POD_NAME};
use crate::signal::ReadinessSignal;
use crate::user::User;
use crate::watch::WatchSession;

/// Watches and signals opened on behalf of one operation.
///
/// If the operation fails part way, everything opened so far is resolved
/// `false` and stopped.
#[derive(Default)]
struct Pending {
	sessions: Vec<WatchSession>,
	signals: Vec<ReadinessSignal>,
}

impl Pending {
	fn abandon(self) {
		for session in &self.sessions {
			session.signal().send(false);
			session.stop();
		}
		for signal in &self.signals {
			signal.send(false);
		}
	}

	fn combine(self) -> ReadinessSignal {
		let mut signals = self.signals;
		signals.extend(self.sessions.into_iter().map(WatchSession::into_signal));
		ReadinessSignal::all(signals)
	}
}

/// Provisions and tears down user pods and everything they depend on.
///
/// Every mutating operation returns a [`ReadinessSignal`] that resolves once
/// all affected resources reached their target state, or `false` once the
/// slowest of them timed out.
#[derive(Clone)]
pub struct Provisioner {
	client: Arc<dyn K8sClient>,
	config: Arc<ProvisionerConfig>,
	store: CacheStore,
}

impl Provisioner {
	pub fn new(client: Arc<dyn K8sClient>, config: ProvisionerConfig) -> Self {
		let store = CacheStore::new(config.token_dir.clone());
		Self {
			client,
			config: Arc::new(config),
			store,
		}
	}

	pub fn config(&self) -> &ProvisionerConfig {
		&self.config
	}

	pub fn cache_store(&self) -> &CacheStore {
		&self.store
	}

	fn namespace(&self) -> &str {
		&self.config.namespace
	}

	/// The user's pods, fresh from the cluster. The anonymous user sees all pods.
	#[instrument(skip_all, fields(user = %user.user_id()))]
	pub async fn list_pods(&self, user: &User) -> Result<Vec<ManagedPod>, ProvisionerError> {
		let pods = self
			.client
			.list_pods(self.namespace(), &user.label_selector())
			.await?;
		debug!(count = pods.len(), "listed pods");
		Ok(pods.into_iter().map(ManagedPod::new).collect())
	}

	/// Front-end metadata for each of the user's pods, read from their caches.
	pub async fn pod_infos(&self, user: &User) -> Result<Vec<PodInfo>, ProvisionerError> {
		let mut infos = Vec::new();
		for mut pod in self.list_pods(user).await? {
			infos.push(pod.info(&self.store).await);
		}
		Ok(infos)
	}

	async fn open_session(
		&self,
		kind: ResourceKind,
		name: &str,
		timeout: Duration,
		condition: Condition,
	) -> Result<WatchSession, ProvisionerError> {
		let target = WatchTarget::new(kind, name, timeout);
		Ok(WatchSession::open(&self.client, self.namespace(), target, condition).await?)
	}

	/// Watch `name` for readiness, then run `create`.
	async fn create_watched<T, F>(
		&self,
		pending: &mut Pending,
		kind: ResourceKind,
		name: &str,
		create: F,
	) -> Result<T, ProvisionerError>
	where
		F: Future<Output = Result<T, K8sError>>,
	{
		let session = self
			.open_session(kind, name, self.config.timeout_create, Condition::Ready)
			.await?;
		pending.sessions.push(session);
		let created = create.await?;
		info!(%kind, name, "created resource");
		Ok(created)
	}

	/// Watch `name` for deletion, then run `delete`. Returns whether the
	/// resource existed; a resource that is already gone counts as deleted.
	async fn delete_watched<F>(
		&self,
		pending: &mut Pending,
		kind: ResourceKind,
		name: &str,
		delete: F,
	) -> Result<bool, ProvisionerError>
	where
		F: Future<Output = Result<(), K8sError>>,
	{
		let session = self
			.open_session(kind, name, self.config.timeout_delete, Condition::Deleted)
			.await?;
		match delete.await {
			Ok(()) => {
				info!(%kind, name, "deleting resource");
				pending.sessions.push(session);
				Ok(true)
			}
			Err(e) if e.is_not_found() => {
				debug!(%kind, name, "resource already gone");
				session.signal().send(true);
				session.stop();
				pending.signals.push(session.into_signal());
				Ok(false)
			}
			Err(e) => {
				pending.sessions.push(session);
				Err(e.into())
			}
		}
	}

	/// Make sure the user's storage volume and claim exist.
	///
	/// If both already exist the returned signal is resolved `true`.
	/// Otherwise the missing halves are created and the signal resolves once
	/// the volume is available and the claim is bound.
	#[instrument(skip_all, fields(user = %user.user_id()))]
	pub async fn ensure_user_storage(&self, user: &User) -> Result<ReadinessSignal, ProvisionerError> {
		let mut pending = Pending::default();
		match self.ensure_user_storage_into(user, &mut pending).await {
			Ok(()) => Ok(pending.combine()),
			Err(e) => {
				pending.abandon();
				Err(e)
			}
		}
	}

	/// Storage half of [`Self::ensure_user_storage`]. Sessions land in
	/// `pending`, so abandoning the caller's operation stops them too.
	async fn ensure_user_storage_into(
		&self,
		user: &User,
		pending: &mut Pending,
	) -> Result<(), ProvisionerError> {
		if user.is_anonymous() {
			return Err(ProvisionerError::InvalidRequest {
				reason: "storage must belong to a user".to_string(),
			});
		}

		let selector = user.storage_selector();
		let volumes = self.client.list_persistent_volumes(&selector).await?;
		let claims = self
			.client
			.list_persistent_volume_claims(self.namespace(), &selector)
			.await?;
		if !volumes.is_empty() && !claims.is_empty() {
			debug!("user storage already exists");
			pending.signals.push(ReadinessSignal::resolved(true));
			return Ok(());
		}
		if user.silo_ip().is_empty() {
			return Err(ProvisionerError::InvalidRequest {
				reason: format!("no storage host given for user {}", user.user_id()),
			});
		}

		self.create_storage(user, volumes.is_empty(), claims.is_empty(), pending)
			.await
	}

	async fn create_storage(
		&self,
		user: &User,
		create_volume: bool,
		create_claim: bool,
		pending: &mut Pending,
	) -> Result<(), ProvisionerError> {
		let name = user.storage_name();
		if create_volume {
			let pv = user.target_storage_pv(&self.config);
			self.create_watched(
				pending,
				ResourceKind::PersistentVolume,
				&name,
				self.client.create_persistent_volume(pv),
			)
			.await?;
		}
		if create_claim {
			let pvc = user.target_storage_pvc(&self.config);
			self.create_watched(
				pending,
				ResourceKind::PersistentVolumeClaim,
				&name,
				self.client.create_persistent_volume_claim(self.namespace(), pvc),
			)
			.await?;
		}
		Ok(())
	}

	/// Create `pod` for `user` along with whatever it depends on.
	///
	/// The returned signal resolves `true` once the pod is ready, its SSH
	/// service (if it listens on port 22) is exposed, and the user's storage
	/// (if it mounts the user's claim) is bound. After that the pod's
	/// metadata cache is filled in the background.
	#[instrument(skip_all, fields(user = %user.user_id(), pod_name = pod.metadata.name.as_deref().unwrap_or_default()))]
	pub async fn create_pod(&self, user: &User, pod: Pod) -> Result<ReadinessSignal, ProvisionerError> {
		let pod = self.prepare_pod(user, pod)?;
		let mut pending = Pending::default();
		match self.create_pod_resources(user, pod, &mut pending).await {
			Ok(created) => {
				let aggregate = pending.combine();
				self.spawn_cache_population(ManagedPod::new(created), aggregate.clone());
				Ok(aggregate)
			}
			Err(e) => {
				pending.abandon();
				Err(e)
			}
		}
	}

	/// Stamp ownership labels and the configured pod settings onto `pod`.
	fn prepare_pod(&self, user: &User, mut pod: Pod) -> Result<Pod, ProvisionerError> {
		if user.is_anonymous() {
			return Err(ProvisionerError::InvalidRequest {
				reason: "pods must belong to a user".to_string(),
			});
		}
		let name = pod
			.metadata
			.name
			.clone()
			.filter(|name| !name.is_empty())
			.ok_or_else(|| ProvisionerError::InvalidRequest {
				reason: "pod has no name".to_string(),
			})?;
		let spec = pod
			.spec
			.as_mut()
			.filter(|spec| !spec.containers.is_empty())
			.ok_or_else(|| ProvisionerError::InvalidRequest {
				reason: format!("pod {name} has no containers"),
			})?;

		if let Some(policy) = &self.config.restart_policy {
			spec.restart_policy = Some(policy.clone());
		}
		for container in &mut spec.containers {
			apply_env_vars(container, &self.config.mandatory_env_vars);
		}

		let labels = pod.metadata.labels.get_or_insert_with(BTreeMap::new);
		labels.extend(user.labels());
		labels.insert(LABEL_POD_NAME.to_string(), name);
		pod.metadata.namespace = Some(self.namespace().to_string());
		Ok(pod)
	}

	async fn create_pod_resources(
		&self,
		user: &User,
		pod: Pod,
		pending: &mut Pending,
	) -> Result<Pod, ProvisionerError> {
		let managed = ManagedPod::new(pod.clone());
		let name = managed.name().to_string();

		if managed.mounts_claim(&user.storage_name()) {
			self.ensure_user_storage_into(user, pending).await?;
		}

		let created = self
			.create_watched(
				pending,
				ResourceKind::Pod,
				&name,
				self.client.create_pod(self.namespace(), pod),
			)
			.await?;

		if managed.needs_ssh_service() {
			let service = target_ssh_service(&name, self.namespace());
			let service_name = service.metadata.name.clone().unwrap_or_default();
			self.create_watched(
				pending,
				ResourceKind::Service,
				&service_name,
				self.client.create_service(self.namespace(), service),
			)
			.await?;
		}

		Ok(created)
	}

	fn spawn_cache_population(&self, mut pod: ManagedPod, ready: ReadinessSignal) {
		let this = self.clone();
		let span = tracing::info_span!("populate_cache", pod_name = pod.name());
		tokio::spawn(
			async move {
				if !ready.receive().await {
					info!("pod did not become ready, not filling its cache");
					return;
				}
				let policy = this.config.new_pod_extraction;
				if let Err(e) = this.populate_and_save(&mut pod, policy).await {
					warn!(error = %e, "failed to save pod cache");
				}
			}
			.instrument(span),
		);
	}

	/// Extract the pod's marked files and sibling-resource facts.
	///
	/// Extraction failures are logged and leave the key absent; this never fails.
	pub async fn populate_cache(&self, pod: &ManagedPod, policy: ExtractionPolicy) -> PodCache {
		let extractor = Extractor::new(&self.client, self.namespace(), self.config.token_byte_limit);
		let tokens = extractor
			.extract_tokens(pod.object(), &pod.copy_keys(), policy)
			.await;

		let services = if pod.needs_ssh_service() {
			match self
				.client
				.list_services(self.namespace(), &services_selector(pod.name()))
				.await
			{
				Ok(services) => services,
				Err(e) => {
					warn!(pod_name = pod.name(), error = %e, "failed to list pod services");
					Vec::new()
				}
			}
		} else {
			Vec::new()
		};

		PodCache {
			tokens,
			other_resource_info: pod.other_resource_info(&services),
		}
	}

	/// Populate the pod's cache under `policy` and persist it.
	pub async fn populate_and_save(
		&self,
		pod: &mut ManagedPod,
		policy: ExtractionPolicy,
	) -> Result<(), ProvisionerError> {
		let cache = self.populate_cache(pod, policy).await;
		self.store.save(pod.name(), &cache).await?;
		debug!(pod_name = pod.name(), tokens = cache.tokens.len(), "pod cache saved");
		pod.set_cache(cache);
		Ok(())
	}

	/// Re-read the cache of every running pod of the user, one attempt per file.
	/// Returns the number of pods refreshed.
	#[instrument(skip_all, fields(user = %user.user_id()))]
	pub async fn refresh_caches(&self, user: &User) -> Result<usize, ProvisionerError> {
		let mut refreshed = 0;
		for mut pod in self.list_pods(user).await? {
			if !pod.is_running() {
				debug!(pod_name = pod.name(), phase = pod.phase(), "skipping pod that is not running");
				continue;
			}
			self.populate_and_save(&mut pod, ExtractionPolicy::existing_pod())
				.await?;
			refreshed += 1;
		}
		Ok(refreshed)
	}

	/// Delete a pod, the services created for it and its cache file.
	///
	/// The signal resolves once the pod and all its services are gone.
	#[instrument(skip(self))]
	pub async fn delete_pod(&self, name: &str) -> Result<ReadinessSignal, ProvisionerError> {
		let services = self
			.client
			.list_services(self.namespace(), &services_selector(name))
			.await?;

		let mut pending = Pending::default();
		match self.delete_pod_resources(name, &services, &mut pending).await {
			Ok(()) => {
				if let Err(e) = self.store.remove(name).await {
					warn!(error = %e, "failed to remove pod cache");
				}
				Ok(pending.combine())
			}
			Err(e) => {
				pending.abandon();
				Err(e)
			}
		}
	}

	async fn delete_pod_resources(
		&self,
		name: &str,
		services: &[userpods_k8s::Service],
		pending: &mut Pending,
	) -> Result<(), ProvisionerError> {
		let existed = self
			.delete_watched(
				pending,
				ResourceKind::Pod,
				name,
				self.client.delete_pod(name, self.namespace()),
			)
			.await?;
		if !existed {
			return Err(ProvisionerError::PodNotFound {
				name: name.to_string(),
			});
		}

		for service in services {
			let Some(service_name) = service.metadata.name.as_deref() else {
				continue;
			};
			self.delete_watched(
				pending,
				ResourceKind::Service,
				service_name,
				self.client.delete_service(service_name, self.namespace()),
			)
			.await?;
		}
		Ok(())
	}

	/// Delete the user's storage claim and volume.
	#[instrument(skip_all, fields(user = %user.user_id()))]
	pub async fn delete_user_storage(&self, user: &User) -> Result<ReadinessSignal, ProvisionerError> {
		if user.is_anonymous() {
			return Err(ProvisionerError::InvalidRequest {
				reason: "storage must belong to a user".to_string(),
			});
		}
		let name = user.storage_name();
		let mut pending = Pending::default();
		let result = async {
			self.delete_watched(
				&mut pending,
				ResourceKind::PersistentVolumeClaim,
				&name,
				self.client
					.delete_persistent_volume_claim(&name, self.namespace()),
			)
			.await?;
			self.delete_watched(
				&mut pending,
				ResourceKind::PersistentVolume,
				&name,
				self.client.delete_persistent_volume(&name),
			)
			.await
		}
		.await;

		match result {
			Ok(_) => Ok(pending.combine()),
			Err(e) => {
				pending.abandon();
				Err(e)
			}
		}
	}
}

impl std::fmt::Debug for Provisioner {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Provisioner")
			.field("config", &self.config)
			.field("store", &self.store)
			.finish_non_exhaustive()
	}
}

/// Set each variable on the container, overriding any value it already has.
fn apply_env_vars(container: &mut Container, vars: &BTreeMap<String, String>) {
	if vars.is_empty() {
		return;
	}
	let env = container.env.get_or_insert_with(Vec::new);
	for (name, value) in vars {
		match env.iter_mut().find(|var| &var.name == name) {
			Some(existing) => {
				existing.value = Some(value.clone());
				existing.value_from = None;
			}
			None => env.push(EnvVar {
				name: name.clone(),
				value: Some(value.clone()),
				value_from: None,
			}),
		}
	}
}
