// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tempfile::TempDir;
use tracing_subscriber::fmt::MakeWriter;
use userpods_k8s::{
	Container, ContainerPort, EventStream, ExecOutput, K8sClient, K8sError, ObjectMeta,
	PersistentVolume, PersistentVolumeClaim, PersistentVolumeClaimStatus,
	PersistentVolumeClaimVolumeSource, PersistentVolumeStatus, Pod, PodCondition, PodSpec,
	PodStatus, ResourceEvent, ResourceKind, ResourceObject, Service, Volume,
};
use userpods_provisioner::{ExtractionPolicy, Provisioner, ProvisionerConfig, COPY_FOR_FRONTEND};

pub const SSH_NODE_PORT: i32 = 31022;

/// A file that `cat /tmp/<key>` only finds from the given attempt onwards.
struct ScriptedFile {
	content: Vec<u8>,
	available_from_attempt: u32,
}

/// In-memory cluster with scripted watch streams and pod files.
///
/// A watch with no script never reports anything.
pub struct MockK8sClient {
	pods: Mutex<HashMap<String, Pod>>,
	volumes: Mutex<HashMap<String, PersistentVolume>>,
	claims: Mutex<HashMap<String, PersistentVolumeClaim>>,
	services: Mutex<HashMap<String, Service>>,
	watch_scripts: Mutex<HashMap<(ResourceKind, String), Vec<(Duration, ResourceEvent)>>>,
	broken_watches: Mutex<HashSet<ResourceKind>>,
	files: Mutex<HashMap<String, ScriptedFile>>,
	exec_attempts: Mutex<HashMap<String, u32>>,
	opened_watches: Mutex<Vec<(ResourceKind, String)>>,
	live_watches: Arc<Mutex<Vec<(ResourceKind, String)>>>,
}

/// Removes its watch from the live list when the stream holding it drops.
struct LiveWatch {
	key: (ResourceKind, String),
	live: Arc<Mutex<Vec<(ResourceKind, String)>>>,
}

impl Drop for LiveWatch {
	fn drop(&mut self) {
		let mut live = self.live.lock().unwrap();
		if let Some(index) = live.iter().position(|key| *key == self.key) {
			live.remove(index);
		}
	}
}

impl MockK8sClient {
	pub fn new() -> Self {
		Self {
			pods: Mutex::new(HashMap::new()),
			volumes: Mutex::new(HashMap::new()),
			claims: Mutex::new(HashMap::new()),
			services: Mutex::new(HashMap::new()),
			watch_scripts: Mutex::new(HashMap::new()),
			broken_watches: Mutex::new(HashSet::new()),
			files: Mutex::new(HashMap::new()),
			exec_attempts: Mutex::new(HashMap::new()),
			opened_watches: Mutex::new(Vec::new()),
			live_watches: Arc::new(Mutex::new(Vec::new())),
		}
	}

	/// Deliver `event` on the watch of `kind/name`, `after` the watch opens.
	pub fn script(&self, kind: ResourceKind, name: &str, after: Duration, event: ResourceEvent) {
		self.watch_scripts
			.lock()
			.unwrap()
			.entry((kind, name.to_string()))
			.or_default()
			.push((after, event));
	}

	pub fn break_watches(&self, kind: ResourceKind) {
		self.broken_watches.lock().unwrap().insert(kind);
	}

	/// Make `/tmp/<key>` readable from `available_from_attempt` onwards.
	pub fn put_file(&self, key: &str, content: impl Into<Vec<u8>>, available_from_attempt: u32) {
		self.files.lock().unwrap().insert(
			format!("/tmp/{key}"),
			ScriptedFile {
				content: content.into(),
				available_from_attempt,
			},
		);
	}

	pub fn exec_attempts(&self, key: &str) -> u32 {
		self.exec_attempts
			.lock()
			.unwrap()
			.get(&format!("/tmp/{key}"))
			.copied()
			.unwrap_or(0)
	}

	pub fn opened_watches(&self) -> Vec<(ResourceKind, String)> {
		self.opened_watches.lock().unwrap().clone()
	}

	/// Watch streams that have been opened and not yet dropped.
	pub fn live_watches(&self) -> Vec<(ResourceKind, String)> {
		self.live_watches.lock().unwrap().clone()
	}

	pub fn insert_pod(&self, pod: Pod) {
		let name = pod.metadata.name.clone().unwrap_or_default();
		self.pods.lock().unwrap().insert(name, pod);
	}

	pub fn insert_service(&self, service: Service) {
		let name = service.metadata.name.clone().unwrap_or_default();
		self.services.lock().unwrap().insert(name, service);
	}

	pub fn insert_volume(&self, pv: PersistentVolume) {
		let name = pv.metadata.name.clone().unwrap_or_default();
		self.volumes.lock().unwrap().insert(name, pv);
	}

	pub fn insert_claim(&self, pvc: PersistentVolumeClaim) {
		let name = pvc.metadata.name.clone().unwrap_or_default();
		self.claims.lock().unwrap().insert(name, pvc);
	}

	pub fn pod(&self, name: &str) -> Option<Pod> {
		self.pods.lock().unwrap().get(name).cloned()
	}

	pub fn service(&self, name: &str) -> Option<Service> {
		self.services.lock().unwrap().get(name).cloned()
	}

	pub fn has_volume(&self, name: &str) -> bool {
		self.volumes.lock().unwrap().contains_key(name)
	}

	pub fn has_claim(&self, name: &str) -> bool {
		self.claims.lock().unwrap().contains_key(name)
	}
}

fn labels_match(labels: Option<&BTreeMap<String, String>>, selector: &str) -> bool {
	selector
		.split(',')
		.filter(|term| !term.is_empty())
		.all(|term| {
			let (key, value) = term.split_once('=').unwrap_or((term, ""));
			labels.and_then(|l| l.get(key)).map(String::as_str) == Some(value)
		})
}

fn select<T: Clone>(
	items: &Mutex<HashMap<String, T>>,
	selector: &str,
	meta: impl Fn(&T) -> &ObjectMeta,
) -> Vec<T> {
	items
		.lock()
		.unwrap()
		.values()
		.filter(|item| labels_match(meta(*item).labels.as_ref(), selector))
		.cloned()
		.collect()
}

fn remove<T>(items: &Mutex<HashMap<String, T>>, kind: ResourceKind, name: &str) -> Result<(), K8sError> {
	items
		.lock()
		.unwrap()
		.remove(name)
		.map(|_| ())
		.ok_or_else(|| K8sError::NotFound {
			kind,
			name: name.to_string(),
		})
}

#[async_trait]
impl K8sClient for MockK8sClient {
	async fn list_pods(&self, _namespace: &str, label_selector: &str) -> Result<Vec<Pod>, K8sError> {
		Ok(select(&self.pods, label_selector, |p| &p.metadata))
	}

	async fn create_pod(&self, _namespace: &str, pod: Pod) -> Result<Pod, K8sError> {
		self.insert_pod(pod.clone());
		Ok(pod)
	}

	async fn delete_pod(&self, name: &str, _namespace: &str) -> Result<(), K8sError> {
		remove(&self.pods, ResourceKind::Pod, name)
	}

	async fn list_persistent_volumes(
		&self,
		label_selector: &str,
	) -> Result<Vec<PersistentVolume>, K8sError> {
		Ok(select(&self.volumes, label_selector, |p| &p.metadata))
	}

	async fn create_persistent_volume(
		&self,
		pv: PersistentVolume,
	) -> Result<PersistentVolume, K8sError> {
		self.insert_volume(pv.clone());
		Ok(pv)
	}

	async fn delete_persistent_volume(&self, name: &str) -> Result<(), K8sError> {
		remove(&self.volumes, ResourceKind::PersistentVolume, name)
	}

	async fn list_persistent_volume_claims(
		&self,
		_namespace: &str,
		label_selector: &str,
	) -> Result<Vec<PersistentVolumeClaim>, K8sError> {
		Ok(select(&self.claims, label_selector, |p| &p.metadata))
	}

	async fn create_persistent_volume_claim(
		&self,
		_namespace: &str,
		pvc: PersistentVolumeClaim,
	) -> Result<PersistentVolumeClaim, K8sError> {
		self.insert_claim(pvc.clone());
		Ok(pvc)
	}

	async fn delete_persistent_volume_claim(
		&self,
		name: &str,
		_namespace: &str,
	) -> Result<(), K8sError> {
		remove(&self.claims, ResourceKind::PersistentVolumeClaim, name)
	}

	async fn list_services(
		&self,
		_namespace: &str,
		label_selector: &str,
	) -> Result<Vec<Service>, K8sError> {
		Ok(select(&self.services, label_selector, |s| &s.metadata))
	}

	/// Allocates a cluster IP and node ports the way the API server does.
	async fn create_service(&self, _namespace: &str, mut service: Service) -> Result<Service, K8sError> {
		if let Some(spec) = service.spec.as_mut() {
			spec.cluster_ip = Some("10.96.0.12".to_string());
			if spec.type_.as_deref() == Some("NodePort") {
				for port in spec.ports.iter_mut().flatten() {
					port.node_port.get_or_insert(SSH_NODE_PORT);
				}
			}
		}
		self.insert_service(service.clone());
		Ok(service)
	}

	async fn delete_service(&self, name: &str, _namespace: &str) -> Result<(), K8sError> {
		remove(&self.services, ResourceKind::Service, name)
	}

	async fn watch(
		&self,
		kind: ResourceKind,
		name: &str,
		_namespace: &str,
	) -> Result<EventStream, K8sError> {
		if self.broken_watches.lock().unwrap().contains(&kind) {
			return Err(K8sError::ApiError {
				message: "connection refused".to_string(),
			});
		}
		self.opened_watches
			.lock()
			.unwrap()
			.push((kind, name.to_string()));
		self.live_watches
			.lock()
			.unwrap()
			.push((kind, name.to_string()));
		let live = LiveWatch {
			key: (kind, name.to_string()),
			live: self.live_watches.clone(),
		};

		let mut script = self
			.watch_scripts
			.lock()
			.unwrap()
			.remove(&(kind, name.to_string()))
			.unwrap_or_default();
		script.sort_by_key(|(after, _)| *after);

		// Delays are measured from when the watch opens.
		let opened = tokio::time::Instant::now();
		let events = futures::stream::iter(script)
			.then(move |(after, event)| async move {
				tokio::time::sleep_until(opened + after).await;
				Ok::<_, K8sError>(event)
			})
			.chain(futures::stream::pending())
			.map(move |event| {
				let _live = &live;
				event
			});
		Ok(Box::pin(events))
	}

	async fn exec(
		&self,
		_name: &str,
		_namespace: &str,
		_container: &str,
		command: &[String],
	) -> Result<ExecOutput, K8sError> {
		let path = match command {
			[cat, path] if cat == "cat" => path.clone(),
			_ => {
				return Err(K8sError::ExecError {
					message: format!("unexpected command {command:?}"),
				})
			}
		};

		let attempt = {
			let mut attempts = self.exec_attempts.lock().unwrap();
			let attempt = attempts.entry(path.clone()).or_insert(0);
			*attempt += 1;
			*attempt
		};

		let files = self.files.lock().unwrap();
		match files.get(&path) {
			Some(file) if attempt >= file.available_from_attempt => Ok(ExecOutput {
				stdout: file.content.clone(),
				stderr: Vec::new(),
			}),
			_ => Ok(ExecOutput {
				stdout: Vec::new(),
				stderr: format!("cat: {path}: No such file or directory").into_bytes(),
			}),
		}
	}
}

pub struct Harness {
	pub client: Arc<MockK8sClient>,
	pub provisioner: Provisioner,
	pub token_dir: TempDir,
}

pub fn harness() -> Harness {
	harness_with(|_| {})
}

pub fn harness_with(configure: impl FnOnce(&mut ProvisionerConfig)) -> Harness {
	let token_dir = tempfile::tempdir().unwrap();
	let mut config = ProvisionerConfig {
		token_dir: token_dir.path().to_path_buf(),
		new_pod_extraction: ExtractionPolicy::new(10, Duration::from_secs(1)),
		..Default::default()
	};
	configure(&mut config);

	let client = Arc::new(MockK8sClient::new());
	let provisioner = Provisioner::new(client.clone(), config);
	Harness {
		client,
		provisioner,
		token_dir,
	}
}

pub fn secs(s: u64) -> Duration {
	Duration::from_secs(s)
}

/// A notebook pod for alice that listens on 22, mounts her storage and
/// asks for its `jupyter_token` to be copied out.
pub fn notebook_pod(name: &str) -> Pod {
	Pod {
		metadata: ObjectMeta {
			name: Some(name.to_string()),
			annotations: Some(BTreeMap::from([(
				"jupyter_token".to_string(),
				COPY_FOR_FRONTEND.to_string(),
			)])),
			..Default::default()
		},
		spec: Some(PodSpec {
			containers: vec![Container {
				name: "jupyter".to_string(),
				image: Some("sciencedata/jupyter:latest".to_string()),
				ports: Some(vec![
					ContainerPort {
						container_port: 8888,
						..Default::default()
					},
					ContainerPort {
						container_port: 22,
						..Default::default()
					},
				]),
				..Default::default()
			}],
			volumes: Some(vec![Volume {
				name: "storage".to_string(),
				persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
					claim_name: "user-storage-alice-example-org".to_string(),
					read_only: None,
				}),
				..Default::default()
			}]),
			..Default::default()
		}),
		status: None,
	}
}

/// A pod with one container and nothing else.
pub fn plain_pod(name: &str) -> Pod {
	Pod {
		metadata: ObjectMeta {
			name: Some(name.to_string()),
			..Default::default()
		},
		spec: Some(PodSpec {
			containers: vec![Container {
				name: "main".to_string(),
				image: Some("busybox".to_string()),
				..Default::default()
			}],
			..Default::default()
		}),
		status: None,
	}
}

fn named(name: &str) -> ObjectMeta {
	ObjectMeta {
		name: Some(name.to_string()),
		..Default::default()
	}
}

pub fn pod_ready(name: &str) -> ResourceEvent {
	ResourceEvent::Modified(ResourceObject::from(Pod {
		metadata: named(name),
		spec: None,
		status: Some(PodStatus {
			phase: Some("Running".to_string()),
			conditions: Some(vec![PodCondition {
				type_: "Ready".to_string(),
				status: "True".to_string(),
				..Default::default()
			}]),
			..Default::default()
		}),
	}))
}

pub fn volume_available(name: &str) -> ResourceEvent {
	ResourceEvent::Modified(ResourceObject::from(PersistentVolume {
		metadata: named(name),
		spec: None,
		status: Some(PersistentVolumeStatus {
			phase: Some("Available".to_string()),
			..Default::default()
		}),
	}))
}

pub fn claim_bound(name: &str) -> ResourceEvent {
	ResourceEvent::Modified(ResourceObject::from(PersistentVolumeClaim {
		metadata: named(name),
		spec: None,
		status: Some(PersistentVolumeClaimStatus {
			phase: Some("Bound".to_string()),
			..Default::default()
		}),
	}))
}

/// The SSH service as the API server reports it once allocated.
pub fn service_exposed(pod_name: &str, node_port: i32) -> ResourceEvent {
	let mut service = userpods_provisioner::target_ssh_service(pod_name, "sciencedata-dev");
	if let Some(spec) = service.spec.as_mut() {
		spec.cluster_ip = Some("10.96.0.12".to_string());
		for port in spec.ports.iter_mut().flatten() {
			port.node_port = Some(node_port);
		}
	}
	ResourceEvent::Added(ResourceObject::from(service))
}

pub fn deleted(kind: ResourceKind, name: &str) -> ResourceEvent {
	let meta = named(name);
	let object = match kind {
		ResourceKind::Pod => ResourceObject::from(Pod {
			metadata: meta,
			..Default::default()
		}),
		ResourceKind::PersistentVolume => ResourceObject::from(PersistentVolume {
			metadata: meta,
			..Default::default()
		}),
		ResourceKind::PersistentVolumeClaim => ResourceObject::from(PersistentVolumeClaim {
			metadata: meta,
			..Default::default()
		}),
		ResourceKind::Service => ResourceObject::from(Service {
			metadata: meta,
			..Default::default()
		}),
	};
	ResourceEvent::Deleted(object)
}

/// Formatted log lines written while the capture's guard is held.
#[derive(Clone, Default)]
pub struct LogCapture {
	output: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
	/// Install a debug-level subscriber for the current thread.
	pub fn install() -> (Self, tracing::subscriber::DefaultGuard) {
		let capture = Self::default();
		let subscriber = tracing_subscriber::fmt()
			.with_writer(capture.clone())
			.with_max_level(tracing::Level::DEBUG)
			.with_ansi(false)
			.without_time()
			.finish();
		let guard = tracing::subscriber::set_default(subscriber);
		(capture, guard)
	}

	pub fn lines(&self) -> Vec<String> {
		String::from_utf8_lossy(&self.output.lock().unwrap())
			.lines()
			.map(str::to_string)
			.collect()
	}

	/// Lines containing `message` that carry the exact `field=value` token.
	pub fn matching(&self, message: &str, field: &str) -> Vec<String> {
		self.lines()
			.into_iter()
			.filter(|line| line.contains(message))
			.filter(|line| line.split_whitespace().any(|token| token == field))
			.collect()
	}
}

pub struct CaptureWriter {
	output: Arc<Mutex<Vec<u8>>>,
}

impl Write for CaptureWriter {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		self.output.lock().unwrap().extend_from_slice(buf);
		Ok(buf.len())
	}

	fn flush(&mut self) -> io::Result<()> {
		Ok(())
	}
}

impl<'a> MakeWriter<'a> for LogCapture {
	type Writer = CaptureWriter;

	fn make_writer(&'a self) -> Self::Writer {
		CaptureWriter {
			output: self.output.clone(),
		}
	}
}
