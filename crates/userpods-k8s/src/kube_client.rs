// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt::Debug;

use async_trait::async_trait;
use futures::StreamExt;
use kube::{
	api::{Api, AttachParams, DeleteParams, ListParams, PostParams, WatchEvent, WatchParams},
	Client,
};
use serde::de::DeserializeOwned;
use tokio::io::AsyncReadExt;
use tracing::{debug, instrument};

use crate::client::K8sClient;
use crate::error::K8sError;
use crate::types::{
	EventStream, ExecOutput, PersistentVolume, PersistentVolumeClaim, Pod, ResourceEvent,
	ResourceKind, ResourceObject, Service,
};

/// Production K8s client implementation using the kube crate.
pub struct KubeClient {
	client: Client,
}

impl KubeClient {
	/// Create a new KubeClient that auto-discovers cluster configuration.
	///
	/// This will attempt to load config from:
	/// 1. In-cluster service account (when running in K8s)
	/// 2. KUBECONFIG environment variable
	/// 3. ~/.kube/config
	pub async fn new() -> Result<Self, K8sError> {
		let client = Client::try_default().await?;
		debug!("K8s client initialized");
		Ok(Self { client })
	}

	fn pods(&self, namespace: &str) -> Api<Pod> {
		Api::namespaced(self.client.clone(), namespace)
	}

	fn volumes(&self) -> Api<PersistentVolume> {
		Api::all(self.client.clone())
	}

	fn claims(&self, namespace: &str) -> Api<PersistentVolumeClaim> {
		Api::namespaced(self.client.clone(), namespace)
	}

	fn services(&self, namespace: &str) -> Api<Service> {
		Api::namespaced(self.client.clone(), namespace)
	}
}

async fn list_labelled<K>(api: Api<K>, label_selector: &str) -> Result<Vec<K>, K8sError>
where
	K: Clone + DeserializeOwned + Debug,
{
	let lp = ListParams::default().labels(label_selector);
	Ok(api.list(&lp).await?.items)
}

async fn delete_named<K>(api: Api<K>, kind: ResourceKind, name: &str) -> Result<(), K8sError>
where
	K: Clone + DeserializeOwned + Debug,
{
	match api.delete(name, &DeleteParams::default()).await {
		Ok(_) => Ok(()),
		Err(kube::Error::Api(err)) if err.code == 404 => Err(K8sError::NotFound {
			kind,
			name: name.into(),
		}),
		Err(e) => Err(e.into()),
	}
}

async fn watch_named<K>(api: Api<K>, name: &str) -> Result<EventStream, K8sError>
where
	K: Clone + DeserializeOwned + Debug + Send + 'static,
	ResourceObject: From<K>,
{
	let wp = WatchParams::default().fields(&format!("metadata.name={name}"));
	let stream = api.watch(&wp, "0").await?;

	let mapped = stream.map(|item| match item {
		Ok(WatchEvent::Added(o)) => Ok(ResourceEvent::Added(o.into())),
		Ok(WatchEvent::Modified(o)) => Ok(ResourceEvent::Modified(o.into())),
		Ok(WatchEvent::Deleted(o)) => Ok(ResourceEvent::Deleted(o.into())),
		Ok(WatchEvent::Bookmark(_)) => Ok(ResourceEvent::Bookmark),
		Ok(WatchEvent::Error(err)) => Err(K8sError::StreamError {
			message: err.message,
		}),
		Err(e) => Err(K8sError::StreamError {
			message: e.to_string(),
		}),
	});
	Ok(Box::pin(mapped))
}

#[async_trait]
impl K8sClient for KubeClient {
	async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, K8sError> {
		list_labelled(self.pods(namespace), label_selector).await
	}

	async fn create_pod(&self, namespace: &str, pod: Pod) -> Result<Pod, K8sError> {
		let pod = self.pods(namespace).create(&PostParams::default(), &pod).await?;
		Ok(pod)
	}

	async fn delete_pod(&self, name: &str, namespace: &str) -> Result<(), K8sError> {
		delete_named(self.pods(namespace), ResourceKind::Pod, name).await
	}

	async fn list_persistent_volumes(
		&self,
		label_selector: &str,
	) -> Result<Vec<PersistentVolume>, K8sError> {
		list_labelled(self.volumes(), label_selector).await
	}

	async fn create_persistent_volume(
		&self,
		pv: PersistentVolume,
	) -> Result<PersistentVolume, K8sError> {
		let pv = self.volumes().create(&PostParams::default(), &pv).await?;
		Ok(pv)
	}

	async fn delete_persistent_volume(&self, name: &str) -> Result<(), K8sError> {
		delete_named(self.volumes(), ResourceKind::PersistentVolume, name).await
	}

	async fn list_persistent_volume_claims(
		&self,
		namespace: &str,
		label_selector: &str,
	) -> Result<Vec<PersistentVolumeClaim>, K8sError> {
		list_labelled(self.claims(namespace), label_selector).await
	}

	async fn create_persistent_volume_claim(
		&self,
		namespace: &str,
		pvc: PersistentVolumeClaim,
	) -> Result<PersistentVolumeClaim, K8sError> {
		let pvc = self
			.claims(namespace)
			.create(&PostParams::default(), &pvc)
			.await?;
		Ok(pvc)
	}

	async fn delete_persistent_volume_claim(
		&self,
		name: &str,
		namespace: &str,
	) -> Result<(), K8sError> {
		delete_named(
			self.claims(namespace),
			ResourceKind::PersistentVolumeClaim,
			name,
		)
		.await
	}

	async fn list_services(
		&self,
		namespace: &str,
		label_selector: &str,
	) -> Result<Vec<Service>, K8sError> {
		list_labelled(self.services(namespace), label_selector).await
	}

	async fn create_service(&self, namespace: &str, service: Service) -> Result<Service, K8sError> {
		let service = self
			.services(namespace)
			.create(&PostParams::default(), &service)
			.await?;
		Ok(service)
	}

	async fn delete_service(&self, name: &str, namespace: &str) -> Result<(), K8sError> {
		delete_named(self.services(namespace), ResourceKind::Service, name).await
	}

	#[instrument(skip(self))]
	async fn watch(
		&self,
		kind: ResourceKind,
		name: &str,
		namespace: &str,
	) -> Result<EventStream, K8sError> {
		let stream = match kind {
			ResourceKind::Pod => watch_named(self.pods(namespace), name).await?,
			ResourceKind::PersistentVolume => watch_named(self.volumes(), name).await?,
			ResourceKind::PersistentVolumeClaim => watch_named(self.claims(namespace), name).await?,
			ResourceKind::Service => watch_named(self.services(namespace), name).await?,
		};
		debug!("watch opened");
		Ok(stream)
	}

	#[instrument(skip(self))]
	async fn exec(
		&self,
		name: &str,
		namespace: &str,
		container: &str,
		command: &[String],
	) -> Result<ExecOutput, K8sError> {
		let ap = AttachParams::default()
			.container(container)
			.stdin(false)
			.stdout(true)
			.stderr(true);

		let mut attached = self
			.pods(namespace)
			.exec(name, command.to_vec(), &ap)
			.await
			.map_err(|e| match e {
				kube::Error::Api(ref err) if err.code == 404 => K8sError::NotFound {
					kind: ResourceKind::Pod,
					name: name.into(),
				},
				_ => K8sError::ExecError {
					message: e.to_string(),
				},
			})?;

		let stdout = attached.stdout();
		let stderr = attached.stderr();

		let read_stdout = async move {
			let mut buf = Vec::new();
			if let Some(mut reader) = stdout {
				reader.read_to_end(&mut buf).await?;
			}
			Ok::<_, std::io::Error>(buf)
		};
		let read_stderr = async move {
			let mut buf = Vec::new();
			if let Some(mut reader) = stderr {
				reader.read_to_end(&mut buf).await?;
			}
			Ok::<_, std::io::Error>(buf)
		};
		let (stdout, stderr) =
			tokio::try_join!(read_stdout, read_stderr).map_err(|e| K8sError::ExecError {
				message: e.to_string(),
			})?;
		let output = ExecOutput { stdout, stderr };

		attached.join().await.map_err(|e| K8sError::ExecError {
			message: e.to_string(),
		})?;

		debug!(
			stdout_bytes = output.stdout.len(),
			stderr_bytes = output.stderr.len(),
			"exec finished"
		);
		Ok(output)
	}
}
