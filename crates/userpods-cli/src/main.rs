// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! `userpods`: provision and tear down user pods from the command line.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use userpods_config::{BackendConfig, LogFormat};
use userpods_k8s::{K8sClient, KubeClient, Pod};
use userpods_provisioner::{
	ExtractionPolicy, Provisioner, ProvisionerConfig, ReadinessSignal, User,
};

#[derive(Parser, Debug)]
#[command(
	name = "userpods",
	about = "Dependency-ordered provisioning of user pods",
	version
)]
struct Args {
	/// Path to a TOML config file (defaults to /etc/userpods/backend.toml)
	#[arg(long, global = true, env = "USERPODS_CONFIG")]
	config: Option<PathBuf>,

	/// Log level for the userpods crates, overriding configuration
	#[arg(long, global = true)]
	log_level: Option<String>,

	/// Emit logs as JSON
	#[arg(long, global = true)]
	json_logs: bool,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// List a user's pods with their cached metadata, as JSON
	List {
		/// User id (name@domain); omit to list every user's pods
		#[arg(long, default_value = "")]
		user: String,
	},
	/// Create the user's storage volume and claim
	CreateStorage {
		#[arg(long)]
		user: String,
		#[arg(long)]
		silo_ip: String,
	},
	/// Create a pod from a JSON manifest, with its storage and ssh service
	CreatePod {
		#[arg(long)]
		user: String,
		#[arg(long)]
		silo_ip: String,
		/// Pod manifest in JSON
		#[arg(long)]
		manifest: PathBuf,
	},
	/// Delete a pod and its services
	DeletePod { name: String },
	/// Delete the user's storage claim and volume
	DeleteStorage {
		#[arg(long)]
		user: String,
	},
	/// Re-read metadata of the user's running pods
	Refresh {
		#[arg(long)]
		user: String,
	},
}

#[tokio::main]
async fn main() -> Result<()> {
	let args = Args::parse();

	let mut config = match &args.config {
		Some(path) => userpods_config::load_config_with_file(path),
		None => userpods_config::load_config(),
	}
	.context("failed to load configuration")?;
	if let Some(level) = &args.log_level {
		config.logging.level = level.clone();
	}
	if args.json_logs {
		config.logging.format = LogFormat::Json;
	}

	init_tracing(&config);

	let client: Arc<dyn K8sClient> = Arc::new(
		KubeClient::new()
			.await
			.context("failed to connect to the cluster")?,
	);
	let provisioner = Provisioner::new(client, provisioner_config(&config));

	run(&provisioner, args.command).await
}

async fn run(provisioner: &Provisioner, command: Command) -> Result<()> {
	match command {
		Command::List { user } => {
			let infos = provisioner
				.pod_infos(&User::new(user))
				.await
				.context("failed to list pods")?;
			println!("{}", serde_json::to_string_pretty(&infos)?);
		}
		Command::CreateStorage { user, silo_ip } => {
			let user = User::new(user).with_silo_ip(silo_ip);
			let signal = provisioner
				.ensure_user_storage(&user)
				.await
				.context("failed to create user storage")?;
			report(signal).await;
		}
		Command::CreatePod {
			user,
			silo_ip,
			manifest,
		} => {
			let pod = read_manifest(&manifest)?;
			let pod_name = pod.metadata.name.clone().unwrap_or_default();
			let user = User::new(user).with_silo_ip(silo_ip);
			let signal = provisioner
				.create_pod(&user, pod)
				.await
				.context("failed to create pod")?;
			if report(signal).await {
				// Cache population runs in the background once the pod is ready.
				wait_for_cache(provisioner, &pod_name).await;
			}
		}
		Command::DeletePod { name } => {
			let signal = provisioner
				.delete_pod(&name)
				.await
				.with_context(|| format!("failed to delete pod {name}"))?;
			report(signal).await;
		}
		Command::DeleteStorage { user } => {
			let signal = provisioner
				.delete_user_storage(&User::new(user))
				.await
				.context("failed to delete user storage")?;
			report(signal).await;
		}
		Command::Refresh { user } => {
			let refreshed = provisioner
				.refresh_caches(&User::new(user))
				.await
				.context("failed to refresh pod caches")?;
			println!("refreshed {refreshed} pod(s)");
		}
	}
	Ok(())
}

async fn report(signal: ReadinessSignal) -> bool {
	let ready = signal.receive().await;
	println!("{}", if ready { "ready" } else { "timed out" });
	ready
}

/// Waits until the background task has written the pod's metadata cache,
/// giving up once the extraction policy's retries must have run out.
async fn wait_for_cache(provisioner: &Provisioner, pod_name: &str) {
	let policy = provisioner.config().new_pod_extraction;
	let budget = policy.delay() * policy.max_attempts() + Duration::from_secs(5);
	let deadline = tokio::time::Instant::now() + budget;
	while tokio::time::Instant::now() < deadline {
		if let Ok(Some(_)) = provisioner.cache_store().load(pod_name).await {
			info!(pod_name, "metadata cache written");
			return;
		}
		tokio::time::sleep(Duration::from_millis(500)).await;
	}
}

fn read_manifest(path: &Path) -> Result<Pod> {
	let raw = std::fs::read_to_string(path)
		.with_context(|| format!("failed to read manifest {}", path.display()))?;
	serde_json::from_str(&raw)
		.with_context(|| format!("failed to parse pod manifest {}", path.display()))
}

fn init_tracing(config: &BackendConfig) {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| format!("warn,userpods={}", config.logging.level).into());
	let registry = tracing_subscriber::registry().with(filter);

	match config.logging.format {
		LogFormat::Json => registry
			.with(tracing_subscriber::fmt::layer().json())
			.init(),
		LogFormat::Compact => registry
			.with(tracing_subscriber::fmt::layer().compact())
			.init(),
		LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
	}

	info!(
		namespace = %config.namespace,
		log_format = %config.logging.format,
		"starting userpods"
	);
}

fn provisioner_config(config: &BackendConfig) -> ProvisionerConfig {
	ProvisionerConfig {
		namespace: config.namespace.clone(),
		timeout_create: Duration::from_secs(config.timeout_create_secs),
		timeout_delete: Duration::from_secs(config.timeout_delete_secs),
		token_dir: config.token_dir.clone(),
		token_byte_limit: config.token_byte_limit,
		restart_policy: config.restart_policy.map(|p| p.as_str().to_string()),
		nfs_storage_root: config.nfs_storage_root.clone(),
		storage_capacity: config.storage_capacity.clone(),
		mandatory_env_vars: config.mandatory_env_vars.clone(),
		new_pod_extraction: ExtractionPolicy::new(
			config.new_pod_attempts,
			Duration::from_millis(config.new_pod_retry_delay_ms),
		),
	}
}
