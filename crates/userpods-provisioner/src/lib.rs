// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Readiness signalling and dependency-ordered provisioning of user pods.
//!
//! The building blocks, leaves first:
//! - [`ReadinessSignal`]: a one-shot boolean that resolves `false` at its timeout
//! - [`Classifier`]: recognises a resource's terminal state in its event stream
//! - [`WatchSession`]: a watch on one named resource, bounded by a timeout
//! - [`ReadinessSignal::all`]: the AND of several signals, as another signal
//! - [`CacheStore`]: per-pod metadata extracted from running containers
//!
//! [`Provisioner`] ties them together for pods, their storage and services.

mod cache;
mod classifier;
mod config;
mod error;
mod extract;
mod pod;
mod provisioner;
mod signal;
mod user;
mod watch;

pub use cache::{CacheStore, PodCache};
pub use classifier::{
	claim_is_bound, pod_is_ready, service_is_exposed, volume_is_available, Classifier, Condition,
};
pub use config::ProvisionerConfig;
pub use error::{CacheError, ExtractError, ProvisionerError};
pub use extract::{ExtractionPolicy, Extractor};
pub use pod::{
	services_selector, ssh_service_name, target_ssh_service, ManagedPod, PodInfo,
	COPY_FOR_FRONTEND, LABEL_CREATED_FOR_POD, LABEL_POD_NAME, SSH_PORT_KEY,
};
pub use provisioner::Provisioner;
pub use signal::{combine, receive_all, ReadinessSignal};
pub use user::User;
pub use watch::WatchSession;
