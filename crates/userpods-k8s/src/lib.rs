// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! K8s client abstraction for user pod provisioning.
//!
//! This crate provides:
//! - A trait-based K8s client abstraction for testability
//! - Production implementation using the kube crate
//! - Watch event and target types shared with the provisioner

mod client;
mod error;
mod kube_client;
mod types;

pub use client::K8sClient;
pub use error::K8sError;
pub use kube_client::KubeClient;
pub use types::{
	Container, ContainerPort, EnvVar, EventStream, ExecOutput, IntOrString, NFSVolumeSource,
	ObjectMeta, ObjectReference, PersistentVolume, PersistentVolumeClaim,
	PersistentVolumeClaimSpec, PersistentVolumeClaimStatus, PersistentVolumeClaimVolumeSource,
	PersistentVolumeSpec, PersistentVolumeStatus, Pod, PodCondition, PodSpec, PodStatus, Quantity,
	ResourceEvent, ResourceKind, ResourceObject, Service, ServicePort, ServiceSpec, Time, Volume,
	VolumeResourceRequirements, WatchTarget,
};
