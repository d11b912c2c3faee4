// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Timeout-bounded watch sessions on a single named resource.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};
use userpods_k8s::{K8sClient, K8sError, WatchTarget};

use crate::classifier::{Classifier, Condition};
use crate::signal::ReadinessSignal;

/// A live watch that resolves a [`ReadinessSignal`] when its target reaches
/// a terminal condition, or resolves it `false` at the target's timeout.
pub struct WatchSession {
	target: WatchTarget,
	signal: ReadinessSignal,
	task: JoinHandle<()>,
}

impl WatchSession {
	/// Open the watch and start observing it in the background.
	///
	/// Returns once the subscription is established, so resources created
	/// afterwards cannot slip past it. If the subscription cannot be opened
	/// the signal is resolved `false` before the error is returned.
	pub async fn start(
		client: &Arc<dyn K8sClient>,
		namespace: &str,
		target: WatchTarget,
		condition: Condition,
		signal: ReadinessSignal,
	) -> Result<Self, K8sError> {
		let deadline = Instant::now() + target.timeout();
		let classifier = Classifier::new(target.kind(), condition);

		let events = match client.watch(target.kind(), target.name(), namespace).await {
			Ok(events) => events,
			Err(e) => {
				warn!(kind = %target.kind(), name = %target.name(), error = %e, "failed to open watch");
				signal.send(false);
				return Err(e);
			}
		};

		let span = tracing::info_span!("watch", kind = %target.kind(), name = %target.name());
		let task_signal = signal.clone();
		let task = tokio::spawn(
			async move {
				match tokio::time::timeout_at(deadline, classifier.run(events, &task_signal)).await {
					Ok(true) => {}
					Ok(false) => {
						debug!("watch stream closed before terminal state, waiting out timeout");
						tokio::time::sleep_until(deadline).await;
						if task_signal.send(false) {
							info!("watch timed out");
						}
					}
					Err(_) => {
						if task_signal.send(false) {
							info!("watch timed out");
						}
					}
				}
			}
			.instrument(span),
		);

		Ok(Self {
			target,
			signal,
			task,
		})
	}

	/// Open a session with a fresh signal bounded by the target's timeout.
	pub async fn open(
		client: &Arc<dyn K8sClient>,
		namespace: &str,
		target: WatchTarget,
		condition: Condition,
	) -> Result<Self, K8sError> {
		let signal = ReadinessSignal::new(target.timeout());
		Self::start(client, namespace, target, condition, signal).await
	}

	pub fn target(&self) -> &WatchTarget {
		&self.target
	}

	pub fn signal(&self) -> &ReadinessSignal {
		&self.signal
	}

	/// Stop observing. The signal is left as it is; if still pending, its
	/// own timer resolves it.
	pub fn stop(&self) {
		self.task.abort();
	}

	pub fn into_signal(self) -> ReadinessSignal {
		self.signal
	}
}

impl std::fmt::Debug for WatchSession {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("WatchSession")
			.field("target", &self.target)
			.field("signal", &self.signal)
			.finish()
	}
}
