// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Single-resolution, timeout-bounded readiness signals.
//!
//! A [`ReadinessSignal`] resolves exactly once, to the first value sent to
//! it. A timer started at construction sends `false` when the timeout
//! elapses, so [`ReadinessSignal::receive`] never waits longer than the
//! timeout. Clones share the same underlying value.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tracing::debug;

struct Inner {
	value: watch::Sender<Option<bool>>,
	timeout: Duration,
}

impl Inner {
	/// Records `value` if nothing has been recorded yet. Returns whether it was recorded.
	fn resolve(&self, value: bool) -> bool {
		self.value.send_if_modified(|current| {
			if current.is_some() {
				return false;
			}
			*current = Some(value);
			true
		})
	}
}

/// A one-shot boolean future bounded by a timeout.
#[derive(Clone)]
pub struct ReadinessSignal {
	inner: Arc<Inner>,
}

impl ReadinessSignal {
	/// Create an unresolved signal that resolves to `false` after `timeout`.
	///
	/// Must be called from within a Tokio runtime.
	pub fn new(timeout: Duration) -> Self {
		let (value, _) = watch::channel(None);
		let inner = Arc::new(Inner { value, timeout });

		let timer = Arc::downgrade(&inner);
		tokio::spawn(async move {
			tokio::time::sleep(timeout).await;
			if let Some(inner) = timer.upgrade() {
				if inner.resolve(false) {
					debug!(timeout_ms = timeout.as_millis() as u64, "readiness signal timed out");
				}
			}
		});

		Self { inner }
	}

	/// Create a signal that is already resolved to `value`.
	pub fn resolved(value: bool) -> Self {
		let (value, _) = watch::channel(Some(value));
		Self {
			inner: Arc::new(Inner {
				value,
				timeout: Duration::ZERO,
			}),
		}
	}

	/// Resolve the signal to `value` unless it has already been resolved.
	///
	/// Never blocks. Returns `true` when this call was the one that resolved it.
	pub fn send(&self, value: bool) -> bool {
		self.inner.resolve(value)
	}

	/// Wait until the signal is resolved and return its value.
	///
	/// Every caller, before or after resolution, observes the same value.
	pub async fn receive(&self) -> bool {
		let mut rx = self.inner.value.subscribe();
		let ready = match rx.wait_for(Option::is_some).await {
			Ok(value) => *value == Some(true),
			// The sender lives in `inner`, which `self` keeps alive.
			Err(_) => false,
		};
		ready
	}

	/// The resolved value, or `None` while still pending.
	pub fn try_receive(&self) -> Option<bool> {
		*self.inner.value.borrow()
	}

	pub fn is_resolved(&self) -> bool {
		self.try_receive().is_some()
	}

	pub fn timeout(&self) -> Duration {
		self.inner.timeout
	}

	/// Aggregate `signals` into a new signal that resolves to their logical AND.
	///
	/// The aggregate's own timeout is the longest of the inputs', so it is
	/// never the first to give up. An empty set resolves to `true`.
	pub fn all(signals: Vec<ReadinessSignal>) -> ReadinessSignal {
		if signals.is_empty() {
			return ReadinessSignal::resolved(true);
		}
		let timeout = signals
			.iter()
			.map(ReadinessSignal::timeout)
			.max()
			.unwrap_or_default();
		let aggregate = ReadinessSignal::new(timeout);
		tokio::spawn(combine(signals, aggregate.clone()));
		aggregate
	}
}

impl std::fmt::Debug for ReadinessSignal {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ReadinessSignal")
			.field("value", &self.try_receive())
			.field("timeout", &self.inner.timeout)
			.finish()
	}
}

/// Wait for every signal to resolve and return the AND of their values.
///
/// All signals are awaited concurrently; a `false` does not short-circuit
/// the wait for the others.
pub async fn receive_all(signals: &[ReadinessSignal]) -> bool {
	join_all(signals.iter().map(|signal| signal.receive()))
		.await
		.into_iter()
		.all(|ready| ready)
}

/// Wait for every signal in `signals`, then publish their AND into `aggregate`.
pub async fn combine(signals: Vec<ReadinessSignal>, aggregate: ReadinessSignal) {
	let ready = receive_all(&signals).await;
	debug!(inputs = signals.len(), ready, "combined readiness signals");
	aggregate.send(ready);
}
