//! Duplicate-request suppression keyed by caller-supplied strings.

// crates.io
use tokio::sync::watch;
// self
use crate::{_prelude::*, normalize::ErrorEnvelope};

type PendingSlot<T, E> = watch::Receiver<Option<Result<T, E>>>;

/// Collapses concurrent operations sharing a key into one in-flight execution.
///
/// The first caller for a key runs the operation; everyone else arriving before
/// it settles awaits the same outcome and receives a clone of it. The
/// registration lives exactly as long as the operation, so a call issued after
/// settlement runs fresh. This suppresses redundant work, unlike
/// [`RateLimiter`](crate::limit::RateLimiter), which only throttles throughput.
#[derive(Debug)]
pub struct RequestDeduplicator<T, E = ErrorEnvelope> {
	pending: Mutex<HashMap<String, PendingSlot<T, E>>>,
}
impl<T, E> Default for RequestDeduplicator<T, E> {
	fn default() -> Self {
		Self { pending: Mutex::new(HashMap::new()) }
	}
}
impl<T, E> RequestDeduplicator<T, E>
where
	T: Clone,
	E: Clone,
{
	/// Creates an empty deduplicator.
	pub fn new() -> Self {
		Self::default()
	}

	/// Runs `operation` under `key`, or joins the in-flight execution for it.
	pub async fn enqueue<F, Fut>(&self, key: impl Into<String>, operation: F) -> Result<T, E>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<T, E>>,
	{
		let key = key.into();

		loop {
			let leader_slot = {
				let mut pending = self.pending.lock();

				match pending.get(&key) {
					Some(slot) => Err(slot.clone()),
					None => {
						let (tx, rx) = watch::channel(None);

						pending.insert(key.clone(), rx);

						Ok(tx)
					},
				}
			};
			let mut rx = match leader_slot {
				Ok(tx) => {
					let outcome = operation().await;

					// Deregister before publishing so late arrivals run fresh
					// instead of observing a settled slot.
					self.pending.lock().remove(&key);

					let _ = tx.send(Some(outcome.clone()));

					return outcome;
				},
				Err(rx) => rx,
			};

			loop {
				if let Some(outcome) = rx.borrow_and_update().clone() {
					return outcome;
				}
				if rx.changed().await.is_err() {
					// The leading execution was dropped mid-flight; check for a
					// final value, then give up the stale slot and run fresh.
					if let Some(outcome) = rx.borrow().clone() {
						return outcome;
					}

					self.pending.lock().remove(&key);

					break;
				}
			}
		}
	}

	/// Whether an execution is currently registered under `key`.
	pub fn is_queued(&self, key: &str) -> bool {
		self.pending.lock().contains_key(key)
	}

	/// Drops every registration; in-flight executions settle normally.
	pub fn clear(&self) {
		self.pending.lock().clear();
	}
}
