//! Throughput throttling via a FIFO queue drained by a single worker.

// crates.io
use tokio::sync::oneshot;
// self
use crate::_prelude::*;

type QueuedJob = Pin<Box<dyn Future<Output = ()> + Send>>;

struct LimiterState {
	queue: VecDeque<QueuedJob>,
	draining: bool,
}

struct LimiterInner {
	state: Mutex<LimiterState>,
	interval: Duration,
}

/// Serializes submitted operations to at most one execution per fixed interval.
///
/// Operations are queued in submission order and drained by one worker task:
/// pop the head, run it to completion, sleep `1/requests_per_second` seconds,
/// repeat. The worker parks when the queue empties and is respawned by the next
/// submission, so an idle limiter costs nothing. No two operations ever run
/// concurrently through the same limiter; a slow operation therefore delays
/// everything queued behind it. Requires a running Tokio runtime.
#[derive(Clone)]
pub struct RateLimiter {
	inner: Arc<LimiterInner>,
}
impl RateLimiter {
	/// Throughput applied when no explicit rate is configured.
	pub const DEFAULT_REQUESTS_PER_SECOND: u32 = 10;

	/// Creates a limiter allowing `requests_per_second` dispatches (clamped to at least one).
	pub fn new(requests_per_second: u32) -> Self {
		let interval = Duration::from_secs(1) / requests_per_second.max(1);

		Self {
			inner: Arc::new(LimiterInner {
				state: Mutex::new(LimiterState { queue: VecDeque::new(), draining: false }),
				interval,
			}),
		}
	}

	/// Pause enforced between one operation's completion and the next start.
	pub fn interval(&self) -> Duration {
		self.inner.interval
	}

	/// Queues `operation` and resolves with its outcome once its turn completes.
	///
	/// Submission order is execution order. The future returned by `operation`
	/// runs on the drain worker, so it must own its captures.
	pub async fn add<T, F, Fut>(&self, operation: F) -> Result<T>
	where
		T: 'static + Send,
		F: 'static + Send + FnOnce() -> Fut,
		Fut: 'static + Send + Future<Output = Result<T>>,
	{
		let (tx, rx) = oneshot::channel();
		let job: QueuedJob = Box::pin(async move {
			let _ = tx.send(operation().await);
		});
		let spawn_worker = {
			let mut state = self.inner.state.lock();

			state.queue.push_back(job);

			if state.draining {
				false
			} else {
				state.draining = true;

				true
			}
		};

		if spawn_worker {
			tokio::spawn(Self::drain(self.inner.clone()));
		}

		rx.await.unwrap_or_else(|_| {
			Err(Error::aborted("rate limiter worker dropped the queued operation"))
		})
	}

	async fn drain(inner: Arc<LimiterInner>) {
		loop {
			let job = {
				let mut state = inner.state.lock();

				match state.queue.pop_front() {
					Some(job) => job,
					None => {
						state.draining = false;

						return;
					},
				}
			};

			job.await;

			tokio::time::sleep(inner.interval).await;
		}
	}
}
impl Default for RateLimiter {
	fn default() -> Self {
		Self::new(Self::DEFAULT_REQUESTS_PER_SECOND)
	}
}
impl Debug for RateLimiter {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RateLimiter")
			.field("interval", &self.inner.interval)
			.field("queued", &self.inner.state.lock().queue.len())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::time::Instant;
	// self
	use super::*;

	#[tokio::test]
	async fn executes_in_submission_order_with_spacing() {
		let limiter = RateLimiter::new(10);
		let started = Instant::now();
		let starts: Arc<Mutex<Vec<(u32, Duration)>>> = Default::default();
		let submit = |index: u32| {
			let limiter = limiter.clone();
			let starts = starts.clone();

			async move {
				limiter
					.add(move || async move {
						starts.lock().push((index, started.elapsed()));

						Ok(index)
					})
					.await
			}
		};
		let (first, second, third) = tokio::join!(submit(0), submit(1), submit(2));

		first.expect("First queued operation should succeed.");
		second.expect("Second queued operation should succeed.");
		third.expect("Third queued operation should succeed.");

		let starts = starts.lock();

		assert_eq!(starts.iter().map(|(index, _)| *index).collect::<Vec<_>>(), vec![0, 1, 2]);
		// Third start must trail the first by at least two 100ms slots.
		assert!(starts[2].1 - starts[0].1 >= Duration::from_millis(200));
	}

	#[tokio::test]
	async fn worker_restarts_after_going_idle() {
		let limiter = RateLimiter::new(50);
		let first = limiter.add(|| async { Ok(1_u32) }).await.expect("First add should succeed.");

		// Give the worker time to drain and park.
		tokio::time::sleep(Duration::from_millis(60)).await;

		let second =
			limiter.add(|| async { Ok(2_u32) }).await.expect("Second add should succeed.");

		assert_eq!((first, second), (1, 2));
	}

	#[tokio::test]
	async fn failures_propagate_to_the_submitter() {
		let limiter = RateLimiter::new(50);
		let result: Result<()> =
			limiter.add(|| async { Err(Error::aborted("scripted failure")) }).await;

		assert!(matches!(result, Err(Error::Aborted { .. })));
	}
}
