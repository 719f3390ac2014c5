//! Retry policies with exponential backoff for failed dispatch attempts.

// self
use crate::_prelude::*;

/// Predicate consulted before each re-attempt; returning `false` stops retrying.
pub type RetryPredicate = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// Re-invokes a failed operation with exponentially growing delays.
///
/// A policy configured with `retry = N` allows `N + 1` total attempts. The delay
/// before attempt `k + 1` is `retry_delay * 2^k`, so the default one-second base
/// yields 1s, 2s, 4s, ... gaps. Errors that the taxonomy marks non-retryable
/// (aborts, refresh failures) propagate immediately regardless of the budget.
#[derive(Clone)]
pub struct RetryPolicy {
	/// Number of re-attempts allowed after the initial try.
	pub retry: u32,
	/// Base delay used for the first backoff step.
	pub retry_delay: Duration,
	/// Optional caller-supplied predicate deciding whether an error is worth retrying.
	pub should_retry: Option<RetryPredicate>,
}
impl RetryPolicy {
	const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1_000);

	/// Creates a policy allowing `retry` re-attempts with the default one-second base delay.
	pub fn times(retry: u32) -> Self {
		Self { retry, retry_delay: Self::DEFAULT_RETRY_DELAY, should_retry: None }
	}

	/// Overrides the base backoff delay.
	pub fn with_delay(mut self, delay: Duration) -> Self {
		self.retry_delay = delay;

		self
	}

	/// Installs a predicate consulted before each re-attempt.
	pub fn with_predicate(
		mut self,
		predicate: impl Fn(&Error) -> bool + Send + Sync + 'static,
	) -> Self {
		self.should_retry = Some(Arc::new(predicate));

		self
	}

	/// Runs `operation` until it succeeds or the attempt budget is exhausted.
	///
	/// The last encountered failure is what propagates when every attempt fails.
	pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		let mut attempt = 0;

		loop {
			match operation().await {
				Ok(value) => return Ok(value),
				Err(error) => {
					let vetoed =
						self.should_retry.as_ref().is_some_and(|predicate| !predicate(&error));

					if attempt >= self.retry || !error.is_retryable() || vetoed {
						return Err(error);
					}

					tokio::time::sleep(self.backoff_delay(attempt)).await;

					attempt += 1;
				},
			}
		}
	}

	fn backoff_delay(&self, attempt: u32) -> Duration {
		self.retry_delay.saturating_mul(2_u32.saturating_pow(attempt))
	}
}
impl Debug for RetryPolicy {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RetryPolicy")
			.field("retry", &self.retry)
			.field("retry_delay", &self.retry_delay)
			.field("should_retry_set", &self.should_retry.is_some())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::{
		sync::atomic::{AtomicU32, Ordering},
		time::Instant,
	};
	// self
	use super::*;
	use crate::error::TransportError;

	fn network_failure() -> Error {
		TransportError::Io(std::io::Error::other("connection refused")).into()
	}

	#[tokio::test]
	async fn exhausts_the_attempt_budget_with_growing_delays() {
		let calls = AtomicU32::new(0);
		let policy = RetryPolicy::times(2).with_delay(Duration::from_millis(100));
		let started = Instant::now();
		let result: Result<()> = policy
			.run(|| {
				let attempt = calls.fetch_add(1, Ordering::SeqCst);

				async move {
					Err(TransportError::Io(std::io::Error::other(format!(
						"connection refused on attempt {attempt}"
					)))
					.into())
				}
			})
			.await;
		let error = result.expect_err("Exhausted retries should propagate the failure.");

		assert_eq!(calls.load(Ordering::SeqCst), 3);
		// 100ms + 200ms of backoff at minimum, and the last failure is the one
		// that comes back.
		assert!(started.elapsed() >= Duration::from_millis(300));
		match error {
			Error::Transport(TransportError::Io(io)) =>
				assert_eq!(io.to_string(), "connection refused on attempt 2"),
			other => panic!("Expected the final transport failure, got {other:?}."),
		}
	}

	#[tokio::test]
	async fn predicate_veto_stops_after_the_first_attempt() {
		let calls = AtomicU32::new(0);
		let policy = RetryPolicy::times(3)
			.with_delay(Duration::from_millis(10))
			.with_predicate(|_| false);
		let result: Result<()> = policy
			.run(|| {
				calls.fetch_add(1, Ordering::SeqCst);

				async { Err(network_failure()) }
			})
			.await;

		assert!(result.is_err());
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn aborts_are_never_retried() {
		let calls = AtomicU32::new(0);
		let policy = RetryPolicy::times(5).with_delay(Duration::from_millis(10));
		let result: Result<()> = policy
			.run(|| {
				calls.fetch_add(1, Ordering::SeqCst);

				async { Err(Error::aborted("cancelled mid-flight")) }
			})
			.await;

		assert!(matches!(result, Err(Error::Aborted { .. })));
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn success_on_a_later_attempt_returns_the_value() {
		let calls = AtomicU32::new(0);
		let policy = RetryPolicy::times(2).with_delay(Duration::from_millis(10));
		let value = policy
			.run(|| {
				let attempt = calls.fetch_add(1, Ordering::SeqCst);

				async move { if attempt == 0 { Err(network_failure()) } else { Ok(42_u32) } }
			})
			.await
			.expect("Retry should recover once the operation succeeds.");

		assert_eq!(value, 42);
		assert_eq!(calls.load(Ordering::SeqCst), 2);
	}
}
