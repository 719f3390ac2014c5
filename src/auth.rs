//! Credential slots and refresh orchestration for authenticated dispatch.
//!
//! [`CredentialStore`] owns two independently nullable slots (access + refresh
//! token) behind a pluggable [`KvStore`] and knows how to exchange the refresh
//! token for fresh credentials against a configured endpoint. Concurrent
//! refreshes are coalesced: callers queue behind a singleflight guard and reuse
//! the token the winning caller stored, so a burst of unauthenticated calls
//! produces a single refresh exchange.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// self
use crate::{
	_prelude::*,
	error::RefreshError,
	http::{CancelToken, HttpTransport, TransportCall, TransportCallError},
	message::Method,
	obs::{self, CallKind, CallOutcome, CallSpan},
	store::KvStore,
};

/// Redacted token wrapper keeping sensitive material out of logs.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenSecret(String);
impl TokenSecret {
	/// Wraps a new secret string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the inner token value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}
impl AsRef<str> for TokenSecret {
	fn as_ref(&self) -> &str {
		self.expose()
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("TokenSecret").field(&"<redacted>").finish()
	}
}
impl Display for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

/// Thread-safe counters for credential refresh attempts.
#[derive(Debug, Default)]
pub struct RefreshMetrics {
	attempts: AtomicU64,
	success: AtomicU64,
	failure: AtomicU64,
}
impl RefreshMetrics {
	/// Returns the total number of refresh exchanges attempted.
	pub fn attempts(&self) -> u64 {
		self.attempts.load(Ordering::Relaxed)
	}

	/// Returns the number of successful refresh exchanges.
	pub fn successes(&self) -> u64 {
		self.success.load(Ordering::Relaxed)
	}

	/// Returns the number of failed refresh exchanges.
	pub fn failures(&self) -> u64 {
		self.failure.load(Ordering::Relaxed)
	}

	pub(crate) fn record_attempt(&self) {
		self.attempts.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_success(&self) {
		self.success.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_failure(&self) {
		self.failure.fetch_add(1, Ordering::Relaxed);
	}
}

/// Payload shape returned by the refresh endpoint.
#[derive(Debug, Deserialize)]
struct RefreshedCredentials {
	access_token: String,
	#[serde(default)]
	refresh_token: Option<String>,
}

/// Holds access/refresh tokens in a pluggable store and refreshes them on demand.
#[derive(Clone)]
pub struct CredentialStore<C>
where
	C: ?Sized + HttpTransport,
{
	/// Persistence surface holding the two credential slots.
	pub store: Arc<dyn KvStore>,
	/// Shared metrics recorder for refresh outcomes.
	pub metrics: Arc<RefreshMetrics>,
	http: Arc<C>,
	endpoint: Url,
	access_key: String,
	refresh_key: String,
	refresh_guard: Arc<AsyncMutex<()>>,
}
impl<C> CredentialStore<C>
where
	C: ?Sized + HttpTransport,
{
	/// Storage key holding the access token unless overridden.
	pub const DEFAULT_ACCESS_KEY: &'static str = "auth_token";
	/// Storage key holding the refresh token unless overridden.
	pub const DEFAULT_REFRESH_KEY: &'static str = "refresh_token";
	/// Transport timeout applied to the refresh exchange.
	const REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

	/// Creates a store refreshing against `endpoint` through the provided transport.
	pub fn new(store: Arc<dyn KvStore>, endpoint: Url, http: impl Into<Arc<C>>) -> Self {
		Self {
			store,
			metrics: Default::default(),
			http: http.into(),
			endpoint,
			access_key: Self::DEFAULT_ACCESS_KEY.into(),
			refresh_key: Self::DEFAULT_REFRESH_KEY.into(),
			refresh_guard: Default::default(),
		}
	}

	/// Overrides the storage keys backing the two credential slots.
	pub fn with_keys(
		mut self,
		access_key: impl Into<String>,
		refresh_key: impl Into<String>,
	) -> Self {
		self.access_key = access_key.into();
		self.refresh_key = refresh_key.into();

		self
	}

	/// Returns the refresh endpoint this store exchanges tokens against.
	pub fn endpoint(&self) -> &Url {
		&self.endpoint
	}

	/// Reads the access token slot.
	pub async fn access_token(&self) -> Result<Option<TokenSecret>> {
		Ok(self.store.get(&self.access_key).await?.map(TokenSecret::new))
	}

	/// Persists a new access token.
	pub async fn set_access_token(&self, token: impl AsRef<str>) -> Result<()> {
		Ok(self.store.set(&self.access_key, token.as_ref()).await?)
	}

	/// Reads the refresh token slot.
	pub async fn refresh_token(&self) -> Result<Option<TokenSecret>> {
		Ok(self.store.get(&self.refresh_key).await?.map(TokenSecret::new))
	}

	/// Persists a new refresh token.
	pub async fn set_refresh_token(&self, token: impl AsRef<str>) -> Result<()> {
		Ok(self.store.set(&self.refresh_key, token.as_ref()).await?)
	}

	/// Clears both credential slots.
	pub async fn clear(&self) -> Result<()> {
		self.store.remove(&self.access_key).await?;
		self.store.remove(&self.refresh_key).await?;

		Ok(())
	}

	/// Exchanges the refresh token for fresh credentials.
	///
	/// Without a stored refresh token this returns `Ok(None)` and performs no
	/// network activity. A failed exchange (unreachable endpoint, non-success
	/// status, undecodable payload) clears both slots and returns `Ok(None)`;
	/// the exchange is never retried here. Callers queued behind a concurrent
	/// refresh reuse the token the winning caller stored instead of issuing a
	/// second exchange.
	pub async fn refresh(&self) -> Result<Option<TokenSecret>> {
		const KIND: CallKind = CallKind::Refresh;

		let span = CallSpan::new(KIND, "refresh");

		obs::record_call_outcome(KIND, CallOutcome::Attempt);

		let result = span
			.instrument(async move {
				let _singleflight = self.refresh_guard.lock().await;

				// A caller that lost the race finds the slot replenished.
				if let Some(token) = self.access_token().await? {
					return Ok(Some(token));
				}

				let Some(refresh_token) = self.refresh_token().await? else {
					return Ok(None);
				};

				self.metrics.record_attempt();

				match self.exchange(refresh_token.expose()).await {
					Ok(refreshed) => {
						self.set_access_token(&refreshed.access_token).await?;

						if let Some(rotated) = &refreshed.refresh_token {
							self.set_refresh_token(rotated).await?;
						}

						self.metrics.record_success();

						Ok(Some(TokenSecret::new(refreshed.access_token)))
					},
					Err(_) => {
						self.metrics.record_failure();
						self.clear().await?;

						Ok(None)
					},
				}
			})
			.await;

		match &result {
			Ok(Some(_)) => obs::record_call_outcome(KIND, CallOutcome::Success),
			_ => obs::record_call_outcome(KIND, CallOutcome::Failure),
		}

		result
	}

	async fn exchange(&self, refresh_token: &str) -> Result<RefreshedCredentials> {
		let body = serde_json::json!({ "refresh_token": refresh_token });
		let call = TransportCall {
			method: Method::Post,
			url: self.endpoint.clone(),
			headers: [("Content-Type".to_owned(), "application/json".to_owned())].into(),
			body: Some(body.to_string().into_bytes()),
			timeout: Some(Self::REFRESH_TIMEOUT),
			cancel: CancelToken::new(),
		};
		let reply = self.http.dispatch(call).await.map_err(|error| match error {
			TransportCallError::Aborted =>
				Error::aborted("credential refresh call was cancelled"),
			TransportCallError::Transport(inner) => RefreshError::unreachable(inner).into(),
		})?;

		if !(200..300).contains(&reply.status) {
			return Err(RefreshError::Rejected { status: reply.status }.into());
		}

		let mut deserializer = serde_json::Deserializer::from_slice(&reply.body);

		serde_path_to_error::deserialize(&mut deserializer)
			.map_err(|source| RefreshError::Decode { source }.into())
	}
}
impl<C> Debug for CredentialStore<C>
where
	C: ?Sized + HttpTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CredentialStore")
			.field("endpoint", &self.endpoint.as_str())
			.field("access_key", &self.access_key)
			.field("refresh_key", &self.refresh_key)
			.finish()
	}
}
