//! Layered request orchestration over a bare HTTP transport.
//!
//! [`Pipeline`] composes the crate's building blocks into one per-call sequence:
//! request interceptors, bearer credential injection (with refresh fallback),
//! content-type overrides, in-flight cancellation bookkeeping, rate-limited and
//! optionally retried dispatch, response interceptors, and terminal error
//! normalization. Callers only ever observe a [`ResponseEnvelope`] or an
//! [`ErrorEnvelope`].

// self
use crate::{
	_prelude::*,
	auth::CredentialStore,
	dedup::RequestDeduplicator,
	error::{ConfigError, StatusError},
	http::{CancelToken, HttpTransport, TransportCall, TransportCallError, TransportErrorMapper},
	intercept::{RequestInterceptor, ResponseInterceptor},
	limit::RateLimiter,
	message::{Method, RequestDescriptor, RequestOptions, ResponseEnvelope},
	normalize::{ErrorEnvelope, ErrorNormalizer},
	obs::{self, CallKind, CallOutcome, CallSpan},
	retry::RetryPolicy,
	store::KvStore,
};
#[cfg(feature = "reqwest")]
use crate::http::{ReqwestTransport, ReqwestTransportErrorMapper};
#[cfg(feature = "tracing")] use crate::intercept::LogInterceptor;

/// Caller-facing result of a pipeline call.
pub type PipelineResult<T = ResponseEnvelope> = std::result::Result<T, ErrorEnvelope>;

#[cfg(feature = "reqwest")]
/// Pipeline specialized for the crate's default reqwest transport stack.
pub type ReqwestPipeline = Pipeline<ReqwestTransport, ReqwestTransportErrorMapper>;

type InFlightMap = Arc<Mutex<HashMap<String, CancelToken>>>;

/// Removes the in-flight registration when dispatch settles, however it settles.
struct InFlightGuard {
	registry: InFlightMap,
	key: String,
}
impl InFlightGuard {
	fn register(registry: &InFlightMap, key: String, token: CancelToken) -> Self {
		registry.lock().insert(key.clone(), token);

		Self { registry: registry.clone(), key }
	}
}
impl Drop for InFlightGuard {
	fn drop(&mut self) {
		self.registry.lock().remove(&self.key);
	}
}

/// Coordinates outbound calls against a single base URL.
///
/// The pipeline owns the transport, credential store, rate limiter, error
/// normalizer, and deduplicator so individual calls can focus on their verb and
/// options. Clones share every registry and collaborator, so one instance can
/// be handed to any number of tasks.
#[derive(Clone)]
pub struct Pipeline<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// HTTP transport executing every wire exchange.
	pub transport: Arc<C>,
	/// Mapper applied to transport-layer errors before classification.
	pub transport_mapper: Arc<M>,
	/// Credential slots consulted when a call requires authentication.
	pub credentials: CredentialStore<C>,
	/// Throughput throttle shared by every call on this pipeline.
	pub limiter: RateLimiter,
	/// Terminal error normalizer; register status side effects here.
	pub normalizer: Arc<ErrorNormalizer>,
	/// Shared registry collapsing same-key concurrent calls.
	pub dedup: Arc<RequestDeduplicator<ResponseEnvelope, ErrorEnvelope>>,
	base_url: Url,
	defaults: RequestOptions,
	request_interceptors: Arc<RwLock<Vec<Arc<dyn RequestInterceptor>>>>,
	response_interceptors: Arc<RwLock<Vec<Arc<dyn ResponseInterceptor>>>>,
	in_flight: InFlightMap,
}
impl<C, M> Pipeline<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Refresh endpoint resolved against the base URL unless a custom
	/// [`CredentialStore`] is installed.
	pub const DEFAULT_REFRESH_PATH: &'static str = "auth/refresh";
	/// Per-attempt transport timeout applied when no override is configured.
	pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

	/// Creates a pipeline that reuses the caller-provided transport + mapper pair.
	///
	/// The credential store refreshes against [`Self::DEFAULT_REFRESH_PATH`]
	/// under `base_url`; install a custom store via
	/// [`Self::with_credential_store`] to change the endpoint or slot keys.
	pub fn with_transport(
		store: Arc<dyn KvStore>,
		base_url: Url,
		transport: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
	) -> Result<Self> {
		let transport = transport.into();
		let refresh_endpoint = base_url
			.join(Self::DEFAULT_REFRESH_PATH)
			.map_err(|source| ConfigError::InvalidUrl { source })?;
		let credentials = CredentialStore::new(store, refresh_endpoint, transport.clone());
		let defaults = RequestOptions::new()
			.with_header("Content-Type", "application/json")
			.with_timeout(Self::DEFAULT_TIMEOUT);

		Ok(Self {
			transport,
			transport_mapper: mapper.into(),
			credentials,
			limiter: RateLimiter::default(),
			normalizer: Default::default(),
			dedup: Default::default(),
			base_url,
			defaults,
			request_interceptors: Default::default(),
			response_interceptors: Default::default(),
			in_flight: Default::default(),
		})
	}

	/// Adds (or replaces) a default header applied to every call.
	pub fn with_default_header(
		mut self,
		name: impl Into<String>,
		value: impl Into<String>,
	) -> Self {
		self.defaults.headers.insert(name.into(), value.into());

		self
	}

	/// Replaces the default `Content-Type` header.
	pub fn with_content_type(self, content_type: impl Into<String>) -> Self {
		self.with_default_header("Content-Type", content_type)
	}

	/// Overrides the default per-attempt transport timeout.
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.defaults.timeout = Some(timeout);

		self
	}

	/// Replaces the rate limiter with one allowing `requests_per_second`.
	pub fn with_rate_limit(mut self, requests_per_second: u32) -> Self {
		self.limiter = RateLimiter::new(requests_per_second);

		self
	}

	/// Installs a retry policy applied to every call that does not bring its own.
	pub fn with_default_retry(mut self, retry: RetryPolicy) -> Self {
		self.defaults.retry = Some(retry);

		self
	}

	/// Replaces the credential store (custom endpoint, slot keys, or backend).
	pub fn with_credential_store(mut self, credentials: CredentialStore<C>) -> Self {
		self.credentials = credentials;

		self
	}

	/// Returns the base URL every call is resolved against.
	pub fn base_url(&self) -> &Url {
		&self.base_url
	}

	/// Appends a request interceptor; interceptors run in registration order.
	pub fn add_request_interceptor(&self, interceptor: impl RequestInterceptor + 'static) {
		self.request_interceptors.write().push(Arc::new(interceptor));
	}

	/// Appends a response interceptor; interceptors run in registration order.
	pub fn add_response_interceptor(&self, interceptor: impl ResponseInterceptor + 'static) {
		self.response_interceptors.write().push(Arc::new(interceptor));
	}

	/// Issues a GET request.
	pub async fn get(&self, url: impl Into<String>, options: RequestOptions) -> PipelineResult {
		self.call::<()>(Method::Get, url.into(), None, options).await
	}

	/// Issues a POST request with an optional JSON payload.
	pub async fn post<B>(
		&self,
		url: impl Into<String>,
		body: Option<&B>,
		options: RequestOptions,
	) -> PipelineResult
	where
		B: ?Sized + Serialize,
	{
		self.call(Method::Post, url.into(), body, options).await
	}

	/// Issues a PUT request with an optional JSON payload.
	pub async fn put<B>(
		&self,
		url: impl Into<String>,
		body: Option<&B>,
		options: RequestOptions,
	) -> PipelineResult
	where
		B: ?Sized + Serialize,
	{
		self.call(Method::Put, url.into(), body, options).await
	}

	/// Issues a PATCH request with an optional JSON payload.
	pub async fn patch<B>(
		&self,
		url: impl Into<String>,
		body: Option<&B>,
		options: RequestOptions,
	) -> PipelineResult
	where
		B: ?Sized + Serialize,
	{
		self.call(Method::Patch, url.into(), body, options).await
	}

	/// Issues a DELETE request.
	pub async fn delete(&self, url: impl Into<String>, options: RequestOptions) -> PipelineResult {
		self.call::<()>(Method::Delete, url.into(), None, options).await
	}

	/// Issues a GET request, collapsing concurrent calls sharing `key`.
	///
	/// Callers joining an in-flight execution receive a clone of its outcome;
	/// see [`RequestDeduplicator`] for the exact sharing rules.
	pub async fn get_deduped(
		&self,
		key: impl Into<String>,
		url: impl Into<String>,
		options: RequestOptions,
	) -> PipelineResult {
		let url = url.into();

		self.dedup.enqueue(key, || self.get(url, options)).await
	}

	/// Cancels the outstanding request registered under `url`, if any.
	///
	/// The aborted call settles with a cancellation failure; later calls to the
	/// same URL are unaffected.
	pub fn cancel_request(&self, url: &str) {
		if let Some(token) = self.in_flight.lock().remove(url) {
			token.cancel();
		}
	}

	/// Cancels every outstanding request on this pipeline.
	pub fn cancel_all_requests(&self) {
		let drained: Vec<CancelToken> =
			self.in_flight.lock().drain().map(|(_, token)| token).collect();

		for token in drained {
			token.cancel();
		}
	}

	/// Number of requests currently registered as in flight.
	pub fn in_flight_count(&self) -> usize {
		self.in_flight.lock().len()
	}

	/// Whether a request is currently registered under `url`.
	pub fn is_in_flight(&self, url: &str) -> bool {
		self.in_flight.lock().contains_key(url)
	}

	/// Runs a prepared descriptor through the full per-call sequence.
	pub async fn execute(&self, descriptor: RequestDescriptor) -> PipelineResult {
		const KIND: CallKind = CallKind::Dispatch;

		let span = CallSpan::new(KIND, "execute");

		obs::record_call_outcome(KIND, CallOutcome::Attempt);

		let result = span.instrument(self.run(descriptor)).await;

		match &result {
			Ok(_) => obs::record_call_outcome(KIND, CallOutcome::Success),
			Err(_) => obs::record_call_outcome(KIND, CallOutcome::Failure),
		}

		result.map_err(|error| self.normalizer.handle(error))
	}

	async fn call<B>(
		&self,
		method: Method,
		url: String,
		body: Option<&B>,
		options: RequestOptions,
	) -> PipelineResult
	where
		B: ?Sized + Serialize,
	{
		let descriptor = match self.build_descriptor(method, url, body, options) {
			Ok(descriptor) => descriptor,
			Err(error) => return Err(self.normalizer.handle(error)),
		};

		self.execute(descriptor).await
	}

	fn build_descriptor<B>(
		&self,
		method: Method,
		url: String,
		body: Option<&B>,
		options: RequestOptions,
	) -> Result<RequestDescriptor>
	where
		B: ?Sized + Serialize,
	{
		let options = options.layered_over(&self.defaults);
		let body = body
			.map(serde_json::to_vec)
			.transpose()
			.map_err(|source| ConfigError::BodySerialize { source })?;
		let headers = options.headers.clone();

		Ok(RequestDescriptor { method, url, headers, body, options })
	}

	async fn run(&self, descriptor: RequestDescriptor) -> Result<ResponseEnvelope> {
		let request_interceptors = self.request_interceptors.read().clone();
		let mut descriptor = descriptor;

		for interceptor in &request_interceptors {
			match interceptor.on_request(descriptor).await {
				Ok(next) => descriptor = next,
				Err(error) => {
					for observer in &request_interceptors {
						observer.on_request_error(&error).await;
					}

					return Err(error);
				},
			}
		}

		if descriptor.options.with_credentials {
			let token = match self.credentials.access_token().await? {
				Some(token) => Some(token),
				None => self.credentials.refresh().await?,
			};

			// Without a token the call proceeds bare and the server decides.
			if let Some(token) = token {
				descriptor.insert_header("Authorization", format!("Bearer {}", token.expose()));
			}
		}

		if let Some(content_type) = descriptor.options.content_type.clone() {
			descriptor.insert_header("Content-Type", content_type);
		}

		let url = self
			.base_url
			.join(&descriptor.url)
			.map_err(|source| ConfigError::InvalidUrl { source })?;
		let cancel = CancelToken::new();
		let guard = InFlightGuard::register(&self.in_flight, descriptor.url.clone(), cancel.clone());
		let transport = self.transport.clone();
		let mapper = self.transport_mapper.clone();
		let retry = descriptor.options.retry.clone();
		let dispatch_descriptor = descriptor.clone();
		let outcome = self
			.limiter
			.add(move || async move {
				match retry {
					Some(policy) =>
						policy
							.run(|| {
								dispatch_once(
									transport.clone(),
									mapper.clone(),
									dispatch_descriptor.clone(),
									url.clone(),
									cancel.clone(),
								)
							})
							.await,
					None => dispatch_once(transport, mapper, dispatch_descriptor, url, cancel).await,
				}
			})
			.await;

		// Settle the registry before any interceptor observes the outcome.
		drop(guard);

		match outcome {
			Ok(response) => {
				if let Some(progress) = &descriptor.options.progress {
					progress(100);
				}

				let response_interceptors = self.response_interceptors.read().clone();
				let mut response = response;

				for interceptor in &response_interceptors {
					response = interceptor.on_response(response).await?;
				}

				Ok(response)
			},
			Err(error) => {
				let response_interceptors = self.response_interceptors.read().clone();

				for observer in &response_interceptors {
					observer.on_response_error(&error).await;
				}

				Err(error)
			},
		}
	}
}
#[cfg(feature = "tracing")]
impl<C, M> Pipeline<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Wires [`LogInterceptor`] onto both chains and logs `400` payloads.
	///
	/// Every dispatch and completion is mirrored into `tracing` events, and bad
	/// requests additionally surface through a registered normalizer side effect.
	pub fn with_logging(self) -> Self {
		self.add_request_interceptor(LogInterceptor);
		self.add_response_interceptor(LogInterceptor);
		self.normalizer.add_handler(400, |error| {
			tracing::error!(error = %error, "bad request");
		});

		self
	}
}
#[cfg(feature = "reqwest")]
impl Pipeline<ReqwestTransport, ReqwestTransportErrorMapper> {
	/// Creates a pipeline backed by a default reqwest transport.
	///
	/// The pipeline provisions its own client so callers do not need to pass
	/// HTTP handles explicitly; use [`Pipeline::with_transport`] to share a
	/// tuned [`ReqwestTransport`] instead.
	pub fn new(store: Arc<dyn KvStore>, base_url: Url) -> Result<Self> {
		Self::with_transport(store, base_url, ReqwestTransport::default(), ReqwestTransportErrorMapper)
	}
}
impl<C, M> Debug for Pipeline<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Pipeline")
			.field("base_url", &self.base_url.as_str())
			.field("defaults", &self.defaults)
			.field("in_flight", &self.in_flight.lock().len())
			.finish()
	}
}

/// Executes one transport attempt for the provided descriptor.
async fn dispatch_once<C, M>(
	transport: Arc<C>,
	mapper: Arc<M>,
	descriptor: RequestDescriptor,
	url: Url,
	cancel: CancelToken,
) -> Result<ResponseEnvelope>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	let call = TransportCall {
		method: descriptor.method,
		url,
		headers: descriptor.headers.clone(),
		body: descriptor.body.clone(),
		timeout: descriptor.options.timeout,
		cancel,
	};
	let reply = transport.dispatch(call).await.map_err(|error| match error {
		TransportCallError::Aborted =>
			Error::aborted(format!("request to {} was cancelled", descriptor.url)),
		TransportCallError::Transport(inner) => mapper.map_transport_error(inner),
	})?;

	if !(200..300).contains(&reply.status) {
		return Err(
			StatusError { status: reply.status, headers: reply.headers, body: reply.body }.into(),
		);
	}

	Ok(ResponseEnvelope {
		status: reply.status,
		headers: reply.headers,
		body: reply.body,
		request: descriptor,
	})
}
