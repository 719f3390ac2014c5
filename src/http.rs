//! Transport primitives for outbound request dispatch.
//!
//! The module exposes [`HttpTransport`] alongside [`TransportCall`] and
//! [`CancelToken`] so downstream crates can integrate custom HTTP clients
//! without losing cooperative cancellation. Implementations race the wire
//! exchange against [`CancelToken::cancelled`] and report
//! [`TransportCallError::Aborted`] when the token fires first, enabling the
//! pipeline to classify cancellations separately from network failures.

// std
#[cfg(feature = "reqwest")] use std::ops::Deref;
// crates.io
use tokio::sync::watch;
// self
use crate::{_prelude::*, message::Method};

/// Cooperative cancellation token shared between the pipeline and a transport.
///
/// Cloning produces handles to the same underlying flag; the pipeline keeps one
/// clone in its in-flight registry while the transport races another against the
/// wire exchange.
#[derive(Clone, Debug)]
pub struct CancelToken {
	tx: Arc<watch::Sender<bool>>,
	rx: watch::Receiver<bool>,
}
impl CancelToken {
	/// Creates a fresh, un-triggered token.
	pub fn new() -> Self {
		let (tx, rx) = watch::channel(false);

		Self { tx: Arc::new(tx), rx }
	}

	/// Triggers cancellation; all clones observe the signal.
	pub fn cancel(&self) {
		self.tx.send_replace(true);
	}

	/// Whether cancellation has been triggered.
	pub fn is_cancelled(&self) -> bool {
		*self.rx.borrow()
	}

	/// Resolves once cancellation is triggered.
	pub async fn cancelled(&self) {
		let mut rx = self.rx.clone();

		// The token holds its own sender, so this only errors when every clone
		// is gone, at which point nobody can observe the wait anyway.
		let _ = rx.wait_for(|cancelled| *cancelled).await;
	}
}
impl Default for CancelToken {
	fn default() -> Self {
		Self::new()
	}
}

/// One fully-resolved wire exchange handed to a transport.
#[derive(Clone, Debug)]
pub struct TransportCall {
	/// HTTP verb.
	pub method: Method,
	/// Absolute URL, already resolved against the client base.
	pub url: Url,
	/// Header map for the exchange.
	pub headers: BTreeMap<String, String>,
	/// Opaque payload bytes.
	pub body: Option<Vec<u8>>,
	/// Per-attempt timeout, when configured.
	pub timeout: Option<Duration>,
	/// Token the transport must race against the exchange.
	pub cancel: CancelToken,
}

/// Raw outcome of a completed wire exchange, success statuses or not.
#[derive(Clone, Debug)]
pub struct TransportReply {
	/// HTTP status code.
	pub status: u16,
	/// Response headers; values that are not valid UTF-8 are skipped.
	pub headers: BTreeMap<String, String>,
	/// Raw response body bytes.
	pub body: Vec<u8>,
}

/// Failure modes a transport distinguishes for the pipeline.
#[derive(Debug)]
pub enum TransportCallError<E> {
	/// The [`CancelToken`] fired before the exchange completed.
	Aborted,
	/// The underlying client failed; carries the transport-specific error.
	Transport(E),
}

/// Boxed future returned by [`HttpTransport::dispatch`].
pub type TransportFuture<'a, E> =
	Pin<Box<dyn Future<Output = Result<TransportReply, TransportCallError<E>>> + 'a + Send>>;

/// Abstraction over HTTP clients capable of executing pipeline dispatches.
///
/// The trait acts as the pipeline's only dependency on an HTTP stack. Callers
/// provide an implementation (typically behind `Arc<T>` where `T: HttpTransport`)
/// and the pipeline submits one [`TransportCall`] per attempt. Implementations
/// must be `Send + Sync + 'static` so they can be shared across pipeline clones,
/// and the futures they return must be `Send` so dispatches can hop executors.
pub trait HttpTransport
where
	Self: 'static + Send + Sync,
{
	/// Concrete error emitted by the underlying client.
	type TransportError: 'static + Send + Sync + StdError;

	/// Executes one exchange, racing it against the call's [`CancelToken`].
	///
	/// Any completed HTTP exchange is a `TransportReply`, whatever its status;
	/// only failures to complete the exchange surface as errors.
	fn dispatch(&self, call: TransportCall) -> TransportFuture<'_, Self::TransportError>;
}

/// Maps transport-specific failures into pipeline [`Error`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an error emitted by the transport into a pipeline error.
	fn map_transport_error(&self, error: E) -> Error;
}

/// Default mapper for reqwest-backed transports.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
#[cfg(feature = "reqwest")]
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(&self, error: ReqwestError) -> Error {
		if error.is_builder() {
			crate::error::ConfigError::http_client_build(error).into()
		} else {
			crate::error::TransportError::network(error).into()
		}
	}
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
///
/// The default client follows redirects and keeps connections pooled; configure
/// a custom [`ReqwestClient`] and wrap it with [`ReqwestTransport::with_client`]
/// when proxies, custom TLS roots, or different pooling are required.
#[cfg(feature = "reqwest")]
#[derive(Clone, Default)]
pub struct ReqwestTransport(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestTransport {
	/// Wraps an existing [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestTransport {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl Deref for ReqwestTransport {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl From<Method> for reqwest::Method {
	fn from(method: Method) -> Self {
		match method {
			Method::Delete => reqwest::Method::DELETE,
			Method::Get => reqwest::Method::GET,
			Method::Patch => reqwest::Method::PATCH,
			Method::Post => reqwest::Method::POST,
			Method::Put => reqwest::Method::PUT,
		}
	}
}
#[cfg(feature = "reqwest")]
impl HttpTransport for ReqwestTransport {
	type TransportError = ReqwestError;

	fn dispatch(&self, call: TransportCall) -> TransportFuture<'_, Self::TransportError> {
		let client = self.0.clone();

		Box::pin(async move {
			let TransportCall { method, url, headers, body, timeout, cancel } = call;
			let mut request = client.request(method.into(), url);

			for (name, value) in &headers {
				request = request.header(name.as_str(), value.as_str());
			}
			if let Some(body) = body {
				request = request.body(body);
			}
			if let Some(timeout) = timeout {
				request = request.timeout(timeout);
			}

			let exchange = async move {
				let response = request.send().await.map_err(TransportCallError::Transport)?;
				let status = response.status().as_u16();
				let headers = response
					.headers()
					.iter()
					.filter_map(|(name, value)| {
						value.to_str().ok().map(|value| (name.to_string(), value.to_owned()))
					})
					.collect();
				let body = response
					.bytes()
					.await
					.map_err(TransportCallError::Transport)?
					.to_vec();

				Ok(TransportReply { status, headers, body })
			};

			tokio::select! {
				() = cancel.cancelled() => Err(TransportCallError::Aborted),
				outcome = exchange => outcome,
			}
		})
	}
}
