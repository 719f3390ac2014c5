//! Resilient outbound HTTP pipeline—compose auth injection, rate limiting,
//! retry backoff, duplicate suppression, and in-flight cancellation over any
//! transport in one crate built for production.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod dedup;
pub mod error;
pub mod http;
pub mod intercept;
pub mod limit;
pub mod message;
pub mod normalize;
pub mod obs;
pub mod pipeline;
pub mod retry;
pub mod store;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience transports and helpers for tests; enabled via `cfg(test)` or
	//! the `test` crate feature.

	pub use crate::_prelude::*;

	// self
	use crate::{
		http::{
			HttpTransport, TransportCall, TransportCallError, TransportErrorMapper,
			TransportFuture, TransportReply,
		},
		message::Method,
		pipeline::Pipeline,
		store::{KvStore, MemoryStore},
	};

	/// Pipeline type alias used by stub-backed tests.
	pub type StubPipeline = Pipeline<StubTransport, StubTransportErrorMapper>;

	/// Error emitted by [`StubTransport`] when a scripted failure is replayed.
	#[derive(Clone, Debug, ThisError)]
	#[error("{0}")]
	pub struct StubError(pub String);

	/// Maps [`StubError`] values into the crate's transport taxonomy.
	#[derive(Clone, Debug, Default)]
	pub struct StubTransportErrorMapper;
	impl TransportErrorMapper<StubError> for StubTransportErrorMapper {
		fn map_transport_error(&self, error: StubError) -> Error {
			crate::error::TransportError::network(error).into()
		}
	}

	/// One exchange observed by a [`StubTransport`].
	#[derive(Clone, Debug)]
	pub struct RecordedCall {
		/// Verb of the dispatched call.
		pub method: Method,
		/// Fully resolved URL of the dispatched call.
		pub url: Url,
		/// Headers attached to the dispatched call.
		pub headers: BTreeMap<String, String>,
		/// Payload attached to the dispatched call.
		pub body: Option<Vec<u8>>,
	}

	#[derive(Clone, Debug)]
	enum ScriptedOutcome {
		Reply(TransportReply),
		Failure(String),
	}

	/// Scriptable in-process transport replaying queued outcomes in order.
	///
	/// An exhausted script answers `200` with an empty body, so tests only
	/// queue the exchanges they care about. An optional delay applies to every
	/// dispatch, letting cancellation tests catch calls mid-flight.
	#[derive(Clone, Debug, Default)]
	pub struct StubTransport {
		script: Arc<Mutex<VecDeque<ScriptedOutcome>>>,
		delay: Arc<Mutex<Option<Duration>>>,
		calls: Arc<Mutex<Vec<RecordedCall>>>,
	}
	impl StubTransport {
		/// Queues a full reply.
		pub fn push_reply(&self, reply: TransportReply) {
			self.script.lock().push_back(ScriptedOutcome::Reply(reply));
		}

		/// Queues a reply with the provided status and body.
		pub fn push_status(&self, status: u16, body: Vec<u8>) {
			self.push_reply(TransportReply { status, headers: BTreeMap::new(), body });
		}

		/// Queues a transport-level failure.
		pub fn push_failure(&self, message: impl Into<String>) {
			self.script.lock().push_back(ScriptedOutcome::Failure(message.into()));
		}

		/// Applies (or clears) an artificial delay before every outcome.
		pub fn set_delay(&self, delay: Option<Duration>) {
			*self.delay.lock() = delay;
		}

		/// Number of exchanges dispatched so far.
		pub fn dispatched(&self) -> usize {
			self.calls.lock().len()
		}

		/// Snapshot of every exchange observed so far.
		pub fn calls(&self) -> Vec<RecordedCall> {
			self.calls.lock().clone()
		}
	}
	impl HttpTransport for StubTransport {
		type TransportError = StubError;

		fn dispatch(&self, call: TransportCall) -> TransportFuture<'_, Self::TransportError> {
			let outcome = self.script.lock().pop_front();
			let delay = *self.delay.lock();

			self.calls.lock().push(RecordedCall {
				method: call.method,
				url: call.url.clone(),
				headers: call.headers.clone(),
				body: call.body.clone(),
			});

			let cancel = call.cancel.clone();

			Box::pin(async move {
				let replay = async move {
					if let Some(delay) = delay {
						tokio::time::sleep(delay).await;
					}

					match outcome {
						Some(ScriptedOutcome::Reply(reply)) => Ok(reply),
						Some(ScriptedOutcome::Failure(message)) =>
							Err(TransportCallError::Transport(StubError(message))),
						None => Ok(TransportReply {
							status: 200,
							headers: BTreeMap::new(),
							body: Vec::new(),
						}),
					}
				};

				tokio::select! {
					() = cancel.cancelled() => Err(TransportCallError::Aborted),
					outcome = replay => outcome,
				}
			})
		}
	}

	/// Constructs a [`Pipeline`] backed by an in-memory store and the provided stub.
	pub fn build_stub_pipeline(transport: StubTransport) -> (StubPipeline, Arc<MemoryStore>) {
		let store_backend = Arc::new(MemoryStore::default());
		let store: Arc<dyn KvStore> = store_backend.clone();
		let base_url = Url::parse("https://api.example.com/")
			.expect("Stub pipeline base URL should parse successfully.");
		let pipeline = Pipeline::with_transport(store, base_url, transport, StubTransportErrorMapper)
			.expect("Stub pipeline should build successfully.");

		(pipeline, store_backend)
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap, VecDeque},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		sync::Arc,
		time::Duration,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use httpmock as _;
