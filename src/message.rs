//! Request descriptors and response envelopes flowing through the pipeline.

// crates.io
use serde::de::DeserializeOwned;
// self
use crate::{_prelude::*, error::ConfigError, retry::RetryPolicy};

/// Callback invoked with a completion percentage while a call progresses.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// HTTP verbs supported by the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
	/// DELETE verb.
	Delete,
	/// GET verb.
	Get,
	/// PATCH verb.
	Patch,
	/// POST verb.
	Post,
	/// PUT verb.
	Put,
}
impl Method {
	/// Returns the canonical uppercase method name.
	pub const fn as_str(self) -> &'static str {
		match self {
			Method::Delete => "DELETE",
			Method::Get => "GET",
			Method::Patch => "PATCH",
			Method::Post => "POST",
			Method::Put => "PUT",
		}
	}
}
impl Display for Method {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Per-call tuning knobs, also usable as per-client defaults.
///
/// When a call supplies options on a pipeline that carries defaults, the two are
/// layered field-wise: per-call values win, headers merge with per-call entries
/// overriding same-named defaults.
#[derive(Clone, Default)]
pub struct RequestOptions {
	/// Extra headers merged over the client defaults.
	pub headers: BTreeMap<String, String>,
	/// Replaces the `Content-Type` header for this call.
	pub content_type: Option<String>,
	/// Transport-level timeout for each dispatch attempt.
	pub timeout: Option<Duration>,
	/// Retry policy applied to the dispatch, inside the rate limiter slot.
	pub retry: Option<RetryPolicy>,
	/// Invoked with `100` once the response has fully arrived.
	pub progress: Option<ProgressFn>,
	/// Attach a bearer credential header before dispatch.
	pub with_credentials: bool,
}
impl RequestOptions {
	/// Creates an empty option set.
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds a header entry.
	pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.insert(name.into(), value.into());

		self
	}

	/// Replaces the content type for this call.
	pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
		self.content_type = Some(content_type.into());

		self
	}

	/// Overrides the per-attempt transport timeout.
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);

		self
	}

	/// Attaches a retry policy to the dispatch.
	pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
		self.retry = Some(retry);

		self
	}

	/// Installs a progress callback.
	pub fn with_progress(mut self, progress: impl Fn(u8) + Send + Sync + 'static) -> Self {
		self.progress = Some(Arc::new(progress));

		self
	}

	/// Requests bearer credential injection before dispatch.
	pub fn require_credentials(mut self) -> Self {
		self.with_credentials = true;

		self
	}

	/// Layers these options over client defaults; per-call values win.
	pub(crate) fn layered_over(&self, defaults: &RequestOptions) -> RequestOptions {
		let mut headers = defaults.headers.clone();

		headers.extend(self.headers.clone());

		RequestOptions {
			headers,
			content_type: self.content_type.clone().or_else(|| defaults.content_type.clone()),
			timeout: self.timeout.or(defaults.timeout),
			retry: self.retry.clone().or_else(|| defaults.retry.clone()),
			progress: self.progress.clone().or_else(|| defaults.progress.clone()),
			with_credentials: self.with_credentials || defaults.with_credentials,
		}
	}
}
impl Debug for RequestOptions {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RequestOptions")
			.field("headers", &self.headers)
			.field("content_type", &self.content_type)
			.field("timeout", &self.timeout)
			.field("retry", &self.retry)
			.field("progress_set", &self.progress.is_some())
			.field("with_credentials", &self.with_credentials)
			.finish()
	}
}

/// Immutable record of one request attempt.
///
/// The pipeline clones a fresh descriptor for every retry attempt, so the value
/// observed by interceptors and carried on the response never mutates after
/// dispatch begins.
#[derive(Clone, Debug)]
pub struct RequestDescriptor {
	/// HTTP verb for the call.
	pub method: Method,
	/// Caller-supplied URL, resolved against the client base URL at dispatch.
	pub url: String,
	/// Headers as assembled so far (defaults, options, auth injection).
	pub headers: BTreeMap<String, String>,
	/// Opaque request payload.
	pub body: Option<Vec<u8>>,
	/// Options governing this call.
	pub options: RequestOptions,
}
impl RequestDescriptor {
	/// Builds a bare descriptor for the provided verb and URL.
	pub fn new(method: Method, url: impl Into<String>) -> Self {
		Self {
			method,
			url: url.into(),
			headers: BTreeMap::new(),
			body: None,
			options: RequestOptions::default(),
		}
	}

	/// Attaches an opaque payload.
	pub fn with_body(mut self, body: Vec<u8>) -> Self {
		self.body = Some(body);

		self
	}

	/// Replaces the options attached to this descriptor.
	pub fn with_options(mut self, options: RequestOptions) -> Self {
		self.options = options;

		self
	}

	/// Inserts or replaces a header entry.
	pub fn insert_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
		self.headers.insert(name.into(), value.into());
	}

	/// Reads a header value by exact name.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.get(name).map(String::as_str)
	}
}

/// Read-only wrapper around a completed response.
#[derive(Clone, Debug)]
pub struct ResponseEnvelope {
	/// HTTP status code.
	pub status: u16,
	/// Response headers as delivered by the transport.
	pub headers: BTreeMap<String, String>,
	/// Raw response body bytes.
	pub body: Vec<u8>,
	/// Descriptor that produced this response.
	pub request: RequestDescriptor,
}
impl ResponseEnvelope {
	/// Whether the status sits in the success range.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Decodes the body as JSON into the requested type.
	pub fn json<T>(&self) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let mut deserializer = serde_json::Deserializer::from_slice(&self.body);

		serde_path_to_error::deserialize(&mut deserializer)
			.map_err(|source| ConfigError::ResponseDecode { source }.into())
	}

	/// Returns the body decoded as UTF-8, replacing invalid sequences.
	pub fn text(&self) -> String {
		String::from_utf8_lossy(&self.body).into_owned()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn per_call_options_win_over_defaults() {
		let defaults = RequestOptions::new()
			.with_header("Content-Type", "application/json")
			.with_header("X-Client", "pipeline")
			.with_timeout(Duration::from_secs(30));
		let per_call = RequestOptions::new()
			.with_header("Content-Type", "text/plain")
			.with_timeout(Duration::from_secs(5))
			.require_credentials();
		let layered = per_call.layered_over(&defaults);

		assert_eq!(layered.headers.get("Content-Type").map(String::as_str), Some("text/plain"));
		assert_eq!(layered.headers.get("X-Client").map(String::as_str), Some("pipeline"));
		assert_eq!(layered.timeout, Some(Duration::from_secs(5)));
		assert!(layered.with_credentials);
	}

	#[test]
	fn envelope_decodes_json_bodies() {
		#[derive(Debug, PartialEq, Deserialize)]
		struct Item {
			id: u32,
		}

		let envelope = ResponseEnvelope {
			status: 200,
			headers: BTreeMap::new(),
			body: br#"{"id":7}"#.to_vec(),
			request: RequestDescriptor::new(Method::Get, "/items/7"),
		};

		assert!(envelope.is_success());
		assert_eq!(
			envelope.json::<Item>().expect("Envelope body should decode into Item."),
			Item { id: 7 },
		);
	}

	#[test]
	fn envelope_json_decode_failure_reports_the_path() {
		let envelope = ResponseEnvelope {
			status: 200,
			headers: BTreeMap::new(),
			body: br#"{"id":"not-a-number"}"#.to_vec(),
			request: RequestDescriptor::new(Method::Get, "/items/7"),
		};

		#[derive(Debug, Deserialize)]
		#[allow(dead_code)]
		struct Item {
			id: u32,
		}

		assert!(envelope.json::<Item>().is_err());
	}
}
