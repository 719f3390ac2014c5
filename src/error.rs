//! Pipeline-level error types shared across dispatch, auth, and storage layers.

// self
use crate::_prelude::*;

/// Pipeline-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical pipeline error exposed by internal layers before normalization.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Transport failure (DNS, TCP, TLS); no response was received.
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// A response arrived carrying a non-success status.
	#[error(transparent)]
	Status(#[from] StatusError),
	/// Credential refresh endpoint was unreachable or rejected the call.
	#[error(transparent)]
	Refresh(#[from] RefreshError),

	/// Cancellation was triggered while the call was outstanding.
	#[error("Request was aborted: {reason}.")]
	Aborted {
		/// Human-readable abort context.
		reason: String,
	},
}
impl Error {
	/// Builds an [`Error::Aborted`] with the provided context string.
	pub fn aborted(reason: impl Into<String>) -> Self {
		Self::Aborted { reason: reason.into() }
	}

	/// Returns the HTTP status attached to this error, when one exists.
	pub fn status(&self) -> Option<u16> {
		match self {
			Self::Status(status) => Some(status.status),
			Self::Refresh(RefreshError::Rejected { status }) => Some(*status),
			_ => None,
		}
	}

	/// Whether a retry policy is allowed to swallow this error and re-attempt.
	///
	/// Only transport failures and non-success statuses qualify; aborts and
	/// refresh failures always propagate immediately.
	pub fn is_retryable(&self) -> bool {
		matches!(self, Self::Transport(_) | Self::Status(_))
	}
}

/// Configuration and validation failures raised by the pipeline.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// Request URL could not be resolved against the base URL.
	#[error("Request URL is invalid.")]
	InvalidUrl {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Request body could not be serialized to JSON.
	#[error("Request body could not be serialized.")]
	BodySerialize {
		/// Structured serialization failure.
		#[source]
		source: serde_json::Error,
	},
	/// Response body did not decode into the requested type.
	#[error("Response body returned malformed JSON.")]
	ResponseDecode {
		/// Structured parsing failure with the offending path.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while dispatching the request.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while dispatching the request.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}

/// Response received with a status outside the success range.
#[derive(Debug, ThisError)]
#[error("Endpoint returned a non-success status {status}.")]
pub struct StatusError {
	/// HTTP status code carried by the response.
	pub status: u16,
	/// Response headers as delivered by the transport.
	pub headers: BTreeMap<String, String>,
	/// Raw response body bytes.
	pub body: Vec<u8>,
}
impl StatusError {
	/// Parses the body as JSON, when it is JSON.
	pub fn data(&self) -> Option<serde_json::Value> {
		serde_json::from_slice(&self.body).ok()
	}

	/// Extracts the application-level error code from a JSON body's `code` field.
	pub fn application_code(&self) -> Option<String> {
		self.data()?.get("code")?.as_str().map(ToOwned::to_owned)
	}
}

/// Failures raised while exchanging a refresh token for fresh credentials.
#[derive(Debug, ThisError)]
pub enum RefreshError {
	/// Refresh endpoint answered with a non-success status.
	#[error("Credential refresh endpoint rejected the request with status {status}.")]
	Rejected {
		/// HTTP status code returned by the refresh endpoint.
		status: u16,
	},
	/// Refresh endpoint returned a payload that did not decode.
	#[error("Credential refresh endpoint returned malformed JSON.")]
	Decode {
		/// Structured parsing failure with the offending path.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
	/// The refresh call failed before any response was received.
	#[error("Credential refresh call failed before a response was received.")]
	Unreachable {
		/// Transport-specific failure.
		#[source]
		source: BoxError,
	},
}
impl RefreshError {
	/// Wraps a transport-specific failure that prevented the refresh exchange.
	pub fn unreachable(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Unreachable { source: Box::new(src) }
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn status_error_exposes_application_code_and_data() {
		let error = StatusError {
			status: 422,
			headers: BTreeMap::new(),
			body: br#"{"code":"VALIDATION","detail":"name is required"}"#.to_vec(),
		};

		assert_eq!(error.application_code().as_deref(), Some("VALIDATION"));
		assert_eq!(
			error.data().and_then(|data| data.get("detail").cloned()),
			Some(serde_json::Value::String("name is required".into())),
		);
	}

	#[test]
	fn retryability_follows_the_taxonomy() {
		let transport: Error =
			TransportError::Io(std::io::Error::other("connection reset")).into();
		let status: Error =
			StatusError { status: 503, headers: BTreeMap::new(), body: Vec::new() }.into();
		let aborted = Error::aborted("caller cancelled");
		let refresh: Error = RefreshError::Rejected { status: 401 }.into();

		assert!(transport.is_retryable());
		assert!(status.is_retryable());
		assert!(!aborted.is_retryable());
		assert!(!refresh.is_retryable());
	}

	#[test]
	fn status_accessor_reads_nested_codes() {
		let status: Error =
			StatusError { status: 404, headers: BTreeMap::new(), body: Vec::new() }.into();
		let refresh: Error = RefreshError::Rejected { status: 403 }.into();

		assert_eq!(status.status(), Some(404));
		assert_eq!(refresh.status(), Some(403));
		assert_eq!(Error::aborted("cancelled").status(), None);
	}
}
