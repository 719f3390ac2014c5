//! Terminal error normalization and status-code side effects.

// self
use crate::_prelude::*;

type StatusHandler = Box<dyn Fn(&Error) + Send + Sync>;

/// Uniform error shape handed to callers after a failed pipeline call.
///
/// Produced exactly once per failure and never mutated afterwards; the clone
/// bound lets deduplicated callers share one outcome.
#[derive(Clone, Debug, ThisError)]
#[error("{message}")]
pub struct ErrorEnvelope {
	/// Human-readable failure summary.
	pub message: String,
	/// HTTP status code, when a response was received.
	pub status: Option<u16>,
	/// Application-level error code extracted from a JSON body's `code` field.
	pub code: Option<String>,
	/// Raw JSON payload carried by the failing response, when it parsed.
	pub data: Option<serde_json::Value>,
}
impl ErrorEnvelope {
	/// Normalizes a pipeline error into the caller-facing shape.
	pub fn from_error(error: &Error) -> Self {
		let (code, data) = match error {
			Error::Status(status) => (status.application_code(), status.data()),
			_ => (None, None),
		};

		Self { message: error.to_string(), status: error.status(), code, data }
	}
}

/// Maps failures to a uniform envelope and dispatches status-specific side effects.
///
/// Side effects observe the failure (logging, counters); they never alter what
/// the caller receives, and the normalizer never swallows an error.
#[derive(Default)]
pub struct ErrorNormalizer {
	handlers: RwLock<HashMap<u16, StatusHandler>>,
}
impl ErrorNormalizer {
	/// Creates a normalizer with no registered side effects.
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a side effect invoked for failures carrying exactly `status`.
	///
	/// A later registration for the same status replaces the earlier one.
	pub fn add_handler(&self, status: u16, handler: impl Fn(&Error) + Send + Sync + 'static) {
		self.handlers.write().insert(status, Box::new(handler));
	}

	/// Runs the matching side effect (if any) and produces the normalized envelope.
	pub fn handle(&self, error: Error) -> ErrorEnvelope {
		if let Some(status) = error.status() {
			if let Some(handler) = self.handlers.read().get(&status) {
				handler(&error);
			}
		}

		ErrorEnvelope::from_error(&error)
	}
}
impl Debug for ErrorNormalizer {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ErrorNormalizer")
			.field("handlers", &self.handlers.read().keys().collect::<Vec<_>>())
			.finish()
	}
}
