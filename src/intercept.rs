//! Ordered interceptor chains over requests and responses.
//!
//! Interceptors run in registration order. Request interceptors may transform
//! the descriptor or abort the call by returning an error; response
//! interceptors may transform the envelope. The `*_error` hooks are pure
//! observers: they see the failure and re-propagation happens regardless.

// self
use crate::{
	_prelude::*,
	message::{RequestDescriptor, ResponseEnvelope},
};

/// Boxed future returned by transforming interceptor hooks.
pub type InterceptFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;
/// Boxed future returned by observing interceptor hooks.
pub type ObserveFuture<'a> = Pin<Box<dyn Future<Output = ()> + 'a + Send>>;

/// Hook set applied to outgoing descriptors before dispatch.
pub trait RequestInterceptor
where
	Self: Send + Sync,
{
	/// Transforms the descriptor, or aborts the call by returning an error.
	fn on_request<'a>(&'a self, descriptor: RequestDescriptor) -> InterceptFuture<'a, RequestDescriptor> {
		Box::pin(async move { Ok(descriptor) })
	}

	/// Observes an abort raised while the request chain was running.
	fn on_request_error<'a>(&'a self, _error: &'a Error) -> ObserveFuture<'a> {
		Box::pin(async {})
	}
}

/// Hook set applied to completed calls before the caller sees them.
pub trait ResponseInterceptor
where
	Self: Send + Sync,
{
	/// Transforms the response envelope.
	fn on_response<'a>(&'a self, response: ResponseEnvelope) -> InterceptFuture<'a, ResponseEnvelope> {
		Box::pin(async move { Ok(response) })
	}

	/// Observes a dispatch failure before it is normalized for the caller.
	fn on_response_error<'a>(&'a self, _error: &'a Error) -> ObserveFuture<'a> {
		Box::pin(async {})
	}
}

/// Interceptor pair that mirrors every call into `tracing` events.
///
/// Requests log at debug level, successful responses at debug with their
/// status, and failures at error level before normalization.
#[cfg(feature = "tracing")]
#[derive(Clone, Debug, Default)]
pub struct LogInterceptor;
#[cfg(feature = "tracing")]
impl RequestInterceptor for LogInterceptor {
	fn on_request<'a>(&'a self, descriptor: RequestDescriptor) -> InterceptFuture<'a, RequestDescriptor> {
		Box::pin(async move {
			tracing::debug!(method = %descriptor.method, url = %descriptor.url, "dispatching");

			Ok(descriptor)
		})
	}
}
#[cfg(feature = "tracing")]
impl ResponseInterceptor for LogInterceptor {
	fn on_response<'a>(&'a self, response: ResponseEnvelope) -> InterceptFuture<'a, ResponseEnvelope> {
		Box::pin(async move {
			tracing::debug!(
				method = %response.request.method,
				url = %response.request.url,
				status = response.status,
				"completed"
			);

			Ok(response)
		})
	}

	fn on_response_error<'a>(&'a self, error: &'a Error) -> ObserveFuture<'a> {
		Box::pin(async move {
			tracing::error!(error = %error, "dispatch failed");
		})
	}
}
