#![cfg(feature = "reqwest")]

// std
use std::{sync::Arc, time::Duration};
// crates.io
use httpmock::prelude::*;
// self
use http_pipeline::{
	message::RequestOptions,
	pipeline::ReqwestPipeline,
	store::{KvStore, MemoryStore},
	url::Url,
};

fn build_pipeline(server: &MockServer) -> ReqwestPipeline {
	let store: Arc<dyn KvStore> = Arc::new(MemoryStore::default());
	let base_url =
		Url::parse(&server.base_url()).expect("Mock server base URL should parse successfully.");

	ReqwestPipeline::new(store, base_url).expect("Pipeline should build successfully.")
}

#[tokio::test]
async fn cancel_request_aborts_the_call_and_unregisters_it() {
	let server = MockServer::start_async().await;
	let slow_mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/slow");
			then.status(200).body("{}").delay(Duration::from_secs(2));
		})
		.await;
	let pipeline = build_pipeline(&server);
	let worker = pipeline.clone();
	let handle = tokio::spawn(async move { worker.get("/slow", RequestOptions::new()).await });

	// Let the call reach the wire before pulling the plug.
	tokio::time::sleep(Duration::from_millis(200)).await;

	assert!(pipeline.is_in_flight("/slow"));

	pipeline.cancel_request("/slow");

	let envelope = handle
		.await
		.expect("Cancelled task should not panic.")
		.expect_err("Cancelled call should surface a failure.");

	assert!(envelope.message.contains("aborted"));
	assert_eq!(pipeline.in_flight_count(), 0);

	// The same URL dispatches fine once the slow response is out of the way.
	slow_mock.delete_async().await;

	let fast_mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/slow");
			then.status(200).body("{}");
		})
		.await;

	pipeline
		.get("/slow", RequestOptions::new())
		.await
		.expect("Follow-up call to the cancelled URL should succeed.");
	fast_mock.assert_async().await;
}

#[tokio::test]
async fn cancel_all_requests_sweeps_every_entry() {
	let server = MockServer::start_async().await;

	for path in ["/one", "/two"] {
		server
			.mock_async(|when, then| {
				when.method(GET).path(path);
				then.status(200).body("{}").delay(Duration::from_secs(2));
			})
			.await;
	}

	let pipeline = build_pipeline(&server);
	let first = pipeline.clone();
	let second = pipeline.clone();
	let first_handle = tokio::spawn(async move { first.get("/one", RequestOptions::new()).await });
	let second_handle =
		tokio::spawn(async move { second.get("/two", RequestOptions::new()).await });

	tokio::time::sleep(Duration::from_millis(300)).await;

	assert_eq!(pipeline.in_flight_count(), 2);

	pipeline.cancel_all_requests();

	assert!(first_handle.await.expect("First cancelled task should not panic.").is_err());
	assert!(second_handle.await.expect("Second cancelled task should not panic.").is_err());
	assert_eq!(pipeline.in_flight_count(), 0);
}

#[tokio::test]
async fn cancelling_an_unknown_url_is_a_no_op() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/calm");
			then.status(200).body("{}");
		})
		.await;
	let pipeline = build_pipeline(&server);

	pipeline.cancel_request("/never-dispatched");
	pipeline
		.get("/calm", RequestOptions::new())
		.await
		.expect("Unrelated call should be unaffected by the no-op cancellation.");
	mock.assert_async().await;
}
