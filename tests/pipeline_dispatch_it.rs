#![cfg(feature = "reqwest")]

// std
use std::sync::{
	Arc,
	atomic::{AtomicU32, Ordering},
};
// crates.io
use httpmock::prelude::*;
// self
use http_pipeline::{
	message::RequestOptions,
	pipeline::ReqwestPipeline,
	store::{KvStore, MemoryStore},
	url::Url,
};

fn build_pipeline(server: &MockServer) -> (ReqwestPipeline, Arc<MemoryStore>) {
	let backend = Arc::new(MemoryStore::default());
	let store: Arc<dyn KvStore> = backend.clone();
	let base_url =
		Url::parse(&server.base_url()).expect("Mock server base URL should parse successfully.");
	let pipeline =
		ReqwestPipeline::new(store, base_url).expect("Pipeline should build successfully.");

	(pipeline, backend)
}

#[tokio::test]
async fn get_returns_the_payload_and_clears_the_registry() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/items");
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"{"items":[1,2,3]}"#);
		})
		.await;
	let (pipeline, _) = build_pipeline(&server);
	let response = pipeline
		.get("/items", RequestOptions::new())
		.await
		.expect("GET /items should succeed against the mock.");

	mock.assert_async().await;

	assert_eq!(response.status, 200);
	assert_eq!(response.body, br#"{"items":[1,2,3]}"#.to_vec());
	assert_eq!(response.request.url, "/items");
	assert_eq!(pipeline.in_flight_count(), 0);
}

#[tokio::test]
async fn bearer_token_attaches_from_the_seeded_store() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/private").header("authorization", "Bearer seeded-access");
			then.status(200).body("{}");
		})
		.await;
	let (pipeline, _) = build_pipeline(&server);

	pipeline
		.credentials
		.set_access_token("seeded-access")
		.await
		.expect("Failed to seed access token.");
	pipeline
		.get("/private", RequestOptions::new().require_credentials())
		.await
		.expect("Authenticated GET should succeed.");

	mock.assert_async().await;
}

#[tokio::test]
async fn missing_token_triggers_refresh_before_dispatch() {
	let server = MockServer::start_async().await;
	let refresh_mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/auth/refresh")
				.body(r#"{"refresh_token":"still-valid"}"#);
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"{"access_token":"fresh-access","refresh_token":"fresh-refresh"}"#);
		})
		.await;
	let dispatch_mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/private").header("authorization", "Bearer fresh-access");
			then.status(200).body("{}");
		})
		.await;
	let (pipeline, _) = build_pipeline(&server);

	pipeline
		.credentials
		.set_refresh_token("still-valid")
		.await
		.expect("Failed to seed refresh token.");
	pipeline
		.get("/private", RequestOptions::new().require_credentials())
		.await
		.expect("GET with refreshed credentials should succeed.");

	refresh_mock.assert_async().await;
	dispatch_mock.assert_async().await;

	let rotated = pipeline
		.credentials
		.refresh_token()
		.await
		.expect("Refresh slot read should succeed.")
		.expect("Rotated refresh token should be stored.");

	assert_eq!(rotated.expose(), "fresh-refresh");
}

#[tokio::test]
async fn non_success_status_normalizes_and_fires_the_side_effect() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/broken");
			then.status(400)
				.header("content-type", "application/json")
				.body(r#"{"code":"BAD_REQUEST","detail":"missing field"}"#);
		})
		.await;
	let (pipeline, _) = build_pipeline(&server);
	let fired = Arc::new(AtomicU32::new(0));
	let observed = fired.clone();

	pipeline.normalizer.add_handler(400, move |_| {
		observed.fetch_add(1, Ordering::SeqCst);
	});

	let envelope = pipeline
		.get("/broken", RequestOptions::new())
		.await
		.expect_err("400 response should surface a failure.");

	mock.assert_async().await;

	assert_eq!(envelope.status, Some(400));
	assert_eq!(envelope.code.as_deref(), Some("BAD_REQUEST"));
	assert_eq!(fired.load(Ordering::SeqCst), 1);
	assert_eq!(pipeline.in_flight_count(), 0);
}

#[tokio::test]
async fn content_type_override_reaches_the_wire() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/upload").header("content-type", "text/plain");
			then.status(201).body("{}");
		})
		.await;
	let (pipeline, _) = build_pipeline(&server);

	pipeline
		.post("/upload", Some("payload"), RequestOptions::new().with_content_type("text/plain"))
		.await
		.expect("Overridden POST should succeed.");

	mock.assert_async().await;
}
