#![cfg(feature = "reqwest")]

// std
use std::time::Duration as StdDuration;
// crates.io
use httpmock::prelude::*;
use serde_json::json;
// self
use coinbase_sdk::{
	_preludet::*,
	client::Client,
	error::{ApiError, OAuthError},
	refresh::{RefreshStrategy, TokenAutoRefresh},
	request::RequestDescriptor,
	response::Response,
};

const CLIENT_ID: &str = "client-1";
const CLIENT_SECRET: &str = "secret-1";

fn refresh_body(refresh_token: &str) -> serde_json::Value {
	json!({
		"grant_type": "refresh_token",
		"client_id": CLIENT_ID,
		"client_secret": CLIENT_SECRET,
		"refresh_token": refresh_token,
	})
}

fn token_body(access: &str, refresh: &str) -> serde_json::Value {
	json!({
		"access_token": access,
		"token_type": "bearer",
		"expires_in": 7200,
		"refresh_token": refresh,
		"scope": "wallet:user:read",
	})
}

fn expired_client(server: &MockServer) -> Client {
	let client = build_test_client(&server.base_url(), Some("expired"));

	client.set_refresh_strategy(RefreshStrategy::refresh(CLIENT_ID, CLIENT_SECRET, "refresh-1"));

	client
}

async fn mock_user<'a>(server: &'a MockServer, bearer: &str, status: u16) -> httpmock::Mock<'a> {
	let authorization = format!("Bearer {bearer}");

	server
		.mock_async(|when, then| {
			when.method(GET).path("/v2/user").header("authorization", authorization);

			if status == 200 {
				then.status(200)
					.header("content-type", "application/json")
					.json_body(json!({"id": "user-1", "bearer": bearer}));
			} else {
				then.status(status).header("content-type", "application/json").json_body(json!({
					"errors": [{"id": "expired_token", "message": "The access token expired"}]
				}));
			}
		})
		.await
}

fn get_user(client: &Client) -> Promise<Response<serde_json::Value>> {
	client.request(RequestDescriptor::get("/user").authenticated())
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_unauthorized_requests_share_one_refresh() {
	let server = MockServer::start_async().await;
	let client = expired_client(&server);
	let expired = mock_user(&server, "expired", 401).await;
	let fresh = mock_user(&server, "fresh", 200).await;
	let refresh = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token").json_body(refresh_body("refresh-1"));
			then.status(200)
				.header("content-type", "application/json")
				.delay(StdDuration::from_millis(300))
				.json_body(token_body("fresh", "refresh-2"));
		})
		.await;
	let first = get_user(&client);
	let second = get_user(&client);
	let first = first.await.expect("First request should succeed after the refresh.");
	let second = second.await.expect("Second request should succeed after the refresh.");

	assert_eq!(first.value["bearer"], "fresh");
	assert_eq!(second.value["bearer"], "fresh");

	refresh.assert_calls_async(1).await;
	expired.assert_calls_async(2).await;
	fresh.assert_calls_async(2).await;

	assert_eq!(client.access_token().map(|t| t.secret().clone()), Some("fresh".into()));
	assert_eq!(client.refresh_token().map(|t| t.secret().clone()), Some("refresh-2".into()));
	assert!(!client.is_refreshing());

	let metrics = client.refresh_metrics();

	assert_eq!(metrics.attempts(), 1);
	assert_eq!(metrics.successes(), 1);
	assert_eq!(metrics.failures(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn burst_of_failures_issues_a_single_refresh() {
	const BURST: usize = 8;

	let server = MockServer::start_async().await;
	let client = expired_client(&server);
	let expired = mock_user(&server, "expired", 401).await;
	let fresh = mock_user(&server, "fresh", 200).await;
	let refresh = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(200)
				.header("content-type", "application/json")
				.delay(StdDuration::from_millis(300))
				.json_body(token_body("fresh", "refresh-2"));
		})
		.await;
	let pending = (0..BURST).map(|_| get_user(&client)).collect::<Vec<_>>();

	for promise in pending {
		promise.await.expect("Every request should succeed after the refresh.");
	}

	refresh.assert_calls_async(1).await;
	expired.assert_calls_async(BURST).await;
	fresh.assert_calls_async(BURST).await;

	assert_eq!(client.refresh_metrics().attempts(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_refresh_fails_every_request_and_clears_tokens() {
	let server = MockServer::start_async().await;
	let client = expired_client(&server);
	let _expired = mock_user(&server, "expired", 401).await;
	let refresh = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(401)
				.header("content-type", "application/json")
				.delay(StdDuration::from_millis(300))
				.json_body(json!({
					"error": "invalid_grant",
					"error_description": "The refresh token is invalid"
				}));
		})
		.await;
	let first = get_user(&client);
	let second = get_user(&client);

	for outcome in [first.await, second.await] {
		let err = outcome.expect_err("Requests should fail with the refresh error.");

		assert!(matches!(
			err,
			Error::OAuth(OAuthError::Response { status: 401, ref error, .. }) if error == "invalid_grant"
		));
		assert!(err.requires_reauthorization());
	}

	refresh.assert_calls_async(1).await;

	assert!(client.access_token().is_none());
	assert!(client.refresh_token().is_none());
	assert!(client.interceptor_kinds().is_empty());
	assert_eq!(client.refresh_metrics().failures(), 1);

	let err = get_user(&client).await.expect_err("Cleared tokens should stop further requests.");

	assert!(matches!(err, Error::Api(ApiError::EmptyAccessToken)));
}

#[tokio::test(flavor = "multi_thread")]
async fn non_unauthorized_failures_pass_through() {
	let server = MockServer::start_async().await;
	let client = expired_client(&server);
	let _failing = mock_user(&server, "expired", 500).await;
	let refresh = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(200).json_body(token_body("fresh", "refresh-2"));
		})
		.await;
	let err = get_user(&client).await.expect_err("500 should be returned unchanged.");

	assert_eq!(err.status(), Some(500));

	refresh.assert_calls_async(0).await;

	assert_eq!(client.access_token().map(|t| t.secret().clone()), Some("expired".into()));
}

#[tokio::test(flavor = "multi_thread")]
async fn retried_request_is_not_refreshed_twice() {
	let server = MockServer::start_async().await;
	let client = expired_client(&server);
	let _expired = mock_user(&server, "expired", 401).await;
	let still_rejected = mock_user(&server, "fresh", 401).await;
	let refresh = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(200)
				.header("content-type", "application/json")
				.json_body(token_body("fresh", "refresh-2"));
		})
		.await;
	let err = get_user(&client).await.expect_err("Retry should surface its own failure.");

	assert!(err.is_unauthorized());

	refresh.assert_calls_async(1).await;
	still_rejected.assert_calls_async(1).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn reinstalling_the_strategy_keeps_one_interceptor() {
	let server = MockServer::start_async().await;
	let client = expired_client(&server);

	client.set_refresh_strategy(RefreshStrategy::refresh(CLIENT_ID, CLIENT_SECRET, "refresh-1"));

	assert_eq!(client.interceptor_kinds(), vec![TokenAutoRefresh::KIND]);

	let _expired = mock_user(&server, "expired", 401).await;
	let _fresh = mock_user(&server, "fresh", 200).await;
	let refresh = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token").json_body(refresh_body("refresh-1"));
			then.status(200)
				.header("content-type", "application/json")
				.json_body(token_body("fresh", "refresh-2"));
		})
		.await;

	get_user(&client).await.expect("Request should succeed after the refresh.");

	refresh.assert_calls_async(1).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn without_strategy_unauthorized_is_returned() {
	let server = MockServer::start_async().await;
	let client = build_test_client(&server.base_url(), Some("expired"));
	let _expired = mock_user(&server, "expired", 401).await;
	let refresh = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(200).json_body(token_body("fresh", "refresh-2"));
		})
		.await;
	let err = get_user(&client).await.expect_err("401 should be returned without a strategy.");

	assert!(matches!(&err, Error::Api(api) if api.has_error_id("expired_token")));
	assert!(err.is_unauthorized());

	refresh.assert_calls_async(0).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn update_listener_sees_the_rotated_token() {
	let server = MockServer::start_async().await;
	let client = build_test_client(&server.base_url(), Some("expired"));
	let seen = Arc::new(Mutex::new(Vec::new()));
	let recorder = seen.clone();

	client.set_refresh_strategy(
		RefreshStrategy::refresh(CLIENT_ID, CLIENT_SECRET, "refresh-1").on_update(move |token| {
			recorder.lock().push(token.map(|t| t.refresh_token.secret().clone()));
		}),
	);

	let _expired = mock_user(&server, "expired", 401).await;
	let _fresh = mock_user(&server, "fresh", 200).await;
	let _refresh = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(200)
				.header("content-type", "application/json")
				.json_body(token_body("fresh", "refresh-2"));
		})
		.await;

	get_user(&client).await.expect("Request should succeed after the refresh.");

	assert_eq!(*seen.lock(), vec![Some("refresh-2".to_owned())]);

	let _revoke = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/revoke").json_body(json!({"token": "fresh"}));
			then.status(200);
		})
		.await;

	client.tokens().revoke("fresh").await.expect("Revocation should succeed.");

	assert_eq!(*seen.lock(), vec![Some("refresh-2".to_owned()), None]);
	assert!(client.access_token().is_none());
}
