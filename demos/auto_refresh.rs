//! Shows two requests that hit an expired access token sharing a single refresh call.

// std
use std::time::Duration;
// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
use serde_json::{Value, json};
// self
use coinbase_sdk::{
	client::{Client, ClientConfig},
	refresh::RefreshStrategy,
	request::RequestDescriptor,
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;
	let _expired = server
		.mock_async(|when, then| {
			when.method(GET).path("/v2/user").header("authorization", "Bearer stale");
			then.status(401).header("content-type", "application/json").json_body(json!({
				"errors": [{"id": "expired_token", "message": "The access token expired"}]
			}));
		})
		.await;
	let _fresh = server
		.mock_async(|when, then| {
			when.method(GET).path("/v2/user").header("authorization", "Bearer rotated");
			then.status(200)
				.header("content-type", "application/json")
				.json_body(json!({"data": {"id": "demo-user"}}));
		})
		.await;
	let refresh_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(200)
				.header("content-type", "application/json")
				.delay(Duration::from_millis(200))
				.json_body(json!({
					"access_token": "rotated",
					"token_type": "bearer",
					"expires_in": 7200,
					"refresh_token": "next-refresh",
					"scope": "wallet:user:read"
				}));
		})
		.await;
	let client = Client::builder(ClientConfig {
		base_url: server.base_url(),
		api_url: server.url("/v2"),
		..Default::default()
	})
	.access_token("stale")
	.build()?;

	client.set_refresh_strategy(
		RefreshStrategy::refresh("demo-client", "demo-secret", "demo-refresh").on_update(|token| {
			match token {
				Some(token) => println!("Persisting rotated tokens (expire at {}).", token.expires_at()),
				None => println!("Tokens cleared; authorization required."),
			}
		}),
	);

	let first = client.fetch_data::<Value>(RequestDescriptor::get("/user").authenticated());
	let second = client.fetch_data::<Value>(RequestDescriptor::get("/user").authenticated());

	println!("First: {}.", first.await?.data["id"]);
	println!("Second: {}.", second.await?.data["id"]);

	let metrics = client.refresh_metrics();

	println!(
		"Refresh calls: {}, coalesced retries: {}.",
		metrics.attempts(),
		metrics.coalesced()
	);

	refresh_mock.assert_calls_async(1).await;

	Ok(())
}
