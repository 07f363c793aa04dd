//! Walks through the authorization code flow against a local mock of the Coinbase endpoints.
//!
//! 1. Configure the flow with the application keys and a redirect URI whose scheme the host
//!    registered.
//! 2. Open the authorization page; here the opener only records the URL.
//! 3. Feed the redirect callback back into the flow, which checks `state` and exchanges the code.
//! 4. Use the stored access token for an authenticated request.

// std
use std::sync::Arc;
// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
use serde_json::{Value, json};
use url::Url;
// self
use coinbase_sdk::{
	client::{Client, ClientConfig},
	oauth::{AuthorizationRequest, RecordingOpener, StaticSchemes},
	request::RequestDescriptor,
};

const REDIRECT_URI: &str = "myapp://oauth/callback";

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;
	let token_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(200).header("content-type", "application/json").json_body(json!({
				"access_token": "demo-access",
				"token_type": "bearer",
				"expires_in": 7200,
				"refresh_token": "demo-refresh",
				"scope": "wallet:user:read"
			}));
		})
		.await;
	let user_mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/v2/user").header("authorization", "Bearer demo-access");
			then.status(200)
				.header("content-type", "application/json")
				.json_body(json!({"data": {"id": "demo-user", "name": "Demo User"}}));
		})
		.await;
	let client = Client::new(ClientConfig {
		base_url: server.base_url(),
		api_url: server.url("/v2"),
		..Default::default()
	})?;
	let flow = client.oauth(Arc::new(StaticSchemes::new(["myapp"])));
	let opener = RecordingOpener::new();

	flow.configure("demo-client", "demo-secret", REDIRECT_URI, None);

	let authorize_url = flow.begin_authorization(
		AuthorizationRequest::new().with_scope(["wallet:user:read"]),
		&opener,
	)?;

	println!("Authorization page: {authorize_url}.");

	// The host would receive this URL from the operating system once the user approves.
	let state = flow.pending_state().unwrap_or_default();
	let callback = Url::parse(&format!("{REDIRECT_URI}?code=demo-code&state={state}"))?;
	let Some(exchange) = flow.handle_redirect(&callback) else {
		color_eyre::eyre::bail!("Callback was not addressed to this flow.");
	};
	let token = exchange.await?;

	println!("Access token expires at {}.", token.expires_at());

	let user = client.fetch_data::<Value>(RequestDescriptor::get("/user").authenticated()).await?;

	println!("Signed in as {}.", user.data["name"]);

	token_mock.assert_async().await;
	user_mock.assert_async().await;

	Ok(())
}
