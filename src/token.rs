//! OAuth token endpoint contract: the user token model, request descriptors, and the token
//! resource bound to a [`Client`].

// crates.io
use oauth2::{AccessToken, ClientId, ClientSecret, RefreshToken};
use serde::Deserializer;
use serde_json::{Map, Value};
// self
use crate::{
	_prelude::*,
	client::Client,
	error::OAuthError,
	model::EmptyData,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	request::{ErrorShape, RequestDescriptor},
	response::Response,
};

/// Path of the token issuing endpoint.
pub const TOKEN_PATH: &str = "/oauth/token";
/// Path of the token revocation endpoint.
pub const REVOKE_PATH: &str = "/oauth/revoke";

/// Access and refresh token pair issued by the token endpoint.
///
/// Secrets use the `oauth2` newtypes, whose `Debug` output is redacted.
#[derive(Clone, Debug, Deserialize)]
pub struct UserToken {
	/// Bearer token attached to authorized requests.
	pub access_token: AccessToken,
	/// Token type (always `bearer`).
	pub token_type: String,
	/// Lifetime in seconds, relative to [`UserToken::received_at`].
	pub expires_in: u64,
	/// Token used to obtain the next pair.
	pub refresh_token: RefreshToken,
	/// Granted scopes.
	#[serde(deserialize_with = "space_separated")]
	pub scope: Vec<String>,
	/// Local receive time.
	#[serde(skip, default = "OffsetDateTime::now_utc")]
	pub received_at: OffsetDateTime,
}
impl UserToken {
	/// Moment the access token stops being valid.
	pub fn expires_at(&self) -> OffsetDateTime {
		self.received_at + Duration::seconds(i64::try_from(self.expires_in).unwrap_or(i64::MAX))
	}

	/// Returns `true` once [`UserToken::expires_at`] is reached at `now`.
	pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
		now >= self.expires_at()
	}
}

fn space_separated<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
	D: Deserializer<'de>,
{
	let raw = String::deserialize(deserializer)?;

	Ok(raw.split(' ').filter(|s| !s.is_empty()).map(str::to_owned).collect())
}

/// Descriptors for the three token endpoint calls.
///
/// All of them are unauthenticated JSON `POST`s that report failures with the OAuth error body.
#[derive(Clone, Debug)]
pub enum TokenRequest {
	/// `grant_type=authorization_code` exchange.
	Exchange {
		/// Authorization code from the redirect.
		code: String,
		/// OAuth client id.
		client_id: ClientId,
		/// OAuth client secret.
		client_secret: ClientSecret,
		/// Redirect URI used for the authorization request.
		redirect_uri: String,
	},
	/// `grant_type=refresh_token` exchange.
	Refresh {
		/// OAuth client id.
		client_id: ClientId,
		/// OAuth client secret.
		client_secret: ClientSecret,
		/// Current refresh token.
		refresh_token: RefreshToken,
	},
	/// Revocation of an access token.
	Revoke {
		/// Token to revoke.
		access_token: AccessToken,
	},
}
impl TokenRequest {
	/// Builds the descriptor for this call.
	pub fn descriptor(&self) -> RequestDescriptor {
		let mut body = Map::new();
		let mut put = |key: &str, value: &str| {
			body.insert(key.to_owned(), Value::from(value));
		};
		let (path, allow_empty) = match self {
			TokenRequest::Exchange { code, client_id, client_secret, redirect_uri } => {
				put("grant_type", "authorization_code");
				put("code", code);
				put("client_id", client_id.as_str());
				put("client_secret", client_secret.secret());
				put("redirect_uri", redirect_uri);

				(TOKEN_PATH, false)
			},
			TokenRequest::Refresh { client_id, client_secret, refresh_token } => {
				put("grant_type", "refresh_token");
				put("client_id", client_id.as_str());
				put("client_secret", client_secret.secret());
				put("refresh_token", refresh_token.secret());

				(TOKEN_PATH, false)
			},
			TokenRequest::Revoke { access_token } => {
				put("token", access_token.secret());

				(REVOKE_PATH, true)
			},
		};
		let descriptor =
			RequestDescriptor::post(path).with_body(body).with_error_shape(ErrorShape::OAuth);

		if allow_empty { descriptor.allow_empty_response() } else { descriptor }
	}
}

/// Token endpoint resource bound to a client context.
///
/// Successful exchanges and refreshes store the new tokens on the client and notify the refresh
/// strategy's listener; a successful revocation (or a refresh rejected with `401`) clears them.
#[derive(Clone, Debug)]
pub struct Tokens {
	client: Client,
}
impl Tokens {
	pub(crate) fn new(client: Client) -> Self {
		Self { client }
	}

	/// Exchanges an authorization code for a token pair.
	pub fn exchange_code(
		&self,
		code: impl Into<String>,
		client_id: impl Into<String>,
		client_secret: impl Into<String>,
		redirect_uri: impl Into<String>,
	) -> Promise<UserToken> {
		let request = TokenRequest::Exchange {
			code: code.into(),
			client_id: ClientId::new(client_id.into()),
			client_secret: ClientSecret::new(client_secret.into()),
			redirect_uri: redirect_uri.into(),
		};

		self.issue(FlowKind::AuthorizationCode, request)
	}

	/// Exchanges a refresh token for a new token pair.
	pub fn refresh(
		&self,
		client_id: impl Into<String>,
		client_secret: impl Into<String>,
		refresh_token: impl Into<String>,
	) -> Promise<UserToken> {
		let request = TokenRequest::Refresh {
			client_id: ClientId::new(client_id.into()),
			client_secret: ClientSecret::new(client_secret.into()),
			refresh_token: RefreshToken::new(refresh_token.into()),
		};

		self.issue(FlowKind::Refresh, request)
	}

	/// Revokes `access_token` and clears the stored tokens on success.
	pub fn revoke(&self, access_token: impl Into<String>) -> Promise<EmptyData> {
		let descriptor =
			TokenRequest::Revoke { access_token: AccessToken::new(access_token.into()) }.descriptor();
		let client = self.client.clone();

		self.client.request_token_endpoint::<EmptyData>(descriptor).map(move |response| {
			client.apply_token_update(None);

			response.value
		})
	}

	fn issue(&self, kind: FlowKind, request: TokenRequest) -> Promise<UserToken> {
		let span = FlowSpan::new(kind, "token_endpoint");
		let pending = span.in_scope(|| {
			obs::record_flow_outcome(kind, FlowOutcome::Attempt);

			self.client.request_token_endpoint::<UserToken>(request.descriptor())
		});
		let next = Promise::with_executor(pending.executor().clone());
		let settle = next.clone();
		let client = self.client.clone();

		// Stored tokens are updated before any observer of `next` sees the outcome.
		pending.on_complete(move |outcome| {
			let outcome = outcome.map(Response::into_value);

			match &outcome {
				Ok(token) => client.apply_token_update(Some(token)),
				Err(Error::OAuth(OAuthError::Response { status: 401, .. }))
					if kind == FlowKind::Refresh =>
					client.apply_token_update(None),
				Err(_) => (),
			}

			obs::record_flow_outcome(kind, FlowOutcome::of(&outcome));
			span.in_scope(|| match &outcome {
				Ok(_) => obs::log_event!(debug, flow = kind.as_str(), "Token endpoint call succeeded."),
				Err(_e) => obs::log_event!(
					warn,
					flow = kind.as_str(),
					error = %_e,
					"Token endpoint call failed."
				),
			});
			settle.settle(outcome);
		});

		next
	}
}
