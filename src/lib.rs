//! Deferred-value client core for the Coinbase API - composable request pipeline, pluggable
//! interceptors, single-flight token refresh, and CSRF-safe OAuth authorization.
//!
//! Every call returns a [`Promise`](promise::Promise): a single-assignment deferred value that
//! can be composed with `map`/`flat_map`/`recover`, observed from any thread, or simply
//! awaited.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod client;
pub mod error;
pub mod http;
pub mod interceptor;
pub mod model;
pub mod oauth;
pub mod obs;
pub mod promise;
pub mod refresh;
pub mod request;
pub mod response;
pub mod token;
#[cfg(feature = "reqwest")]
#[doc(hidden)]
pub mod _preludet {
	//! Convenience re-exports and helpers shared by the integration tests and demos.

	pub use crate::_prelude::*;

	// self
	use crate::client::{Client, ClientConfig};

	/// Config whose API and token hosts point at `server_url` (an `httpmock` server).
	pub fn test_config(server_url: &str) -> ClientConfig {
		let server_url = server_url.trim_end_matches('/');

		ClientConfig {
			base_url: server_url.to_owned(),
			api_url: format!("{server_url}/v2"),
			..Default::default()
		}
	}

	/// Builds a reqwest-backed client against `server_url` with an optional access token.
	///
	/// Must be called from within a tokio runtime.
	pub fn build_test_client(server_url: &str, access_token: Option<&str>) -> Client {
		let builder = Client::builder(test_config(server_url));
		let builder = match access_token {
			Some(token) => builder.access_token(token),
			None => builder,
		};

		builder.build().expect("Test client should build inside a tokio runtime.")
	}
}

mod pipeline;

mod _prelude {
	pub use std::{
		any::Any,
		collections::{BTreeMap, BTreeSet},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::{Future, IntoFuture},
		pin::Pin,
		sync::{Arc, Weak},
	};

	pub use oauth2::http::{HeaderMap, Method, StatusCode};
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize, de::DeserializeOwned};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::{
		error::{Error, Result},
		promise::Promise,
	};
}

pub use error::{Error, Result};
#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(all(test, feature = "reqwest"))] use {color_eyre as _, httpmock as _};
