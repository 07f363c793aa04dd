//! Wire models shared by every resource: the `{data, pagination, warnings}` envelope, error
//! bodies, and the tagged `TransactionParty` union.

// crates.io
use serde::de::Error as _;
use serde_json::{Map, Value};
// self
use crate::_prelude::*;

/// Service-defined error entry inside a `{"errors": [...]}` body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorModel {
	/// Machine readable identifier such as `expired_token`.
	pub id: String,
	/// Human readable message.
	pub message: String,
	/// Documentation link.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub url: Option<String>,
}

/// Non-fatal notice attached to a successful response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
	/// Machine readable identifier.
	pub id: String,
	/// Human readable message.
	pub message: String,
	/// Documentation link.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub url: Option<String>,
}

/// Sort order of a paginated list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListOrder {
	/// Oldest first.
	Asc,
	/// Newest first.
	Desc,
}

/// Cursor metadata returned alongside list responses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
	/// Cursor of the first item on this page.
	#[serde(default)]
	pub ending_before: Option<String>,
	/// Cursor of the last item on this page.
	#[serde(default)]
	pub starting_after: Option<String>,
	/// Page size.
	pub limit: u32,
	/// Sort order.
	pub order: ListOrder,
	/// Path of the previous page, if any.
	#[serde(default)]
	pub previous_uri: Option<String>,
	/// Path of the next page, if any.
	#[serde(default)]
	pub next_uri: Option<String>,
}

/// Standard `{data, pagination, warnings}` envelope wrapping API payloads.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResponseModel<T> {
	/// Payload.
	pub data: T,
	/// Present on list endpoints.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub pagination: Option<Pagination>,
	/// Non-fatal notices from the service.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub warnings: Option<Vec<Warning>>,
}

/// Placeholder for endpoints whose body is irrelevant or empty.
///
/// Deserializes from any JSON value, including the `null` used for empty bodies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EmptyData;
impl<'de> Deserialize<'de> for EmptyData {
	fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		serde::de::IgnoredAny::deserialize(deserializer).map(|_| EmptyData)
	}
}

/// `{"errors": [...]}` body returned by the general API.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct ErrorResponse {
	pub(crate) errors: Vec<ErrorModel>,
}

/// `{"error", "error_description"}` body returned by the token endpoints.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct OAuthErrorResponse {
	pub(crate) error: String,
	#[serde(default)]
	pub(crate) error_description: Option<String>,
}

/// Reference to another API resource.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
	/// Resource identifier.
	pub id: String,
	/// Resource type tag.
	pub resource: String,
	/// API path of the resource.
	#[serde(default)]
	pub resource_path: Option<String>,
}

/// Email counterparty.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailParty {
	/// Email address.
	pub email: String,
}

/// Crypto address counterparty (`bitcoin_address`, `ethereum_network`, ...).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoAddressParty {
	/// Type tag as reported by the service.
	pub resource: String,
	/// Address string.
	pub address: String,
	/// Currency code, when reported.
	#[serde(default)]
	pub currency: Option<String>,
}

/// Counterparty of a transaction, discriminated by its `resource` tag.
///
/// Tags introduced by the service after this crate was built decode into
/// [`TransactionParty::Unknown`] instead of failing the whole response.
#[derive(Clone, Debug, PartialEq)]
pub enum TransactionParty {
	/// Another user.
	User(ResourceRef),
	/// Email recipient.
	Email(EmailParty),
	/// One of the caller's accounts.
	Account(ResourceRef),
	/// External crypto address or network.
	CryptoAddress(CryptoAddressParty),
	/// Unrecognized tag, kept verbatim.
	Unknown {
		/// Tag as reported.
		resource: String,
		/// Raw object.
		raw: Map<String, Value>,
	},
}
impl TransactionParty {
	/// Type tag of the party.
	pub fn resource(&self) -> &str {
		match self {
			TransactionParty::User(r) | TransactionParty::Account(r) => &r.resource,
			TransactionParty::Email(_) => "email",
			TransactionParty::CryptoAddress(c) => &c.resource,
			TransactionParty::Unknown { resource, .. } => resource,
		}
	}
}
impl<'de> Deserialize<'de> for TransactionParty {
	fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let raw = Map::<String, Value>::deserialize(deserializer)?;
		let resource = raw
			.get("resource")
			.and_then(Value::as_str)
			.ok_or_else(|| D::Error::missing_field("resource"))?
			.to_owned();
		let tag = resource.clone();
		let party = match tag.as_str() {
			"user" => serde_json::from_value(Value::Object(raw)).map(TransactionParty::User),
			"email" => serde_json::from_value(Value::Object(raw)).map(TransactionParty::Email),
			"account" => serde_json::from_value(Value::Object(raw)).map(TransactionParty::Account),
			tag if tag.ends_with("address") || tag.ends_with("network") =>
				serde_json::from_value(Value::Object(raw)).map(TransactionParty::CryptoAddress),
			_ => return Ok(TransactionParty::Unknown { resource, raw }),
		};

		party.map_err(D::Error::custom)
	}
}
