//! V3 token endpoint exchanges built on the `oauth2` crate.
//!
//! Token traffic goes through the same [`HttpExecutor`] as regular calls, so TLS pins and
//! client timeouts protect it as well. The exchange itself is stateless; caching and refresh
//! scheduling live in [`crate::refresh::TokenManager`].

pub use oauth2::{self, http};

// crates.io
use oauth2::{
	AsyncHttpClient, ClientId, ClientSecret, EndpointNotSet, EndpointSet, HttpClientError,
	HttpRequest, HttpResponse, RefreshToken, RequestTokenError, ResourceOwnerPassword,
	ResourceOwnerUsername, Scope, TokenResponse, TokenUrl,
	basic::{BasicClient, BasicErrorResponse, BasicErrorResponseType, BasicRequestTokenError},
};
// self
use crate::{
	_prelude::*,
	auth::{TokenRecord, TokenSecret},
	error::{ConfigError, TokenError, TransportError},
	http::{HttpExecutor, PreparedRequest},
	obs::CallSpan,
};

/// Default Mashery V3 token endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://api.mashery.com/v3/token";

type ConfiguredClient =
	BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Boxed future returned by [`TokenExchange`] methods.
pub type ExchangeFuture<'a> = Pin<Box<dyn Future<Output = Result<TokenRecord>> + 'a + Send>>;

/// Obtains and renews access tokens.
pub trait TokenExchange
where
	Self: Send + Sync,
{
	/// Performs the initial login and returns a fresh record.
	fn authenticate(&self) -> ExchangeFuture<'_>;

	/// Exchanges `refresh_token` for a fresh record.
	fn refresh<'a>(&'a self, refresh_token: &'a TokenSecret) -> ExchangeFuture<'a>;
}

/// Credentials for the V3 resource-owner password grant.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct V3Credentials {
	/// Token endpoint; [`DEFAULT_TOKEN_URL`] when absent.
	#[serde(default)]
	pub token_url: Option<Url>,
	/// API key (OAuth client id).
	pub api_key: String,
	/// API key secret (OAuth client secret).
	pub api_secret: String,
	/// Portal user name.
	pub username: String,
	/// Portal password.
	pub password: String,
	/// Area UUID sent as the token scope.
	pub area_uuid: String,
}
impl V3Credentials {
	/// Creates credentials for the default token endpoint.
	pub fn new(
		api_key: impl Into<String>,
		api_secret: impl Into<String>,
		username: impl Into<String>,
		password: impl Into<String>,
		area_uuid: impl Into<String>,
	) -> Self {
		Self {
			token_url: None,
			api_key: api_key.into(),
			api_secret: api_secret.into(),
			username: username.into(),
			password: password.into(),
			area_uuid: area_uuid.into(),
		}
	}

	/// Points the exchange at another token endpoint.
	pub fn with_token_url(mut self, token_url: Url) -> Self {
		self.token_url = Some(token_url);

		self
	}

	fn validate(&self) -> Result<(), ConfigError> {
		let fields = [
			("API key", &self.api_key),
			("API secret", &self.api_secret),
			("username", &self.username),
			("password", &self.password),
			("area UUID", &self.area_uuid),
		];

		match fields.into_iter().find(|(_, value)| value.trim().is_empty()) {
			Some((field, _)) => Err(ConfigError::MissingCredential { field }),
			None => Ok(()),
		}
	}
}
impl Debug for V3Credentials {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("V3Credentials")
			.field("token_url", &self.token_url.as_ref().map(Url::as_str))
			.field("api_key", &self.api_key)
			.field("api_secret", &"<redacted>")
			.field("username", &self.username)
			.field("password", &"<redacted>")
			.field("area_uuid", &self.area_uuid)
			.finish()
	}
}

/// [`TokenExchange`] against the Mashery V3 token endpoint.
pub struct V3TokenExchange {
	client: ConfiguredClient,
	credentials: V3Credentials,
	executor: Arc<dyn HttpExecutor>,
}
impl V3TokenExchange {
	/// Validates `credentials` and routes token requests through `executor`.
	pub fn new(credentials: V3Credentials, executor: Arc<dyn HttpExecutor>) -> Result<Self> {
		credentials.validate()?;

		let token_url = match &credentials.token_url {
			Some(url) => url.clone(),
			None => Url::parse(DEFAULT_TOKEN_URL)
				.map_err(|source| ConfigError::InvalidUrl { source })?,
		};
		let token_url = TokenUrl::from_url(token_url);
		let client = BasicClient::new(ClientId::new(credentials.api_key.clone()))
			.set_client_secret(ClientSecret::new(credentials.api_secret.clone()))
			.set_token_uri(token_url);

		Ok(Self { client, credentials, executor })
	}

	/// Credentials the exchange was built with.
	pub fn credentials(&self) -> &V3Credentials {
		&self.credentials
	}
}
impl TokenExchange for V3TokenExchange {
	fn authenticate(&self) -> ExchangeFuture<'_> {
		Box::pin(async move {
			let span = CallSpan::new("POST token", "authenticate");
			let handle = ExchangeHandle::new(Arc::clone(&self.executor));
			let username = ResourceOwnerUsername::new(self.credentials.username.clone());
			let password = ResourceOwnerPassword::new(self.credentials.password.clone());
			let response = span
				.instrument(
					self.client
						.exchange_password(&username, &password)
						.add_scope(Scope::new(self.credentials.area_uuid.clone()))
						.request_async(&handle),
				)
				.await
				.map_err(|err| map_request_error(handle.status(), err))?;

			record_from_response(&response, None)
		})
	}

	fn refresh<'a>(&'a self, refresh_token: &'a TokenSecret) -> ExchangeFuture<'a> {
		Box::pin(async move {
			let span = CallSpan::new("POST token", "refresh");
			let handle = ExchangeHandle::new(Arc::clone(&self.executor));
			let secret = RefreshToken::new(refresh_token.expose().to_owned());
			let response = span
				.instrument(self.client.exchange_refresh_token(&secret).request_async(&handle))
				.await
				.map_err(|err| map_request_error(handle.status(), err))?;

			record_from_response(&response, Some(refresh_token))
		})
	}
}
impl Debug for V3TokenExchange {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("V3TokenExchange")
			.field("credentials", &self.credentials)
			.finish_non_exhaustive()
	}
}

/// [`AsyncHttpClient`] adapter over the transport's leaf executor.
///
/// Remembers the status of the last response so error mapping can report it.
#[derive(Clone)]
struct ExchangeHandle {
	executor: Arc<dyn HttpExecutor>,
	status: Arc<Mutex<Option<u16>>>,
}
impl ExchangeHandle {
	fn new(executor: Arc<dyn HttpExecutor>) -> Self {
		Self { executor, status: Arc::new(Mutex::new(None)) }
	}

	fn status(&self) -> Option<u16> {
		*self.status.lock()
	}
}
impl<'c> AsyncHttpClient<'c> for ExchangeHandle {
	type Error = HttpClientError<TransportError>;
	type Future = Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send>>;

	fn call(&'c self, request: HttpRequest) -> Self::Future {
		Box::pin(async move {
			self.status.lock().take();

			let (parts, body) = request.into_parts();
			let url = Url::parse(&parts.uri.to_string())
				.map_err(|err| HttpClientError::Other(format!("Token URL is invalid: {err}.")))?;
			let mut prepared = PreparedRequest::new(parts.method, url);

			prepared.headers = parts.headers;
			prepared.body = if body.is_empty() { None } else { Some(body) };

			let response = self.executor.execute(prepared).await.map_err(into_io)?;
			let bytes = response.body().await.map_err(into_io)?;

			*self.status.lock() = Some(response.status().as_u16());

			let mut reply = HttpResponse::new(bytes.to_vec());

			*reply.status_mut() = response.status();
			*reply.headers_mut() = response.headers().to_owned();

			Ok(reply)
		})
	}
}

fn into_io(err: TransportError) -> HttpClientError<TransportError> {
	HttpClientError::Io(std::io::Error::other(err))
}

fn record_from_response(
	response: &oauth2::basic::BasicTokenResponse,
	previous_refresh: Option<&TokenSecret>,
) -> Result<TokenRecord> {
	let expires_in = response.expires_in().ok_or(TokenError::InvalidExpiresIn)?.as_secs();
	let expires_in = i64::try_from(expires_in).map_err(|_| TokenError::InvalidExpiresIn)?;
	let mut builder = TokenRecord::builder()
		.access_token(response.access_token().secret().to_owned())
		.obtained_at(OffsetDateTime::now_utc())
		.expires_in(Duration::seconds(expires_in));

	match (response.refresh_token(), previous_refresh) {
		(Some(fresh), _) => builder = builder.refresh_token(fresh.secret().to_owned()),
		(None, Some(previous)) => builder = builder.refresh_token(previous.expose().to_owned()),
		(None, None) => {},
	}

	builder.build().map_err(|_| TokenError::InvalidExpiresIn.into())
}

fn map_request_error(
	status: Option<u16>,
	err: BasicRequestTokenError<HttpClientError<TransportError>>,
) -> Error {
	match err {
		RequestTokenError::ServerResponse(response) => map_server_response(status, &response),
		RequestTokenError::Request(error) => map_client_error(error),
		RequestTokenError::Parse(source, _body) => match status {
			Some(code) if !(200..300).contains(&code) => TokenError::Endpoint {
				message: "token endpoint returned an error body that is not OAuth JSON".into(),
				status,
			}
			.into(),
			_ => TokenError::ResponseParse { source }.into(),
		},
		RequestTokenError::Other(message) => TokenError::Endpoint { message, status }.into(),
	}
}

fn map_server_response(status: Option<u16>, response: &BasicErrorResponse) -> Error {
	let reason = response
		.error_description()
		.cloned()
		.unwrap_or_else(|| response.error().as_ref().to_owned());

	match response.error() {
		BasicErrorResponseType::InvalidGrant => TokenError::InvalidGrant { reason }.into(),
		BasicErrorResponseType::InvalidClient | BasicErrorResponseType::UnauthorizedClient =>
			TokenError::InvalidClient { reason }.into(),
		_ => TokenError::Endpoint { message: reason, status }.into(),
	}
}

fn map_client_error(err: HttpClientError<TransportError>) -> Error {
	match err {
		HttpClientError::Http(inner) => ConfigError::from(inner).into(),
		HttpClientError::Io(inner) => unwrap_transport(inner).into(),
		HttpClientError::Other(message) => TokenError::Endpoint { message, status: None }.into(),
		_ => TokenError::Endpoint {
			message: "HTTP client error occurred while calling the token endpoint".into(),
			status: None,
		}
		.into(),
	}
}

fn unwrap_transport(err: std::io::Error) -> TransportError {
	if !err.get_ref().is_some_and(|inner| inner.is::<TransportError>()) {
		return TransportError::Io(err);
	}

	match err.into_inner().map(|inner| inner.downcast::<TransportError>()) {
		Some(Ok(inner)) => *inner,
		Some(Err(other)) => TransportError::Network { source: other },
		None => TransportError::Body { message: "transport error was lost".into() },
	}
}
