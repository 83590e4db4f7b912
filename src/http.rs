//! Leaf HTTP primitives for backend calls.
//!
//! The module exposes [`HttpExecutor`], the transport's only dependency on an HTTP stack, along
//! with [`PreparedRequest`] (a fully resolved outbound call) and [`PipelineResponse`] (a
//! response whose body is read from the network at most once and cached for every later
//! reader). Pipeline stages inspect responses through [`PipelineResponse::body`] freely; only
//! the first reader pays for the network read.

// std
use std::time::Duration as StdDuration;
// self
use crate::{
	_prelude::*,
	error::{BoxError, ConfigError, TransportError},
	oauth::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
	tls::PinSet,
};

/// Boxed future returned by [`HttpExecutor::execute`].
pub type ExecFuture<'a> =
	Pin<Box<dyn Future<Output = Result<PipelineResponse, TransportError>> + 'a + Send>>;

/// Boxed future producing the raw body bytes of a response.
pub type BodyFuture = Pin<Box<dyn Future<Output = Result<Vec<u8>, BoxError>> + Send>>;

/// Abstraction over HTTP stacks able to execute a [`PreparedRequest`].
///
/// Implementations must be `Send + Sync + 'static` so a single executor can be shared by every
/// concurrent page fetch of a transport. Substitute a fake implementation in tests.
pub trait HttpExecutor
where
	Self: 'static + Send + Sync,
{
	/// Sends the request and resolves once response headers are available.
	///
	/// The body may stay on the wire until [`PipelineResponse::body`] is first awaited.
	fn execute(&self, request: PreparedRequest) -> ExecFuture<'_>;

	/// Drops pooled connections that are not currently in use.
	fn close_idle_connections(&self);
}

/// Fully resolved outbound call handed to the leaf executor.
#[derive(Clone, Debug)]
pub struct PreparedRequest {
	/// HTTP method.
	pub method: Method,
	/// Absolute URL including the query string.
	pub url: Url,
	/// Request headers, including authorization material.
	pub headers: HeaderMap,
	/// Optional request body.
	pub body: Option<Vec<u8>>,
}
impl PreparedRequest {
	/// Creates a request without headers or body.
	pub fn new(method: Method, url: Url) -> Self {
		Self { method, url, headers: HeaderMap::new(), body: None }
	}

	/// Returns the value of a query parameter, if present.
	pub fn query_param(&self, name: &str) -> Option<String> {
		self.url.query_pairs().find(|(key, _)| key == name).map(|(_, value)| value.into_owned())
	}

	/// Returns a header value as a string, if present and valid UTF-8.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.get(name).and_then(|value| value.to_str().ok())
	}
}

/// Backend response with a memoized, read-once body.
pub struct PipelineResponse {
	status: StatusCode,
	headers: HeaderMap,
	body: AsyncMutex<BodyState>,
}
impl PipelineResponse {
	/// Wraps a response whose body will be produced by `body` on first access.
	pub fn new(status: StatusCode, headers: HeaderMap, body: BodyFuture) -> Self {
		Self { status, headers, body: AsyncMutex::new(BodyState::Pending(Some(body))) }
	}

	/// Wraps a response whose body is already in memory.
	pub fn from_bytes(status: StatusCode, headers: HeaderMap, body: impl Into<Vec<u8>>) -> Self {
		Self { status, headers, body: AsyncMutex::new(BodyState::Read(Arc::from(body.into()))) }
	}

	/// HTTP status code.
	pub fn status(&self) -> StatusCode {
		self.status
	}

	/// Response headers.
	pub fn headers(&self) -> &HeaderMap {
		&self.headers
	}

	/// Returns a header value as a string, if present and valid UTF-8.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.get(name).and_then(|value| value.to_str().ok())
	}

	/// Returns `true` for 2xx statuses.
	pub fn is_success(&self) -> bool {
		self.status.is_success()
	}

	/// Returns the body bytes, reading them from the network on the first call only.
	///
	/// A failed read is cached as well: later callers receive the same failure instead of a
	/// second attempt against an already consumed stream.
	pub async fn body(&self) -> Result<Arc<[u8]>, TransportError> {
		let mut state = self.body.lock().await;

		match &mut *state {
			BodyState::Read(bytes) => return Ok(Arc::clone(bytes)),
			BodyState::Failed(message) =>
				return Err(TransportError::Body { message: message.clone() }),
			BodyState::Pending(pending) => {
				let Some(fut) = pending.take() else {
					return Err(TransportError::Body { message: "body stream was lost".into() });
				};

				match fut.await {
					Ok(bytes) => {
						let bytes = Arc::<[u8]>::from(bytes);

						*state = BodyState::Read(Arc::clone(&bytes));

						Ok(bytes)
					},
					Err(err) => {
						let message = err.to_string();

						*state = BodyState::Failed(message.clone());

						Err(TransportError::Body { message })
					},
				}
			},
		}
	}

	/// Headers flattened into owned pairs, for diagnostics.
	pub fn header_pairs(&self) -> Vec<(String, String)> {
		self.headers
			.iter()
			.map(|(name, value)| {
				(name.as_str().to_owned(), String::from_utf8_lossy(value.as_bytes()).into_owned())
			})
			.collect()
	}
}
impl Debug for PipelineResponse {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("PipelineResponse")
			.field("status", &self.status)
			.field("headers", &self.headers)
			.finish_non_exhaustive()
	}
}

enum BodyState {
	Pending(Option<BodyFuture>),
	Read(Arc<[u8]>),
	Failed(String),
}

/// Connection-level settings for [`ReqwestExecutor`].
#[derive(Clone, Debug)]
pub struct ExecutorConfig {
	/// Whole-request timeout enforced by the HTTP client.
	pub timeout: StdDuration,
	/// Certificate pins every TLS chain must satisfy; empty disables pinning.
	pub pins: PinSet,
}
impl Default for ExecutorConfig {
	fn default() -> Self {
		Self { timeout: StdDuration::from_secs(60), pins: PinSet::default() }
	}
}

/// Reqwest-backed leaf executor.
///
/// Redirects are not followed: the backend answers REST calls directly and a redirect would
/// carry authorization headers to another origin.
#[cfg(feature = "reqwest")]
#[derive(Debug)]
pub struct ReqwestExecutor {
	client: RwLock<ReqwestClient>,
	config: ExecutorConfig,
}
#[cfg(feature = "reqwest")]
impl ReqwestExecutor {
	/// Builds an executor from the provided configuration.
	pub fn new(config: ExecutorConfig) -> Result<Self, ConfigError> {
		let client = Self::build_client(&config)?;

		Ok(Self { client: RwLock::new(client), config })
	}

	/// Wraps an existing client; idle-connection resets rebuild it from default settings.
	pub fn with_client(client: ReqwestClient) -> Self {
		Self { client: RwLock::new(client), config: ExecutorConfig::default() }
	}

	fn build_client(config: &ExecutorConfig) -> Result<ReqwestClient, ConfigError> {
		let mut builder = ReqwestClient::builder()
			.timeout(config.timeout)
			.redirect(reqwest::redirect::Policy::none());

		if !config.pins.is_empty() {
			builder = builder.use_preconfigured_tls(config.pins.client_config()?);
		}

		Ok(builder.build()?)
	}
}
#[cfg(feature = "reqwest")]
impl HttpExecutor for ReqwestExecutor {
	fn execute(&self, request: PreparedRequest) -> ExecFuture<'_> {
		let client = self.client.read().clone();

		Box::pin(async move {
			let mut builder = client.request(request.method, request.url).headers(request.headers);

			if let Some(body) = request.body {
				builder = builder.body(body);
			}

			let response = builder.send().await?;
			let status = response.status();
			let headers = response.headers().to_owned();
			let body: BodyFuture = Box::pin(async move {
				response.bytes().await.map(|bytes| bytes.to_vec()).map_err(BoxError::from)
			});

			Ok(PipelineResponse::new(status, headers, body))
		})
	}

	fn close_idle_connections(&self) {
		match Self::build_client(&self.config) {
			Ok(client) => *self.client.write() = client,
			Err(_err) => {
				#[cfg(feature = "tracing")]
				tracing::warn!(error = %_err, "Failed to rebuild HTTP client; keeping the pool.");
			},
		}
	}
}

/// Inserts string headers into a header map, skipping names or values that are not valid HTTP.
pub(crate) fn merge_headers(
	headers: &mut HeaderMap,
	extra: &BTreeMap<String, String>,
) -> Result<(), ConfigError> {
	for (name, value) in extra {
		let name = HeaderName::from_bytes(name.as_bytes())
			.map_err(|err| ConfigError::HttpRequest(err.into()))?;
		let value =
			HeaderValue::from_str(value).map_err(|err| ConfigError::HttpRequest(err.into()))?;

		headers.insert(name, value);
	}

	Ok(())
}
