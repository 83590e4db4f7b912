//! Transport-level error types shared across the pipeline, pagination, token, and TLS layers.

// self
use crate::_prelude::*;

/// Transport-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical transport error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Transport failure (DNS, TCP, TLS, body read).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Backend returned a non-2xx response that was decoded into a structured error.
	#[error(transparent)]
	Server(#[from] ServerError),
	/// Access-token lifecycle failure.
	#[error(transparent)]
	Token(#[from] TokenError),

	/// A retry stage gave up after exhausting its attempt budget.
	#[error("Call was unsuccessful after all retries ({stage}, {attempts} attempts).")]
	RetriesExhausted {
		/// Label of the stage that gave up.
		stage: &'static str,
		/// Number of attempts made before giving up.
		attempts: u32,
	},
	/// Backend reported a hard quota violation; the call must not be retried.
	#[error("Backend quota exceeded ({code}); the call will not be retried.")]
	OverRate {
		/// Backend error code that signalled the quota violation.
		code: String,
	},
	/// Resource was not found and the caller requested strict 404 semantics.
	#[error("Resource `{path}` was not found.")]
	NotFound {
		/// Request path that produced the 404.
		path: String,
	},
	/// Response body could not be decoded into the expected shape.
	#[error("Response to `{operation}` could not be decoded (HTTP {status}).")]
	MalformedResponse {
		/// Logical operation (resource + verb) whose response failed to decode.
		operation: String,
		/// HTTP status code of the offending response.
		status: u16,
		/// Structured decoding failure including the JSON path.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
	/// Request body could not be encoded as JSON.
	#[error("Request body for `{operation}` could not be encoded.")]
	Encode {
		/// Logical operation whose body failed to encode.
		operation: String,
		/// Underlying serializer failure.
		#[source]
		source: serde_json::Error,
	},
	/// Authorizer failed to supply credentials; no network call was attempted.
	#[error("Authorizer failed to supply credentials.")]
	Authorization {
		/// Underlying authorizer failure.
		#[source]
		source: BoxError,
	},
	/// The call was cancelled before it could complete.
	#[error("Call was cancelled.")]
	Cancelled,
}
impl Error {
	/// Wraps an authorizer failure.
	pub fn authorization(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Authorization { source: Box::new(src) }
	}

	/// Returns `true` when a later, independent attempt could plausibly succeed.
	pub fn is_retryable(&self) -> bool {
		match self {
			Self::Transport(_) | Self::RetriesExhausted { .. } => true,
			Self::Server(err) => err.status() >= 500,
			Self::Token(TokenError::Endpoint { status, .. }) =>
				status.is_none_or(|status| status >= 500 || status == 429),
			_ => false,
		}
	}

	/// Returns `true` if the error represents caller-initiated cancellation.
	pub fn is_cancelled(&self) -> bool {
		matches!(self, Self::Cancelled)
	}
}

/// Configuration and validation failures raised while building transports.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// Base or token URL cannot be parsed.
	#[error("URL is invalid.")]
	InvalidUrl {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Base URL uses a scheme other than http or https.
	#[error("The base URL must use http or https: {url}.")]
	UnsupportedScheme {
		/// URL that failed validation.
		url: String,
	},
	/// Admission ceiling must allow at least one call per second.
	#[error("The QPS ceiling must be greater than zero.")]
	ZeroQps,
	/// A certificate pin sets no fields and would match everything.
	#[error("Certificate pin #{index} does not constrain any field.")]
	EmptyPin {
		/// Position of the pin inside the pin set.
		index: usize,
	},
	/// A certificate pin carries a malformed hex value.
	#[error("Certificate pin #{index} has a malformed {field}: {value}.")]
	MalformedPin {
		/// Position of the pin inside the pin set.
		index: usize,
		/// Field that failed validation.
		field: &'static str,
		/// Offending value.
		value: String,
	},
	/// No leaf executor was supplied and the default one is not compiled in.
	#[error("No HTTP executor is configured; enable the `reqwest` feature or supply one.")]
	MissingExecutor,
	/// Token endpoint credentials are incomplete.
	#[error("Token exchange is missing the {field}.")]
	MissingCredential {
		/// Credential field that was not provided.
		field: &'static str,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures (network, IO, body).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the backend.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Response body could not be read from the connection.
	#[error("Response body could not be read: {message}.")]
	Body {
		/// Description of the original read failure.
		message: String,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the backend.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}

/// Structured error decoded from a non-2xx backend response.
#[derive(Clone, Debug, ThisError)]
pub enum ServerError {
	/// Single-message error shape (`{errorCode, errorMessage}`).
	#[error("Backend returned HTTP {status} ({code}): {message}.")]
	Generic {
		/// HTTP status code.
		status: u16,
		/// Backend error code.
		code: String,
		/// Backend error message.
		message: String,
	},
	/// Multi-property validation error shape (`{errors: [{property, message}]}`).
	#[error("Backend rejected the request with HTTP {status}: {}.", PropertyErrors(errors))]
	Validation {
		/// HTTP status code.
		status: u16,
		/// Per-property validation failures.
		errors: Vec<PropertyError>,
	},
	/// Response matched no known error shape; everything is kept verbatim for diagnostics.
	#[error("Backend returned HTTP {status} with an undetermined error payload.")]
	Undetermined {
		/// HTTP status code.
		status: u16,
		/// Response headers as received.
		headers: Vec<(String, String)>,
		/// Raw response body.
		body: Vec<u8>,
	},
}
impl ServerError {
	/// Returns the HTTP status code carried by every variant.
	pub fn status(&self) -> u16 {
		match self {
			Self::Generic { status, .. }
			| Self::Validation { status, .. }
			| Self::Undetermined { status, .. } => *status,
		}
	}
}

/// One failing property reported by a validation error payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyError {
	/// Property (field) name reported by the backend.
	pub property: String,
	/// Validation message for the property.
	pub message: String,
}

struct PropertyErrors<'a>(&'a [PropertyError]);
impl Display for PropertyErrors<'_> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		for (idx, err) in self.0.iter().enumerate() {
			if idx > 0 {
				f.write_str("; ")?;
			}

			write!(f, "{}: {}", err.property, err.message)?;
		}

		Ok(())
	}
}

/// Token lifecycle failures.
#[derive(Debug, ThisError)]
pub enum TokenError {
	/// No token has been obtained yet.
	#[error("No access token has been obtained yet.")]
	Missing,
	/// The cached token is past its safety margin and was not refreshed.
	#[error("Access token expired; re-authentication is required.")]
	Expired,
	/// The cached record has no refresh token to exchange.
	#[error("Cached token record is missing a refresh token.")]
	MissingRefreshToken,
	/// Token endpoint rejected the grant (bad credentials or refresh token).
	#[error("Token endpoint rejected the grant: {reason}.")]
	InvalidGrant {
		/// Provider-supplied reason string.
		reason: String,
	},
	/// Client authentication (API key/secret) failed.
	#[error("Client authentication failed: {reason}.")]
	InvalidClient {
		/// Provider-supplied reason string.
		reason: String,
	},
	/// Token endpoint returned an unexpected response.
	#[error("Token endpoint returned an unexpected response: {message}.")]
	Endpoint {
		/// Summary of the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Token endpoint responded with JSON that could not be parsed.
	#[error("Token endpoint returned malformed JSON.")]
	ResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
	/// Token endpoint omitted or mangled `expires_in`.
	#[error("Token endpoint response has no usable expires_in.")]
	InvalidExpiresIn,
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn validation_errors_render_every_property() {
		let err = ServerError::Validation {
			status: 400,
			errors: vec![
				PropertyError { property: "name".into(), message: "is required".into() },
				PropertyError { property: "qps".into(), message: "must be positive".into() },
			],
		};

		assert_eq!(
			err.to_string(),
			"Backend rejected the request with HTTP 400: name: is required; qps: must be positive."
		);
	}

	#[test]
	fn retry_classification_separates_fatal_from_transient() {
		assert!(Error::RetriesExhausted { stage: "backoff_on_over_qps", attempts: 10 }.is_retryable());
		assert!(!Error::OverRate { code: "ERR_403_DEVELOPER_OVER_RATE".into() }.is_retryable());
		assert!(!Error::Cancelled.is_retryable());
		assert!(Error::Cancelled.is_cancelled());
		assert!(
			Error::from(ServerError::Undetermined { status: 502, headers: vec![], body: vec![] })
				.is_retryable()
		);
		assert!(
			!Error::from(ServerError::Generic {
				status: 409,
				code: "409".into(),
				message: "conflict".into(),
			})
			.is_retryable()
		);
	}
}
