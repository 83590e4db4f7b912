//! The transport every resource call funnels through.
//!
//! A [`Transport`] owns one admission controller, one authorizer, and one pipeline folded around
//! a leaf executor. It is shared behind an [`Arc`] by all concurrent callers; page fan-out in
//! [`Transport::fetch_all`] clones that handle into spawned tasks.

pub mod builder;
pub mod fetch_all;

pub use builder::TransportBuilder;
pub use fetch_all::{FetchAllOutcome, FetchAllRequest, PaginationMode};

// crates.io
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	admission::AdmissionController,
	auth::Authorizer,
	error::ConfigError,
	http::{HttpExecutor, PipelineResponse, PreparedRequest},
	oauth::http::{Method, StatusCode},
	pipeline::{CallContext, Pipeline, PipelineRequest},
};

/// Shared, rate-limited, retrying client for one backend.
pub struct Transport {
	base_url: Url,
	admission: AdmissionController,
	authorizer: Arc<dyn Authorizer>,
	pipeline: Pipeline,
}
impl Transport {
	/// Starts building a transport rooted at `base_url`.
	pub fn builder(base_url: Url) -> TransportBuilder {
		TransportBuilder::new(base_url)
	}

	/// Base URL every request path is resolved against.
	pub fn base_url(&self) -> &Url {
		&self.base_url
	}

	/// Admission controller shared by every call of this transport.
	pub fn admission(&self) -> &AdmissionController {
		&self.admission
	}

	/// Authorizer consulted before every transmission.
	pub fn authorizer(&self) -> &Arc<dyn Authorizer> {
		&self.authorizer
	}

	/// Pipeline wrapping the leaf executor.
	pub fn pipeline(&self) -> &Pipeline {
		&self.pipeline
	}

	/// Leaf executor at the bottom of the pipeline.
	pub fn executor(&self) -> &Arc<dyn HttpExecutor> {
		self.pipeline.leaf()
	}

	/// Runs `request` through the pipeline and returns the raw response.
	///
	/// Lenient 404s come back as responses; every other non-2xx status is an error.
	pub async fn call(&self, ctx: &CallContext, request: PipelineRequest) -> Result<PipelineResponse> {
		self.pipeline.call(ctx, self, request).await
	}

	/// Calls the backend and decodes a 2xx JSON body into `T`.
	///
	/// A 404 surfaces as [`Error::NotFound`] because there is no body to decode.
	pub async fn fetch_json<T>(&self, ctx: &CallContext, request: PipelineRequest) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let operation = request.operation();
		let path = request.path.clone();
		let response = self.call(ctx, request).await?;

		if response.status() == StatusCode::NOT_FOUND {
			return Err(Error::NotFound { path });
		}

		let body = response.body().await?;

		decode_json(&operation, response.status(), &body)
	}

	/// Like [`Transport::fetch_json`] but maps an absent resource to `None`.
	pub async fn fetch_optional<T>(
		&self,
		ctx: &CallContext,
		request: PipelineRequest,
	) -> Result<Option<T>>
	where
		T: DeserializeOwned,
	{
		match self.fetch_json(ctx, request).await {
			Ok(value) => Ok(Some(value)),
			Err(Error::NotFound { .. }) => Ok(None),
			Err(err) => Err(err),
		}
	}

	/// Sends `body` as JSON with `method` and decodes the JSON reply.
	///
	/// An empty reply decodes as JSON `null`, so `()` and `Option<_>` targets accept `204`s.
	pub async fn send_json<B, T>(
		&self,
		ctx: &CallContext,
		method: Method,
		path: &str,
		body: &B,
	) -> Result<T>
	where
		B: ?Sized + Serialize,
		T: DeserializeOwned,
	{
		let request = PipelineRequest::new(method, path).with_json(body)?;

		self.fetch_json(ctx, request).await
	}

	/// Deletes the resource at `path`; an already absent resource counts as deleted.
	pub async fn delete(&self, ctx: &CallContext, path: &str) -> Result<()> {
		self.call(ctx, PipelineRequest::delete(path)).await.map(|_| ())
	}

	/// Drops pooled connections that are not currently in use.
	pub fn close_idle_connections(&self) {
		self.executor().close_idle_connections();
	}

	/// Resolves `request` against the base URL into the leaf executor's shape.
	pub fn prepare(&self, request: PipelineRequest) -> Result<PreparedRequest> {
		let mut url = self
			.base_url
			.join(request.path.trim_start_matches('/'))
			.map_err(|source| ConfigError::InvalidUrl { source })?;

		if !request.query.is_empty() {
			url.query_pairs_mut().extend_pairs(request.query.iter());
		}

		let mut prepared = PreparedRequest::new(request.method, url);

		prepared.headers = request.headers;
		prepared.body = request.body;

		Ok(prepared)
	}
}
impl Debug for Transport {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Transport")
			.field("base_url", &self.base_url.as_str())
			.field("max_qps", &self.admission.max_qps())
			.field("pipeline", &self.pipeline)
			.finish_non_exhaustive()
	}
}

/// Decodes `bytes` into `T`, keeping the failing JSON path and the operation for diagnostics.
pub(crate) fn decode_json<T>(operation: &str, status: StatusCode, bytes: &[u8]) -> Result<T>
where
	T: DeserializeOwned,
{
	let bytes = if bytes.iter().all(u8::is_ascii_whitespace) { &b"null"[..] } else { bytes };
	let mut deserializer = serde_json::Deserializer::from_slice(bytes);

	serde_path_to_error::deserialize(&mut deserializer).map_err(|source| Error::MalformedResponse {
		operation: operation.to_owned(),
		status: status.as_u16(),
		source,
	})
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::_preludet::{ScriptedExecutor, ScriptedReply, scripted_transport};

	#[derive(Debug, Deserialize, Serialize, PartialEq)]
	struct Service {
		id: String,
		name: String,
	}

	#[tokio::test]
	async fn fetch_json_decodes_the_body() {
		let executor = Arc::new(ScriptedExecutor::new([ScriptedReply::json(
			r#"{"id":"svc-1","name":"Billing"}"#,
		)]));
		let transport = scripted_transport(executor.clone());
		let service: Service = transport
			.fetch_json(&CallContext::new(), PipelineRequest::get("services/svc-1"))
			.await
			.expect("Service should decode.");

		assert_eq!(service, Service { id: "svc-1".into(), name: "Billing".into() });
		assert_eq!(
			executor.requests()[0].url.as_str(),
			"https://api.example.com/v3/rest/services/svc-1"
		);
	}

	#[tokio::test]
	async fn malformed_bodies_carry_the_operation_and_path() {
		let executor =
			Arc::new(ScriptedExecutor::new([ScriptedReply::json(r#"{"id":"svc-1","name":7}"#)]));
		let transport = scripted_transport(executor);
		let err = transport
			.fetch_json::<Service>(&CallContext::new(), PipelineRequest::get("services/svc-1"))
			.await
			.expect_err("Numeric name should not decode.");

		match err {
			Error::MalformedResponse { operation, status, source } => {
				assert_eq!(operation, "GET services/svc-1");
				assert_eq!(status, 200);
				assert_eq!(source.path().to_string(), "name");
			},
			other => panic!("Unexpected error: {other:?}."),
		}
	}

	#[tokio::test]
	async fn fetch_optional_maps_absence_to_none() {
		let executor = Arc::new(ScriptedExecutor::new([ScriptedReply::new(404, "")]));
		let transport = scripted_transport(executor);
		let service = transport
			.fetch_optional::<Service>(&CallContext::new(), PipelineRequest::get("services/x"))
			.await
			.expect("Absent resources are not errors.");

		assert!(service.is_none());
	}

	#[tokio::test]
	async fn send_json_posts_the_body_and_accepts_empty_replies() {
		let executor = Arc::new(ScriptedExecutor::new([ScriptedReply::new(204, "")]));
		let transport = scripted_transport(executor.clone());
		let service = Service { id: "svc-2".into(), name: "Search".into() };

		transport
			.send_json::<_, ()>(&CallContext::new(), Method::POST, "services", &service)
			.await
			.expect("Empty reply should decode as unit.");

		let request = &executor.requests()[0];

		assert_eq!(request.method, Method::POST);
		assert_eq!(request.header("content-type"), Some("application/json"));
		assert_eq!(
			request.body.as_deref(),
			Some(&br#"{"id":"svc-2","name":"Search"}"#[..])
		);
	}

	#[tokio::test]
	async fn delete_tolerates_missing_resources() {
		let executor = Arc::new(ScriptedExecutor::new([ScriptedReply::new(404, "")]));
		let transport = scripted_transport(executor.clone());

		transport
			.delete(&CallContext::new(), "/services/gone")
			.await
			.expect("Deleting an absent resource succeeds.");

		assert_eq!(executor.requests()[0].method, Method::DELETE);
	}

	#[test]
	fn close_idle_connections_reaches_the_executor() {
		let executor = Arc::new(ScriptedExecutor::new([]));
		let transport = scripted_transport(executor.clone());

		transport.close_idle_connections();

		assert_eq!(executor.idle_closes(), 1);
	}
}
