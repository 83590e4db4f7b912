//! Composable middleware pipeline wrapping the leaf HTTP executor.
//!
//! A [`Stage`] receives the call context, the owning [`Transport`], the request, and a [`Next`]
//! handle for the rest of the chain. Stages may retry (by running `next` again with a clone of
//! the request), delay, or abort. [`build_pipeline`] folds stages right-to-left around the leaf,
//! so the first stage in the list is outermost and observes the final outcome of everything
//! inside it.
//!
//! Per-call policy lives in a typed [`CallOptions`] value carried by [`CallContext`] together
//! with the call's cancellation token.

mod authorize;
mod backoff;
mod policy;
mod server_error;
mod throttle;

pub use authorize::Authorize;
pub use backoff::{BackoffOnOverQps, BreakOnOverRate};
pub use policy::{ErrorOn404, RetryOn400};
pub use server_error::{UnmarshalServerError, decode_server_error};
pub use throttle::Throttle;

// std
use std::time::Duration as StdDuration;
// crates.io
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
// self
use crate::{
	_prelude::*,
	error::ConfigError,
	http::{HttpExecutor, PipelineResponse},
	oauth::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header::CONTENT_TYPE},
	obs::{self, CallOutcome, CallSpan},
	transport::Transport,
};

/// Header carrying the backend's machine-readable error code.
pub const ERROR_CODE_HEADER: &str = "X-Mashery-Error-Code";
/// Error code for a transient per-second QPS violation (retryable).
pub const OVER_QPS_CODE: &str = "ERR_403_DEVELOPER_OVER_QPS";
/// Error code for a hard daily/monthly quota violation (fatal).
pub const OVER_RATE_CODE: &str = "ERR_403_DEVELOPER_OVER_RATE";

/// Boxed future returned by pipeline stages.
pub type PipelineFuture<'a> = Pin<Box<dyn Future<Output = Result<PipelineResponse>> + 'a + Send>>;

/// Per-call policy switches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallOptions {
	/// Surface HTTP 404 as [`Error::NotFound`] instead of passing the response through.
	pub error_on_404: bool,
	/// Retry HTTP 400 responses a bounded number of times.
	pub retry_on_400: bool,
}
impl CallOptions {
	/// Enables strict 404 semantics.
	pub fn error_on_404(mut self) -> Self {
		self.error_on_404 = true;

		self
	}

	/// Enables bounded retries of HTTP 400 responses.
	pub fn retry_on_400(mut self) -> Self {
		self.retry_on_400 = true;

		self
	}
}

/// Cancellation token plus per-call options; cheap to clone into spawned page fetches.
#[derive(Clone, Debug, Default)]
pub struct CallContext {
	cancellation: CancellationToken,
	options: CallOptions,
}
impl CallContext {
	/// Creates a context with a fresh cancellation token and default options.
	pub fn new() -> Self {
		Self::default()
	}

	/// Ties the call to an externally owned cancellation token.
	pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
		self.cancellation = token;

		self
	}

	/// Overrides the per-call options.
	pub fn with_options(mut self, options: CallOptions) -> Self {
		self.options = options;

		self
	}

	/// Per-call options.
	pub fn options(&self) -> CallOptions {
		self.options
	}

	/// Cancellation token observed by the pipeline.
	pub fn cancellation(&self) -> &CancellationToken {
		&self.cancellation
	}

	/// Cancels the call (and every clone of this context).
	pub fn cancel(&self) {
		self.cancellation.cancel();
	}

	/// Returns `true` once the call was cancelled.
	pub fn is_cancelled(&self) -> bool {
		self.cancellation.is_cancelled()
	}

	/// Resolves once the call is cancelled.
	pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
		self.cancellation.cancelled()
	}
}

/// Outbound call descriptor, owned exclusively by the call that created it.
#[derive(Clone, Debug)]
pub struct PipelineRequest {
	/// HTTP method.
	pub method: Method,
	/// Path relative to the transport's base URL.
	pub path: String,
	/// Query parameters in insertion order.
	pub query: Vec<(String, String)>,
	/// Request headers.
	pub headers: HeaderMap,
	/// Optional request body.
	pub body: Option<Vec<u8>>,
}
impl PipelineRequest {
	/// Creates a request for `method` + `path` without body.
	pub fn new(method: Method, path: impl Into<String>) -> Self {
		Self {
			method,
			path: path.into(),
			query: Vec::new(),
			headers: HeaderMap::new(),
			body: None,
		}
	}

	/// Shorthand for a `GET`.
	pub fn get(path: impl Into<String>) -> Self {
		Self::new(Method::GET, path)
	}

	/// Shorthand for a `DELETE`.
	pub fn delete(path: impl Into<String>) -> Self {
		Self::new(Method::DELETE, path)
	}

	/// Appends a query parameter.
	pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.query.push((name.into(), value.into()));

		self
	}

	/// Sets (replacing) a query parameter.
	pub fn set_query(&mut self, name: &str, value: impl Into<String>) {
		self.query.retain(|(key, _)| key != name);
		self.query.push((name.to_owned(), value.into()));
	}

	/// Inserts a header; invalid names or values are rejected.
	pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
		let name = HeaderName::from_bytes(name.as_bytes())
			.map_err(|err| ConfigError::HttpRequest(err.into()))?;
		let value = HeaderValue::from_str(value).map_err(|err| ConfigError::HttpRequest(err.into()))?;

		self.headers.insert(name, value);

		Ok(self)
	}

	/// Serializes `body` as JSON and sets the content type.
	pub fn with_json<T>(mut self, body: &T) -> Result<Self>
	where
		T: ?Sized + Serialize,
	{
		let bytes = serde_json::to_vec(body)
			.map_err(|source| Error::Encode { operation: self.operation(), source })?;

		self.headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
		self.body = Some(bytes);

		Ok(self)
	}

	/// Human-readable operation label used in spans and errors.
	pub fn operation(&self) -> String {
		format!("{} {}", self.method, self.path)
	}
}

/// One composable unit of retry/backoff/auth logic wrapping the next stage.
pub trait Stage
where
	Self: Send + Sync,
{
	/// Stable label used in logs, metrics, and errors.
	fn name(&self) -> &'static str;

	/// Processes `request`, delegating to `next` zero or more times.
	fn handle<'a>(
		&'a self,
		ctx: &'a CallContext,
		transport: &'a Transport,
		request: PipelineRequest,
		next: Next<'a>,
	) -> PipelineFuture<'a>;
}

/// Handle to the remainder of the chain; copyable so stages can run it repeatedly.
#[derive(Clone, Copy)]
pub struct Next<'a> {
	stages: &'a [Arc<dyn Stage>],
	leaf: &'a dyn HttpExecutor,
}
impl<'a> Next<'a> {
	/// Runs the remaining stages and finally the leaf executor.
	pub fn run(
		self,
		ctx: &'a CallContext,
		transport: &'a Transport,
		request: PipelineRequest,
	) -> PipelineFuture<'a> {
		match self.stages.split_first() {
			Some((stage, rest)) =>
				stage.handle(ctx, transport, request, Next { stages: rest, leaf: self.leaf }),
			None => {
				let leaf = self.leaf;

				Box::pin(async move {
					let prepared = transport.prepare(request)?;

					Ok(leaf.execute(prepared).await?)
				})
			},
		}
	}
}
impl Debug for Next<'_> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let names = self.stages.iter().map(|stage| stage.name()).collect::<Vec<_>>();

		f.debug_struct("Next").field("stages", &names).finish_non_exhaustive()
	}
}

/// Stages folded around a leaf executor.
#[derive(Clone)]
pub struct Pipeline {
	stages: Vec<Arc<dyn Stage>>,
	leaf: Arc<dyn HttpExecutor>,
}
impl Pipeline {
	/// Stage labels from outermost to innermost.
	pub fn stage_names(&self) -> Vec<&'static str> {
		self.stages.iter().map(|stage| stage.name()).collect()
	}

	/// Leaf executor at the bottom of the chain.
	pub fn leaf(&self) -> &Arc<dyn HttpExecutor> {
		&self.leaf
	}

	/// Runs `request` through every stage.
	///
	/// A context that is already cancelled fails fast without touching any stage.
	pub async fn call(
		&self,
		ctx: &CallContext,
		transport: &Transport,
		request: PipelineRequest,
	) -> Result<PipelineResponse> {
		let method = request.method.clone();
		let span = CallSpan::new(&request.operation(), "pipeline");

		obs::record_call_outcome(method.as_str(), CallOutcome::Attempt);

		let result = span
			.instrument(async {
				if ctx.is_cancelled() {
					return Err(Error::Cancelled);
				}

				let next = Next { stages: &self.stages, leaf: self.leaf.as_ref() };

				next.run(ctx, transport, request).await
			})
			.await;

		match &result {
			Ok(_) => obs::record_call_outcome(method.as_str(), CallOutcome::Success),
			Err(_) => obs::record_call_outcome(method.as_str(), CallOutcome::Failure),
		}

		result
	}
}
impl Debug for Pipeline {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Pipeline").field("stages", &self.stage_names()).finish_non_exhaustive()
	}
}

/// Folds `stages` around `leaf`; the first stage is outermost.
pub fn build_pipeline(
	leaf: Arc<dyn HttpExecutor>,
	stages: impl IntoIterator<Item = Arc<dyn Stage>>,
) -> Pipeline {
	Pipeline { stages: stages.into_iter().collect(), leaf }
}

/// Default stage stack, outermost first.
///
/// Throttle and authorize sit closest to the leaf so every attempt, retries included, is
/// admitted by the controller and carries freshly read credentials.
pub fn default_stages(backoff_unit: StdDuration) -> Vec<Arc<dyn Stage>> {
	vec![
		Arc::new(UnmarshalServerError),
		Arc::new(ErrorOn404),
		Arc::new(RetryOn400::new(backoff_unit)),
		Arc::new(BreakOnOverRate),
		Arc::new(BackoffOnOverQps::new(backoff_unit)),
		Arc::new(Authorize),
		Arc::new(Throttle),
	]
}

/// Sleeps for `delay` unless the call is cancelled first.
pub(crate) async fn sleep_or_cancel(ctx: &CallContext, delay: StdDuration) -> Result<()> {
	if delay.is_zero() {
		return if ctx.is_cancelled() { Err(Error::Cancelled) } else { Ok(()) };
	}

	tokio::select! {
		_ = tokio::time::sleep(delay) => Ok(()),
		_ = ctx.cancelled() => Err(Error::Cancelled),
	}
}

/// Returns the backend error code when `response` is a 403 carrying one.
pub(crate) fn forbidden_code(response: &PipelineResponse) -> Option<&str> {
	if response.status() != StatusCode::FORBIDDEN {
		return None;
	}

	response.header(ERROR_CODE_HEADER).map(str::trim)
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicUsize, Ordering};
	// self
	use super::*;
	use crate::_preludet::{ScriptedExecutor, ScriptedReply, scripted_transport};

	#[derive(Debug)]
	struct Tag {
		label: &'static str,
		trace: Arc<Mutex<Vec<String>>>,
	}
	impl Stage for Tag {
		fn name(&self) -> &'static str {
			self.label
		}

		fn handle<'a>(
			&'a self,
			ctx: &'a CallContext,
			transport: &'a Transport,
			request: PipelineRequest,
			next: Next<'a>,
		) -> PipelineFuture<'a> {
			Box::pin(async move {
				self.trace.lock().push(format!("enter {}", self.label));

				let result = next.run(ctx, transport, request).await;

				self.trace.lock().push(format!("exit {}", self.label));

				result
			})
		}
	}

	#[derive(Debug, Default)]
	struct Twice(AtomicUsize);
	impl Stage for Twice {
		fn name(&self) -> &'static str {
			"twice"
		}

		fn handle<'a>(
			&'a self,
			ctx: &'a CallContext,
			transport: &'a Transport,
			request: PipelineRequest,
			next: Next<'a>,
		) -> PipelineFuture<'a> {
			Box::pin(async move {
				self.0.fetch_add(1, Ordering::SeqCst);

				let _ = next.run(ctx, transport, request.clone()).await?;

				next.run(ctx, transport, request).await
			})
		}
	}

	#[tokio::test]
	async fn first_stage_is_outermost() {
		let executor = Arc::new(ScriptedExecutor::new([ScriptedReply::json("{}")]));
		let transport = scripted_transport(executor.clone());
		let trace = Arc::new(Mutex::new(Vec::new()));
		let pipeline = build_pipeline(
			executor,
			[
				Arc::new(Tag { label: "outer", trace: trace.clone() }) as Arc<dyn Stage>,
				Arc::new(Tag { label: "inner", trace: trace.clone() }),
			],
		);

		assert_eq!(pipeline.stage_names(), vec!["outer", "inner"]);

		pipeline
			.call(&CallContext::new(), &transport, PipelineRequest::get("services"))
			.await
			.expect("Scripted call should succeed.");

		assert_eq!(*trace.lock(), vec!["enter outer", "enter inner", "exit inner", "exit outer"]);
	}

	#[tokio::test]
	async fn next_can_be_run_repeatedly() {
		let executor = Arc::new(
			ScriptedExecutor::new([]).with_fallback(ScriptedReply::json("{}")),
		);
		let transport = scripted_transport(executor.clone());
		let twice = Arc::new(Twice::default());
		let pipeline = build_pipeline(executor.clone(), [twice.clone() as Arc<dyn Stage>]);

		pipeline
			.call(&CallContext::new(), &transport, PipelineRequest::get("services"))
			.await
			.expect("Repeated leaf calls should succeed.");

		assert_eq!(twice.0.load(Ordering::SeqCst), 1);
		assert_eq!(executor.calls(), 2);
	}

	#[tokio::test]
	async fn cancelled_context_fails_fast() {
		let executor = Arc::new(ScriptedExecutor::new([ScriptedReply::json("{}")]));
		let transport = scripted_transport(executor.clone());
		let ctx = CallContext::new();

		ctx.cancel();

		let err = transport
			.call(&ctx, PipelineRequest::get("services"))
			.await
			.expect_err("Cancelled calls should not proceed.");

		assert!(err.is_cancelled());
		assert_eq!(executor.calls(), 0);
	}

	#[test]
	fn request_query_replacement_keeps_other_params() {
		let mut request = PipelineRequest::get("services").with_query("limit", "100");

		request.set_query("offset", "0");
		request.set_query("offset", "100");

		assert_eq!(
			request.query,
			vec![("limit".to_owned(), "100".to_owned()), ("offset".to_owned(), "100".to_owned())]
		);
		assert_eq!(request.operation(), "GET services");
	}

	#[test]
	fn default_stack_keeps_throttle_closest_to_the_leaf() {
		let names = default_stages(StdDuration::from_secs(1))
			.iter()
			.map(|stage| stage.name())
			.collect::<Vec<_>>();

		assert_eq!(
			names,
			vec![
				"unmarshal_server_error",
				"error_on_404",
				"retry_on_400",
				"break_on_over_rate",
				"backoff_on_over_qps",
				"authorize",
				"throttle",
			]
		);
	}
}
