//! Pagination-aware "fetch everything" over list endpoints.
//!
//! The first page is fetched inline. Its length fixes the page size, and the `X-Total-Count`
//! header tells how many records exist. Remaining pages are fetched concurrently, each through
//! the full pipeline, and merged in completion order.

// crates.io
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
// self
use crate::{
	_prelude::*,
	oauth::http::StatusCode,
	pipeline::{CallContext, CallOptions, PipelineRequest},
	transport::{Transport, decode_json},
};

/// Header carrying the total number of records behind a paginated list.
pub const TOTAL_COUNT_HEADER: &str = "X-Total-Count";

/// How follow-up pages are addressed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PaginationMode {
	/// The offset parameter counts records: page `i` starts at `i * page_size`.
	#[default]
	PerItem,
	/// The offset parameter counts pages: page `i` is requested as `i`.
	PerPage,
}
impl PaginationMode {
	/// Offset value for the zero-based `page_index`.
	pub fn offset(self, page_index: usize, page_size: usize) -> usize {
		match self {
			PaginationMode::PerItem => page_index * page_size,
			PaginationMode::PerPage => page_index,
		}
	}
}

/// Shape of a paginated list query.
#[derive(Clone, Debug)]
pub struct FetchAllRequest {
	/// List endpoint path.
	pub path: String,
	/// Query parameters sent with every page (filters, field selection, page size).
	pub query: Vec<(String, String)>,
	/// Addressing mode for follow-up pages.
	pub mode: PaginationMode,
	/// Name of the offset query parameter.
	pub offset_param: String,
	/// Per-call options applied to every page.
	pub options: CallOptions,
}
impl FetchAllRequest {
	/// Creates a per-item query against `path` using the `offset` parameter.
	pub fn new(path: impl Into<String>) -> Self {
		Self {
			path: path.into(),
			query: Vec::new(),
			mode: PaginationMode::default(),
			offset_param: "offset".into(),
			options: CallOptions::default(),
		}
	}

	/// Appends a query parameter sent with every page.
	pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.query.push((name.into(), value.into()));

		self
	}

	/// Sets the addressing mode.
	pub fn with_mode(mut self, mode: PaginationMode) -> Self {
		self.mode = mode;

		self
	}

	/// Renames the offset query parameter.
	pub fn with_offset_param(mut self, name: impl Into<String>) -> Self {
		self.offset_param = name.into();

		self
	}

	/// Sets the per-call options.
	pub fn with_options(mut self, options: CallOptions) -> Self {
		self.options = options;

		self
	}

	fn page(&self, offset: usize) -> PipelineRequest {
		let mut request = PipelineRequest::get(self.path.clone());

		request.query = self.query.clone();
		request.set_query(&self.offset_param, offset.to_string());

		request
	}
}

/// Merged result of a fan-out fetch.
///
/// `error` holds the first failure observed; `items` still carries every page that succeeded.
#[derive(Debug)]
pub struct FetchAllOutcome<T> {
	/// Records from every page that was fetched successfully, in no particular order.
	pub items: Vec<T>,
	/// `false` when the list itself is absent (404 or empty first page).
	pub exists: bool,
	/// First failure observed, if any.
	pub error: Option<Error>,
}
impl<T> FetchAllOutcome<T> {
	fn absent() -> Self {
		Self { items: Vec::new(), exists: false, error: None }
	}

	fn failed(error: Error) -> Self {
		Self { items: Vec::new(), exists: false, error: Some(error) }
	}

	/// Returns `true` when every page was fetched.
	pub fn is_complete(&self) -> bool {
		self.error.is_none()
	}

	/// Discards partial data on failure and returns `(items, exists)` otherwise.
	pub fn into_result(self) -> Result<(Vec<T>, bool)> {
		match self.error {
			Some(err) => Err(err),
			None => Ok((self.items, self.exists)),
		}
	}
}

impl Transport {
	/// Fetches every page of a list endpoint.
	///
	/// Follow-up pages run as independent tasks that share this transport, so every page is
	/// admitted, authorized, and retried on its own. The number of follow-ups is
	/// `ceil(total / page_size) - 1`; a short last page is fetched rather than dropped.
	pub async fn fetch_all<T>(
		self: &Arc<Self>,
		ctx: &CallContext,
		request: FetchAllRequest,
	) -> FetchAllOutcome<T>
	where
		T: 'static + Send + DeserializeOwned,
	{
		let ctx = ctx.clone().with_options(request.options);
		let first = request.page(0);
		let operation = first.operation();
		let response = match self.call(&ctx, first).await {
			Ok(response) => response,
			Err(Error::NotFound { .. }) => return FetchAllOutcome::absent(),
			Err(err) => return FetchAllOutcome::failed(err),
		};

		if response.status() == StatusCode::NOT_FOUND {
			return FetchAllOutcome::absent();
		}

		let body = match response.body().await {
			Ok(body) => body,
			Err(err) => return FetchAllOutcome::failed(err.into()),
		};

		if body.iter().all(u8::is_ascii_whitespace) {
			return FetchAllOutcome::absent();
		}

		let mut items = match decode_json::<Vec<T>>(&operation, response.status(), &body) {
			Ok(items) => items,
			Err(err) => return FetchAllOutcome::failed(err),
		};
		let page_size = items.len();
		let total = total_count(response.header(TOTAL_COUNT_HEADER));
		let follow_ups = follow_up_pages(total, page_size);

		if follow_ups == 0 {
			return FetchAllOutcome { items, exists: true, error: None };
		}

		let (tx, mut rx) = mpsc::channel(follow_ups);

		for page_index in 1..=follow_ups {
			let transport = Arc::clone(self);
			let ctx = ctx.clone();
			let page = request.page(request.mode.offset(page_index, page_size));
			let tx = tx.clone();

			tokio::spawn(async move {
				let operation = page.operation();
				let path = page.path.clone();
				let result = match transport.call(&ctx, page).await {
					// Only the first page may signal absence.
					Ok(response) if response.status() == StatusCode::NOT_FOUND =>
						Err(Error::NotFound { path }),
					Ok(response) => match response.body().await {
						Ok(body) => decode_json::<Vec<T>>(&operation, response.status(), &body),
						Err(err) => Err(err.into()),
					},
					Err(err) => Err(err),
				};
				let _ = tx.send(result).await;
			});
		}

		drop(tx);

		let mut error = None;

		for _ in 0..follow_ups {
			match rx.recv().await {
				Some(Ok(page)) => items.extend(page),
				Some(Err(err)) => {
					error.get_or_insert(err);
				},
				None => {
					error.get_or_insert(Error::Cancelled);

					break;
				},
			}
		}

		FetchAllOutcome { items, exists: true, error }
	}
}

fn total_count(header: Option<&str>) -> Option<usize> {
	header.and_then(|raw| raw.trim().parse().ok())
}

fn follow_up_pages(total: Option<usize>, page_size: usize) -> usize {
	match total {
		Some(total) if page_size > 0 && total > page_size => total.div_ceil(page_size) - 1,
		_ => 0,
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::collections::BTreeSet;
	// self
	use super::*;
	use crate::_preludet::{ScriptedExecutor, ScriptedReply, scripted_transport};

	fn page(ids: std::ops::Range<u32>, total: u32) -> ScriptedReply {
		let body = serde_json::to_vec(&ids.collect::<Vec<_>>()).expect("Page fixture should encode.");

		ScriptedReply::json(body).with_header(TOTAL_COUNT_HEADER, total.to_string())
	}

	fn offsets(executor: &ScriptedExecutor, param: &str) -> BTreeSet<String> {
		executor.requests().iter().skip(1).filter_map(|request| request.query_param(param)).collect()
	}

	#[test]
	fn follow_ups_use_ceiling_division() {
		assert_eq!(follow_up_pages(None, 10), 0);
		assert_eq!(follow_up_pages(Some(10), 10), 0);
		assert_eq!(follow_up_pages(Some(30), 10), 2);
		assert_eq!(follow_up_pages(Some(31), 10), 3);
		assert_eq!(follow_up_pages(Some(5), 0), 0);
		assert_eq!(total_count(Some(" 42 ")), Some(42));
		assert_eq!(total_count(Some("many")), None);
	}

	#[tokio::test]
	async fn single_page_issues_no_follow_ups() {
		let executor = Arc::new(ScriptedExecutor::new([page(0..3, 3)]));
		let transport = scripted_transport(executor.clone());
		let outcome = transport
			.fetch_all::<u32>(&CallContext::new(), FetchAllRequest::new("services"))
			.await;

		assert!(outcome.is_complete());
		assert!(outcome.exists);
		assert_eq!(outcome.items, vec![0, 1, 2]);
		assert_eq!(executor.calls(), 1);
	}

	#[tokio::test]
	async fn three_pages_fan_out_into_two_follow_ups() {
		let executor = Arc::new(ScriptedExecutor::new([page(0..3, 9), page(3..6, 9), page(6..9, 9)]));
		let transport = scripted_transport(executor.clone());
		let outcome = transport
			.fetch_all::<u32>(&CallContext::new(), FetchAllRequest::new("services"))
			.await;
		let (items, exists) = outcome.into_result().expect("All pages should succeed.");
		let merged = items.into_iter().collect::<BTreeSet<_>>();

		assert!(exists);
		assert_eq!(merged, (0..9).collect::<BTreeSet<_>>());
		assert_eq!(executor.calls(), 3);
		assert_eq!(executor.requests()[0].query_param("offset").as_deref(), Some("0"));
		assert_eq!(offsets(&executor, "offset"), BTreeSet::from(["3".to_owned(), "6".to_owned()]));
	}

	#[tokio::test]
	async fn per_page_mode_sends_page_indices() {
		let executor = Arc::new(ScriptedExecutor::new([page(0..2, 6), page(2..4, 6), page(4..6, 6)]));
		let transport = scripted_transport(executor.clone());
		let request = FetchAllRequest::new("services")
			.with_mode(PaginationMode::PerPage)
			.with_offset_param("page")
			.with_query("limit", "2");
		let outcome = transport.fetch_all::<u32>(&CallContext::new(), request).await;

		assert_eq!(outcome.items.len(), 6);
		assert_eq!(offsets(&executor, "page"), BTreeSet::from(["1".to_owned(), "2".to_owned()]));
		assert!(executor.requests().iter().all(|r| r.query_param("limit").as_deref() == Some("2")));
	}

	#[tokio::test]
	async fn short_last_page_is_fetched() {
		let executor = Arc::new(ScriptedExecutor::new([page(0..3, 7), page(3..6, 7), page(6..7, 7)]));
		let transport = scripted_transport(executor.clone());
		let outcome = transport
			.fetch_all::<u32>(&CallContext::new(), FetchAllRequest::new("services"))
			.await;

		assert!(outcome.is_complete());
		assert_eq!(outcome.items.len(), 7);
		assert_eq!(executor.calls(), 3);
	}

	#[tokio::test]
	async fn failed_page_keeps_partial_data() {
		let executor = Arc::new(ScriptedExecutor::new([
			page(0..2, 6),
			page(2..4, 6),
			ScriptedReply::new(500, r#"{"errorCode":500,"errorMessage":"boom"}"#),
		]));
		let transport = scripted_transport(executor.clone());
		let outcome = transport
			.fetch_all::<u32>(&CallContext::new(), FetchAllRequest::new("services"))
			.await;

		assert!(outcome.exists);
		assert_eq!(outcome.items.len(), 4);
		assert!(matches!(outcome.error, Some(Error::Server(_))));
	}

	#[tokio::test]
	async fn missing_follow_up_page_is_a_failure() {
		let executor = Arc::new(ScriptedExecutor::new([page(1..3, 4), ScriptedReply::new(404, "")]));
		let transport = scripted_transport(executor.clone());
		let outcome = transport
			.fetch_all::<u32>(&CallContext::new(), FetchAllRequest::new("services"))
			.await;

		assert!(outcome.exists);
		assert!(!outcome.is_complete());
		assert_eq!(outcome.items, vec![1, 2]);
		assert!(matches!(outcome.error, Some(Error::NotFound { ref path }) if path == "services"));
		assert_eq!(executor.calls(), 2);
	}

	#[tokio::test]
	async fn absent_lists_are_not_errors() {
		let executor =
			Arc::new(ScriptedExecutor::new([ScriptedReply::new(404, ""), ScriptedReply::json("")]));
		let transport = scripted_transport(executor.clone());
		let missing = transport
			.fetch_all::<u32>(&CallContext::new(), FetchAllRequest::new("services/x/endpoints"))
			.await;
		let empty = transport
			.fetch_all::<u32>(&CallContext::new(), FetchAllRequest::new("services/y/endpoints"))
			.await;

		for outcome in [missing, empty] {
			assert!(!outcome.exists);
			assert!(outcome.items.is_empty());
			assert!(outcome.error.is_none());
		}
	}

	#[tokio::test]
	async fn strict_404_on_the_first_page_still_reports_absence() {
		let executor = Arc::new(ScriptedExecutor::new([ScriptedReply::new(404, "")]));
		let transport = scripted_transport(executor);
		let request =
			FetchAllRequest::new("services/x/endpoints").with_options(CallOptions::default().error_on_404());
		let outcome = transport.fetch_all::<u32>(&CallContext::new(), request).await;

		assert!(!outcome.exists);
		assert!(outcome.error.is_none());
	}
}
