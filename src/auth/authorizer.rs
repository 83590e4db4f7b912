//! Authorizer contracts that supply per-request credentials to the pipeline.
//!
//! The pipeline asks the [`Authorizer`] for header and query-string material immediately before
//! every transmission, so a token swapped in by a background refresh is picked up by the very
//! next attempt.

// self
use crate::{_prelude::*, pipeline::CallContext, refresh::TokenManager};

/// Boxed future returned by [`Authorizer`] methods.
pub type AuthFuture<'a> = Pin<Box<dyn Future<Output = Result<BTreeMap<String, String>>> + 'a + Send>>;

/// Supplies authorization material for outbound calls.
pub trait Authorizer
where
	Self: Send + Sync,
{
	/// Headers merged into the outbound request.
	fn header_authorization<'a>(&'a self, ctx: &'a CallContext) -> AuthFuture<'a>;

	/// Query parameters appended to the outbound URL.
	fn query_string_authorization<'a>(&'a self, ctx: &'a CallContext) -> AuthFuture<'a>;
}

/// Fixed credential material that can be swapped at runtime by an external refresher.
#[derive(Debug, Default)]
pub struct StaticAuthorizer {
	headers: RwLock<BTreeMap<String, String>>,
	query: RwLock<BTreeMap<String, String>>,
}
impl StaticAuthorizer {
	/// Adds a header sent with every call.
	pub fn with_header(self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.write().insert(name.into(), value.into());

		self
	}

	/// Adds a query parameter sent with every call.
	pub fn with_query(self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.query.write().insert(name.into(), value.into());

		self
	}

	/// Replaces (or inserts) a header for all subsequent calls.
	pub fn set_header(&self, name: impl Into<String>, value: impl Into<String>) {
		self.headers.write().insert(name.into(), value.into());
	}

	/// Replaces (or inserts) a query parameter for all subsequent calls.
	pub fn set_query(&self, name: impl Into<String>, value: impl Into<String>) {
		self.query.write().insert(name.into(), value.into());
	}
}
impl Authorizer for StaticAuthorizer {
	fn header_authorization<'a>(&'a self, _ctx: &'a CallContext) -> AuthFuture<'a> {
		let headers = self.headers.read().clone();

		Box::pin(async move { Ok(headers) })
	}

	fn query_string_authorization<'a>(&'a self, _ctx: &'a CallContext) -> AuthFuture<'a> {
		let query = self.query.read().clone();

		Box::pin(async move { Ok(query) })
	}
}

/// Bearer-token authorizer backed by a [`TokenManager`].
#[derive(Clone, Debug)]
pub struct TokenAuthorizer {
	manager: Arc<TokenManager>,
}
impl TokenAuthorizer {
	/// Creates an authorizer reading tokens from `manager`.
	pub fn new(manager: Arc<TokenManager>) -> Self {
		Self { manager }
	}
}
impl Authorizer for TokenAuthorizer {
	fn header_authorization<'a>(&'a self, _ctx: &'a CallContext) -> AuthFuture<'a> {
		Box::pin(async move {
			let token = self.manager.access_token()?;
			let mut headers = BTreeMap::new();

			headers.insert("Authorization".to_owned(), token.bearer());

			Ok(headers)
		})
	}

	fn query_string_authorization<'a>(&'a self, _ctx: &'a CallContext) -> AuthFuture<'a> {
		Box::pin(async { Ok(BTreeMap::new()) })
	}
}
