//! Resilient Mashery transport: QPS admission control, composable retry pipelines, concurrent
//! pagination, background token refresh, and pinned TLS in one crate built for production.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod admission;
pub mod auth;
pub mod error;
pub mod http;
pub mod oauth;
pub mod obs;
pub mod pipeline;
pub mod refresh;
pub mod tls;
pub mod transport;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for tests; enabled via `cfg(test)` or the `test` crate
	//! feature.

	pub use crate::_prelude::*;

	// std
	use std::collections::VecDeque;
	// self
	use crate::{
		auth::StaticAuthorizer,
		http::{ExecFuture, HttpExecutor, PipelineResponse, PreparedRequest},
		oauth::http::{HeaderMap, HeaderValue, StatusCode},
		transport::{Transport, TransportBuilder},
	};

	/// One canned reply served by [`ScriptedExecutor`].
	#[derive(Clone, Debug)]
	pub struct ScriptedReply {
		/// HTTP status code.
		pub status: u16,
		/// Response headers.
		pub headers: Vec<(&'static str, String)>,
		/// Response body.
		pub body: Vec<u8>,
	}
	impl ScriptedReply {
		/// Builds a reply with the provided status and body.
		pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
			Self { status, headers: Vec::new(), body: body.into() }
		}

		/// Builds a `200 OK` JSON reply.
		pub fn json(body: impl Into<Vec<u8>>) -> Self {
			Self::new(200, body).with_header("content-type", "application/json")
		}

		/// Adds a response header.
		pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
			self.headers.push((name, value.into()));

			self
		}

		fn into_response(self) -> PipelineResponse {
			let mut headers = HeaderMap::new();

			for (name, value) in self.headers {
				if let Ok(value) = HeaderValue::from_str(&value) {
					headers.append(name, value);
				}
			}

			PipelineResponse::from_bytes(
				StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
				headers,
				self.body,
			)
		}
	}

	/// Leaf executor that serves canned replies in order and records every request it sees.
	///
	/// Once the queue is drained the fallback reply (if any) is served for every further call;
	/// without a fallback the executor answers `500`.
	#[derive(Debug, Default)]
	pub struct ScriptedExecutor {
		replies: Mutex<VecDeque<ScriptedReply>>,
		fallback: Mutex<Option<ScriptedReply>>,
		requests: Mutex<Vec<PreparedRequest>>,
		idle_closes: Mutex<u32>,
	}
	impl ScriptedExecutor {
		/// Creates an executor that serves `replies` in order.
		pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
			Self { replies: Mutex::new(replies.into_iter().collect()), ..Default::default() }
		}

		/// Serves `reply` whenever the scripted queue is empty.
		pub fn with_fallback(self, reply: ScriptedReply) -> Self {
			*self.fallback.lock() = Some(reply);

			self
		}

		/// Returns every request executed so far.
		pub fn requests(&self) -> Vec<PreparedRequest> {
			self.requests.lock().clone()
		}

		/// Returns the number of requests executed so far.
		pub fn calls(&self) -> usize {
			self.requests.lock().len()
		}

		/// Returns how many times idle connections were closed.
		pub fn idle_closes(&self) -> u32 {
			*self.idle_closes.lock()
		}
	}
	impl HttpExecutor for ScriptedExecutor {
		fn execute(&self, request: PreparedRequest) -> ExecFuture<'_> {
			self.requests.lock().push(request);

			let reply = self
				.replies
				.lock()
				.pop_front()
				.or_else(|| self.fallback.lock().clone())
				.unwrap_or_else(|| ScriptedReply::new(500, "script exhausted"));

			Box::pin(async move { Ok(reply.into_response()) })
		}

		fn close_idle_connections(&self) {
			*self.idle_closes.lock() += 1;
		}
	}

	/// Builds a transport over `executor` with a generous QPS ceiling, millisecond backoff, and
	/// a static bearer authorizer.
	pub fn scripted_transport(executor: Arc<ScriptedExecutor>) -> Arc<Transport> {
		let authorizer = StaticAuthorizer::default().with_header("Authorization", "Bearer test");

		TransportBuilder::new(
			Url::parse("https://api.example.com/v3/rest/")
				.expect("Scripted base URL should parse successfully."),
		)
		.max_qps(1_000)
		.backoff_unit(std::time::Duration::from_millis(1))
		.authorizer(Arc::new(authorizer))
		.executor(executor)
		.build()
		.map(Arc::new)
		.expect("Scripted transport should build successfully.")
	}
}

mod _prelude {
	pub use std::{
		collections::BTreeMap,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
