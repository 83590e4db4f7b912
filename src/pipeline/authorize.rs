// self
use crate::{
	_prelude::*,
	http::merge_headers,
	pipeline::{CallContext, Next, PipelineFuture, PipelineRequest, Stage},
	transport::Transport,
};

/// Asks the transport's authorizer for header and query material right before transmission.
///
/// Authorizer failures abort the call without touching the network.
#[derive(Clone, Copy, Debug, Default)]
pub struct Authorize;
impl Stage for Authorize {
	fn name(&self) -> &'static str {
		"authorize"
	}

	fn handle<'a>(
		&'a self,
		ctx: &'a CallContext,
		transport: &'a Transport,
		mut request: PipelineRequest,
		next: Next<'a>,
	) -> PipelineFuture<'a> {
		Box::pin(async move {
			let authorizer = transport.authorizer();
			let headers = authorizer.header_authorization(ctx).await.map_err(authorization_failure)?;
			let query =
				authorizer.query_string_authorization(ctx).await.map_err(authorization_failure)?;

			merge_headers(&mut request.headers, &headers).map_err(Error::authorization)?;

			for (name, value) in query {
				request.set_query(&name, value);
			}

			next.run(ctx, transport, request).await
		})
	}
}

fn authorization_failure(err: Error) -> Error {
	match err {
		Error::Cancelled | Error::Authorization { .. } => err,
		other => Error::authorization(other),
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use url::Url;
	// self
	use super::*;
	use crate::{
		_preludet::{ScriptedExecutor, ScriptedReply},
		auth::{AuthFuture, Authorizer, StaticAuthorizer},
		error::TokenError,
		transport::TransportBuilder,
	};

	struct Failing;
	impl Authorizer for Failing {
		fn header_authorization<'a>(&'a self, _ctx: &'a CallContext) -> AuthFuture<'a> {
			Box::pin(async { Err(TokenError::Missing.into()) })
		}

		fn query_string_authorization<'a>(&'a self, _ctx: &'a CallContext) -> AuthFuture<'a> {
			Box::pin(async { Ok(BTreeMap::new()) })
		}
	}

	fn transport(executor: Arc<ScriptedExecutor>, authorizer: Arc<dyn Authorizer>) -> Transport {
		TransportBuilder::new(
			Url::parse("https://api.example.com/v3/rest/").expect("Base URL should parse."),
		)
		.max_qps(1_000)
		.authorizer(authorizer)
		.executor(executor)
		.build()
		.expect("Transport should build.")
	}

	#[tokio::test]
	async fn credentials_are_attached_to_the_outbound_request() {
		let executor = Arc::new(ScriptedExecutor::new([ScriptedReply::json("{}")]));
		let authorizer = StaticAuthorizer::default()
			.with_header("Authorization", "Bearer abc")
			.with_query("api_key", "key-1");
		let transport = transport(executor.clone(), Arc::new(authorizer));

		transport
			.call(&CallContext::new(), PipelineRequest::get("services").with_query("limit", "5"))
			.await
			.expect("Authorized call should succeed.");

		let requests = executor.requests();

		assert_eq!(requests[0].header("authorization"), Some("Bearer abc"));
		assert_eq!(requests[0].query_param("api_key").as_deref(), Some("key-1"));
		assert_eq!(requests[0].query_param("limit").as_deref(), Some("5"));
	}

	#[tokio::test]
	async fn authorizer_failure_skips_the_network() {
		let executor = Arc::new(ScriptedExecutor::new([ScriptedReply::json("{}")]));
		let transport = transport(executor.clone(), Arc::new(Failing));
		let err = transport
			.call(&CallContext::new(), PipelineRequest::get("services"))
			.await
			.expect_err("Authorizer failure should abort the call.");

		assert!(matches!(err, Error::Authorization { .. }));
		assert_eq!(executor.calls(), 0);
	}
}
