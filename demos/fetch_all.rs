//! Demonstrates a token-authorized transport fanning a paginated list out over a mock backend.

// std
use std::sync::Arc;
// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
use serde::Deserialize;
use serde_json::json;
// self
use mashery_transport::{
	auth::TokenAuthorizer,
	http::{ExecutorConfig, HttpExecutor, ReqwestExecutor},
	oauth::{V3Credentials, V3TokenExchange},
	pipeline::CallContext,
	refresh::TokenManager,
	transport::{FetchAllRequest, TransportBuilder, fetch_all::TOTAL_COUNT_HEADER},
	url::Url,
};

#[derive(Debug, Deserialize)]
struct Service {
	id: String,
	name: String,
}

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;
	let _token = server
		.mock_async(|when, then| {
			when.method(POST).path("/v3/token");
			then.status(200).header("content-type", "application/json").body(
				r#"{"token_type":"bearer","access_token":"demo-access","expires_in":3600,"refresh_token":"demo-refresh"}"#,
			);
		})
		.await;

	for offset in 0..3 {
		server
			.mock_async(|when, then| {
				when.method(GET)
					.path("/v3/rest/services")
					.header("Authorization", "Bearer demo-access")
					.query_param("offset", (offset * 2).to_string());
				then.status(200).header(TOTAL_COUNT_HEADER, "5").json_body(json!([
					{ "id": format!("svc-{}", offset * 2), "name": "Demo" },
					{ "id": format!("svc-{}", offset * 2 + 1), "name": "Demo" },
				]));
			})
			.await;
	}

	let executor: Arc<dyn HttpExecutor> = Arc::new(ReqwestExecutor::new(ExecutorConfig::default())?);
	let credentials = V3Credentials::new("demo-key", "demo-secret", "demo-user", "demo-pass", "area")
		.with_token_url(Url::parse(&server.url("/v3/token"))?);
	let exchange = V3TokenExchange::new(credentials, executor.clone())?;
	let manager = Arc::new(TokenManager::new(Arc::new(exchange)));

	manager.authenticate().await?;
	manager.ensure_refresh();

	let transport = TransportBuilder::new(Url::parse(&server.url("/v3/rest/"))?)
		.max_qps(2)
		.executor(executor)
		.authorizer(Arc::new(TokenAuthorizer::new(manager.clone())))
		.build()
		.map(Arc::new)?;
	let outcome = transport
		.fetch_all::<Service>(&CallContext::new(), FetchAllRequest::new("services"))
		.await;
	let (services, exists) = outcome.into_result()?;

	println!("Collection exists: {exists}; fetched {} services.", services.len());

	for service in services {
		println!("{} ({})", service.id, service.name);
	}

	manager.close().await;

	Ok(())
}
