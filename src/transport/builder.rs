//! Builder wiring admission, authorization, TLS pins, and the stage stack into a [`Transport`].

// std
use std::time::Duration as StdDuration;
// self
use crate::{
	_prelude::*,
	admission::AdmissionController,
	auth::{Authorizer, StaticAuthorizer},
	error::ConfigError,
	http::{ExecutorConfig, HttpExecutor},
	pipeline::{self, Stage},
	tls::PinSet,
	transport::Transport,
};

/// Configures and validates a [`Transport`].
#[derive(Clone)]
pub struct TransportBuilder {
	base_url: Url,
	max_qps: u32,
	network_latency: Duration,
	executor: Option<Arc<dyn HttpExecutor>>,
	executor_config: ExecutorConfig,
	authorizer: Option<Arc<dyn Authorizer>>,
	stages: Option<Vec<Arc<dyn Stage>>>,
	backoff_unit: StdDuration,
}
impl TransportBuilder {
	/// Default QPS ceiling.
	pub const DEFAULT_MAX_QPS: u32 = 2;

	/// Creates a builder rooted at `base_url`.
	pub fn new(base_url: Url) -> Self {
		Self {
			base_url,
			max_qps: Self::DEFAULT_MAX_QPS,
			network_latency: Duration::ZERO,
			executor: None,
			executor_config: ExecutorConfig::default(),
			authorizer: None,
			stages: None,
			backoff_unit: StdDuration::from_secs(1),
		}
	}

	/// Sets the per-second call ceiling.
	pub fn max_qps(mut self, max_qps: u32) -> Self {
		self.max_qps = max_qps;

		self
	}

	/// Sets the average network travel time the admission controller plans for.
	pub fn network_latency(mut self, latency: Duration) -> Self {
		self.network_latency = latency;

		self
	}

	/// Replaces the default reqwest leaf executor.
	///
	/// Pins and timeouts configured on this builder only apply to the default executor.
	pub fn executor(mut self, executor: Arc<dyn HttpExecutor>) -> Self {
		self.executor = Some(executor);

		self
	}

	/// Sets the authorizer; without one, calls go out unauthenticated.
	pub fn authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
		self.authorizer = Some(authorizer);

		self
	}

	/// Requires every TLS chain to satisfy `pins`.
	pub fn pins(mut self, pins: PinSet) -> Self {
		self.executor_config.pins = pins;

		self
	}

	/// Sets the whole-request timeout enforced by the HTTP client.
	pub fn timeout(mut self, timeout: StdDuration) -> Self {
		self.executor_config.timeout = timeout;

		self
	}

	/// Replaces the default stage stack (outermost first).
	pub fn stages(mut self, stages: Vec<Arc<dyn Stage>>) -> Self {
		self.stages = Some(stages);

		self
	}

	/// Sets the time unit that scales retry delays of the default stage stack.
	pub fn backoff_unit(mut self, unit: StdDuration) -> Self {
		self.backoff_unit = unit;

		self
	}

	/// Validates the configuration and produces a [`Transport`].
	pub fn build(self) -> Result<Transport> {
		let mut base_url = self.base_url;

		if !matches!(base_url.scheme(), "http" | "https") || base_url.cannot_be_a_base() {
			return Err(ConfigError::UnsupportedScheme { url: base_url.to_string() }.into());
		}
		if !base_url.path().ends_with('/') {
			let path = format!("{}/", base_url.path());

			base_url.set_path(&path);
		}

		let admission =
			AdmissionController::new(self.max_qps)?.with_network_latency(self.network_latency);
		let executor = match self.executor {
			Some(executor) => executor,
			None => default_executor(self.executor_config)?,
		};
		let authorizer =
			self.authorizer.unwrap_or_else(|| Arc::new(StaticAuthorizer::default()));
		let stages = self.stages.unwrap_or_else(|| pipeline::default_stages(self.backoff_unit));

		Ok(Transport {
			base_url,
			admission,
			authorizer,
			pipeline: pipeline::build_pipeline(executor, stages),
		})
	}
}
impl Debug for TransportBuilder {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TransportBuilder")
			.field("base_url", &self.base_url.as_str())
			.field("max_qps", &self.max_qps)
			.field("network_latency", &self.network_latency)
			.field("executor_config", &self.executor_config)
			.field("backoff_unit", &self.backoff_unit)
			.finish_non_exhaustive()
	}
}

#[cfg(feature = "reqwest")]
fn default_executor(config: ExecutorConfig) -> Result<Arc<dyn HttpExecutor>, ConfigError> {
	Ok(Arc::new(crate::http::ReqwestExecutor::new(config)?))
}

#[cfg(not(feature = "reqwest"))]
fn default_executor(_config: ExecutorConfig) -> Result<Arc<dyn HttpExecutor>, ConfigError> {
	Err(ConfigError::MissingExecutor)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::_preludet::ScriptedExecutor;

	fn url(raw: &str) -> Url {
		Url::parse(raw).expect("URL fixture should parse.")
	}

	#[test]
	fn unsupported_schemes_are_rejected() {
		let err = TransportBuilder::new(url("ftp://api.example.com/"))
			.executor(Arc::new(ScriptedExecutor::new([])))
			.build()
			.expect_err("FTP base URLs are invalid.");

		assert!(matches!(err, Error::Config(ConfigError::UnsupportedScheme { .. })));
	}

	#[test]
	fn zero_qps_is_rejected() {
		let err = TransportBuilder::new(url("https://api.example.com/"))
			.max_qps(0)
			.executor(Arc::new(ScriptedExecutor::new([])))
			.build()
			.expect_err("Zero QPS is invalid.");

		assert!(matches!(err, Error::Config(ConfigError::ZeroQps)));
	}

	#[test]
	fn base_path_gains_a_trailing_slash() {
		let transport = TransportBuilder::new(url("https://api.example.com/v3/rest"))
			.executor(Arc::new(ScriptedExecutor::new([])))
			.build()
			.expect("Transport should build.");

		assert_eq!(transport.base_url().as_str(), "https://api.example.com/v3/rest/");
		assert_eq!(transport.admission().max_qps(), TransportBuilder::DEFAULT_MAX_QPS);
		assert_eq!(transport.pipeline().stage_names().len(), 7);
	}

	#[test]
	fn custom_stage_stack_replaces_the_default() {
		let transport = TransportBuilder::new(url("https://api.example.com/"))
			.executor(Arc::new(ScriptedExecutor::new([])))
			.stages(vec![Arc::new(pipeline::Throttle)])
			.build()
			.expect("Transport should build.");

		assert_eq!(transport.pipeline().stage_names(), vec!["throttle"]);
	}
}
