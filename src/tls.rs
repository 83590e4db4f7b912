//! Certificate-chain pinning layered on top of standard WebPKI validation.
//!
//! A [`PinSet`] is an ordered list of [`CertPin`]s. A presented chain is accepted only when
//! every pin is satisfied by *some* certificate of that chain (different pins may match
//! different certificates, e.g. a leaf pin plus a root pin) and the matching certificate is
//! inside its validity window. [`PinnedServerVerifier`] runs the regular rustls WebPKI checks
//! first, then enforces the pin set against the verified chain, trust anchor included.

// crates.io
use rustls::{
	CertificateError, DigitallySignedStruct, OtherError, RootCertStore, SignatureScheme,
	client::{
		WebPkiServerVerifier,
		danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
	},
	crypto::{CryptoProvider, ring},
	pki_types::{CertificateDer, ServerName, UnixTime},
};
use sha2::{Digest, Sha256};
use x509_parser::prelude::{FromDer, X509Certificate};
// self
use crate::{_prelude::*, error::ConfigError};

/// Errors raised while enforcing a [`PinSet`].
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum PinError {
	/// No candidate chain satisfied every pin.
	#[error("No certificate chain matches the configured pins.")]
	NoMatchingChains,
}

/// Allow-listed certificate attributes; unset fields act as wildcards.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertPin {
	/// Subject common name, compared verbatim (`*.example.com` matches a wildcard subject).
	pub common_name: Option<String>,
	/// Serial number in hex; separators, case, and leading zeros are ignored.
	pub serial_number: Option<String>,
	/// SHA-256 fingerprint of the DER certificate in hex; separators and case are ignored.
	pub fingerprint: Option<String>,
}
impl CertPin {
	/// Creates an empty pin; set at least one field before use.
	pub fn new() -> Self {
		Self::default()
	}

	/// Requires the subject common name to equal `value`.
	pub fn with_common_name(mut self, value: impl Into<String>) -> Self {
		self.common_name = Some(value.into());

		self
	}

	/// Requires the serial number to equal `value` (hex).
	pub fn with_serial_number(mut self, value: impl Into<String>) -> Self {
		self.serial_number = Some(value.into());

		self
	}

	/// Requires the SHA-256 fingerprint to equal `value` (hex).
	pub fn with_fingerprint(mut self, value: impl Into<String>) -> Self {
		self.fingerprint = Some(value.into());

		self
	}

	/// Returns `true` if every set field matches `cert`.
	pub fn matches(&self, cert: &CertificateFacts) -> bool {
		let cn_ok = self
			.common_name
			.as_ref()
			.is_none_or(|cn| cert.common_names.iter().any(|candidate| candidate == cn));
		let serial_ok = self
			.serial_number
			.as_ref()
			.is_none_or(|serial| normalize_serial(serial) == cert.serial_number);
		let fingerprint_ok = self
			.fingerprint
			.as_ref()
			.is_none_or(|fingerprint| normalize_hex(fingerprint) == cert.fingerprint);

		cn_ok && serial_ok && fingerprint_ok
	}

	fn is_empty(&self) -> bool {
		self.common_name.is_none() && self.serial_number.is_none() && self.fingerprint.is_none()
	}
}

/// Ordered collection of pins that must all be found in one chain.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinSet(Vec<CertPin>);
impl PinSet {
	/// Creates a pin set after validating every pin.
	pub fn new(pins: impl IntoIterator<Item = CertPin>) -> Result<Self, ConfigError> {
		let pins = pins.into_iter().collect::<Vec<_>>();

		for (index, pin) in pins.iter().enumerate() {
			if pin.is_empty() {
				return Err(ConfigError::EmptyPin { index });
			}
			if let Some(serial) = &pin.serial_number
				&& !is_hex(&normalize_hex(serial))
			{
				return Err(ConfigError::MalformedPin {
					index,
					field: "serial number",
					value: serial.clone(),
				});
			}
			if let Some(fingerprint) = &pin.fingerprint {
				let normalized = normalize_hex(fingerprint);

				if normalized.len() != 64 || !is_hex(&normalized) {
					return Err(ConfigError::MalformedPin {
						index,
						field: "fingerprint",
						value: fingerprint.clone(),
					});
				}
			}
		}

		Ok(Self(pins))
	}

	/// Returns `true` when no pins are configured.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Iterates over the pins in configuration order.
	pub fn iter(&self) -> impl Iterator<Item = &CertPin> {
		self.0.iter()
	}

	/// Accepts the first chain that satisfies every pin and returns its index.
	///
	/// `now` is expressed in Unix seconds; certificates outside their validity window never
	/// satisfy a pin. Certificates that fail to parse are skipped.
	pub fn verify_chains(
		&self,
		chains: &[Vec<CertificateDer<'_>>],
		now: i64,
	) -> Result<usize, PinError> {
		for (index, chain) in chains.iter().enumerate() {
			let facts =
				chain.iter().filter_map(|der| CertificateFacts::parse(der)).collect::<Vec<_>>();
			let satisfied = self.0.iter().all(|pin| {
				facts.iter().any(|cert| cert.is_valid_at(now) && pin.matches(cert))
			});

			if satisfied {
				return Ok(index);
			}
		}

		Err(PinError::NoMatchingChains)
	}

	/// Builds a rustls client configuration that validates against the bundled WebPKI roots and
	/// then enforces this pin set.
	pub fn client_config(&self) -> Result<rustls::ClientConfig, ConfigError> {
		let verifier = PinnedServerVerifier::new(self.clone())?;

		verifier.client_config()
	}
}

/// Attributes of one parsed certificate relevant to pinning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificateFacts {
	/// Every subject common name.
	pub common_names: Vec<String>,
	/// Serial number as uppercase hex without leading zeros.
	pub serial_number: String,
	/// SHA-256 of the DER encoding as uppercase hex.
	pub fingerprint: String,
	/// Start of validity in Unix seconds.
	pub not_before: i64,
	/// End of validity in Unix seconds.
	pub not_after: i64,
}
impl CertificateFacts {
	/// Parses a DER certificate; returns `None` when it is not valid X.509.
	pub fn parse(der: &CertificateDer<'_>) -> Option<Self> {
		let (_, cert) = X509Certificate::from_der(der.as_ref()).ok()?;
		let common_names = cert
			.subject()
			.iter_common_name()
			.filter_map(|attr| attr.as_str().ok().map(str::to_owned))
			.collect();
		let serial_number = normalize_serial(&hex_upper(cert.raw_serial()));
		let validity = cert.validity();

		Some(Self {
			common_names,
			serial_number,
			fingerprint: fingerprint(der.as_ref()),
			not_before: validity.not_before.timestamp(),
			not_after: validity.not_after.timestamp(),
		})
	}

	/// Returns `true` if `now` (Unix seconds) falls inside the validity window.
	pub fn is_valid_at(&self, now: i64) -> bool {
		self.not_before <= now && now <= self.not_after
	}
}

/// rustls verifier that layers a [`PinSet`] over WebPKI chain validation.
///
/// Pins are matched against the presented chain (end entity plus intermediates) extended with
/// the trust anchor that issued its top certificate, so a pin may name the root even when the
/// server does not send it.
#[derive(Debug)]
pub struct PinnedServerVerifier {
	inner: Arc<WebPkiServerVerifier>,
	provider: Arc<CryptoProvider>,
	anchors: Vec<CertificateDer<'static>>,
	pins: PinSet,
}
impl PinnedServerVerifier {
	/// Creates a verifier trusting the bundled WebPKI root certificates.
	pub fn new(pins: PinSet) -> Result<Self, ConfigError> {
		Self::with_roots(pins, webpki_root_certs::TLS_SERVER_ROOT_CERTS.to_vec())
	}

	/// Creates a verifier trusting only the DER certificates in `anchors`.
	///
	/// Certificates that cannot serve as trust anchors are skipped; a set with none usable is a
	/// configuration error.
	pub fn with_roots(
		pins: PinSet,
		anchors: Vec<CertificateDer<'static>>,
	) -> Result<Self, ConfigError> {
		let mut roots = RootCertStore::empty();
		let (_added, _ignored) = roots.add_parsable_certificates(anchors.iter().cloned());
		let provider = Arc::new(ring::default_provider());
		let inner = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone())
			.build()
			.map_err(ConfigError::http_client_build)?;

		Ok(Self { inner, provider, anchors, pins })
	}

	/// Candidate chains for pin matching: `presented` plus each anchor whose subject issued its
	/// top certificate, or `presented` alone when the server already sent its root.
	fn anchored_chains(
		&self,
		presented: Vec<CertificateDer<'static>>,
	) -> Vec<Vec<CertificateDer<'static>>> {
		let top = presented.last();
		let Some(issuer) = top.and_then(issuer_name) else {
			return vec![presented];
		};
		let chains = self
			.anchors
			.iter()
			.filter(|anchor| top != Some(*anchor))
			.filter(|anchor| subject_name(anchor).as_deref() == Some(issuer.as_slice()))
			.map(|anchor| {
				let mut chain = presented.clone();

				chain.push(anchor.clone());

				chain
			})
			.collect::<Vec<_>>();

		if chains.is_empty() { vec![presented] } else { chains }
	}

	/// Wraps the verifier into a rustls client configuration.
	pub fn client_config(self) -> Result<rustls::ClientConfig, ConfigError> {
		let provider = self.provider.clone();
		let config = rustls::ClientConfig::builder_with_provider(provider)
			.with_safe_default_protocol_versions()
			.map_err(ConfigError::http_client_build)?
			.dangerous()
			.with_custom_certificate_verifier(Arc::new(self))
			.with_no_client_auth();

		Ok(config)
	}
}
impl ServerCertVerifier for PinnedServerVerifier {
	fn verify_server_cert(
		&self,
		end_entity: &CertificateDer<'_>,
		intermediates: &[CertificateDer<'_>],
		server_name: &ServerName<'_>,
		ocsp_response: &[u8],
		now: UnixTime,
	) -> Result<ServerCertVerified, rustls::Error> {
		let verified = self.inner.verify_server_cert(
			end_entity,
			intermediates,
			server_name,
			ocsp_response,
			now,
		)?;

		if self.pins.is_empty() {
			return Ok(verified);
		}

		let presented = std::iter::once(end_entity)
			.chain(intermediates)
			.map(|der| der.clone().into_owned())
			.collect::<Vec<_>>();
		let chains = self.anchored_chains(presented);
		let now = i64::try_from(now.as_secs()).unwrap_or(i64::MAX);

		self.pins.verify_chains(&chains, now).map_err(|err| {
			#[cfg(feature = "tracing")]
			tracing::warn!(server = ?server_name, "Rejected TLS chain without pin match.");

			rustls::Error::InvalidCertificate(CertificateError::Other(OtherError(Arc::new(err))))
		})?;

		Ok(verified)
	}

	fn verify_tls12_signature(
		&self,
		message: &[u8],
		cert: &CertificateDer<'_>,
		dss: &DigitallySignedStruct,
	) -> Result<HandshakeSignatureValid, rustls::Error> {
		self.inner.verify_tls12_signature(message, cert, dss)
	}

	fn verify_tls13_signature(
		&self,
		message: &[u8],
		cert: &CertificateDer<'_>,
		dss: &DigitallySignedStruct,
	) -> Result<HandshakeSignatureValid, rustls::Error> {
		self.inner.verify_tls13_signature(message, cert, dss)
	}

	fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
		self.inner.supported_verify_schemes()
	}
}

/// SHA-256 fingerprint of DER bytes as uppercase hex.
pub fn fingerprint(der: &[u8]) -> String {
	hex_upper(&Sha256::digest(der))
}

fn issuer_name(der: &CertificateDer<'_>) -> Option<Vec<u8>> {
	let (_, cert) = X509Certificate::from_der(der.as_ref()).ok()?;

	Some(cert.issuer().as_raw().to_vec())
}

fn subject_name(der: &CertificateDer<'_>) -> Option<Vec<u8>> {
	let (_, cert) = X509Certificate::from_der(der.as_ref()).ok()?;

	Some(cert.subject().as_raw().to_vec())
}

fn hex_upper(bytes: &[u8]) -> String {
	bytes.iter().map(|b| format!("{b:02X}")).collect()
}

fn normalize_hex(value: &str) -> String {
	value.chars().filter(|c| *c != ':' && !c.is_whitespace()).collect::<String>().to_uppercase()
}

fn normalize_serial(value: &str) -> String {
	let hex = normalize_hex(value);
	let trimmed = hex.trim_start_matches('0');

	if trimmed.is_empty() { "0".into() } else { trimmed.into() }
}

fn is_hex(value: &str) -> bool {
	!value.is_empty() && value.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
	// crates.io
	use rcgen::{
		BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
		ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, SerialNumber,
	};
	// self
	use super::*;

	struct Issued {
		cert: Certificate,
		key: KeyPair,
	}

	fn issuer(cn: &str, serial: &[u8]) -> Issued {
		let mut params = CertificateParams::default();

		params.distinguished_name = DistinguishedName::new();
		params.distinguished_name.push(DnType::CommonName, cn);
		params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
		params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::DigitalSignature];
		params.serial_number = Some(SerialNumber::from_slice(serial));

		let key = KeyPair::generate().expect("Issuer key should generate.");
		let cert = params.self_signed(&key).expect("Issuer certificate should self-sign.");

		Issued { cert, key }
	}

	fn leaf_params(cn: &str) -> CertificateParams {
		let mut params = CertificateParams::new(vec!["leaf.example.com".to_owned()])
			.expect("Leaf params should build.");

		params.distinguished_name = DistinguishedName::new();
		params.distinguished_name.push(DnType::CommonName, cn);
		params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
		params.serial_number = Some(SerialNumber::from_slice(&[0x00, 0x42]));

		params
	}

	fn leaf(cn: &str, issuer: &Issued) -> Certificate {
		let key = KeyPair::generate().expect("Leaf key should generate.");

		leaf_params(cn).signed_by(&key, &issuer.cert, &issuer.key).expect("Leaf should sign.")
	}

	fn chain(certs: &[&Certificate]) -> Vec<CertificateDer<'static>> {
		certs.iter().map(|cert| cert.der().clone()).collect()
	}

	fn now() -> i64 {
		OffsetDateTime::now_utc().unix_timestamp()
	}

	#[test]
	fn leaf_and_issuer_pins_may_match_different_certificates() {
		let ca = issuer("Some Issuer", &[0x0A, 0x1B]);
		let leaf = leaf("*.example.com", &ca);
		let pins = PinSet::new([
			CertPin::new().with_common_name("*.example.com"),
			CertPin::new().with_common_name("Some Issuer").with_serial_number("0a:1b"),
		])
		.expect("Pins should validate.");

		assert_eq!(pins.verify_chains(&[chain(&[&leaf, &ca.cert])], now()), Ok(0));
	}

	#[test]
	fn issuer_serial_mismatch_rejects_chain_even_if_leaf_matches() {
		let ca = issuer("Some Issuer", &[0x0A, 0x1B]);
		let leaf = leaf("*.example.com", &ca);
		let pins = PinSet::new([
			CertPin::new().with_common_name("*.example.com"),
			CertPin::new().with_common_name("Some Issuer").with_serial_number("FFEE"),
		])
		.expect("Pins should validate.");

		assert_eq!(
			pins.verify_chains(&[chain(&[&leaf, &ca.cert])], now()),
			Err(PinError::NoMatchingChains)
		);
	}

	#[test]
	fn later_chain_is_accepted_when_first_fails() {
		let wrong = issuer("Other Issuer", &[0x01]);
		let right = issuer("Some Issuer", &[0x02]);
		let first = leaf("*.example.com", &wrong);
		let second = leaf("*.example.com", &right);
		let pins = PinSet::new([
			CertPin::new().with_common_name("*.example.com"),
			CertPin::new().with_fingerprint(fingerprint(right.cert.der())),
		])
		.expect("Pins should validate.");
		let chains = [chain(&[&first, &wrong.cert]), chain(&[&second, &right.cert])];

		assert_eq!(pins.verify_chains(&chains, now()), Ok(1));
	}

	#[test]
	fn expired_certificates_never_satisfy_a_pin() {
		let ca = issuer("Some Issuer", &[0x03]);
		let mut params = leaf_params("expired.example.com");

		params.not_before = rcgen::date_time_ymd(2000, 1, 1);
		params.not_after = rcgen::date_time_ymd(2001, 1, 1);

		let key = KeyPair::generate().expect("Leaf key should generate.");
		let expired =
			params.signed_by(&key, &ca.cert, &ca.key).expect("Expired leaf should sign.");
		let pins = PinSet::new([CertPin::new().with_common_name("expired.example.com")])
			.expect("Pins should validate.");

		assert_eq!(
			pins.verify_chains(&[chain(&[&expired, &ca.cert])], now()),
			Err(PinError::NoMatchingChains)
		);
	}

	#[test]
	fn pin_validation_rejects_wildcard_and_malformed_pins() {
		assert!(matches!(
			PinSet::new([CertPin::new().with_common_name("a"), CertPin::new()]),
			Err(ConfigError::EmptyPin { index: 1 })
		));
		assert!(matches!(
			PinSet::new([CertPin::new().with_serial_number("xyz")]),
			Err(ConfigError::MalformedPin { field: "serial number", .. })
		));
		assert!(matches!(
			PinSet::new([CertPin::new().with_fingerprint("AB:CD")]),
			Err(ConfigError::MalformedPin { field: "fingerprint", .. })
		));
	}

	#[test]
	fn facts_normalize_serial_and_fingerprint() {
		let ca = issuer("Some Issuer", &[0x00, 0x0A, 0x1B]);
		let facts = CertificateFacts::parse(ca.cert.der()).expect("Certificate should parse.");

		assert_eq!(facts.common_names, vec!["Some Issuer".to_owned()]);
		assert_eq!(facts.serial_number, "A1B");
		assert_eq!(facts.fingerprint.len(), 64);
		assert!(CertPin::new().with_serial_number("00:0a:1b").matches(&facts));
	}

	#[test]
	fn verifier_enforces_pins_after_webpki_validation() {
		let ca = issuer("Some Issuer", &[0x05]);
		let leaf = leaf("leaf.example.com", &ca);
		let roots = vec![ca.cert.der().clone()];
		let server_name =
			ServerName::try_from("leaf.example.com").expect("Server name should parse.");
		let accepting = PinnedServerVerifier::with_roots(
			PinSet::new([CertPin::new().with_common_name("leaf.example.com")])
				.expect("Pins should validate."),
			roots.clone(),
		)
		.expect("Verifier should build.");

		accepting
			.verify_server_cert(leaf.der(), &[], &server_name, &[], UnixTime::now())
			.expect("Pinned chain should verify.");

		let rejecting = PinnedServerVerifier::with_roots(
			PinSet::new([CertPin::new().with_common_name("someone-else.example.com")])
				.expect("Pins should validate."),
			roots,
		)
		.expect("Verifier should build.");
		let err = rejecting
			.verify_server_cert(leaf.der(), &[], &server_name, &[], UnixTime::now())
			.expect_err("Unpinned chain should be rejected.");

		assert!(matches!(err, rustls::Error::InvalidCertificate(CertificateError::Other(_))));
	}

	#[test]
	fn root_pins_match_the_trust_anchor_the_server_did_not_send() {
		let root = issuer("Some Root", &[0x06]);
		let other = issuer("Other Root", &[0x07]);
		let leaf = leaf("leaf.example.com", &root);
		let server_name =
			ServerName::try_from("leaf.example.com").expect("Server name should parse.");
		let verifier = PinnedServerVerifier::with_roots(
			PinSet::new([
				CertPin::new().with_common_name("leaf.example.com"),
				CertPin::new()
					.with_common_name("Some Root")
					.with_fingerprint(fingerprint(root.cert.der())),
			])
			.expect("Pins should validate."),
			vec![other.cert.der().clone(), root.cert.der().clone()],
		)
		.expect("Verifier should build.");

		verifier
			.verify_server_cert(leaf.der(), &[], &server_name, &[], UnixTime::now())
			.expect("Root pin should match the verified anchor.");

		let pinned_elsewhere = PinnedServerVerifier::with_roots(
			PinSet::new([CertPin::new().with_common_name("Other Root")])
				.expect("Pins should validate."),
			vec![other.cert.der().clone(), root.cert.der().clone()],
		)
		.expect("Verifier should build.");

		assert!(
			pinned_elsewhere
				.verify_server_cert(leaf.der(), &[], &server_name, &[], UnixTime::now())
				.is_err()
		);
	}

	#[test]
	fn empty_anchor_set_is_a_configuration_error() {
		assert!(matches!(
			PinnedServerVerifier::with_roots(PinSet::default(), Vec::new()),
			Err(ConfigError::HttpClientBuild { .. })
		));
	}
}
