//! TLS certificate expiry lookup.
//!
//! Performs a bare handshake (no application data) and reads `notAfter` from
//! the leaf certificate the server presents. Trust is deliberately not
//! checked: expired or self-signed certificates still report their dates.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::net::TcpStream;
use tokio::time;
use tokio_rustls::TlsConnector;

use crate::monitoring::error::ExpiryError;

pub const DEFAULT_TLS_TIMEOUT: Duration = Duration::from_secs(5);

const DEFAULT_TLS_PORT: u16 = 443;

/// Fetch the leaf certificate expiry for `host` (`host` or `host:port`).
///
/// Returns `Ok(None)` when the handshake succeeds but no certificate is
/// presented. Dial and handshake failures are returned as errors so the
/// caller decides whether to retry.
pub async fn fetch_tls_expiry(
    host: &str,
    timeout: Duration,
) -> Result<Option<DateTime<Utc>>, ExpiryError> {
    let (name, port) = split_host_port(host)?;
    let peer = format!("{}:{}", name, port);

    let server_name = ServerName::try_from(name.clone())
        .map_err(|_| ExpiryError::InvalidHost { host: host.to_string() })?;
    let connector = insecure_connector()?;

    let handshake = async {
        let stream = TcpStream::connect((name.as_str(), port))
            .await
            .map_err(|err| ExpiryError::transport(&peer, err))?;

        connector
            .connect(server_name, stream)
            .await
            .map_err(|err| ExpiryError::Tls { message: err.to_string() })
    };

    let tls = time::timeout(timeout, handshake)
        .await
        .map_err(|_| ExpiryError::timeout(&peer, timeout))??;

    let (_, session) = tls.get_ref();
    let expiry = leaf_expiry(session.peer_certificates().unwrap_or(&[]))?;
    tracing::debug!("TLS expiry for {}: {:?}", peer, expiry);
    Ok(expiry)
}

/// `notAfter` of the first certificate in `chain`, or `None` for an empty chain.
pub fn leaf_expiry(chain: &[CertificateDer<'_>]) -> Result<Option<DateTime<Utc>>, ExpiryError> {
    let Some(leaf) = chain.first() else {
        return Ok(None);
    };

    let (_, certificate) = x509_parser::parse_x509_certificate(leaf.as_ref())
        .map_err(|err| ExpiryError::Certificate { message: err.to_string() })?;

    let timestamp = certificate.validity().not_after.timestamp();
    DateTime::from_timestamp(timestamp, 0)
        .map(Some)
        .ok_or_else(|| ExpiryError::Certificate {
            message: format!("notAfter out of range: {}", timestamp),
        })
}

/// Split `host[:port]`, defaulting the port to 443. Accepts `[v6]:port` and
/// bare IPv6 literals.
fn split_host_port(input: &str) -> Result<(String, u16), ExpiryError> {
    let invalid = || ExpiryError::InvalidHost { host: input.to_string() };
    let input = input.trim();

    if let Some(rest) = input.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
        let port = match tail.strip_prefix(':') {
            Some(port) => port.parse().map_err(|_| invalid())?,
            None if tail.is_empty() => DEFAULT_TLS_PORT,
            None => return Err(invalid()),
        };
        return Ok((host.to_string(), port));
    }

    let (host, port) = match input.matches(':').count() {
        0 => (input, DEFAULT_TLS_PORT),
        1 => {
            let (host, port) = input.split_once(':').ok_or_else(invalid)?;
            (host, port.parse().map_err(|_| invalid())?)
        }
        // Bare IPv6 literal.
        _ => (input, DEFAULT_TLS_PORT),
    };

    if host.is_empty() {
        return Err(invalid());
    }
    Ok((host.to_string(), port))
}

fn insecure_connector() -> Result<TlsConnector, ExpiryError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let config = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|err| ExpiryError::Tls { message: err.to_string() })?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate { provider }))
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Verifier that accepts every certificate; only the dates are of interest.
#[derive(Debug)]
struct AcceptAnyCertificate {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
