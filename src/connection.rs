//! TCP and TLS setup for IMAP endpoints
//!
//! Produces an encrypted stream ready to be attached to an
//! [`ImapSession`](crate::session::ImapSession), either by TLS from the
//! first byte or by the `STARTTLS` upgrade.

use crate::account::{Endpoint, TlsMode};
use crate::codec::{ImapCodec, Response, Status};
use crate::error::{Error, Result};
use crate::session::Greeting;
use futures::{SinkExt, StreamExt};
use rustls::pki_types::ServerName;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_util::codec::Framed;
use tracing::{debug, info};

/// A TLS-wrapped IMAP connection.
pub type TlsImapStream = tokio_rustls::client::TlsStream<TcpStream>;

/// An encrypted connection, and whether the server greeting is still
/// to be read from it.
pub struct Connected {
    pub stream: TlsImapStream,
    pub greeting_pending: bool,
}

/// Build a TLS connector.
///
/// With `verify` the server certificate is checked against the Mozilla
/// root set; without it every certificate is accepted (local bridges
/// and test servers with self-signed certificates).
///
/// # Errors
///
/// Returns [`Error::Tls`] if the crypto provider cannot be configured.
pub fn tls_connector(verify: bool) -> Result<TlsConnector> {
    let builder =
        rustls::ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Tls(format!("TLS setup failed: {e}")))?;

    let config = if verify {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        builder.with_root_certificates(roots).with_no_client_auth()
    } else {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(DangerousVerifier))
            .with_no_client_auth()
    };
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Connect to `endpoint` and establish TLS.
///
/// # Errors
///
/// [`Error::Network`] if the TCP connection fails, [`Error::Tls`] if
/// the handshake fails, [`Error::Protocol`] if the STARTTLS exchange
/// goes wrong.
pub async fn open(endpoint: &Endpoint, tls_verify: bool) -> Result<Connected> {
    debug!("Connecting to IMAP server at {endpoint}");
    let tcp = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
        .await
        .map_err(|e| Error::Network(format!("connect to {endpoint} failed: {e}")))?;

    let (tcp, greeting_pending) = match endpoint.tls {
        TlsMode::Implicit => (tcp, true),
        TlsMode::StartTls => (starttls(tcp).await?, false),
    };

    let server_name = ServerName::try_from(endpoint.host.clone())
        .map_err(|e| Error::Tls(format!("Invalid server name: {e}")))?;
    let stream = tls_connector(tls_verify)?
        .connect(server_name, tcp)
        .await
        .map_err(|e| Error::Tls(e.to_string()))?;

    info!(%endpoint, mode = ?endpoint.tls, "TLS established");
    Ok(Connected {
        stream,
        greeting_pending,
    })
}

/// Read the plaintext greeting and negotiate `STARTTLS`.
async fn starttls(tcp: TcpStream) -> Result<TcpStream> {
    let mut plain = Framed::new(tcp, ImapCodec);

    let greeting = next(&mut plain).await?;
    Greeting::parse(&greeting)?;

    plain.send("S0001 STARTTLS".to_string()).await?;
    loop {
        match next(&mut plain).await? {
            Response::Tagged {
                tag, status, text, ..
            } if tag == "S0001" => {
                if status != Status::Ok {
                    return Err(Error::Protocol(format!("STARTTLS refused: {text}")));
                }
                break;
            }
            Response::Untagged { .. } => {}
            other => {
                return Err(Error::Protocol(format!(
                    "unexpected response to STARTTLS: {other:?}"
                )));
            }
        }
    }

    let parts = plain.into_parts();
    if !parts.read_buf.is_empty() {
        return Err(Error::Protocol(
            "server sent data after STARTTLS before the TLS handshake".into(),
        ));
    }
    Ok(parts.io)
}

async fn next(plain: &mut Framed<TcpStream, ImapCodec>) -> Result<Response> {
    plain
        .next()
        .await
        .unwrap_or_else(|| Err(Error::Network("connection closed during STARTTLS".into())))
}

/// Certificate verifier that accepts all certificates.
#[derive(Debug)]
struct DangerousVerifier;

impl rustls::client::danger::ServerCertVerifier for DangerousVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
