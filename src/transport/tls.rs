//! TLS layer over an inner byte transport, translated from
//! `Source/IO/Protocol.h`'s `Protocol::TLS` (there OpenSSL-backed; here
//! `rustls` via `tokio-rustls`, matching the crate's existing `rustls`/
//! `tokio-rustls`/`rustls-native-certs` dependency trio).

use std::sync::Arc;

use async_trait::async_trait;
use rustls_pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use super::Transport;
use super::tcp::TcpTransport;
use crate::error::{Error, Result};

fn native_root_store() -> rustls::RootCertStore {
    let mut store = rustls::RootCertStore::empty();
    match rustls_native_certs::load_native_certs() {
        certs_result if !certs_result.certs.is_empty() => {
            for cert in certs_result.certs {
                let _ = store.add(cert);
            }
        }
        _ => {}
    }
    store
}

/// TLS transport wrapping a [`TcpTransport`]. `verify_certificates`
/// mirrors `Protocol::TLS`'s `verify_certificates` flag: when false, the
/// server's certificate chain is accepted unconditionally (for talking to
/// self-signed aggregators), matching spec.md's "optional server-certificate
/// validation" non-goal carve-out.
pub struct TlsTransport {
    server_name: String,
    inner: TcpTransport,
    connector: TlsConnector,
    stream: Option<TlsStream<TcpStream>>,
}

struct NoVerify;

impl rustls::client::danger::ServerCertVerifier for NoVerify {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls_pki_types::CertificateDer<'_>,
        _intermediates: &[rustls_pki_types::CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls_pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls_pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls_pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

impl TlsTransport {
    /// Wrap `inner` (already targeting `server_name:port`) in TLS, verifying
    /// the peer certificate against the native trust store.
    #[must_use]
    pub fn new(server_name: impl Into<String>, inner: TcpTransport) -> Self {
        let config = rustls::ClientConfig::builder()
            .with_root_certificates(native_root_store())
            .with_no_client_auth();
        Self {
            server_name: server_name.into(),
            inner,
            connector: TlsConnector::from(Arc::new(config)),
            stream: None,
        }
    }

    /// Wrap `inner` in TLS without verifying the peer certificate, per
    /// `Protocol::TLS`'s `verify_certificates = false`.
    #[must_use]
    pub fn new_insecure(server_name: impl Into<String>, inner: TcpTransport) -> Self {
        let mut config = rustls::ClientConfig::builder()
            .with_root_certificates(native_root_store())
            .with_no_client_auth();
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(NoVerify));
        Self {
            server_name: server_name.into(),
            inner,
            connector: TlsConnector::from(Arc::new(config)),
            stream: None,
        }
    }
}

#[async_trait]
impl Transport for TlsTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        // `inner` is kept only for its host/port and persistent-retry
        // configuration here, not for a live socket: `tokio_rustls` needs
        // to own the `TcpStream` it wraps, so this layer dials its own
        // connection rather than taking over one `inner` already opened.
        let name = ServerName::try_from(self.server_name.clone())
            .map_err(|_| Error::Protocol(format!("invalid TLS server name '{}'", self.server_name)))?;
        let tcp = TcpStream::connect((self.inner.host(), self.inner.port())).await?;
        tcp.set_nodelay(true)?;
        let stream = self
            .connector
            .connect(name, tcp)
            .await
            .map_err(|e| Error::Protocol(format!("TLS handshake failed: {e}")))?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.stream = None;
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(Error::IoClosed("TLS not connected".into()));
        };
        stream.write_all(data).await?;
        Ok(data.len())
    }

    async fn read(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(Error::IoClosed("TLS not connected".into()));
        };
        let mut tmp = [0u8; 4096];
        let n = stream.read(&mut tmp).await?;
        if n == 0 {
            self.disconnect().await;
            return Err(Error::IoClosed("TLS peer closed".into()));
        }
        buf.extend_from_slice(&tmp[..n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_server_name_is_rejected() {
        assert!(ServerName::try_from("not a valid name!!".to_string()).is_err());
    }
}
