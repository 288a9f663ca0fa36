//! TLS upgrade of a freshly opened connection.
//!
//! After the server greeting the client sends a short SSL request packet
//! (capabilities with `CLIENT_SSL`, max packet size, charset, 23 zero
//! bytes), runs the TLS handshake, and continues the login over TLS.
//!
//! The rustls-backed stream is only built with the `tls` feature.

#![allow(clippy::cast_possible_truncation)]

use sqldao_core::DriverError;
use sqldao_core::error::{ConnectionError, ConnectionErrorKind, codes};

use crate::protocol::{PacketWriter, capabilities};

#[cfg(feature = "tls")]
use std::io::{Read, Write};
#[cfg(feature = "tls")]
use std::sync::Arc;

/// SSL request packet, sent in place of the first half of the login.
pub fn build_ssl_request_packet(
    client_caps: u32,
    max_packet_size: u32,
    character_set: u8,
    sequence_id: u8,
) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(32);
    writer.write_u32_le(client_caps | capabilities::CLIENT_SSL);
    writer.write_u32_le(max_packet_size);
    writer.write_u8(character_set);
    writer.write_zeros(23);
    writer.build_packet(sequence_id)
}

pub(crate) fn tls_error(message: impl Into<String>) -> DriverError {
    DriverError::Connection(ConnectionError {
        kind: ConnectionErrorKind::Ssl,
        code: codes::CR_SSL_CONNECTION_ERROR,
        message: message.into(),
        source: None,
    })
}

/// A rustls client session over a blocking stream.
#[cfg(feature = "tls")]
pub struct TlsStream<S: Read + Write> {
    conn: rustls::ClientConnection,
    stream: S,
}

#[cfg(feature = "tls")]
impl<S: Read + Write> std::fmt::Debug for TlsStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsStream")
            .field("protocol_version", &self.conn.protocol_version())
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "tls")]
impl<S: Read + Write> TlsStream<S> {
    /// Run the handshake to completion.
    ///
    /// The server certificate is checked against the webpki roots only when
    /// `verify` is set; MySQL servers commonly present self-signed certs.
    pub fn connect(mut stream: S, server_name: &str, verify: bool) -> Result<Self, DriverError> {
        let config = if verify {
            build_webpki_config()?
        } else {
            build_no_verify_config()?
        };
        let name = rustls::pki_types::ServerName::try_from(server_name.to_string())
            .map_err(|e| tls_error(format!("invalid server name '{}': {}", server_name, e)))?;
        let mut conn = rustls::ClientConnection::new(Arc::new(config), name)
            .map_err(|e| tls_error(format!("TLS setup failed: {}", e)))?;

        while conn.is_handshaking() {
            conn.complete_io(&mut stream)
                .map_err(|e| tls_error(format!("TLS handshake failed: {}", e)))?;
        }
        Ok(Self { conn, stream })
    }

    /// Send close_notify; the socket itself closes on drop.
    pub fn shutdown(&mut self) -> std::io::Result<()> {
        self.conn.send_close_notify();
        self.conn.complete_io(&mut self.stream).map(|_| ())
    }
}

#[cfg(feature = "tls")]
impl<S: Read + Write> Read for TlsStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        rustls::Stream::new(&mut self.conn, &mut self.stream).read(buf)
    }
}

#[cfg(feature = "tls")]
impl<S: Read + Write> Write for TlsStream<S> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        rustls::Stream::new(&mut self.conn, &mut self.stream).write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        rustls::Stream::new(&mut self.conn, &mut self.stream).flush()
    }
}

#[cfg(feature = "tls")]
fn provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

#[cfg(feature = "tls")]
fn build_webpki_config() -> Result<rustls::ClientConfig, DriverError> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    Ok(rustls::ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| tls_error(format!("TLS versions: {}", e)))?
        .with_root_certificates(roots)
        .with_no_client_auth())
}

#[cfg(feature = "tls")]
fn build_no_verify_config() -> Result<rustls::ClientConfig, DriverError> {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, SignatureScheme};

    /// Accepts any certificate; signatures are still checked.
    #[derive(Debug)]
    struct AcceptAnyCert(Arc<rustls::crypto::CryptoProvider>);

    impl ServerCertVerifier for AcceptAnyCert {
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
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            rustls::crypto::verify_tls12_signature(
                message,
                cert,
                dss,
                &self.0.signature_verification_algorithms,
            )
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            rustls::crypto::verify_tls13_signature(
                message,
                cert,
                dss,
                &self.0.signature_verification_algorithms,
            )
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.0.signature_verification_algorithms.supported_schemes()
        }
    }

    let provider = provider();
    Ok(rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| tls_error(format!("TLS versions: {}", e)))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(provider)))
        .with_no_client_auth())
}
