// Copyright (c) 2026 Orbitfs
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! TLS transport: server config from the node's own identity, client
//! configs that pin one peer certificate (exact DER match) or accept any
//! certificate for the transient bootstrap channel.

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, ServerConfig};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

use crate::core::crypto::identity::cert_pem_to_der;

/// TLS setup and dialing errors.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("malformed address {0:?}")]
    Addr(String),
    #[error("no usable PEM material")]
    Pem,
    #[error("tls config")]
    Config,
    #[error("dial timeout")]
    DialTimeout,
    #[error("io: {0}")]
    Io(String),
    #[error("handshake: {0}")]
    Handshake(String),
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Split `host:port` (or `[v6]:port`), validating both parts.
pub fn split_host_port(addr: &str) -> Result<(String, u16), TlsError> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| TlsError::Addr(addr.to_string()))?;
    let port: u16 = port.parse().map_err(|_| TlsError::Addr(addr.to_string()))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(TlsError::Addr(addr.to_string()));
    }
    Ok((host.to_string(), port))
}

/// Server config from the node's persisted certificate and key PEMs.
pub fn server_config(cert_pem: &str, key_pem: &str) -> Result<Arc<ServerConfig>, TlsError> {
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_pem.as_bytes())
        .collect::<Result<_, _>>()
        .map_err(|_| TlsError::Pem)?;
    if certs.is_empty() {
        return Err(TlsError::Pem);
    }
    let key = rustls_pemfile::private_key(&mut key_pem.as_bytes())
        .map_err(|_| TlsError::Pem)?
        .ok_or(TlsError::Pem)?;

    let config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|_| TlsError::Config)?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|_| TlsError::Config)?;
    Ok(Arc::new(config))
}

/// Accepts exactly one certificate: the peer's pinned DER. Names, chains
/// and expiry are irrelevant once the certificate bytes match the pin.
#[derive(Debug)]
struct PinnedVerifier {
    pinned: Vec<u8>,
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for PinnedVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if end_entity.as_ref() == self.pinned.as_slice() {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::InvalidCertificate(
                rustls::CertificateError::ApplicationVerificationFailure,
            ))
        }
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
            &self.provider.signature_verification_algorithms,
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
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Accepts any presented certificate. Only for the transient bootstrap
/// channel, which fetches the peer's meta and immediately reconnects with
/// its certificate pinned.
#[derive(Debug)]
struct AcceptAnyVerifier {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyVerifier {
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
            &self.provider.signature_verification_algorithms,
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
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

fn client_config_with_verifier(
    verifier: Arc<dyn ServerCertVerifier>,
) -> Result<Arc<ClientConfig>, TlsError> {
    let config = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|_| TlsError::Config)?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Client config trusting exactly the given peer certificate.
pub fn pinned_client_config(peer_cert_pem: &str) -> Result<Arc<ClientConfig>, TlsError> {
    let pinned = cert_pem_to_der(peer_cert_pem).map_err(|_| TlsError::Pem)?;
    client_config_with_verifier(Arc::new(PinnedVerifier {
        pinned,
        provider: provider(),
    }))
}

/// Client config accepting any certificate (bootstrap only).
pub fn accept_any_client_config() -> Result<Arc<ClientConfig>, TlsError> {
    client_config_with_verifier(Arc::new(AcceptAnyVerifier {
        provider: provider(),
    }))
}

/// Dial `addr` and complete the TLS handshake, each under `dial_timeout`.
pub async fn connect(
    addr: &str,
    config: Arc<ClientConfig>,
    dial_timeout: Duration,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>, TlsError> {
    let (host, _port) = split_host_port(addr)?;

    let tcp = timeout(dial_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| TlsError::DialTimeout)?
        .map_err(|e| TlsError::Io(e.to_string()))?;
    let _ = tcp.set_nodelay(true);

    let server_name =
        ServerName::try_from(host).map_err(|_| TlsError::Addr(addr.to_string()))?;
    let connector = TlsConnector::from(config);
    timeout(dial_timeout, connector.connect(server_name, tcp))
        .await
        .map_err(|_| TlsError::DialTimeout)?
        .map_err(|e| TlsError::Handshake(e.to_string()))
}
