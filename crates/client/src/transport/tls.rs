// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TLS layering for `ssl://` URIs.
//!
//! The handshake runs to completion inside [`wrap`], during connect. A
//! lazy first-I/O handshake interacts badly with the inactivity
//! monitor's read timing, so it is deliberately not offered.

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::crypto::{ring, verify_tls12_signature, verify_tls13_signature};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{self, ClientConfig, DigitallySignedStruct, RootCertStore};
use tokio_rustls::TlsConnector;

use crate::error::{Error, Result};
use crate::transport::tcp::AsyncStream;
use crate::uri::TransportOptions;

/// Upgrade a TCP stream to TLS, completing the handshake before
/// returning.
pub async fn wrap(
    stream: TcpStream,
    host: &str,
    options: &TransportOptions,
) -> Result<Box<dyn AsyncStream>> {
    let config = client_config(options)?;
    let connector = TlsConnector::from(Arc::new(config));
    let server_name = ServerName::try_from(host.to_owned())
        .map_err(|_| Error::illegal_state(format!("{host:?} is not a valid tls server name")))?;

    let tls = connector
        .connect(server_name, stream)
        .await
        .map_err(|error| Error::io(format!("tls handshake with {host} failed: {error}")))?;
    Ok(Box::new(tls))
}

fn client_config(options: &TransportOptions) -> Result<ClientConfig> {
    if options.disable_peer_verification || !options.verify_host_name {
        // Peer verification explicitly waived by configuration
        // (`socket.disablePeerVerification` / `transport.verifyHostName`).
        let config = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(InsecureVerifier))
            .with_no_client_auth();
        return Ok(config);
    }

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    Ok(ClientConfig::builder().with_root_certificates(roots).with_no_client_auth())
}

/// Accepts any certificate chain; signature checks still run.
#[derive(Debug)]
struct InsecureVerifier;

impl ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &ring::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &ring::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        ring::default_provider().signature_verification_algorithms.supported_schemes()
    }
}
