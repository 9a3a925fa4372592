//! Pinning-based TLS trust for the network carrier.
//!
//! The daemon serves a leaf certificate plus a self-signed Ed25519 identity
//! root.  Standard PKI chain building against public roots is deliberately
//! disabled; the verifier accepts the server in exactly one of three ways,
//! evaluated in order: fingerprint pinning, identity-certificate pinning, or
//! an explicit insecure opt-in (the precondition for pairing).

use std::sync::{Arc, Mutex};

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use sha2::{Digest, Sha384};
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::Config;
use crate::error::ClientError;

/// How the server's identity is pinned.
#[derive(Debug)]
enum TrustMode {
    /// `base32-no-pad(sha384(ed25519-public-key))` of the identity cert.
    Fingerprint(String),
    /// The identity certificate itself (DER) as the sole trust root.
    IdentityCert(Vec<u8>),
    /// Accept anything; only for pairing.
    Insecure,
}

/// Shared TLS state for one carrier: the rustls connector, the SNI name, and
/// the identity certificate observed during the latest handshake.
pub(crate) struct TlsContext {
    connector: tokio_rustls::TlsConnector,
    server_name: ServerName<'static>,
    seen_identity: Arc<Mutex<Option<Vec<u8>>>>,
}

impl TlsContext {
    /// Build the pinning configuration from the client config.  Fails with
    /// "cannot verify server" when no trust material was supplied.
    pub(crate) fn new(host: &str, config: &Config) -> Result<Self, ClientError> {
        let mode = if let Some(fingerprint) = &config.fingerprint {
            TrustMode::Fingerprint(fingerprint.clone())
        } else if let Some(pem) = &config.identity_cert_pem {
            TrustMode::IdentityCert(identity_der_from_pem(pem)?)
        } else if config.insecure {
            TrustMode::Insecure
        } else {
            return Err(ClientError::RequestBuild(
                "cannot verify server: set a fingerprint, an identity certificate, \
                 or the insecure flag"
                    .to_owned(),
            ));
        };

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let seen_identity = Arc::new(Mutex::new(None));
        let verifier = Arc::new(PinVerifier {
            mode,
            provider: provider.clone(),
            seen: seen_identity.clone(),
        });
        let mut tls_config = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| ClientError::RequestBuild(format!("TLS configuration: {e}")))?
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth();
        tls_config.alpn_protocols = vec![b"http/1.1".to_vec()];

        let server_name = ServerName::try_from(host.to_owned())
            .map_err(|e| ClientError::RequestBuild(format!("invalid TLS host {host:?}: {e}")))?;

        Ok(TlsContext {
            connector: tokio_rustls::TlsConnector::from(Arc::new(tls_config)),
            server_name,
            seen_identity,
        })
    }

    pub(crate) async fn connect(
        &self,
        stream: TcpStream,
    ) -> std::io::Result<tokio_rustls::client::TlsStream<TcpStream>> {
        self.connector
            .connect(self.server_name.clone(), stream)
            .await
    }

    /// DER of the identity certificate from the latest handshake, if any.
    pub(crate) fn seen_identity(&self) -> Option<Vec<u8>> {
        self.seen_identity
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

// ---------------------------------------------------------------------------
// Verifier
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct PinVerifier {
    mode: TrustMode,
    provider: Arc<CryptoProvider>,
    seen: Arc<Mutex<Option<Vec<u8>>>>,
}

impl PinVerifier {
    /// Verify the leaf against a trust root holding only `identity`.
    fn verify_leaf_against_identity(
        &self,
        identity: CertificateDer<'static>,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let mut roots = RootCertStore::empty();
        roots.add(identity).map_err(|e| {
            rustls::Error::General(format!("cannot use identity certificate as trust root: {e}"))
        })?;
        let verifier =
            WebPkiServerVerifier::builder_with_provider(Arc::new(roots), self.provider.clone())
                .build()
                .map_err(|e| {
                    rustls::Error::General(format!("cannot build identity verifier: {e}"))
                })?;
        verifier.verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
    }
}

impl ServerCertVerifier for PinVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        // The identity root rides last in the presented chain; a bare chain
        // means the leaf doubles as its own identity.
        let identity = intermediates.last().unwrap_or(end_entity);
        *self.seen.lock().unwrap_or_else(|e| e.into_inner()) = Some(identity.as_ref().to_vec());

        match &self.mode {
            TrustMode::Insecure => {
                debug!("accepting server certificate without verification");
                Ok(ServerCertVerified::assertion())
            }
            TrustMode::Fingerprint(want) => {
                let got = identity_fingerprint(identity.as_ref())
                    .map_err(rustls::Error::General)?;
                if got != *want {
                    return Err(rustls::Error::General(
                        "server fingerprint mismatch".to_owned(),
                    ));
                }
                self.verify_leaf_against_identity(
                    identity.clone().into_owned(),
                    end_entity,
                    intermediates,
                    server_name,
                    ocsp_response,
                    now,
                )
            }
            TrustMode::IdentityCert(der) => self.verify_leaf_against_identity(
                CertificateDer::from(der.clone()),
                end_entity,
                intermediates,
                server_name,
                ocsp_response,
                now,
            ),
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

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

// ---------------------------------------------------------------------------
// Fingerprints
// ---------------------------------------------------------------------------

/// Compute the identity fingerprint of a certificate:
/// `base32-no-pad(sha384(ed25519-public-key))`.  Rejects certificates whose
/// subject public key is not Ed25519.
pub(crate) fn identity_fingerprint(der: &[u8]) -> Result<String, String> {
    let (_, cert) = x509_parser::parse_x509_certificate(der)
        .map_err(|e| format!("cannot parse identity certificate: {e}"))?;
    let spki = cert.public_key();
    if spki.algorithm.algorithm != x509_parser::oid_registry::OID_SIG_ED25519 {
        return Err("identity certificate must carry an Ed25519 public key".to_owned());
    }
    let digest = Sha384::digest(&spki.subject_public_key.data);
    Ok(data_encoding::BASE32_NOPAD.encode(&digest))
}

fn identity_der_from_pem(pem: &[u8]) -> Result<Vec<u8>, ClientError> {
    let (_, parsed) = x509_parser::pem::parse_x509_pem(pem).map_err(|e| {
        ClientError::RequestBuild(format!("cannot parse identity certificate PEM: {e}"))
    })?;
    // Require Ed25519 up front so a misconfigured pin fails at construction
    // rather than on the first handshake.
    identity_fingerprint(&parsed.contents).map_err(ClientError::RequestBuild)?;
    Ok(parsed.contents)
}
