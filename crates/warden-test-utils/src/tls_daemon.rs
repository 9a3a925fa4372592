// tls_daemon: a minimal TLS responder with a generated identity.
//
// The server presents [leaf, identity] the way the real daemon does: an
// Ed25519 self-signed identity root signing a host leaf.  Every connection
// gets the same canned envelope and is then closed, so pooling clients
// always re-handshake.

use std::net::SocketAddr;
use std::sync::Arc;

use data_encoding::BASE32_NOPAD;
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair, SanType};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use sha2::{Digest, Sha384};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

/// A generated daemon identity: Ed25519 identity root plus a `localhost`
/// leaf signed by it.
pub struct ServerIdentity {
    ca_cert_der: Vec<u8>,
    ca_cert_pem: String,
    ca_public_key_raw: Vec<u8>,
    leaf_cert_der: Vec<u8>,
    leaf_key_pkcs8: Vec<u8>,
}

impl ServerIdentity {
    pub fn generate() -> Self {
        let ca_key = KeyPair::generate_for(&rcgen::PKCS_ED25519).expect("generate identity key");
        let mut ca_params = CertificateParams::new(Vec::new()).expect("identity params");
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "wardend identity");
        let ca_cert = ca_params.self_signed(&ca_key).expect("self-sign identity");

        let leaf_key = KeyPair::generate().expect("generate leaf key");
        let mut leaf_params =
            CertificateParams::new(vec!["localhost".to_owned()]).expect("leaf params");
        leaf_params
            .subject_alt_names
            .push(SanType::IpAddress("127.0.0.1".parse().expect("ip")));
        let leaf_cert = leaf_params
            .signed_by(&leaf_key, &ca_cert, &ca_key)
            .expect("sign leaf");

        ServerIdentity {
            ca_cert_der: ca_cert.der().to_vec(),
            ca_cert_pem: ca_cert.pem(),
            ca_public_key_raw: ca_key.public_key_raw().to_vec(),
            leaf_cert_der: leaf_cert.der().to_vec(),
            leaf_key_pkcs8: leaf_key.serialize_der(),
        }
    }

    /// The identity fingerprint clients pin:
    /// `base32-no-pad(sha384(ed25519-public-key))`.
    pub fn fingerprint(&self) -> String {
        BASE32_NOPAD.encode(&Sha384::digest(&self.ca_public_key_raw))
    }

    /// DER of the identity certificate.
    pub fn identity_cert_der(&self) -> &[u8] {
        &self.ca_cert_der
    }

    /// PEM of the identity certificate, as written by pairing flows.
    pub fn identity_cert_pem(&self) -> &str {
        &self.ca_cert_pem
    }
}

/// A TLS listener that answers every request with one canned envelope.
pub struct MockTlsDaemon {
    addr: SocketAddr,
    _task: tokio::task::JoinHandle<()>,
}

impl MockTlsDaemon {
    /// Start on a random port, serving `envelope` to every request.
    pub async fn start(
        identity: &ServerIdentity,
        envelope: serde_json::Value,
    ) -> std::io::Result<Self> {
        let chain = vec![
            CertificateDer::from(identity.leaf_cert_der.clone()),
            CertificateDer::from(identity.ca_cert_der.clone()),
        ];
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(identity.leaf_key_pkcs8.clone()));
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut config = rustls::ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(std::io::Error::other)?
            .with_no_client_auth()
            .with_single_cert(chain, key)
            .map_err(std::io::Error::other)?;
        config.alpn_protocols = vec![b"http/1.1".to_vec()];
        let acceptor = TlsAcceptor::from(Arc::new(config));

        let body = serde_json::to_vec(&envelope)?;
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _peer)) = listener.accept().await else {
                    break;
                };
                let acceptor = acceptor.clone();
                let body = body.clone();
                tokio::spawn(async move {
                    let Ok(mut tls) = acceptor.accept(stream).await else {
                        return;
                    };
                    // Read the request head; the tests only send bodiless
                    // requests or small JSON bodies that fit one read burst.
                    let mut buf = vec![0u8; 16 * 1024];
                    let mut head = Vec::new();
                    loop {
                        match tls.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                head.extend_from_slice(&buf[..n]);
                                if head.windows(4).any(|w| w == b"\r\n\r\n") {
                                    break;
                                }
                            }
                        }
                    }
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\
                         Content-Length: {}\r\nConnection: close\r\n\r\n",
                        body.len()
                    );
                    let _ = tls.write_all(response.as_bytes()).await;
                    let _ = tls.write_all(&body).await;
                    let _ = tls.shutdown().await;
                });
            }
        });
        Ok(MockTlsDaemon { addr, _task: task })
    }

    /// `https://localhost:<port>` base URL for clients.
    pub fn base_url(&self) -> String {
        format!("https://localhost:{}", self.addr.port())
    }
}
