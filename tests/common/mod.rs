//! A throwaway HTTP responder for exercising the check against a real socket.
#![allow(dead_code)]

use prom_metrics_check::{
    FetchSettings,
    TlsSettings,
};
use rcgen::{
    BasicConstraints,
    CertificateParams,
    DistinguishedName,
    DnType,
    ExtendedKeyUsagePurpose,
    IsCa,
    KeyPair,
};
use rustls::{
    crypto::CryptoProvider,
    pki_types::{
        CertificateDer,
        PrivateKeyDer,
        PrivatePkcs8KeyDer,
    },
    server::WebPkiClientVerifier,
    RootCertStore,
    ServerConfig,
    ServerConnection,
    StreamOwned,
};
use std::{
    io::{
        self,
        Read,
        Write,
    },
    net::TcpListener,
    sync::Arc,
    thread::JoinHandle,
    time::Duration,
};
use tempfile::NamedTempFile;

/// A server that answers exactly one request with a canned response.
pub struct OneShotServer {
    pub url: String,
    handle: JoinHandle<io::Result<String>>,
}

impl OneShotServer {
    /// Start serving `body` over plain HTTP with the given status line, e.g. `200 OK`.
    pub fn start(status: &str, body: impl Into<Vec<u8>>) -> Self {
        Self::spawn("http", status, body.into(), None)
    }

    /// Start serving `body` over HTTPS with the given server configuration.
    pub fn start_tls(status: &str, body: impl Into<Vec<u8>>, config: Arc<ServerConfig>) -> Self {
        Self::spawn("https", status, body.into(), Some(config))
    }

    fn spawn(scheme: &str, status: &str, body: Vec<u8>, tls: Option<Arc<ServerConfig>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("{scheme}://{}/metrics", listener.local_addr().unwrap());
        let status = status.to_owned();
        let handle = std::thread::spawn(move || {
            let (stream, _) = listener.accept()?;
            stream.set_read_timeout(Some(Duration::from_secs(5)))?;
            match tls {
                None => answer(stream, &status, &body),
                Some(config) => {
                    let conn = ServerConnection::new(config).map_err(io::Error::other)?;
                    let mut stream = StreamOwned::new(conn, stream);
                    let request = answer(&mut stream, &status, &body)?;
                    stream.conn.send_close_notify();
                    stream.flush()?;
                    Ok(request)
                }
            }
        });
        Self { url, handle }
    }

    /// Wait for the request to be served and return the request head it received.
    pub fn request(self) -> String {
        self.handle.join().unwrap().unwrap()
    }
}

fn answer<S: Read + Write>(mut stream: S, status: &str, body: &[u8]) -> io::Result<String> {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        let read = stream.read(&mut buf)?;
        if read == 0 {
            break;
        }
        request.extend_from_slice(&buf[..read]);
    }

    let head = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(String::from_utf8_lossy(&request).into_owned())
}

/// A URL nothing listens on.
pub fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/metrics")
}

pub fn temp_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

pub fn settings(url: &str) -> FetchSettings {
    FetchSettings {
        url: url.into(),
        basic_auth: None,
        tls: TlsSettings::default(),
        timeout: Duration::from_secs(5),
    }
}

fn common_name(name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, name);
    dn
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// A certificate issued by a [`TestCa`], in PEM and DER form.
pub struct IssuedCert {
    pub cert_pem: String,
    pub key_pem: String,
    cert_der: CertificateDer<'static>,
    key_der: Vec<u8>,
}

impl IssuedCert {
    fn key(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key_der.clone()))
    }
}

/// A throwaway certificate authority.
pub struct TestCa {
    pub cert_pem: String,
    cert: rcgen::Certificate,
    key: KeyPair,
}

impl TestCa {
    pub fn new() -> Self {
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name = common_name("prom-metrics-check test ca");
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let key = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();
        Self {
            cert_pem: cert.pem(),
            cert,
            key,
        }
    }

    fn issue(&self, names: &[&str], usage: ExtendedKeyUsagePurpose) -> IssuedCert {
        let names: Vec<String> = names.iter().map(|name| name.to_string()).collect();
        let mut params = CertificateParams::new(names.clone()).unwrap();
        params.distinguished_name = common_name(&names[0]);
        params.extended_key_usages = vec![usage];
        let key = KeyPair::generate().unwrap();
        let cert = params.signed_by(&key, &self.cert, &self.key).unwrap();
        IssuedCert {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
            cert_der: cert.der().clone(),
            key_der: key.serialize_der(),
        }
    }

    /// A certificate valid for serving on `127.0.0.1` and `localhost`.
    pub fn server_cert(&self) -> IssuedCert {
        self.issue(&["127.0.0.1", "localhost"], ExtendedKeyUsagePurpose::ServerAuth)
    }

    /// A certificate for authenticating a client.
    pub fn client_cert(&self) -> IssuedCert {
        self.issue(&["prom-metrics-check"], ExtendedKeyUsagePurpose::ClientAuth)
    }

    /// A server configuration presenting `server`, without client authentication.
    pub fn server_config(&self, server: &IssuedCert) -> Arc<ServerConfig> {
        let config = ServerConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(vec![server.cert_der.clone()], server.key())
            .unwrap();
        Arc::new(config)
    }

    /// A server configuration presenting `server` and requiring a client certificate issued
    /// by this authority.
    pub fn mtls_server_config(&self, server: &IssuedCert) -> Arc<ServerConfig> {
        let mut roots = RootCertStore::empty();
        roots.add(self.cert.der().clone()).unwrap();
        let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider())
            .build()
            .unwrap();
        let config = ServerConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_client_cert_verifier(verifier)
            .with_single_cert(vec![server.cert_der.clone()], server.key())
            .unwrap();
        Arc::new(config)
    }
}
