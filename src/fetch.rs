use reqwest::{
    blocking::Client,
    Certificate,
    Identity,
    StatusCode,
    Url,
};
use std::{
    fmt::Display,
    path::{
        Path,
        PathBuf,
    },
    time::Duration,
};
use tracing::debug;

/// HTTP Basic credentials.
#[derive(Clone, PartialEq, Eq, derive_more::Constructor)]
pub struct BasicAuth {
    pub user: String,
    pub password: String,
}

impl BasicAuth {
    /// Credentials are only sent when both the user and the password are non-empty.
    pub fn from_parts(user: Option<&str>, password: Option<&str>) -> Option<Self> {
        match (user, password) {
            (Some(user), Some(password)) if !user.is_empty() && !password.is_empty() => {
                Some(Self::new(user.into(), password.into()))
            }
            _ => None,
        }
    }
}

// Keep the password out of logs and panics
impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// How the server certificate is verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum TlsMode {
    /// The built-in root certificates, no client identity
    SystemRoots,
    /// No server certificate validation at all
    InsecureSkipVerify,
    /// Client identity and/or CA bundle loaded from files
    ExplicitMaterial,
}

/// The TLS material configured for the scrape.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsSettings {
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub cacert: Option<PathBuf>,
    pub insecure_skip_verify: bool,
}

impl TlsSettings {
    /// Explicit material takes precedence: as soon as any of `cert`, `key` or `cacert` is set,
    /// `insecure_skip_verify` is ignored.
    pub fn mode(&self) -> TlsMode {
        if self.cert.is_some() || self.key.is_some() || self.cacert.is_some() {
            TlsMode::ExplicitMaterial
        } else if self.insecure_skip_verify {
            TlsMode::InsecureSkipVerify
        } else {
            TlsMode::SystemRoots
        }
    }

    /// Load the client identity, if one is configured. Certificate and key go together.
    fn identity(&self) -> Result<Option<Identity>, FetchError> {
        match (self.cert.as_deref(), self.key.as_deref()) {
            (None, None) => Ok(None),
            (Some(_), None) => Err(FetchError::IncompleteKeyPair { missing: "key" }),
            (None, Some(_)) => Err(FetchError::IncompleteKeyPair { missing: "cert" }),
            (Some(cert), Some(key)) => {
                let mut pem = read_material(cert)?;
                pem.push(b'\n');
                pem.extend(read_material(key)?);
                let identity = Identity::from_pem(&pem).map_err(|e| FetchError::KeyPair {
                    cert: cert.into(),
                    key: key.into(),
                    reason: e.to_string(),
                })?;
                Ok(Some(identity))
            }
        }
    }

    /// Load the CA bundle, if one is configured.
    fn roots(&self) -> Result<Option<Vec<Certificate>>, FetchError> {
        let Some(cacert) = self.cacert.as_deref() else {
            return Ok(None);
        };
        let pem = read_material(cacert)?;
        let roots = Certificate::from_pem_bundle(&pem)
            .map_err(|e| FetchError::tls_material(cacert, e))?;
        if roots.is_empty() {
            return Err(FetchError::tls_material(cacert, "no certificates found"));
        }
        Ok(Some(roots))
    }
}

fn read_material(path: &Path) -> Result<Vec<u8>, FetchError> {
    std::fs::read(path).map_err(|e| FetchError::tls_material(path, e))
}

/// Everything needed to scrape the exporter once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSettings {
    pub url: String,
    pub basic_auth: Option<BasicAuth>,
    pub tls: TlsSettings,
    pub timeout: Duration,
}

/// The errors that can result from scraping the exporter.
#[derive(Debug)]
pub enum FetchError {
    /// The configured URL does not parse
    InvalidUrl { url: String, reason: String },
    /// A certificate, key or CA file could not be read or parsed
    TlsMaterial { path: PathBuf, reason: String },
    /// The client certificate and key do not form a usable identity
    KeyPair {
        cert: PathBuf,
        key: PathBuf,
        reason: String,
    },
    /// Only one half of the client certificate/key pair was configured
    IncompleteKeyPair { missing: &'static str },
    /// Building the client, connecting, or reading the response failed
    Transport(reqwest::Error),
    /// The exporter answered with something other than 200 OK
    UnexpectedStatus(String),
}

impl FetchError {
    fn tls_material(path: &Path, reason: impl Display) -> Self {
        Self::TlsMaterial {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// A short name for the failure, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidUrl { .. } => "config",
            Self::TlsMaterial { .. } | Self::KeyPair { .. } | Self::IncompleteKeyPair { .. } => {
                "tls"
            }
            Self::Transport(_) => "transport",
            Self::UnexpectedStatus(_) => "status",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(value)
    }
}

impl Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidUrl { url, reason } => write!(f, "invalid exporter url {url:?}: {reason}"),
            Self::TlsMaterial { path, reason } => {
                write!(f, "could not load {}: {reason}", path.display())
            }
            Self::KeyPair { cert, key, reason } => write!(
                f,
                "could not load certificate({}) or key({}): {reason}",
                cert.display(),
                key.display()
            ),
            Self::IncompleteKeyPair { missing } => write!(
                f,
                "a client certificate and key must be given together, {missing} is missing"
            ),
            Self::Transport(_) => f.write_str("request to the exporter failed"),
            Self::UnexpectedStatus(status) => {
                write!(f, "exporter returned non OK HTTP response status: {status}")
            }
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

/// Scrapes a single exporter endpoint with a blocking HTTP client.
#[derive(Debug)]
pub struct Fetcher {
    client: Client,
    url: Url,
    basic_auth: Option<BasicAuth>,
}

impl Fetcher {
    /// Build the client, loading any TLS material from disk.
    pub fn new(settings: &FetchSettings) -> Result<Self, FetchError> {
        let url = Url::parse(&settings.url).map_err(|e| FetchError::InvalidUrl {
            url: settings.url.clone(),
            reason: e.to_string(),
        })?;

        let mode = settings.tls.mode();
        debug!("Using TLS mode {mode}");
        let mut builder = Client::builder()
            .use_rustls_tls()
            .timeout(settings.timeout);
        match mode {
            TlsMode::SystemRoots => {}
            TlsMode::InsecureSkipVerify => {
                builder = builder.danger_accept_invalid_certs(true);
            }
            TlsMode::ExplicitMaterial => {
                if let Some(identity) = settings.tls.identity()? {
                    builder = builder.identity(identity);
                }
                if let Some(roots) = settings.tls.roots()? {
                    builder = builder.tls_built_in_root_certs(false);
                    for root in roots {
                        builder = builder.add_root_certificate(root);
                    }
                }
            }
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            url,
            basic_auth: settings.basic_auth.clone(),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Issue the GET request and return the whole body.
    ///
    /// The response is dropped, and its connection released, on every return path.
    pub fn fetch(&self) -> Result<Vec<u8>, FetchError> {
        debug!("Scraping {}", self.url);
        let mut request = self.client.get(self.url.clone());
        if let Some(auth) = &self.basic_auth {
            request = request.basic_auth(&auth.user, Some(&auth.password));
        }
        let response = request.send()?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::UnexpectedStatus(status.to_string()));
        }
        let body = response.bytes()?;
        debug!("Received {} bytes from {}", body.len(), self.url);
        Ok(body.to_vec())
    }
}
