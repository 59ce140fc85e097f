use super::{
    parse_overrides,
    BasicAuth,
    CheckError,
    CheckState,
    FetchSettings,
    LabelOverride,
    TlsSettings,
};
use clap::{
    error::ErrorKind,
    Parser,
};
use std::{
    path::PathBuf,
    time::Duration,
};

pub const DEFAULT_URL: &str = "http://localhost:8405/metrics";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Check metrics from Prometheus
#[derive(Debug, Clone, Parser)]
#[command(name = "prom-metrics-check", version)]
pub struct CheckArgs {
    /// URL to the Prometheus metrics
    #[arg(long, default_value = DEFAULT_URL)]
    pub url: String,

    /// Label to add to every metric, as name:value. May be repeated
    #[arg(long = "label", value_name = "NAME:VALUE")]
    pub labels: Vec<String>,

    /// User for basic auth
    #[arg(long, env = "PROMETHEUS_METRICS_USER")]
    pub user: Option<String>,

    /// Password for basic auth
    #[arg(long, env = "PROMETHEUS_METRICS_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Cert to use for mTLS
    #[arg(long)]
    pub cert: Option<String>,

    /// Key to use for mTLS
    #[arg(long)]
    pub key: Option<String>,

    /// CA cert to use for mTLS
    #[arg(long)]
    pub cacert: Option<String>,

    /// Skip server certificate verification, for self signed certs. Ignored when any of
    /// --cert, --key or --cacert is given
    #[arg(long = "insecureskipverify")]
    pub insecure_skip_verify: bool,

    /// Request timeout
    #[arg(
        long,
        value_name = "SECONDS",
        default_value_t = DEFAULT_TIMEOUT_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub timeout: u64,
}

/// The validated configuration of a check run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckSettings {
    pub fetch: FetchSettings,
    pub overrides: Vec<LabelOverride>,
}

/// An empty path is the same as no path, as agents often template unset options to "".
fn non_empty(path: Option<String>) -> Option<PathBuf> {
    path.filter(|p| !p.is_empty()).map(PathBuf::from)
}

impl CheckArgs {
    /// The state a run ends in when its command line does not parse. Printing the help or
    /// the version is not a failure.
    pub fn argument_error_state(error: &clap::Error) -> CheckState {
        match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => CheckState::Ok,
            _ => CheckState::Unknown,
        }
    }

    /// Turn the raw arguments into settings, failing on the first malformed label override.
    pub fn validate(self) -> Result<CheckSettings, CheckError> {
        let overrides = parse_overrides(&self.labels)?;
        let basic_auth = BasicAuth::from_parts(self.user.as_deref(), self.password.as_deref());
        let tls = TlsSettings {
            cert: non_empty(self.cert),
            key: non_empty(self.key),
            cacert: non_empty(self.cacert),
            insecure_skip_verify: self.insecure_skip_verify,
        };
        let fetch = FetchSettings {
            url: self.url,
            basic_auth,
            tls,
            timeout: Duration::from_secs(self.timeout),
        };
        Ok(CheckSettings { fetch, overrides })
    }
}
