#![forbid(unsafe_code)]
//! A monitoring check for Prometheus exporters.
//!
//! A run scrapes a metrics endpoint ([`Fetcher`]), parses the body into metric families
//! ([`Scrape`]), flattens those into [`Sample`]s with the configured [`LabelOverride`]s merged
//! in ([`extract_samples`]), and prints one line per sample ([`write_samples`]).
//!
//! The Prometheus exposition format is taken from here:
//! <https://prometheus.io/docs/instrumenting/exposition_formats/>
use derive_more::Constructor;

pub use check::{
    report_failure,
    Check,
};
pub use config::{
    CheckArgs,
    CheckSettings,
    DEFAULT_TIMEOUT_SECS,
    DEFAULT_URL,
};
pub use error::CheckError;
pub use fetch::{
    BasicAuth,
    FetchError,
    FetchSettings,
    Fetcher,
    TlsMode,
    TlsSettings,
};
pub use overrides::{
    parse_overrides,
    LabelOverride,
    LabelOverrideError,
};
pub use parser::{
    parse_scrape,
    ExpositionError,
    MetricError,
};
pub use report::{
    error_chain,
    write_failure,
    write_samples,
    CheckState,
};
pub use sample::{
    extract_samples,
    LabelSet,
    Sample,
};

mod check;
mod config;
mod error;
mod fetch;
mod overrides;
mod parser;
mod report;
mod sample;

/// The possible types of Prometheus metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::EnumString, strum::Display)]
#[strum(ascii_case_insensitive)]
#[strum(serialize_all = "snake_case")]
pub enum Type {
    Counter,
    Gauge,
    #[default]
    Untyped,
    Summary,
    Histogram,
}

/// A single label in a sample line.
///
/// Example:
/// ```text
/// name="a"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Constructor)]
pub struct Label {
    /// Label key
    pub key: String,
    /// Label value, unquoted and with its escape sequences decoded
    pub value: String,
}

/// The labels of a sample line, in the order they were written.
///
/// Example:
/// ```text
/// {name="a",id="1",type="x"}
/// ```
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Default,
    derive_more::Deref,
    derive_more::DerefMut,
    derive_more::From,
)]
#[repr(transparent)]
pub struct Labels(Vec<Label>);

impl Labels {
    /// The value of the label named `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|label| label.key == key)
            .map(|label| label.value.as_str())
    }

    /// The first label name that appears more than once, if any.
    pub fn duplicate_key(&self) -> Option<&str> {
        self.0.iter().enumerate().find_map(|(idx, label)| {
            self.0[..idx]
                .iter()
                .any(|prev| prev.key == label.key)
                .then_some(label.key.as_str())
        })
    }
}

/// The role of a sample line within its metric family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Sample,
    // The following three are only relevant for Summary, Histogram
    Bucket,
    Sum,
    Count,
}

/// One sample line of a metric family.
#[derive(Debug, Clone, PartialEq, Constructor)]
pub struct FamilySample {
    /// The name exactly as written on the line, including any `_bucket`, `_sum` or `_count`
    /// suffix.
    pub name: String,
    pub labels: Labels,
    pub value_type: ValueType,
    /// Float as represented by Go's ParseFloat(), so NaN, +Inf and -Inf are valid values.
    pub value: f64,
    /// The timestamp is an int64 (milliseconds since epoch, i.e. 1970-01-01 00:00:00 UTC,
    /// excluding leap seconds), if the line carried one.
    pub timestamp: Option<i64>,
}

/// A metric family.
///
/// An example:
/// ```text
/// # this does not include health checks
/// # HELP http_requests_total The total number of HTTP requests.
/// # TYPE http_requests_total counter
/// http_requests_total{method="post",code="200"} 1027 1395066363000
/// http_requests_total{method="post",code="400"}    3 1395066363000
/// ```
/// Or
/// ```text
/// # HELP rpc_duration_seconds A summary of the RPC duration in seconds.
/// # TYPE rpc_duration_seconds summary
/// rpc_duration_seconds{quantile="0.01"} 3102
/// rpc_duration_seconds{quantile="0.99"} 76656
/// rpc_duration_seconds_sum 1.7560473e+07
/// rpc_duration_seconds_count 2693
/// ```
#[derive(Debug, Clone, PartialEq, Constructor)]
pub struct MetricFamily {
    pub kind: Type,
    /// The text of the HELP line for the family, if there was one
    pub help_desc: Option<String>,
    /// The name of the family, excluding any suffix.
    pub name: String,
    /// The sample lines, in the order they appeared. May be empty when the exporter only
    /// declared the family.
    pub samples: Vec<FamilySample>,
}

/// A single scrape, parsed into its metric families.
///
/// NOTES:
/// The parsing is not lossless. Comments (excluding TYPE, HELP comments) and empty lines
/// are discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct Scrape {
    /// The families, in the order they were first encountered.
    pub families: Vec<MetricFamily>,
}

impl Scrape {
    pub fn parse(data: &str) -> Result<Self, ExpositionError> {
        let (families, maybe_error) = parse_scrape(data);
        match maybe_error {
            Some(error) => Err(error),
            None => Ok(Self { families }),
        }
    }

    /// Parse a raw response body, which must be UTF-8.
    pub fn from_bytes(body: &[u8]) -> Result<Self, ExpositionError> {
        let data = std::str::from_utf8(body)?;
        Self::parse(data)
    }

    /// The number of sample lines across all families.
    pub fn sample_count(&self) -> usize {
        self.families.iter().map(|family| family.samples.len()).sum()
    }
}
