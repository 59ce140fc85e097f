use std::{
    fmt::Display,
    str::FromStr,
};

/// The label name that carries the metric name in Prometheus' data model.
const METRIC_NAME_LABEL: &str = "__name__";

/// A statically configured label forced into every sample.
///
/// Written on the command line as `name:value`. The text is split once on the first colon
/// and both sides are trimmed, so `env: prod` and `url:http://x` are both fine.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Constructor)]
pub struct LabelOverride {
    pub name: String,
    pub value: String,
}

impl FromStr for LabelOverride {
    type Err = LabelOverrideError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let Some((name, value)) = raw.split_once(':') else {
            return Err(LabelOverrideError::MissingSeparator(raw.into()));
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(LabelOverrideError::EmptyName(raw.into()));
        }
        if name == METRIC_NAME_LABEL {
            return Err(LabelOverrideError::ReservedName(raw.into()));
        }
        Ok(Self::new(name.into(), value.trim().into()))
    }
}

impl Display for LabelOverride {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.value)
    }
}

/// A label override that could not be parsed. Each variant carries the configured text.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum LabelOverrideError {
    #[display(fmt = "malformed label override {_0:?}: expected name:value")]
    MissingSeparator(String),
    #[display(fmt = "malformed label override {_0:?}: the label name is empty")]
    EmptyName(String),
    /// `__name__` holds the metric name itself, so overriding it would rename every metric.
    #[display(fmt = "malformed label override {_0:?}: the label name __name__ is reserved")]
    ReservedName(String),
}

impl std::error::Error for LabelOverrideError {}

/// Parse every configured override, failing on the first malformed one.
pub fn parse_overrides<I, S>(raw: I) -> Result<Vec<LabelOverride>, LabelOverrideError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .map(|label| label.as_ref().parse())
        .collect()
}
