use super::{
    ExpositionError,
    FetchError,
    LabelOverrideError,
};

/// Any failure of a check run. All of them end the run in the UNKNOWN state.
#[derive(Debug, derive_more::Display, derive_more::From)]
pub enum CheckError {
    /// The configuration is invalid
    #[display(fmt = "{_0}")]
    Config(LabelOverrideError),
    /// The exporter could not be scraped
    #[display(fmt = "{_0}")]
    Fetch(FetchError),
    /// The scrape is not valid exposition format
    #[display(fmt = "{_0}")]
    Exposition(ExpositionError),
}

impl CheckError {
    /// A short name for the failure, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Fetch(e) => e.kind(),
            Self::Exposition(_) => "parse",
        }
    }
}

// Display already shows the wrapped error, so the chain continues from its source.
impl std::error::Error for CheckError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => e.source(),
            Self::Fetch(e) => e.source(),
            Self::Exposition(e) => e.source(),
        }
    }
}
