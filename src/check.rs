use super::{
    extract_samples,
    write_failure,
    write_samples,
    CheckError,
    CheckSettings,
    CheckState,
    Fetcher,
    LabelOverride,
    Sample,
    Scrape,
};
use chrono::Utc;
use std::io::Write;
use tracing::{
    info,
    warn,
};

/// One configured check: a scrape target and the labels to merge into its samples.
#[derive(Debug)]
pub struct Check {
    fetcher: Fetcher,
    overrides: Vec<LabelOverride>,
}

impl Check {
    /// Build the check. TLS material is loaded here, so unreadable files fail before any
    /// request is made.
    pub fn from_settings(settings: CheckSettings) -> Result<Self, CheckError> {
        let fetcher = Fetcher::new(&settings.fetch)?;
        Ok(Self {
            fetcher,
            overrides: settings.overrides,
        })
    }

    /// Scrape the exporter and return its samples, in exposition order.
    pub fn run(&self) -> Result<Vec<Sample>, CheckError> {
        let body = self.fetcher.fetch()?;
        let scrape = Scrape::from_bytes(&body)?;
        info!(
            "Scraped {} families with {} samples from {}",
            scrape.families.len(),
            scrape.sample_count(),
            self.fetcher.url()
        );
        let ingest_timestamp = Utc::now().timestamp_millis();
        Ok(extract_samples(
            scrape.families,
            &self.overrides,
            ingest_timestamp,
        ))
    }

    /// Run the check and report the outcome to `out`.
    ///
    /// Any sample count, including zero, is OK. Every failure is UNKNOWN.
    pub fn execute<W: Write>(&self, out: &mut W) -> CheckState {
        let samples = match self.run() {
            Ok(samples) => samples,
            Err(error) => return report_failure(out, &error),
        };
        match write_samples(out, &samples) {
            Ok(()) => CheckState::Ok,
            Err(error) => {
                warn!("Failed to write the samples: {error}");
                CheckState::Unknown
            }
        }
    }
}

/// Log the failure, report it to `out`, and return the UNKNOWN state.
pub fn report_failure<W: Write>(out: &mut W, error: &CheckError) -> CheckState {
    warn!(kind = error.kind(), "Check failed: {error}");
    if let Err(write_error) = write_failure(out, error) {
        warn!("Failed to write the failure report: {write_error}");
    }
    CheckState::Unknown
}
