use super::{
    Labels,
    LabelOverride,
    MetricFamily,
};
use std::{
    collections::BTreeMap,
    fmt::Display,
};

/// The label set of a flattened sample. Keys are unique and kept sorted.
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
pub struct LabelSet(BTreeMap<String, String>);

impl From<Labels> for LabelSet {
    fn from(labels: Labels) -> Self {
        let Labels(labels) = labels;
        Self(
            labels
                .into_iter()
                .map(|label| (label.key, label.value))
                .collect(),
        )
    }
}

impl Display for LabelSet {
    /// Print the label set in its canonical form, sorted by key.
    /// Example:
    /// ```text
    /// {env="prod", instance="a"}
    /// ```
    ///
    /// NOTES:
    /// * An empty set prints nothing.
    /// * Values are quoted and escaped.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            return Ok(());
        }
        f.write_str("{")?;
        for (idx, (key, value)) in self.0.iter().enumerate() {
            if idx != 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}={value:?}")?;
        }
        f.write_str("}")
    }
}

/// A single metric observation, flattened out of its family.
#[derive(Debug, Clone, PartialEq, derive_more::Constructor)]
pub struct Sample {
    /// The name as written on the sample line, suffix included
    pub name: String,
    pub labels: LabelSet,
    pub value: f64,
    /// Milliseconds since epoch
    pub timestamp: i64,
}

impl Sample {
    /// Set every override on the labels, replacing a scraped value with the same name.
    pub fn apply_overrides(&mut self, overrides: &[LabelOverride]) {
        for label in overrides {
            self.labels.insert(label.name.clone(), label.value.clone());
        }
    }

    /// The metric identity, i.e. the name followed by the canonical label set.
    pub fn identity(&self) -> String {
        format!("{}{}", self.name, self.labels)
    }
}

/// Prints a float the way the exposition format spells the special values.
struct SampleValue(f64);

impl Display for SampleValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = self.0;
        if value.is_nan() {
            f.write_str("NaN")
        } else if value.is_infinite() {
            f.write_str(if value.is_sign_positive() { "+Inf" } else { "-Inf" })
        } else {
            write!(f, "{value}")
        }
    }
}

impl Display for Sample {
    /// Print the sample as a report line
    /// Example:
    /// ```text
    /// foo{env="prod", instance="a"} 1 1395066363000
    /// ```
    ///
    /// NOTES:
    /// * New line is not added.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{} {} {}",
            self.name,
            self.labels,
            SampleValue(self.value),
            self.timestamp
        )
    }
}

/// Flatten the families into one sample per sample line, keeping family order and line order.
///
/// Lines without an inline timestamp get `ingest_timestamp`. When `overrides` is not empty,
/// every override is set on every sample.
pub fn extract_samples(
    families: Vec<MetricFamily>,
    overrides: &[LabelOverride],
    ingest_timestamp: i64,
) -> Vec<Sample> {
    let mut samples = Vec::with_capacity(families.iter().map(|f| f.samples.len()).sum());
    for family in families {
        for line in family.samples {
            let timestamp = line.timestamp.unwrap_or(ingest_timestamp);
            let mut sample = Sample::new(line.name, line.labels.into(), line.value, timestamp);
            if !overrides.is_empty() {
                sample.apply_overrides(overrides);
            }
            samples.push(sample);
        }
    }
    samples
}

#[cfg(test)]
mod tests {
    use super::{
        extract_samples,
        LabelSet,
        Sample,
    };
    use crate::{
        tests::{
            count_sample_lines,
            init_test_logging,
            EXAMPLE_01,
            NODE_EXPORTER_01,
        },
        LabelOverride,
        Scrape,
    };
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::collections::BTreeMap;

    const INGEST: i64 = 1_700_000_000_000;

    fn overrides(raw: &[&str]) -> Vec<LabelOverride> {
        raw.iter().map(|r| r.parse().unwrap()).collect()
    }

    fn label_set(pairs: &[(&str, &str)]) -> LabelSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>()
            .into()
    }

    #[test]
    fn test_gauge_with_override() {
        init_test_logging();

        let data = "# TYPE foo gauge\nfoo{instance=\"a\"} 1\nfoo{instance=\"b\"} 2\n";
        let scrape = Scrape::parse(data).unwrap();
        let samples = extract_samples(scrape.families, &overrides(&["env:prod"]), INGEST);
        assert_eq!(
            samples,
            vec![
                Sample::new(
                    "foo".into(),
                    label_set(&[("instance", "a"), ("env", "prod")]),
                    1.0,
                    INGEST
                ),
                Sample::new(
                    "foo".into(),
                    label_set(&[("instance", "b"), ("env", "prod")]),
                    2.0,
                    INGEST
                ),
            ]
        );
    }

    #[rstest]
    fn test_one_sample_per_line(#[values(EXAMPLE_01, NODE_EXPORTER_01)] data: &str) {
        init_test_logging();

        let scrape = Scrape::parse(data).unwrap();
        let samples = extract_samples(scrape.families, &[], INGEST);
        assert_eq!(samples.len(), count_sample_lines(data));
    }

    #[rstest]
    fn test_overrides_win(#[values(EXAMPLE_01, NODE_EXPORTER_01)] data: &str) {
        init_test_logging();

        let configured = overrides(&["le:overridden", "cpu:all", "source: node "]);
        let scrape = Scrape::parse(data).unwrap();
        let samples = extract_samples(scrape.families, &configured, INGEST);
        for sample in &samples {
            for label in &configured {
                assert_eq!(sample.labels.get(&label.name), Some(&label.value));
            }
        }
    }

    #[test]
    fn test_no_overrides_is_identity() {
        init_test_logging();

        let scrape = Scrape::parse(EXAMPLE_01).unwrap();
        let expected: Vec<LabelSet> = scrape
            .families
            .iter()
            .flat_map(|family| family.samples.iter())
            .map(|line| line.labels.clone().into())
            .collect();
        let samples = extract_samples(scrape.families, &[], INGEST);
        let found: Vec<LabelSet> = samples.into_iter().map(|s| s.labels).collect();
        assert_eq!(found, expected);
    }

    #[test]
    fn test_order_and_names() {
        init_test_logging();

        let scrape = Scrape::parse(EXAMPLE_01).unwrap();
        let samples = extract_samples(scrape.families, &[], INGEST);
        assert_eq!(samples[0].name, "http_requests_total");
        assert_eq!(samples[5].name, "http_request_duration_seconds_bucket");
        assert_eq!(samples[12].name, "http_request_duration_seconds_count");
        assert_eq!(samples[19].name, "rpc_duration_seconds_count");
    }

    #[test]
    fn test_inline_timestamp_is_kept() {
        init_test_logging();

        let scrape = Scrape::parse(EXAMPLE_01).unwrap();
        let samples = extract_samples(scrape.families, &[], INGEST);
        assert_eq!(samples[0].timestamp, 1395066363000);
        assert_eq!(samples[2].timestamp, INGEST);
        assert_eq!(samples[4].timestamp, -3982045);
    }

    #[test]
    fn test_display() {
        init_test_logging();

        let data = r#"
up 1
http_requests_total{method="post",code="200"} 1027 1395066363000
msdos_file_access_time_seconds{error="Cannot find file:\n\"FILE.TXT\""} 1.458255915e9
something_weird{problem="division by zero"} +Inf
negative -Inf
missing NaN
"#;
        let scrape = Scrape::parse(data).unwrap();
        let samples = extract_samples(scrape.families, &overrides(&["env:prod"]), INGEST);
        let lines: Vec<String> = samples.iter().map(|s| s.to_string()).collect();
        assert_eq!(
            lines,
            [
                r#"up{env="prod"} 1 1700000000000"#,
                r#"http_requests_total{code="200", env="prod", method="post"} 1027 1395066363000"#,
                r#"msdos_file_access_time_seconds{env="prod", error="Cannot find file:\n\"FILE.TXT\""} 1458255915 1700000000000"#,
                r#"something_weird{env="prod", problem="division by zero"} +Inf 1700000000000"#,
                r#"negative{env="prod"} -Inf 1700000000000"#,
                r#"missing{env="prod"} NaN 1700000000000"#,
            ]
        );
    }

    #[test]
    fn test_identity_without_labels() {
        let sample = Sample::new("up".into(), LabelSet::default(), 0.5, INGEST);
        assert_eq!(sample.identity(), "up");
        assert_eq!(sample.to_string(), "up 0.5 1700000000000");
    }
}
