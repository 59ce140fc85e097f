use super::{
    FamilySample,
    Label,
    Labels,
    MetricFamily,
    Type,
    ValueType,
};
use std::{
    collections::HashMap,
    fmt::Display,
    str::Utf8Error,
};
use tracing::debug;
use winnow::{
    ascii::{
        digit1,
        escaped_transform,
        newline,
        space0,
        space1,
        Caseless,
    },
    combinator::{
        alt,
        cut_err,
        delimited,
        eof,
        not,
        opt,
        preceded,
        repeat,
        separated,
        terminated,
    },
    error::{
        ContextError,
        ParseError,
    },
    stream::{
        Accumulate,
        AsBStr,
        AsChar,
    },
    token::{
        one_of,
        tag,
        take_till,
        take_while,
    },
    PResult,
    Parser,
};

/// Parse a valid prometheus `metric_name` or `label_name`.
fn name_parser(input: &mut &str) -> PResult<String> {
    let start_group = ('a'..='z', 'A'..='Z', '_', ':');
    let rest_group = ('a'..='z', 'A'..='Z', '0'..='9', '_', ':');
    (one_of(start_group), take_while(0.., rest_group))
        .map(|(ch, rest)| format!("{ch}{rest}"))
        .parse_next(input)
}

/// Parse a valid prometheus label value, decoding the `\\`, `\"` and `\n` escapes.
///
/// Examples:
///
/// * `"Test"`
/// * `"Some value"`
/// * `"C:\\DIR\\FILE.TXT"`
fn parse_label_value(input: &mut &str) -> PResult<String> {
    let unescaped = escaped_transform(
        take_till(1.., ['"', '\\', '\n']),
        '\\',
        alt(("\\".value("\\"), "\"".value("\""), "n".value("\n"))),
    );
    preceded('"', cut_err(terminated(unescaped, '"'))).parse_next(input)
}

/// Parse a Prometheus label key value pair.
///
/// Examples:
///
/// * `key1="value1"`
/// * `key = "value"`
/// * `key= "val"`
fn label_key_value_parser(input: &mut &str) -> PResult<(String, String)> {
    let key = name_parser.parse_next(input)?;
    let _ = (space0, '=', space0).parse_next(input)?;
    let val = parse_label_value.parse_next(input)?;
    Ok((key, val))
}

// Enable us to parse the collection of key value pairs into the `Labels` structure
impl Accumulate<(String, String)> for Labels {
    fn initial(capacity: Option<usize>) -> Self {
        Vec::with_capacity(capacity.unwrap_or(4)).into()
    }

    fn accumulate(&mut self, acc: (String, String)) {
        self.push(Label::new(acc.0, acc.1));
    }
}

/// Parses a list of labels delimited by braces. The list may be empty and may end with a
/// trailing comma.
///
/// Examples:
/// * `{key1="value1",key2="value2"}`
/// * `{key1="value1", key2 = "value2",}`
/// * `{ key1="value1", key2 = "value2" }`
/// * `{}`
fn labels_parser(input: &mut &str) -> PResult<Labels> {
    let separator = (space0, ',', space0);
    let list = separated(0.., label_key_value_parser, separator);
    let start_delimiter = ('{', space0);
    let end_delimiter = (space0, opt(','), space0, '}');
    let mut labels = delimited(start_delimiter, list, end_delimiter);
    labels.parse_next(input)
}

/// Parse a valid Prometheus float value (+Inf, -Inf, NaN, ...)
fn float_value_parser(input: &mut &str) -> PResult<f64> {
    let number = (
        opt(one_of(['+', '-'])),
        alt((
            (digit1, opt(('.', opt(digit1)))).map(|_| ()),
            ('.', digit1).map(|_| ()),
        )),
        opt((one_of(['e', 'E']), opt(one_of(['+', '-'])), cut_err(digit1))),
    )
        .recognize();
    let nan = tag(Caseless("nan"));
    let inf = alt((tag(Caseless("inf")), tag(Caseless("+inf"))));
    let neg_inf = tag(Caseless("-inf"));
    alt((number, nan, inf, neg_inf))
        .parse_to()
        .parse_next(input)
}

/// Parse a valid Prometheus int value
fn int_value_parser(input: &mut &str) -> PResult<i64> {
    let prefix = opt(one_of(['+', '-']));
    (prefix, digit1).recognize().parse_to().parse_next(input)
}

/// Validate that the next character is either a new line or an EoF, returning an error if not
fn new_line_or_eof_parser(input: &mut &str) -> PResult<()> {
    alt((eof.map(|_| ()), newline.map(|_| ()))).parse_next(input)
}

/// Parse the rest of line until either EoF or NewLine (Parsing & ignoring the newline character)
fn rest_of_the_line_parser<'a>(input: &mut &'a str) -> PResult<&'a str> {
    let rest = preceded(space0, take_till(0.., AsChar::is_newline)).parse_next(input)?;
    new_line_or_eof_parser.parse_next(input)?;
    Ok(rest)
}

/// The five possible types of lines in the Prometheus exposition format
#[derive(Debug, Clone)]
enum Line {
    Empty,
    Comment(String),
    Help {
        name: String,
        desc: String,
    },
    Type {
        name: String,
        kind: Type,
    },
    Sample {
        name: String,
        labels: Labels,
        value: f64,
        timestamp: Option<i64>,
    },
}

/// Parse a Prometheus comment line.
///
/// A comment is anything that starts with #.
///
/// Example:
/// * `# This is a comment`
/// * `#`
fn comment_line_parser(input: &mut &str) -> PResult<Line> {
    preceded((space0, '#'), rest_of_the_line_parser)
        .map(|v| Line::Comment(v.into()))
        .parse_next(input)
}

/// Parse the `# <keyword> <name>` head of a HELP or TYPE line, leaving the input at the start
/// of the text after the name.
///
/// A line that ends right after the name, trailing blanks included, is a plain comment.
fn metadata_head<'a>(keyword: &'static str) -> impl Parser<&'a str, String, ContextError> {
    let ignored = (space0, '#', space0, tag(keyword), space1);
    delimited(ignored, name_parser, (space1, not(new_line_or_eof_parser)))
}

/// Parse a Prometheus HELP line.
///
/// A HELP line is a comment that starts with #, followed by "HELP", followed by the name of
/// the metric, followed by its description.
///
/// Example:
/// * `# HELP http_request_duration_seconds A histogram of the request duration.`
fn help_line_parser(input: &mut &str) -> PResult<Line> {
    let name = metadata_head("HELP").parse_next(input)?;
    let desc = rest_of_the_line_parser.parse_next(input)?;
    Ok(Line::Help {
        name,
        desc: desc.into(),
    })
}

/// Parse a Prometheus TYPE line.
///
/// A TYPE line is a comment that starts with #, followed by "TYPE", followed by the name of
/// the metric, followed by its type - one of (counter, gauge, untyped, summary, histogram).
/// Once the name and something after it are read, an unknown type is a hard error rather
/// than a plain comment.
///
/// Example:
/// * `# TYPE http_request_duration_seconds histogram`
fn type_line_parser(input: &mut &str) -> PResult<Line> {
    let name = metadata_head("TYPE").parse_next(input)?;
    let kind = cut_err(
        rest_of_the_line_parser.try_map(|kind: &str| kind.trim_end().parse::<Type>()),
    )
    .parse_next(input)?;
    Ok(Line::Type { name, kind })
}

/// Parse a Prometheus sample line.
///
/// Examples:
/// * `data_sent:bytes{th_id="worker_0",type="duplex"} 1395`
/// * `metric_without_timestamp_and_labels 12.47`
/// * `metric_without_timestamp_and_labels 12.47 -1`
/// * `http_request_duration_seconds_count 144320`
fn sample_line_parser(input: &mut &str) -> PResult<Line> {
    let name = preceded(space0, name_parser).parse_next(input)?;
    // Parse the labels, if they exist, otherwise return an empty Vec.
    let labels = preceded(space0, opt(labels_parser))
        .parse_next(input)?
        .unwrap_or_default();
    let value = preceded(space0, float_value_parser).parse_next(input)?;
    let timestamp = preceded(space0, opt(int_value_parser)).parse_next(input)?;
    // Expect the line to end after
    (space0, new_line_or_eof_parser).parse_next(input)?;
    Ok(Line::Sample {
        name,
        labels,
        value,
        timestamp,
    })
}

/// Parse an empty line, or trailing whitespace at the end of the input.
fn empty_line_parser(input: &mut &str) -> PResult<Line> {
    alt(((space0, newline).map(|_| ()), (space1, eof).map(|_| ())))
        .map(|_| Line::Empty)
        .parse_next(input)
}

/// Parse a single line of a scrape.
fn metric_line_parser(input: &mut &str) -> PResult<Line> {
    alt((
        help_line_parser,
        type_line_parser,
        comment_line_parser,
        sample_line_parser,
        empty_line_parser,
    ))
    .parse_next(input)
}

/// Parse a complete scrape into its low level composing lines.
///
/// Every element of the result stands for exactly one line of the input, so the line
/// number of an element is its index plus one. An empty input yields no lines.
fn scrape_lines_parser(input: &mut &str) -> PResult<Vec<Line>> {
    repeat(0.., metric_line_parser).parse_next(input)
}

/// The errors that can result from failure to parse a scrape.
#[derive(Debug, Clone, derive_more::From)]
pub enum ExpositionError {
    /// The body is not UTF-8 text
    Encoding(Utf8Error),
    /// Error occurred at the line parsing stage
    Parse(String),
    /// Failed to group some lines into metric families
    Collect(Vec<MetricError>),
}

impl<I, E> From<ParseError<I, E>> for ExpositionError
where
    I: AsBStr,
    E: std::fmt::Display,
{
    fn from(value: ParseError<I, E>) -> Self {
        Self::Parse(value.to_string())
    }
}

impl Display for ExpositionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encoding(error) => write!(f, "scrape body is not valid UTF-8: {error}"),
            Self::Parse(error) => write!(f, "invalid exposition format: {error}"),
            Self::Collect(errors) => {
                f.write_str("invalid exposition format: ")?;
                for (idx, error) in errors.iter().enumerate() {
                    if idx != 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{error}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ExpositionError {}

/// A failure to place a line into a metric family.
/// Composed of the line the error occurred and the error message.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Constructor, derive_more::Display)]
#[display(fmt = "line {line_no}: {reason}")]
pub struct MetricError {
    /// The 1-based line number where the error occurred
    pub line_no: usize,
    /// The error string
    pub reason: String,
}

/// A family being assembled, and whether its TYPE line was seen yet.
#[derive(Debug)]
struct PendingFamily {
    family: MetricFamily,
    typed: bool,
}

/// Groups scrape lines into metric families.
///
/// Families keep the order in which they were first mentioned, and sample lines keep their
/// order within a family. A sample line joins the family of the previous line when its name
/// matches it (directly, or through a histogram/summary suffix), otherwise the family it
/// names, which is created as untyped if it was not declared.
#[derive(Debug, Default)]
struct FamilyAssembler {
    pending: Vec<PendingFamily>,
    by_name: HashMap<String, usize>,
    current: Option<usize>,
    errors: Vec<MetricError>,
}

impl FamilyAssembler {
    /// The index of the family named `name`, creating an untyped one if needed.
    fn family_index(&mut self, name: &str) -> usize {
        if let Some(&idx) = self.by_name.get(name) {
            return idx;
        }
        let idx = self.pending.len();
        let family = MetricFamily::new(Type::default(), None, name.into(), Vec::new());
        self.pending.push(PendingFamily {
            family,
            typed: false,
        });
        self.by_name.insert(name.into(), idx);
        idx
    }

    fn fail(&mut self, line_no: usize, reason: String) {
        debug!("Line {line_no} rejected: {reason}");
        self.errors.push(MetricError::new(line_no, reason));
    }

    /// Find the family a sample line belongs to, and the role of the line in it.
    fn resolve(&mut self, name: &str) -> (usize, ValueType) {
        if let Some(idx) = self.current {
            if let Some(value_type) = classify(&self.pending[idx].family, name) {
                return (idx, value_type);
            }
        }
        for suffix in ["_bucket", "_sum", "_count"] {
            let Some(base) = name.strip_suffix(suffix) else {
                continue;
            };
            if let Some(&idx) = self.by_name.get(base) {
                if let Some(value_type) = classify(&self.pending[idx].family, name) {
                    return (idx, value_type);
                }
            }
        }
        (self.family_index(name), ValueType::Sample)
    }

    fn push(&mut self, line_no: usize, line: Line) {
        match line {
            Line::Empty | Line::Comment(_) => {}
            Line::Help { name, desc } => {
                let idx = self.family_index(&name);
                self.current = Some(idx);
                let family = &mut self.pending[idx].family;
                if family.help_desc.is_some() {
                    let reason = format!("Metric {name} HELP section appeared multiple times");
                    self.fail(line_no, reason);
                } else {
                    family.help_desc = Some(desc);
                }
            }
            Line::Type { name, kind } => {
                let idx = self.family_index(&name);
                self.current = Some(idx);
                let pending = &mut self.pending[idx];
                if pending.typed {
                    let reason = format!("Metric {name} TYPE section appeared multiple times");
                    self.fail(line_no, reason);
                } else if !pending.family.samples.is_empty() {
                    let reason = format!("Metric {name} TYPE section appeared after its samples");
                    self.fail(line_no, reason);
                } else {
                    pending.typed = true;
                    pending.family.kind = kind;
                }
            }
            Line::Sample {
                name,
                labels,
                value,
                timestamp,
            } => {
                let (idx, value_type) = self.resolve(&name);
                self.current = Some(idx);
                let kind = self.pending[idx].family.kind;
                match check_sample(kind, value_type, &name, &labels) {
                    Ok(()) => {
                        let sample = FamilySample::new(name, labels, value_type, value, timestamp);
                        self.pending[idx].family.samples.push(sample);
                    }
                    Err(reason) => self.fail(line_no, reason),
                }
            }
        }
    }

    fn finish(self) -> (Vec<MetricFamily>, Vec<MetricError>) {
        let families = self
            .pending
            .into_iter()
            .map(|pending| pending.family)
            .collect();
        (families, self.errors)
    }
}

/// The role of the sample line `name` in `family`, or `None` when it belongs elsewhere.
fn classify(family: &MetricFamily, name: &str) -> Option<ValueType> {
    if name == family.name {
        return Some(ValueType::Sample);
    }
    let suffix = name.strip_prefix(family.name.as_str())?;
    match (family.kind, suffix) {
        (Type::Histogram, "_bucket") => Some(ValueType::Bucket),
        (Type::Histogram | Type::Summary, "_sum") => Some(ValueType::Sum),
        (Type::Histogram | Type::Summary, "_count") => Some(ValueType::Count),
        _ => None,
    }
}

/// Validate the labels of a sample line against the family it was placed in.
fn check_sample(
    kind: Type,
    value_type: ValueType,
    name: &str,
    labels: &Labels,
) -> Result<(), String> {
    if let Some(key) = labels.duplicate_key() {
        return Err(format!("Metric {name} has duplicate label name {key}"));
    }
    match (kind, value_type) {
        (Type::Histogram, ValueType::Sample) => Err(format!(
            "Metric {name} is a histogram sample without a _bucket, _sum or _count suffix"
        )),
        (Type::Histogram, ValueType::Bucket) if labels.get("le").is_none() => {
            Err(format!("Metric {name} is a histogram bucket without a le label"))
        }
        (Type::Summary, ValueType::Sample) if labels.get("quantile").is_none() => {
            Err(format!("Metric {name} is a summary quantile without a quantile label"))
        }
        _ => Ok(()),
    }
}

/// The standalone function to parse a text of a scrape into its metric families and errors.
/// It is used by `Scrape::parse` to parse a scrape and error on the presence of any error.
/// The stages:
/// * Parses each line in the scrape into a valid Prometheus line.
/// * Groups the lines into metric families.
pub fn parse_scrape(input: &str) -> (Vec<MetricFamily>, Option<ExpositionError>) {
    let lines = match scrape_lines_parser.parse(input) {
        Ok(lines) => lines,
        Err(e) => return (Vec::new(), Some(e.into())),
    };
    let mut assembler = FamilyAssembler::default();
    for (idx, line) in lines.into_iter().enumerate() {
        assembler.push(idx + 1, line);
    }
    let (families, errors) = assembler.finish();
    let maybe_error = (!errors.is_empty()).then_some(errors.into());
    (families, maybe_error)
}
