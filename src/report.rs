use super::Sample;
use std::{
    error::Error,
    io::Write,
};

/// The check result, using the exit codes monitoring agents expect.
///
/// A run only ever ends in `Ok` or `Unknown`. `Warning` and `Critical` complete the agent's
/// exit code convention and have no threshold logic behind them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum CheckState {
    Ok,
    Warning,
    Critical,
    Unknown,
}

impl CheckState {
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::Warning => 1,
            Self::Critical => 2,
            Self::Unknown => 3,
        }
    }
}

/// Write one line per sample.
pub fn write_samples<W: Write>(out: &mut W, samples: &[Sample]) -> std::io::Result<()> {
    for sample in samples {
        writeln!(out, "{sample}")?;
    }
    out.flush()
}

/// The error message followed by all of its sources, separated by `": "`.
pub fn error_chain(error: &dyn Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Write the single line reported for a failed run.
pub fn write_failure<W: Write>(out: &mut W, error: &dyn Error) -> std::io::Result<()> {
    writeln!(out, "Failed: {}", error_chain(error))?;
    out.flush()
}
