use clap::Parser;
use prom_metrics_check::{
    report_failure,
    Check,
    CheckArgs,
};
use std::{
    io::IsTerminal,
    process::ExitCode,
};
use tracing_subscriber::{
    fmt::MakeWriter,
    util::SubscriberInitExt,
    EnvFilter,
};

const DEFAULT_LOG_FILTER: &str = "warn,prom_metrics_check=info";

/// Diagnostics go to stderr, stdout is reserved for the check output.
fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let ansi = std::io::stderr().is_terminal();
    log_subscriber(filter, std::io::stderr, ansi).init();
}

/// Colours only when a person is watching, agents capture the raw text.
fn log_subscriber<W>(
    filter: EnvFilter,
    writer: W,
    ansi: bool,
) -> impl tracing::Subscriber + Send + Sync + 'static
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi)
        .finish()
}

fn main() -> ExitCode {
    init_logging();

    let args = match CheckArgs::try_parse() {
        Ok(args) => args,
        Err(error) => {
            let _ = error.print();
            return ExitCode::from(CheckArgs::argument_error_state(&error).exit_code());
        }
    };

    let mut stdout = std::io::stdout().lock();
    let state = match args.validate().and_then(Check::from_settings) {
        Ok(check) => check.execute(&mut stdout),
        Err(error) => report_failure(&mut stdout, &error),
    };
    ExitCode::from(state.exit_code())
}
