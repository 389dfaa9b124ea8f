mod capture;
mod classify;
mod config_loader;
mod harness;
mod logger;
mod process_group;
mod readiness;
mod server;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use crate::config_loader::StatusSource;
use crate::harness::HarnessStatus;

/// Start the REST server, run one test command against it, report pass/fail.
#[derive(Debug, Parser)]
#[command(name = "rest-harness", version)]
struct Cli {
    /// YAML config. Defaults to ./harness.yml when present.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Where the test command's combined output is captured.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// How the test command's result is decided.
    #[arg(long, value_enum)]
    status_source: Option<StatusSource>,

    /// Shell command to run once the server is up.
    command: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    logger::init_logger();
    let cli = Cli::parse();

    let mut config = match config_loader::load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{:#}", e);
            return HarnessStatus::Failure.into();
        }
    };
    if let Some(output) = cli.output {
        config.output_file = output;
    }
    if let Some(source) = cli.status_source {
        config.status_source = source;
    }

    // Losing the race drops the run, and the server with it.
    let status = tokio::select! {
        status = harness::run(&config, &cli.command) => status,
        _ = tokio::signal::ctrl_c() => {
            log::warn!("Interrupted, stopping server");
            HarnessStatus::Failure
        }
    };

    status.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn cli_parses_overrides() {
        let cli = Cli::try_parse_from([
            "rest-harness",
            "--config",
            "ci.yml",
            "-o",
            "out.log",
            "--status-source",
            "exit-code",
            "make test",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("ci.yml")));
        assert_eq!(cli.output, Some(PathBuf::from("out.log")));
        assert_eq!(cli.status_source, Some(StatusSource::ExitCode));
        assert_eq!(cli.command, "make test");
    }

    #[test]
    fn cli_requires_a_command() {
        assert!(Cli::try_parse_from(["rest-harness"]).is_err());
    }
}
