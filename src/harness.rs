use std::io::ErrorKind;
use std::path::Path;
use std::process::ExitCode;

use log::{debug, error, info, warn};

use crate::capture::{run_test_command, CapturedRun};
use crate::classify::{classify, classify_exit_status, Verdict};
use crate::config_loader::{HarnessConfig, StatusSource};
use crate::readiness::wait_until_ready;
use crate::server::ServerProcess;

pub const SUCCESS_MESSAGE: &str = "TEST COMMAND SUCCESSFUL";
pub const UNRECOGNIZED_MESSAGE: &str = "Failed to get sensible output";

/// The harness's only output: 0 or 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarnessStatus {
    Success,
    Failure,
}

impl HarnessStatus {
    pub fn code(self) -> u8 {
        match self {
            HarnessStatus::Success => 0,
            HarnessStatus::Failure => 1,
        }
    }
}

impl From<Verdict> for HarnessStatus {
    fn from(verdict: Verdict) -> Self {
        if verdict.is_pass() {
            HarnessStatus::Success
        } else {
            HarnessStatus::Failure
        }
    }
}

impl From<HarnessStatus> for ExitCode {
    fn from(status: HarnessStatus) -> Self {
        ExitCode::from(status.code())
    }
}

/// Best-effort delete. A missing file is the normal case.
pub fn remove_config_artifact(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed stale config {}", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove {}: {}", path.display(), e),
    }
}

/// One full harness pass: clean up, start the server, wait for it, run the
/// test command, classify, stop the server.
///
/// A server that fails to launch or never becomes ready is logged, not
/// fatal: the test command still runs and its result alone decides the
/// status. The server is stopped on every path that returns; dropping the
/// future mid-run kills it as well.
pub async fn run(config: &HarnessConfig, test_command: &str) -> HarnessStatus {
    remove_config_artifact(&config.config_artifact);

    let mut server = match ServerProcess::spawn(&config.server) {
        Ok(server) => Some(server),
        Err(e) => {
            warn!("{:#}", e);
            None
        }
    };

    match server.as_mut() {
        Some(server) => {
            if let Err(e) = wait_until_ready(&config.readiness, Some(&mut *server)).await {
                warn!("Server (pid {:?}) not ready: {:#}", server.pid(), e);
            }
        }
        None => warn!("No server running, skipping readiness wait"),
    }

    let verdict = match run_test_command(test_command, &config.output_file, config.command_timeout()).await {
        Ok(run) => judge(config, &run).await,
        Err(e) => {
            error!("{:#}", e);
            Verdict::Failed
        }
    };

    if let Some(server) = server {
        server.terminate().await;
    }

    report(verdict);
    HarnessStatus::from(verdict)
}

async fn judge(config: &HarnessConfig, run: &CapturedRun) -> Verdict {
    if run.timed_out() {
        return Verdict::Failed;
    }
    match config.status_source {
        StatusSource::ExitCode => run.status.map_or(Verdict::Failed, classify_exit_status),
        StatusSource::Markers => match run.read_output().await {
            Ok(output) => classify(&output, &config.markers),
            Err(e) => {
                error!("{:#}", e);
                Verdict::Unrecognized
            }
        },
    }
}

fn report(verdict: Verdict) {
    match verdict {
        Verdict::Passed => println!("{}", SUCCESS_MESSAGE),
        Verdict::Failed => info!("Test command failed"),
        Verdict::Unrecognized => println!("{}", UNRECOGNIZED_MESSAGE),
    }
}
