use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::Context;
use log::{error, info};
use tokio::process::Command;

use crate::process_group::ProcessGroup;

/// A finished (or abandoned) test command.
#[derive(Debug)]
pub struct CapturedRun {
    pub output_file: PathBuf,
    /// `None` when the command was killed for running too long.
    pub status: Option<ExitStatus>,
}

impl CapturedRun {
    pub fn timed_out(&self) -> bool {
        self.status.is_none()
    }

    /// Reads the capture back. Invalid UTF-8 is replaced, not rejected.
    pub async fn read_output(&self) -> anyhow::Result<String> {
        let bytes = tokio::fs::read(&self.output_file)
            .await
            .with_context(|| format!("failed to read {}", self.output_file.display()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Runs `command` through `sh -c` with stdout and stderr sharing one file.
///
/// The file is truncated first. The command runs in its own process group,
/// which is killed before returning, so nothing it forked outlives the run.
/// With a `timeout`, the group is killed once it expires and the run reports
/// no exit status.
pub async fn run_test_command(
    command: &str,
    output_file: &Path,
    timeout: Option<Duration>,
) -> anyhow::Result<CapturedRun> {
    let out = File::create(output_file)
        .with_context(|| format!("failed to create {}", output_file.display()))?;
    let err = out.try_clone().context("failed to clone output handle")?;

    info!("Running test command: {}", command);
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::from(out))
        .stderr(Stdio::from(err))
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().context("failed to launch test command")?;
    let group = ProcessGroup::new(child.id());

    let status = match timeout {
        None => Some(child.wait().await.context("failed to wait for test command")?),
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => Some(status.context("failed to wait for test command")?),
            Err(_) => {
                error!("Test command exceeded {:?}, killing it", limit);
                if let Err(e) = group.kill() {
                    error!("Failed to kill test command's process group: {}", e);
                }
                if let Err(e) = child.kill().await {
                    error!("Failed to kill test command: {}", e);
                }
                None
            }
        },
    };

    if let Some(status) = status {
        info!("Test command finished ({})", status);
    }
    drop(group);
    Ok(CapturedRun {
        output_file: output_file.to_path_buf(),
        status,
    })
}
