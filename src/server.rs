use std::fs::OpenOptions;
use std::process::{ExitStatus, Stdio};

use anyhow::Context;
use log::{info, warn};
use tokio::process::{Child, Command};

use crate::config_loader::ServerConfig;
use crate::process_group::ProcessGroup;

/// The server under test. Owns the child process and its process group.
///
/// The whole group is killed on drop, so every exit path out of a harness run
/// releases it, including errors and cancellation, and a wrapper script takes
/// the real server down with it. `terminate` is the orderly path.
pub struct ServerProcess {
    child: Child,
    pid: Option<u32>,
    group: ProcessGroup,
}

impl ServerProcess {
    pub fn spawn(cfg: &ServerConfig) -> anyhow::Result<Self> {
        let mut cmd = Command::new(&cfg.program);
        cmd.args(&cfg.args).stdin(Stdio::null()).kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        if let Some(log_path) = &cfg.log_file {
            let log = OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)
                .with_context(|| format!("failed to open server log {}", log_path.display()))?;
            let log_err = log.try_clone().context("failed to clone server log handle")?;
            cmd.stdout(Stdio::from(log)).stderr(Stdio::from(log_err));
        }

        let child = cmd
            .spawn()
            .with_context(|| format!("failed to launch server {}", cfg.program.display()))?;
        let pid = child.id();
        info!(
            "Started server {} (pid {})",
            cfg.program.display(),
            pid.map_or_else(|| "?".to_string(), |p| p.to_string())
        );

        Ok(Self {
            child,
            pid,
            group: ProcessGroup::new(pid),
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// `Some(status)` once the server has exited on its own.
    pub fn try_exited(&mut self) -> anyhow::Result<Option<ExitStatus>> {
        self.child
            .try_wait()
            .context("failed to poll server process")
    }

    /// Kills the server's process group and reaps the server. Failures are
    /// logged, never returned.
    pub async fn terminate(mut self) {
        match self.child.try_wait() {
            Ok(Some(status)) => {
                // Leftovers in the group still go when `self` drops.
                warn!("Server had already exited ({})", status);
                return;
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to poll server process: {}", e),
        }

        if let Err(e) = self.group.kill() {
            warn!("Failed to signal server group (pid {:?}): {}", self.pid, e);
        }
        if let Err(e) = self.child.start_kill() {
            warn!("Failed to signal server (pid {:?}): {}", self.pid, e);
            return;
        }
        match self.child.wait().await {
            Ok(status) => info!("Server stopped ({})", status),
            Err(e) => warn!("Failed to reap server (pid {:?}): {}", self.pid, e),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};

    fn sleeper() -> ServerConfig {
        ServerConfig {
            program: PathBuf::from("sleep"),
            args: vec!["30".into()],
            log_file: None,
        }
    }

    fn alive(pid: u32) -> bool {
        Path::new(&format!("/proc/{}", pid)).exists()
    }

    #[tokio::test]
    async fn terminate_stops_the_server() {
        let mut server = ServerProcess::spawn(&sleeper()).unwrap();
        let pid = server.pid().unwrap();
        assert!(server.try_exited().unwrap().is_none());

        server.terminate().await;
        assert!(!alive(pid));
    }

    #[tokio::test]
    async fn drop_kills_the_server() {
        let server = ServerProcess::spawn(&sleeper()).unwrap();
        let pid = server.pid().unwrap();
        drop(server);

        // The kill is sent on drop; reaping happens in the background.
        for _ in 0..100 {
            if gone_or_zombie(pid) {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("server pid {} still running after drop", pid);
    }

    fn gone_or_zombie(pid: u32) -> bool {
        let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).unwrap_or_default();
        stat.is_empty() || stat.contains(") Z")
    }

    async fn read_pid(path: &Path) -> u32 {
        for _ in 0..100 {
            if let Ok(s) = std::fs::read_to_string(path) {
                if let Ok(pid) = s.trim().parse() {
                    return pid;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("no pid written to {}", path.display());
    }

    #[tokio::test]
    async fn terminate_stops_servers_behind_a_wrapper_script() {
        let dir = tempfile::tempdir().unwrap();
        let pidfile = dir.path().join("real-server.pid");
        let cfg = ServerConfig {
            program: PathBuf::from("sh"),
            args: vec![
                "-c".into(),
                format!("sleep 30 & echo $! > '{}'; wait", pidfile.display()),
            ],
            log_file: None,
        };

        let server = ServerProcess::spawn(&cfg).unwrap();
        let real = read_pid(&pidfile).await;
        server.terminate().await;

        for _ in 0..100 {
            if gone_or_zombie(real) {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("wrapped server pid {} outlived terminate", real);
    }

    #[tokio::test]
    async fn missing_program_is_an_error() {
        let cfg = ServerConfig {
            program: PathBuf::from("./definitely-not-a-server"),
            args: vec![],
            log_file: None,
        };
        assert!(ServerProcess::spawn(&cfg).is_err());
    }

    #[tokio::test]
    async fn server_output_goes_to_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("server.log");
        let cfg = ServerConfig {
            program: PathBuf::from("sh"),
            args: vec!["-c".into(), "echo listening; echo oops >&2".into()],
            log_file: Some(log.clone()),
        };

        let mut server = ServerProcess::spawn(&cfg).unwrap();
        for _ in 0..100 {
            if server.try_exited().unwrap().is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        server.terminate().await;

        let contents = std::fs::read_to_string(&log).unwrap();
        assert!(contents.contains("listening"));
        assert!(contents.contains("oops"));
    }
}
