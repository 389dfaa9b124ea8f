use std::io;

use log::debug;

/// A child spawned as leader of its own process group (`process_group(0)`).
///
/// Dropping it kills the whole group, so anything the child forked goes
/// down with it. Killing a group that is already gone is not an error.
#[derive(Debug)]
pub struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    pub fn new(leader_pid: Option<u32>) -> Self {
        Self { pgid: leader_pid }
    }

    /// SIGKILL to every member of the group.
    #[cfg(unix)]
    pub fn kill(&self) -> io::Result<()> {
        let Some(pgid) = self.pgid else {
            return Ok(());
        };
        let rc = unsafe { libc::kill(-(pgid as libc::pid_t), libc::SIGKILL) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            Ok(())
        } else {
            Err(err)
        }
    }

    #[cfg(not(unix))]
    pub fn kill(&self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if let Err(e) = self.kill() {
            debug!("Failed to kill process group {:?}: {}", self.pgid, e);
        }
    }
}
