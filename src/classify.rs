use std::process::ExitStatus;

use crate::config_loader::Markers;

/// Outcome of a single test command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Passed,
    Failed,
    /// Neither marker appeared in the output.
    Unrecognized,
}

impl Verdict {
    pub fn is_pass(self) -> bool {
        self == Verdict::Passed
    }
}

/// Scans captured output for the exit markers.
///
/// The failure marker is checked first, so output carrying both is a failure.
pub fn classify(output: &str, markers: &Markers) -> Verdict {
    if output.contains(markers.failure.as_str()) {
        Verdict::Failed
    } else if output.contains(markers.success.as_str()) {
        Verdict::Passed
    } else {
        Verdict::Unrecognized
    }
}

/// Maps the command's own exit status. Killed by a signal counts as failed.
pub fn classify_exit_status(status: ExitStatus) -> Verdict {
    match status.code() {
        Some(0) => Verdict::Passed,
        _ => Verdict::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_marker_passes() {
        let out = "+ cargo test\nrunning 3 tests\n+ exit 0\n";
        assert_eq!(classify(out, &Markers::default()), Verdict::Passed);
    }

    #[test]
    fn failure_marker_fails() {
        assert_eq!(classify("+ exit 1\n", &Markers::default()), Verdict::Failed);
    }

    #[test]
    fn failure_marker_wins_over_success_marker() {
        let out = "+ exit 0\nretrying\n+ exit 1\n";
        assert_eq!(classify(out, &Markers::default()), Verdict::Failed);
    }

    #[test]
    fn no_marker_is_unrecognized() {
        let v = classify("nothing relevant\n", &Markers::default());
        assert_eq!(v, Verdict::Unrecognized);
        assert!(!v.is_pass());
    }

    #[test]
    fn custom_markers() {
        let markers = Markers {
            success: "ALL GREEN".into(),
            failure: "FAILED".into(),
        };
        assert_eq!(classify("ALL GREEN", &markers), Verdict::Passed);
        assert_eq!(classify("+ exit 0", &markers), Verdict::Unrecognized);
    }

    #[cfg(unix)]
    #[test]
    fn exit_status_mapping() {
        use std::os::unix::process::ExitStatusExt;

        assert_eq!(classify_exit_status(ExitStatus::from_raw(0)), Verdict::Passed);
        // wait(2) encoding: exit code 3
        assert_eq!(classify_exit_status(ExitStatus::from_raw(3 << 8)), Verdict::Failed);
        // SIGKILL
        assert_eq!(classify_exit_status(ExitStatus::from_raw(9)), Verdict::Failed);
    }
}
