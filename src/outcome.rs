use std::fmt;
use std::process::ExitStatus;

/// Why a supervised run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cause {
    /// The child exited on its own
    Normal,
    /// The child was killed by this signal
    SignalTerminated(i32),
    PolicyViolation,
    LaunchFailure,
    RuntimeFailure,
    Unexpected,
}

/// Exit code and cause of one supervised invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    code: i32,
    cause: Cause,
}

impl ExitOutcome {
    pub(crate) fn new(code: i32, cause: Cause) -> Self {
        Self { code, cause }
    }

    /// Translate a terminated child's status
    ///
    /// A child killed by a signal has no exit code; it maps to 0.
    pub fn from_status(status: ExitStatus) -> Self {
        match status.code() {
            Some(code) => Self::new(code, Cause::Normal),
            None => Self::new(0, Cause::SignalTerminated(terminating_signal(status))),
        }
    }

    /// Outcome of a child that exited on its own with `code`, or was killed by `signal`
    pub(crate) fn from_parts(code: Option<i32>, signal: Option<i32>) -> Self {
        match (code, signal) {
            (Some(code), _) => Self::new(code, Cause::Normal),
            (None, Some(signal)) => Self::new(0, Cause::SignalTerminated(signal)),
            (None, None) => Self::new(0, Cause::Normal),
        }
    }

    /// Process exit code to report
    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn cause(&self) -> Cause {
        self.cause
    }

    /// True when the child exited normally with code 0
    pub fn success(&self) -> bool {
        self.code == 0 && self.cause == Cause::Normal
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cause {
            Cause::Normal => write!(f, "exited with code {}", self.code),
            Cause::SignalTerminated(signal) => write!(f, "terminated by signal {signal}"),
            Cause::PolicyViolation => write!(f, "policy violation (exit {})", self.code),
            Cause::LaunchFailure => write!(f, "launch failure (exit {})", self.code),
            Cause::RuntimeFailure => write!(f, "runtime failure (exit {})", self.code),
            Cause::Unexpected => write!(f, "unexpected failure (exit {})", self.code),
        }
    }
}

#[cfg(unix)]
pub(crate) fn terminating_signal(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status.signal().unwrap_or(0)
}

#[cfg(not(unix))]
pub(crate) fn terminating_signal(_status: ExitStatus) -> i32 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_passes_through() {
        let outcome = ExitOutcome::from_parts(Some(7), None);
        assert_eq!(outcome.code(), 7);
        assert_eq!(outcome.cause(), Cause::Normal);
        assert!(!outcome.success());
    }

    #[test]
    fn test_signal_kill_maps_to_zero() {
        let outcome = ExitOutcome::from_parts(None, Some(15));
        assert_eq!(outcome.code(), 0);
        assert_eq!(outcome.cause(), Cause::SignalTerminated(15));
        assert!(!outcome.success());
    }

    #[cfg(unix)]
    #[test]
    fn test_from_status() {
        use std::os::unix::process::ExitStatusExt;

        // raw wait status: exit code in the high byte, signal in the low bits
        let exited = ExitOutcome::from_status(ExitStatus::from_raw(3 << 8));
        assert_eq!(exited, ExitOutcome::new(3, Cause::Normal));

        let killed = ExitOutcome::from_status(ExitStatus::from_raw(libc::SIGKILL));
        assert_eq!(killed, ExitOutcome::new(0, Cause::SignalTerminated(libc::SIGKILL)));
    }
}
