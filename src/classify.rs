//! Turns a failed run into one diagnostic line and an exit outcome

use crate::command::Command;
use crate::error::{Error, FailureKind};
use crate::outcome::{Cause, ExitOutcome};

/// Exit code reported for every supervisor-level failure
pub const FAILURE_EXIT_CODE: i32 = 1;

/// Log the diagnostic for `error` and map it to an outcome
///
/// Policy violations are logged on the `muzzle::security` target so they can
/// be filtered apart from ordinary launch problems.
pub fn classify(error: &Error, command: &Command) -> ExitOutcome {
    let message = diagnostic(error, command);
    let kind = error.kind();

    let cause = match kind {
        FailureKind::PolicyViolation => {
            tracing::error!(target: "muzzle::security", "{message}");
            Cause::PolicyViolation
        }
        FailureKind::LaunchFailure => {
            tracing::error!("{message}");
            Cause::LaunchFailure
        }
        FailureKind::RuntimeFailure => {
            tracing::error!("{message}");
            Cause::RuntimeFailure
        }
        FailureKind::Unexpected => {
            tracing::error!("{message}");
            Cause::Unexpected
        }
    };

    ExitOutcome::new(FAILURE_EXIT_CODE, cause)
}

/// The single human-readable line describing `error`
pub fn diagnostic(error: &Error, command: &Command) -> String {
    match error.kind() {
        FailureKind::PolicyViolation => {
            format!("SECURITY VIOLATION while running {command}: {error}")
        }
        FailureKind::LaunchFailure => format!("failed to launch {command}: {error}"),
        FailureKind::RuntimeFailure => format!("execution of {command} failed: {error}"),
        FailureKind::Unexpected => format!("fatal error while running {command}: {error}"),
    }
}
