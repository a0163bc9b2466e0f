use std::fmt;

use thiserror::Error;

/// Result type for supervisor operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur while configuring or running a supervised command
#[derive(Error, Debug)]
pub enum Error {
    /// The sandbox refused an operation the policy forbids
    #[error("security violation: {0}")]
    PolicyViolation(String),

    /// The child could not be started at all
    #[error("launch failed: {0}")]
    LaunchFailure(String),

    /// Backend-level error during execution not attributable to policy
    #[error("runtime failure: {0}")]
    RuntimeFailure(String),

    #[error("platform {platform} requires version {minimum}, found {current}")]
    UnsupportedPlatformVersion {
        platform: &'static str,
        minimum: &'static str,
        current: String,
    },

    #[error("sandbox not enforced: {0}")]
    NotEnforced(String),

    #[error("invalid sandbox profile: {0}")]
    InvalidProfile(String),

    #[error("network proxy error: {0}")]
    ProxyError(String),

    #[error("command is empty")]
    EmptyCommand,

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

/// Failure taxonomy used to decide how a failed run is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    PolicyViolation,
    LaunchFailure,
    RuntimeFailure,
    Unexpected,
}

impl Error {
    /// Classify this error into the failure taxonomy
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::PolicyViolation(_) => FailureKind::PolicyViolation,
            Self::LaunchFailure(_)
            | Self::UnsupportedPlatformVersion { .. }
            | Self::NotEnforced(_)
            | Self::InvalidProfile(_)
            | Self::EmptyCommand => FailureKind::LaunchFailure,
            Self::RuntimeFailure(_) | Self::ProxyError(_) => FailureKind::RuntimeFailure,
            Self::Unexpected(_) => FailureKind::Unexpected,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PolicyViolation => "policy violation",
            Self::LaunchFailure => "launch failure",
            Self::RuntimeFailure => "runtime failure",
            Self::Unexpected => "unexpected failure",
        })
    }
}
