//! muzzle - run a CLI agent under a policy-enforcing native sandbox
//!
//! A single invocation resolves an [`ExecutionPolicy`], encodes it for the
//! host's isolation mechanism, supervises exactly one child process and
//! reports exactly one [`ExitOutcome`]:
//! - Linux: Landlock filesystem and TCP rules plus a seccomp filter
//! - macOS: `sandbox-exec` with a generated SBPL profile
//! - elsewhere: egress proxy advertised through the environment only
//!
//! Network egress is denied by default. Allowed domains are reachable only
//! through a local filtering proxy that records every refused destination.
//!
//! # Example
//!
//! ```rust,ignore
//! use muzzle::{Command, Environment, Sandbox, Supervisor, resolve};
//!
//! async fn run_agent() -> i32 {
//!     let cwd = std::env::current_dir().unwrap();
//!     let policy = resolve(["api.github.com"], false, cwd);
//!     let sandbox = Sandbox::configure(policy);
//!
//!     let outcome = Supervisor::new(Environment::inherit().ensure_shell())
//!         .sandbox(&sandbox)
//!         .run(&Command::for_agent("gemini", ["explain", "foo.py"]))
//!         .await;
//!     outcome.code()
//! }
//! ```
//!
//! # Failures
//!
//! Every error maps to a [`FailureKind`]. [`Supervisor::run`] never returns an
//! error: failures are classified into a single diagnostic line and exit code
//! 1, with policy violations logged on the `muzzle::security` target.

mod classify;
mod command;
mod env;
mod error;
mod network;
mod outcome;
mod platform;
mod policy;
mod sandbox;
mod signals;
mod stdio;
mod supervisor;

pub use classify::{FAILURE_EXIT_CODE, classify, diagnostic};
pub use command::{Command, DEFAULT_AGENT};
pub use env::Environment;
pub use error::{Error, FailureKind, Result};
pub use network::{EgressRule, EgressViolation, NetworkProxy, NetworkRules};
pub use outcome::{Cause, ExitOutcome};
pub use platform::BackendKind;
pub use policy::{
    BASELINE_DOMAINS, ExecutionPolicy, ExecutionPolicyBuilder, SCRATCH_PATHS, SYSTEM_PATHS,
    resolve,
};
pub use sandbox::{FilesystemRules, Sandbox};
pub use signals::{FORWARDED_SIGNALS, SignalForwarder};
pub use stdio::Sink;
pub use supervisor::{ChildState, Supervisor};
