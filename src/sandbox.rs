//! Translates an [`ExecutionPolicy`] into the host's isolation mechanism and
//! runs commands under it

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::command::Command;
use crate::env::Environment;
use crate::error::{Error, Result};
use crate::network::{NetworkProxy, NetworkRules};
use crate::outcome::ExitOutcome;
use crate::platform::{self, BackendKind, LaunchPlan};
use crate::policy::ExecutionPolicy;
use crate::stdio::Sink;
use crate::supervisor;

/// Variables pointing proxy-aware programs at the egress proxy
const PROXY_VARS: &[&str] = &[
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "ALL_PROXY",
    "http_proxy",
    "https_proxy",
    "all_proxy",
];

/// Removed so no destination can bypass the proxy
const NO_PROXY_VARS: &[&str] = &["NO_PROXY", "no_proxy"];

/// Filesystem visibility granted to the child
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilesystemRules {
    /// Full visibility
    Unrestricted,
    /// Only these paths (and what lies beneath them) are visible
    AllowList {
        writable: Vec<PathBuf>,
        readable: Vec<PathBuf>,
    },
}

impl FilesystemRules {
    pub fn from_policy(policy: &ExecutionPolicy) -> Self {
        if !policy.restrict_filesystem() {
            return Self::Unrestricted;
        }
        let (writable, readable) = policy
            .filesystem_allow_list()
            .iter()
            .cloned()
            .partition(|path| policy.is_writable(path));
        Self::AllowList { writable, readable }
    }

    /// Whether `program` lies inside the visible part of the filesystem
    pub fn permits_exec(&self, program: &Path) -> bool {
        let Self::AllowList { writable, readable } = self else {
            return true;
        };
        let canonical = program
            .canonicalize()
            .unwrap_or_else(|_| program.to_path_buf());

        writable.iter().chain(readable).any(|entry| {
            program.starts_with(entry)
                || canonical.starts_with(entry)
                || entry
                    .canonicalize()
                    .is_ok_and(|entry| canonical.starts_with(entry))
        })
    }
}

/// A configured sandbox: policy plus the backend that enforces it
///
/// Configuration is pure. The backend is probed when a command runs, so a
/// host without kernel support fails at launch rather than at configuration.
#[derive(Debug, Clone)]
pub struct Sandbox {
    policy: Arc<ExecutionPolicy>,
    kind: BackendKind,
    network: NetworkRules,
    filesystem: FilesystemRules,
}

impl Sandbox {
    /// Encode `policy` for the platform's native backend
    pub fn configure(policy: impl Into<Arc<ExecutionPolicy>>) -> Self {
        Self::with_backend(policy, BackendKind::native())
    }

    pub(crate) fn with_backend(policy: impl Into<Arc<ExecutionPolicy>>, kind: BackendKind) -> Self {
        let policy = policy.into();
        let network = NetworkRules::from_policy(&policy);
        let filesystem = FilesystemRules::from_policy(&policy);

        tracing::debug!(
            backend = %kind,
            domains = policy.allowed_domains().len(),
            restrict_fs = policy.restrict_filesystem(),
            "sandbox: configured"
        );

        Self {
            policy,
            kind,
            network,
            filesystem,
        }
    }

    pub fn backend(&self) -> BackendKind {
        self.kind
    }

    pub fn network_rules(&self) -> &NetworkRules {
        &self.network
    }

    pub fn filesystem_rules(&self) -> &FilesystemRules {
        &self.filesystem
    }

    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    /// Whether egress must be routed through the filtering proxy
    ///
    /// Kernel backends block all TCP themselves when nothing is allowed; the
    /// fallback has only the proxy to refuse with.
    fn needs_proxy(&self) -> bool {
        if self.network.allows_all() {
            return false;
        }
        !self.network.blocks_all() || self.kind == BackendKind::ProxyOnly
    }

    /// Run `command` under this sandbox
    ///
    /// Denied egress only fails the run when the command itself failed; a
    /// command that succeeded anyway keeps its status and the denials are
    /// logged as security warnings.
    pub async fn run(
        &self,
        command: &Command,
        env: &Environment,
        stdout: Sink,
        stderr: Sink,
    ) -> Result<ExitOutcome> {
        let working_dir = self.policy.working_directory();
        let program = supervisor::resolve_executable(command, env, working_dir)?;

        if !self.filesystem.permits_exec(&program) {
            return Err(Error::PolicyViolation(format!(
                "execution of {} denied by filesystem policy",
                program.display()
            )));
        }

        let backend = platform::create_backend(self.kind)?;

        let mut proxy = if self.needs_proxy() {
            Some(NetworkProxy::start(self.network.clone())?)
        } else {
            None
        };

        let env = match &proxy {
            Some(proxy) => with_proxy_env(env, &proxy.proxy_url()),
            None => env.clone(),
        };

        let plan = LaunchPlan {
            program: &program,
            argv0: command.program(),
            args: command.get_args(),
            env: &env,
            working_dir,
            network: &self.network,
            filesystem: &self.filesystem,
            proxy_port: proxy.as_ref().map(|p| p.addr().port()),
        };
        let os_cmd = backend.prepare(&plan)?;

        tracing::debug!(
            backend = %self.kind,
            program = %program.display(),
            "sandbox: launching"
        );

        let outcome = supervisor::supervise(os_cmd, command, stdout, stderr).await;

        let violations = match proxy.as_mut() {
            Some(proxy) => {
                proxy.stop();
                proxy.violations()
            }
            None => Vec::new(),
        };
        let outcome = outcome?;

        if violations.is_empty() {
            return Ok(outcome);
        }

        let destinations: BTreeSet<String> = violations.iter().map(ToString::to_string).collect();
        if !outcome.success() {
            return Err(Error::PolicyViolation(format!(
                "egress to {} denied by network policy",
                destinations.into_iter().collect::<Vec<_>>().join(", ")
            )));
        }

        for destination in &destinations {
            tracing::warn!(
                target: "muzzle::security",
                destination = %destination,
                "denied egress attempt, command still succeeded"
            );
        }
        Ok(outcome)
    }
}

fn with_proxy_env(env: &Environment, proxy_url: &str) -> Environment {
    let env = PROXY_VARS
        .iter()
        .fold(env.clone(), |env, var| env.set(*var, proxy_url));
    NO_PROXY_VARS.iter().fold(env, |env, var| env.unset(var))
}
