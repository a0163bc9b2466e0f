use std::fmt;
use std::path::Path;
use std::process::Command;

use crate::env::Environment;
use crate::error::{Error, Result};
use crate::network::NetworkRules;
use crate::sandbox::FilesystemRules;

pub mod fallback;

#[cfg(target_os = "macos")]
pub mod macos;

#[cfg(target_os = "linux")]
pub mod linux;

/// Isolation mechanism used to enforce a policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Landlock filesystem/network rules plus a seccomp filter (Linux)
    Landlock,
    /// `sandbox-exec` with a generated SBPL profile (macOS)
    SandboxExec,
    /// Egress proxy advertised through environment only
    ProxyOnly,
}

impl BackendKind {
    /// The backend for the host platform
    pub const fn native() -> Self {
        if cfg!(target_os = "linux") {
            Self::Landlock
        } else if cfg!(target_os = "macos") {
            Self::SandboxExec
        } else {
            Self::ProxyOnly
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Landlock => "landlock",
            Self::SandboxExec => "sandbox-exec",
            Self::ProxyOnly => "proxy-only",
        })
    }
}

/// Everything a backend needs to build the sandboxed OS command
pub(crate) struct LaunchPlan<'a> {
    /// Resolved executable
    pub program: &'a Path,
    /// Name the child sees as `argv[0]`, as the caller wrote it
    pub argv0: &'a str,
    pub args: &'a [String],
    pub env: &'a Environment,
    pub working_dir: &'a Path,
    pub network: &'a NetworkRules,
    pub filesystem: &'a FilesystemRules,
    /// Port of the egress proxy, when one is running
    pub proxy_port: Option<u16>,
}

impl LaunchPlan<'_> {
    /// Base command running `program` with the plan's arguments, directory and environment
    pub fn command(&self, program: impl AsRef<std::ffi::OsStr>) -> Command {
        let mut cmd = Command::new(program);
        cmd.current_dir(self.working_dir);
        cmd.env_clear();
        cmd.envs(self.env.iter());
        cmd
    }

    /// Command executing the resolved program directly, argv as the caller gave it
    pub fn direct_command(&self) -> Command {
        let mut cmd = self.command(self.program);
        #[cfg(unix)]
        std::os::unix::process::CommandExt::arg0(&mut cmd, self.argv0);
        cmd.args(self.args);
        cmd
    }
}

/// Internal trait for platform-specific sandbox backends
pub(crate) trait Backend {
    /// Build the OS command that runs the plan under this backend's isolation
    fn prepare(&self, plan: &LaunchPlan<'_>) -> Result<Command>;
}

/// Instantiate a backend, probing the host for the required capabilities
pub(crate) fn create_backend(kind: BackendKind) -> Result<Box<dyn Backend>> {
    match kind {
        BackendKind::ProxyOnly => Ok(Box::new(fallback::ProxyOnlyBackend::new())),
        #[cfg(target_os = "linux")]
        BackendKind::Landlock => Ok(Box::new(linux::LinuxBackend::new()?)),
        #[cfg(target_os = "macos")]
        BackendKind::SandboxExec => Ok(Box::new(macos::MacOSBackend::new()?)),
        #[allow(unreachable_patterns)]
        other => Err(Error::LaunchFailure(format!(
            "{other} backend is not available on this platform"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_backend_follows_platform() {
        let kind = BackendKind::native();
        if cfg!(target_os = "linux") {
            assert_eq!(kind, BackendKind::Landlock);
        } else if cfg!(target_os = "macos") {
            assert_eq!(kind, BackendKind::SandboxExec);
        } else {
            assert_eq!(kind, BackendKind::ProxyOnly);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_direct_command_keeps_caller_argv() {
        let policy = crate::policy::resolve(Vec::<String>::new(), false, "/tmp");
        let network = NetworkRules::from_policy(&policy);
        let filesystem = FilesystemRules::from_policy(&policy);
        let env = Environment::empty();
        let args = vec!["-c".to_string(), "true".to_string()];
        let plan = LaunchPlan {
            program: Path::new("/bin/sh"),
            argv0: "sh",
            args: &args,
            env: &env,
            working_dir: Path::new("/tmp"),
            network: &network,
            filesystem: &filesystem,
            proxy_port: None,
        };

        let cmd = plan.direct_command();
        assert_eq!(cmd.get_program(), "/bin/sh");
        assert_eq!(cmd.get_args().collect::<Vec<_>>(), ["-c", "true"]);
        assert_eq!(cmd.get_current_dir(), Some(Path::new("/tmp")));
    }

    #[test]
    fn test_foreign_backend_is_a_launch_failure() {
        let foreign = if cfg!(target_os = "macos") {
            BackendKind::Landlock
        } else {
            BackendKind::SandboxExec
        };
        let err = create_backend(foreign).err().unwrap();
        assert_eq!(err.kind(), crate::FailureKind::LaunchFailure);
    }
}
