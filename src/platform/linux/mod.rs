//! Linux sandbox backend using Landlock + Seccomp

mod landlock_rules;
mod seccomp_filter;

use std::os::unix::process::CommandExt;
use std::process::Command;

use crate::error::{Error, Result};
use crate::platform::{Backend, LaunchPlan};

/// Minimum required kernel version (Landlock ABI v4 adds TCP port rules)
const MIN_KERNEL_VERSION: KernelVersion = KernelVersion::new(6, 7, 0);

/// Linux sandbox backend using Landlock (filesystem + network) and Seccomp (socket filtering)
pub struct LinuxBackend {
    _private: (),
}

/// Parsed kernel version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct KernelVersion {
    major: u32,
    minor: u32,
    patch: u32,
}

impl KernelVersion {
    const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    fn parse(release: &str) -> Result<Self> {
        // "6.7.0-generic" or "6.7.0" -> (6, 7, 0)
        let version_part = release.split('-').next().unwrap_or(release);
        let mut parts = version_part.split('.');

        let mut number = |what: &str| -> Result<u32> {
            let part = parts.next().ok_or_else(|| {
                Error::LaunchFailure(format!("invalid kernel version format: {release}"))
            })?;
            part.parse()
                .map_err(|_| Error::LaunchFailure(format!("invalid {what} version: {part}")))
        };

        let major = number("major")?;
        let minor = number("minor")?;
        let patch = number("patch").unwrap_or(0);

        Ok(Self::new(major, minor, patch))
    }
}

impl std::fmt::Display for KernelVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl LinuxBackend {
    /// Create a new Linux sandbox backend
    ///
    /// Fails if the kernel is older than 6.7 or Landlock cannot be fully
    /// enforced on this host.
    pub fn new() -> Result<Self> {
        let kernel_version = Self::detect_kernel_version()?;
        if kernel_version < MIN_KERNEL_VERSION {
            return Err(Error::UnsupportedPlatformVersion {
                platform: "Linux",
                minimum: "6.7",
                current: kernel_version.to_string(),
            });
        }

        Self::probe_landlock()?;

        tracing::info!(kernel = %kernel_version, "Linux sandbox backend initialized");

        Ok(Self { _private: () })
    }

    fn detect_kernel_version() -> Result<KernelVersion> {
        let utsname = nix::sys::utsname::uname()
            .map_err(|e| Error::LaunchFailure(format!("uname failed: {e}")))?;
        let release = utsname.release().to_string_lossy();
        KernelVersion::parse(&release)
    }

    /// Check that a Landlock ruleset is fully enforced, in a forked child
    ///
    /// Landlock restrictions are irreversible and inherited, so the probe must
    /// never run in the supervisor itself.
    fn probe_landlock() -> Result<()> {
        // SAFETY: the child only calls Landlock syscalls and _exit
        match unsafe { libc::fork() } {
            -1 => Err(Error::LaunchFailure(
                "fork failed for Landlock probe".to_string(),
            )),
            0 => {
                let code = landlock_rules::probe_exit_code();
                // SAFETY: terminate the probe child without running destructors
                unsafe { libc::_exit(code) };
            }
            pid => {
                let mut status: libc::c_int = 0;
                // SAFETY: waiting on the child forked above
                unsafe { libc::waitpid(pid, &mut status, 0) };

                if !libc::WIFEXITED(status) {
                    return Err(Error::LaunchFailure(
                        "Landlock probe terminated abnormally".to_string(),
                    ));
                }
                match libc::WEXITSTATUS(status) {
                    0 => Ok(()),
                    2 => Err(Error::NotEnforced(
                        "Landlock only partially enforced, refusing to run with reduced isolation"
                            .to_string(),
                    )),
                    3 => Err(Error::NotEnforced(
                        "Landlock not enforced by kernel".to_string(),
                    )),
                    _ => Err(Error::NotEnforced(
                        "Landlock unavailable, kernel may lack ABI v4 support".to_string(),
                    )),
                }
            }
        }
    }
}

impl Backend for LinuxBackend {
    fn prepare(&self, plan: &LaunchPlan<'_>) -> Result<Command> {
        let mut cmd = plan.direct_command();

        // pre_exec requires FnMut, but each piece is applied exactly once
        let mut ruleset = landlock_rules::build_ruleset(plan)?;
        let mut filter = Some(seccomp_filter::build_filter(plan.network)?);

        // SAFETY: the closure runs between fork and exec and only issues the
        // landlock and seccomp syscalls
        unsafe {
            cmd.pre_exec(move || {
                if let Some(ruleset) = ruleset.take() {
                    ruleset
                        .restrict_self()
                        .map_err(|e| std::io::Error::new(std::io::ErrorKind::PermissionDenied, e))?;
                }
                if let Some(filter) = filter.take() {
                    filter.apply()?;
                }
                Ok(())
            });
        }

        tracing::debug!(
            program = %plan.program.display(),
            proxy_port = ?plan.proxy_port,
            "sandbox: landlock command prepared"
        );

        Ok(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_version_parsing() {
        assert_eq!(
            KernelVersion::parse("6.7.0").unwrap(),
            KernelVersion::new(6, 7, 0)
        );
        assert_eq!(
            KernelVersion::parse("6.8.1-generic").unwrap(),
            KernelVersion::new(6, 8, 1)
        );
        assert_eq!(
            KernelVersion::parse("5.15.0-91-generic").unwrap(),
            KernelVersion::new(5, 15, 0)
        );
        assert_eq!(KernelVersion::parse("6.10").unwrap(), KernelVersion::new(6, 10, 0));
        assert!(KernelVersion::parse("garbage").is_err());
    }

    #[test]
    fn test_kernel_version_comparison() {
        assert!(KernelVersion::new(6, 7, 0) >= MIN_KERNEL_VERSION);
        assert!(KernelVersion::new(6, 10, 0) > MIN_KERNEL_VERSION);
        assert!(KernelVersion::new(5, 15, 0) < MIN_KERNEL_VERSION);
    }
}
