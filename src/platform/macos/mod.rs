//! macOS sandbox backend using `sandbox-exec`

mod profile;

use std::process::Command;

use crate::error::{Error, Result};
use crate::platform::{Backend, LaunchPlan};

/// First release where `sandbox-exec` honours `(remote tcp "localhost:PORT")`
const MIN_VERSION: (u32, u32) = (10, 15);

pub struct MacOSBackend {
    _private: (),
}

impl MacOSBackend {
    pub fn new() -> Result<Self> {
        let version = Self::detect_version()?;
        if version < MIN_VERSION {
            return Err(Error::UnsupportedPlatformVersion {
                platform: "macOS",
                minimum: "10.15",
                current: format!("{}.{}", version.0, version.1),
            });
        }

        tracing::info!(version = %format!("{}.{}", version.0, version.1), "macOS sandbox backend initialized");
        Ok(Self { _private: () })
    }

    fn detect_version() -> Result<(u32, u32)> {
        let output = Command::new("sw_vers")
            .arg("-productVersion")
            .output()
            .map_err(|e| Error::LaunchFailure(format!("failed to get macOS version: {e}")))?;

        parse_version(String::from_utf8_lossy(&output.stdout).trim())
    }
}

/// "14.2.1" -> (14, 2); "11" -> (11, 0)
fn parse_version(version: &str) -> Result<(u32, u32)> {
    let mut parts = version.split('.');
    let invalid = || Error::LaunchFailure(format!("invalid macOS version format: {version}"));

    let major = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(invalid)?;
    let minor = match parts.next() {
        Some(p) => p.parse().map_err(|_| invalid())?,
        None => 0,
    };

    Ok((major, minor))
}

impl Backend for MacOSBackend {
    fn prepare(&self, plan: &LaunchPlan<'_>) -> Result<Command> {
        let sbpl = profile::generate_profile(plan);
        tracing::trace!("generated SBPL profile:\n{sbpl}");

        let mut cmd = plan.command("sandbox-exec");
        cmd.arg("-p").arg(&sbpl);
        cmd.arg(plan.program);
        cmd.args(plan.args);

        tracing::debug!(
            program = %plan.program.display(),
            proxy_port = ?plan.proxy_port,
            "sandbox: sandbox-exec command prepared"
        );

        Ok(cmd)
    }
}
