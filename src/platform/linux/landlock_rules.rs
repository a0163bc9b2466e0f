//! Landlock ruleset generation for the Linux backend
//!
//! Landlock provides kernel-level filesystem and network access control.
//! ABI v4 is required, since it is the first to restrict TCP connections.
//! Only the access classes the policy actually restricts are handled, so an
//! unrestricted filesystem policy leaves file access untouched.

use std::path::Path;

use landlock::{
    ABI, Access, AccessFs, AccessNet, BitFlags, NetPort, PathBeneath, PathFd, Ruleset,
    RulesetAttr, RulesetCreated, RulesetCreatedAttr, RulesetStatus,
};

use crate::error::{Error, Result};
use crate::platform::LaunchPlan;
use crate::sandbox::FilesystemRules;

const ABI_VERSION: ABI = ABI::V4;

/// Kernel interfaces every process needs, read-only
const RUNTIME_READ_PATHS: &[&str] = &["/proc", "/sys/devices/system/cpu", "/run"];

/// Device nodes for stdio, randomness and terminals
const RUNTIME_DEVICES: &[&str] = &[
    "/dev/null",
    "/dev/zero",
    "/dev/full",
    "/dev/random",
    "/dev/urandom",
    "/dev/fd",
    "/dev/tty",
    "/dev/ptmx",
    "/dev/pts",
    "/dev/shm",
];

/// A prepared Landlock ruleset ready to be applied in pre_exec
pub struct PreparedRuleset {
    inner: RulesetCreated,
}

impl PreparedRuleset {
    /// Apply the ruleset to the current process (call in pre_exec)
    ///
    /// Fails unless the ruleset is fully enforced.
    pub fn restrict_self(self) -> std::result::Result<(), String> {
        let status = self
            .inner
            .restrict_self()
            .map_err(|e| format!("Landlock restrict_self failed: {e}"))?;

        match status.ruleset {
            RulesetStatus::FullyEnforced => Ok(()),
            RulesetStatus::PartiallyEnforced => Err(
                "Landlock rules only partially enforced, refusing to run with reduced isolation"
                    .to_string(),
            ),
            RulesetStatus::NotEnforced => Err("Landlock not enforced by kernel".to_string()),
        }
    }
}

/// Build the ruleset for a launch plan
///
/// Returns `None` when the plan restricts neither the filesystem nor the
/// network.
pub fn build_ruleset(plan: &LaunchPlan<'_>) -> Result<Option<PreparedRuleset>> {
    let restrict_fs = matches!(plan.filesystem, FilesystemRules::AllowList { .. });
    let restrict_net = !plan.network.allows_all();

    if !restrict_fs && !restrict_net {
        tracing::debug!("landlock: nothing to restrict");
        return Ok(None);
    }

    let mut ruleset = Ruleset::default();
    if restrict_fs {
        ruleset = ruleset
            .handle_access(AccessFs::from_all(ABI_VERSION))
            .map_err(|e| Error::InvalidProfile(format!("Landlock fs access error: {e}")))?;
    }
    if restrict_net {
        ruleset = ruleset
            .handle_access(AccessNet::from_all(ABI_VERSION))
            .map_err(|e| Error::InvalidProfile(format!("Landlock net access error: {e}")))?;
    }
    let mut ruleset = ruleset
        .create()
        .map_err(|e| Error::InvalidProfile(format!("Landlock ruleset create error: {e}")))?;

    if let FilesystemRules::AllowList { writable, readable } = plan.filesystem {
        for path in readable {
            add_path_rule(&mut ruleset, path, AccessFs::from_read(ABI_VERSION));
        }
        for path in writable {
            add_path_rule(&mut ruleset, path, AccessFs::from_all(ABI_VERSION));
        }
        for path in RUNTIME_READ_PATHS {
            add_path_rule(&mut ruleset, path, AccessFs::from_read(ABI_VERSION));
        }
        for device in RUNTIME_DEVICES {
            add_path_rule(&mut ruleset, device, AccessFs::from_all(ABI_VERSION));
        }
    }

    // The proxy is the only TCP endpoint; with no allowed domains not even that
    if restrict_net && !plan.network.blocks_all() {
        if let Some(port) = plan.proxy_port {
            ruleset = ruleset
                .add_rule(NetPort::new(port, AccessNet::ConnectTcp))
                .map_err(|e| Error::InvalidProfile(format!("Landlock network rule error: {e}")))?;
        }
    }

    tracing::debug!(
        restrict_fs = restrict_fs,
        restrict_net = restrict_net,
        proxy_port = ?plan.proxy_port,
        "landlock: ruleset built"
    );

    Ok(Some(PreparedRuleset { inner: ruleset }))
}

/// Add a path rule, skipping paths that do not exist on this host
fn add_path_rule(ruleset: &mut RulesetCreated, path: impl AsRef<Path>, access: BitFlags<AccessFs>) {
    let path = path.as_ref();

    match PathFd::new(path) {
        Ok(path_fd) => {
            if let Err(e) = ruleset.add_rule(PathBeneath::new(path_fd, access)) {
                tracing::warn!(path = %path.display(), error = %e, "landlock: failed to add path rule");
            } else {
                tracing::trace!(path = %path.display(), "landlock: added path rule");
            }
        }
        Err(e) => {
            tracing::trace!(path = %path.display(), error = %e, "landlock: skipping non-existent path");
        }
    }
}

/// Run inside a forked probe child: restrict self with a real rule and
/// report the enforcement status as an exit code
///
/// 0 = fully enforced, 1 = unavailable, 2 = partial, 3 = not enforced.
pub fn probe_exit_code() -> i32 {
    let created = Ruleset::default()
        .handle_access(AccessFs::from_all(ABI_VERSION))
        .and_then(|r| r.handle_access(AccessNet::from_all(ABI_VERSION)))
        .and_then(|r| r.create());

    let Ok(ruleset) = created else {
        return 1;
    };

    // An empty ruleset can succeed even when Landlock is not working
    let ruleset = match PathFd::new("/tmp") {
        Ok(fd) => match ruleset.add_rule(PathBeneath::new(fd, AccessFs::from_all(ABI_VERSION))) {
            Ok(r) => r,
            Err(_) => return 1,
        },
        Err(_) => ruleset,
    };

    match ruleset.restrict_self() {
        Ok(status) => match status.ruleset {
            RulesetStatus::FullyEnforced => 0,
            RulesetStatus::PartiallyEnforced => 2,
            RulesetStatus::NotEnforced => 3,
        },
        Err(_) => 1,
    }
}
