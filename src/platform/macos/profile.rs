//! SBPL profile generation for `sandbox-exec`

use std::path::Path;

use crate::platform::LaunchPlan;
use crate::sandbox::FilesystemRules;

/// Locations dyld and the system frameworks need before `main` even runs
const SYSTEM_ESSENTIALS: &[&str] = &[
    "/System",
    "/usr/lib",
    "/usr/share",
    "/Library/Apple",
    "/Library/Preferences",
    "/private/var/db/dyld",
    "/private/var/db/timezone",
    "/private/etc",
    "/dev",
];

/// Temporary directories writable by every sandboxed process
const TEMP_DIRS: &[&str] = &["/private/tmp", "/var/folders", "/private/var/folders"];

/// Generate the SBPL profile for a launch plan
///
/// Everything is denied by default. Network access is either fully open,
/// fully closed, or limited to the loopback egress proxy.
pub fn generate_profile(plan: &LaunchPlan<'_>) -> String {
    let mut profile = Profile::default();
    profile.line("(version 1)");
    profile.line("(deny default)");

    write_system_basics(&mut profile);

    match plan.filesystem {
        FilesystemRules::Unrestricted => {
            tracing::debug!("sandbox: filesystem unrestricted");
            profile.line("(allow file*)");
            profile.line("(allow process-exec)");
        }
        FilesystemRules::AllowList { writable, readable } => {
            for path in SYSTEM_ESSENTIALS {
                profile.read_path(Path::new(path));
            }
            profile.line(r#"(allow file-write* (subpath "/dev"))"#);
            for path in TEMP_DIRS {
                profile.write_path(Path::new(path));
            }
            for path in readable {
                tracing::debug!(path = %path.display(), "sandbox: allow read");
                profile.read_path(path);
                profile.exec_path(path);
            }
            for path in writable {
                tracing::debug!(path = %path.display(), "sandbox: allow write");
                profile.write_path(path);
                profile.exec_path(path);
            }
        }
    }

    if plan.network.allows_all() {
        profile.line("(allow network*)");
    } else {
        profile.line("(deny network*)");
        if !plan.network.blocks_all() {
            if let Some(port) = plan.proxy_port {
                profile.line(&format!(
                    r#"(allow network-outbound (remote tcp "localhost:{port}"))"#
                ));
            }
        }
    }

    profile.finish()
}

#[derive(Default)]
struct Profile {
    text: String,
}

impl Profile {
    fn line(&mut self, line: &str) {
        self.text.push_str(line);
        self.text.push('\n');
    }

    fn read_path(&mut self, path: &Path) {
        let escaped = escape_path(path);
        self.line(&format!(r#"(allow file-read* (subpath "{escaped}"))"#));
    }

    fn write_path(&mut self, path: &Path) {
        let escaped = escape_path(path);
        self.line(&format!(r#"(allow file-read* (subpath "{escaped}"))"#));
        self.line(&format!(r#"(allow file-write* (subpath "{escaped}"))"#));
    }

    fn exec_path(&mut self, path: &Path) {
        let escaped = escape_path(path);
        self.line(&format!(r#"(allow process-exec (subpath "{escaped}"))"#));
    }

    fn finish(self) -> String {
        self.text
    }
}

fn write_system_basics(profile: &mut Profile) {
    profile.line("(allow mach*)");
    profile.line("(allow sysctl-read)");
    profile.line("(allow iokit-open)");
    profile.line("(allow process-fork)");
    profile.line("(allow signal)");
    profile.line("(allow ipc-posix*)");
    profile.line("(allow file-lock)");
}

fn escape_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
}
