//! Fallback backend for hosts without a supported kernel sandbox
//!
//! The child is pointed at the egress proxy through the usual proxy
//! environment variables. Only proxy-aware programs are filtered, and the
//! filesystem cannot be narrowed at all, so a restricted filesystem policy is
//! refused rather than silently ignored.

use std::process::Command;

use crate::error::{Error, Result};
use crate::platform::{Backend, LaunchPlan};
use crate::sandbox::FilesystemRules;

pub struct ProxyOnlyBackend {
    _private: (),
}

impl ProxyOnlyBackend {
    pub fn new() -> Self {
        Self { _private: () }
    }
}

impl Backend for ProxyOnlyBackend {
    fn prepare(&self, plan: &LaunchPlan<'_>) -> Result<Command> {
        if matches!(plan.filesystem, FilesystemRules::AllowList { .. }) {
            return Err(Error::NotEnforced(
                "filesystem restriction needs a kernel sandbox, unavailable on this platform"
                    .to_string(),
            ));
        }

        if !plan.network.allows_all() {
            tracing::warn!(
                "no kernel sandbox on this platform; egress filtering only covers proxy-aware programs"
            );
        }

        Ok(plan.direct_command())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::env::Environment;
    use crate::network::NetworkRules;
    use crate::policy::resolve;

    #[test]
    fn test_refuses_restricted_filesystem() {
        let policy = resolve(Vec::<String>::new(), true, "/tmp");
        let network = NetworkRules::from_policy(&policy);
        let filesystem = FilesystemRules::from_policy(&policy);
        let env = Environment::empty();
        let plan = LaunchPlan {
            program: Path::new("/bin/sh"),
            argv0: "sh",
            args: &[],
            env: &env,
            working_dir: Path::new("/tmp"),
            network: &network,
            filesystem: &filesystem,
            proxy_port: None,
        };

        let err = ProxyOnlyBackend::new().prepare(&plan).unwrap_err();
        assert!(matches!(err, Error::NotEnforced(_)));
    }

    #[test]
    fn test_builds_plain_command() {
        let policy = resolve(Vec::<String>::new(), false, "/tmp");
        let network = NetworkRules::from_policy(&policy);
        let filesystem = FilesystemRules::from_policy(&policy);
        let env = Environment::empty().set("HTTPS_PROXY", "http://127.0.0.1:9");
        let args = vec!["-c".to_string(), "true".to_string()];
        let plan = LaunchPlan {
            program: Path::new("/bin/sh"),
            argv0: "sh",
            args: &args,
            env: &env,
            working_dir: Path::new("/tmp"),
            network: &network,
            filesystem: &filesystem,
            proxy_port: Some(9),
        };

        let cmd = ProxyOnlyBackend::new().prepare(&plan).unwrap();
        assert_eq!(cmd.get_program(), "/bin/sh");
        assert_eq!(cmd.get_args().count(), 2);
        assert!(
            cmd.get_envs()
                .any(|(k, v)| k == "HTTPS_PROXY" && v.is_some_and(|v| v == "http://127.0.0.1:9"))
        );
    }
}
