//! Explicit environment for the supervised child
//!
//! The child's environment is built as a value instead of mutating the
//! supervisor's own process environment, so runs are reproducible in tests.

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::path::Path;

/// Shells tried, in order, when `SHELL` is unusable
const FALLBACK_SHELLS: &[&str] = &["/bin/bash", "/bin/sh"];

/// Environment variables passed to the child
///
/// Names and values are kept as OS strings, so variables that are not valid
/// UTF-8 still reach the child byte for byte.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<OsString, OsString>,
}

impl Environment {
    /// An empty environment
    pub fn empty() -> Self {
        Self::default()
    }

    /// Snapshot of the caller's environment, unmodified
    pub fn inherit() -> Self {
        Self {
            vars: std::env::vars_os().collect(),
        }
    }

    pub fn set(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn unset(mut self, key: impl AsRef<OsStr>) -> Self {
        self.vars.remove(key.as_ref());
        self
    }

    /// Value of `key`, if set and valid UTF-8
    pub fn get(&self, key: impl AsRef<OsStr>) -> Option<&str> {
        self.get_os(key)?.to_str()
    }

    pub fn get_os(&self, key: impl AsRef<OsStr>) -> Option<&OsStr> {
        self.vars.get(key.as_ref()).map(OsString::as_os_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OsStr, &OsStr)> {
        self.vars.iter().map(|(k, v)| (k.as_os_str(), v.as_os_str()))
    }

    /// Guarantee `SHELL` names an existing shell
    ///
    /// This is the only variable the supervisor coerces. An existing, valid
    /// `SHELL` is left untouched.
    pub fn ensure_shell(self) -> Self {
        self.ensure_shell_from(FALLBACK_SHELLS)
    }

    fn ensure_shell_from(self, candidates: &[&str]) -> Self {
        if self.get_os("SHELL").is_some_and(|s| Path::new(s).is_file()) {
            return self;
        }
        match candidates.iter().find(|c| Path::new(c).is_file()) {
            Some(shell) => {
                tracing::debug!(shell = %shell, "env: forcing SHELL");
                self.set("SHELL", *shell)
            }
            None => self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_shell_is_kept() {
        let shell = tempfile::NamedTempFile::new().unwrap();
        let shell_path = shell.path().to_string_lossy().to_string();

        let env = Environment::empty()
            .set("SHELL", &shell_path)
            .ensure_shell_from(&["/nonexistent/bash"]);

        assert_eq!(env.get("SHELL"), Some(shell_path.as_str()));
    }

    #[test]
    fn test_missing_shell_is_replaced() {
        let fallback = tempfile::NamedTempFile::new().unwrap();
        let fallback_path = fallback.path().to_string_lossy().to_string();

        let env = Environment::empty()
            .set("SHELL", "/nonexistent/zsh")
            .ensure_shell_from(&["/nonexistent/bash", &fallback_path]);

        assert_eq!(env.get("SHELL"), Some(fallback_path.as_str()));
    }

    #[test]
    fn test_unset_shell_without_candidates_stays_unset() {
        let env = Environment::empty().ensure_shell_from(&["/nonexistent/sh"]);
        assert_eq!(env.get("SHELL"), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_values_are_kept() {
        use std::os::unix::ffi::OsStringExt;

        let raw = OsString::from_vec(vec![b'f', 0xff]);
        let env = Environment::empty().set("MUZZLE_RAW", raw.clone());

        assert_eq!(env.get("MUZZLE_RAW"), None);
        assert_eq!(env.get_os("MUZZLE_RAW"), Some(raw.as_os_str()));
        assert!(env.iter().any(|(k, v)| k == "MUZZLE_RAW" && v == raw));
    }

    #[test]
    fn test_inherit_forwards_caller_environment() {
        let env = Environment::inherit();
        if let Ok(path) = std::env::var("PATH") {
            assert_eq!(env.get("PATH"), Some(path.as_str()));
        }
    }
}
