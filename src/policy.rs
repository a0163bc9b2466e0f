//! Execution policy resolution
//!
//! An [`ExecutionPolicy`] is resolved once per invocation from caller options
//! and built-in defaults, then shared read-only between the sandbox adapter
//! and the supervisor. It is never patched after construction.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Domains the target agent cannot function without
pub const BASELINE_DOMAINS: &[&str] = &["generativelanguage.googleapis.com", "google.com"];

/// Scratch locations writable under a restricted filesystem
pub const SCRATCH_PATHS: &[&str] = &["/tmp"];

/// Minimal read-only system locations needed to execute anything at all
pub const SYSTEM_PATHS: &[&str] = &[
    "/bin",
    "/usr/bin",
    "/usr/local/bin",
    "/lib",
    "/lib64",
    "/usr/lib",
    "/usr/lib64",
    "/usr/local/lib",
    "/usr/share",
    "/etc",
];

/// Fully resolved policy for one supervised execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPolicy {
    allowed_domains: BTreeSet<String>,
    network_default_deny: bool,
    restrict_filesystem: bool,
    filesystem_allow_list: Vec<PathBuf>,
    working_directory: PathBuf,
}

impl ExecutionPolicy {
    /// Create a new builder for an execution policy
    pub fn builder(working_directory: impl AsRef<Path>) -> ExecutionPolicyBuilder {
        ExecutionPolicyBuilder::new(working_directory)
    }

    pub fn allowed_domains(&self) -> &BTreeSet<String> {
        &self.allowed_domains
    }

    pub fn network_default_deny(&self) -> bool {
        self.network_default_deny
    }

    pub fn restrict_filesystem(&self) -> bool {
        self.restrict_filesystem
    }

    /// Paths visible to the child when the filesystem is restricted
    ///
    /// The working directory always comes first.
    pub fn filesystem_allow_list(&self) -> &[PathBuf] {
        &self.filesystem_allow_list
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    /// Whether `path` is one of the allow-list entries the child may write to
    pub fn is_writable(&self, path: &Path) -> bool {
        path == self.working_directory || SCRATCH_PATHS.iter().any(|p| Path::new(p) == path)
    }
}

/// Builder for ExecutionPolicy
#[derive(Debug)]
pub struct ExecutionPolicyBuilder {
    allowed_domains: BTreeSet<String>,
    network_default_deny: bool,
    restrict_filesystem: bool,
    working_directory: PathBuf,
}

impl ExecutionPolicyBuilder {
    fn new(working_directory: impl AsRef<Path>) -> Self {
        Self {
            allowed_domains: BTreeSet::new(),
            network_default_deny: true,
            restrict_filesystem: false,
            working_directory: working_directory.as_ref().to_path_buf(),
        }
    }

    /// Allow egress to a domain (exact host or `*.suffix`)
    ///
    /// Blank entries are ignored.
    pub fn allow_domain(mut self, domain: impl AsRef<str>) -> Self {
        let domain = domain.as_ref().trim();
        if !domain.is_empty() {
            self.allowed_domains.insert(domain.to_string());
        }
        self
    }

    pub fn allow_domains(self, domains: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        domains
            .into_iter()
            .fold(self, |builder, domain| builder.allow_domain(domain))
    }

    /// Deny all egress except the allowed domains (on by default)
    pub fn network_default_deny(mut self, enabled: bool) -> Self {
        self.network_default_deny = enabled;
        self
    }

    pub fn restrict_filesystem(mut self, enabled: bool) -> Self {
        self.restrict_filesystem = enabled;
        self
    }

    pub fn build(self) -> ExecutionPolicy {
        let mut filesystem_allow_list = vec![self.working_directory.clone()];
        filesystem_allow_list.extend(
            SCRATCH_PATHS
                .iter()
                .chain(SYSTEM_PATHS)
                .map(PathBuf::from)
                .filter(|p| *p != self.working_directory),
        );

        ExecutionPolicy {
            allowed_domains: self.allowed_domains,
            network_default_deny: self.network_default_deny,
            restrict_filesystem: self.restrict_filesystem,
            filesystem_allow_list,
            working_directory: self.working_directory,
        }
    }
}

/// Merge caller options with the built-in defaults
///
/// The result always contains [`BASELINE_DOMAINS`], denies all other egress,
/// and lists the working directory plus [`SYSTEM_PATHS`] for filesystem
/// visibility. No I/O is performed.
pub fn resolve(
    caller_allow_domains: impl IntoIterator<Item = impl AsRef<str>>,
    restrict_fs: bool,
    cwd: impl AsRef<Path>,
) -> ExecutionPolicy {
    ExecutionPolicy::builder(cwd)
        .allow_domains(BASELINE_DOMAINS)
        .allow_domains(caller_allow_domains)
        .network_default_deny(true)
        .restrict_filesystem(restrict_fs)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_includes_baseline() {
        let policy = resolve(Vec::<String>::new(), false, "/work");

        for domain in BASELINE_DOMAINS {
            assert!(policy.allowed_domains().contains(*domain));
        }
        assert_eq!(policy.allowed_domains().len(), BASELINE_DOMAINS.len());
        assert!(policy.network_default_deny());
        assert!(!policy.restrict_filesystem());
    }

    #[test]
    fn test_resolve_is_order_and_duplicate_insensitive() {
        let a = resolve(["b.example.com", "a.example.com", "google.com"], false, "/w");
        let b = resolve(
            ["a.example.com", "a.example.com", "b.example.com"],
            false,
            "/w",
        );

        assert_eq!(a.allowed_domains(), b.allowed_domains());
        assert_eq!(a, resolve(["b.example.com", "a.example.com"], false, "/w"));
    }

    #[test]
    fn test_resolve_drops_blank_domains() {
        let policy = resolve(["", "  ", " api.example.com "], false, "/w");

        assert!(policy.allowed_domains().contains("api.example.com"));
        assert!(!policy.allowed_domains().contains(""));
        assert_eq!(policy.allowed_domains().len(), BASELINE_DOMAINS.len() + 1);
    }

    #[test]
    fn test_restricted_filesystem_allow_list() {
        let policy = resolve(Vec::<String>::new(), true, "/home/dev/project");
        let list = policy.filesystem_allow_list();

        assert!(policy.restrict_filesystem());
        assert_eq!(list[0], PathBuf::from("/home/dev/project"));
        for path in SYSTEM_PATHS {
            assert!(list.contains(&PathBuf::from(path)));
        }
        assert!(policy.is_writable(Path::new("/home/dev/project")));
        assert!(policy.is_writable(Path::new("/tmp")));
        assert!(!policy.is_writable(Path::new("/usr/bin")));
    }

    #[test]
    fn test_working_dir_not_listed_twice() {
        let policy = resolve(Vec::<String>::new(), true, "/tmp");
        let count = policy
            .filesystem_allow_list()
            .iter()
            .filter(|p| p.as_path() == Path::new("/tmp"))
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_builder_can_block_all_egress() {
        let policy = ExecutionPolicy::builder("/w").build();

        assert!(policy.allowed_domains().is_empty());
        assert!(policy.network_default_deny());
    }
}
