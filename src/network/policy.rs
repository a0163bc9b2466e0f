use std::collections::BTreeSet;

use crate::policy::ExecutionPolicy;

/// Verdict of a single egress rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EgressRule {
    /// Block every destination
    DenyAll,
    /// Permit destinations matching these entries
    Allow(BTreeSet<String>),
    /// Permit every destination
    AllowAll,
}

/// Egress rules derived from an [`ExecutionPolicy`]
///
/// Rules are evaluated in order and later rules are exceptions to earlier
/// ones: the baseline is always `DenyAll` when the policy is default-deny, and
/// the allow-list is layered on top of it, never the other way around.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRules {
    rules: Vec<EgressRule>,
}

impl NetworkRules {
    pub fn from_policy(policy: &ExecutionPolicy) -> Self {
        let rules = if !policy.network_default_deny() {
            vec![EgressRule::AllowAll]
        } else if policy.allowed_domains().is_empty() {
            vec![EgressRule::DenyAll]
        } else {
            vec![
                EgressRule::DenyAll,
                EgressRule::Allow(policy.allowed_domains().clone()),
            ]
        };
        Self { rules }
    }

    pub fn rules(&self) -> &[EgressRule] {
        &self.rules
    }

    /// True when no destination at all is reachable
    pub fn blocks_all(&self) -> bool {
        matches!(self.rules.as_slice(), [EgressRule::DenyAll])
    }

    /// True when every destination is reachable
    pub fn allows_all(&self) -> bool {
        matches!(self.rules.as_slice(), [EgressRule::AllowAll])
    }

    /// Decide whether `host` is reachable
    pub fn permits(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        self.rules.iter().fold(false, |permitted, rule| match rule {
            EgressRule::DenyAll => false,
            EgressRule::AllowAll => true,
            EgressRule::Allow(domains) => permitted || matches_any(domains, &host),
        })
    }
}

/// Exact host match, or `*.suffix` matching any subdomain of `suffix`
fn matches_any(domains: &BTreeSet<String>, host: &str) -> bool {
    domains.iter().any(|allowed| {
        let allowed = allowed.to_ascii_lowercase();
        match allowed.strip_prefix('*') {
            Some(suffix) if suffix.starts_with('.') => host.ends_with(suffix),
            _ => allowed == host,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{ExecutionPolicy, resolve};

    #[test]
    fn test_default_deny_blocks_unlisted() {
        let rules = NetworkRules::from_policy(&resolve(["api.example.com"], false, "/w"));

        assert_eq!(rules.rules()[0], EgressRule::DenyAll);
        assert!(rules.permits("api.example.com"));
        assert!(rules.permits("generativelanguage.googleapis.com"));
        assert!(!rules.permits("example.com"));
        assert!(!rules.permits("evil.test"));
        assert!(!rules.permits("sub.api.example.com"));
    }

    #[test]
    fn test_empty_allow_list_blocks_everything() {
        let rules = NetworkRules::from_policy(&ExecutionPolicy::builder("/w").build());

        assert!(rules.blocks_all());
        assert!(!rules.permits("google.com"));
        assert!(!rules.permits("localhost"));
    }

    #[test]
    fn test_wildcard_matches_subdomains_only() {
        let policy = ExecutionPolicy::builder("/w")
            .allow_domain("*.example.com")
            .build();
        let rules = NetworkRules::from_policy(&policy);

        assert!(rules.permits("api.example.com"));
        assert!(rules.permits("a.b.example.com"));
        assert!(!rules.permits("example.com"));
        assert!(!rules.permits("badexample.com"));
    }

    #[test]
    fn test_matching_is_case_and_trailing_dot_insensitive() {
        let rules = NetworkRules::from_policy(&resolve(Vec::<String>::new(), false, "/w"));

        assert!(rules.permits("Google.COM"));
        assert!(rules.permits("google.com."));
    }

    #[test]
    fn test_default_allow_permits_everything() {
        let policy = ExecutionPolicy::builder("/w")
            .network_default_deny(false)
            .build();
        let rules = NetworkRules::from_policy(&policy);

        assert!(rules.allows_all());
        assert!(rules.permits("anything.test"));
    }
}
