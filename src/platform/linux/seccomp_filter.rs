//! Seccomp BPF filter for the Linux backend
//!
//! Landlock only governs TCP, so the filter closes the other ways out:
//! datagram, raw and packet sockets are refused whenever egress is filtered,
//! and inet stream sockets too when every destination is denied. A fixed set
//! of syscalls that could undo the sandbox is refused unconditionally.

use std::collections::BTreeMap;

use seccompiler::{
    SeccompAction, SeccompCmpArgLen, SeccompCmpOp, SeccompCondition, SeccompFilter, SeccompRule,
    TargetArch,
};

use crate::error::{Error, Result};
use crate::network::NetworkRules;

type RuleMap = BTreeMap<i64, Vec<SeccompRule>>;

/// Syscalls refused for every sandboxed child
const BLOCKED_SYSCALLS: &[i64] = &[
    // process inspection
    libc::SYS_ptrace,
    libc::SYS_process_vm_readv,
    libc::SYS_process_vm_writev,
    // kernel modules
    libc::SYS_init_module,
    libc::SYS_finit_module,
    libc::SYS_delete_module,
    libc::SYS_personality,
    // mounts and namespaces
    libc::SYS_mount,
    libc::SYS_umount2,
    libc::SYS_pivot_root,
    libc::SYS_unshare,
    libc::SYS_setns,
    libc::SYS_reboot,
    libc::SYS_kexec_load,
    libc::SYS_kexec_file_load,
    // credentials
    libc::SYS_setuid,
    libc::SYS_setgid,
    libc::SYS_setreuid,
    libc::SYS_setregid,
    libc::SYS_setresuid,
    libc::SYS_setresgid,
    libc::SYS_setgroups,
    libc::SYS_add_key,
    libc::SYS_request_key,
    libc::SYS_keyctl,
    libc::SYS_bpf,
    libc::SYS_userfaultfd,
    libc::SYS_perf_event_open,
    // host clock and accounting
    libc::SYS_settimeofday,
    libc::SYS_clock_settime,
    libc::SYS_adjtimex,
    libc::SYS_swapon,
    libc::SYS_swapoff,
    libc::SYS_quotactl,
    libc::SYS_acct,
    // io_uring performs socket and file operations outside these filters
    libc::SYS_io_uring_setup,
    libc::SYS_io_uring_enter,
    libc::SYS_io_uring_register,
];

/// A compiled filter ready to be applied in pre_exec
pub struct PreparedFilter {
    program: seccompiler::BpfProgram,
}

impl PreparedFilter {
    /// Install the filter on the calling process
    pub fn apply(self) -> std::io::Result<()> {
        seccompiler::apply_filter(&self.program).map_err(into_io_error)
    }
}

fn into_io_error(error: seccompiler::Error) -> std::io::Error {
    match error {
        seccompiler::Error::Prctl(source) | seccompiler::Error::Seccomp(source) => source,
        seccompiler::Error::EmptyFilter => std::io::Error::from_raw_os_error(libc::EINVAL),
        other => std::io::Error::other(format!("seccomp apply_filter failed: {other}")),
    }
}

/// Compile the filter for the given egress rules
pub fn build_filter(network: &NetworkRules) -> Result<PreparedFilter> {
    let arch = detect_arch()?;
    let rules = build_rules(network)?;

    // Default-allow with explicit refusals; a matching rule fails with EPERM
    let filter = SeccompFilter::new(
        rules,
        SeccompAction::Allow,
        SeccompAction::Errno(libc::EPERM as u32),
        arch,
    )
    .map_err(|e| Error::InvalidProfile(format!("seccomp filter error: {e:?}")))?;

    let program: seccompiler::BpfProgram = filter
        .try_into()
        .map_err(|e| Error::InvalidProfile(format!("seccomp BPF compilation error: {e:?}")))?;

    tracing::debug!(
        filter_sockets = !network.allows_all(),
        block_stream = network.blocks_all(),
        "seccomp: filter built"
    );

    Ok(PreparedFilter { program })
}

fn detect_arch() -> Result<TargetArch> {
    #[cfg(target_arch = "x86_64")]
    return Ok(TargetArch::x86_64);

    #[cfg(target_arch = "aarch64")]
    return Ok(TargetArch::aarch64);

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    return Err(Error::LaunchFailure(
        "seccomp filtering is not supported on this architecture".to_string(),
    ));
}

fn build_rules(network: &NetworkRules) -> Result<RuleMap> {
    let mut rules = RuleMap::new();

    if !network.allows_all() {
        let socket_rules = socket_rules(network.blocks_all())?;
        rules.insert(libc::SYS_socket, socket_rules);
    }

    // An empty chain matches on the syscall number alone
    for &syscall in BLOCKED_SYSCALLS {
        rules.insert(syscall, Vec::new());
    }

    Ok(rules)
}

/// All flag combinations of a socket type, since seccompiler cannot mask
/// SOCK_NONBLOCK and SOCK_CLOEXEC out of the argument
fn type_variants(base: libc::c_int) -> [u64; 4] {
    [
        base,
        base | libc::SOCK_NONBLOCK,
        base | libc::SOCK_CLOEXEC,
        base | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
    ]
    .map(|t| t as u64)
}

fn condition(arg: u8, value: u64) -> Result<SeccompCondition> {
    SeccompCondition::new(arg, SeccompCmpArgLen::Dword, SeccompCmpOp::Eq, value)
        .map_err(|e| Error::InvalidProfile(format!("seccomp condition error: {e:?}")))
}

/// socket(domain, type, protocol) rules; any match is refused
fn socket_rules(block_stream: bool) -> Result<Vec<SeccompRule>> {
    let mut blocked_types = Vec::new();
    blocked_types.extend(type_variants(libc::SOCK_DGRAM));
    blocked_types.extend(type_variants(libc::SOCK_RAW));
    if block_stream {
        blocked_types.extend(type_variants(libc::SOCK_STREAM));
    }

    let rule = |conditions| {
        SeccompRule::new(conditions)
            .map_err(|e| Error::InvalidProfile(format!("seccomp rule error: {e:?}")))
    };

    let mut rules = vec![rule(vec![condition(0, libc::AF_PACKET as u64)?])?];
    for domain in [libc::AF_INET, libc::AF_INET6] {
        for &sock_type in &blocked_types {
            rules.push(rule(vec![
                condition(0, domain as u64)?,
                condition(1, sock_type)?,
            ])?);
        }
    }

    Ok(rules)
}
