//! OS-level confinement of worker threads
//!
//! Layers are applied to the calling thread only, in order:
//! no_new_privs, capability drop, Landlock, then a seccomp filter. Each layer
//! is narrowed by the capabilities a request was granted, so a grant of
//! `filesystem` skips Landlock, a grant of `network` leaves the socket
//! calls alone and thread creation needs `spawn-threads`.

use crate::config::SandboxMode;
use crate::permission::PermissionSet;
use crate::{Result, SkiffError};

#[cfg(target_os = "linux")]
mod linux {
    use std::collections::BTreeMap;

    use caps::CapSet;
    use landlock::{Access, AccessFs, Ruleset, RulesetAttr, RulesetStatus, ABI};
    use seccompiler::{
        BpfProgram, SeccompAction, SeccompCmpArgLen, SeccompCmpOp, SeccompCondition, SeccompFilter,
        SeccompRule, TargetArch,
    };

    use crate::permission::{Capability, PermissionSet};

    pub(super) type Layer = fn(&PermissionSet) -> Result<(), String>;

    pub(super) const LAYERS: [(&str, Layer); 4] = [
        ("no-new-privs", no_new_privs),
        ("capabilities", drop_capabilities),
        ("landlock", restrict_filesystem),
        ("seccomp", filter_syscalls),
    ];

    fn no_new_privs(_: &PermissionSet) -> Result<(), String> {
        nix::sys::prctl::set_no_new_privs().map_err(|e| e.to_string())
    }

    fn drop_capabilities(_: &PermissionSet) -> Result<(), String> {
        for set in [CapSet::Effective, CapSet::Permitted, CapSet::Inheritable] {
            caps::clear(None, set).map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    fn restrict_filesystem(permissions: &PermissionSet) -> Result<(), String> {
        if permissions.has(Capability::Filesystem) {
            return Ok(());
        }
        let status = Ruleset::default()
            .handle_access(AccessFs::from_all(ABI::V2))
            .and_then(|ruleset| ruleset.create())
            .and_then(|ruleset| ruleset.restrict_self())
            .map_err(|e| e.to_string())?;
        if status.ruleset == RulesetStatus::NotEnforced {
            return Err("not supported by the running kernel".into());
        }
        Ok(())
    }

    /// Syscalls refused with `EPERM` unless the matching capability is granted
    fn denied_syscalls(permissions: &PermissionSet) -> Vec<i64> {
        let mut denied = Vec::new();
        if !permissions.has(Capability::Network) {
            denied.extend([libc::SYS_socket, libc::SYS_connect]);
        }
        if !permissions.has(Capability::ProcessControl) {
            denied.extend([libc::SYS_execve, libc::SYS_execveat, libc::SYS_ptrace]);
            #[cfg(target_arch = "x86_64")]
            denied.extend([libc::SYS_fork, libc::SYS_vfork]);
        }
        denied
    }

    /// `clone` flag patterns refused without the matching grant
    ///
    /// Threads carry `CLONE_THREAD`; new processes do not.
    fn refused_clones(permissions: &PermissionSet) -> Vec<bool> {
        let mut refused = Vec::new();
        if !permissions.has(Capability::SpawnThreads) {
            refused.push(true);
        }
        if !permissions.has(Capability::ProcessControl) {
            refused.push(false);
        }
        refused
    }

    fn clone_rule(with_thread: bool) -> Result<SeccompRule, String> {
        let flag = u64::try_from(libc::CLONE_THREAD).map_err(|e| e.to_string())?;
        let value = if with_thread { flag } else { 0 };
        let condition = SeccompCondition::new(0, SeccompCmpArgLen::Qword, SeccompCmpOp::MaskedEq(flag), value)
            .map_err(|e| e.to_string())?;
        SeccompRule::new(vec![condition]).map_err(|e| e.to_string())
    }

    fn install(rules: BTreeMap<i64, Vec<SeccompRule>>, errno: i32) -> Result<(), String> {
        let arch: TargetArch = std::env::consts::ARCH.try_into().map_err(|e| format!("{e:?}"))?;
        let errno = u32::try_from(errno).map_err(|e| e.to_string())?;
        let filter = SeccompFilter::new(rules, SeccompAction::Allow, SeccompAction::Errno(errno), arch)
            .map_err(|e| e.to_string())?;
        let program: BpfProgram = filter.try_into().map_err(|e: seccompiler::BackendError| e.to_string())?;
        seccompiler::apply_filter(&program).map_err(|e| e.to_string())
    }

    fn filter_syscalls(permissions: &PermissionSet) -> Result<(), String> {
        let mut rules: BTreeMap<i64, Vec<SeccompRule>> =
            denied_syscalls(permissions).into_iter().map(|nr| (nr, Vec::new())).collect();
        let refused = refused_clones(permissions);
        if !refused.is_empty() {
            let clone = refused.into_iter().map(clone_rule).collect::<Result<Vec<_>, _>>()?;
            rules.insert(libc::SYS_clone, clone);
        }
        let gate_clone3 = rules.contains_key(&libc::SYS_clone);
        if !rules.is_empty() {
            install(rules, libc::EPERM)?;
        }
        // clone3 hides its flags behind a pointer; ENOSYS sends libc back to clone
        if gate_clone3 {
            install(BTreeMap::from([(libc::SYS_clone3, Vec::new())]), libc::ENOSYS)?;
        }
        Ok(())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn grants_narrow_the_filter() {
            let minimal = denied_syscalls(&PermissionSet::minimal());
            assert!(minimal.contains(&libc::SYS_socket));
            assert!(minimal.contains(&libc::SYS_execve));

            let networked = PermissionSet::builder().grant(Capability::Network).build();
            let denied = denied_syscalls(&networked);
            assert!(!denied.contains(&libc::SYS_socket));
            assert!(denied.contains(&libc::SYS_execve));
        }

        #[test]
        fn thread_creation_needs_its_grant() {
            assert_eq!(refused_clones(&PermissionSet::minimal()), vec![true, false]);

            let threads = PermissionSet::builder().grant(Capability::SpawnThreads).build();
            assert_eq!(refused_clones(&threads), vec![false]);

            let both = PermissionSet::builder()
                .grant(Capability::SpawnThreads)
                .grant(Capability::ProcessControl)
                .build();
            assert!(refused_clones(&both).is_empty());
            assert!(clone_rule(true).is_ok());
        }
    }
}

/// Confine the calling thread according to `permissions`
///
/// Under [`SandboxMode::BestEffort`] a layer the host cannot apply is
/// logged and skipped; under [`SandboxMode::Enforce`] it fails the call.
#[cfg(target_os = "linux")]
pub fn confine(permissions: &PermissionSet, mode: SandboxMode) -> Result<()> {
    if mode == SandboxMode::Off {
        return Ok(());
    }
    for (name, apply) in linux::LAYERS {
        match apply(permissions) {
            Ok(()) => tracing::trace!(layer = name, "sandbox layer applied"),
            Err(reason) if mode == SandboxMode::Enforce => {
                return Err(SkiffError::Sandbox(format!("{name}: {reason}")));
            }
            Err(reason) => tracing::warn!(layer = name, %reason, "sandbox layer not applied"),
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn confine(_permissions: &PermissionSet, mode: SandboxMode) -> Result<()> {
    match mode {
        SandboxMode::Enforce => Err(SkiffError::Sandbox("confinement requires Linux".into())),
        SandboxMode::Off | SandboxMode::BestEffort => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn off_is_a_no_op() {
        assert!(confine(&PermissionSet::none(), SandboxMode::Off).is_ok());
    }
}
