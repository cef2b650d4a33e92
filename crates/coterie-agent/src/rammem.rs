//! Resident-memory cap install at process entry. Ported from the teacher's
//! `_apply_ram_cap` (Unix-only `resource.setrlimit`, silently skipped
//! elsewhere — the supervisor's RSS poll is the enforcement path on hosts
//! that don't support a self-imposed cap).

#[cfg(unix)]
pub fn apply_ram_cap_mb(cap_mb: u64) {
    let limit_bytes = cap_mb * 1024 * 1024;
    if let Err(err) = rlimit::setrlimit(rlimit::Resource::AS, limit_bytes, limit_bytes) {
        tracing::warn!(error = %err, cap_mb, "failed to install resident-memory cap, continuing uncapped");
    }
}

#[cfg(not(unix))]
pub fn apply_ram_cap_mb(_cap_mb: u64) {
    tracing::debug!("resident-memory cap unsupported on this host, relying on supervisor RSS polling");
}
