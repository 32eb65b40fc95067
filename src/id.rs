//! ID generation utilities for genserve
//!
//! Job ids name per-job work directories and snapshot files, so they must be
//! unique within a process and safe to use as a file name.

use rand::Rng;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Generate a unique job ID
///
/// Format: `job-{timestamp_ms}-{random_hex}`
/// Example: `job-1738300800123-a1b2c3d4`
pub fn generate_job_id() -> String {
    let timestamp = now_ms();
    let random: u32 = rand::rng().random();
    format!("job-{}-{:08x}", timestamp, random)
}

/// Generate the ID used for the startup warm-up run
///
/// Format: `warmup-{timestamp_ms}`
pub fn generate_warmup_id() -> String {
    format!("warmup-{}", now_ms())
}
