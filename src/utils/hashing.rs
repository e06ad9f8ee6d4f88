//! Stable fingerprints for cache ownership.

use sha2::{Digest, Sha256};

/// Fingerprint of a report's raw bytes. A persisted cache is only reloaded for
/// a report with the same fingerprint.
pub fn report_fingerprint(report_bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(report_bytes);
    let result = hasher.finalize();
    format!("{:x}", result)[..16].to_string()
}
