//! Shared helpers: encoding-tolerant reads, fingerprints, paths.

pub mod encoding;
pub mod hashing;
pub mod paths;

pub use encoding::read_source_lines;
pub use hashing::report_fingerprint;
pub use paths::{normalize_path, resolve_source_path};
