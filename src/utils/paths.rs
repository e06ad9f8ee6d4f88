//! Path normalization

use std::path::{Path, PathBuf};

/// Normalize an artifact URI from a report into a forward-slash relative path.
pub fn normalize_path(path: &str) -> String {
    let path = path.strip_prefix("file://").unwrap_or(path);
    path.replace('\\', "/")
}

/// Resolve an artifact URI against the project source root.
pub fn resolve_source_path(source_root: &Path, uri: &str) -> PathBuf {
    let normalized = normalize_path(uri);
    let candidate = Path::new(&normalized);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        source_root.join(candidate)
    }
}
