//! Shared CLI utilities.

/// Split a comma-separated flag value into trimmed, non-empty items.
/// `None` when the flag was not given, so the config value stays in effect.
pub fn split_list(value: Option<&str>) -> Option<Vec<String>> {
    let value = value?;
    Some(
        value
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(String::from)
            .collect(),
    )
}
