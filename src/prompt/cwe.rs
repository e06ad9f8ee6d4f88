//! Built-in weakness catalog: description and defensive hint per CWE id.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CweEntry {
    pub id: &'static str,
    pub description: &'static str,
    pub hint: &'static str,
}

pub const CATALOG: &[CweEntry] = &[
    CweEntry {
        id: "022",
        description: "Path Traversal or Zip Slip",
        hint: "Note: please be careful about defensing against absolute paths and \"..\" paths. \
Just canonicalizing paths might not be sufficient for the defense.",
    },
    CweEntry {
        id: "078",
        description: "OS Command Injection",
        hint: "Note that other than typical Runtime.exec which is directly executing command, \
using Java Reflection to create dynamic objects with unsanitized inputs might also cause OS \
Command injection vulnerability. This includes deserializing objects from untrusted strings and \
similar functionalities. Writing to config files about library data may also induce unwanted \
execution of OS commands.",
    },
    CweEntry {
        id: "079",
        description: "Cross-Site Scripting",
        hint: "Please be careful about reading possibly tainted HTML input. During sanitization, \
do not assume the sanitization to be sufficient.",
    },
    CweEntry {
        id: "094",
        description: "Code Injection",
        hint: "Please note that dubious error messages can sometimes be handled by downstream code \
for execution, resulting in CWE-094 vulnerability. Injection of malicious values might lead to \
arbitrary code execution as well.",
    },
];

/// Bare three-digit id: `"CWE-78"`, `"cwe-078"`, `"78"` all become `"078"`.
pub fn normalize_cwe_id(raw: &str) -> String {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("CWE-")
        .or_else(|| trimmed.strip_prefix("cwe-"))
        .unwrap_or(trimmed);
    if !digits.is_empty() && digits.len() < 3 && digits.chars().all(|c| c.is_ascii_digit()) {
        format!("{digits:0>3}")
    } else {
        digits.to_string()
    }
}

pub fn lookup(id: &str) -> Option<&'static CweEntry> {
    let id = normalize_cwe_id(id);
    CATALOG.iter().find(|entry| entry.id == id)
}
