//! Group signatures: flows whose endpoints share function and message are
//! treated as the same question.

use crate::decl::DeclarationIndex;
use crate::domain::{CodeFlow, GroupSignature, Location};

/// `"{file}:{function}:{message}"`, or `"{file}#{start_line}"` when no
/// function encloses the location.
pub fn endpoint_context(location: &Location, functions: &DeclarationIndex) -> String {
    match functions.find_enclosing(&location.file, location.start_line, location.end_line) {
        Some(func) => format!("{}:{}:{}", location.file, func.name, location.message),
        None => format!("{}#{}", location.file, location.start_line),
    }
}

pub fn group_signature(flow: &CodeFlow, functions: &DeclarationIndex) -> GroupSignature {
    GroupSignature {
        source: endpoint_context(flow.source(), functions),
        sink: endpoint_context(flow.sink(), functions),
    }
}
