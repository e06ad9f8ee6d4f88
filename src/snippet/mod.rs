//! Declaration-aware code excerpts for oracle prompts.
//!
//! A snippet is a window of lines around a flow endpoint, clamped to the
//! enclosing function (or class, or file), wrapped in the enclosing class and
//! function header lines, with the endpoint line annotated.

use crate::decl::DeclarationIndex;
use crate::domain::{EndpointKind, Location};
use crate::utils::{read_source_lines, resolve_source_path};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

pub const DEFAULT_CONTEXT_RADIUS: usize = 4;

const START_ELLIPSIS: &str = "...\n";
const END_ELLIPSIS: &str = "    ...";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snippet {
    /// Excerpt with headers, elision markers and the annotated line.
    pub rendered: String,
    /// Window lines without headers, markers or annotation.
    pub raw: String,
    pub func_header: Option<String>,
    pub class_header: Option<String>,
}

pub struct SnippetExtractor<'a> {
    source_root: &'a Path,
    classes: &'a DeclarationIndex,
    functions: &'a DeclarationIndex,
    context_radius: usize,
    files: RefCell<HashMap<PathBuf, Option<Rc<Vec<String>>>>>,
}

impl<'a> SnippetExtractor<'a> {
    pub fn new(
        source_root: &'a Path,
        classes: &'a DeclarationIndex,
        functions: &'a DeclarationIndex,
        context_radius: usize,
    ) -> Self {
        Self {
            source_root,
            classes,
            functions,
            context_radius,
            files: RefCell::new(HashMap::new()),
        }
    }

    /// Excerpt around `location`, or `None` when its file cannot be read.
    pub fn extract(&self, location: &Location, kind: EndpointKind) -> Option<Snippet> {
        let lines = self.lines_of(&location.file)?;
        Some(render_snippet(
            &lines,
            location,
            kind,
            self.classes,
            self.functions,
            self.context_radius,
        ))
    }

    /// Trimmed text of the location's first line.
    pub fn source_line(&self, location: &Location) -> Option<String> {
        let lines = self.lines_of(&location.file)?;
        let idx = location.start_line.checked_sub(1)?;
        lines.get(idx).map(|line| line.trim().to_string())
    }

    pub fn functions(&self) -> &DeclarationIndex {
        self.functions
    }

    fn lines_of(&self, uri: &str) -> Option<Rc<Vec<String>>> {
        let path = resolve_source_path(self.source_root, uri);
        if let Some(cached) = self.files.borrow().get(&path) {
            return cached.clone();
        }
        let loaded = match read_source_lines(&path) {
            Ok(lines) => Some(Rc::new(lines)),
            Err(err) => {
                tracing::warn!("No snippet for {}: {:#}", path.display(), err);
                None
            }
        };
        self.files.borrow_mut().insert(path, loaded.clone());
        loaded
    }
}

/// Render a snippet from already-loaded file lines. Pure function of its inputs.
pub fn render_snippet(
    lines: &[String],
    location: &Location,
    kind: EndpointKind,
    classes: &DeclarationIndex,
    functions: &DeclarationIndex,
    context_radius: usize,
) -> Snippet {
    let start_line = location.start_line;
    let end_line = location.end_line;

    let class_decl = classes.find_enclosing(&location.file, start_line, end_line);
    let class_header = class_decl.and_then(|decl| {
        let text = header_text(lines, decl.start_line)?;
        Some(with_open_brace(text))
    });

    let func_decl = functions.find_enclosing(&location.file, start_line, end_line);
    let func_header = func_decl.map(|decl| match header_text(lines, decl.start_line) {
        Some(text) => with_open_brace(text),
        None => format!("{} () {{", decl.name),
    });

    // Boundary mixes a 1-based start with an exclusive 0-based end so that the
    // declaration line itself is left to the header.
    let (boundary_start, boundary_end) = match (func_decl, class_decl) {
        (Some(decl), _) | (None, Some(decl)) => (decl.start_line, decl.end_line),
        (None, None) => (0, lines.len()),
    };

    let window_start = start_line.saturating_sub(2 + context_radius).max(boundary_start);
    let window_end = (end_line + context_radius).min(boundary_end.saturating_sub(1));
    let start_ellipsis = if window_start > boundary_start { START_ELLIPSIS } else { "" };
    let end_ellipsis = if window_end + 2 < boundary_end { END_ELLIPSIS } else { "" };

    let marked_idx = start_line.checked_sub(1);
    let mut body = String::new();
    let mut raw = String::new();
    for (idx, line) in lines.iter().enumerate().take(window_end).skip(window_start) {
        if Some(idx) == marked_idx {
            let text = line.trim_end_matches(['\n', '\r']);
            body.push_str(&format!("{text} // <---- THIS IS THE {}\n", kind.label()));
            raw.push_str(text);
            raw.push('\n');
        } else if !line.trim().is_empty() {
            body.push_str(line);
            raw.push_str(line);
            if !line.ends_with('\n') {
                body.push('\n');
                raw.push('\n');
            }
        }
    }

    let mut rendered = String::new();
    if let Some(header) = &class_header {
        rendered.push_str(header);
        rendered.push('\n');
    }
    if let Some(header) = &func_header {
        rendered.push_str("  ");
        rendered.push_str(header);
        rendered.push('\n');
    }
    rendered.push_str("    ");
    rendered.push_str(start_ellipsis);
    rendered.push_str(&body);
    rendered.push_str(end_ellipsis);
    if func_header.is_some() {
        rendered.push_str("\n  }");
    }
    if class_header.is_some() {
        rendered.push_str("\n}");
    }

    Snippet { rendered, raw, func_header, class_header }
}

fn header_text(lines: &[String], decl_start_line: usize) -> Option<String> {
    let line = lines.get(decl_start_line.checked_sub(1)?)?;
    let text = line.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn with_open_brace(mut text: String) -> String {
    if !text.ends_with('{') {
        text.push_str(" {");
    }
    text
}
