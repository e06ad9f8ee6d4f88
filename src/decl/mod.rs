//! Declaration index: which class or function encloses a line range.

use std::collections::HashMap;

pub mod table;

pub use table::{read_declaration_table, DeclarationRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub name: String,
    pub start_line: usize,
    pub end_line: usize,
}

impl Declaration {
    pub fn contains(&self, start_line: usize, end_line: usize) -> bool {
        self.start_line <= start_line && end_line <= self.end_line
    }
}

/// Declarations grouped by the file that defines them. Rows within a file keep
/// table order and are not assumed sorted.
#[derive(Debug, Clone, Default)]
pub struct DeclarationIndex {
    by_file: HashMap<String, Vec<Declaration>>,
}

impl DeclarationIndex {
    pub fn build<I>(records: I) -> Self
    where
        I: IntoIterator<Item = DeclarationRecord>,
    {
        let mut by_file: HashMap<String, Vec<Declaration>> = HashMap::new();
        for record in records {
            by_file.entry(record.file).or_default().push(Declaration {
                name: record.name,
                start_line: record.start_line,
                end_line: record.end_line,
            });
        }
        Self { by_file }
    }

    /// Innermost declaration containing `[start_line, end_line]`.
    ///
    /// Among containing candidates the one opening last wins; for well-formed
    /// sources that is the most deeply nested scope. Equal start lines keep the
    /// first row seen.
    pub fn find_enclosing(
        &self,
        file: &str,
        start_line: usize,
        end_line: usize,
    ) -> Option<&Declaration> {
        let mut best: Option<&Declaration> = None;
        for decl in self.by_file.get(file)? {
            if !decl.contains(start_line, end_line) {
                continue;
            }
            match best {
                Some(current) if decl.start_line <= current.start_line => {}
                _ => best = Some(decl),
            }
        }
        best
    }

    pub fn declaration_count(&self) -> usize {
        self.by_file.values().map(Vec::len).sum()
    }
}
