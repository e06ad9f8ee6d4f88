//! Declaration tables exported by the analyzer.
//!
//! The tables are CSV with a header row naming at least `file`, `name`,
//! `start_line` and `end_line` (any order, extra columns ignored). Fields may be
//! double-quoted with `""` escapes.

use crate::error::{FlowvetError, FlowvetResult};
use std::collections::HashMap;
use std::path::Path;

const REQUIRED_COLUMNS: [&str; 4] = ["file", "name", "start_line", "end_line"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclarationRecord {
    pub file: String,
    pub name: String,
    pub start_line: usize,
    pub end_line: usize,
}

pub fn read_declaration_table(path: &Path) -> FlowvetResult<Vec<DeclarationRecord>> {
    let content = std::fs::read_to_string(path)?;
    parse_declaration_table(&content, path)
}

pub fn parse_declaration_table(
    content: &str,
    path: &Path,
) -> FlowvetResult<Vec<DeclarationRecord>> {
    let mut lines = content.lines().enumerate().filter(|(_, line)| !line.trim().is_empty());

    let Some((_, header_line)) = lines.next() else {
        return Ok(Vec::new());
    };
    let header = split_csv_line(header_line.trim_start_matches('\u{feff}'));
    let columns: HashMap<String, usize> = header
        .iter()
        .enumerate()
        .map(|(idx, name)| (name.trim().to_ascii_lowercase(), idx))
        .collect();

    let mut positions = [0usize; 4];
    for (slot, column) in positions.iter_mut().zip(REQUIRED_COLUMNS) {
        *slot = *columns.get(column).ok_or_else(|| {
            FlowvetError::declaration_table(path, format!("missing column '{column}'"))
        })?;
    }
    let [file_idx, name_idx, start_idx, end_idx] = positions;

    let mut records = Vec::new();
    for (line_no, line) in lines {
        let fields = split_csv_line(line);
        let field = |idx: usize| fields.get(idx).map(|f| f.trim()).unwrap_or("");

        let (Ok(start_line), Ok(end_line)) =
            (field(start_idx).parse::<usize>(), field(end_idx).parse::<usize>())
        else {
            tracing::warn!(
                "{}:{}: skipping row with non-numeric line range",
                path.display(),
                line_no + 1
            );
            continue;
        };
        if field(file_idx).is_empty() {
            tracing::warn!("{}:{}: skipping row without a file", path.display(), line_no + 1);
            continue;
        }

        records.push(DeclarationRecord {
            file: field(file_idx).to_string(),
            name: field(name_idx).to_string(),
            start_line,
            end_line,
        });
    }
    Ok(records)
}

fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if current.is_empty() => in_quotes = true,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            '\r' if !in_quotes => {}
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn parses_quoted_rows_in_any_column_order() {
        let csv = "name,file,start_line,end_line,extra\n\
                   \"handle, request\",\"src/App.java\",10,30,x\n\
                   run,src/App.java,40,60,\n";
        let records = parse_declaration_table(csv, Path::new("funcs.csv")).expect("parse");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "handle, request");
        assert_eq!(records[0].file, "src/App.java");
        assert_eq!((records[1].start_line, records[1].end_line), (40, 60));
    }

    #[test]
    fn skips_malformed_rows() {
        let csv = "file,name,start_line,end_line\nsrc/A.java,a,one,3\n,b,1,2\nsrc/A.java,c,1,2\n";
        let records = parse_declaration_table(csv, Path::new("t.csv")).expect("parse");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "c");
    }

    #[test]
    fn missing_column_is_an_error() {
        let err = parse_declaration_table("file,name,start_line\n", Path::new("t.csv"))
            .expect_err("should fail");
        assert!(err.to_string().contains("end_line"));
    }

    #[test]
    fn doubled_quotes_unescape() {
        assert_eq!(
            split_csv_line("\"say \"\"hi\"\"\",b"),
            vec!["say \"hi\"".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn reads_from_disk() {
        let tmp = TempDir::new().expect("tmp");
        let path = tmp.path().join("classes.csv");
        fs::write(&path, "file,name,start_line,end_line\r\nsrc/A.java,A,1,50\r\n").expect("write");
        let records = read_declaration_table(&path).expect("read");
        assert_eq!(records[0].end_line, 50);
    }
}
