//! Encoding detection and source reading with UTF-8 fallback logic.
//!
//! Analyzed projects are not always UTF-8 clean. Snippets must still render, so
//! reads go through:
//! - BOM detection (UTF-8, UTF-16 LE/BE)
//! - UTF-8 fast-path with strict validation
//! - Fallback encoding detection using chardetng
//! - Replacement characters as a last resort

use anyhow::{Context, Result};
use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8};
use std::fs::File;
use std::io::Read;
use std::path::Path;

const DEFAULT_SAMPLE_SIZE: usize = 8192;

/// Detect the encoding of a file from its first `sample_size` bytes.
///
/// Returns a normalized label (e.g. "utf-8", "utf-8-sig", "utf-16-le"), or
/// "utf-8" when the file cannot be sampled.
pub fn detect_encoding(path: &Path, sample_size: usize) -> String {
    detect_encoding_impl(path, sample_size).unwrap_or_else(|_| "utf-8".to_string())
}

fn detect_encoding_impl(path: &Path, sample_size: usize) -> Result<String> {
    let mut file = File::open(path)?;
    let mut sample = vec![0u8; sample_size];
    let bytes_read = file.read(&mut sample)?;
    sample.truncate(bytes_read);

    if sample.is_empty() {
        return Ok("utf-8".to_string());
    }

    if sample.starts_with(&[0xef, 0xbb, 0xbf]) {
        return Ok("utf-8-sig".to_string());
    }
    if sample.starts_with(&[0xff, 0xfe]) {
        return Ok("utf-16-le".to_string());
    }
    if sample.starts_with(&[0xfe, 0xff]) {
        return Ok("utf-16-be".to_string());
    }

    if std::str::from_utf8(&sample).is_ok() {
        return Ok("utf-8".to_string());
    }

    let mut detector = EncodingDetector::new();
    detector.feed(&sample, true);
    let encoding = detector.guess(None, true);

    let name = encoding.name().to_lowercase();
    if name.contains("utf-8") || name == "ascii" {
        Ok("utf-8".to_string())
    } else {
        Ok(name)
    }
}

/// Read a file with encoding detection.
///
/// Returns `(content, encoding_used)`. Fails only when the file itself cannot
/// be read.
fn read_file_safe(path: &Path) -> Result<(String, String)> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;

    if let Ok(content) = std::str::from_utf8(&bytes) {
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);
        return Ok((content.to_string(), "utf-8".to_string()));
    }

    let detected = detect_encoding(path, DEFAULT_SAMPLE_SIZE);
    if let Some((content, used_enc)) = try_read_with_encoding(path, &detected) {
        return Ok((content, used_enc));
    }

    let (cow, _, _) = UTF_8.decode(&bytes);
    Ok((cow.into_owned(), "utf-8".to_string()))
}

fn try_read_with_encoding(path: &Path, encoding_name: &str) -> Option<(String, String)> {
    let encoding = Encoding::for_label(encoding_name.as_bytes())?;
    let bytes = std::fs::read(path).ok()?;

    // decode() sniffs and strips a BOM itself
    let (decoded, used, _had_errors) = encoding.decode(&bytes);
    Some((decoded.into_owned(), used.name().to_lowercase()))
}

/// Read a source file as lines that keep their terminators, so line `n`
/// (1-based) is `lines[n - 1]`.
pub fn read_source_lines(path: &Path) -> Result<Vec<String>> {
    let (content, _) = read_file_safe(path)?;
    Ok(content.split_inclusive('\n').map(str::to_string).collect())
}
