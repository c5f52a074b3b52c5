//! Roster file loading
//!
//! Reads the subscription roster: a delimited text file with one row per
//! user. Bytes are decoded as UTF-8 (BOM stripped) with a GBK fallback, the
//! delimiter is detected from the header line, and columns are located by
//! Chinese or English header names.

use std::fs;
use std::path::Path;
use thiserror::Error;

/// Accepted header names per column, compared case-insensitively
const EMPLOYEE_ID_HEADERS: &[&str] = &["工号", "employee_id", "employee id"];
const NAME_HEADERS: &[&str] = &["姓名", "name", "display_name", "display name"];
const EMAIL_HEADERS: &[&str] = &["邮箱", "email", "e-mail", "mail"];
const SUBSCRIPTION_HEADERS: &[&str] = &["订阅项目", "subscription", "subscription_label"];

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("could not read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("roster file is empty")]
    Empty,

    #[error("roster file is neither UTF-8 nor GBK text")]
    Undecodable,

    #[error("roster file is missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("roster file has a header but no data rows")]
    NoRows,

    #[error("malformed roster file: {0}")]
    Csv(#[from] csv::Error),
}

/// One data row, trimmed but otherwise as written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterRow {
    /// 1-based line number in the file (the header is row 1)
    pub row: usize,
    pub employee_id: String,
    pub name: String,
    pub email: String,
    pub subscription: String,
}

/// Row dropped while loading
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRow {
    pub row: usize,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct Roster {
    pub rows: Vec<RosterRow>,
    pub skipped: Vec<SkippedRow>,
    /// Encoding the file was decoded with
    pub encoding: &'static str,
    pub delimiter: char,
}

/// Load a roster file from disk
pub fn load(path: &Path) -> Result<Roster, LoadError> {
    let bytes = fs::read(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let (content, encoding) = decode(&bytes)?;
    log::info!("Read {} using {encoding}", path.display());
    let mut roster = parse(&content)?;
    roster.encoding = encoding;
    Ok(roster)
}

/// Decode file bytes: UTF-8 (BOM stripped) first, then GBK
pub fn decode(bytes: &[u8]) -> Result<(String, &'static str), LoadError> {
    if bytes.is_empty() {
        return Err(LoadError::Empty);
    }
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    if let Ok(text) = std::str::from_utf8(bytes) {
        return Ok((text.to_string(), "UTF-8"));
    }
    let (text, had_errors) = encoding_rs::GBK.decode_without_bom_handling(bytes);
    if had_errors {
        return Err(LoadError::Undecodable);
    }
    Ok((text.into_owned(), "GBK"))
}

/// Pick the delimiter from the header line: comma, then tab, then semicolon
pub fn detect_delimiter(header: &str) -> char {
    if header.contains(',') {
        ','
    } else if header.contains('\t') {
        '\t'
    } else if header.contains(';') {
        ';'
    } else {
        ','
    }
}

fn find_column(headers: &[String], names: &[&str]) -> Option<usize> {
    headers.iter().position(|h| {
        let h = h.trim().trim_start_matches('\u{feff}').to_lowercase();
        names.iter().any(|n| h == *n)
    })
}

/// 1-based physical line of the record starting at `byte`.
///
/// The reader may place a record after blank lines it skipped, so line
/// breaks directly at `byte` are stepped over first.
fn line_at(content: &str, byte: usize) -> usize {
    let start = content.get(byte..).map_or(content.len(), |rest| {
        byte + rest.len() - rest.trim_start_matches(['\r', '\n']).len()
    });
    content.as_bytes()[..start]
        .iter()
        .filter(|b| **b == b'\n')
        .count()
        + 1
}

/// Parse decoded roster text
pub fn parse(content: &str) -> Result<Roster, LoadError> {
    let content = content.trim_start_matches('\u{feff}');
    let header_line = content
        .lines()
        .find(|l| !l.trim().is_empty())
        .ok_or(LoadError::Empty)?;
    let delimiter = detect_delimiter(header_line);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let columns = [
        ("工号 / employee_id", find_column(&headers, EMPLOYEE_ID_HEADERS)),
        ("姓名 / name", find_column(&headers, NAME_HEADERS)),
        ("邮箱 / email", find_column(&headers, EMAIL_HEADERS)),
        ("订阅项目 / subscription", find_column(&headers, SUBSCRIPTION_HEADERS)),
    ];
    let missing: Vec<String> = columns
        .iter()
        .filter(|(_, idx)| idx.is_none())
        .map(|(name, _)| (*name).to_string())
        .collect();
    if !missing.is_empty() {
        return Err(LoadError::MissingColumns(missing));
    }
    let [id_idx, name_idx, email_idx, sub_idx] = columns.map(|(_, idx)| idx.unwrap_or_default());
    let width = id_idx.max(name_idx).max(email_idx).max(sub_idx) + 1;

    let mut rows = Vec::new();
    let mut skipped = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row = record.position().map_or(rows.len() + skipped.len() + 2, |p| {
            line_at(content, usize::try_from(p.byte()).unwrap_or(usize::MAX))
        });

        if record.iter().all(str::is_empty) {
            continue;
        }
        if record.len() < width {
            log::warn!("Row {row}: expected {width} fields, found {}", record.len());
            skipped.push(SkippedRow {
                row,
                reason: format!("expected {width} fields, found {}", record.len()),
            });
            continue;
        }

        let field = |idx: usize| record.get(idx).unwrap_or_default().to_string();
        rows.push(RosterRow {
            row,
            employee_id: field(id_idx),
            name: field(name_idx),
            email: field(email_idx),
            subscription: field(sub_idx),
        });
    }

    if rows.is_empty() && skipped.is_empty() {
        return Err(LoadError::NoRows);
    }
    log::info!("Parsed {} roster rows ({} skipped)", rows.len(), skipped.len());

    Ok(Roster {
        rows,
        skipped,
        encoding: "UTF-8",
        delimiter,
    })
}
