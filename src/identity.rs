//! Identity record resolution.
//!
//! Turns raw roster rows into [`IdentityRecord`]s with unique, file-system safe
//! keys. The resolver never touches the file system; it only reports.

use clap::ValueEnum;
use std::collections::HashMap;
use std::fmt;
use strum_macros::{Display, EnumString};
use thiserror::Error;

use crate::utils::sanitize_key;

/// One roster row, values keyed by column header.
#[derive(Debug, Clone, Default)]
pub struct RawRow {
    /// 1-based data row number, used in every report.
    pub index: usize,
    pub values: HashMap<String, String>,
}

impl RawRow {
    /// Trimmed, non-empty value of a column.
    pub fn value(&self, column: &str) -> Option<&str> {
        self.values
            .get(column)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// Letter case applied to the joined naming values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum TextCase {
    /// Keep the roster's spelling
    #[default]
    AsIs,
    Upper,
    Lower,
    /// First letter upper case, the rest lower case
    Sentence,
    /// Every word capitalised, with Turkish dotted and dotless i
    Title,
}

impl TextCase {
    pub fn apply(&self, text: &str) -> String {
        match self {
            TextCase::AsIs => text.to_string(),
            TextCase::Upper => text.chars().flat_map(char::to_uppercase).collect(),
            TextCase::Lower => text.chars().map(lower_plain).collect(),
            TextCase::Sentence => {
                let mut chars = text.chars();
                match chars.next() {
                    Some(first) => {
                        let mut out = turkish_upper(first);
                        out.extend(chars.map(turkish_lower));
                        out
                    }
                    None => String::new(),
                }
            }
            TextCase::Title => turkish_title_case(text),
        }
    }
}

/// Lower case without the combining dot Unicode adds to `İ`.
fn lower_plain(c: char) -> char {
    match c {
        'İ' => 'i',
        c => c.to_lowercase().next().unwrap_or(c),
    }
}

fn turkish_upper(c: char) -> String {
    match c {
        'i' => "İ".to_string(),
        'ı' => "I".to_string(),
        c => c.to_uppercase().collect(),
    }
}

fn turkish_lower(c: char) -> char {
    match c {
        'I' => 'ı',
        'İ' => 'i',
        c => c.to_lowercase().next().unwrap_or(c),
    }
}

/// Capitalise each run of letters and digits; everything else is kept as a boundary.
fn turkish_title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;
    for c in text.chars() {
        if c.is_alphanumeric() {
            if at_word_start {
                out.push_str(&turkish_upper(c));
            } else {
                out.push(turkish_lower(c));
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

/// Columns joined into the identity key.
#[derive(Debug, Clone)]
pub struct NamingSelection {
    pub columns: Vec<String>,
    pub separator: String,
    pub text_case: TextCase,
}

impl Default for NamingSelection {
    fn default() -> Self {
        Self {
            columns: Vec::new(),
            separator: "_".to_string(),
            text_case: TextCase::AsIs,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResolverOptions {
    pub naming: NamingSelection,
    pub national_id_column: Option<String>,
    pub class_column: Option<String>,
    /// Column whose value is searched for in photo file names.
    pub match_column: Option<String>,
    /// Drop records whose national ID fails the checksum instead of warning.
    pub strict_national_id: bool,
}

impl ResolverOptions {
    /// Configured columns absent from the roster header.
    pub fn missing_columns(&self, available: &[String]) -> Vec<String> {
        self.naming
            .columns
            .iter()
            .chain(self.national_id_column.iter())
            .chain(self.class_column.iter())
            .chain(self.match_column.iter())
            .filter(|c| !available.iter().any(|a| a == *c))
            .cloned()
            .collect()
    }
}

/// A validated subject of the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    pub key: String,
    pub naming_values: Vec<String>,
    pub class_label: Option<String>,
    pub national_id: Option<String>,
    pub match_token: Option<String>,
    pub row_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NationalIdError {
    #[error("expected 11 digits, got {0} characters")]
    WrongLength(usize),
    #[error("contains a non-digit character")]
    NotNumeric,
    #[error("must not start with 0")]
    LeadingZero,
    #[error("10th digit should be {expected}")]
    TenthDigit { expected: u32 },
    #[error("11th digit should be {expected}")]
    EleventhDigit { expected: u32 },
}

/// Validate an 11-digit national identity number.
pub fn validate_national_id(value: &str) -> Result<(), NationalIdError> {
    let len = value.chars().count();
    if len != 11 {
        return Err(NationalIdError::WrongLength(len));
    }
    let digits: Vec<u32> = value
        .chars()
        .map(|c| c.to_digit(10))
        .collect::<Option<Vec<_>>>()
        .ok_or(NationalIdError::NotNumeric)?;

    if digits[0] == 0 {
        return Err(NationalIdError::LeadingZero);
    }

    let odd_sum: i32 = [0, 2, 4, 6, 8].iter().map(|&i| digits[i] as i32).sum();
    let even_sum: i32 = [1, 3, 5, 7].iter().map(|&i| digits[i] as i32).sum();
    let tenth = (odd_sum * 7 - even_sum).rem_euclid(10) as u32;
    if digits[9] != tenth {
        return Err(NationalIdError::TenthDigit { expected: tenth });
    }

    let eleventh = digits[..10].iter().sum::<u32>() % 10;
    if digits[10] != eleventh {
        return Err(NationalIdError::EleventhDigit { expected: eleventh });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueKind {
    EmptyKey,
    DuplicateKey { key: String, rows: Vec<usize> },
    InvalidNationalId { value: String, reason: NationalIdError },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowIssue {
    pub row_index: usize,
    pub severity: Severity,
    pub kind: IssueKind,
}

impl fmt::Display for RowIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}: ", self.row_index)?;
        match &self.kind {
            IssueKind::EmptyKey => write!(f, "naming columns produce an empty key"),
            IssueKind::DuplicateKey { key, rows } => {
                let rows: Vec<String> = rows.iter().map(|r| r.to_string()).collect();
                write!(f, "duplicate key '{}' (rows {})", key, rows.join(", "))
            }
            IssueKind::InvalidNationalId { value, reason } => {
                write!(f, "invalid national ID '{}': {}", value, reason)
            }
        }
    }
}

/// Rows that could not be turned into records.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub issues: Vec<RowIssue>,
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let errors = self
            .issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .count();
        write!(f, "{} identity row(s) failed validation", errors)
    }
}

impl std::error::Error for ValidationReport {}

#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub records: Vec<IdentityRecord>,
    pub issues: Vec<RowIssue>,
}

impl Resolution {
    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &RowIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &RowIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning)
    }

    /// Records if no row failed, the full report otherwise.
    pub fn into_result(self) -> Result<Vec<IdentityRecord>, ValidationReport> {
        if self.has_errors() {
            Err(ValidationReport {
                issues: self.issues,
            })
        } else {
            Ok(self.records)
        }
    }
}

/// Build identity records from roster rows.
///
/// Rows with an empty key, rows sharing a key with any other row (compared
/// case-insensitively) and, in strict mode, rows with a bad national ID are
/// reported as errors and produce no record.
pub fn resolve_records(rows: &[RawRow], options: &ResolverOptions) -> Resolution {
    let separator = options.naming.separator.as_str();
    let mut issues = Vec::new();
    let mut candidates: Vec<IdentityRecord> = Vec::with_capacity(rows.len());
    let mut rejected_rows: Vec<usize> = Vec::new();

    for row in rows {
        let naming_values: Vec<String> = options
            .naming
            .columns
            .iter()
            .filter_map(|c| row.value(c))
            .map(str::to_string)
            .collect();

        let joined = options.naming.text_case.apply(&naming_values.join(separator));
        let key = sanitize_key(&joined, separator);
        if key.is_empty() {
            issues.push(RowIssue {
                row_index: row.index,
                severity: Severity::Error,
                kind: IssueKind::EmptyKey,
            });
            continue;
        }

        let national_id = options
            .national_id_column
            .as_deref()
            .and_then(|c| row.value(c))
            .map(str::to_string);

        if let Some(value) = &national_id {
            if let Err(reason) = validate_national_id(value) {
                let severity = if options.strict_national_id {
                    Severity::Error
                } else {
                    Severity::Warning
                };
                issues.push(RowIssue {
                    row_index: row.index,
                    severity,
                    kind: IssueKind::InvalidNationalId {
                        value: value.clone(),
                        reason,
                    },
                });
                if severity == Severity::Error {
                    rejected_rows.push(row.index);
                }
            }
        }

        candidates.push(IdentityRecord {
            key,
            naming_values,
            class_label: options
                .class_column
                .as_deref()
                .and_then(|c| row.value(c))
                .map(str::to_string),
            national_id,
            match_token: options
                .match_column
                .as_deref()
                .and_then(|c| row.value(c))
                .map(str::to_string),
            row_index: row.index,
        });
    }

    let mut by_key: HashMap<String, Vec<usize>> = HashMap::new();
    for record in &candidates {
        by_key
            .entry(record.key.to_lowercase())
            .or_default()
            .push(record.row_index);
    }

    let mut records = Vec::with_capacity(candidates.len());
    for record in candidates {
        let sharing = &by_key[&record.key.to_lowercase()];
        if sharing.len() > 1 {
            issues.push(RowIssue {
                row_index: record.row_index,
                severity: Severity::Error,
                kind: IssueKind::DuplicateKey {
                    key: record.key.clone(),
                    rows: sharing.clone(),
                },
            });
        } else if !rejected_rows.contains(&record.row_index) {
            records.push(record);
        }
    }

    issues.sort_by_key(|i| i.row_index);
    Resolution { records, issues }
}
