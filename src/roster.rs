//! Roster loading: identity rows exported from a spreadsheet as JSON.
//!
//! Two shapes are accepted:
//!
//! ```json
//! [{"Class": "10A", "No": 12, "Name": "Ali"}]
//! {"columns": ["Class", "No", "Name"], "rows": [["10A", 12, "Ali"]]}
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::identity::RawRow;

#[derive(Debug, Clone, Default)]
pub struct Roster {
    /// Column headers in first-seen order.
    pub columns: Vec<String>,
    pub rows: Vec<RawRow>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RosterFile {
    Objects(Vec<Map<String, Value>>),
    Table {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
}

impl Roster {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read records file: {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Failed to parse records file: {}", path.display()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let file: RosterFile =
            serde_json::from_str(content).context("expected an array of objects or {columns, rows}")?;

        let mut roster = Roster::default();
        match file {
            RosterFile::Objects(objects) => {
                for (i, object) in objects.into_iter().enumerate() {
                    let mut values = HashMap::with_capacity(object.len());
                    for (column, value) in object {
                        if !roster.columns.contains(&column) {
                            roster.columns.push(column.clone());
                        }
                        values.insert(column, cell_text(&value));
                    }
                    roster.rows.push(RawRow {
                        index: i + 1,
                        values,
                    });
                }
            }
            RosterFile::Table { columns, rows } => {
                for (i, cells) in rows.into_iter().enumerate() {
                    if cells.len() > columns.len() {
                        anyhow::bail!(
                            "row {} has {} cells but only {} columns are declared",
                            i + 1,
                            cells.len(),
                            columns.len()
                        );
                    }
                    let values = columns
                        .iter()
                        .cloned()
                        .zip(cells.iter().map(cell_text).chain(std::iter::repeat(String::new())))
                        .collect();
                    roster.rows.push(RawRow {
                        index: i + 1,
                        values,
                    });
                }
                roster.columns = columns;
            }
        }
        Ok(roster)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Spreadsheet exports often carry numbers where text is meant (student numbers, IDs).
fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_rows() {
        let roster = Roster::from_json(
            r#"[
                {"Class": "10A", "No": 12, "Name": "Ali", "TC": 10000000146},
                {"Class": "10B", "No": 7.0, "Name": null, "Extra": true}
            ]"#,
        )
        .unwrap();

        assert_eq!(roster.len(), 2);
        assert_eq!(roster.rows[0].index, 1);
        assert_eq!(roster.rows[0].value("No"), Some("12"));
        assert_eq!(roster.rows[0].value("TC"), Some("10000000146"));
        assert_eq!(roster.rows[1].value("No"), Some("7"));
        assert_eq!(roster.rows[1].value("Name"), None);
        assert_eq!(roster.rows[1].value("Extra"), Some("true"));
        assert!(roster.columns.contains(&"Extra".to_string()));
        assert_eq!(roster.columns.len(), 5);
    }

    #[test]
    fn test_table_rows() {
        let roster = Roster::from_json(
            r#"{"columns": ["Class", "No", "Name"], "rows": [["10A", 12, "Ali"], ["10B", 3]]}"#,
        )
        .unwrap();

        assert_eq!(roster.columns, vec!["Class", "No", "Name"]);
        assert_eq!(roster.rows[1].index, 2);
        assert_eq!(roster.rows[1].value("No"), Some("3"));
        assert_eq!(roster.rows[1].value("Name"), None);
    }

    #[test]
    fn test_malformed_input() {
        assert!(Roster::from_json("{\"rows\": 3}").is_err());
        assert!(Roster::from_json(r#"{"columns": ["A"], "rows": [["x", "y"]]}"#).is_err());
        assert!(Roster::from_json("not json").is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = Roster::load(Path::new("/nonexistent/records.json")).unwrap_err();
        assert!(err.to_string().contains("records.json"));
    }
}
