// sis_core/src/domain.rs
use std::collections::HashSet;

use crate::error::{Result, SisError};

/// Name of the synthetic batch column every imported row starts with.
pub const ORDER_CODE: &str = "orderCode";

/// One row as an ordered column -> value mapping.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Record {
    fields: Vec<(String, String)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert; replaces the value if the column already exists.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(column, value);
        self
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<String>) {
        let column = column.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v.as_str())
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(c, _)| c.as_str())
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Header plus rows, in insertion order. Every row has exactly one cell per column.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Dataset {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from records; the first record fixes the header.
    pub fn from_records<'a, I>(records: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a Record>,
    {
        let mut it = records.into_iter().peekable();
        let mut ds = match it.peek() {
            Some(first) => Dataset::new(first.columns()),
            None => return Ok(Dataset::empty()),
        };
        for rec in it {
            ds.push_record(rec)?;
        }
        Ok(ds)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<String>> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// True when there is no header at all (as opposed to a header with no rows).
    pub fn has_header(&self) -> bool {
        !self.columns.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn push_row(&mut self, row: Vec<String>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(SisError::Format(format!(
                "row has {} cell(s), header has {}",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Append a record, matching fields by column name.
    pub fn push_record(&mut self, rec: &Record) -> Result<()> {
        let missing: Vec<String> = self
            .columns
            .iter()
            .filter(|c| rec.get(c).is_none())
            .cloned()
            .collect();
        let extra: Vec<String> = rec
            .columns()
            .filter(|c| self.column_index(c).is_none())
            .map(String::from)
            .collect();
        if !missing.is_empty() || !extra.is_empty() {
            return Err(SisError::SchemaMismatch { missing, extra });
        }
        let row = self
            .columns
            .iter()
            .map(|c| rec.get(c).unwrap_or_default().to_string())
            .collect();
        self.rows.push(row);
        Ok(())
    }

    pub fn record(&self, index: usize) -> Option<Record> {
        self.rows.get(index).map(|row| Record {
            fields: self.columns.iter().cloned().zip(row.iter().cloned()).collect(),
        })
    }

    pub fn records(&self) -> impl Iterator<Item = Record> + '_ {
        (0..self.rows.len()).filter_map(|i| self.record(i))
    }

    /// Concatenate `other` after `self`; both must share the same header.
    pub fn extend(&mut self, other: Dataset) -> Result<()> {
        if !self.has_header() {
            *self = other;
            return Ok(());
        }
        let other = other.aligned_to(&self.columns)?;
        self.rows.extend(other.rows);
        Ok(())
    }

    /// Keep only the listed rows (by index), preserving order.
    pub fn retain_indices(&mut self, keep: impl Fn(usize) -> bool) {
        let mut i = 0;
        self.rows.retain(|_| {
            let k = keep(i);
            i += 1;
            k
        });
    }

    /// Strict projection: every requested column must exist.
    pub fn project(&self, wanted: &[String]) -> Result<Dataset> {
        let unknown: Vec<&str> = wanted
            .iter()
            .filter(|c| self.column_index(c).is_none())
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(SisError::Validation(format!(
                "unknown column(s): {}",
                unknown.join(", ")
            )));
        }
        Ok(self.select(wanted))
    }

    /// Permissive projection: unknown columns are dropped and returned.
    pub fn project_lenient(&self, wanted: &[String]) -> (Dataset, Vec<String>) {
        let (known, unknown): (Vec<String>, Vec<String>) = wanted
            .iter()
            .cloned()
            .partition(|c| self.column_index(c).is_some());
        (self.select(&known), unknown)
    }

    fn select(&self, wanted: &[String]) -> Dataset {
        let idx: Vec<usize> = wanted
            .iter()
            .filter_map(|c| self.column_index(c))
            .collect();
        Dataset {
            columns: idx.iter().map(|&i| self.columns[i].clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|r| idx.iter().map(|&i| r[i].clone()).collect())
                .collect(),
        }
    }

    /// Insert a constant column in front of the header.
    pub fn prepend_column(&mut self, name: &str, value: &str) {
        if let Some(pos) = self.column_index(name) {
            self.columns.remove(pos);
            for row in &mut self.rows {
                row.remove(pos);
            }
        }
        self.columns.insert(0, name.to_string());
        for row in &mut self.rows {
            row.insert(0, value.to_string());
        }
    }

    /// Reorder columns to `header`. The column *sets* must be equal.
    pub fn aligned_to(self, header: &[String]) -> Result<Dataset> {
        let mut seen = HashSet::new();
        if let Some(dup) = self.columns.iter().find(|c| !seen.insert(c.as_str())) {
            return Err(SisError::Validation(format!("duplicate column '{dup}'")));
        }
        if self.columns == header {
            return Ok(self);
        }
        let missing: Vec<String> = header
            .iter()
            .filter(|c| self.column_index(c).is_none())
            .cloned()
            .collect();
        let extra: Vec<String> = self
            .columns
            .iter()
            .filter(|c| !header.contains(c))
            .cloned()
            .collect();
        if !missing.is_empty() || !extra.is_empty() {
            return Err(SisError::SchemaMismatch { missing, extra });
        }
        Ok(self.select(header))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dataset {
        let recs = vec![
            Record::new().with("a", "A").with("q", "10"),
            Record::new().with("a", "B").with("q", "20"),
        ];
        Dataset::from_records(&recs).unwrap()
    }

    #[test]
    fn records_roundtrip_through_dataset() {
        let ds = sample();
        assert_eq!(ds.columns(), ["a", "q"]);
        let first = ds.record(0).unwrap();
        assert_eq!(first.get("q"), Some("10"));
        assert_eq!(ds.records().count(), 2);
    }

    #[test]
    fn strict_projection_rejects_unknown_columns() {
        let ds = sample();
        let err = ds.project(&["q".into(), "nope".into()]).unwrap_err();
        assert!(matches!(err, SisError::Validation(m) if m.contains("nope")));
        let p = ds.project(&["q".into(), "a".into()]).unwrap();
        assert_eq!(p.columns(), ["q", "a"]);
        assert_eq!(p.rows()[1], vec!["20".to_string(), "B".to_string()]);
    }

    #[test]
    fn lenient_projection_reports_dropped_columns() {
        let (p, dropped) = sample().project_lenient(&["nope".into(), "a".into()]);
        assert_eq!(p.columns(), ["a"]);
        assert_eq!(dropped, vec!["nope".to_string()]);
    }

    #[test]
    fn prepend_column_goes_first() {
        let mut ds = sample();
        ds.prepend_column(ORDER_CODE, "batch-7");
        assert_eq!(ds.columns()[0], ORDER_CODE);
        assert!(ds.rows().iter().all(|r| r[0] == "batch-7"));
    }

    #[test]
    fn alignment_reorders_same_set_and_rejects_different_set() {
        let ds = Dataset::new(["q", "a"]);
        let header = vec!["a".to_string(), "q".to_string()];
        assert_eq!(ds.clone().aligned_to(&header).unwrap().columns(), ["a", "q"]);

        let ds = Dataset::new(["a", "z"]);
        match ds.aligned_to(&header).unwrap_err() {
            SisError::SchemaMismatch { missing, extra } => {
                assert_eq!(missing, vec!["q".to_string()]);
                assert_eq!(extra, vec!["z".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
