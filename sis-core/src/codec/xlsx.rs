use super::SheetCodec;
use crate::domain::Dataset;
use crate::error::{Result, SisError};

use calamine::{DataType, Reader, open_workbook_auto};
use rust_xlsxwriter::Workbook;
use std::path::Path;

/// `.xlsx`/`.xls` via calamine, `.xlsx` output via rust_xlsxwriter.
#[derive(Clone, Copy, Debug, Default)]
pub struct XlsxCodec;

impl SheetCodec for XlsxCodec {
    fn read_table(&self, path: &Path) -> Result<Dataset> {
        let mut workbook = open_workbook_auto(path)
            .map_err(|e| SisError::Codec(format!("{}: {e}", path.display())))?;
        let range = match workbook.worksheet_range_at(0) {
            Some(r) => r.map_err(|e| SisError::Codec(format!("{}: {e}", path.display())))?,
            None => return Ok(Dataset::empty()),
        };

        let mut rows = range.rows();
        let header: Vec<String> = match rows.next() {
            Some(cells) => cells
                .iter()
                .enumerate()
                .map(|(i, c)| match render_cell(c) {
                    s if s.trim().is_empty() => format!("Unnamed: {i}"),
                    s => s,
                })
                .collect(),
            None => return Ok(Dataset::empty()),
        };

        let mut table = Dataset::new(header);
        for cells in rows {
            if cells.iter().all(|c| matches!(c, DataType::Empty)) {
                continue;
            }
            let mut row: Vec<String> = cells.iter().map(render_cell).collect();
            row.resize(table.columns().len(), String::new());
            table.push_row(row)?;
        }
        Ok(table)
    }

    fn write_table(&self, path: &Path, table: &Dataset) -> Result<()> {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();

        for (c, name) in table.columns().iter().enumerate() {
            sheet
                .write_string(0, col(c)?, name.as_str())
                .map_err(xlsx_err)?;
        }
        for (r, row) in table.rows().iter().enumerate() {
            let r = u32::try_from(r + 1)
                .map_err(|_| SisError::Validation("too many rows for one sheet".into()))?;
            for (c, cell) in row.iter().enumerate() {
                match as_number(cell) {
                    Some(n) => sheet.write_number(r, col(c)?, n),
                    None => sheet.write_string(r, col(c)?, cell.as_str()),
                }
                .map_err(xlsx_err)?;
            }
        }
        workbook.save(path).map_err(xlsx_err)?;
        Ok(())
    }
}

fn col(c: usize) -> Result<u16> {
    u16::try_from(c).map_err(|_| SisError::Validation("too many columns for one sheet".into()))
}

fn xlsx_err(e: rust_xlsxwriter::XlsxError) -> SisError {
    SisError::Codec(e.to_string())
}

/// Text form of a cell as it is kept in the store.
pub fn render_cell(cell: &DataType) -> String {
    match cell {
        DataType::String(s) => s.clone(),
        DataType::Float(v) => render_float(*v),
        DataType::Int(v) => v.to_string(),
        DataType::Bool(b) => b.to_string(),
        DataType::Error(e) => format!("#{e:?}"),
        DataType::Empty => String::new(),
        DataType::DateTime(v) => render_float(*v),
        DataType::DateTimeIso(s) => s.clone(),
        DataType::Duration(v) => render_float(*v),
        DataType::DurationIso(s) => s.clone(),
    }
}

pub fn render_float(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

/// Number cell only when rendering it back gives the exact same text ("007" stays text).
fn as_number(cell: &str) -> Option<f64> {
    let n = cell.parse::<f64>().ok().filter(|n| n.is_finite())?;
    (render_float(n) == cell).then_some(n)
}
