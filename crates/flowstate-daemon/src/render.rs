//! Plain-text rendering of a collected [`Table`].

use std::io::{self, Write};

use crate::collector::Table;

const COLUMN_GAP: &str = "   ";

/// Writes `table` as borderless, left-aligned text with upper-case
/// headers. Each column is padded to its widest cell.
///
/// # Errors
///
/// Returns any error from the underlying writer.
pub fn render_table(table: &Table, mut out: impl Write) -> io::Result<()> {
    let headers: Vec<String> = table.headers.iter().map(|h| h.to_uppercase()).collect();
    let widths = column_widths(&headers, &table.rows);

    write_row(&mut out, &headers, &widths)?;
    for row in &table.rows {
        write_row(&mut out, row, &widths)?;
    }
    out.flush()
}

fn column_widths(headers: &[String], rows: &[Vec<String>]) -> Vec<usize> {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }
    widths
}

fn write_row(out: &mut impl Write, cells: &[String], widths: &[usize]) -> io::Result<()> {
    let last = cells.len().min(widths.len()).saturating_sub(1);
    for (index, (cell, width)) in cells.iter().zip(widths).enumerate() {
        if index == last {
            write!(out, "{cell}")?;
        } else {
            write!(out, "{cell:<width$}{COLUMN_GAP}")?;
        }
    }
    writeln!(out)
}
