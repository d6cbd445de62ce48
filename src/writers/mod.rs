//! Writing the CVE rows
//!
//! Once a CVE is flattened into a [`CveRow`], it's up to a writer to
//! store it. Rows are written one by one, as soon as they are produced.

pub mod csv;

use std::io;

use crate::models::CveRow;

/// A trait to have a common interface between writers.
pub trait RowWriter {
    /// Writes one row.
    fn write_row(&mut self, row: &CveRow) -> io::Result<()>;
}
