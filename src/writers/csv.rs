//! Write the [`CveRow`]s as CSV
//!
//! The file is only ever appended to. The header is written when the file
//! is created, never after.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use log::{debug, trace, warn};

use super::RowWriter;
use crate::models::{CveRow, FIELDNAMES};
use crate::resume::Tail;

/// The end of a CSV record.
const LINE_TERMINATOR: &str = "\r\n";

/// A writer to append the rows to a CSV output.
pub struct CsvWriter<W: Write> {
    /// Where the CSV is written.
    output: W,
}

impl<W: Write> CsvWriter<W> {
    /// Creates a new CsvWriter
    pub fn new(output: W) -> Self {
        Self { output }
    }

    /// Writes the header line.
    pub fn write_header(&mut self) -> io::Result<()> {
        self.write_record(FIELDNAMES)
    }

    /// Writes one record and flushes it, so that an interrupted run
    /// loses at most the row being written.
    fn write_record<I, S>(&mut self, cells: I) -> io::Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let line = cells
            .into_iter()
            .map(|c| escape(c.as_ref()))
            .collect::<Vec<String>>()
            .join(",");
        self.output.write_all(line.as_bytes())?;
        self.output.write_all(LINE_TERMINATOR.as_bytes())?;
        self.output.flush()
    }

    /// Returns the underlying output.
    pub fn into_inner(self) -> W {
        self.output
    }
}

impl CsvWriter<BufWriter<File>> {
    /// Opens the CSV file in append mode, creating it if needed.
    ///
    /// The header is written only if the file is new or empty. `tail` tells
    /// how the existing file ends (see [`crate::resume::scan_file`]): an
    /// incomplete last row is terminated, closing its quoted cell if needed,
    /// so that the next rows start on their own line.
    pub fn open_append(path: &Path, tail: Tail) -> io::Result<Self> {
        trace!("Running CsvWriter::open_append()");
        let existing_len = match path.metadata() {
            Ok(m) => m.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e),
        };

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = CsvWriter::new(BufWriter::new(file));

        if existing_len == 0 {
            debug!("Writing the header in {}", path.display());
            writer.write_header()?;
            return Ok(writer);
        }

        let closing = match tail {
            Tail::Terminated => return Ok(writer),
            Tail::Unterminated => LINE_TERMINATOR.to_string(),
            Tail::OpenQuote => format!("\"{}", LINE_TERMINATOR),
        };
        warn!("Terminating the incomplete last row of {}", path.display());
        writer.output.write_all(closing.as_bytes())?;
        writer.output.flush()?;
        Ok(writer)
    }
}

impl<W: Write> RowWriter for CsvWriter<W> {
    fn write_row(&mut self, row: &CveRow) -> io::Result<()> {
        self.write_record(row.cells())
    }
}

/// Quotes a cell if it contains a comma, a quote or a line break.
/// Quotes (") are escaped by doubling them.
fn escape(cell: &str) -> String {
    if cell.contains(&[',', '"', '\r', '\n'][..]) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}
