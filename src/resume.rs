//! Resuming a previous download
//!
//! The CSV file is the only state kept between two runs. The number of
//! rows it already contains tells which page to request first.

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use csv::{ByteRecord, ReaderBuilder};
use log::{debug, trace, warn};

/// How the last record of the file ends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Tail {
    /// The file is empty or ends with a line break.
    #[default]
    Terminated,
    /// The last record has no line break.
    Unterminated,
    /// The file ends inside a quoted cell.
    /// It happens when a run was killed while writing a multi-line description.
    OpenQuote,
}

/// What a scan of an existing CSV file found.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CsvScan {
    /// The number of data rows having as many cells as the header.
    pub rows: u64,
    /// The number of data rows with a wrong number of cells.
    pub broken: u64,
    /// How the file ends.
    pub tail: Tail,
}

/// Scans a CSV file: counts its rows and checks how it ends.
///
/// A line break inside a quoted cell (e.g. a multi-line description)
/// doesn't end the record. A row cut by an interrupted run has fewer
/// cells than the header and is counted as broken, not as saved.
pub fn scan_csv<R: Read + Seek>(mut input: R) -> Result<CsvScan, csv::Error> {
    let mut scan = CsvScan::default();
    if input.seek(SeekFrom::End(0))? == 0 {
        return Ok(scan);
    }
    input.seek(SeekFrom::Start(0))?;

    // Where the last record starts, the header being the first one
    let mut last_start = 0;
    {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(&mut input);
        let width = reader.byte_headers()?.len();
        let mut record = ByteRecord::new();
        while reader.read_byte_record(&mut record)? {
            if let Some(position) = record.position() {
                last_start = position.byte();
            }
            if record.len() == width {
                scan.rows += 1;
            } else {
                scan.broken += 1;
            }
        }
    }

    input.seek(SeekFrom::Start(last_start))?;
    let mut last_record = Vec::new();
    input.read_to_end(&mut last_record)?;
    let quotes = last_record.iter().filter(|b| **b == b'"').count();
    scan.tail = if quotes % 2 == 1 {
        Tail::OpenQuote
    } else if last_record.is_empty() || last_record.ends_with(b"\n") {
        Tail::Terminated
    } else {
        Tail::Unterminated
    };
    Ok(scan)
}

/// Scans the CSV file at `path`.
/// A missing or unreadable file is treated as an empty one.
pub fn scan_file(path: &Path) -> CsvScan {
    trace!("Running scan_file()");
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("{} doesn't exist yet", path.display());
            return CsvScan::default();
        }
        Err(e) => {
            warn!("Unable to read {}: {}", path.display(), e);
            return CsvScan::default();
        }
    };

    match scan_csv(file) {
        Ok(scan) => {
            if scan.broken > 0 {
                warn!(
                    "{} rows of {} are incomplete, they are not counted",
                    scan.broken,
                    path.display()
                );
            }
            if scan.tail != Tail::Terminated {
                warn!("The last row of {} is incomplete", path.display());
            }
            scan
        }
        Err(e) => {
            warn!("Unable to read {}: {}", path.display(), e);
            CsvScan::default()
        }
    }
}

/// Returns the number of CVE rows already saved in the CSV file.
/// A missing file, or a file without any data row, counts as 0.
pub fn count_existing_rows(path: &Path) -> u64 {
    scan_file(path).rows
}

/// Where a run starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResumePoint {
    /// The 0-based index of the first page to fetch.
    pub page: u64,
    /// The `startIndex` of that page.
    pub start_index: u64,
    /// How many CVEs of that page are already in the file.
    pub already_saved: u64,
}

impl ResumePoint {
    /// Computes the resume point from the number of saved rows.
    /// `page_size` must not be 0.
    pub fn new(saved_rows: u64, page_size: u32) -> Self {
        let page_size = u64::from(page_size);
        let page = saved_rows / page_size;
        let start_index = page * page_size;
        Self {
            page,
            start_index,
            already_saved: saved_rows - start_index,
        }
    }
}
