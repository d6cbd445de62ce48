//! This module contains the main structure and logic for the whole
//! application: the loop fetching the pages and appending them to the CSV.

use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use clap::Parser;
use log::{debug, info, trace, warn, LevelFilter};
use serde_json::Value;

use crate::fetchers::{FetchConfig, PageSource, DEFAULT_USER_AGENT, NVD_API_URL};
use crate::models::CveRow;
use crate::resume::{scan_file, ResumePoint};
use crate::writers::csv::CsvWriter;
use crate::writers::RowWriter;

/// The settings of the fetch loop.
#[derive(Clone, Debug)]
pub struct RunConfig {
    /// The number of CVEs requested per page.
    pub page_size: u32,
    /// The maximum number of pages fetched in one run.
    pub max_pages: u64,
    /// The pause between two pages, to respect the NVD rate limits.
    pub page_delay: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            page_size: 1000,
            max_pages: 10000,
            page_delay: Duration::from_secs(6),
        }
    }
}

/// What happened during a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Pages successfully downloaded, the final empty one included.
    pub pages_fetched: u64,
    /// Pages given up after the fetcher failed.
    pub pages_failed: u64,
    /// Rows appended to the output.
    pub rows_written: u64,
    /// Malformed CVEs left out.
    pub rows_skipped: u64,
    /// Whether the API returned an empty page.
    pub reached_end: bool,
}

/// The result of writing one page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageOutcome {
    /// The page had no CVE, there is nothing more to fetch.
    Exhausted,
    /// The CVEs of the page have been handled.
    Written {
        /// The number of rows written.
        rows: u64,
        /// The number of malformed CVEs skipped.
        skipped: u64,
    },
}

/// Flattens the CVEs of a page and writes them.
///
/// The first `already_saved` CVEs are ignored, they were written by a
/// previous run. A malformed CVE is logged and skipped, it never stops
/// the page.
pub fn write_page<W: RowWriter>(
    payload: &Value,
    writer: &mut W,
    already_saved: u64,
) -> io::Result<PageOutcome> {
    trace!("Running write_page()");
    let entries: &[Value] = match payload.get("vulnerabilities") {
        Some(Value::Array(entries)) => entries.as_slice(),
        Some(other) => {
            warn!("Unexpected vulnerabilities field: {}", other);
            &[]
        }
        None => &[],
    };
    if entries.is_empty() {
        return Ok(PageOutcome::Exhausted);
    }

    let to_skip = usize::try_from(already_saved).unwrap_or(usize::MAX);
    if to_skip > 0 {
        debug!("{} CVEs of this page are already saved", to_skip.min(entries.len()));
    }

    let mut rows = 0;
    let mut skipped = 0;
    for item in entries.iter().skip(to_skip) {
        match CveRow::try_from(item) {
            Ok(row) => {
                writer.write_row(&row)?;
                rows += 1;
            }
            Err(e) => {
                warn!("Skipping CVE due to error: {}", e);
                skipped += 1;
            }
        }
    }
    Ok(PageOutcome::Written { rows, skipped })
}

/// Represents the application
pub struct Application<S: PageSource> {
    /// Where the pages come from.
    source: S,
    /// The settings of the loop.
    config: RunConfig,
}

impl<S: PageSource> Application<S> {
    /// Creates a new application
    pub fn new(source: S, config: RunConfig) -> Self {
        Self { source, config }
    }

    /// Appends the CVEs not saved yet to the CSV file at `path`.
    pub fn fetch_to_csv(&self, path: &Path) -> io::Result<RunSummary> {
        trace!("Running Application::fetch_to_csv()");
        let existing = scan_file(path);
        let saved_rows = existing.rows;
        let resume = ResumePoint::new(saved_rows, self.config.page_size);
        info!(
            "{} CVEs already saved in {}, starting at index {}",
            saved_rows,
            path.display(),
            resume.start_index
        );

        let mut writer = CsvWriter::open_append(path, existing.tail)?;
        let summary = self.run(&mut writer, resume)?;
        info!(
            "Saved {} new CVE records to {}",
            summary.rows_written,
            path.display()
        );
        Ok(summary)
    }

    /// Fetches the pages from the resume point and writes their CVEs.
    ///
    /// The loop stops on the first empty page or when `max_pages` pages
    /// have been requested. A page that can't be fetched is skipped: its
    /// CVEs will be missing from the output.
    pub fn run<W: RowWriter>(&self, writer: &mut W, resume: ResumePoint) -> io::Result<RunSummary> {
        trace!("Running Application::run()");
        let page_size = u64::from(self.config.page_size);
        let first_page = resume.page;
        let end_page = first_page.saturating_add(self.config.max_pages);
        let mut start_index = resume.start_index;
        let mut already_saved = resume.already_saved;
        let mut summary = RunSummary::default();

        for page in first_page..end_page {
            info!("Fetching page {}", page + 1);
            let payload = match self.source.fetch_page(start_index, self.config.page_size) {
                Some(p) => p,
                None => {
                    warn!(
                        "Skipping page {} (CVEs {} to {}) due to repeated failures",
                        page + 1,
                        start_index,
                        start_index + page_size - 1
                    );
                    summary.pages_failed += 1;
                    start_index += page_size;
                    already_saved = 0;
                    continue;
                }
            };
            summary.pages_fetched += 1;

            match write_page(&payload, writer, already_saved)? {
                PageOutcome::Exhausted => {
                    info!("No more data available.");
                    summary.reached_end = true;
                    break;
                }
                PageOutcome::Written { rows, skipped } => {
                    debug!("Page {}: {} rows written, {} skipped", page + 1, rows, skipped);
                    summary.rows_written += rows;
                    summary.rows_skipped += skipped;
                }
            }

            start_index += page_size;
            already_saved = 0;
            if page + 1 < end_page {
                thread::sleep(self.config.page_delay);
            }
        }

        Ok(summary)
    }
}

/// Represents the CLI arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// The CSV file where the CVEs are appended
    #[arg(value_name = "OUTPUT", default_value = "nvd1_cves.csv")]
    pub output: PathBuf,
    /// The maximum number of pages to fetch
    #[arg(short, long, value_name = "PAGES", default_value_t = 10000)]
    pub max_pages: u64,
    /// The URL of the NVD CVE API
    #[arg(long, value_name = "URL", default_value = NVD_API_URL)]
    pub url: String,
    /// The User-Agent sent to the API
    #[arg(long, value_name = "USER_AGENT", default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,
    /// The number of CVEs per page (the NVD accepts at most 2000)
    #[arg(long, value_name = "SIZE", default_value_t = 1000, value_parser = clap::value_parser!(u32).range(1..=2000))]
    pub page_size: u32,
    /// How many times a page is requested when it times out
    #[arg(long, value_name = "COUNT", default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_retries: u32,
    /// The pause after a timeout, in seconds
    #[arg(long, value_name = "SECONDS", default_value_t = 10)]
    pub retry_delay: u64,
    /// The timeout of a request, in seconds
    #[arg(long, value_name = "SECONDS", default_value_t = 20)]
    pub timeout: u64,
    /// The pause between two pages, in seconds
    #[arg(long, value_name = "SECONDS", default_value_t = 6)]
    pub page_delay: u64,
    /// Show more logs (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
    /// Only show warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Args {
    /// The settings of the fetcher.
    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            url: self.url.clone(),
            user_agent: self.user_agent.clone(),
            max_retries: self.max_retries,
            retry_delay: Duration::from_secs(self.retry_delay),
            timeout: Duration::from_secs(self.timeout),
        }
    }

    /// The settings of the fetch loop.
    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            page_size: self.page_size,
            max_pages: self.max_pages,
            page_delay: Duration::from_secs(self.page_delay),
        }
    }

    /// The log level asked on the command line.
    pub fn log_level(&self) -> LevelFilter {
        if self.quiet {
            return LevelFilter::Warn;
        }
        match self.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use crate::resume::count_existing_rows;
    use std::fs;
    use tempfile::tempdir;

    /// A page source answering with predefined pages.
    struct ScriptedSource {
        pages: RefCell<VecDeque<Option<Value>>>,
        requested: RefCell<Vec<(u64, u32)>>,
    }

    impl ScriptedSource {
        fn new(pages: Vec<Option<Value>>) -> Self {
            Self {
                pages: RefCell::new(pages.into()),
                requested: RefCell::new(Vec::new()),
            }
        }
    }

    impl PageSource for ScriptedSource {
        fn fetch_page(&self, start_index: u64, results_per_page: u32) -> Option<Value> {
            self.requested
                .borrow_mut()
                .push((start_index, results_per_page));
            self.pages
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Some(json!({"vulnerabilities": []})))
        }
    }

    /// Keeps the rows in memory.
    #[derive(Default)]
    struct MemoryWriter {
        rows: Vec<CveRow>,
    }

    impl RowWriter for MemoryWriter {
        fn write_row(&mut self, row: &CveRow) -> io::Result<()> {
            self.rows.push(row.clone());
            Ok(())
        }
    }

    fn cve(id: &str) -> Value {
        json!({
            "cve": {
                "id": id,
                "vulnStatus": "Analyzed",
                "descriptions": [{"lang": "en", "value": format!("Description of {}", id)}]
            }
        })
    }

    fn page(ids: &[&str]) -> Option<Value> {
        let vulnerabilities: Vec<Value> = ids.iter().map(|id| cve(id)).collect();
        Some(json!({"resultsPerPage": ids.len(), "vulnerabilities": vulnerabilities}))
    }

    fn config(page_size: u32, max_pages: u64) -> RunConfig {
        RunConfig {
            page_size,
            max_pages,
            page_delay: Duration::ZERO,
        }
    }

    fn ids(rows: &[CveRow]) -> Vec<String> {
        rows.iter().map(|r| r.id.clone().unwrap_or_default()).collect()
    }

    #[test]
    fn empty_page_ends_the_run() {
        let source = ScriptedSource::new(vec![
            page(&["CVE-1", "CVE-2"]),
            page(&[]),
            page(&["CVE-3"]),
        ]);
        let application = Application::new(source, config(2, 10));
        let mut writer = MemoryWriter::default();

        let summary = application
            .run(&mut writer, ResumePoint::new(0, 2))
            .unwrap();
        assert_eq!(vec!["CVE-1", "CVE-2"], ids(&writer.rows));
        assert_eq!(2, summary.pages_fetched);
        assert_eq!(2, summary.rows_written);
        assert!(summary.reached_end);
        assert_eq!(vec![(0, 2), (2, 2)], *application.source.requested.borrow());
    }

    #[test]
    fn page_budget_limits_the_run() {
        let source = ScriptedSource::new(vec![
            page(&["CVE-1"]),
            page(&["CVE-2"]),
            page(&["CVE-3"]),
        ]);
        let application = Application::new(source, config(1, 2));
        let mut writer = MemoryWriter::default();

        let summary = application
            .run(&mut writer, ResumePoint::new(0, 1))
            .unwrap();
        assert_eq!(vec!["CVE-1", "CVE-2"], ids(&writer.rows));
        assert!(!summary.reached_end);
        assert_eq!(2, application.source.requested.borrow().len());
    }

    #[test]
    fn failed_page_is_skipped() {
        let source = ScriptedSource::new(vec![page(&["CVE-1"]), None, page(&["CVE-3"])]);
        let application = Application::new(source, config(100, 3));
        let mut writer = MemoryWriter::default();

        let summary = application
            .run(&mut writer, ResumePoint::new(0, 100))
            .unwrap();
        assert_eq!(vec!["CVE-1", "CVE-3"], ids(&writer.rows));
        assert_eq!(1, summary.pages_failed);
        assert_eq!(2, summary.pages_fetched);
        let starts: Vec<u64> = application
            .source
            .requested
            .borrow()
            .iter()
            .map(|(start, _)| *start)
            .collect();
        assert_eq!(vec![0, 100, 200], starts);
    }

    #[test]
    fn malformed_cves_are_skipped_in_place() {
        let payload = json!({
            "vulnerabilities": [
                cve("CVE-1"),
                "garbage",
                {"cve": {"id": "CVE-BAD", "descriptions": [{"lang": "en"}]}},
                cve("CVE-2"),
                {"cve": {"id": 12}},
                cve("CVE-3")
            ]
        });
        let mut writer = MemoryWriter::default();

        let outcome = write_page(&payload, &mut writer, 0).unwrap();
        assert_eq!(PageOutcome::Written { rows: 3, skipped: 3 }, outcome);
        assert_eq!(vec!["CVE-1", "CVE-2", "CVE-3"], ids(&writer.rows));
        assert_eq!("Description of CVE-2", writer.rows[1].description);
    }

    #[test]
    fn page_without_vulnerabilities_is_exhausted() {
        let mut writer = MemoryWriter::default();
        assert_eq!(
            PageOutcome::Exhausted,
            write_page(&json!({"totalResults": 0}), &mut writer, 0).unwrap()
        );
        assert_eq!(
            PageOutcome::Exhausted,
            write_page(&json!({"vulnerabilities": "none"}), &mut writer, 0).unwrap()
        );
        assert!(writer.rows.is_empty());
    }

    #[test]
    fn resume_skips_cves_already_saved() {
        let source = ScriptedSource::new(vec![page(&["CVE-3", "CVE-4", "CVE-5"]), page(&[])]);
        let application = Application::new(source, config(3, 5));
        let mut writer = MemoryWriter::default();

        // 5 rows saved with pages of 3: page 1 is fetched again
        let resume = ResumePoint::new(5, 3);
        let summary = application.run(&mut writer, resume).unwrap();
        assert_eq!(vec!["CVE-5"], ids(&writer.rows));
        assert_eq!(1, summary.rows_written);
        assert_eq!(3, application.source.requested.borrow()[0].0);
    }

    #[test]
    fn second_run_appends_after_saved_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nvd_cves.csv");

        let source = ScriptedSource::new(vec![
            page(&["CVE-1", "CVE-2"]),
            page(&["CVE-3"]),
            page(&[]),
        ]);
        let summary = Application::new(source, config(2, 10))
            .fetch_to_csv(&path)
            .unwrap();
        assert_eq!(3, summary.rows_written);
        assert_eq!(3, count_existing_rows(&path));

        // The API now has one more CVE on the second page
        let source = ScriptedSource::new(vec![page(&["CVE-3", "CVE-4"]), page(&[])]);
        let application = Application::new(source, config(2, 10));
        let summary = application.fetch_to_csv(&path).unwrap();
        assert_eq!(1, summary.rows_written);
        assert_eq!(2, application.source.requested.borrow()[0].0);

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(5, lines.len());
        assert!(lines[0].starts_with("id,sourceIdentifier,"));
        assert_eq!(1, content.matches("vulnStatus").count());
        let first_cells: Vec<&str> = lines[1..]
            .iter()
            .map(|l| l.split(',').next().unwrap_or_default())
            .collect();
        assert_eq!(vec!["CVE-1", "CVE-2", "CVE-3", "CVE-4"], first_cells);
    }

    #[test]
    fn log_level_from_flags() {
        let args = Args::parse_from(["cvefetch"]);
        assert_eq!(LevelFilter::Info, args.log_level());
        assert_eq!(PathBuf::from("nvd1_cves.csv"), args.output);
        assert_eq!(10000, args.max_pages);

        let args = Args::parse_from(["cvefetch", "-vv", "out.csv"]);
        assert_eq!(LevelFilter::Trace, args.log_level());
        assert_eq!(PathBuf::from("out.csv"), args.output);

        let args = Args::parse_from(["cvefetch", "--quiet"]);
        assert_eq!(LevelFilter::Warn, args.log_level());
    }

    #[test]
    fn configs_from_args() {
        let args = Args::parse_from([
            "cvefetch",
            "cves.csv",
            "--max-pages",
            "4",
            "--page-size",
            "500",
            "--retry-delay",
            "1",
            "--page-delay",
            "0",
        ]);
        let run = args.run_config();
        assert_eq!(500, run.page_size);
        assert_eq!(4, run.max_pages);
        assert_eq!(Duration::ZERO, run.page_delay);

        let fetch = args.fetch_config();
        assert_eq!(NVD_API_URL, fetch.url);
        assert_eq!(DEFAULT_USER_AGENT, fetch.user_agent);
        assert_eq!(3, fetch.max_retries);
        assert_eq!(Duration::from_secs(1), fetch.retry_delay);
        assert_eq!(Duration::from_secs(20), fetch.timeout);

        assert!(Args::try_parse_from(["cvefetch", "--page-size", "0"]).is_err());
        assert!(Args::try_parse_from(["cvefetch", "--page-size", "5000"]).is_err());
        assert!(Args::try_parse_from(["cvefetch", "--max-retries", "0"]).is_err());
    }
}
