use std::process::ExitCode;

use clap::Parser;
use cvefetch::application::{Application, Args};
use cvefetch::fetchers::nvd::NVDFetcher;
use log::error;
use simple_logger::SimpleLogger;

fn main() -> ExitCode {
    let args = Args::parse();

    // RUST_LOG, when set, overrides the level given on the command line
    if let Err(e) = SimpleLogger::new()
        .with_level(args.log_level())
        .env()
        .init()
    {
        eprintln!("Unable to initialize the logger: {}", e);
    }

    let fetcher = match NVDFetcher::new(args.fetch_config()) {
        Ok(f) => f,
        Err(e) => {
            error!("Unable to create the HTTP client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let application = Application::new(fetcher, args.run_config());
    match application.fetch_to_csv(&args.output) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Unable to write {}: {}", args.output.display(), e);
            ExitCode::FAILURE
        }
    }
}
