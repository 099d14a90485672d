use clap::Parser;
use log::{error, info};
use std::process::ExitCode;

use labelclean::{resolve_splits, sanitize_split, Args, Counters};

fn main() -> ExitCode {
    // Initialize the logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match args.to_sanitize_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    // Every split is checked before any file is changed
    let splits = match resolve_splits(&args) {
        Ok(splits) => splits,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("Starting the sanitization process...");

    let mut total = Counters::new();
    for split in &splits {
        info!("Sanitizing split {}", split.name);
        match sanitize_split(split, &args, &config) {
            Ok(report) => {
                report.counters.print_summary();
                info!(
                    "[{}] Remaining: {} images, {} boxes (seed {})",
                    split.name,
                    report.dataset.image_ids.len(),
                    report.dataset.total_boxes(),
                    report.seed
                );
                total += report.counters;
            }
            Err(e) => {
                error!("Failed to sanitize split {}: {}", split.name, e);
                return ExitCode::FAILURE;
            }
        }
    }

    if splits.len() > 1 {
        info!("Totals across {} splits:", splits.len());
        total.print_summary();
    }
    info!("Sanitization process completed successfully.");
    ExitCode::SUCCESS
}
