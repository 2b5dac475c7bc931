use std::path::PathBuf;
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::Parser;

use jffs2_extract::{run, Options};

/// Extracts a raw JFFS2 flash image onto a host directory tree.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the raw JFFS2 image.
    image: PathBuf,

    /// Directory to extract into; created if it doesn't exist.
    output_directory: PathBuf,

    /// Increase logging verbosity (-v for info, -vv for debug).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all but error-level log output.
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn init_logger(args: &Args) {
    let level = if args.quiet {
        log::LevelFilter::Error
    } else {
        match args.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        }
    };

    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp(None)
        .init();
}

fn main() -> ExitCode {
    // `try_parse` instead of `parse`: a bad invocation should exit 1,
    // not clap's default exit code 2 for argument errors.
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            e.print().ok();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };
    init_logger(&args);

    let options = Options {
        image: args.image,
        output: args.output_directory,
    };

    match run(&options) {
        Ok(stats) => {
            log::info!(
                "done: {} dirs, {} files, {} symlinks written; {} header CRC failures, \
                 {} body CRC mismatches",
                stats.materialize.dirs_created,
                stats.materialize.files_written,
                stats.materialize.symlinks_created,
                stats.scan.header_crc_failures,
                stats.scan.body_crc_failures,
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
