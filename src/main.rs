mod error;
mod cli;
mod ffmpeg;
mod yuv;
mod metrics;
mod lpips;
mod batch;
mod sweep;
mod check;
mod plot;
mod stitch;

use crate::cli::{CliArgs, Command};
use crate::error::Result;
use chrono::Local;
use log::{error, info, LevelFilter};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

fn main() -> ExitCode {
    // Record start time early
    let start_time = Instant::now();

    // Parse arguments first to potentially setup logging based on them
    let args = cli::parse_args();

    // Setup logging (console and optional file)
    if let Err(e) = setup_logging(&args) {
        eprintln!("Error setting up logging: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Starting vqsweep...");
    info!("Arguments: {:?}", args);

    // Run the main application logic
    match run(args) {
        Ok(()) => {
            let duration = start_time.elapsed();
            info!("Completed successfully in {:.2?}", duration);
            println!("Completed successfully in {:.2?}", duration);
            ExitCode::SUCCESS
        }
        Err(e) => {
            let duration = start_time.elapsed();
            error!("Run failed after {:.2?}: {}", duration, e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Sets up logging to console and optionally to a file.
fn setup_logging(args: &CliArgs) -> std::result::Result<(), fern::InitError> {
    let base_config = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(LevelFilter::Info) // Default level
        .level_for("vqsweep", LevelFilter::Debug); // More detailed logs for our crate

    let console_config = fern::Dispatch::new().chain(std::io::stdout());

    let mut logger = base_config.chain(console_config);

    if args.log {
        let log_filename = format!("vqsweep_{}.log", Local::now().format("%Y%m%d_%H%M%S"));
        let log_path = output_dir(args).join(log_filename);
        // Ensure output directory exists if specified for the log file
        if let Some(dir) = log_path.parent() {
            if !dir.exists() {
                fs::create_dir_all(dir)?;
            }
        }
        let file_config = fern::Dispatch::new().chain(fern::log_file(log_path)?);
        logger = logger.chain(file_config);
    }

    logger.apply()?;
    Ok(())
}

fn output_dir(args: &CliArgs) -> PathBuf {
    args.output_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("output"))
}

/// Main application logic
fn run(args: CliArgs) -> Result<()> {
    let out_dir = output_dir(&args);

    match args.command {
        Command::Check {
            codecs,
            device,
            lpips_weights,
        } => check::run_check(&codecs, device, &lpips_weights),

        Command::Sweep {
            input,
            codecs,
            bitrates,
        } => {
            let summary = sweep::run_sweep(&input, &codecs, &bitrates, &out_dir)?;
            println!(
                "Sweep finished: {} variants ready, {} failed ({} input frames)",
                summary.encoded, summary.failed, summary.frame_count
            );
            println!(
                "Score them with: vqsweep score --reference {} --width {} --height {}",
                sweep::reference_path(&out_dir).display(),
                summary.width,
                summary.height
            );
            Ok(())
        }

        Command::Score {
            reference,
            width,
            height,
            device,
            lpips_weights,
            csv,
        } => {
            let device = metrics::resolve_device(device)?;
            let evaluator = metrics::QualityEvaluator::new(device, &lpips_weights)?;
            info!("LPIPS backbone: {}", evaluator.lpips_variant().name());

            fs::create_dir_all(&out_dir)?;
            let csv_path = csv.unwrap_or_else(|| out_dir.join("quality_metrics.csv"));
            let table =
                batch::run_batch(&evaluator, &reference, width, height, &out_dir, &csv_path)?;
            println!(
                "Scored {} candidate(s); results in {}",
                table.len(),
                csv_path.display()
            );
            Ok(())
        }

        Command::Plot { csv, chart } => {
            let csv_path = csv.unwrap_or_else(|| out_dir.join("quality_metrics.csv"));
            let chart_path =
                chart.unwrap_or_else(|| out_dir.join("bitrate_vs_quality_metrics.png"));
            let table = batch::ResultTable::read_csv(&csv_path)?;
            plot::render_chart(&table, &chart_path)?;
            println!("Chart written to {}", chart_path.display());
            Ok(())
        }

        Command::Stitch {
            input,
            at,
            codecs,
            bitrates,
        } => {
            let strips = stitch::run_stitch(&input, &at, &codecs, &bitrates, &out_dir)?;
            for strip in &strips {
                println!("Comparison strip: {}", strip.display());
            }
            Ok(())
        }
    }
}
