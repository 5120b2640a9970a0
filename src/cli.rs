// src/cli.rs

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Specify output directory for results (default: ./output)
    #[arg(long, value_name = "DIR", global = true)]
    pub output_dir: Option<PathBuf>,

    /// Enable logging to file (e.g., vqsweep_YYYYMMDD_HHMMSS.log)
    #[arg(long, global = true)]
    pub log: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Verify ffmpeg, encoder support, compute device, and LPIPS weights
    Check {
        /// Encoders that must be present in this ffmpeg build
        #[arg(long, value_delimiter = ',', default_values_t = default_codecs())]
        codecs: Vec<String>,

        /// Compute device to resolve
        #[arg(long, value_enum, default_value = "auto")]
        device: DevicePref,

        /// LPIPS weight file (safetensors)
        #[arg(long, value_name = "FILE", default_value = "lpips_alex.safetensors")]
        lpips_weights: PathBuf,
    },

    /// Encode the input across the {codec, bitrate} grid and decode each
    /// variant (and the input itself) to raw YUV
    Sweep {
        /// Source video file
        #[arg(long, value_name = "FILE")]
        input: PathBuf,

        /// Codecs to sweep
        #[arg(long, value_delimiter = ',', default_values_t = default_codecs())]
        codecs: Vec<String>,

        /// Bitrates in kbps
        #[arg(long, value_delimiter = ',', default_values_t = default_bitrates())]
        bitrates: Vec<u32>,
    },

    /// Score every decoded candidate in the output directory against the
    /// raw reference (PSNR, SSIM, LPIPS) and write the results table
    Score {
        /// Uncompressed reference in raw 4:2:0 planar form
        #[arg(long, value_name = "FILE")]
        reference: PathBuf,

        /// Luma width of every sequence in the run
        #[arg(long)]
        width: usize,

        /// Luma height of every sequence in the run
        #[arg(long)]
        height: usize,

        /// Compute device for the metric evaluators
        #[arg(long, value_enum, default_value = "auto")]
        device: DevicePref,

        /// LPIPS weight file (safetensors)
        #[arg(long, value_name = "FILE", default_value = "lpips_alex.safetensors")]
        lpips_weights: PathBuf,

        /// Results table path (default: <output-dir>/quality_metrics.csv)
        #[arg(long, value_name = "FILE")]
        csv: Option<PathBuf>,
    },

    /// Render bitrate-vs-metric curves per codec from the results table
    Plot {
        /// Results table path (default: <output-dir>/quality_metrics.csv)
        #[arg(long, value_name = "FILE")]
        csv: Option<PathBuf>,

        /// Chart output path (default: <output-dir>/bitrate_vs_quality_metrics.png)
        #[arg(long, value_name = "FILE")]
        chart: Option<PathBuf>,
    },

    /// Extract one frame per encoded variant and composite horizontal
    /// comparison strips
    Stitch {
        /// Source video file
        #[arg(long, value_name = "FILE")]
        input: PathBuf,

        /// Timestamp of the frame to extract
        #[arg(long, value_name = "HH:MM:SS", default_value = "00:00:07")]
        at: String,

        /// Codecs covered by the sweep
        #[arg(long, value_delimiter = ',', default_values_t = default_codecs())]
        codecs: Vec<String>,

        /// Bitrates covered by the sweep, in kbps
        #[arg(long, value_delimiter = ',', default_values_t = default_bitrates())]
        bitrates: Vec<u32>,
    },
}

/// Compute device preference, resolved exactly once at startup.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePref {
    /// Use CUDA when available, otherwise fall back to the CPU
    Auto,
    Cpu,
    Cuda,
}

fn default_codecs() -> Vec<String> {
    ["av1_nvenc", "h264_nvenc", "hevc_nvenc"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_bitrates() -> Vec<u32> {
    vec![500, 1000, 1500, 2000, 2500, 3000]
}

pub fn parse_args() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        CliArgs::command().debug_assert();
    }

    #[test]
    fn score_args_parse() {
        let args = CliArgs::try_parse_from([
            "vqsweep", "score", "--reference", "ref.yuv", "--width", "1080", "--height", "1920",
        ])
        .unwrap();
        match args.command {
            Command::Score { width, height, device, .. } => {
                assert_eq!(width, 1080);
                assert_eq!(height, 1920);
                assert_eq!(device, DevicePref::Auto);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn sweep_grid_defaults_match_convention() {
        let args = CliArgs::try_parse_from(["vqsweep", "sweep", "--input", "input.mp4"]).unwrap();
        match args.command {
            Command::Sweep { codecs, bitrates, .. } => {
                assert_eq!(codecs.len(), 3);
                assert!(codecs.iter().any(|c| c == "h264_nvenc"));
                assert_eq!(bitrates, vec![500, 1000, 1500, 2000, 2500, 3000]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
