// src/check.rs

use crate::cli::DevicePref;
use crate::error::{Result, VqsweepError};
use crate::ffmpeg::{list_encoders, tool_version};
use crate::lpips::inspect_weights;
use crate::metrics::resolve_device;
use log::{error, info};
use std::path::Path;

/// Verifies every external requirement of a full run: the ffmpeg tools,
/// the requested encoders, the compute device, and the LPIPS weights.
/// All problems are collected and reported together rather than failing
/// at the first one.
pub fn run_check(codecs: &[String], device: DevicePref, lpips_weights: &Path) -> Result<()> {
    let mut problems: Vec<String> = Vec::new();

    match tool_version("ffmpeg") {
        Ok(version) => info!("ffmpeg: {version}"),
        Err(e) => problems.push(format!("ffmpeg unavailable: {e}")),
    }
    match tool_version("ffprobe") {
        Ok(version) => info!("ffprobe: {version}"),
        Err(e) => problems.push(format!("ffprobe unavailable: {e}")),
    }

    match list_encoders() {
        Ok(available) => {
            for codec in codecs {
                if available.iter().any(|name| name == codec) {
                    info!("Encoder {codec}: available");
                }
            }
            for codec in missing_codecs(&available, codecs) {
                problems.push(format!(
                    "Encoder {codec} is not present in this ffmpeg build"
                ));
            }
        }
        Err(e) => problems.push(format!("Could not list encoders: {e}")),
    }

    match resolve_device(device) {
        Ok(device) => info!("Compute device ready: {device:?}"),
        Err(e) => problems.push(format!("Compute device: {e}")),
    }

    match inspect_weights(lpips_weights) {
        Ok((variant, tensors)) => info!(
            "LPIPS weights {}: {} net, {} tensors",
            lpips_weights.display(),
            variant.name(),
            tensors
        ),
        Err(e) => problems.push(format!("LPIPS weights: {e}")),
    }

    if problems.is_empty() {
        info!("Environment check passed");
        Ok(())
    } else {
        for problem in &problems {
            error!("{problem}");
        }
        Err(VqsweepError::Dependency(format!(
            "Environment check found {} problem(s)",
            problems.len()
        )))
    }
}

fn missing_codecs(available: &[String], requested: &[String]) -> Vec<String> {
    requested
        .iter()
        .filter(|codec| !available.contains(*codec))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_codecs_reports_only_the_absent_ones() {
        let available = vec![
            "h264_nvenc".to_string(),
            "hevc_nvenc".to_string(),
            "libx264".to_string(),
        ];
        let requested = vec![
            "av1_nvenc".to_string(),
            "h264_nvenc".to_string(),
            "hevc_nvenc".to_string(),
        ];
        assert_eq!(missing_codecs(&available, &requested), vec!["av1_nvenc"]);
    }

    #[test]
    fn all_present_means_nothing_missing() {
        let available = vec!["h264_nvenc".to_string()];
        let requested = vec!["h264_nvenc".to_string()];
        assert!(missing_codecs(&available, &requested).is_empty());
    }
}
