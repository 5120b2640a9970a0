// src/sweep.rs

use crate::error::{Result, VqsweepError};
use crate::ffmpeg::{decode_to_yuv, encode_variant, probe_video};
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};

/// The uncompressed baseline every candidate is scored against.
pub const REFERENCE_NAME: &str = "reference.yuv";

#[derive(Debug, Clone, Copy)]
pub struct SweepSummary {
    pub width: u32,
    pub height: u32,
    pub frame_count: u64,
    pub encoded: usize,
    pub failed: usize,
}

// --- Output Naming ---

pub fn variant_basename(codec: &str, bitrate_kbps: u32) -> String {
    format!("output_{codec}_{bitrate_kbps}k")
}

pub fn encoded_path(dir: &Path, codec: &str, bitrate_kbps: u32) -> PathBuf {
    dir.join(format!("{}.mp4", variant_basename(codec, bitrate_kbps)))
}

pub fn decoded_path(dir: &Path, codec: &str, bitrate_kbps: u32) -> PathBuf {
    dir.join(format!("{}_decoded.yuv", variant_basename(codec, bitrate_kbps)))
}

pub fn reference_path(dir: &Path) -> PathBuf {
    dir.join(REFERENCE_NAME)
}

// --- Core Functions ---

/// Encodes the input once per {codec, bitrate} pair and decodes each
/// result to raw YUV next to the decoded reference. A variant that
/// fails to encode is reported and skipped; the sweep only fails
/// outright when no variant survives.
pub fn run_sweep(
    input: &Path,
    codecs: &[String],
    bitrates: &[u32],
    output_dir: &Path,
) -> Result<SweepSummary> {
    let info = probe_video(input)?;
    info!(
        "Sweep source {}: {}x{}, {} frames",
        info.path.display(),
        info.width,
        info.height,
        info.frame_count
    );
    if info.width % 2 != 0 || info.height % 2 != 0 {
        warn!(
            "Input dimensions {}x{} are odd; 4:2:0 chroma planes will not divide evenly",
            info.width, info.height
        );
    }

    fs::create_dir_all(output_dir)?;

    let reference = reference_path(output_dir);
    decode_to_yuv(input, &reference)?;
    info!("Reference decoded to {}", reference.display());

    let mut encoded = 0usize;
    let mut failed = 0usize;
    for codec in codecs {
        for &bitrate in bitrates {
            let name = variant_basename(codec, bitrate);
            let mp4 = encoded_path(output_dir, codec, bitrate);
            let yuv = decoded_path(output_dir, codec, bitrate);

            let outcome = encode_variant(input, &mp4, codec, bitrate)
                .and_then(|_| decode_to_yuv(&mp4, &yuv));
            match outcome {
                Ok(()) => {
                    encoded += 1;
                    info!("Variant {name} encoded and decoded");
                }
                Err(e) => {
                    failed += 1;
                    warn!("Variant {name} failed: {e}");
                }
            }
        }
    }

    if encoded == 0 && failed > 0 {
        return Err(VqsweepError::Command(format!(
            "All {failed} sweep variants failed"
        )));
    }

    info!("Sweep complete: {encoded} variants ready, {failed} failed");
    Ok(SweepSummary {
        width: info.width,
        height: info.height,
        frame_count: info.frame_count,
        encoded,
        failed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_names_follow_the_output_convention() {
        assert_eq!(variant_basename("h264_nvenc", 500), "output_h264_nvenc_500k");
        assert_eq!(
            variant_basename("av1_nvenc", 3000),
            "output_av1_nvenc_3000k"
        );
    }

    #[test]
    fn variant_paths_land_in_the_output_directory() {
        let dir = Path::new("/tmp/run");
        assert_eq!(
            encoded_path(dir, "hevc_nvenc", 1500),
            Path::new("/tmp/run/output_hevc_nvenc_1500k.mp4")
        );
        assert_eq!(
            decoded_path(dir, "hevc_nvenc", 1500),
            Path::new("/tmp/run/output_hevc_nvenc_1500k_decoded.yuv")
        );
        assert_eq!(reference_path(dir), Path::new("/tmp/run/reference.yuv"));
    }
}
