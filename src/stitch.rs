// src/stitch.rs

use crate::error::{Result, VqsweepError};
use crate::ffmpeg::extract_frame;
use crate::sweep::encoded_path;
use image::{imageops, RgbImage};
use log::{info, warn};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Joins frames left to right on a canvas sized to their total width
/// and tallest member. Shorter frames leave black below.
pub fn stitch_row(frames: &[RgbImage]) -> Result<RgbImage> {
    if frames.is_empty() {
        return Err(VqsweepError::Input("No frames to stitch".to_string()));
    }
    let total_width: u32 = frames.iter().map(|frame| frame.width()).sum();
    let max_height: u32 = frames.iter().map(|frame| frame.height()).max().unwrap_or(0);

    let mut combined = RgbImage::new(total_width, max_height);
    let mut x = 0i64;
    for frame in frames {
        imageops::replace(&mut combined, frame, x, 0);
        x += i64::from(frame.width());
    }
    Ok(combined)
}

/// Grabs one frame at `at` from the input and from every encoded sweep
/// variant found in `output_dir`, then writes side-by-side comparison
/// strips: one per codec across its bitrates, plus one across codecs at
/// the lowest surviving bitrate. Returns the strip paths.
pub fn run_stitch(
    input: &Path,
    at: &str,
    codecs: &[String],
    bitrates: &[u32],
    output_dir: &Path,
) -> Result<Vec<PathBuf>> {
    let frames_dir = output_dir.join("frames");
    fs::create_dir_all(&frames_dir)?;

    let original_png = frames_dir.join("frame_original.png");
    extract_frame(input, at, &original_png)?;
    let original = image::open(&original_png)?.to_rgb8();

    let mut extracted: BTreeMap<String, Vec<(u32, RgbImage)>> = BTreeMap::new();
    for codec in codecs {
        for &bitrate in bitrates {
            let mp4 = encoded_path(output_dir, codec, bitrate);
            if !mp4.exists() {
                warn!("Variant {} not found, skipping frame grab", mp4.display());
                continue;
            }
            let png = frames_dir.join(format!("frame_{codec}_{bitrate}k.png"));
            let grabbed = extract_frame(&mp4, at, &png).and_then(|_| {
                let frame = image::open(&png)?;
                Ok(frame.to_rgb8())
            });
            match grabbed {
                Ok(frame) => extracted
                    .entry(codec.clone())
                    .or_default()
                    .push((bitrate, frame)),
                Err(e) => warn!("Frame grab for {codec} @ {bitrate}k failed: {e}"),
            }
        }
    }

    if extracted.is_empty() {
        return Err(VqsweepError::Input(
            "No variant frames could be extracted".to_string(),
        ));
    }

    let mut written = Vec::new();

    // One strip per codec: the original first, then ascending bitrate.
    for (codec, frames) in &mut extracted {
        frames.sort_by_key(|(bitrate, _)| *bitrate);
        let mut row = vec![original.clone()];
        row.extend(frames.iter().map(|(_, frame)| frame.clone()));

        let strip = stitch_row(&row)?;
        let path = output_dir.join(format!("comparison_{codec}.png"));
        strip.save(&path)?;
        info!("Wrote comparison strip {}", path.display());
        written.push(path);
    }

    // Codec shoot-out at the lowest bitrate any variant survived.
    let lowest = extracted
        .values()
        .flat_map(|frames| frames.iter().map(|(bitrate, _)| *bitrate))
        .min();
    if let Some(lowest) = lowest {
        let mut row = vec![original.clone()];
        for frames in extracted.values() {
            if let Some((_, frame)) = frames.iter().find(|(bitrate, _)| *bitrate == lowest) {
                row.push(frame.clone());
            }
        }
        if row.len() > 1 {
            let strip = stitch_row(&row)?;
            let path = output_dir.join(format!("comparison_codecs_{lowest}k.png"));
            strip.save(&path)?;
            info!("Wrote comparison strip {}", path.display());
            written.push(path);
        }
    }

    Ok(written)
}
