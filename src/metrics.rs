// src/metrics.rs

use crate::cli::DevicePref;
use crate::error::{Result, VqsweepError};
use crate::lpips::{Lpips, LpipsVariant};
use crate::yuv::YuvSequence;
use candle_core::{Device, Tensor};
use log::{debug, info, warn};
use std::path::Path;

// --- Constants ---

/// Ceiling applied to PSNR so identical frames report a finite score.
pub const PSNR_CAP: f64 = 100.0;

/// Frames are compared as tensors normalized to [0, 1].
const DATA_RANGE: f64 = 1.0;

const SSIM_WINDOW: usize = 11;
const SSIM_SIGMA: f64 = 1.5;
const SSIM_K1: f64 = 0.01;
const SSIM_K2: f64 = 0.03;

// --- Data Structures ---

/// Per-sequence mean scores across all compared frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SequenceMeans {
    pub psnr: f64,
    pub ssim: f64,
    pub lpips: f64,
}

// --- Core Functions ---

/// Rejects tensor pairs whose shapes differ before any arithmetic runs.
pub fn ensure_same_shape(reference: &Tensor, candidate: &Tensor) -> Result<()> {
    if reference.dims() != candidate.dims() {
        return Err(VqsweepError::ShapeMismatch {
            expected: format!("{:?}", reference.dims()),
            actual: format!("{:?}", candidate.dims()),
        });
    }
    Ok(())
}

/// Peak signal-to-noise ratio in dB between two same-shape tensors in
/// [0, 1]. Capped at [`PSNR_CAP`] for identical inputs.
pub fn psnr(reference: &Tensor, candidate: &Tensor) -> Result<f64> {
    ensure_same_shape(reference, candidate)?;
    let mse = (reference - candidate)?.sqr()?.mean_all()?.to_scalar::<f32>()? as f64;
    if mse <= 0.0 {
        return Ok(PSNR_CAP);
    }
    let score = 10.0 * (DATA_RANGE * DATA_RANGE / mse).log10();
    Ok(score.min(PSNR_CAP))
}

/// Mean structural similarity between two `[1, 1, H, W]` tensors in
/// [0, 1], computed with a Gaussian window over valid positions only.
/// Frames smaller than the standard 11x11 window use the largest odd
/// window that fits.
pub fn ssim(reference: &Tensor, candidate: &Tensor) -> Result<f64> {
    ensure_same_shape(reference, candidate)?;
    let (_, _, height, width) = reference.dims4()?;

    let mut side = SSIM_WINDOW.min(height).min(width);
    if side % 2 == 0 {
        side -= 1;
    }
    let window = gaussian_window(side, SSIM_SIGMA, reference.device())?;

    let c1 = (SSIM_K1 * DATA_RANGE).powi(2);
    let c2 = (SSIM_K2 * DATA_RANGE).powi(2);

    let mu_x = reference.conv2d(&window, 0, 1, 1, 1)?;
    let mu_y = candidate.conv2d(&window, 0, 1, 1, 1)?;
    let mu_x_sq = mu_x.sqr()?;
    let mu_y_sq = mu_y.sqr()?;
    let mu_xy = mu_x.mul(&mu_y)?;

    let sigma_x_sq = (reference.sqr()?.conv2d(&window, 0, 1, 1, 1)? - &mu_x_sq)?;
    let sigma_y_sq = (candidate.sqr()?.conv2d(&window, 0, 1, 1, 1)? - &mu_y_sq)?;
    let sigma_xy = ((reference * candidate)?.conv2d(&window, 0, 1, 1, 1)? - &mu_xy)?;

    let luminance = ((&mu_xy * 2.0)? + c1)?;
    let contrast = ((&sigma_xy * 2.0)? + c2)?;
    let luminance_norm = ((&mu_x_sq + &mu_y_sq)? + c1)?;
    let contrast_norm = ((&sigma_x_sq + &sigma_y_sq)? + c2)?;

    let ssim_map = luminance
        .mul(&contrast)?
        .div(&luminance_norm.mul(&contrast_norm)?)?;
    Ok(ssim_map.mean_all()?.to_scalar::<f32>()? as f64)
}

/// Normalized 2D Gaussian window shaped `[1, 1, side, side]` for SSIM
/// local statistics.
fn gaussian_window(side: usize, sigma: f64, device: &Device) -> Result<Tensor> {
    let center = (side as f64 - 1.0) / 2.0;
    let mut weights = Vec::with_capacity(side * side);
    let mut total = 0.0;
    for row in 0..side {
        for col in 0..side {
            let dy = row as f64 - center;
            let dx = col as f64 - center;
            let weight = (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp();
            weights.push(weight);
            total += weight;
        }
    }
    let normalized: Vec<f32> = weights.into_iter().map(|w| (w / total) as f32).collect();
    Ok(Tensor::from_vec(normalized, (1, 1, side, side), device)?)
}

/// Picks the compute device for the run. `Auto` probes CUDA and falls
/// back to the CPU; an explicit `Cuda` request fails hard when no
/// device is available.
pub fn resolve_device(pref: DevicePref) -> Result<Device> {
    match pref {
        DevicePref::Cpu => {
            info!("Using CPU device");
            Ok(Device::Cpu)
        }
        DevicePref::Cuda => match Device::new_cuda(0) {
            Ok(device) => {
                info!("Using CUDA device 0");
                Ok(device)
            }
            Err(e) => Err(VqsweepError::Dependency(format!(
                "CUDA device requested but unavailable: {e}"
            ))),
        },
        DevicePref::Auto => match Device::new_cuda(0) {
            Ok(device) => {
                info!("Using CUDA device 0");
                Ok(device)
            }
            Err(e) => {
                warn!("CUDA unavailable ({e}), falling back to CPU");
                Ok(Device::Cpu)
            }
        },
    }
}

/// Scores candidate sequences against a reference. Holds the compute
/// device and the LPIPS network so model weights load once per run.
pub struct QualityEvaluator {
    device: Device,
    lpips: Lpips,
}

impl QualityEvaluator {
    pub fn new(device: Device, lpips_weights: &Path) -> Result<Self> {
        let lpips = Lpips::load(lpips_weights, &device)?;
        Ok(Self { device, lpips })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn lpips_variant(&self) -> LpipsVariant {
        self.lpips.variant()
    }

    /// Scores every frame of `candidate` against the same-index frame
    /// of `reference` on the luma plane and returns the unweighted
    /// arithmetic mean per metric, all three computed over the same
    /// frame indices. The sequences must agree in frame count and
    /// frame size.
    pub fn compare_sequences(
        &self,
        reference: &YuvSequence,
        candidate: &YuvSequence,
    ) -> Result<SequenceMeans> {
        if reference.shape() != candidate.shape() {
            return Err(VqsweepError::SequenceMismatch {
                reference: reference.describe(),
                candidate: candidate.describe(),
            });
        }

        let frame_count = reference.frame_count();
        if frame_count == 0 {
            return Err(VqsweepError::Input(format!(
                "{} holds no complete frames",
                reference.path().display()
            )));
        }

        let mut psnr_sum = 0.0;
        let mut ssim_sum = 0.0;
        let mut lpips_sum = 0.0;
        for index in 0..frame_count {
            let ref_frame = reference.luma(index).to_tensor(&self.device)?;
            let cand_frame = candidate.luma(index).to_tensor(&self.device)?;

            let frame_psnr = psnr(&ref_frame, &cand_frame)?;
            let frame_ssim = ssim(&ref_frame, &cand_frame)?;
            let frame_lpips = self.lpips.distance(&ref_frame, &cand_frame)? as f64;
            debug!(
                "Frame {index}: PSNR {frame_psnr:.4} dB, SSIM {frame_ssim:.4}, LPIPS {frame_lpips:.4}"
            );

            psnr_sum += frame_psnr;
            ssim_sum += frame_ssim;
            lpips_sum += frame_lpips;
        }

        let count = frame_count as f64;
        Ok(SequenceMeans {
            psnr: psnr_sum / count,
            ssim: ssim_sum / count,
            lpips: lpips_sum / count,
        })
    }

    #[cfg(test)]
    pub(crate) fn untrained(device: Device) -> Result<Self> {
        let lpips = Lpips::untrained(&device)?;
        Ok(Self { device, lpips })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn flat_frame(device: &Device, width: usize, height: usize, value: u8) -> Tensor {
        let data = vec![value as f32 / 255.0; width * height];
        Tensor::from_vec(data, (1, 1, height, width), device).unwrap()
    }

    fn write_sequence(dir: &Path, name: &str, width: usize, height: usize, lumas: &[u8]) -> PathBuf {
        let mut bytes = Vec::new();
        for &luma in lumas {
            bytes.extend(std::iter::repeat(luma).take(width * height));
            bytes.extend(std::iter::repeat(128u8).take(width * height / 2));
        }
        let path = dir.join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn gaussian_window_is_normalized() {
        let window = gaussian_window(11, SSIM_SIGMA, &Device::Cpu).unwrap();
        let total = window.sum_all().unwrap().to_scalar::<f32>().unwrap();
        assert!((total - 1.0).abs() < 1e-5, "window summed to {total}");
    }

    #[test]
    fn psnr_of_identical_frames_hits_the_cap() {
        let device = Device::Cpu;
        let frame = flat_frame(&device, 32, 32, 128);
        assert_eq!(psnr(&frame, &frame).unwrap(), PSNR_CAP);
    }

    #[test]
    fn psnr_of_a_known_offset_matches_the_closed_form() {
        let device = Device::Cpu;
        let reference = flat_frame(&device, 32, 32, 128);
        let candidate = flat_frame(&device, 32, 32, 138);
        // Uniform offset of 10/255 gives 20*log10(25.5) dB.
        let expected = 20.0 * (255.0f64 / 10.0).log10();
        let score = psnr(&reference, &candidate).unwrap();
        assert!((score - expected).abs() < 0.01, "got {score}, want {expected}");
    }

    #[test]
    fn ssim_of_identical_frames_is_one() {
        let device = Device::Cpu;
        let data: Vec<f32> = (0..32 * 32).map(|i| (i % 251) as f32 / 255.0).collect();
        let frame = Tensor::from_vec(data, (1, 1, 32, 32), &device).unwrap();
        let score = ssim(&frame, &frame).unwrap();
        assert!((score - 1.0).abs() < 1e-4, "got {score}");
    }

    #[test]
    fn ssim_drops_below_one_for_distorted_frames() {
        let device = Device::Cpu;
        let reference: Vec<f32> = (0..32 * 32).map(|i| (i % 251) as f32 / 255.0).collect();
        let candidate: Vec<f32> = reference
            .iter()
            .map(|v| (v + 0.2).min(1.0))
            .collect();
        let reference = Tensor::from_vec(reference, (1, 1, 32, 32), &device).unwrap();
        let candidate = Tensor::from_vec(candidate, (1, 1, 32, 32), &device).unwrap();
        let score = ssim(&reference, &candidate).unwrap();
        assert!(score < 0.999, "got {score}");
    }

    #[test]
    fn ssim_window_shrinks_for_tiny_frames() {
        let device = Device::Cpu;
        let frame = flat_frame(&device, 4, 4, 200);
        let score = ssim(&frame, &frame).unwrap();
        assert!((score - 1.0).abs() < 1e-4, "got {score}");
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let device = Device::Cpu;
        let a = flat_frame(&device, 32, 32, 128);
        let b = flat_frame(&device, 16, 16, 128);
        assert!(matches!(
            psnr(&a, &b).unwrap_err(),
            VqsweepError::ShapeMismatch { .. }
        ));
        assert!(matches!(
            ssim(&a, &b).unwrap_err(),
            VqsweepError::ShapeMismatch { .. }
        ));
    }

    #[test]
    fn identical_sequences_score_perfectly() {
        let dir = tempfile::tempdir().unwrap();
        let reference = write_sequence(dir.path(), "reference.yuv", 4, 4, &[128, 128]);
        let candidate = write_sequence(dir.path(), "candidate.yuv", 4, 4, &[128, 128]);
        let reference = YuvSequence::read(&reference, 4, 4).unwrap();
        let candidate = YuvSequence::read(&candidate, 4, 4).unwrap();

        let evaluator = QualityEvaluator::untrained(Device::Cpu).unwrap();
        let means = evaluator.compare_sequences(&reference, &candidate).unwrap();
        assert_eq!(means.psnr, PSNR_CAP);
        assert!((means.ssim - 1.0).abs() < 1e-4);
        assert!(means.lpips.abs() < 1e-6);
    }

    #[test]
    fn swapping_reference_and_candidate_still_scores() {
        let dir = tempfile::tempdir().unwrap();
        let reference = write_sequence(dir.path(), "reference.yuv", 4, 4, &[10, 200]);
        let candidate = write_sequence(dir.path(), "candidate.yuv", 4, 4, &[20, 190]);
        let reference = YuvSequence::read(&reference, 4, 4).unwrap();
        let candidate = YuvSequence::read(&candidate, 4, 4).unwrap();

        let evaluator = QualityEvaluator::untrained(Device::Cpu).unwrap();
        let forward = evaluator.compare_sequences(&reference, &candidate).unwrap();
        let reversed = evaluator.compare_sequences(&candidate, &reference).unwrap();
        assert!((forward.psnr - reversed.psnr).abs() < 1e-9);
    }

    #[test]
    fn frame_count_mismatch_is_a_sequence_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let reference = write_sequence(dir.path(), "reference.yuv", 4, 4, &[10, 20]);
        let candidate = write_sequence(dir.path(), "candidate.yuv", 4, 4, &[10]);
        let reference = YuvSequence::read(&reference, 4, 4).unwrap();
        let candidate = YuvSequence::read(&candidate, 4, 4).unwrap();

        let evaluator = QualityEvaluator::untrained(Device::Cpu).unwrap();
        let err = evaluator
            .compare_sequences(&reference, &candidate)
            .unwrap_err();
        assert!(matches!(err, VqsweepError::SequenceMismatch { .. }));
    }

    #[test]
    fn empty_sequences_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let reference = write_sequence(dir.path(), "reference.yuv", 4, 4, &[]);
        let candidate = write_sequence(dir.path(), "candidate.yuv", 4, 4, &[]);
        let reference = YuvSequence::read(&reference, 4, 4).unwrap();
        let candidate = YuvSequence::read(&candidate, 4, 4).unwrap();

        let evaluator = QualityEvaluator::untrained(Device::Cpu).unwrap();
        let err = evaluator
            .compare_sequences(&reference, &candidate)
            .unwrap_err();
        assert!(matches!(err, VqsweepError::Input(_)));
    }
}
