// src/yuv.rs
//
// Raw 4:2:0 planar sequence handling: whole-file frame parsing and luma
// plane extraction. Each frame is width*height luma bytes followed by two
// quarter-resolution chroma planes; chroma is carried but never scored.

use crate::error::{Result, VqsweepError};
use candle_core::{DType, Device, Tensor};
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

/// A fully loaded raw YUV 4:2:0 sequence with fixed frame geometry.
#[derive(Debug, Clone)]
pub struct YuvSequence {
    path: PathBuf,
    width: usize,
    height: usize,
    frame_size: usize,
    data: Vec<u8>,
}

impl YuvSequence {
    /// Reads a raw sequence, validating that the file is a whole number of
    /// `width*height*3/2`-byte frames. A partial trailing frame is a
    /// permanent condition for the file, not something to retry.
    pub fn read(path: &Path, width: usize, height: usize) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(VqsweepError::Input(format!(
                "Frame dimensions must be positive, got {}x{}",
                width, height
            )));
        }

        let data = fs::read(path)?;
        let frame_size = width * height * 3 / 2;
        if data.len() % frame_size != 0 {
            return Err(VqsweepError::Format {
                path: path.to_path_buf(),
                detail: format!(
                    "{} bytes is not a whole number of {}-byte 4:2:0 frames at {}x{}",
                    data.len(),
                    frame_size,
                    width,
                    height
                ),
            });
        }

        debug!(
            "Loaded {}: {} frames of {} bytes ({}x{})",
            path.display(),
            data.len() / frame_size,
            frame_size,
            width,
            height
        );

        Ok(Self {
            path: path.to_path_buf(),
            width,
            height,
            frame_size,
            data,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn frame_count(&self) -> usize {
        self.data.len() / self.frame_size
    }

    /// Sequence geometry as (frame count, bytes per frame).
    pub fn shape(&self) -> (usize, usize) {
        (self.frame_count(), self.frame_size)
    }

    pub fn describe(&self) -> String {
        format!(
            "{} frames of {} bytes ({}x{})",
            self.frame_count(),
            self.frame_size,
            self.width,
            self.height
        )
    }

    /// Extracts the luma plane of frame `index` (must be < `frame_count`).
    /// The plane is copied out so the backing buffer is never mutated or
    /// aliased by downstream consumers.
    pub fn luma(&self, index: usize) -> LumaFrame {
        let start = index * self.frame_size;
        let block = &self.data[start..start + self.frame_size];
        LumaFrame {
            width: self.width,
            height: self.height,
            data: block[..self.width * self.height].to_vec(),
        }
    }
}

/// One frame's luma plane: `height`x`width` 8-bit samples, row-major.
#[derive(Debug, Clone)]
pub struct LumaFrame {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl LumaFrame {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn samples(&self) -> &[u8] {
        &self.data
    }

    /// Normalizes the plane into a `[1, 1, H, W]` f32 tensor in [0, 1] on
    /// the given device. The tensor lives only for one metric evaluation.
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        let tensor = Tensor::from_vec(
            self.data.clone(),
            (1, 1, self.height, self.width),
            device,
        )?
        .to_dtype(DType::F32)?;
        Ok((tensor / 255.0f64)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_sequence(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn parses_exact_multiple_of_frame_size() {
        let dir = tempfile::tempdir().unwrap();
        // 4x4 4:2:0 frame = 16 luma + 8 chroma = 24 bytes
        let path = write_sequence(&dir, "ref.yuv", &vec![128u8; 24 * 3]);
        let seq = YuvSequence::read(&path, 4, 4).unwrap();
        assert_eq!(seq.frame_count(), 3);
        assert_eq!(seq.shape(), (3, 24));
    }

    #[test]
    fn rejects_partial_trailing_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sequence(&dir, "bad.yuv", &vec![0u8; 30]);
        let err = YuvSequence::read(&path, 4, 4).unwrap_err();
        assert!(matches!(err, VqsweepError::Format { .. }));
    }

    #[test]
    fn rejects_zero_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sequence(&dir, "ref.yuv", &vec![0u8; 24]);
        let err = YuvSequence::read(&path, 0, 4).unwrap_err();
        assert!(matches!(err, VqsweepError::Input(_)));
    }

    #[test]
    fn empty_file_parses_as_zero_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sequence(&dir, "empty.yuv", &[]);
        let seq = YuvSequence::read(&path, 4, 4).unwrap();
        assert_eq!(seq.frame_count(), 0);
    }

    #[test]
    fn luma_is_the_first_plane_of_the_indexed_frame() {
        let dir = tempfile::tempdir().unwrap();
        // Two frames with distinct luma fill so indexing is observable.
        let mut bytes = vec![10u8; 24];
        bytes.extend(vec![20u8; 24]);
        let path = write_sequence(&dir, "two.yuv", &bytes);
        let seq = YuvSequence::read(&path, 4, 4).unwrap();

        let first = seq.luma(0);
        let second = seq.luma(1);
        assert_eq!(first.samples(), &[10u8; 16]);
        assert_eq!(second.samples(), &[20u8; 16]);
        assert_eq!(first.width(), 4);
        assert_eq!(first.height(), 4);
    }

    #[test]
    fn tensor_is_unit_range_f32() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sequence(&dir, "ref.yuv", &vec![128u8; 24]);
        let seq = YuvSequence::read(&path, 4, 4).unwrap();

        let tensor = seq.luma(0).to_tensor(&Device::Cpu).unwrap();
        assert_eq!(tensor.dims(), &[1, 1, 4, 4]);
        let value: f32 = tensor.flatten_all().unwrap().to_vec1::<f32>().unwrap()[0];
        assert!((value - 128.0 / 255.0).abs() < 1e-6);
    }
}
