// src/lpips.rs
//
// LPIPS perceptual distance: a pretrained feature backbone (AlexNet or
// VGG16 convolutional stages) with learned 1x1 linear heads over unit-
// normalized feature differences. Loaded once per process from a
// safetensors file and bound to one compute device for the whole run.
//
// Weight layout: AlexNet stages under `net.conv{1..5}.{weight,bias}`,
// VGG16 stages under `net.conv{group}_{index}.{weight,bias}`, and the
// five linear heads under `lin{0..4}.weight`.

use crate::error::{Result, VqsweepError};
use crate::metrics::ensure_same_shape;
use candle_core::{DType, Device, Tensor};
use candle_nn::{conv2d, conv2d_no_bias, Conv2d, Conv2dConfig, VarBuilder};
use log::info;
use safetensors::SafeTensors;
use std::fs;
use std::path::Path;

/// Input normalization constants published with the original LPIPS nets.
const SHIFT: [f32; 3] = [-0.030, -0.088, -0.188];
const SCALE: [f32; 3] = [0.458, 0.448, 0.450];

/// Tap widths per backbone stage.
const ALEX_CHANNELS: [usize; 5] = [64, 192, 384, 256, 256];
const VGG_CHANNELS: [usize; 5] = [64, 128, 256, 512, 512];

/// Smallest spatial side the conv stacks can reduce without producing an
/// empty feature map; smaller frames are nearest-neighbor upsampled.
const MIN_SIDE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LpipsVariant {
    Alex,
    Vgg16,
}

impl LpipsVariant {
    pub fn name(&self) -> &'static str {
        match self {
            LpipsVariant::Alex => "alex",
            LpipsVariant::Vgg16 => "vgg16",
        }
    }

    fn channels(&self) -> [usize; 5] {
        match self {
            LpipsVariant::Alex => ALEX_CHANNELS,
            LpipsVariant::Vgg16 => VGG_CHANNELS,
        }
    }
}

/// The five ReLU feature taps of the AlexNet convolutional stack.
#[derive(Debug)]
struct AlexFeatures {
    conv1: Conv2d,
    conv2: Conv2d,
    conv3: Conv2d,
    conv4: Conv2d,
    conv5: Conv2d,
}

impl AlexFeatures {
    fn load(vb: VarBuilder) -> candle_core::Result<Self> {
        let stride4 = Conv2dConfig {
            stride: 4,
            padding: 2,
            ..Default::default()
        };
        let pad2 = Conv2dConfig {
            padding: 2,
            ..Default::default()
        };
        let pad1 = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };
        Ok(Self {
            conv1: conv2d(3, 64, 11, stride4, vb.pp("conv1"))?,
            conv2: conv2d(64, 192, 5, pad2, vb.pp("conv2"))?,
            conv3: conv2d(192, 384, 3, pad1, vb.pp("conv3"))?,
            conv4: conv2d(384, 256, 3, pad1, vb.pp("conv4"))?,
            conv5: conv2d(256, 256, 3, pad1, vb.pp("conv5"))?,
        })
    }

    fn taps(&self, xs: &Tensor) -> candle_core::Result<Vec<Tensor>> {
        let h1 = xs.apply(&self.conv1)?.relu()?;
        let h2 = h1.max_pool2d_with_stride(3, 2)?.apply(&self.conv2)?.relu()?;
        let h3 = h2.max_pool2d_with_stride(3, 2)?.apply(&self.conv3)?.relu()?;
        let h4 = h3.apply(&self.conv4)?.relu()?;
        let h5 = h4.apply(&self.conv5)?.relu()?;
        Ok(vec![h1, h2, h3, h4, h5])
    }
}

/// The five stage outputs of the VGG16 convolutional stack.
#[derive(Debug)]
struct VggFeatures {
    conv1_1: Conv2d,
    conv1_2: Conv2d,
    conv2_1: Conv2d,
    conv2_2: Conv2d,
    conv3_1: Conv2d,
    conv3_2: Conv2d,
    conv3_3: Conv2d,
    conv4_1: Conv2d,
    conv4_2: Conv2d,
    conv4_3: Conv2d,
    conv5_1: Conv2d,
    conv5_2: Conv2d,
    conv5_3: Conv2d,
}

impl VggFeatures {
    fn load(vb: VarBuilder) -> candle_core::Result<Self> {
        let pad1 = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };
        let layer = |c_in, c_out, name: &str| conv2d(c_in, c_out, 3, pad1, vb.pp(name));
        Ok(Self {
            conv1_1: layer(3, 64, "conv1_1")?,
            conv1_2: layer(64, 64, "conv1_2")?,
            conv2_1: layer(64, 128, "conv2_1")?,
            conv2_2: layer(128, 128, "conv2_2")?,
            conv3_1: layer(128, 256, "conv3_1")?,
            conv3_2: layer(256, 256, "conv3_2")?,
            conv3_3: layer(256, 256, "conv3_3")?,
            conv4_1: layer(256, 512, "conv4_1")?,
            conv4_2: layer(512, 512, "conv4_2")?,
            conv4_3: layer(512, 512, "conv4_3")?,
            conv5_1: layer(512, 512, "conv5_1")?,
            conv5_2: layer(512, 512, "conv5_2")?,
            conv5_3: layer(512, 512, "conv5_3")?,
        })
    }

    fn taps(&self, xs: &Tensor) -> candle_core::Result<Vec<Tensor>> {
        let h1 = xs.apply(&self.conv1_1)?.relu()?.apply(&self.conv1_2)?.relu()?;
        let h2 = h1
            .max_pool2d(2)?
            .apply(&self.conv2_1)?
            .relu()?
            .apply(&self.conv2_2)?
            .relu()?;
        let h3 = h2
            .max_pool2d(2)?
            .apply(&self.conv3_1)?
            .relu()?
            .apply(&self.conv3_2)?
            .relu()?
            .apply(&self.conv3_3)?
            .relu()?;
        let h4 = h3
            .max_pool2d(2)?
            .apply(&self.conv4_1)?
            .relu()?
            .apply(&self.conv4_2)?
            .relu()?
            .apply(&self.conv4_3)?
            .relu()?;
        let h5 = h4
            .max_pool2d(2)?
            .apply(&self.conv5_1)?
            .relu()?
            .apply(&self.conv5_2)?
            .relu()?
            .apply(&self.conv5_3)?
            .relu()?;
        Ok(vec![h1, h2, h3, h4, h5])
    }
}

#[derive(Debug)]
enum Backbone {
    Alex(AlexFeatures),
    Vgg(VggFeatures),
}

impl Backbone {
    fn taps(&self, xs: &Tensor) -> candle_core::Result<Vec<Tensor>> {
        match self {
            Backbone::Alex(net) => net.taps(xs),
            Backbone::Vgg(net) => net.taps(xs),
        }
    }
}

/// LPIPS evaluator: backbone, linear heads, and the input scaling
/// constants, all resident on one device.
#[derive(Debug)]
pub struct Lpips {
    variant: LpipsVariant,
    backbone: Backbone,
    lins: Vec<Conv2d>,
    shift: Tensor,
    scale: Tensor,
}

impl Lpips {
    /// Loads the evaluator from a safetensors weight file, once per
    /// process. The backbone variant is detected from the tensor names.
    pub fn load(weights: &Path, device: &Device) -> Result<Self> {
        let (variant, tensor_count) = inspect_weights(weights)?;
        info!(
            "Loading LPIPS weights from {} ({} net, {} tensors)",
            weights.display(),
            variant.name(),
            tensor_count
        );

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, device)?
        };
        Self::build(variant, vb, device)
    }

    fn build(variant: LpipsVariant, vb: VarBuilder, device: &Device) -> Result<Self> {
        let backbone = match variant {
            LpipsVariant::Alex => Backbone::Alex(AlexFeatures::load(vb.pp("net"))?),
            LpipsVariant::Vgg16 => Backbone::Vgg(VggFeatures::load(vb.pp("net"))?),
        };

        let mut lins = Vec::with_capacity(5);
        for (index, channels) in variant.channels().into_iter().enumerate() {
            lins.push(conv2d_no_bias(
                channels,
                1,
                1,
                Conv2dConfig::default(),
                vb.pp(format!("lin{index}")),
            )?);
        }

        let shift = Tensor::new(&SHIFT, device)?.reshape((1, 3, 1, 1))?;
        let scale = Tensor::new(&SCALE, device)?.reshape((1, 3, 1, 1))?;

        Ok(Self {
            variant,
            backbone,
            lins,
            shift,
            scale,
        })
    }

    pub fn variant(&self) -> LpipsVariant {
        self.variant
    }

    /// Learned perceptual distance between two `[1, C, H, W]` tensors in
    /// [0, 1] with C of 1 or 3. Near 0 for perceptually identical frames.
    pub fn distance(&self, reference: &Tensor, candidate: &Tensor) -> Result<f32> {
        ensure_same_shape(reference, candidate)?;
        let reference = self.prepare(reference)?;
        let candidate = self.prepare(candidate)?;

        let ref_taps = self.backbone.taps(&reference)?;
        let cand_taps = self.backbone.taps(&candidate)?;

        let mut total = 0f32;
        for ((ref_tap, cand_tap), lin) in ref_taps.iter().zip(cand_taps.iter()).zip(&self.lins) {
            let diff = (unit_normalize(ref_tap)? - unit_normalize(cand_tap)?)?.sqr()?;
            total += diff.apply(lin)?.mean_all()?.to_scalar::<f32>()?;
        }
        Ok(total)
    }

    /// Promotes single-channel input to the network's three channels,
    /// upsamples below-minimum frames, and applies the input scaling.
    fn prepare(&self, xs: &Tensor) -> Result<Tensor> {
        let (_, channels, height, width) = xs.dims4()?;
        let xs = match channels {
            3 => xs.clone(),
            1 => xs.repeat((1, 3, 1, 1))?,
            other => {
                return Err(VqsweepError::ShapeMismatch {
                    expected: "1 or 3 channels".to_string(),
                    actual: format!("{other} channels"),
                });
            }
        };

        let xs = if height < MIN_SIDE || width < MIN_SIDE {
            xs.upsample_nearest2d(height.max(MIN_SIDE), width.max(MIN_SIDE))?
        } else {
            xs
        };

        // [0,1] -> [-1,1], then the published channel normalization.
        let xs = xs.affine(2.0, -1.0)?;
        Ok(xs.broadcast_sub(&self.shift)?.broadcast_div(&self.scale)?)
    }

    #[cfg(test)]
    pub(crate) fn untrained(device: &Device) -> Result<Self> {
        let varmap = candle_nn::VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        Self::build(LpipsVariant::Alex, vb, device)
    }
}

/// Scales each feature vector to unit length along the channel dimension.
fn unit_normalize(features: &Tensor) -> candle_core::Result<Tensor> {
    let norm = features.sqr()?.sum_keepdim(1)?.sqrt()?;
    features.broadcast_div(&(norm + 1e-10)?)
}

/// Opens the weight file without loading tensor data and reports the
/// backbone variant and tensor count. Used by `check` and by `load`.
pub fn inspect_weights(path: &Path) -> Result<(LpipsVariant, usize)> {
    let file = fs::File::open(path).map_err(|e| {
        VqsweepError::Dependency(format!("LPIPS weights {}: {}", path.display(), e))
    })?;
    let mmap = unsafe { memmap2::Mmap::map(&file) }.map_err(|e| {
        VqsweepError::Dependency(format!(
            "Failed to memory-map LPIPS weights {}: {}",
            path.display(),
            e
        ))
    })?;
    let tensors = SafeTensors::deserialize(&mmap).map_err(|e| {
        VqsweepError::Dependency(format!(
            "LPIPS weights {} are not valid safetensors: {}",
            path.display(),
            e
        ))
    })?;

    let variant = if tensors.tensor("net.conv1_1.weight").is_ok() {
        LpipsVariant::Vgg16
    } else if tensors.tensor("net.conv1.weight").is_ok() {
        LpipsVariant::Alex
    } else {
        return Err(VqsweepError::Dependency(format!(
            "LPIPS weights {} match neither the alex nor the vgg16 layout",
            path.display()
        )));
    };
    Ok((variant, tensors.names().len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn gradient_frame(device: &Device, size: usize) -> Tensor {
        let data: Vec<f32> = (0..size * size)
            .map(|i| (i % 255) as f32 / 255.0)
            .collect();
        Tensor::from_vec(data, (1, 1, size, size), device).unwrap()
    }

    #[test]
    fn identical_inputs_score_zero() {
        let device = Device::Cpu;
        let model = Lpips::untrained(&device).unwrap();
        let frame = gradient_frame(&device, 64);
        let distance = model.distance(&frame, &frame).unwrap();
        assert!(distance.abs() < 1e-6, "distance was {distance}");
    }

    #[test]
    fn tiny_frames_are_upsampled_not_rejected() {
        let device = Device::Cpu;
        let model = Lpips::untrained(&device).unwrap();
        let frame = Tensor::from_vec(
            vec![128.0f32 / 255.0; 16],
            (1, 1, 4, 4),
            &device,
        )
        .unwrap();
        let distance = model.distance(&frame, &frame).unwrap();
        assert!(distance.abs() < 1e-6);
    }

    #[test]
    fn single_channel_input_is_promoted() {
        let device = Device::Cpu;
        let model = Lpips::untrained(&device).unwrap();
        let prepared = model.prepare(&gradient_frame(&device, 40)).unwrap();
        assert_eq!(prepared.dims(), &[1, 3, 40, 40]);
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let device = Device::Cpu;
        let model = Lpips::untrained(&device).unwrap();
        let a = gradient_frame(&device, 64);
        let b = gradient_frame(&device, 48);
        let err = model.distance(&a, &b).unwrap_err();
        assert!(matches!(err, VqsweepError::ShapeMismatch { .. }));
    }

    #[test]
    fn variant_detection_reads_tensor_names() {
        let device = Device::Cpu;
        let dir = tempfile::tempdir().unwrap();

        let alex_path = dir.path().join("alex.safetensors");
        let mut alex = HashMap::new();
        alex.insert(
            "net.conv1.weight".to_string(),
            Tensor::zeros((2, 3, 3, 3), DType::F32, &device).unwrap(),
        );
        candle_core::safetensors::save(&alex, &alex_path).unwrap();
        assert_eq!(inspect_weights(&alex_path).unwrap().0, LpipsVariant::Alex);

        let vgg_path = dir.path().join("vgg.safetensors");
        let mut vgg = HashMap::new();
        vgg.insert(
            "net.conv1_1.weight".to_string(),
            Tensor::zeros((2, 3, 3, 3), DType::F32, &device).unwrap(),
        );
        candle_core::safetensors::save(&vgg, &vgg_path).unwrap();
        assert_eq!(inspect_weights(&vgg_path).unwrap().0, LpipsVariant::Vgg16);
    }

    #[test]
    fn missing_weight_file_is_a_dependency_error() {
        let err = inspect_weights(Path::new("/nonexistent/lpips.safetensors")).unwrap_err();
        assert!(matches!(err, VqsweepError::Dependency(_)));
    }
}
