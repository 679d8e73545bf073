//! Data augmentation for retinal image tensors.
//!
//! Each variant independently rolls every enabled transform against its
//! probability. Transforms stack in a fixed order (geometric, photometric,
//! noise/blur, advanced) so a given seed always reproduces the same output.
//! The input tensor is never mutated; every transform clamps its output back
//! into the valid normalized value range.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Beta, Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::dataset::{NormalizationRecord, Tensor};
use crate::utils::{Result, RetinaError};

/// Rotation by a uniformly sampled angle in `[-max_angle, max_angle]` degrees
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    pub enabled: bool,
    pub probability: f32,
    pub max_angle: f32,
}

/// Horizontal or vertical mirror
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlipConfig {
    pub enabled: bool,
    pub probability: f32,
}

/// Zoom by a uniformly sampled scale in `[min, max]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoomConfig {
    pub enabled: bool,
    pub probability: f32,
    pub min: f32,
    pub max: f32,
}

/// Shift by a uniformly sampled fraction of the image size per axis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationConfig {
    pub enabled: bool,
    pub probability: f32,
    pub max_fraction: f32,
}

/// Horizontal shear by an intensity factor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShearConfig {
    pub enabled: bool,
    pub probability: f32,
    pub intensity: f32,
}

/// Scale by a uniformly sampled factor in `[min, max]`
/// (brightness, contrast, saturation)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorRangeConfig {
    pub enabled: bool,
    pub probability: f32,
    pub min: f32,
    pub max: f32,
}

/// Hue rotation; the shift wraps modulo the hue circle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HueConfig {
    pub enabled: bool,
    pub probability: f32,
    pub max_shift_degrees: f32,
}

/// Additive Gaussian pixel noise
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaussianNoiseConfig {
    pub enabled: bool,
    pub probability: f32,
    pub mean: f32,
    pub stddev: f32,
}

/// Salt-and-pepper noise at a pixel density in `[0, 1]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaltPepperConfig {
    pub enabled: bool,
    pub probability: f32,
    pub density: f32,
}

/// Separable Gaussian blur; kernel size must be odd
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaussianBlurConfig {
    pub enabled: bool,
    pub probability: f32,
    pub kernel_size: usize,
    pub sigma: f32,
}

/// Directional blur along a fixed angle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionBlurConfig {
    pub enabled: bool,
    pub probability: f32,
    pub kernel_size: usize,
    pub angle: f32,
}

/// Masks random square regions with zero or mean fill
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CutoutConfig {
    pub enabled: bool,
    pub probability: f32,
    /// Number of squares to mask per variant
    pub count: usize,
    /// Square side as a fraction of the shorter image side
    pub fraction: f32,
    /// Fill with the image mean instead of zero
    pub mean_fill: bool,
}

/// Mixup/cutmix blending; the mixing coefficient is Beta(alpha, alpha)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixConfig {
    pub enabled: bool,
    pub probability: f32,
    pub alpha: f32,
}

/// Zeroes a periodic grid pattern
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridMaskConfig {
    pub enabled: bool,
    pub probability: f32,
    /// Grid period in pixels
    pub period: usize,
    /// Masked fraction of each period, in `[0, 1]`
    pub ratio: f32,
}

/// Full augmentation configuration, one entry per supported transform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AugmentationConfig {
    pub rotation: RotationConfig,
    pub flip_horizontal: FlipConfig,
    pub flip_vertical: FlipConfig,
    pub zoom: ZoomConfig,
    pub translation: TranslationConfig,
    pub shear: ShearConfig,
    pub brightness: FactorRangeConfig,
    pub contrast: FactorRangeConfig,
    pub saturation: FactorRangeConfig,
    pub hue: HueConfig,
    pub gaussian_noise: GaussianNoiseConfig,
    pub salt_pepper: SaltPepperConfig,
    pub gaussian_blur: GaussianBlurConfig,
    pub motion_blur: MotionBlurConfig,
    pub cutout: CutoutConfig,
    pub mixup: MixConfig,
    pub cutmix: MixConfig,
    pub grid_mask: GridMaskConfig,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            rotation: RotationConfig {
                enabled: true,
                probability: 0.5,
                max_angle: 15.0,
            },
            flip_horizontal: FlipConfig {
                enabled: true,
                probability: 0.5,
            },
            flip_vertical: FlipConfig {
                enabled: false,
                probability: 0.5,
            },
            zoom: ZoomConfig {
                enabled: true,
                probability: 0.3,
                min: 0.9,
                max: 1.1,
            },
            translation: TranslationConfig {
                enabled: false,
                probability: 0.3,
                max_fraction: 0.1,
            },
            shear: ShearConfig {
                enabled: false,
                probability: 0.3,
                intensity: 0.1,
            },
            brightness: FactorRangeConfig {
                enabled: true,
                probability: 0.5,
                min: 0.8,
                max: 1.2,
            },
            contrast: FactorRangeConfig {
                enabled: true,
                probability: 0.5,
                min: 0.8,
                max: 1.2,
            },
            saturation: FactorRangeConfig {
                enabled: false,
                probability: 0.5,
                min: 0.8,
                max: 1.2,
            },
            hue: HueConfig {
                enabled: false,
                probability: 0.3,
                max_shift_degrees: 15.0,
            },
            gaussian_noise: GaussianNoiseConfig {
                enabled: false,
                probability: 0.3,
                mean: 0.0,
                stddev: 0.02,
            },
            salt_pepper: SaltPepperConfig {
                enabled: false,
                probability: 0.2,
                density: 0.01,
            },
            gaussian_blur: GaussianBlurConfig {
                enabled: false,
                probability: 0.2,
                kernel_size: 3,
                sigma: 1.0,
            },
            motion_blur: MotionBlurConfig {
                enabled: false,
                probability: 0.2,
                kernel_size: 5,
                angle: 0.0,
            },
            cutout: CutoutConfig {
                enabled: false,
                probability: 0.3,
                count: 1,
                fraction: 0.2,
                mean_fill: false,
            },
            mixup: MixConfig {
                enabled: false,
                probability: 0.5,
                alpha: 0.2,
            },
            cutmix: MixConfig {
                enabled: false,
                probability: 0.5,
                alpha: 1.0,
            },
            grid_mask: GridMaskConfig {
                enabled: false,
                probability: 0.3,
                period: 8,
                ratio: 0.4,
            },
        }
    }
}

impl AugmentationConfig {
    /// Identity configuration with every transform disabled.
    pub fn none() -> Self {
        let mut config = Self::default();
        config.rotation.enabled = false;
        config.flip_horizontal.enabled = false;
        config.flip_vertical.enabled = false;
        config.zoom.enabled = false;
        config.translation.enabled = false;
        config.shear.enabled = false;
        config.brightness.enabled = false;
        config.contrast.enabled = false;
        config.saturation.enabled = false;
        config.hue.enabled = false;
        config.gaussian_noise.enabled = false;
        config.salt_pepper.enabled = false;
        config.gaussian_blur.enabled = false;
        config.motion_blur.enabled = false;
        config.cutout.enabled = false;
        config.mixup.enabled = false;
        config.cutmix.enabled = false;
        config.grid_mask.enabled = false;
        config
    }

    /// Clamps probabilities into [0, 1] and rejects inconsistent ranges.
    pub fn sanitize(mut self) -> Result<Self> {
        for p in [
            &mut self.rotation.probability,
            &mut self.flip_horizontal.probability,
            &mut self.flip_vertical.probability,
            &mut self.zoom.probability,
            &mut self.translation.probability,
            &mut self.shear.probability,
            &mut self.brightness.probability,
            &mut self.contrast.probability,
            &mut self.saturation.probability,
            &mut self.hue.probability,
            &mut self.gaussian_noise.probability,
            &mut self.salt_pepper.probability,
            &mut self.gaussian_blur.probability,
            &mut self.motion_blur.probability,
            &mut self.cutout.probability,
            &mut self.mixup.probability,
            &mut self.cutmix.probability,
            &mut self.grid_mask.probability,
        ] {
            *p = p.clamp(0.0, 1.0);
        }

        for (name, min, max) in [
            ("zoom", self.zoom.min, self.zoom.max),
            ("brightness", self.brightness.min, self.brightness.max),
            ("contrast", self.contrast.min, self.contrast.max),
            ("saturation", self.saturation.min, self.saturation.max),
        ] {
            if min > max {
                return Err(RetinaError::Config(format!(
                    "{} range min {} exceeds max {}",
                    name, min, max
                )));
            }
        }

        if self.gaussian_blur.kernel_size % 2 == 0 {
            return Err(RetinaError::Config(format!(
                "gaussian blur kernel size must be odd, got {}",
                self.gaussian_blur.kernel_size
            )));
        }
        if !(0.0..=1.0).contains(&self.salt_pepper.density) {
            return Err(RetinaError::Config(format!(
                "salt-pepper density must be in [0, 1], got {}",
                self.salt_pepper.density
            )));
        }
        if self.mixup.alpha <= 0.0 || self.cutmix.alpha <= 0.0 {
            return Err(RetinaError::Config(
                "mixup/cutmix alpha must be positive".to_string(),
            ));
        }
        if self.grid_mask.period < 2 {
            return Err(RetinaError::Config(
                "grid mask period must be at least 2".to_string(),
            ));
        }

        Ok(self)
    }
}

/// Seeded augmentation pipeline producing synthetic variants of a tensor.
pub struct AugmentationPipeline {
    config: AugmentationConfig,
    value_min: f32,
    value_max: f32,
    rng: ChaCha8Rng,
}

impl AugmentationPipeline {
    /// Builds a pipeline for tensors normalized as `normalization` records.
    pub fn new(
        config: AugmentationConfig,
        normalization: &NormalizationRecord,
        seed: u64,
    ) -> Result<Self> {
        Ok(Self {
            config: config.sanitize()?,
            value_min: normalization.value_min,
            value_max: normalization.value_max,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }

    /// Produces `count` independent variants of the input tensor.
    pub fn augment(&mut self, tensor: &Tensor, count: usize) -> Vec<Tensor> {
        (0..count).map(|_| self.augment_one(tensor)).collect()
    }

    /// Blends two samples with mixup or cutmix, returning the blended image
    /// and label vector. Falls back to a plain copy of `a` when neither mix
    /// transform is enabled or rolled.
    pub fn augment_pair(
        &mut self,
        a: (&Tensor, &[f32]),
        b: (&Tensor, &[f32]),
    ) -> (Tensor, Vec<f32>) {
        let mixup = self.config.mixup.clone();
        let cutmix = self.config.cutmix.clone();

        if mixup.enabled && self.rng.gen::<f32>() < mixup.probability {
            return self.mixup(a, b, mixup.alpha);
        }
        if cutmix.enabled && self.rng.gen::<f32>() < cutmix.probability {
            return self.cutmix(a, b, cutmix.alpha);
        }
        (a.0.clone(), a.1.to_vec())
    }

    fn roll(&mut self, enabled: bool, probability: f32) -> bool {
        enabled && self.rng.gen::<f32>() < probability
    }

    fn augment_one(&mut self, tensor: &Tensor) -> Tensor {
        let mut out = tensor.clone();
        let config = self.config.clone();

        // Geometric
        if self.roll(config.rotation.enabled, config.rotation.probability) {
            let angle = self
                .rng
                .gen_range(-config.rotation.max_angle..=config.rotation.max_angle);
            out = rotate(&out, angle);
        }
        if self.roll(config.flip_horizontal.enabled, config.flip_horizontal.probability) {
            out = flip_horizontal(&out);
        }
        if self.roll(config.flip_vertical.enabled, config.flip_vertical.probability) {
            out = flip_vertical(&out);
        }
        if self.roll(config.zoom.enabled, config.zoom.probability) {
            let scale = self.rng.gen_range(config.zoom.min..=config.zoom.max);
            out = zoom(&out, scale);
        }
        if self.roll(config.translation.enabled, config.translation.probability) {
            let f = config.translation.max_fraction;
            let dx = self.rng.gen_range(-f..=f) * out.width() as f32;
            let dy = self.rng.gen_range(-f..=f) * out.height() as f32;
            out = translate(&out, dx, dy);
        }
        if self.roll(config.shear.enabled, config.shear.probability) {
            let k = self
                .rng
                .gen_range(-config.shear.intensity..=config.shear.intensity);
            out = shear(&out, k);
        }

        // Photometric
        if self.roll(config.brightness.enabled, config.brightness.probability) {
            let f = self
                .rng
                .gen_range(config.brightness.min..=config.brightness.max);
            out = brightness(&out, f);
        }
        if self.roll(config.contrast.enabled, config.contrast.probability) {
            let f = self.rng.gen_range(config.contrast.min..=config.contrast.max);
            out = contrast(&out, f);
        }
        if self.roll(config.saturation.enabled, config.saturation.probability) {
            let f = self
                .rng
                .gen_range(config.saturation.min..=config.saturation.max);
            out = saturation(&out, f);
        }
        if self.roll(config.hue.enabled, config.hue.probability) {
            let shift = self
                .rng
                .gen_range(-config.hue.max_shift_degrees..=config.hue.max_shift_degrees);
            out = hue_shift(&out, shift, self.value_min, self.value_max);
        }

        // Noise / blur
        if self.roll(config.gaussian_noise.enabled, config.gaussian_noise.probability) {
            out = self.gaussian_noise(&out, config.gaussian_noise.mean, config.gaussian_noise.stddev);
        }
        if self.roll(config.salt_pepper.enabled, config.salt_pepper.probability) {
            out = self.salt_pepper(&out, config.salt_pepper.density);
        }
        if self.roll(config.gaussian_blur.enabled, config.gaussian_blur.probability) {
            out = gaussian_blur(&out, config.gaussian_blur.kernel_size, config.gaussian_blur.sigma);
        }
        if self.roll(config.motion_blur.enabled, config.motion_blur.probability) {
            out = motion_blur(&out, config.motion_blur.kernel_size, config.motion_blur.angle);
        }

        // Advanced (mixup/cutmix need a partner and run via augment_pair)
        if self.roll(config.cutout.enabled, config.cutout.probability) {
            out = self.cutout(&out, &config.cutout);
        }
        if self.roll(config.grid_mask.enabled, config.grid_mask.probability) {
            out = grid_mask(&out, config.grid_mask.period, config.grid_mask.ratio);
        }

        self.clamp(out)
    }

    fn clamp(&self, tensor: Tensor) -> Tensor {
        let shape = tensor.shape();
        let data = tensor
            .into_data()
            .into_iter()
            .map(|v| v.clamp(self.value_min, self.value_max))
            .collect();
        Tensor::new(shape, data).expect("clamp preserves shape")
    }

    fn gaussian_noise(&mut self, t: &Tensor, mean: f32, stddev: f32) -> Tensor {
        let normal = match Normal::new(mean, stddev) {
            Ok(n) => n,
            Err(_) => return t.clone(),
        };
        let shape = t.shape();
        let data = t
            .data()
            .iter()
            .map(|&v| v + normal.sample(&mut self.rng))
            .collect();
        Tensor::new(shape, data).expect("noise preserves shape")
    }

    fn salt_pepper(&mut self, t: &Tensor, density: f32) -> Tensor {
        let [n, h, w, c] = t.shape();
        let (lo, hi) = (self.value_min, self.value_max);
        let mut data = t.data().to_vec();
        for ni in 0..n {
            for y in 0..h {
                for x in 0..w {
                    if self.rng.gen::<f32>() < density {
                        let value = if self.rng.gen::<bool>() { hi } else { lo };
                        for ci in 0..c {
                            data[((ni * h + y) * w + x) * c + ci] = value;
                        }
                    }
                }
            }
        }
        Tensor::new([n, h, w, c], data).expect("noise preserves shape")
    }

    fn cutout(&mut self, t: &Tensor, config: &CutoutConfig) -> Tensor {
        let [n, h, w, c] = t.shape();
        let side = ((config.fraction * h.min(w) as f32) as usize).max(1);
        let fill = if config.mean_fill { t.mean() } else { 0.0 };

        let mut data = t.data().to_vec();
        for _ in 0..config.count {
            let cy = self.rng.gen_range(0..h);
            let cx = self.rng.gen_range(0..w);
            let y0 = cy.saturating_sub(side / 2);
            let x0 = cx.saturating_sub(side / 2);
            for ni in 0..n {
                for y in y0..(y0 + side).min(h) {
                    for x in x0..(x0 + side).min(w) {
                        for ci in 0..c {
                            data[((ni * h + y) * w + x) * c + ci] = fill;
                        }
                    }
                }
            }
        }
        Tensor::new([n, h, w, c], data).expect("cutout preserves shape")
    }

    fn mixup(&mut self, a: (&Tensor, &[f32]), b: (&Tensor, &[f32]), alpha: f32) -> (Tensor, Vec<f32>) {
        let lambda = self.sample_beta(alpha);
        let shape = a.0.shape();
        let data = a
            .0
            .data()
            .iter()
            .zip(b.0.data().iter())
            .map(|(&va, &vb)| lambda * va + (1.0 - lambda) * vb)
            .collect();
        let labels = a
            .1
            .iter()
            .zip(b.1.iter())
            .map(|(&la, &lb)| lambda * la + (1.0 - lambda) * lb)
            .collect();
        (
            Tensor::new(shape, data).expect("mixup preserves shape"),
            labels,
        )
    }

    fn cutmix(&mut self, a: (&Tensor, &[f32]), b: (&Tensor, &[f32]), alpha: f32) -> (Tensor, Vec<f32>) {
        let lambda = self.sample_beta(alpha);
        let [n, h, w, c] = a.0.shape();

        // Rectangle area is the (1 - lambda) fraction of the image.
        let cut = (1.0 - lambda).sqrt();
        let rh = ((h as f32 * cut) as usize).min(h);
        let rw = ((w as f32 * cut) as usize).min(w);
        let y0 = if h > rh { self.rng.gen_range(0..=h - rh) } else { 0 };
        let x0 = if w > rw { self.rng.gen_range(0..=w - rw) } else { 0 };

        let mut data = a.0.data().to_vec();
        for ni in 0..n {
            for y in y0..y0 + rh {
                for x in x0..x0 + rw {
                    for ci in 0..c {
                        let idx = ((ni * h + y) * w + x) * c + ci;
                        data[idx] = b.0.data()[idx];
                    }
                }
            }
        }

        // Label weight uses the realized (integer) rectangle area.
        let area_fraction = (rh * rw) as f32 / (h * w) as f32;
        let effective = 1.0 - area_fraction;
        let labels = a
            .1
            .iter()
            .zip(b.1.iter())
            .map(|(&la, &lb)| effective * la + (1.0 - effective) * lb)
            .collect();
        (
            Tensor::new([n, h, w, c], data).expect("cutmix preserves shape"),
            labels,
        )
    }

    fn sample_beta(&mut self, alpha: f32) -> f32 {
        match Beta::new(alpha, alpha) {
            Ok(beta) => beta.sample(&mut self.rng),
            Err(_) => 0.5,
        }
    }
}

/// Inverse-maps destination coordinates through `src(y, x) -> (sy, sx)` with
/// bilinear sampling and zero fill outside the source.
fn warp(t: &Tensor, src: impl Fn(f32, f32) -> (f32, f32)) -> Tensor {
    let [n, h, w, c] = t.shape();
    Tensor::from_fn([n, h, w, c], |ni, y, x, ci| {
        let (sy, sx) = src(y as f32, x as f32);
        bilinear(t, ni, sy, sx, ci)
    })
}

/// Bilinear sample at fractional coordinates; zero outside the image.
fn bilinear(t: &Tensor, n: usize, y: f32, x: f32, c: usize) -> f32 {
    let [_, h, w, _] = t.shape();
    let y0 = y.floor();
    let x0 = x.floor();
    let fy = y - y0;
    let fx = x - x0;

    let sample = |yi: f32, xi: f32| -> f32 {
        if yi < 0.0 || xi < 0.0 || yi >= h as f32 || xi >= w as f32 {
            0.0
        } else {
            t.get(n, yi as usize, xi as usize, c)
        }
    };

    let v00 = sample(y0, x0);
    let v01 = sample(y0, x0 + 1.0);
    let v10 = sample(y0 + 1.0, x0);
    let v11 = sample(y0 + 1.0, x0 + 1.0);

    v00 * (1.0 - fy) * (1.0 - fx) + v01 * (1.0 - fy) * fx + v10 * fy * (1.0 - fx) + v11 * fy * fx
}

fn rotate(t: &Tensor, angle_degrees: f32) -> Tensor {
    let theta = angle_degrees.to_radians();
    let (sin, cos) = theta.sin_cos();
    let cy = (t.height() as f32 - 1.0) / 2.0;
    let cx = (t.width() as f32 - 1.0) / 2.0;
    warp(t, |y, x| {
        let dy = y - cy;
        let dx = x - cx;
        (cy + dy * cos - dx * sin, cx + dy * sin + dx * cos)
    })
}

fn flip_horizontal(t: &Tensor) -> Tensor {
    let [n, h, w, c] = t.shape();
    Tensor::from_fn([n, h, w, c], |ni, y, x, ci| t.get(ni, y, w - 1 - x, ci))
}

fn flip_vertical(t: &Tensor) -> Tensor {
    let [n, h, w, c] = t.shape();
    Tensor::from_fn([n, h, w, c], |ni, y, x, ci| t.get(ni, h - 1 - y, x, ci))
}

fn zoom(t: &Tensor, scale: f32) -> Tensor {
    if scale <= 0.0 {
        return t.clone();
    }
    let cy = (t.height() as f32 - 1.0) / 2.0;
    let cx = (t.width() as f32 - 1.0) / 2.0;
    warp(t, |y, x| (cy + (y - cy) / scale, cx + (x - cx) / scale))
}

fn translate(t: &Tensor, dx: f32, dy: f32) -> Tensor {
    warp(t, |y, x| (y - dy, x - dx))
}

fn shear(t: &Tensor, intensity: f32) -> Tensor {
    let cy = (t.height() as f32 - 1.0) / 2.0;
    warp(t, |y, x| (y, x - intensity * (y - cy)))
}

fn brightness(t: &Tensor, factor: f32) -> Tensor {
    let shape = t.shape();
    let data = t.data().iter().map(|&v| v * factor).collect();
    Tensor::new(shape, data).expect("brightness preserves shape")
}

/// Contrast pivots on the per-image mean intensity so dark and bright images
/// are treated symmetrically.
fn contrast(t: &Tensor, factor: f32) -> Tensor {
    let mean = t.mean();
    let shape = t.shape();
    let data = t
        .data()
        .iter()
        .map(|&v| mean + factor * (v - mean))
        .collect();
    Tensor::new(shape, data).expect("contrast preserves shape")
}

fn saturation(t: &Tensor, factor: f32) -> Tensor {
    let [n, h, w, c] = t.shape();
    if c != 3 {
        return t.clone();
    }
    Tensor::from_fn([n, h, w, c], |ni, y, x, ci| {
        let r = t.get(ni, y, x, 0);
        let g = t.get(ni, y, x, 1);
        let b = t.get(ni, y, x, 2);
        let gray = 0.299 * r + 0.587 * g + 0.114 * b;
        gray + factor * (t.get(ni, y, x, ci) - gray)
    })
}

/// Hue rotation in HSV space. Values are rescaled into [0, 1] relative to
/// the normalization range first, so z-scored tensors shift correctly too.
fn hue_shift(t: &Tensor, shift_degrees: f32, value_min: f32, value_max: f32) -> Tensor {
    let [n, h, w, c] = t.shape();
    if c != 3 {
        return t.clone();
    }
    let span = (value_max - value_min).max(f32::EPSILON);
    let to_unit = |v: f32| ((v - value_min) / span).clamp(0.0, 1.0);
    let from_unit = |v: f32| v * span + value_min;

    Tensor::from_fn([n, h, w, c], |ni, y, x, ci| {
        let r = to_unit(t.get(ni, y, x, 0));
        let g = to_unit(t.get(ni, y, x, 1));
        let b = to_unit(t.get(ni, y, x, 2));
        let (hh, s, v) = rgb_to_hsv(r, g, b);
        let shifted = (hh + shift_degrees).rem_euclid(360.0);
        let (nr, ng, nb) = hsv_to_rgb(shifted, s, v);
        from_unit(match ci {
            0 => nr,
            1 => ng,
            _ => nb,
        })
    })
}

fn rgb_to_hsv(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta < f32::EPSILON {
        0.0
    } else if (max - r).abs() < f32::EPSILON {
        60.0 * (((g - b) / delta).rem_euclid(6.0))
    } else if (max - g).abs() < f32::EPSILON {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let s = if max < f32::EPSILON { 0.0 } else { delta / max };
    (h, s, max)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (f32, f32, f32) {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0).rem_euclid(2.0) - 1.0).abs());
    let m = v - c;
    let (r, g, b) = match h {
        h if h < 60.0 => (c, x, 0.0),
        h if h < 120.0 => (x, c, 0.0),
        h if h < 180.0 => (0.0, c, x),
        h if h < 240.0 => (0.0, x, c),
        h if h < 300.0 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    (r + m, g + m, b + m)
}

fn gaussian_blur(t: &Tensor, kernel_size: usize, sigma: f32) -> Tensor {
    if kernel_size < 3 || sigma <= 0.0 {
        return t.clone();
    }
    let half = (kernel_size / 2) as isize;
    let mut kernel = Vec::with_capacity(kernel_size);
    for i in -half..=half {
        kernel.push((-(i * i) as f32 / (2.0 * sigma * sigma)).exp());
    }
    let sum: f32 = kernel.iter().sum();
    for k in kernel.iter_mut() {
        *k /= sum;
    }

    let [n, h, w, c] = t.shape();
    let clamp_x = |x: isize| x.clamp(0, w as isize - 1) as usize;
    let clamp_y = |y: isize| y.clamp(0, h as isize - 1) as usize;

    // Separable: horizontal pass then vertical pass.
    let horizontal = Tensor::from_fn([n, h, w, c], |ni, y, x, ci| {
        kernel
            .iter()
            .enumerate()
            .map(|(k, &kv)| kv * t.get(ni, y, clamp_x(x as isize + k as isize - half), ci))
            .sum()
    });
    Tensor::from_fn([n, h, w, c], |ni, y, x, ci| {
        kernel
            .iter()
            .enumerate()
            .map(|(k, &kv)| kv * horizontal.get(ni, clamp_y(y as isize + k as isize - half), x, ci))
            .sum()
    })
}

fn motion_blur(t: &Tensor, kernel_size: usize, angle_degrees: f32) -> Tensor {
    if kernel_size < 2 {
        return t.clone();
    }
    let theta = angle_degrees.to_radians();
    let (dy, dx) = (theta.sin(), theta.cos());
    let half = (kernel_size / 2) as f32;
    let [n, h, w, c] = t.shape();

    Tensor::from_fn([n, h, w, c], |ni, y, x, ci| {
        let mut acc = 0.0;
        let mut count = 0usize;
        for k in 0..kernel_size {
            let offset = k as f32 - half;
            let sy = (y as f32 + offset * dy).round() as isize;
            let sx = (x as f32 + offset * dx).round() as isize;
            if sy >= 0 && sx >= 0 && (sy as usize) < h && (sx as usize) < w {
                acc += t.get(ni, sy as usize, sx as usize, ci);
                count += 1;
            }
        }
        if count > 0 {
            acc / count as f32
        } else {
            t.get(ni, y, x, ci)
        }
    })
}

fn grid_mask(t: &Tensor, period: usize, ratio: f32) -> Tensor {
    let band = ((period as f32 * ratio.clamp(0.0, 1.0)) as usize).min(period);
    let [n, h, w, c] = t.shape();
    Tensor::from_fn([n, h, w, c], |ni, y, x, ci| {
        if y % period < band && x % period < band {
            0.0
        } else {
            t.get(ni, y, x, ci)
        }
    })
}
