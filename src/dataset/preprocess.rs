//! Image preprocessing: decode, resize, and normalize uploads into tensors.

use image::{imageops::FilterType, DynamicImage};
use serde::{Deserialize, Serialize};

use crate::dataset::{ImageSample, NormalizationMethod, NormalizationRecord, Tensor};
use crate::utils::{Result, RetinaError};

/// Resize filter used when scaling images to the model input size.
///
/// Resizing distorts aspect ratio intentionally (no letterboxing) so the
/// pipeline stays deterministic and reproducible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResizeFilter {
    /// Bilinear interpolation (default)
    Bilinear,
    /// Nearest neighbour
    Nearest,
    /// Lanczos windowed sinc
    Lanczos3,
}

impl ResizeFilter {
    fn to_filter_type(self) -> FilterType {
        match self {
            ResizeFilter::Bilinear => FilterType::Triangle,
            ResizeFilter::Nearest => FilterType::Nearest,
            ResizeFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// Configuration for image preprocessing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessConfig {
    /// Target width in pixels
    pub width: u32,
    /// Target height in pixels
    pub height: u32,
    /// Resize filter
    pub filter: ResizeFilter,
    /// Normalization method and statistics
    pub normalization: NormalizationRecord,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            width: 224,
            height: 224,
            filter: ResizeFilter::Bilinear,
            normalization: NormalizationRecord::min_max(),
        }
    }
}

impl PreprocessConfig {
    /// ImageNet-style z-score preprocessing at 224x224, the statistics the
    /// original retina backend trained with.
    pub fn imagenet_z_score() -> Self {
        Self {
            width: 224,
            height: 224,
            filter: ResizeFilter::Bilinear,
            normalization: NormalizationRecord::z_score(
                [0.485, 0.456, 0.406],
                [0.229, 0.224, 0.225],
            ),
        }
    }

    /// Flattened input dimension of the resulting tensors
    pub fn input_dim(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

/// Decodes raw image bytes into fixed-size normalized tensors.
pub struct Preprocessor {
    config: PreprocessConfig,
}

impl Preprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    /// Decodes one uploaded sample into a `[1, h, w, 3]` tensor.
    pub fn decode_sample(&self, sample: &ImageSample) -> Result<Tensor> {
        let image = image::load_from_memory(&sample.bytes).map_err(|e| {
            RetinaError::Image(format!("failed to decode '{}': {}", sample.filename, e))
        })?;
        Ok(self.process(&image))
    }

    /// Resizes and normalizes an already decoded image.
    pub fn process(&self, image: &DynamicImage) -> Tensor {
        let rgb = image
            .resize_exact(
                self.config.width,
                self.config.height,
                self.config.filter.to_filter_type(),
            )
            .to_rgb8();

        let h = self.config.height as usize;
        let w = self.config.width as usize;
        let norm = &self.config.normalization;

        let mut data = Vec::with_capacity(h * w * 3);
        for pixel in rgb.pixels() {
            for c in 0..3 {
                let value = pixel[c] as f32 / 255.0;
                data.push(match norm.method {
                    NormalizationMethod::MinMax => value,
                    NormalizationMethod::ZScore => (value - norm.mean[c]) / norm.std[c],
                });
            }
        }

        // Length always matches the shape by construction.
        Tensor::new([1, h, w, 3], data).expect("preprocessed tensor shape")
    }

    /// One-hot label vector ordered by the caller-supplied class list.
    pub fn one_hot(&self, sample: &ImageSample, class_names: &[String]) -> Result<Vec<f32>> {
        let index = class_names
            .iter()
            .position(|name| name == &sample.label)
            .ok_or_else(|| RetinaError::UnknownLabel {
                label: sample.label.clone(),
                filename: sample.filename.clone(),
            })?;

        let mut one_hot = vec![0.0; class_names.len()];
        one_hot[index] = 1.0;
        Ok(one_hot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn encode_test_image(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = ImageBuffer::from_pixel(width, height, Rgb(color));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(
                &mut std::io::Cursor::new(&mut bytes),
                image::ImageOutputFormat::Png,
            )
            .unwrap();
        bytes
    }

    fn small_config() -> PreprocessConfig {
        PreprocessConfig {
            width: 8,
            height: 8,
            ..PreprocessConfig::default()
        }
    }

    #[test]
    fn test_decode_resizes_to_target() {
        let pre = Preprocessor::new(small_config());
        let sample = ImageSample::new(encode_test_image(32, 20, [200, 100, 50]), "normal", "a.png");

        let tensor = pre.decode_sample(&sample).unwrap();
        assert_eq!(tensor.shape(), [1, 8, 8, 3]);
    }

    #[test]
    fn test_min_max_range() {
        let pre = Preprocessor::new(small_config());
        let sample = ImageSample::new(encode_test_image(8, 8, [255, 0, 128]), "normal", "a.png");

        let tensor = pre.decode_sample(&sample).unwrap();
        assert!(tensor.data().iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert!((tensor.get(0, 0, 0, 0) - 1.0).abs() < 1e-6);
        assert!(tensor.get(0, 0, 0, 1).abs() < 1e-6);
    }

    #[test]
    fn test_z_score_values() {
        let config = PreprocessConfig {
            width: 4,
            height: 4,
            filter: ResizeFilter::Bilinear,
            normalization: NormalizationRecord::z_score([0.5, 0.5, 0.5], [0.25, 0.25, 0.25]),
        };
        let pre = Preprocessor::new(config);
        let sample = ImageSample::new(encode_test_image(4, 4, [255, 255, 255]), "normal", "a.png");

        let tensor = pre.decode_sample(&sample).unwrap();
        // (1.0 - 0.5) / 0.25 = 2.0 for every channel
        assert!(tensor.data().iter().all(|&v| (v - 2.0).abs() < 1e-5));
    }

    #[test]
    fn test_one_hot_ordering() {
        let pre = Preprocessor::new(small_config());
        let classes = vec!["cataract".to_string(), "glaucoma".to_string(), "normal".to_string()];
        let sample = ImageSample::new(vec![], "glaucoma", "g.png");

        let one_hot = pre.one_hot(&sample, &classes).unwrap();
        assert_eq!(one_hot, vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_unknown_label() {
        let pre = Preprocessor::new(small_config());
        let classes = vec!["cataract".to_string()];
        let sample = ImageSample::new(vec![], "melanoma", "m.png");

        let err = pre.one_hot(&sample, &classes).unwrap_err();
        assert!(matches!(err, RetinaError::UnknownLabel { .. }));
    }

    #[test]
    fn test_invalid_bytes_fail() {
        let pre = Preprocessor::new(small_config());
        let sample = ImageSample::new(vec![1, 2, 3], "normal", "bad.png");
        assert!(pre.decode_sample(&sample).is_err());
    }
}
