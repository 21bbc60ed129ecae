use std::path::Path;

use image::{imageops::FilterType, DynamicImage};
use serde::Deserialize;
use vision_chat::{BoxedError, ImageProcessor, PixelValues};

use crate::GlmError;

/// The target size of a resized image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct ImageSize {
    /// The height in pixels
    pub height: u32,
    /// The width in pixels
    pub width: u32,
}

/// The settings from `preprocessor_config.json`. Missing fields fall back to the values
/// GLM-Edge-V ships with.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct PreprocessorConfig {
    /// Resize the image to `size`
    pub do_resize: bool,
    /// Multiply the pixel values by `rescale_factor`
    pub do_rescale: bool,
    /// Normalize with `image_mean` and `image_std`
    pub do_normalize: bool,
    /// Convert the image to RGB first
    pub do_convert_rgb: bool,
    /// The size to resize to
    pub size: ImageSize,
    /// The PIL resampling filter id
    pub resample: u8,
    /// The factor pixel values are rescaled by
    pub rescale_factor: f32,
    /// The per channel mean
    pub image_mean: [f32; 3],
    /// The per channel standard deviation
    pub image_std: [f32; 3],
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        Self {
            do_resize: true,
            do_rescale: true,
            do_normalize: true,
            do_convert_rgb: true,
            size: ImageSize {
                height: 672,
                width: 672,
            },
            resample: 3,
            rescale_factor: 1.0 / 255.0,
            image_mean: [0.5; 3],
            image_std: [0.5; 3],
        }
    }
}

impl PreprocessorConfig {
    /// Read the config from a `preprocessor_config.json` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GlmError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn filter(&self) -> FilterType {
        match self.resample {
            0 => FilterType::Nearest,
            1 => FilterType::Lanczos3,
            2 | 4 | 5 => FilterType::Triangle,
            _ => FilterType::CatmullRom,
        }
    }
}

/// Resizes and normalizes images into the `[1, 3, height, width]` tensor the GLM-Edge-V vision
/// tower expects.
#[derive(Clone, Debug, Default)]
pub struct GlmImageProcessor {
    config: PreprocessorConfig,
}

impl GlmImageProcessor {
    /// Create a processor from a config.
    pub fn new(config: PreprocessorConfig) -> Self {
        Self { config }
    }

    /// The config of the processor.
    pub fn config(&self) -> &PreprocessorConfig {
        &self.config
    }

    fn preprocess(&self, image: &DynamicImage) -> Result<PixelValues, GlmError> {
        let config = &self.config;
        let resized;
        let image = if config.do_resize {
            let ImageSize { height, width } = config.size;
            if height == 0 || width == 0 {
                return Err(GlmError::InvalidImageSize { height, width });
            }
            resized = image.resize_exact(width, height, config.filter());
            &resized
        } else {
            image
        };
        // the tensor always has three channels
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        let plane = width as usize * height as usize;

        let mut data = vec![0.0; 3 * plane];
        for (index, pixel) in rgb.pixels().enumerate() {
            for channel in 0..3 {
                let mut value = pixel.0[channel] as f32;
                if config.do_rescale {
                    value *= config.rescale_factor;
                }
                if config.do_normalize {
                    value = (value - config.image_mean[channel]) / config.image_std[channel];
                }
                data[channel * plane + index] = value;
            }
        }

        let shape = [1, 3, height as usize, width as usize];
        PixelValues::new(shape, data).ok_or(GlmError::InvalidImageSize { height, width })
    }
}

impl ImageProcessor for GlmImageProcessor {
    fn process(&self, image: &DynamicImage) -> Result<PixelValues, BoxedError> {
        Ok(self.preprocess(image)?)
    }
}
