//! Image to tensor conversion for model inference

use crate::{
    error::{BgRemovalError, Result},
    models::PreprocessingConfig,
};
use image::{imageops::FilterType, DynamicImage, ImageBuffer, Rgb, RgbImage};
use ndarray::Array4;

/// Fill color of letterbox padding
pub const PADDING_COLOR: [u8; 3] = [0, 0, 0];

/// Part of the model canvas covered by the source image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl ContentRegion {
    /// Whether the region spans the whole `width` x `height` canvas
    #[must_use]
    pub fn covers(&self, width: u32, height: u32) -> bool {
        self.x == 0 && self.y == 0 && self.width == width && self.height == height
    }
}

/// Model input plus the geometry needed to map the mask back
#[derive(Debug, Clone)]
pub struct PreprocessedInput {
    /// NCHW tensor of shape `(1, 3, target_height, target_width)`
    pub tensor: Array4<f32>,
    /// Where the image sits inside the canvas
    pub content: ContentRegion,
    /// Source image dimensions
    pub original_size: (u32, u32),
}

/// Resizes and normalizes images into model input tensors
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Build the model input tensor
    ///
    /// With `config.pad` the image is scaled to fit and centered on a padded
    /// canvas (letterbox); otherwise it is stretched to the target size.
    ///
    /// # Errors
    /// - Zero-sized input image
    pub fn preprocess(image: &DynamicImage, config: &PreprocessingConfig) -> Result<PreprocessedInput> {
        let rgb_image = image.to_rgb8();
        let (orig_width, orig_height) = rgb_image.dimensions();
        if orig_width == 0 || orig_height == 0 {
            return Err(BgRemovalError::compositing("Cannot preprocess an empty image"));
        }

        let [target_width, target_height] = config.target_size;

        let (canvas, content) = if config.pad {
            Self::letterbox(&rgb_image, target_width, target_height)
        } else {
            let stretched =
                image::imageops::resize(&rgb_image, target_width, target_height, FilterType::Triangle);
            let content = ContentRegion {
                x: 0,
                y: 0,
                width: target_width,
                height: target_height,
            };
            (stretched, content)
        };

        Ok(PreprocessedInput {
            tensor: Self::canvas_to_tensor(&canvas, config),
            content,
            original_size: (orig_width, orig_height),
        })
    }

    fn letterbox(image: &RgbImage, target_width: u32, target_height: u32) -> (RgbImage, ContentRegion) {
        let (orig_width, orig_height) = image.dimensions();
        let scale = (target_width as f32 / orig_width as f32)
            .min(target_height as f32 / orig_height as f32);

        let new_width = ((orig_width as f32 * scale).round() as u32).clamp(1, target_width);
        let new_height = ((orig_height as f32 * scale).round() as u32).clamp(1, target_height);

        let resized = image::imageops::resize(image, new_width, new_height, FilterType::Triangle);

        let mut canvas = ImageBuffer::from_pixel(target_width, target_height, Rgb(PADDING_COLOR));
        let offset_x = (target_width - new_width) / 2;
        let offset_y = (target_height - new_height) / 2;
        image::imageops::replace(&mut canvas, &resized, i64::from(offset_x), i64::from(offset_y));

        let content = ContentRegion {
            x: offset_x,
            y: offset_y,
            width: new_width,
            height: new_height,
        };
        (canvas, content)
    }

    fn canvas_to_tensor(canvas: &RgbImage, config: &PreprocessingConfig) -> Array4<f32> {
        let (width, height) = canvas.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        for (x, y, pixel) in canvas.enumerate_pixels() {
            for channel in 0..3 {
                let mut value = f32::from(pixel[channel]) * config.rescale_factor;
                if config.normalize {
                    value = (value - config.mean[channel]) / config.std[channel];
                }
                if let Some(slot) = tensor.get_mut([0, channel, y as usize, x as usize]) {
                    *slot = value;
                }
            }
        }

        tensor
    }
}
