//! Deterministic evaluation-time image transform.

use crate::types::Sample;
use image::imageops::FilterType;

/// Per-channel statistics of the ISIC2016 training set.
pub const ISIC2016_MEAN: [f32; 3] = [0.7105, 0.5646, 0.4978];
pub const ISIC2016_STD: [f32; 3] = [0.0911, 0.1309, 0.1513];

/// Resize, center-crop, and mean/std normalize. No RNG anywhere: applying
/// the same transform to the same image always yields the same sample.
#[derive(Debug, Clone)]
pub struct EvalTransform {
    /// Resize every image to this (width, height) before cropping.
    pub resize: (u32, u32),
    /// Side length of the square center crop.
    pub crop: u32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for EvalTransform {
    fn default() -> Self {
        Self {
            resize: (256, 256),
            crop: 224,
            mean: ISIC2016_MEAN,
            std: ISIC2016_STD,
        }
    }
}

impl EvalTransform {
    pub fn describe(&self) -> String {
        format!(
            "resize={}x{} center_crop={} mean={:?} std={:?}",
            self.resize.0, self.resize.1, self.crop, self.mean, self.std
        )
    }

    pub fn apply(&self, img: image::RgbImage, label: u8) -> Sample {
        let (rw, rh) = self.resize;
        let resized = image::imageops::resize(&img, rw, rh, FilterType::Triangle);
        let crop = self.crop.min(rw).min(rh);
        let x0 = (rw - crop) / 2;
        let y0 = (rh - crop) / 2;
        let cropped = image::imageops::crop_imm(&resized, x0, y0, crop, crop).to_image();

        let plane = (crop * crop) as usize;
        let mut image_chw = vec![0.0f32; 3 * plane];
        for (y, x, pixel) in cropped.enumerate_pixels() {
            let base = (y * crop + x) as usize;
            for c in 0..3 {
                let v = pixel[c] as f32 / 255.0;
                image_chw[c * plane + base] = (v - self.mean[c]) / self.std[c];
            }
        }

        Sample {
            image_chw,
            width: crop,
            height: crop,
            label,
        }
    }
}
