use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array3;

use crate::error::{DqnError, Result};

// Playfield window: drops the score bar on top and the area under the paddle.
pub const CROP_TOP: u32 = 52;
pub const CROP_BOTTOM: u32 = 200;
pub const CROP_LEFT: u32 = 6;
pub const CROP_RIGHT: u32 = 154;
pub const SCREEN_SIZE: usize = 74;

pub const CURRENT_WEIGHT: f32 = 0.4;
pub const LAST_WEIGHT: f32 = 0.6;

/// Turns an RGB frame (height, width, channel) into the network input:
/// a cropped grayscale image resized to `SCREEN_SIZE` and scaled to [0, 1],
/// laid out as (channel, height, width).
pub fn get_screen(frame: &Array3<u8>) -> Result<Array3<f32>> {
    let (height, width, channels) = frame.dim();
    if channels != 3 || height < CROP_BOTTOM as usize || width < CROP_RIGHT as usize {
        return Err(DqnError::Image(format!(
            "expected an RGB frame of at least {}x{}, got {:?}",
            CROP_BOTTOM,
            CROP_RIGHT,
            frame.dim()
        )));
    }
    let raw: Vec<u8> = frame.iter().copied().collect();
    let rgb = RgbImage::from_raw(width as u32, height as u32, raw)
        .ok_or_else(|| DqnError::Image("frame buffer does not match its dimensions".to_string()))?;
    let cropped = imageops::crop_imm(
        &rgb,
        CROP_LEFT,
        CROP_TOP,
        CROP_RIGHT - CROP_LEFT,
        CROP_BOTTOM - CROP_TOP,
    )
    .to_image();
    let gray = imageops::grayscale(&cropped);
    let resized = imageops::resize(
        &gray,
        SCREEN_SIZE as u32,
        SCREEN_SIZE as u32,
        FilterType::Triangle,
    );
    let data: Vec<f32> = resized
        .into_raw()
        .into_iter()
        .map(|v| v as f32 / 255.0)
        .collect();
    Ok(Array3::from_shape_vec((1, SCREEN_SIZE, SCREEN_SIZE), data)?)
}

/// Mixes the two latest screens so a single state carries the ball motion.
pub fn blend(current: &Array3<f32>, last: &Array3<f32>) -> Array3<f32> {
    current * CURRENT_WEIGHT + last * LAST_WEIGHT
}
