use std::path::Path;

use image::{GrayImage, ImageBuffer, Luma};
use ndarray::Array2;

use crate::error::{ReduxError, Result};

/// Save raw ADU values as a 16-bit grayscale TIFF, clamping to `[0, 65535]`.
pub fn save_tiff(data: &Array2<f32>, path: &Path) -> Result<()> {
    let (h, w) = data.dim();
    let pixels: Vec<u16> = data
        .iter()
        .map(|&v| v.round().clamp(0.0, 65_535.0) as u16)
        .collect();

    let img = ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(w as u32, h as u32, pixels)
        .ok_or(ReduxError::ShapeMismatch {
            expected: (h, w),
            found: (0, 0),
        })?;
    img.save(path)?;
    Ok(())
}

/// Save a good-pixel mask as an 8-bit PNG: good pixels white, bad black.
pub fn save_mask_png(mask: &Array2<bool>, path: &Path) -> Result<()> {
    let (h, w) = mask.dim();
    let mut img = GrayImage::new(w as u32, h as u32);
    for ((row, col), &good) in mask.indexed_iter() {
        img.put_pixel(col as u32, row as u32, Luma([if good { 255 } else { 0 }]));
    }
    img.save_with_format(path, image::ImageFormat::Png)?;
    Ok(())
}

/// Load a grayscale image as raw 16-bit ADU values (0..65535).
///
/// 8-bit sources are widened by the `image` crate (v * 257).
pub fn load_adu(path: &Path) -> Result<Array2<f32>> {
    let gray = image::open(path)?.to_luma16();
    let (w, h) = gray.dimensions();
    Ok(Array2::from_shape_fn((h as usize, w as usize), |(row, col)| {
        gray.get_pixel(col as u32, row as u32).0[0] as f32
    }))
}

/// Whether `path` has an image extension the loader handles.
pub fn is_supported_image(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref(),
        Some("tif" | "tiff" | "png")
    )
}
