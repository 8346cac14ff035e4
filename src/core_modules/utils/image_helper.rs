use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageError};

use crate::core_modules::frame::Frame;
use crate::core_modules::image::Image;
use crate::core_modules::pixel::Pixel;

fn save(
    path: &Path,
    width: usize,
    height: usize,
    buffer: &[u8],
    color: ExtendedColorType,
) -> Result<(), ImageError> {
    let output = BufWriter::new(File::create(path)?);
    let encoder = PngEncoder::new(output);

    encoder.write_image(buffer, width as u32, height as u32, color)?;

    Ok(())
}

/// Writes a foreground mask as a grayscale PNG: white for foreground, black
/// for background.
pub fn save_mask(path: impl AsRef<Path>, mask: &Image<bool>) -> Result<(), ImageError> {
    let buffer: Vec<u8> = mask.iter().map(|&fg| if fg { 255 } else { 0 }).collect();
    save(path.as_ref(), mask.width(), mask.height(), &buffer, ExtendedColorType::L8)
}

/// Writes a frame as an RGB PNG.
pub fn save_frame(path: impl AsRef<Path>, frame: &Frame) -> Result<(), ImageError> {
    let buffer: Vec<u8> = frame
        .samples
        .iter()
        .flat_map(|&sample| {
            let pixel = Pixel::from_packed(sample);
            [pixel.red, pixel.green, pixel.blue]
        })
        .collect();
    save(path.as_ref(), frame.width(), frame.height(), &buffer, ExtendedColorType::Rgb8)
}
