//! Tensor <-> PNG conversion.

use std::path::Path;

use candle_core::{DType, Tensor};
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder, RgbImage};

use crate::error::{Error, Result};

/// Converts a `B×3×H×W` batch with values in `[0, 1]` to RGB images.
pub fn to_rgb_images(images: &Tensor) -> Result<Vec<RgbImage>> {
    let (batch, channels, height, width) = images.dims4()?;
    if channels != 3 {
        return Err(Error::InvalidInput(format!(
            "expected 3 image channels, got {channels}"
        )));
    }

    let pixels = images
        .to_dtype(DType::F32)?
        .clamp(0f32, 1f32)?
        .affine(255.0, 0.0)?
        .round()?
        .to_dtype(DType::U8)?
        .permute((0, 2, 3, 1))?
        .contiguous()?;

    let mut out = Vec::with_capacity(batch);
    for i in 0..batch {
        let data: Vec<u8> = pixels.get(i)?.flatten_all()?.to_vec1()?;
        let image = RgbImage::from_raw(width as u32, height as u32, data).ok_or_else(|| {
            Error::InvalidInput(format!("pixel buffer does not match {width}x{height}"))
        })?;
        out.push(image);
    }
    Ok(out)
}

/// Encodes an RGB image as PNG.
pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(image.as_raw().len() / 2);
    let encoder =
        PngEncoder::new_with_quality(&mut buf, CompressionType::Fast, FilterType::Adaptive);
    encoder.write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(buf)
}

/// Writes `image` to `path` as PNG.
pub fn save_png(image: &RgbImage, path: &Path) -> Result<()> {
    std::fs::write(path, encode_png(image)?)?;
    Ok(())
}

/// Loads an image file as a `3×H×W` tensor with values in `[0, 1]`.
pub fn load_image(path: &Path, device: &candle_core::Device) -> Result<Tensor> {
    let image = image::open(path)?.to_rgb8();
    let (width, height) = image.dimensions();
    let tensor = Tensor::from_vec(
        image.into_raw(),
        (height as usize, width as usize, 3),
        device,
    )?;
    Ok(tensor
        .permute((2, 0, 1))?
        .to_dtype(DType::F32)?
        .affine(1.0 / 255.0, 0.0)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_to_rgb_images_maps_range() {
        let device = Device::Cpu;
        // One 1x2 image: left pixel black, right pixel white.
        let t = Tensor::new(&[[[[0f32, 1.0]], [[0.0, 1.0]], [[0.0, 1.0]]]], &device).unwrap();
        let images = to_rgb_images(&t).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(images[0].get_pixel(1, 0).0, [255, 255, 255]);
    }

    #[test]
    fn test_rejects_wrong_channel_count() {
        let t = Tensor::zeros((1, 4, 2, 2), DType::F32, &Device::Cpu).unwrap();
        assert!(to_rgb_images(&t).is_err());
    }

    #[test]
    fn test_encode_png_magic() {
        let image = RgbImage::from_pixel(4, 4, image::Rgb([10, 20, 30]));
        let bytes = encode_png(&image).unwrap();
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
    }
}
