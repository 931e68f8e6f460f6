//! Image ingress and egress: decoding uploads, cropping faces, and encoding
//! crops and review images for transport.

use crate::types::FaceRegion;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, GrayImage, RgbImage};
use thiserror::Error;

/// JPEG quality used for crops and annotated images.
pub const JPEG_QUALITY: u8 = 90;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("unable to decode image: {0}")]
    Malformed(#[from] image::ImageError),
    #[error("image has no pixels")]
    Empty,
}

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("jpeg encoding failed: {0}")]
    Jpeg(#[from] image::ImageError),
}

/// Decode raw JPEG/PNG bytes into an RGB pixel grid.
pub fn decode(bytes: &[u8]) -> Result<RgbImage, DecodeError> {
    let image = image::load_from_memory(bytes)?.to_rgb8();
    if image.width() == 0 || image.height() == 0 {
        return Err(DecodeError::Empty);
    }
    Ok(image)
}

/// Copy a face region out of `image`. The region must lie inside the image.
pub fn crop(image: &RgbImage, region: &FaceRegion) -> RgbImage {
    imageops::crop_imm(image, region.x, region.y, region.width, region.height).to_image()
}

pub fn to_grayscale(image: &RgbImage) -> GrayImage {
    imageops::grayscale(image)
}

pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>, EncodeError> {
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);
    encoder.encode_image(image)?;
    Ok(buf)
}

/// JPEG-encode and wrap in standard base64 for JSON payloads.
pub fn encode_base64_jpeg(image: &RgbImage) -> Result<String, EncodeError> {
    let jpeg = encode_jpeg(image)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(jpeg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::io::Cursor;

    fn png_bytes(image: &RgbImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_decode_png() {
        let src = RgbImage::from_pixel(8, 6, Rgb([10, 20, 30]));
        let decoded = decode(&png_bytes(&src)).unwrap();
        assert_eq!(decoded.dimensions(), (8, 6));
        assert_eq!(decoded.get_pixel(3, 3), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(matches!(decode(b"not an image"), Err(DecodeError::Malformed(_))));
        assert!(decode(&[]).is_err());
    }

    #[test]
    fn test_crop_region() {
        let mut src = RgbImage::new(10, 10);
        src.put_pixel(4, 5, Rgb([255, 0, 0]));
        let region = FaceRegion { x: 3, y: 4, width: 3, height: 2 };
        let face = crop(&src, &region);
        assert_eq!(face.dimensions(), (3, 2));
        assert_eq!(face.get_pixel(1, 1), &Rgb([255, 0, 0]));
    }

    #[test]
    fn test_base64_jpeg_roundtrips_through_decoder() {
        let src = RgbImage::from_pixel(16, 16, Rgb([200, 100, 50]));
        let encoded = encode_base64_jpeg(&src).unwrap();
        let bytes = base64::engine::general_purpose::STANDARD.decode(encoded).unwrap();
        let back = decode(&bytes).unwrap();
        assert_eq!(back.dimensions(), (16, 16));
    }
}
