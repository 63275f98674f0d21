use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use anyhow::Context;

use crate::foundation::error::{PanoError, PanoResult};

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Decoded image in premultiplied RGBA8.
///
/// Every constructed image gets a process-unique generation so caches can key on identity
/// without hashing pixels.
#[derive(Clone, Debug)]
pub struct ImageRgba {
    width: u32,
    height: u32,
    rgba8_premul: Arc<Vec<u8>>,
    generation: u64,
}

impl PartialEq for ImageRgba {
    fn eq(&self, other: &Self) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.rgba8_premul == other.rgba8_premul
    }
}

impl ImageRgba {
    pub fn from_premul(width: u32, height: u32, rgba8_premul: Vec<u8>) -> PanoResult<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| PanoError::validation("image size overflow"))?;
        if rgba8_premul.len() != expected {
            return Err(PanoError::validation(format!(
                "image byte length {} does not match {width}x{height}",
                rgba8_premul.len()
            )));
        }
        Ok(Self {
            width,
            height,
            rgba8_premul: Arc::new(rgba8_premul),
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
        })
    }

    pub fn from_straight(width: u32, height: u32, mut rgba8: Vec<u8>) -> PanoResult<Self> {
        premultiply_rgba8_in_place(&mut rgba8);
        Self::from_premul(width, height, rgba8)
    }

    /// Uniform image of one straight-alpha color.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> PanoResult<Self> {
        let px = rgba.repeat((width as usize) * (height as usize));
        Self::from_straight(width, height, px)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.rgba8_premul
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

pub fn decode_image(bytes: &[u8]) -> PanoResult<ImageRgba> {
    let dyn_img = image::load_from_memory(bytes).context("decode image from memory")?;
    let rgba = dyn_img.to_rgba8();
    let (width, height) = rgba.dimensions();
    ImageRgba::from_straight(width, height, rgba.into_raw())
}

pub(crate) fn premultiply_rgba8_in_place(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let a = px[3] as u16;
        if a == 0 {
            px[0] = 0;
            px[1] = 0;
            px[2] = 0;
            continue;
        }
        px[0] = ((px[0] as u16 * a + 127) / 255) as u8;
        px[1] = ((px[1] as u16 * a + 127) / 255) as u8;
        px[2] = ((px[2] as u16 * a + 127) / 255) as u8;
    }
}

pub(crate) fn unpremultiply_rgba8_in_place(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let a = px[3] as u16;
        if a == 0 || a == 255 {
            continue;
        }
        for c in &mut px[..3] {
            *c = ((*c as u16 * 255 + a / 2) / a).min(255) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn decode_image_png_dimensions_and_premul() {
        let src_rgba = vec![100u8, 50u8, 200u8, 128u8];
        let img = image::RgbaImage::from_raw(1, 1, src_rgba).unwrap();

        let mut buf = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();

        let decoded = decode_image(&buf).unwrap();
        assert_eq!(decoded.width(), 1);
        assert_eq!(decoded.height(), 1);
        assert_eq!(
            decoded.data(),
            &[
                ((100u16 * 128 + 127) / 255) as u8,
                ((50u16 * 128 + 127) / 255) as u8,
                ((200u16 * 128 + 127) / 255) as u8,
                128u8
            ]
        );
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = decode_image(b"not an image").unwrap_err();
        assert!(err.to_string().contains("decode image"));
    }

    #[test]
    fn length_mismatch_is_rejected() {
        assert!(ImageRgba::from_premul(2, 2, vec![0; 15]).is_err());
    }

    #[test]
    fn generations_are_unique() {
        let a = ImageRgba::solid(1, 1, [1, 2, 3, 255]).unwrap();
        let b = ImageRgba::solid(1, 1, [1, 2, 3, 255]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a.generation(), b.generation());
    }

    #[test]
    fn unpremultiply_restores_opaque_and_half_alpha() {
        let mut px = vec![200, 100, 50, 255, 64, 32, 0, 128];
        unpremultiply_rgba8_in_place(&mut px);
        assert_eq!(&px[..4], &[200, 100, 50, 255]);
        assert_eq!(&px[4..], &[128, 64, 0, 128]);
    }
}
