use crate::foundation::error::{PanoError, PanoResult};

/// Gaussian sigma for a kernel of `2 * radius + 1` taps when none is given explicitly.
pub fn default_sigma(radius: u32) -> f32 {
    0.3 * ((radius as f32) - 1.0) + 0.8
}

/// Separable Gaussian blur of a single-channel 8-bit image. Edges clamp.
pub fn blur_alpha8(
    src: &[u8],
    width: u32,
    height: u32,
    radius: u32,
    sigma: f32,
) -> PanoResult<Vec<u8>> {
    let expected_len = (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(|| PanoError::evaluation("blur buffer size overflow"))?;
    if src.len() != expected_len {
        return Err(PanoError::evaluation(
            "blur_alpha8 expects src matching width*height",
        ));
    }
    if radius == 0 || expected_len == 0 {
        return Ok(src.to_vec());
    }

    let kernel = gaussian_kernel_q16(radius, sigma)?;
    let mut tmp = vec![0u8; expected_len];
    let mut out = vec![0u8; expected_len];
    horizontal_pass(src, &mut tmp, width, height, &kernel);
    vertical_pass(&tmp, &mut out, width, height, &kernel);
    Ok(out)
}

fn gaussian_kernel_q16(radius: u32, sigma: f32) -> PanoResult<Vec<u32>> {
    if !sigma.is_finite() || sigma <= 0.0 {
        return Err(PanoError::validation("blur sigma must be > 0"));
    }
    let r = radius as i32;
    let denom = 2.0 * f64::from(sigma) * f64::from(sigma);
    let weights_f: Vec<f64> = (-r..=r)
        .map(|i| {
            let x = f64::from(i);
            (-x * x / denom).exp()
        })
        .collect();
    let sum: f64 = weights_f.iter().sum();
    if sum <= 0.0 {
        return Err(PanoError::evaluation("gaussian kernel sum is zero"));
    }

    let mut weights: Vec<u32> = weights_f
        .iter()
        .map(|wf| ((wf / sum) * 65536.0).round().clamp(0.0, 65536.0) as u32)
        .collect();
    // Center tap absorbs rounding drift; the kernel sums to exactly 1.0 in q16.
    let acc: i64 = weights.iter().map(|&w| i64::from(w)).sum();
    let mid = weights.len() / 2;
    weights[mid] = (i64::from(weights[mid]) + 65536 - acc).clamp(0, 65536) as u32;
    Ok(weights)
}

fn horizontal_pass(src: &[u8], dst: &mut [u8], width: u32, height: u32, k: &[u32]) {
    let radius = (k.len() / 2) as i32;
    let w = width as i32;
    for y in 0..height as i32 {
        let row = (y * w) as usize;
        for x in 0..w {
            let mut acc = 0u64;
            for (ki, &kw) in k.iter().enumerate() {
                let sx = (x + ki as i32 - radius).clamp(0, w - 1);
                acc += u64::from(kw) * u64::from(src[row + sx as usize]);
            }
            dst[row + x as usize] = q16_to_u8(acc);
        }
    }
}

fn vertical_pass(src: &[u8], dst: &mut [u8], width: u32, height: u32, k: &[u32]) {
    let radius = (k.len() / 2) as i32;
    let (w, h) = (width as i32, height as i32);
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0u64;
            for (ki, &kw) in k.iter().enumerate() {
                let sy = (y + ki as i32 - radius).clamp(0, h - 1);
                acc += u64::from(kw) * u64::from(src[(sy * w + x) as usize]);
            }
            dst[(y * w + x) as usize] = q16_to_u8(acc);
        }
    }
}

fn q16_to_u8(acc: u64) -> u8 {
    ((acc + 32768) >> 16).min(255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn radius_0_is_identity() {
        let src = vec![1u8, 2, 3, 4];
        assert_eq!(blur_alpha8(&src, 2, 2, 0, 1.0).unwrap(), src);
    }

    #[test]
    fn constant_image_is_unchanged() {
        let src = vec![77u8; 12];
        assert_eq!(blur_alpha8(&src, 4, 3, 3, 2.0).unwrap(), src);
    }

    #[test]
    fn single_pixel_spreads_and_conserves_energy() {
        let mut src = vec![0u8; 25];
        src[12] = 255;
        let out = blur_alpha8(&src, 5, 5, 2, default_sigma(2)).unwrap();
        assert!(out.iter().filter(|&&v| v != 0).count() > 1);
        let sum: i32 = out.iter().map(|&v| i32::from(v)).sum();
        assert!((sum - 255).abs() <= 12);
    }

    #[test]
    fn bad_sigma_is_rejected() {
        let err = blur_alpha8(&[0u8; 4], 2, 2, 1, 0.0).unwrap_err();
        assert!(err.to_string().contains("sigma"));
    }

    #[test]
    fn default_sigma_matches_kernel_size_rule() {
        assert!((default_sigma(1) - 0.8).abs() < 1e-6);
        assert!((default_sigma(5) - 2.0).abs() < 1e-6);
    }
}
