//! Pixel-space Porter-Duff operators on premultiplied RGBA8 buffers.

use crate::foundation::{
    error::{PanoError, PanoResult},
    math::mul_div255_u8,
};

pub type PremulRgba8 = [u8; 4];

pub fn over(dst: PremulRgba8, src: PremulRgba8, opacity: f32) -> PremulRgba8 {
    let opacity = opacity.clamp(0.0, 1.0);
    if opacity <= 0.0 || src[3] == 0 {
        return dst;
    }
    let op = ((opacity * 255.0).round() as i32).clamp(0, 255) as u16;
    let sa = mul_div255_u8(u16::from(src[3]), op);
    if sa == 0 {
        return dst;
    }
    let inv = 255u16 - u16::from(sa);

    let mut out = [0u8; 4];
    out[3] = sa.saturating_add(mul_div255_u8(u16::from(dst[3]), inv));
    for i in 0..3 {
        let sc = mul_div255_u8(u16::from(src[i]), op);
        let dc = mul_div255_u8(u16::from(dst[i]), inv);
        out[i] = sc.saturating_add(dc);
    }
    out
}

/// Scale every channel of `px` by `alpha / 255`.
pub fn scale(px: PremulRgba8, alpha: u8) -> PremulRgba8 {
    let a = u16::from(alpha);
    [
        mul_div255_u8(u16::from(px[0]), a),
        mul_div255_u8(u16::from(px[1]), a),
        mul_div255_u8(u16::from(px[2]), a),
        mul_div255_u8(u16::from(px[3]), a),
    ]
}

fn check_pair(dst: &[u8], src: &[u8], op: &str) -> PanoResult<()> {
    if dst.len() != src.len() || !dst.len().is_multiple_of(4) {
        return Err(PanoError::evaluation(format!(
            "{op} expects equal-length rgba8 buffers"
        )));
    }
    Ok(())
}

pub fn over_in_place(dst: &mut [u8], src: &[u8], opacity: f32) -> PanoResult<()> {
    check_pair(dst, src, "over_in_place")?;
    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        let out = over([d[0], d[1], d[2], d[3]], [s[0], s[1], s[2], s[3]], opacity);
        d.copy_from_slice(&out);
    }
    Ok(())
}

/// Keep `dst` where `mask` is opaque: `dst * mask.a`.
pub fn destination_in_in_place(dst: &mut [u8], mask: &[u8]) -> PanoResult<()> {
    check_pair(dst, mask, "destination_in_in_place")?;
    for (d, m) in dst.chunks_exact_mut(4).zip(mask.chunks_exact(4)) {
        let out = scale([d[0], d[1], d[2], d[3]], m[3]);
        d.copy_from_slice(&out);
    }
    Ok(())
}

/// Punch `dst` out where `mask` is opaque: `dst * (1 - mask.a)`.
pub fn destination_out_in_place(dst: &mut [u8], mask: &[u8]) -> PanoResult<()> {
    check_pair(dst, mask, "destination_out_in_place")?;
    for (d, m) in dst.chunks_exact_mut(4).zip(mask.chunks_exact(4)) {
        let out = scale([d[0], d[1], d[2], d[3]], 255 - m[3]);
        d.copy_from_slice(&out);
    }
    Ok(())
}

pub fn fill_in_place(dst: &mut [u8], px: PremulRgba8) {
    for d in dst.chunks_exact_mut(4) {
        d.copy_from_slice(&px);
    }
}

/// Alpha channel of a premultiplied buffer.
pub fn extract_alpha(src: &[u8]) -> Vec<u8> {
    src.chunks_exact(4).map(|px| px[3]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn over_opacity_0_is_noop() {
        let dst = [1, 2, 3, 4];
        assert_eq!(over(dst, [200, 200, 200, 200], 0.0), dst);
    }

    #[test]
    fn over_src_opaque_replaces_dst() {
        let src = [255, 0, 0, 255];
        assert_eq!(over([0, 0, 0, 255], src, 1.0), src);
    }

    #[test]
    fn over_half_opacity_on_black() {
        let out = over([0, 0, 0, 255], [255, 255, 255, 255], 0.5);
        assert_eq!(out, [128, 128, 128, 255]);
    }

    #[test]
    fn destination_in_multiplies_by_mask_alpha() {
        let mut dst = vec![200, 100, 50, 200, 200, 100, 50, 200];
        let mask = vec![0, 0, 0, 255, 9, 9, 9, 0];
        destination_in_in_place(&mut dst, &mask).unwrap();
        assert_eq!(dst, vec![200, 100, 50, 200, 0, 0, 0, 0]);
    }

    #[test]
    fn destination_out_is_the_complement() {
        let mut dst = vec![255, 0, 0, 255, 255, 0, 0, 255];
        let mask = vec![0, 0, 0, 255, 0, 0, 0, 0];
        destination_out_in_place(&mut dst, &mask).unwrap();
        assert_eq!(dst, vec![0, 0, 0, 0, 255, 0, 0, 255]);
    }

    #[test]
    fn length_mismatch_is_an_error() {
        let mut dst = vec![0u8; 8];
        let err = over_in_place(&mut dst, &[0u8; 4], 1.0).unwrap_err();
        assert!(err.to_string().contains("over_in_place"));
    }

    #[test]
    fn alpha_is_extracted_per_pixel() {
        assert_eq!(extract_alpha(&[1, 2, 3, 4, 5, 6, 7, 8]), vec![4, 8]);
    }
}
