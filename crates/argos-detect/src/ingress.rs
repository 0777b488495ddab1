//! Image ingress.
//!
//! Every input shape (on-disk file, packed BGRA buffer, tri-planar YUV
//! camera frame) funnels into one owned, tightly-packed 3-channel BGR
//! buffer in original orientation. Conversions are plain index remaps on
//! byte buffers; the `image` crate is used for on-disk decode only.

use std::path::Path;

use crate::error::{DetectError, Result};

/// Owned, tightly-packed BGR8 frame.
#[derive(Debug, Clone)]
pub struct BgrFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Tri-planar 4:2:0 YUV frame as handed over by camera stacks.
///
/// `uv_pixel_stride` is 1 for planar chroma (separate U and V planes)
/// and 2 for semi-planar chroma (one interleaved buffer viewed through
/// two overlapping planes). For the semi-planar case `v_before_u`
/// records the in-memory order of the two planes, observed by the
/// caller from the plane base pointers.
#[derive(Debug, Clone, Copy)]
pub struct YuvPlanes<'a> {
    pub y: &'a [u8],
    pub u: &'a [u8],
    pub v: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub y_row_stride: usize,
    pub uv_row_stride: usize,
    pub uv_pixel_stride: usize,
    pub v_before_u: bool,
}

impl BgrFrame {
    /// Wrap an already-packed BGR buffer.
    pub fn from_bgr(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(DetectError::InvalidInput("zero frame dimension".into()));
        }
        let expected = width as usize * height as usize * 3;
        if data.len() < expected {
            return Err(DetectError::InvalidInput(format!(
                "BGR buffer too small: expected {expected}, got {}",
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Decode an image file into BGR.
    pub fn from_path(path: &str) -> Result<Self> {
        let img = image::open(Path::new(path))
            .map_err(|e| DetectError::ImageLoad(format!("{path}: {e}")))?;
        let rgb = img.to_rgb8();
        let (width, height) = (rgb.width(), rgb.height());
        let mut data = vec![0u8; width as usize * height as usize * 3];
        for (dst, px) in data.chunks_exact_mut(3).zip(rgb.pixels()) {
            dst[0] = px[2];
            dst[1] = px[1];
            dst[2] = px[0];
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Convert a packed BGRA buffer with row stride into BGR. The alpha
    /// channel is dropped; the source is borrowed, never mutated.
    pub fn from_bgra(src: &[u8], width: u32, height: u32, stride: usize) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(DetectError::InvalidInput("zero frame dimension".into()));
        }
        if stride < width as usize * 4 {
            return Err(DetectError::InvalidInput(format!(
                "BGRA stride {stride} shorter than row of {} pixels",
                width
            )));
        }
        let needed = stride * (height as usize - 1) + width as usize * 4;
        if src.len() < needed {
            return Err(DetectError::InvalidInput(format!(
                "BGRA buffer too small: expected {needed}, got {}",
                src.len()
            )));
        }

        let (w, h) = (width as usize, height as usize);
        let mut data = vec![0u8; w * h * 3];
        for row in 0..h {
            let src_row = &src[row * stride..row * stride + w * 4];
            let dst_row = &mut data[row * w * 3..(row + 1) * w * 3];
            for (dst, px) in dst_row.chunks_exact_mut(3).zip(src_row.chunks_exact(4)) {
                dst[0] = px[0];
                dst[1] = px[1];
                dst[2] = px[2];
            }
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Assemble a tri-planar YUV frame into NV21, convert to BGR, then
    /// rotate clockwise. Rotation values outside {0, 90, 180, 270} are
    /// treated as 0. Reported dimensions are post-rotation.
    pub fn from_yuv(planes: &YuvPlanes<'_>, rotation: u32) -> Result<Self> {
        let nv21 = assemble_nv21(planes)?;
        let frame = nv21_to_bgr(&nv21, planes.width, planes.height)?;
        Ok(frame.rotated(rotation))
    }

    /// BGR triple at (x, y). Test and debug helper.
    pub fn pixel(&self, x: u32, y: u32) -> (u8, u8, u8) {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        (self.data[i], self.data[i + 1], self.data[i + 2])
    }

    /// Rotate clockwise by 0/90/180/270 degrees. Anything else is a
    /// no-op.
    pub fn rotated(self, rotation: u32) -> Self {
        let (w, h) = (self.width as usize, self.height as usize);
        match rotation {
            90 => {
                let mut out = vec![0u8; self.data.len()];
                for dy in 0..w {
                    for dx in 0..h {
                        let (sx, sy) = (dy, h - 1 - dx);
                        let src = (sy * w + sx) * 3;
                        let dst = (dy * h + dx) * 3;
                        out[dst..dst + 3].copy_from_slice(&self.data[src..src + 3]);
                    }
                }
                Self {
                    data: out,
                    width: self.height,
                    height: self.width,
                }
            }
            180 => {
                let mut out = vec![0u8; self.data.len()];
                for dy in 0..h {
                    for dx in 0..w {
                        let src = ((h - 1 - dy) * w + (w - 1 - dx)) * 3;
                        let dst = (dy * w + dx) * 3;
                        out[dst..dst + 3].copy_from_slice(&self.data[src..src + 3]);
                    }
                }
                Self {
                    data: out,
                    ..self
                }
            }
            270 => {
                let mut out = vec![0u8; self.data.len()];
                for dy in 0..w {
                    for dx in 0..h {
                        let (sx, sy) = (w - 1 - dy, dx);
                        let src = (sy * w + sx) * 3;
                        let dst = (dy * h + dx) * 3;
                        out[dst..dst + 3].copy_from_slice(&self.data[src..src + 3]);
                    }
                }
                Self {
                    data: out,
                    width: self.height,
                    height: self.width,
                }
            }
            _ => self,
        }
    }
}

/// Rebuild an NV21 buffer (full-res luma plane followed by interleaved
/// VU chroma at half resolution, V first) from three camera planes.
fn assemble_nv21(planes: &YuvPlanes<'_>) -> Result<Vec<u8>> {
    let (w, h) = (planes.width as usize, planes.height as usize);
    if w == 0 || h == 0 {
        return Err(DetectError::InvalidInput("zero frame dimension".into()));
    }
    if planes.uv_pixel_stride != 1 && planes.uv_pixel_stride != 2 {
        return Err(DetectError::InvalidInput(format!(
            "uv_pixel_stride must be 1 or 2, got {}",
            planes.uv_pixel_stride
        )));
    }
    if planes.y_row_stride < w {
        return Err(DetectError::InvalidInput(
            "luma row stride shorter than width".into(),
        ));
    }

    let chroma_rows = h.div_ceil(2);
    let chroma_cols = w.div_ceil(2);
    let vu_row = chroma_cols * 2;
    let mut nv21 = vec![0u8; w * h + chroma_rows * vu_row];

    // Luma, row by row (stride may exceed width)
    for row in 0..h {
        let src = row * planes.y_row_stride;
        if src + w > planes.y.len() {
            return Err(DetectError::InvalidInput("luma plane too small".into()));
        }
        nv21[row * w..(row + 1) * w].copy_from_slice(&planes.y[src..src + w]);
    }

    let chroma_base = w * h;
    if planes.uv_pixel_stride == 2 && planes.v_before_u {
        // The camera buffer is already VU-interleaved; the V plane is its
        // base. Row copies, except the final U byte of the last row which
        // the V view may not cover.
        for row in 0..chroma_rows {
            let src = row * planes.uv_row_stride;
            let dst = chroma_base + row * vu_row;
            let n = vu_row.min(planes.v.len().saturating_sub(src));
            if n == 0 {
                return Err(DetectError::InvalidInput("chroma plane too small".into()));
            }
            nv21[dst..dst + n].copy_from_slice(&planes.v[src..src + n]);
            if n < vu_row {
                let tail = src + (chroma_cols - 1) * 2;
                let u_byte = planes
                    .u
                    .get(tail)
                    .ok_or_else(|| DetectError::InvalidInput("chroma plane too small".into()))?;
                nv21[dst + vu_row - 1] = *u_byte;
            }
        }
    } else {
        // Planar chroma, or UV-interleaved that must be swapped into VU
        // order. Each plane indexes its own samples via uv_pixel_stride.
        for row in 0..chroma_rows {
            let src = row * planes.uv_row_stride;
            let dst = chroma_base + row * vu_row;
            for col in 0..chroma_cols {
                let at = src + col * planes.uv_pixel_stride;
                let v = planes
                    .v
                    .get(at)
                    .ok_or_else(|| DetectError::InvalidInput("chroma plane too small".into()))?;
                let u = planes
                    .u
                    .get(at)
                    .ok_or_else(|| DetectError::InvalidInput("chroma plane too small".into()))?;
                nv21[dst + col * 2] = *v;
                nv21[dst + col * 2 + 1] = *u;
            }
        }
    }

    Ok(nv21)
}

/// NV21 to packed BGR, full-range BT.601.
fn nv21_to_bgr(nv21: &[u8], width: u32, height: u32) -> Result<BgrFrame> {
    let (w, h) = (width as usize, height as usize);
    let chroma_base = w * h;
    let vu_row = w.div_ceil(2) * 2;
    let expected = chroma_base + h.div_ceil(2) * vu_row;
    if nv21.len() < expected {
        return Err(DetectError::Preprocess(format!(
            "NV21 buffer too small: expected {expected}, got {}",
            nv21.len()
        )));
    }

    let mut data = vec![0u8; w * h * 3];
    for row in 0..h {
        for col in 0..w {
            let y = nv21[row * w + col] as f32;
            let vu = chroma_base + (row / 2) * vu_row + (col / 2) * 2;
            let v = nv21[vu] as f32 - 128.0;
            let u = nv21[vu + 1] as f32 - 128.0;

            let r = y + 1.402 * v;
            let g = y - 0.344_136 * u - 0.714_136 * v;
            let b = y + 1.772 * u;

            let dst = (row * w + col) * 3;
            data[dst] = b.clamp(0.0, 255.0) as u8;
            data[dst + 1] = g.clamp(0.0, 255.0) as u8;
            data[dst + 2] = r.clamp(0.0, 255.0) as u8;
        }
    }
    Ok(BgrFrame {
        data,
        width,
        height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn gradient_bgra(width: u32, height: u32, stride: usize) -> Vec<u8> {
        let mut buf = vec![0xAAu8; stride * height as usize];
        for y in 0..height as usize {
            for x in 0..width as usize {
                let i = y * stride + x * 4;
                buf[i] = x as u8; // B
                buf[i + 1] = y as u8; // G
                buf[i + 2] = (x + y) as u8; // R
                buf[i + 3] = 0xFF; // A, ignored
            }
        }
        buf
    }

    #[test]
    fn test_bgra_tight_stride() {
        let src = gradient_bgra(4, 2, 16);
        let frame = BgrFrame::from_bgra(&src, 4, 2, 16).unwrap();
        assert_eq!((frame.width, frame.height), (4, 2));
        assert_eq!(frame.pixel(3, 1), (3, 1, 4));
    }

    #[test]
    fn test_bgra_padded_stride() {
        let src = gradient_bgra(4, 2, 24);
        let frame = BgrFrame::from_bgra(&src, 4, 2, 24).unwrap();
        // Padding bytes must not leak into pixels
        assert_eq!(frame.pixel(0, 1), (0, 1, 1));
        assert_eq!(frame.pixel(3, 0), (3, 0, 3));
    }

    #[test]
    fn test_bgra_rejects_short_stride() {
        let src = vec![0u8; 64];
        assert!(BgrFrame::from_bgra(&src, 4, 2, 12).is_err());
    }

    #[test]
    fn test_bgra_rejects_short_buffer() {
        let src = vec![0u8; 16];
        assert!(BgrFrame::from_bgra(&src, 4, 2, 16).is_err());
    }

    #[test]
    fn test_from_path_missing_file() {
        let err = BgrFrame::from_path("/nonexistent/image.jpg").unwrap_err();
        assert_eq!(err.code(), "IMAGE_LOAD_FAILED");
    }

    #[test]
    fn test_from_path_garbage_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.png");
        std::fs::write(&path, b"definitely not a png").unwrap();
        let err = BgrFrame::from_path(path.to_str().unwrap()).unwrap_err();
        assert_eq!(err.code(), "IMAGE_LOAD_FAILED");
    }

    fn numbered_frame(width: u32, height: u32) -> BgrFrame {
        let mut data = Vec::new();
        for i in 0..(width * height) as u8 {
            data.extend_from_slice(&[i, i, i]);
        }
        BgrFrame::from_bgr(data, width, height).unwrap()
    }

    #[test]
    fn test_rotate_90() {
        // 3x2 frame:        rotated CW to 2x3:
        //  0 1 2               3 0
        //  3 4 5               4 1
        //                      5 2
        let frame = numbered_frame(3, 2).rotated(90);
        assert_eq!((frame.width, frame.height), (2, 3));
        assert_eq!(frame.pixel(0, 0).0, 3);
        assert_eq!(frame.pixel(1, 0).0, 0);
        assert_eq!(frame.pixel(0, 2).0, 5);
        assert_eq!(frame.pixel(1, 2).0, 2);
    }

    #[test]
    fn test_rotate_180() {
        let frame = numbered_frame(3, 2).rotated(180);
        assert_eq!((frame.width, frame.height), (3, 2));
        assert_eq!(frame.pixel(0, 0).0, 5);
        assert_eq!(frame.pixel(2, 1).0, 0);
    }

    #[test]
    fn test_rotate_270() {
        //  0 1 2    rotated CCW (= 270 CW) to 2x3:
        //  3 4 5        2 5
        //               1 4
        //               0 3
        let frame = numbered_frame(3, 2).rotated(270);
        assert_eq!((frame.width, frame.height), (2, 3));
        assert_eq!(frame.pixel(0, 0).0, 2);
        assert_eq!(frame.pixel(1, 0).0, 5);
        assert_eq!(frame.pixel(0, 2).0, 0);
    }

    #[test]
    fn test_rotate_90_then_270_round_trips() {
        let frame = numbered_frame(4, 3);
        let back = frame.clone().rotated(90).rotated(270);
        assert_eq!(back.data, frame.data);
    }

    #[test]
    fn test_unknown_rotation_is_identity() {
        let frame = numbered_frame(3, 2);
        let same = frame.clone().rotated(45);
        assert_eq!(same.data, frame.data);
        assert_eq!((same.width, same.height), (3, 2));
    }

    fn mid_gray_planes<'a>(
        y: &'a [u8],
        u: &'a [u8],
        v: &'a [u8],
        width: u32,
        height: u32,
        uv_pixel_stride: usize,
        v_before_u: bool,
    ) -> YuvPlanes<'a> {
        YuvPlanes {
            y,
            u,
            v,
            width,
            height,
            y_row_stride: width as usize,
            uv_row_stride: if uv_pixel_stride == 1 {
                width as usize / 2
            } else {
                width as usize
            },
            uv_pixel_stride,
            v_before_u,
        }
    }

    #[test]
    fn test_yuv_planar_neutral_chroma_is_gray() {
        let (w, h) = (4u32, 4u32);
        let y = vec![120u8; 16];
        let u = vec![128u8; 4];
        let v = vec![128u8; 4];
        let planes = mid_gray_planes(&y, &u, &v, w, h, 1, false);
        let frame = BgrFrame::from_yuv(&planes, 0).unwrap();
        let (b, g, r) = frame.pixel(2, 2);
        assert_eq!((b, g, r), (120, 120, 120));
    }

    #[test]
    fn test_yuv_planar_red_pixel() {
        // Full-range BT.601: Y=76, U=85, V=255 is pure red
        let (w, h) = (2u32, 2u32);
        let y = vec![76u8; 4];
        let u = vec![85u8; 1];
        let v = vec![255u8; 1];
        let planes = mid_gray_planes(&y, &u, &v, w, h, 1, false);
        let frame = BgrFrame::from_yuv(&planes, 0).unwrap();
        let (b, g, r) = frame.pixel(0, 0);
        assert!(r > 245, "red channel {r}");
        assert!(g < 15, "green channel {g}");
        assert!(b < 15, "blue channel {b}");
    }

    #[test]
    fn test_yuv_semiplanar_orders_agree() {
        // One interleaved chroma buffer viewed both ways must decode the
        // same pixels as the planar layout with the same content.
        let (w, h) = (4u32, 2u32);
        let y: Vec<u8> = (0..8).map(|i| 60 + i * 10).collect();

        // Planar reference
        let u_pl = vec![100u8, 140];
        let v_pl = vec![200u8, 90];
        let planes = mid_gray_planes(&y, &u_pl, &v_pl, w, h, 1, false);
        let reference = BgrFrame::from_yuv(&planes, 0).unwrap();

        // VU-interleaved: V plane is the base, U plane starts one byte in
        let vu = vec![200u8, 100, 90, 140];
        let planes = mid_gray_planes(&y, &vu[1..], &vu, w, h, 2, true);
        let semi_vu = BgrFrame::from_yuv(&planes, 0).unwrap();
        assert_eq!(semi_vu.data, reference.data);

        // UV-interleaved: U plane is the base, V plane starts one byte in
        let uv = vec![100u8, 200, 140, 90];
        let planes = mid_gray_planes(&y, &uv, &uv[1..], w, h, 2, false);
        let semi_uv = BgrFrame::from_yuv(&planes, 0).unwrap();
        assert_eq!(semi_uv.data, reference.data);
    }

    #[test]
    fn test_yuv_strided_luma_rows() {
        // Stride 6 for a width-4 luma plane; padding must be skipped
        let (w, h) = (4u32, 2u32);
        let y = vec![
            10, 11, 12, 13, 0xEE, 0xEE, //
            20, 21, 22, 23, 0xEE, 0xEE,
        ];
        let u = vec![128u8; 2];
        let v = vec![128u8; 2];
        let planes = YuvPlanes {
            y: &y,
            u: &u,
            v: &v,
            width: w,
            height: h,
            y_row_stride: 6,
            uv_row_stride: 2,
            uv_pixel_stride: 1,
            v_before_u: false,
        };
        let frame = BgrFrame::from_yuv(&planes, 0).unwrap();
        assert_eq!(frame.pixel(3, 0), (13, 13, 13));
        assert_eq!(frame.pixel(0, 1), (20, 20, 20));
    }

    #[test]
    fn test_yuv_semiplanar_truncated_v_view() {
        // Camera V views commonly stop one byte short of the full
        // interleaved buffer; the final U byte comes from the U view.
        let (w, h) = (2u32, 2u32);
        let y = vec![90u8; 4];
        let vu = vec![130u8, 126];
        let planes = YuvPlanes {
            y: &y,
            u: &vu[1..],
            v: &vu[..1],
            width: w,
            height: h,
            y_row_stride: 2,
            uv_row_stride: 2,
            uv_pixel_stride: 2,
            v_before_u: true,
        };
        let frame = BgrFrame::from_yuv(&planes, 0).unwrap();
        // Decodes without error and close to gray
        let (b, g, r) = frame.pixel(0, 0);
        assert!(b.abs_diff(90) < 10 && g.abs_diff(90) < 10 && r.abs_diff(90) < 10);
    }

    #[test]
    fn test_yuv_rotation_swaps_dimensions() {
        let (w, h) = (4u32, 2u32);
        let y = vec![100u8; 8];
        let u = vec![128u8; 2];
        let v = vec![128u8; 2];
        let planes = mid_gray_planes(&y, &u, &v, w, h, 1, false);
        let frame = BgrFrame::from_yuv(&planes, 90).unwrap();
        assert_eq!((frame.width, frame.height), (2, 4));
    }

    #[test]
    fn test_yuv_rejects_bad_pixel_stride() {
        let y = vec![0u8; 4];
        let u = vec![0u8; 1];
        let v = vec![0u8; 1];
        let planes = YuvPlanes {
            y: &y,
            u: &u,
            v: &v,
            width: 2,
            height: 2,
            y_row_stride: 2,
            uv_row_stride: 1,
            uv_pixel_stride: 3,
            v_before_u: false,
        };
        assert!(BgrFrame::from_yuv(&planes, 0).is_err());
    }
}
