use anyhow::{Result, anyhow};
use rayon::prelude::*;
use yuv::{
    YuvBiPlanarImage, YuvConversionMode, YuvPackedImage, YuvRange, YuvStandardMatrix,
    yuv_nv12_to_rgba, yuyv422_to_rgba,
};
use zune_jpeg::{
    JpegDecoder,
    zune_core::{bytestream::ZCursor, colorspace::ColorSpace, options::DecoderOptions},
};

/// Pixel layouts camera drivers hand us.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelLayout {
    Nv12,
    Yuyv,
    Mjpeg,
    Rgb,
    Bgr,
    Gray,
}

#[derive(Debug)]
pub struct RgbaFrame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Converts one raw camera buffer to tightly packed RGBA8.
///
/// `width`/`height` are the resolution the driver negotiated; MJPEG frames
/// report their own size and override it.
pub fn convert_raw(layout: PixelLayout, data: &[u8], width: u32, height: u32) -> Result<RgbaFrame> {
    let rgba = match layout {
        PixelLayout::Mjpeg => return mjpeg_to_rgba(data),
        PixelLayout::Nv12 => nv12_to_rgba(data, width, height)?,
        PixelLayout::Yuyv => yuyv_to_rgba(data, width, height)?,
        PixelLayout::Rgb => rgb_like_to_rgba(data, width, height, false)?,
        PixelLayout::Bgr => rgb_like_to_rgba(data, width, height, true)?,
        PixelLayout::Gray => gray_to_rgba(data, width, height)?,
    };

    Ok(RgbaFrame {
        rgba,
        width,
        height,
    })
}

fn nv12_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let y_plane_len = width as usize * height as usize;
    let uv_plane_len = y_plane_len / 2;
    ensure_len("NV12", data, y_plane_len + uv_plane_len)?;

    let mut rgba = vec![0u8; y_plane_len * 4];
    let image = YuvBiPlanarImage {
        y_plane: &data[..y_plane_len],
        y_stride: width,
        uv_plane: &data[y_plane_len..y_plane_len + uv_plane_len],
        uv_stride: width,
        width,
        height,
    };

    yuv_nv12_to_rgba(
        &image,
        &mut rgba,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
        YuvConversionMode::Balanced,
    )
    .map_err(|err| anyhow!("NV12→RGBA failed: {err:?}"))?;

    Ok(rgba)
}

fn yuyv_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    ensure_len("YUYV", data, width as usize * height as usize * 2)?;

    let mut rgba = vec![0u8; (width as usize * height as usize) * 4];
    let packed = YuvPackedImage {
        yuy: data,
        yuy_stride: width * 2,
        width,
        height,
    };

    yuyv422_to_rgba(
        &packed,
        &mut rgba,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
    )
    .map_err(|err| anyhow!("YUYV422→RGBA failed: {err:?}"))?;

    Ok(rgba)
}

fn mjpeg_to_rgba(data: &[u8]) -> Result<RgbaFrame> {
    let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), options);
    let rgba = decoder
        .decode()
        .map_err(|err| anyhow!("MJPEG decode failed: {err:?}"))?;

    let info = decoder
        .info()
        .ok_or_else(|| anyhow!("MJPEG decoder reported no image info"))?;
    let (width, height) = u32::try_from(info.width)
        .and_then(|w| u32::try_from(info.height).map(|h| (w, h)))
        .map_err(|_| anyhow!("MJPEG dimensions do not fit u32"))?;
    ensure_len("MJPEG", &rgba, width as usize * height as usize * 4)?;

    Ok(RgbaFrame {
        rgba,
        width,
        height,
    })
}

fn rgb_like_to_rgba(data: &[u8], width: u32, height: u32, swap_rb: bool) -> Result<Vec<u8>> {
    ensure_len("RGB", data, width as usize * height as usize * 3)?;

    let mut rgba = vec![0u8; (width as usize * height as usize) * 4];
    rgba.par_chunks_mut(4)
        .zip(data.par_chunks_exact(3))
        .for_each(|(dst, src)| {
            if swap_rb {
                dst[0] = src[2];
                dst[1] = src[1];
                dst[2] = src[0];
            } else {
                dst[..3].copy_from_slice(src);
            }
            dst[3] = 255;
        });

    Ok(rgba)
}

fn gray_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let pixels = width as usize * height as usize;
    ensure_len("GRAY", data, pixels)?;

    let mut rgba = vec![0u8; pixels * 4];
    rgba.par_chunks_mut(4)
        .zip(data.par_iter().copied())
        .for_each(|(dst, value)| {
            dst[..3].fill(value);
            dst[3] = 255;
        });

    Ok(rgba)
}

fn ensure_len(layout: &str, data: &[u8], expected: usize) -> Result<()> {
    if data.len() < expected {
        return Err(anyhow!(
            "{layout} buffer too small: got {}, expected {expected}",
            data.len()
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgr_swaps_red_and_blue() {
        let frame = convert_raw(PixelLayout::Bgr, &[10, 20, 30, 40, 50, 60], 2, 1).unwrap();
        assert_eq!(frame.rgba, vec![30, 20, 10, 255, 60, 50, 40, 255]);
    }

    #[test]
    fn rgb_keeps_channel_order() {
        let frame = convert_raw(PixelLayout::Rgb, &[1, 2, 3], 1, 1).unwrap();
        assert_eq!(frame.rgba, vec![1, 2, 3, 255]);
        assert_eq!((frame.width, frame.height), (1, 1));
    }

    #[test]
    fn gray_replicates_luma() {
        let frame = convert_raw(PixelLayout::Gray, &[7, 200], 2, 1).unwrap();
        assert_eq!(frame.rgba, vec![7, 7, 7, 255, 200, 200, 200, 255]);
    }

    #[test]
    fn short_buffers_are_rejected() {
        let err = convert_raw(PixelLayout::Yuyv, &[0; 3], 2, 2).unwrap_err();
        assert!(err.to_string().contains("YUYV buffer too small"));
    }

    #[test]
    fn garbage_mjpeg_fails_to_decode() {
        assert!(convert_raw(PixelLayout::Mjpeg, &[0, 1, 2, 3], 2, 2).is_err());
    }
}
