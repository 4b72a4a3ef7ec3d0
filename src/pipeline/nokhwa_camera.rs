use anyhow::{Result, anyhow};
use nokhwa::{
    Camera,
    pixel_format::RgbFormat,
    query,
    utils::{
        ApiBackend, CameraFormat, CameraIndex, CameraInfo, FrameFormat, RequestedFormat,
        RequestedFormatType, Resolution,
    },
};

use super::{
    camera::{CameraDriver, CameraOpener, CaptureConstraints},
    rgba_converter::{self, PixelLayout, RgbaFrame},
};

// Raw RGB first: some built-in webcams advertise YUYV and then refuse it.
const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
    FrameFormat::RAWRGB,
    FrameFormat::RAWBGR,
    FrameFormat::GRAY,
    FrameFormat::YUYV,
    FrameFormat::NV12,
    FrameFormat::MJPEG,
];

const REQUESTED_FPS: u32 = 30;

fn requested_formats(constraints: &CaptureConstraints) -> [RequestedFormat<'static>; 4] {
    let wanted = CameraFormat::new(
        Resolution::new(constraints.width, constraints.height),
        FrameFormat::MJPEG,
        REQUESTED_FPS,
    );
    [
        RequestedFormat::with_formats(RequestedFormatType::Closest(wanted), PREFERRED_PIXEL_FORMATS),
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestFrameRate,
            PREFERRED_PIXEL_FORMATS,
        ),
        // Last resort: whatever the driver decodes.
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
    ]
}

#[derive(Clone, Debug)]
pub struct CameraDevice {
    pub index: CameraIndex,
    pub label: String,
}

pub fn available_cameras() -> Result<Vec<CameraDevice>> {
    let cameras = query(ApiBackend::Auto)?;
    Ok(cameras
        .into_iter()
        .map(|info| CameraDevice {
            index: info.index().clone(),
            label: format_camera_label(&info),
        })
        .collect())
}

fn format_camera_label(info: &CameraInfo) -> String {
    info.human_name()
}

/// Native camera opened through Nokhwa.
#[derive(Clone, Debug)]
pub struct NokhwaCamera {
    device: CameraDevice,
}

impl NokhwaCamera {
    pub fn new(device: CameraDevice) -> Self {
        Self { device }
    }

    /// First camera the platform reports.
    pub fn first_available() -> Result<Self> {
        available_cameras()?
            .into_iter()
            .next()
            .map(Self::new)
            .ok_or_else(|| anyhow!("no camera found"))
    }
}

pub struct NokhwaDriver {
    camera: Camera,
}

impl CameraOpener for NokhwaCamera {
    type Driver = NokhwaDriver;

    fn label(&self) -> String {
        self.device.label.clone()
    }

    fn open(&self, constraints: &CaptureConstraints) -> Result<NokhwaDriver> {
        let mut last_err = None;

        for requested in requested_formats(constraints) {
            match Camera::new(self.device.index.clone(), requested) {
                Ok(mut camera) => match camera.open_stream() {
                    Ok(()) => return Ok(NokhwaDriver { camera }),
                    Err(err) => last_err = Some(err.into()),
                },
                Err(err) => last_err = Some(err.into()),
            }
        }

        Err(last_err
            .unwrap_or_else(|| anyhow!("failed to open camera with any supported format")))
    }
}

impl CameraDriver for NokhwaDriver {
    fn resolution(&self) -> (u32, u32) {
        let resolution = self.camera.resolution();
        (resolution.width(), resolution.height())
    }

    fn capture(&mut self) -> Result<RgbaFrame> {
        let frame = self.camera.frame()?;
        let resolution = frame.resolution();
        let layout = match frame.source_frame_format() {
            FrameFormat::NV12 => PixelLayout::Nv12,
            FrameFormat::YUYV => PixelLayout::Yuyv,
            FrameFormat::MJPEG => PixelLayout::Mjpeg,
            FrameFormat::RAWRGB => PixelLayout::Rgb,
            FrameFormat::RAWBGR => PixelLayout::Bgr,
            FrameFormat::GRAY => PixelLayout::Gray,
        };
        rgba_converter::convert_raw(
            layout,
            frame.buffer(),
            resolution.width_x,
            resolution.height_y,
        )
    }
}

impl Drop for NokhwaDriver {
    fn drop(&mut self) {
        if let Err(err) = self.camera.stop_stream() {
            log::warn!("failed to stop camera stream: {err:?}");
        }
    }
}
