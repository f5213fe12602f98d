use anyhow::Result;

use crate::types::Frame;

/// Something that yields RGB frames on demand, one per pipeline iteration.
pub trait FrameSource {
    fn capture(&mut self) -> Result<Frame>;
}

#[cfg(feature = "camera-nokhwa")]
pub use self::nokhwa_source::CameraSource;

#[cfg(feature = "camera-nokhwa")]
mod nokhwa_source {
    use anyhow::{Context, Result, anyhow};
    use nokhwa::{
        Camera,
        pixel_format::RgbFormat,
        utils::{
            CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
            Resolution,
        },
    };

    use super::FrameSource;
    use crate::pipeline::{frame_decoder, resize};
    use crate::types::Frame;

    // Formats the decoder handles, cheapest first.
    const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
        FrameFormat::YUYV,
        FrameFormat::NV12,
        FrameFormat::RAWRGB,
        FrameFormat::RAWBGR,
        FrameFormat::MJPEG,
        FrameFormat::GRAY,
    ];

    fn requested_formats(width: u32, height: u32) -> [RequestedFormat<'static>; 4] {
        [
            RequestedFormat::with_formats(
                RequestedFormatType::Closest(CameraFormat::new(
                    Resolution::new(width, height),
                    FrameFormat::YUYV,
                    30,
                )),
                PREFERRED_PIXEL_FORMATS,
            ),
            RequestedFormat::with_formats(
                RequestedFormatType::AbsoluteHighestFrameRate,
                PREFERRED_PIXEL_FORMATS,
            ),
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
        ]
    }

    fn build_camera(index: CameraIndex, width: u32, height: u32) -> Result<Camera> {
        let mut last_err = None;

        for requested in requested_formats(width, height) {
            match Camera::new(index.clone(), requested) {
                Ok(mut camera) => match camera.open_stream() {
                    Ok(()) => return Ok(camera),
                    Err(err) => last_err = Some(err.into()),
                },
                Err(err) => last_err = Some(err.into()),
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("failed to open camera with any supported format")))
    }

    /// Physical camera read synchronously, scaled to the pipeline size.
    pub struct CameraSource {
        camera: Camera,
        width: u32,
        height: u32,
    }

    impl CameraSource {
        pub fn open(index: u32, width: u32, height: u32) -> Result<Self> {
            let camera = build_camera(CameraIndex::Index(index), width, height)
                .with_context(|| format!("failed to open camera {index}"))?;
            let format = camera.camera_format();
            log::info!(
                "camera {index} streaming {}x{} {:?} @ {} fps",
                format.resolution().width_x,
                format.resolution().height_y,
                format.format(),
                format.frame_rate()
            );
            if format.resolution().width_x != width || format.resolution().height_y != height {
                log::warn!("camera frames will be scaled to {width}x{height}");
            }
            Ok(Self {
                camera,
                width,
                height,
            })
        }
    }

    impl FrameSource for CameraSource {
        fn capture(&mut self) -> Result<Frame> {
            let buffer = self.camera.frame().context("camera frame read failed")?;
            let frame = frame_decoder::decode_camera_frame(&buffer)?;
            if frame.width == self.width && frame.height == self.height {
                return Ok(frame);
            }
            let rgb = resize::resize_rgb(
                frame.rgb,
                frame.width,
                frame.height,
                self.width,
                self.height,
            )?;
            Frame::new(self.width, self.height, rgb)
        }
    }

    impl Drop for CameraSource {
        fn drop(&mut self) {
            if let Err(err) = self.camera.stop_stream() {
                log::warn!("failed to stop camera stream: {err:?}");
            }
        }
    }
}
