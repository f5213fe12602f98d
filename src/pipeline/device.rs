//! Output side of the pipeline: a v4l2loopback device fed with raw YUYV
//! frames.
//!
//! The device is configured once with `VIDIOC_S_FMT` right after it is
//! opened. Every frame after that is a single blocking `write` of exactly
//! `sizeimage` bytes, with no headers or further ioctls.

use std::{
    fs::File,
    io::{self, Write},
    mem,
    path::{Path, PathBuf},
};

use crate::error::PipelineError;

/// `V4L2_BUF_TYPE_VIDEO_OUTPUT`
pub const BUF_TYPE_VIDEO_OUTPUT: u32 = 2;
/// `V4L2_PIX_FMT_YUYV`, fourcc "YUYV".
pub const PIX_FMT_YUYV: u32 = fourcc(b"YUYV");
/// `V4L2_FIELD_NONE`: progressive frames.
pub const FIELD_NONE: u32 = 1;
/// `V4L2_COLORSPACE_JPEG`: full-range BT.601, suited to rendered content.
pub const COLORSPACE_JPEG: u32 = 7;

const fn fourcc(code: &[u8; 4]) -> u32 {
    (code[0] as u32) | ((code[1] as u32) << 8) | ((code[2] as u32) << 16) | ((code[3] as u32) << 24)
}

/// `struct v4l2_pix_format`. Stride and image size are always derived from
/// the frame size, so the fields are private.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceFormat {
    width: u32,
    height: u32,
    pixelformat: u32,
    field: u32,
    bytesperline: u32,
    sizeimage: u32,
    colorspace: u32,
    priv_: u32,
    flags: u32,
    ycbcr_enc: u32,
    quantization: u32,
    xfer_func: u32,
}

impl DeviceFormat {
    pub fn yuyv(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixelformat: PIX_FMT_YUYV,
            field: FIELD_NONE,
            bytesperline: width * 2,
            sizeimage: width * height * 2,
            colorspace: COLORSPACE_JPEG,
            ..Self::default()
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_format(&self) -> u32 {
        self.pixelformat
    }

    pub fn field(&self) -> u32 {
        self.field
    }

    pub fn bytes_per_line(&self) -> u32 {
        self.bytesperline
    }

    pub fn image_size(&self) -> u32 {
        self.sizeimage
    }

    pub fn colorspace(&self) -> u32 {
        self.colorspace
    }
}

/// The 200-byte format union of `struct v4l2_format`. Only `pix` is used;
/// `_align` gives it the pointer alignment of the kernel's `v4l2_window`
/// member.
#[repr(C)]
#[derive(Clone, Copy)]
#[allow(dead_code)]
pub union FormatUnion {
    pub pix: DeviceFormat,
    pub raw_data: [u8; 200],
    _align: [usize; 200 / mem::size_of::<usize>()],
}

/// `struct v4l2_format`
#[repr(C)]
#[derive(Clone, Copy)]
#[allow(dead_code)]
pub struct V4l2Format {
    pub type_: u32,
    pub fmt: FormatUnion,
}

impl V4l2Format {
    pub fn output(pix: DeviceFormat) -> Self {
        let mut format = V4l2Format {
            type_: BUF_TYPE_VIDEO_OUTPUT,
            fmt: FormatUnion { raw_data: [0; 200] },
        };
        format.fmt.pix = pix;
        format
    }
}

const _: () = assert!(mem::size_of::<DeviceFormat>() == 48);
const _: () = assert!(mem::size_of::<FormatUnion>() == 200);
const _: () = assert!(mem::offset_of!(V4l2Format, fmt) == mem::align_of::<usize>());
const _: () = assert!(mem::size_of::<V4l2Format>() == mem::align_of::<usize>() + 200);

#[cfg(target_os = "linux")]
mod ioctl {
    nix::ioctl_readwrite!(vidioc_s_fmt, b'V', 5, super::V4l2Format);
}

/// Destination for packed frames.
pub trait FrameSink {
    /// Write one packed frame; `bytes` must be exactly `image_size()` long.
    fn write_frame(&mut self, bytes: &[u8]) -> Result<(), PipelineError>;

    /// Close and reopen the destination, reprogramming its format.
    fn reopen(&mut self) -> Result<(), PipelineError>;

    fn close(&mut self) -> Result<(), PipelineError>;

    fn image_size(&self) -> usize;
}

#[derive(Debug)]
pub struct DeviceSink {
    path: PathBuf,
    format: DeviceFormat,
    file: Option<File>,
}

impl DeviceSink {
    pub fn open(path: impl Into<PathBuf>, width: u32, height: u32) -> Result<Self, PipelineError> {
        let path = path.into();
        if width.checked_mul(2).and_then(|line| line.checked_mul(height)).is_none() {
            return Err(PipelineError::configuration(format!(
                "frame size {width}x{height} does not fit a 32-bit image size"
            )));
        }
        let format = DeviceFormat::yuyv(width, height);
        let file = open_device(&path, &format)?;
        log::info!(
            "virtual camera {} configured: {}x{} fourcc {:#010x} field {} colorspace {}, {} bytes/line, {} bytes/frame",
            path.display(),
            format.width(),
            format.height(),
            format.pixel_format(),
            format.field(),
            format.colorspace(),
            format.bytes_per_line(),
            format.image_size()
        );
        Ok(Self {
            path,
            format,
            file: Some(file),
        })
    }
}

fn open_device(path: &Path, format: &DeviceFormat) -> Result<File, PipelineError> {
    let file = open_for_sync_write(path).map_err(|err| {
        PipelineError::configuration(format!(
            "could not open {} for writing: {err}",
            path.display()
        ))
    })?;
    set_format(&file, format).map_err(|err| {
        PipelineError::configuration(format!(
            "{} rejected the output format: {err}",
            path.display()
        ))
    })?;
    Ok(file)
}

#[cfg(target_os = "linux")]
fn open_for_sync_write(path: &Path) -> io::Result<File> {
    use std::{fs::OpenOptions, os::unix::fs::OpenOptionsExt};

    OpenOptions::new()
        .write(true)
        .custom_flags(nix::fcntl::OFlag::O_SYNC.bits())
        .open(path)
}

#[cfg(not(target_os = "linux"))]
fn open_for_sync_write(path: &Path) -> io::Result<File> {
    std::fs::OpenOptions::new().write(true).open(path)
}

#[cfg(target_os = "linux")]
fn set_format(file: &File, format: &DeviceFormat) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    let mut settings = V4l2Format::output(*format);
    // SAFETY: `settings` is a live, correctly laid out `struct v4l2_format`
    // and the descriptor stays open for the duration of the call.
    unsafe { ioctl::vidioc_s_fmt(file.as_raw_fd(), &mut settings) }
        .map(|_| ())
        .map_err(io::Error::from)
}

#[cfg(not(target_os = "linux"))]
fn set_format(_file: &File, _format: &DeviceFormat) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "virtual camera output needs Linux with v4l2loopback",
    ))
}

impl FrameSink for DeviceSink {
    fn write_frame(&mut self, bytes: &[u8]) -> Result<(), PipelineError> {
        let expected = self.image_size();
        if bytes.len() != expected {
            return Err(PipelineError::FrameSize {
                expected,
                actual: bytes.len(),
            });
        }
        let Some(file) = self.file.as_mut() else {
            return Err(PipelineError::DeviceIo {
                path: self.path.clone(),
                source: io::Error::new(io::ErrorKind::NotConnected, "device is closed"),
            });
        };
        match file.write(bytes) {
            Ok(written) if written == bytes.len() => Ok(()),
            Ok(written) => Err(PipelineError::DeviceIo {
                path: self.path.clone(),
                source: io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!("short write: {written} of {} bytes", bytes.len()),
                ),
            }),
            Err(source) => Err(PipelineError::DeviceIo {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn reopen(&mut self) -> Result<(), PipelineError> {
        self.file.take();
        let file = open_device(&self.path, &self.format)?;
        self.file = Some(file);
        log::info!("virtual camera {} reopened", self.path.display());
        Ok(())
    }

    fn close(&mut self) -> Result<(), PipelineError> {
        if self.file.take().is_some() {
            log::info!("virtual camera {} closed", self.path.display());
        }
        Ok(())
    }

    fn image_size(&self) -> usize {
        self.format.image_size() as usize
    }
}

impl Drop for DeviceSink {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_fields_for_720p() {
        let format = DeviceFormat::yuyv(1280, 720);
        assert_eq!(format.width(), 1280);
        assert_eq!(format.height(), 720);
        assert_eq!(format.bytes_per_line(), 2560);
        assert_eq!(format.image_size(), 1_843_200);
        assert_eq!(format.pixel_format(), 0x5659_5559);
        assert_eq!(format.pixel_format(), 1_448_695_129);
        assert_eq!(format.field(), FIELD_NONE);
        assert_eq!(format.colorspace(), COLORSPACE_JPEG);
    }

    #[test]
    fn test_descriptor_layout_matches_kernel_abi() {
        let format = V4l2Format::output(DeviceFormat::yuyv(640, 480));
        assert_eq!(format.type_, BUF_TYPE_VIDEO_OUTPUT);
        // SAFETY: `output` zeroes all 200 bytes before writing `pix`.
        let bytes = unsafe { format.fmt.raw_data };
        let word = |offset: usize| {
            u32::from_ne_bytes(bytes[offset..offset + 4].try_into().unwrap())
        };
        assert_eq!(word(0), 640);
        assert_eq!(word(4), 480);
        assert_eq!(word(8), PIX_FMT_YUYV);
        assert_eq!(word(12), FIELD_NONE);
        assert_eq!(word(16), 1280);
        assert_eq!(word(20), 640 * 480 * 2);
        assert_eq!(word(24), COLORSPACE_JPEG);
        assert!(bytes[48..].iter().all(|&b| b == 0));
    }

    #[cfg(all(target_os = "linux", target_pointer_width = "64"))]
    #[test]
    fn test_ioctl_request_number() {
        // _IOWR('V', 5, struct v4l2_format) on every Linux ABI with 64-bit alignment.
        let request = nix::request_code_readwrite!(b'V', 5, mem::size_of::<V4l2Format>());
        assert_eq!(request as u64, 0xc0d0_5605);
    }

    #[test]
    fn test_open_rejects_oversized_frame() {
        let err = DeviceSink::open("/nonexistent/holo-cam/video99", 65536, 32768).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn test_write_frame_checks_size_and_handle() {
        let path = std::env::temp_dir().join(format!("holo-cam-sink-{}.yuv", std::process::id()));
        let mut sink = DeviceSink {
            path: path.clone(),
            format: DeviceFormat::yuyv(4, 2),
            file: Some(File::create(&path).unwrap()),
        };
        assert_eq!(sink.image_size(), 16);

        let err = sink.write_frame(&[0u8; 15]).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::FrameSize {
                expected: 16,
                actual: 15
            }
        ));
        assert!(!err.is_recoverable());

        sink.write_frame(&[0x80u8; 16]).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 16);

        sink.close().unwrap();
        let err = sink.write_frame(&[0x80u8; 16]).unwrap_err();
        assert!(matches!(err, PipelineError::DeviceIo { .. }));
        assert!(err.is_recoverable());

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_open_missing_device_is_configuration_error() {
        let err = DeviceSink::open("/nonexistent/holo-cam/video99", 640, 480).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
        assert!(!err.is_recoverable());
    }
}
