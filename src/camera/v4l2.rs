use crate::common::{Config, FaceWardError, Result};
use crate::core::interfaces::FrameSource;
use crate::camera::pixels::decode_frame;
use image::DynamicImage;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

/// Continuous capture from `/dev/videoN`.
pub struct V4lCamera {
    stream: Stream<'static>,
    format: v4l::Format,
    _device: Device,
}

impl V4lCamera {
    pub fn open(config: &Config) -> Result<Self> {
        let index = config.camera.device_index;
        tracing::info!("Opening camera device {}...", index);

        let device = Device::new(index as usize)
            .map_err(|e| FaceWardError::Camera(format!("Failed to open camera {}: {}", index, e)))?;

        let caps = device.query_caps()
            .map_err(|e| FaceWardError::Camera(format!("Failed to query capabilities: {}", e)))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            tracing::warn!("Device {} ({}) may not support standard video capture", index, caps.card);
        }

        let mut fmt = device.format()
            .map_err(|e| FaceWardError::Camera(format!("Failed to get format: {}", e)))?;
        fmt.width = config.camera.width;
        fmt.height = config.camera.height;

        // Keep GREY for IR cameras, otherwise ask for MJPG
        if fmt.fourcc != FourCC::new(b"GREY") {
            fmt.fourcc = FourCC::new(b"MJPG");
        }

        if let Err(e) = device.set_format(&fmt) {
            tracing::warn!("Could not set exact format: {}. Using device defaults.", e);
        }

        let format = device.format()
            .map_err(|e| FaceWardError::Camera(format!("Failed to get final format: {}", e)))?;
        tracing::info!("Camera format: {}x{} {}", format.width, format.height, format.fourcc);

        if format.width != config.camera.width || format.height != config.camera.height {
            tracing::warn!(
                "Camera resolution {}x{} differs from requested {}x{}",
                format.width, format.height, config.camera.width, config.camera.height
            );
        }

        let mut stream = Stream::with_buffers(&device, Type::VideoCapture, 4)
            .map_err(|e| FaceWardError::Camera(format!("Failed to create stream: {}", e)))?;

        for i in 0..config.camera.warmup_frames {
            stream.next()
                .map_err(|e| FaceWardError::Camera(format!("Failed to capture warmup frame {}: {}", i, e)))?;
            std::thread::sleep(std::time::Duration::from_millis(config.camera.warmup_delay_ms));
        }
        tracing::info!("Camera ready");

        Ok(Self { stream, format, _device: device })
    }
}

impl FrameSource for V4lCamera {
    fn read(&mut self) -> Result<Option<DynamicImage>> {
        let (buf, _meta) = self.stream.next()
            .map_err(|e| FaceWardError::Camera(format!("Failed to capture: {}", e)))?;
        decode_frame(&self.format.fourcc.repr, buf, self.format.width, self.format.height).map(Some)
    }
}
