use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use image::{codecs::jpeg::JpegEncoder, imageops::{self, FilterType}, RgbImage};

pub mod pattern;
pub mod stream;
#[cfg(feature = "opencv")]
pub mod opencv;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Camera is not open")]
    NotOpen,

    #[error("Could not open camera: {0}")]
    OpenFailed(String),

    #[error("Camera returned an empty frame")]
    EmptyFrame,

    #[error(transparent)]
    ImageError(#[from] image::ImageError),

    #[error(transparent)]
    JoinError(#[from] tokio::task::JoinError),

    #[cfg(feature = "opencv")]
    #[error(transparent)]
    OpenCvError(#[from] ::opencv::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// An opened capture device
pub trait Device: Send {
    fn read(&mut self) -> Result<RgbImage>;
}

/// Something that can be opened into a capture device
pub trait Source: Send + Sync {
    fn open(&self) -> Result<Box<dyn Device>>;

    fn name(&self) -> String;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Settings {
    pub width: u32,
    pub height: u32,
    pub quality: u8,
    /// Quality used when an encoded frame is larger than `max_frame_len`
    pub fallback_quality: u8,
    pub max_frame_len: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            width: 640,
            height: 480,
            quality: 80,
            fallback_quality: 50,
            max_frame_len: 100_000,
        }
    }
}

/// The single camera of the vehicle. The device handle sits behind one lock
/// which is held for the duration of a read and the encoding of that frame.
pub struct Camera {
    source: Box<dyn Source>,
    device: Mutex<Option<Box<dyn Device>>>,
    settings: Settings,
}

impl Camera {
    pub fn new(source: Box<dyn Source>, settings: Settings) -> Self {
        Camera { source, device: Mutex::new(None), settings }
    }

    pub fn name(&self) -> String {
        self.source.name()
    }

    /// Opens the device unless it is already open
    pub fn open(&self) -> Result<()> {
        let mut device = self.lock();
        if device.is_none() {
            *device = Some(self.source.open()?);
            log::info!("Opened camera {}", self.source.name());
        }
        Ok(())
    }

    pub fn close(&self) {
        if self.lock().take().is_some() {
            log::info!("Closed camera {}", self.source.name());
        }
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    /// Reads one frame and encodes it as a JPEG
    pub fn capture(&self) -> Result<Bytes> {
        let mut device = self.lock();
        let device = device.as_mut().ok_or(Error::NotOpen)?;
        let frame = device.read()?;
        encode(&frame, &self.settings)
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn Device>>> {
        self.device.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Downscales a frame to the configured resolution and encodes it, falling
/// back to a lower quality once if the result is over the size cap
pub fn encode(frame: &RgbImage, settings: &Settings) -> Result<Bytes> {
    if frame.width() == 0 || frame.height() == 0 {
        return Err(Error::EmptyFrame);
    }
    let resized;
    let frame = if frame.dimensions() != (settings.width, settings.height) {
        resized = imageops::resize(frame, settings.width, settings.height, FilterType::Triangle);
        &resized
    }
    else {
        frame
    };
    let encoded = jpeg(frame, settings.quality)?;
    if encoded.len() <= settings.max_frame_len {
        return Ok(encoded.into());
    }
    log::debug!("Frame of {} bytes exceeds {} bytes, encoding with quality {}",
        encoded.len(), settings.max_frame_len, settings.fallback_quality);
    Ok(jpeg(frame, settings.fallback_quality)?.into())
}

fn jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality).encode_image(frame)?;
    Ok(buffer)
}
