use image::RgbImage;
use opencv::{core::Mat, imgproc, prelude::*, videoio::{self, VideoCapture}};

use super::{Device, Error, Result, Source};

/// A V4L2/USB camera opened through OpenCV
#[derive(Clone, Copy, Debug)]
pub struct OpenCvSource {
    pub index: i32,
    pub width: u32,
    pub height: u32,
}

impl Source for OpenCvSource {
    fn open(&self) -> Result<Box<dyn Device>> {
        let mut capture = VideoCapture::new(self.index, videoio::CAP_ANY)?;
        if !VideoCapture::is_opened(&capture)? {
            return Err(Error::OpenFailed(format!("camera {} is not available", self.index)));
        }
        /* drivers are free to ignore these */
        capture.set(videoio::CAP_PROP_FRAME_WIDTH, f64::from(self.width))?;
        capture.set(videoio::CAP_PROP_FRAME_HEIGHT, f64::from(self.height))?;
        capture.set(videoio::CAP_PROP_BUFFERSIZE, 1.0)?;
        log::info!("OpenCV camera {} uses backend {}", self.index,
            capture.get_backend_name().unwrap_or_else(|_| "unknown".to_owned()));
        Ok(Box::new(OpenCvDevice { capture, bgr: Mat::default(), rgb: Mat::default() }))
    }

    fn name(&self) -> String {
        format!("opencv:{}", self.index)
    }
}

pub struct OpenCvDevice {
    capture: VideoCapture,
    bgr: Mat,
    rgb: Mat,
}

impl Device for OpenCvDevice {
    fn read(&mut self) -> Result<RgbImage> {
        if !self.capture.read(&mut self.bgr)? || self.bgr.empty() {
            return Err(Error::EmptyFrame);
        }
        imgproc::cvt_color_def(&self.bgr, &mut self.rgb, imgproc::COLOR_BGR2RGB)?;
        let (width, height) = (self.rgb.cols() as u32, self.rgb.rows() as u32);
        RgbImage::from_raw(width, height, self.rgb.data_bytes()?.to_vec())
            .ok_or(Error::EmptyFrame)
    }
}
