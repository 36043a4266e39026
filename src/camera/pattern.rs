use image::{Rgb, RgbImage};

use super::{Device, Result, Source};

/// A synthetic camera: a gradient that scrolls by a few pixels per frame
#[derive(Clone, Copy, Debug)]
pub struct PatternSource {
    pub width: u32,
    pub height: u32,
}

impl PatternSource {
    pub fn new(width: u32, height: u32) -> Self {
        PatternSource { width, height }
    }
}

impl Source for PatternSource {
    fn open(&self) -> Result<Box<dyn Device>> {
        Ok(Box::new(PatternDevice { source: *self, frame: 0 }))
    }

    fn name(&self) -> String {
        format!("pattern ({}x{})", self.width, self.height)
    }
}

pub struct PatternDevice {
    source: PatternSource,
    frame: u32,
}

impl Device for PatternDevice {
    fn read(&mut self) -> Result<RgbImage> {
        let PatternSource { width, height } = self.source;
        let offset = self.frame.wrapping_mul(4);
        self.frame = self.frame.wrapping_add(1);
        Ok(RgbImage::from_fn(width, height, |x, y| {
            let red = (x.wrapping_add(offset) % width * 255 / width) as u8;
            let green = (y * 255 / height) as u8;
            Rgb([red, green, offset as u8])
        }))
    }
}
