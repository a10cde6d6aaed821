use crate::error::InputError;
use image::RgbaImage;
use std::sync::Arc;

const CHANNELS: usize = 4;

/// A single decoded video frame, RGBA8, row-major.
///
/// Frames are immutable once built. The pixel buffer is reference counted so
/// the parallel pipeline can hand the same frame to a worker without copying.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Position of this frame in the source sequence.
    pub index: u64,
    /// Capture time in seconds. Must increase strictly across a run.
    pub timestamp: f64,
    pub width: u32,
    pub height: u32,
    pixels: Arc<[u8]>,
}

impl Frame {
    /// Builds a frame, checking that the buffer matches the stated dimensions.
    pub fn new(
        index: u64,
        timestamp: f64,
        width: u32,
        height: u32,
        pixels: impl Into<Arc<[u8]>>,
    ) -> Result<Self, InputError> {
        if width == 0 || height == 0 {
            return Err(InputError::EmptyFrame { frame_index: index });
        }
        let pixels = pixels.into();
        let expected = width as usize * height as usize * CHANNELS;
        if pixels.len() != expected {
            return Err(InputError::BufferSize {
                frame_index: index,
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            index,
            timestamp,
            width,
            height,
            pixels,
        })
    }

    /// Wraps a decoded `image` buffer.
    pub fn from_rgba_image(
        index: u64,
        timestamp: f64,
        image: RgbaImage,
    ) -> Result<Self, InputError> {
        let (width, height) = image.dimensions();
        Self::new(index, timestamp, width, height, image.into_raw())
    }

    /// A frame filled with one color. Mostly useful for seeding and tests.
    pub fn solid(
        index: u64,
        timestamp: f64,
        width: u32,
        height: u32,
        rgba: [u8; 4],
    ) -> Result<Self, InputError> {
        let pixels: Vec<u8> = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * CHANNELS)
            .collect();
        Self::new(index, timestamp, width, height, pixels)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// The RGBA bytes of pixel `(x, y)`.
    pub fn rgba(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = (y as usize * self.width as usize + x as usize) * CHANNELS;
        [
            self.pixels[offset],
            self.pixels[offset + 1],
            self.pixels[offset + 2],
            self.pixels[offset + 3],
        ]
    }

    pub fn diagonal(&self) -> f64 {
        (self.width as f64).hypot(self.height as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_buffer() {
        let err = Frame::new(7, 0.0, 4, 4, vec![0u8; 10]).unwrap_err();
        assert_eq!(
            err,
            InputError::BufferSize {
                frame_index: 7,
                expected: 64,
                actual: 10
            }
        );
    }

    #[test]
    fn solid_frame_needs_an_area() {
        let err = Frame::solid(3, 0.0, 0, 8, [0, 0, 0, 255]).unwrap_err();
        assert_eq!(err, InputError::EmptyFrame { frame_index: 3 });
        let frame = Frame::solid(4, 0.0, 2, 2, [1, 2, 3, 255]).unwrap();
        assert_eq!(frame.rgba(1, 1), [1, 2, 3, 255]);
    }

    #[test]
    fn wraps_rgba_image() {
        let mut image = RgbaImage::new(3, 2);
        image.put_pixel(2, 1, image::Rgba([9, 8, 7, 255]));
        let frame = Frame::from_rgba_image(0, 0.0, image).unwrap();
        assert_eq!((frame.width, frame.height), (3, 2));
        assert_eq!(frame.rgba(2, 1), [9, 8, 7, 255]);
    }
}
