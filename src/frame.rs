//! Decoded video frames and in-place annotation.
//!
//! Frames are plain RGB24 buffers. Capabilities annotate a per-cycle clone of
//! the captured frame (the "canvas"); the original frame stays untouched so
//! every capability sees the same pixels.

use std::fmt;
use std::time::SystemTime;

use anyhow::{anyhow, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

pub const JPEG_QUALITY: u8 = 80;

/// One decoded RGB frame.
#[derive(Clone)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: SystemTime,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, captured_at: SystemTime) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(anyhow!(
                "frame buffer size mismatch: got {} bytes, expected {} for {}x{} RGB",
                data.len(),
                expected,
                width,
                height
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            captured_at,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Encode the frame as JPEG for the object store.
    pub fn to_jpeg(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
        encoder.encode(&self.data, self.width, self.height, ExtendedColorType::Rgb8)?;
        Ok(out)
    }

    fn put_pixel(&mut self, x: i64, y: i64, color: [u8; 3]) {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        self.data[idx..idx + 3].copy_from_slice(&color);
    }

    /// Draw a 2px rectangle outline in pixel coordinates. Boxes partially
    /// outside the frame are clipped, not rejected.
    pub fn draw_box(&mut self, x: f32, y: f32, w: f32, h: f32, color: [u8; 3]) {
        let (x0, y0) = (x as i64, y as i64);
        let (x1, y1) = ((x + w) as i64, (y + h) as i64);
        for t in 0..2i64 {
            for px in x0..=x1 {
                self.put_pixel(px, y0 + t, color);
                self.put_pixel(px, y1 - t, color);
            }
            for py in y0..=y1 {
                self.put_pixel(x0 + t, py, color);
                self.put_pixel(x1 - t, py, color);
            }
        }
    }

    /// Fill a horizontal status strip at the top of the frame. Used by the
    /// worker to mark event-bearing frames on the annotated output.
    pub fn draw_banner(&mut self, rows: u32, color: [u8; 3]) {
        let rows = rows.min(self.height);
        for y in 0..rows as i64 {
            for x in 0..self.width as i64 {
                self.put_pixel(x, y, color);
            }
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn black_frame(width: u32, height: u32) -> Frame {
        Frame::new(
            vec![0u8; width as usize * height as usize * 3],
            width,
            height,
            SystemTime::now(),
        )
        .unwrap()
    }

    #[test]
    fn frame_rejects_wrong_buffer_size() {
        assert!(Frame::new(vec![0u8; 10], 4, 4, SystemTime::now()).is_err());
    }

    #[test]
    fn draw_box_writes_outline_pixels() {
        let mut frame = black_frame(16, 16);
        frame.draw_box(2.0, 2.0, 8.0, 8.0, [255, 0, 0]);
        // Top-left corner of the outline.
        let idx = (2 * 16 + 2) * 3;
        assert_eq!(&frame.pixels()[idx..idx + 3], &[255, 0, 0]);
        // Center stays black.
        let center = (6 * 16 + 6) * 3;
        assert_eq!(&frame.pixels()[center..center + 3], &[0, 0, 0]);
    }

    #[test]
    fn draw_box_clips_out_of_bounds() {
        let mut frame = black_frame(8, 8);
        frame.draw_box(-4.0, -4.0, 100.0, 100.0, [0, 255, 0]);
    }

    #[test]
    fn banner_fills_top_rows_only() {
        let mut frame = black_frame(4, 4);
        frame.draw_banner(1, [9, 9, 9]);
        assert_eq!(&frame.pixels()[0..3], &[9, 9, 9]);
        let second_row = 4 * 3;
        assert_eq!(&frame.pixels()[second_row..second_row + 3], &[0, 0, 0]);
    }

    #[test]
    fn jpeg_encoding_produces_nonempty_output() {
        let frame = black_frame(32, 24);
        let jpeg = frame.to_jpeg().unwrap();
        assert!(!jpeg.is_empty());
        // JPEG SOI marker.
        assert_eq!(&jpeg[0..2], &[0xFF, 0xD8]);
    }
}
