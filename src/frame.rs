use crate::error::{FitcamError, Result};
use crate::pipeline::ImageData;
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, DynamicImage, GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;

/// Side length of the grid sampled for brightness
const BRIGHTNESS_SAMPLE_GRID: u64 = 100;

/// Frame format enumeration supporting different video formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameFormat {
    /// Motion JPEG format - compressed JPEG frames
    Mjpeg,
    /// RGB24 format - uncompressed RGB data
    Rgb24,
    /// 8-bit grayscale
    Gray8,
}

impl FrameFormat {
    /// Get bytes per pixel for the format
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            FrameFormat::Mjpeg => 0, // Variable size, compressed
            FrameFormat::Rgb24 => 3,
            FrameFormat::Gray8 => 1,
        }
    }

    /// Check if format is compressed
    pub fn is_compressed(&self) -> bool {
        matches!(self, FrameFormat::Mjpeg)
    }
}

/// Frame data structure containing raw frame data and metadata
#[derive(Debug, Clone)]
pub struct FrameData {
    /// Unique frame identifier
    pub id: u64,
    /// Timestamp when frame was captured
    pub timestamp: SystemTime,
    /// Raw frame data (shared ownership for efficiency)
    pub data: Arc<Vec<u8>>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Frame format
    pub format: FrameFormat,
}

impl FrameData {
    /// Create a new frame data instance
    pub fn new(
        id: u64,
        timestamp: SystemTime,
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: FrameFormat,
    ) -> Self {
        Self {
            id,
            timestamp,
            data: Arc::new(data),
            width,
            height,
            format,
        }
    }

    /// Uniform RGB frame of the given gray level
    pub fn solid(id: u64, width: u32, height: u32, level: u8) -> Self {
        let len = width as usize * height as usize * 3;
        Self::new(
            id,
            SystemTime::now(),
            vec![level; len],
            width,
            height,
            FrameFormat::Rgb24,
        )
    }

    /// Same pixels under a new identifier
    pub fn with_id(&self, id: u64) -> Self {
        Self {
            id,
            timestamp: SystemTime::now(),
            data: Arc::clone(&self.data),
            width: self.width,
            height: self.height,
            format: self.format,
        }
    }

    /// Get the expected frame size for uncompressed formats
    pub fn expected_size(&self) -> Option<usize> {
        if self.format.is_compressed() {
            None
        } else {
            Some(self.width as usize * self.height as usize * self.format.bytes_per_pixel())
        }
    }

    /// Validate frame data size against expected size
    pub fn validate_size(&self) -> bool {
        match self.expected_size() {
            Some(expected) => self.data.len() == expected,
            None => true,
        }
    }

    /// Get frame age in milliseconds
    pub fn age_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.timestamp)
            .unwrap_or_default()
            .as_millis() as u64
    }

    /// Mean of (r + g + b) / 3 over a sampled grid, 0-255
    pub fn mean_brightness(&self) -> Result<f64> {
        match self.format {
            FrameFormat::Mjpeg => {
                let image = self.to_rgb_image()?;
                Ok(sample_mean(image.width(), image.height(), |x, y| {
                    let p = image.get_pixel(x, y);
                    luma(p[0], p[1], p[2])
                }))
            }
            FrameFormat::Rgb24 => {
                self.check_size()?;
                let data = &self.data;
                let stride = self.width as usize * 3;
                Ok(sample_mean(self.width, self.height, |x, y| {
                    let i = y as usize * stride + x as usize * 3;
                    luma(data[i], data[i + 1], data[i + 2])
                }))
            }
            FrameFormat::Gray8 => {
                self.check_size()?;
                let data = &self.data;
                let stride = self.width as usize;
                Ok(sample_mean(self.width, self.height, |x, y| {
                    data[y as usize * stride + x as usize] as f64
                }))
            }
        }
    }

    /// Decode or wrap the frame as an RGB image
    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        match self.format {
            FrameFormat::Mjpeg => Ok(image::load_from_memory(&self.data)?.to_rgb8()),
            FrameFormat::Rgb24 => {
                RgbImage::from_raw(self.width, self.height, self.data.to_vec()).ok_or_else(|| {
                    FitcamError::Image {
                        details: format!(
                            "RGB frame {} has {} bytes, expected {}",
                            self.id,
                            self.data.len(),
                            self.width as usize * self.height as usize * 3
                        ),
                    }
                })
            }
            FrameFormat::Gray8 => {
                let gray = GrayImage::from_raw(self.width, self.height, self.data.to_vec())
                    .ok_or_else(|| FitcamError::Image {
                        details: format!("Gray frame {} has an invalid size", self.id),
                    })?;
                Ok(DynamicImage::ImageLuma8(gray).to_rgb8())
            }
        }
    }

    /// JPEG still of this frame, optionally mirrored to match the preview
    pub fn encode_jpeg(&self, mirror: bool, quality: u8) -> Result<ImageData> {
        let mut image = self.to_rgb_image()?;
        if mirror {
            image = imageops::flip_horizontal(&image);
        }

        let mut buffer = Vec::new();
        JpegEncoder::new_with_quality(&mut buffer, quality).encode_image(&image)?;

        Ok(ImageData::new("image/jpeg", buffer))
    }

    fn check_size(&self) -> Result<()> {
        if self.validate_size() {
            Ok(())
        } else {
            Err(FitcamError::Image {
                details: format!(
                    "Frame {} has {} bytes, expected {:?}",
                    self.id,
                    self.data.len(),
                    self.expected_size()
                ),
            })
        }
    }
}

fn luma(r: u8, g: u8, b: u8) -> f64 {
    (r as f64 + g as f64 + b as f64) / 3.0
}

fn sample_mean<F>(width: u32, height: u32, pixel: F) -> f64
where
    F: Fn(u32, u32) -> f64,
{
    if width == 0 || height == 0 {
        return 0.0;
    }

    let (width, height) = (width as u64, height as u64);
    let cols = width.min(BRIGHTNESS_SAMPLE_GRID);
    let rows = height.min(BRIGHTNESS_SAMPLE_GRID);

    let mut sum = 0.0;
    for row in 0..rows {
        let y = (row * height / rows) as u32;
        for col in 0..cols {
            let x = (col * width / cols) as u32;
            sum += pixel(x, y);
        }
    }

    sum / (rows * cols) as f64
}
