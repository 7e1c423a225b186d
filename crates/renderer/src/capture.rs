use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use image::imageops::flip_vertical_in_place;
use image::{DynamicImage, ImageFormat, RgbImage, RgbaImage};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to write frame {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("frame buffer holds {actual} bytes, expected {expected}")]
    Size { expected: usize, actual: usize },
    #[error("failed to encode frame {}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Tightly packed RGB8 frame with a bottom-left origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RgbFrame {
    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 3
    }

    /// Converts a GPU readback (RGBA8, top-left origin, rows padded to
    /// `padded_bytes_per_row`) into a bottom-left RGB frame.
    pub fn from_padded_rgba(
        width: u32,
        height: u32,
        padded_bytes_per_row: u32,
        mapped: &[u8],
    ) -> Result<Self, CaptureError> {
        let unpadded = width as usize * 4;
        let padded = padded_bytes_per_row as usize;
        let expected = padded * height as usize;
        if padded < unpadded || mapped.len() < expected {
            return Err(CaptureError::Size {
                expected,
                actual: mapped.len(),
            });
        }

        let mut tight = Vec::with_capacity(unpadded * height as usize);
        for row in mapped.chunks(padded).take(height as usize) {
            tight.extend_from_slice(&row[..unpadded]);
        }
        let mut rgba = RgbaImage::from_raw(width, height, tight).ok_or(CaptureError::Size {
            expected: unpadded * height as usize,
            actual: mapped.len(),
        })?;
        flip_vertical_in_place(&mut rgba);

        Ok(Self {
            width,
            height,
            pixels: DynamicImage::ImageRgba8(rgba).to_rgb8().into_raw(),
        })
    }
}

/// Destination for rendered frames.
pub trait FrameSink {
    /// Whether the loop should read frames back at all.
    fn wants_frames(&self) -> bool;
    fn write_frame(&mut self, frame: &RgbFrame) -> Result<(), CaptureError>;
}

/// Live playback: frames are shown and dropped.
#[derive(Debug, Default)]
pub struct DiscardSink;

impl FrameSink for DiscardSink {
    fn wants_frames(&self) -> bool {
        false
    }

    fn write_frame(&mut self, _frame: &RgbFrame) -> Result<(), CaptureError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureFormat {
    /// Headerless RGB8, bottom-left origin.
    #[default]
    Raw,
    /// PNG, top-left origin.
    Png,
}

impl CaptureFormat {
    fn extension(self) -> &'static str {
        match self {
            CaptureFormat::Raw => "raw",
            CaptureFormat::Png => "png",
        }
    }
}

/// Writes one file per frame, named by a five-digit frame counter.
///
/// Existing files are never overwritten.
#[derive(Debug)]
pub struct SequenceWriter {
    dir: PathBuf,
    format: CaptureFormat,
    next_index: u64,
}

impl SequenceWriter {
    pub fn new(dir: impl Into<PathBuf>, format: CaptureFormat) -> Result<Self, CaptureError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| CaptureError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            format,
            next_index: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn frames_written(&self) -> u64 {
        self.next_index
    }

    pub fn frame_path(&self, index: u64) -> PathBuf {
        self.dir
            .join(format!("{index:05}.{}", self.format.extension()))
    }

    fn encode(&self, path: &Path, file: File, frame: &RgbFrame) -> Result<(), CaptureError> {
        let io_err = |source| CaptureError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut writer = BufWriter::new(file);
        match self.format {
            CaptureFormat::Raw => writer.write_all(&frame.pixels).map_err(io_err)?,
            CaptureFormat::Png => {
                let mut image = RgbImage::from_raw(frame.width, frame.height, frame.pixels.clone())
                    .ok_or(CaptureError::Size {
                        expected: RgbFrame::byte_len(frame.width, frame.height),
                        actual: frame.pixels.len(),
                    })?;
                flip_vertical_in_place(&mut image);
                image
                    .write_to(&mut writer, ImageFormat::Png)
                    .map_err(|source| CaptureError::Encode {
                        path: path.to_path_buf(),
                        source,
                    })?;
            }
        }
        writer.flush().map_err(io_err)
    }
}

impl FrameSink for SequenceWriter {
    fn wants_frames(&self) -> bool {
        true
    }

    fn write_frame(&mut self, frame: &RgbFrame) -> Result<(), CaptureError> {
        let expected = RgbFrame::byte_len(frame.width, frame.height);
        if frame.pixels.len() != expected {
            return Err(CaptureError::Size {
                expected,
                actual: frame.pixels.len(),
            });
        }

        let path = self.frame_path(self.next_index);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| CaptureError::Io {
                path: path.clone(),
                source,
            })?;
        self.encode(&path, file, frame)?;
        tracing::trace!(path = %path.display(), "frame captured");
        self.next_index += 1;
        Ok(())
    }
}
