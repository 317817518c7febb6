//! Picture-to-sound conversion.
//!
//! Every row of the frame contributes one sinusoid. Row 0 sounds highest and
//! the last row lowest, each weighted by the brightness of the pixel the
//! current output sample maps onto. One frame always yields one output buffer
//! of `sample_rate` samples.

use std::f64::consts::TAU;

use crate::{config::FrameConfig, Result, SonicFrameError};

/// One pixel cell as laid out in a host screen buffer: blue in the low byte,
/// alpha in the high byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bgra {
    pub b: u8,
    pub g: u8,
    pub r: u8,
    pub a: u8,
}

impl Bgra {
    pub const fn new(b: u8, g: u8, r: u8, a: u8) -> Self {
        Self { b, g, r, a }
    }

    /// Sum of the colour channels, 0..=765. Alpha is ignored.
    pub fn intensity(self) -> u16 {
        self.b as u16 + self.g as u16 + self.r as u16
    }
}

impl From<u32> for Bgra {
    fn from(value: u32) -> Self {
        let [b, g, r, a] = value.to_le_bytes();
        Self { b, g, r, a }
    }
}

impl From<Bgra> for u32 {
    fn from(value: Bgra) -> Self {
        u32::from_le_bytes([value.b, value.g, value.r, value.a])
    }
}

/// Borrowed, row-major view over a host screen buffer.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    pixels: &'a [u32],
    width: usize,
    height: usize,
}

impl<'a> FrameView<'a> {
    pub fn new(pixels: &'a [u32], width: usize, height: usize) -> Result<Self> {
        let expected = width * height;
        if pixels.len() != expected {
            return Err(SonicFrameError::FrameSize {
                width,
                height,
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            pixels,
            width,
            height,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixel(&self, x: usize, y: usize) -> Bgra {
        Bgra::from(self.pixels[y * self.width + x])
    }
}

/// Turns frames of a fixed size into one second of mono audio.
#[derive(Debug)]
pub struct FrameSonifier {
    width: usize,
    height: usize,
    normalization: f32,
    row_frequencies: Vec<f64>,
    samples: Vec<f32>,
}

impl FrameSonifier {
    pub fn new(frame: &FrameConfig, sample_rate: u32) -> Self {
        let height = frame.height;
        let step = frame.top_frequency_hz / height as f64;
        let row_frequencies = (0..height)
            .map(|y| (height + 1 - y) as f64 * step)
            .collect();

        Self {
            width: frame.width,
            height,
            normalization: frame.normalization_per_row * height as f32,
            row_frequencies,
            samples: vec![0.0; sample_rate as usize],
        }
    }

    /// Number of samples produced per frame.
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Divisor applied to each row sum.
    pub fn normalization(&self) -> f32 {
        self.normalization
    }

    /// Partial frequency assigned to row `y`.
    pub fn row_frequency(&self, y: usize) -> Option<f64> {
        self.row_frequencies.get(y).copied()
    }

    /// Largest magnitude a sample can reach: every row at full brightness
    /// with every sinusoid at its peak.
    pub fn peak_amplitude(&self) -> f32 {
        765.0 * self.height as f32 / self.normalization
    }

    /// Synthesizes the buffer for `frame`. The previous buffer is overwritten.
    pub fn render(&mut self, frame: &FrameView<'_>) -> Result<&[f32]> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(SonicFrameError::FrameSize {
                width: self.width,
                height: self.height,
                expected: self.width * self.height,
                actual: frame.width() * frame.height(),
            });
        }

        let count = self.samples.len();
        for (x, slot) in self.samples.iter_mut().enumerate() {
            // Several samples share a column whenever count > width.
            let column = x * self.width / count;
            let phase = TAU * x as f64 / count as f64;

            let mut sum = 0.0_f32;
            for (y, frequency) in self.row_frequencies.iter().enumerate() {
                let intensity = frame.pixel(column, y).intensity();
                if intensity == 0 {
                    continue;
                }
                sum += intensity as f32 * (phase * frequency).sin() as f32;
            }
            *slot = sum / self.normalization;
        }

        Ok(&self.samples)
    }
}
