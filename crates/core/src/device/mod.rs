//! Seams between the backend and whatever actually moves audio.
//!
//! [`AudioSink`] and [`AudioSource`] are the blocking write/read calls the
//! backend relies on. The `driver` feature provides implementations on top of
//! the system's default devices; the in-memory implementations here let hosts
//! and tests run without hardware.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
    time::Instant,
};

use crate::{Result, SonicFrameError};

#[cfg(feature = "driver")]
mod driver;

#[cfg(feature = "driver")]
pub use driver::{list_devices, open_input, open_output, CpalInput, CpalOutput, DeviceInfo};

/// Destination for sonified frames.
pub trait AudioSink {
    /// Hands `samples` to the output. May block until there is room for them.
    fn write(&mut self, samples: &[f32]) -> Result<()>;

    /// Flushes anything buffered. Called once when the host is done writing.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Origin of the captures the key decoder analyses.
pub trait AudioSource {
    /// Fills `buffer` completely, blocking until enough samples arrived.
    fn read(&mut self, buffer: &mut [i16]) -> Result<()>;
}

/// One buffer passed to a [`MemorySink`], with the instant it arrived.
#[derive(Debug, Clone)]
pub struct WrittenBuffer {
    pub at: Instant,
    pub samples: Vec<f32>,
}

/// Sink that keeps every buffer in memory. Clones share the same storage, so
/// a host can keep one handle and give the other to a backend.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    written: Arc<Mutex<Vec<WrittenBuffer>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffers(&self) -> Result<Vec<WrittenBuffer>> {
        Ok(self.lock()?.clone())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock()?.is_empty())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<WrittenBuffer>>> {
        self.written
            .lock()
            .map_err(|_| SonicFrameError::msg("memory sink has been poisoned"))
    }
}

impl AudioSink for MemorySink {
    fn write(&mut self, samples: &[f32]) -> Result<()> {
        let buffer = WrittenBuffer {
            at: Instant::now(),
            samples: samples.to_vec(),
        };
        self.lock()?.push(buffer);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Script {
    captures: VecDeque<Vec<i16>>,
    reads: usize,
}

/// Source that replays queued captures in order and then yields silence.
/// Clones share the same script.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
    script: Arc<Mutex<Script>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues one capture. Shorter captures are padded with silence, longer
    /// ones are truncated to the requested length.
    pub fn push_capture(&self, samples: Vec<i16>) -> Result<()> {
        self.lock()?.captures.push_back(samples);
        Ok(())
    }

    /// Number of reads served so far.
    pub fn reads(&self) -> Result<usize> {
        Ok(self.lock()?.reads)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Script>> {
        self.script
            .lock()
            .map_err(|_| SonicFrameError::msg("scripted source has been poisoned"))
    }
}

impl AudioSource for ScriptedSource {
    fn read(&mut self, buffer: &mut [i16]) -> Result<()> {
        let mut script = self.lock()?;
        script.reads += 1;
        buffer.fill(0);
        if let Some(capture) = script.captures.pop_front() {
            let len = capture.len().min(buffer.len());
            buffer[..len].copy_from_slice(&capture[..len]);
        }
        Ok(())
    }
}
