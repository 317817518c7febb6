use std::{fs::File, io::BufWriter, path::PathBuf};

use hound::{SampleFormat, WavSpec, WavWriter};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{device::AudioSink, Result, SonicFrameError};

/// Configuration options for the recording sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingSettings {
    pub output_path: PathBuf,
    pub sample_rate: u32,
}

impl RecordingSettings {
    pub fn new(output_path: impl Into<PathBuf>, sample_rate: u32) -> Self {
        Self {
            output_path: output_path.into(),
            sample_rate,
        }
    }
}

/// Sink that writes sonified frames to a mono 32-bit float WAV file instead of
/// a device. Frames are stored back to back, one second each.
pub struct WavRecorder {
    settings: RecordingSettings,
    writer: Option<WavWriter<BufWriter<File>>>,
    samples_written: u64,
}

impl WavRecorder {
    pub fn create(settings: RecordingSettings) -> Result<Self> {
        let spec = WavSpec {
            channels: 1,
            sample_rate: settings.sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let writer = WavWriter::create(&settings.output_path, spec)?;
        Ok(Self {
            settings,
            writer: Some(writer),
            samples_written: 0,
        })
    }

    pub fn is_recording(&self) -> bool {
        self.writer.is_some()
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }
}

impl AudioSink for WavRecorder {
    fn write(&mut self, samples: &[f32]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| SonicFrameError::msg("recording has already been finished"))?;
        for sample in samples {
            writer.write_sample(*sample)?;
        }
        self.samples_written += samples.len() as u64;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
            info!(
                path = %self.settings.output_path.display(),
                samples = self.samples_written,
                "recording finished"
            );
        }
        Ok(())
    }
}

impl std::fmt::Debug for WavRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WavRecorder")
            .field("settings", &self.settings)
            .field("samples_written", &self.samples_written)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_readable_float_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.wav");
        let mut recorder = WavRecorder::create(RecordingSettings::new(&path, 8_000)).unwrap();

        recorder.write(&[0.0, 0.5, -0.5]).unwrap();
        recorder.write(&[1.25]).unwrap();
        assert!(recorder.is_recording());
        recorder.finish().unwrap();
        assert!(!recorder.is_recording());
        assert_eq!(recorder.samples_written(), 4);

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 8_000);
        assert_eq!(reader.spec().channels, 1);
        let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0.0, 0.5, -0.5, 1.25]);
    }

    #[test]
    fn writing_after_finish_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("done.wav");
        let mut recorder = WavRecorder::create(RecordingSettings::new(path, 8_000)).unwrap();
        recorder.finish().unwrap();
        recorder.finish().unwrap();
        assert!(recorder.write(&[0.1]).is_err());
    }
}
