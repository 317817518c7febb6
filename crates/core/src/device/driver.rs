//! Default-device streams built on cpal.
//!
//! cpal delivers and requests audio from its own callback threads. A ring
//! buffer bridges each callback to the blocking read/write calls of the
//! backend, and a condvar wakes the blocked caller whenever the callback has
//! made progress. A stream error ends any blocked call with a driver error.

use std::{
    sync::{Arc, Condvar, Mutex},
    time::Duration,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SampleRate, SizedSample, StreamConfig};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::{debug, error, info};

use super::{AudioSink, AudioSource};
use crate::{
    config::{InputConfig, OutputConfig},
    error::StreamDirection,
    Result, SonicFrameError,
};

/// Upper bound on a single wait, so a missed notification only costs this long.
const WAIT_SLICE: Duration = Duration::from_millis(10);

/// Shared between a stream's callbacks and the blocked caller. The data
/// callback wakes the caller after each period; the error callback records
/// why the stream died so the caller stops waiting for data that never comes.
#[derive(Debug, Default)]
struct StreamSignal {
    failure: Mutex<Option<String>>,
    cvar: Condvar,
}

type Signal = Arc<StreamSignal>;

fn poisoned<T>(_: T) -> SonicFrameError {
    SonicFrameError::msg("audio signal has been poisoned")
}

impl StreamSignal {
    fn notify(&self) {
        self.cvar.notify_one();
    }

    /// Records the first failure reported for the stream and wakes the caller.
    fn fail(&self, reason: String) {
        if let Ok(mut failure) = self.failure.lock() {
            failure.get_or_insert(reason);
        }
        self.cvar.notify_all();
    }

    fn check(&self) -> Result<()> {
        let failure = self.failure.lock().map_err(poisoned)?;
        failed(failure.as_deref())
    }

    /// Waits one slice for the callback to make progress.
    fn wait(&self) -> Result<()> {
        let failure = self.failure.lock().map_err(poisoned)?;
        failed(failure.as_deref())?;
        let (failure, _) = self
            .cvar
            .wait_timeout(failure, WAIT_SLICE)
            .map_err(poisoned)?;
        failed(failure.as_deref())
    }
}

fn failed(failure: Option<&str>) -> Result<()> {
    match failure {
        Some(reason) => Err(SonicFrameError::driver("stream", reason)),
        None => Ok(()),
    }
}

/// Picks a supported configuration that runs at exactly `sample_rate`,
/// preferring the fewest channels and then `preferred` as sample format.
fn select_config(
    ranges: impl Iterator<Item = cpal::SupportedStreamConfigRange>,
    sample_rate: u32,
    preferred: SampleFormat,
    direction: StreamDirection,
) -> Result<cpal::SupportedStreamConfig> {
    let rate = SampleRate(sample_rate);
    ranges
        .filter(|range| range.min_sample_rate() <= rate && rate <= range.max_sample_rate())
        .filter(|range| {
            matches!(
                range.sample_format(),
                SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16
            )
        })
        .min_by_key(|range| (range.channels(), range.sample_format() != preferred))
        .map(|range| range.with_sample_rate(rate))
        .ok_or_else(|| {
            SonicFrameError::driver(
                "select_config",
                format!("default {direction} device does not support {sample_rate} Hz"),
            )
        })
}

/// Output stream on the default device, fed mono `f32` samples.
pub struct CpalOutput {
    producer: HeapProd<f32>,
    signal: Signal,
    _stream: cpal::Stream,
}

/// Opens and starts the default output device at the configured rate.
pub fn open_output(config: &OutputConfig) -> Result<CpalOutput> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(SonicFrameError::DeviceUnavailable(StreamDirection::Output))?;

    let ranges = device
        .supported_output_configs()
        .map_err(|e| SonicFrameError::driver("supported_output_configs", e))?;
    let supported = select_config(
        ranges,
        config.sample_rate,
        SampleFormat::F32,
        StreamDirection::Output,
    )?;
    let sample_format = supported.sample_format();
    let stream_config: StreamConfig = supported.into();

    // One second of audio, matching the length of a rendered frame.
    let ring = HeapRb::<f32>::new(config.sample_rate as usize);
    let (producer, consumer) = ring.split();
    let signal = Signal::default();

    let stream = match sample_format {
        SampleFormat::F32 => {
            build_output_stream::<f32>(&device, &stream_config, consumer, signal.clone())?
        }
        SampleFormat::I16 => {
            build_output_stream::<i16>(&device, &stream_config, consumer, signal.clone())?
        }
        SampleFormat::U16 => {
            build_output_stream::<u16>(&device, &stream_config, consumer, signal.clone())?
        }
        other => {
            return Err(SonicFrameError::driver(
                "build_output_stream",
                format!("unsupported sample format {other:?}"),
            ))
        }
    };
    stream
        .play()
        .map_err(|e| SonicFrameError::driver("play", e))?;

    info!(
        sample_rate = config.sample_rate,
        channels = stream_config.channels,
        ?sample_format,
        "output stream started"
    );

    Ok(CpalOutput {
        producer,
        signal,
        _stream: stream,
    })
}

fn build_output_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut consumer: HeapCons<f32>,
    signal: Signal,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32> + Send + 'static,
{
    let channels = usize::from(config.channels).max(1);
    let failures = signal.clone();
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    let value = consumer.try_pop().unwrap_or(0.0);
                    let sample = <T as cpal::Sample>::from_sample(value);
                    frame.fill(sample);
                }
                signal.notify();
            },
            move |err| {
                error!(%err, "audio output stream error");
                failures.fail(err.to_string());
            },
            None,
        )
        .map_err(|e| SonicFrameError::driver("build_output_stream", e))
}

impl AudioSink for CpalOutput {
    fn write(&mut self, samples: &[f32]) -> Result<()> {
        self.signal.check()?;
        let mut remaining = samples;
        while !remaining.is_empty() {
            let pushed = self.producer.push_slice(remaining);
            remaining = &remaining[pushed..];
            if !remaining.is_empty() {
                self.signal.wait()?;
            }
        }
        Ok(())
    }
}

/// Input stream on the default device, delivering the first channel as
/// 16-bit samples. The stream only runs while a read is in progress.
pub struct CpalInput {
    consumer: HeapCons<i16>,
    signal: Signal,
    stream: cpal::Stream,
}

/// Opens the default input device at the configured rate. The stream is left
/// paused until the first read.
pub fn open_input(config: &InputConfig) -> Result<CpalInput> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(SonicFrameError::DeviceUnavailable(StreamDirection::Input))?;

    let ranges = device
        .supported_input_configs()
        .map_err(|e| SonicFrameError::driver("supported_input_configs", e))?;
    let supported = select_config(
        ranges,
        config.sample_rate,
        SampleFormat::I16,
        StreamDirection::Input,
    )?;
    let sample_format = supported.sample_format();
    let stream_config: StreamConfig = supported.into();

    let ring = HeapRb::<i16>::new(config.capture_len * 4);
    let (producer, consumer) = ring.split();
    let signal = Signal::default();

    let stream = match sample_format {
        SampleFormat::I16 => {
            build_input_stream::<i16>(&device, &stream_config, producer, signal.clone())?
        }
        SampleFormat::F32 => {
            build_input_stream::<f32>(&device, &stream_config, producer, signal.clone())?
        }
        SampleFormat::U16 => {
            build_input_stream::<u16>(&device, &stream_config, producer, signal.clone())?
        }
        other => {
            return Err(SonicFrameError::driver(
                "build_input_stream",
                format!("unsupported sample format {other:?}"),
            ))
        }
    };
    stream
        .pause()
        .map_err(|e| SonicFrameError::driver("pause", e))?;

    info!(
        sample_rate = config.sample_rate,
        channels = stream_config.channels,
        ?sample_format,
        "input stream opened"
    );

    Ok(CpalInput {
        consumer,
        signal,
        stream,
    })
}

fn build_input_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: HeapProd<i16>,
    signal: Signal,
) -> Result<cpal::Stream>
where
    T: SizedSample + Send + 'static,
    i16: FromSample<T>,
{
    let channels = usize::from(config.channels).max(1);
    let failures = signal.clone();
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                for frame in data.chunks(channels) {
                    let sample = <i16 as cpal::Sample>::from_sample(frame[0]);
                    // A full ring means nobody is reading; drop the excess.
                    if producer.try_push(sample).is_err() {
                        break;
                    }
                }
                signal.notify();
            },
            move |err| {
                error!(%err, "audio input stream error");
                failures.fail(err.to_string());
            },
            None,
        )
        .map_err(|e| SonicFrameError::driver("build_input_stream", e))
}

impl AudioSource for CpalInput {
    fn read(&mut self, buffer: &mut [i16]) -> Result<()> {
        // Samples left over from before the last pause are stale.
        self.consumer.clear();
        self.signal.check()?;
        self.stream
            .play()
            .map_err(|e| SonicFrameError::driver("play", e))?;

        // Pause even when the capture failed; the capture error wins.
        let captured = self.capture(buffer);
        let paused = self
            .stream
            .pause()
            .map_err(|e| SonicFrameError::driver("pause", e));
        captured?;
        paused?;

        debug!(samples = buffer.len(), "capture complete");
        Ok(())
    }
}

impl CpalInput {
    fn capture(&mut self, buffer: &mut [i16]) -> Result<()> {
        let mut filled = 0;
        while filled < buffer.len() {
            filled += self.consumer.pop_slice(&mut buffer[filled..]);
            if filled < buffer.len() {
                self.signal.wait()?;
            }
        }
        Ok(())
    }
}

/// Name and capabilities of a device on the default host.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub direction: StreamDirection,
    pub is_default: bool,
    pub sample_rates: Vec<(u32, u32)>,
}

/// Lists the output and input devices of the default host.
pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    let host = cpal::default_host();
    let default_output = host.default_output_device().and_then(|d| d.name().ok());
    let default_input = host.default_input_device().and_then(|d| d.name().ok());

    let mut infos = Vec::new();
    let outputs = host
        .output_devices()
        .map_err(|e| SonicFrameError::driver("output_devices", e))?;
    for device in outputs {
        let name = device.name().unwrap_or_else(|_| "Unknown Device".to_string());
        let sample_rates = device
            .supported_output_configs()
            .map(|ranges| {
                ranges
                    .map(|r| (r.min_sample_rate().0, r.max_sample_rate().0))
                    .collect()
            })
            .unwrap_or_default();
        infos.push(DeviceInfo {
            is_default: default_output.as_deref() == Some(name.as_str()),
            name,
            direction: StreamDirection::Output,
            sample_rates,
        });
    }

    let inputs = host
        .input_devices()
        .map_err(|e| SonicFrameError::driver("input_devices", e))?;
    for device in inputs {
        let name = device.name().unwrap_or_else(|_| "Unknown Device".to_string());
        let sample_rates = device
            .supported_input_configs()
            .map(|ranges| {
                ranges
                    .map(|r| (r.min_sample_rate().0, r.max_sample_rate().0))
                    .collect()
            })
            .unwrap_or_default();
        infos.push(DeviceInfo {
            is_default: default_input.as_deref() == Some(name.as_str()),
            name,
            direction: StreamDirection::Input,
            sample_rates,
        });
    }

    Ok(infos)
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Instant};

    use super::*;

    #[test]
    fn healthy_stream_waits_one_slice() {
        let signal = Signal::default();
        let start = Instant::now();
        signal.wait().unwrap();
        signal.check().unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn failed_stream_reports_a_driver_error() {
        let signal = Signal::default();
        signal.fail("device unplugged".to_string());
        signal.fail("later failure".to_string());

        let err = signal.wait().unwrap_err();
        assert!(err.is_device_failure());
        assert!(err.to_string().contains("device unplugged"));
        assert!(signal.check().is_err());
    }

    #[test]
    fn failure_from_the_callback_thread_ends_the_wait_loop() {
        let signal = Signal::default();
        let failures = signal.clone();
        let callback = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            failures.fail("stream stopped".to_string());
        });

        let mut waits = 0;
        let err = loop {
            match signal.wait() {
                Ok(()) => waits += 1,
                Err(err) => break err,
            }
            assert!(waits < 1_000, "wait loop never saw the failure");
        };
        callback.join().unwrap();
        assert!(matches!(err, SonicFrameError::Driver { call: "stream", .. }));
    }
}
