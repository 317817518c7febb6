use std::time::Duration;

use tracing::{debug, info, trace};

use crate::{
    config::{AppConfig, BackendProfile},
    device::{AudioSink, AudioSource},
    timing::{self, FramePacer, TickClock},
    FrameSonifier, FrameView, KeyEvent, KeyEventQueue, Result, SonicFrameError, SpectralDecoder,
};

/// Audio backend façade owned by the host.
///
/// Holds every piece of state the backend needs: the clock anchor, the pacer,
/// the sonifier, the key decoder with its event queue, and the open devices.
/// Which devices are required depends on the [`BackendProfile`].
pub struct AudioBackend {
    profile: BackendProfile,
    clock: TickClock,
    pacer: FramePacer,
    sonifier: FrameSonifier,
    decoder: SpectralDecoder,
    events: KeyEventQueue,
    capture: Vec<i16>,
    output: Option<Box<dyn AudioSink>>,
    input: Option<Box<dyn AudioSource>>,
}

impl AudioBackend {
    /// Opens the default devices the configured profile needs.
    ///
    /// Devices opened before a later failure are released before the error is
    /// returned.
    pub fn initialize(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let (output, input) = open_devices(&config)?;
        Self::with_devices(config, output, input)
    }

    /// Builds a backend around caller-supplied devices. Devices the profile
    /// does not use are dropped.
    pub fn with_devices(
        config: AppConfig,
        output: Option<Box<dyn AudioSink>>,
        input: Option<Box<dyn AudioSource>>,
    ) -> Result<Self> {
        config.validate()?;
        let profile = config.profile;

        let output = if profile.plays_audio() {
            Some(output.ok_or_else(|| {
                SonicFrameError::config(format!("profile {profile:?} requires an output device"))
            })?)
        } else {
            None
        };
        let input = if profile.captures_input() {
            Some(input.ok_or_else(|| {
                SonicFrameError::config(format!("profile {profile:?} requires an input device"))
            })?)
        } else {
            None
        };

        let decoder = SpectralDecoder::new(&config.input)?;
        let events = KeyEventQueue::with_capacity(decoder.keymap().len());

        info!(
            ?profile,
            width = config.frame.width,
            height = config.frame.height,
            output_rate = config.output.sample_rate,
            input_rate = config.input.sample_rate,
            keys = decoder.keymap().len(),
            "audio backend initialized"
        );

        Ok(Self {
            profile,
            clock: TickClock::start(),
            pacer: FramePacer::new(Duration::from_millis(u64::from(config.output.frame_time_ms))),
            sonifier: FrameSonifier::new(&config.frame, config.output.sample_rate),
            decoder,
            events,
            capture: vec![0; config.input.capture_len],
            output,
            input,
        })
    }

    pub fn profile(&self) -> BackendProfile {
        self.profile
    }

    /// Sonifies `frame` and plays it once the previous frame's slot is over.
    /// Does nothing without an output device.
    pub fn render_frame(&mut self, frame: &FrameView<'_>) -> Result<()> {
        let Some(output) = self.output.as_mut() else {
            return Ok(());
        };

        let samples = self.sonifier.render(frame)?;
        let waited = self.pacer.wait_for_slot();
        output.write(samples)?;
        self.pacer.mark_frame_start();

        trace!(?waited, samples = samples.len(), "frame played");
        Ok(())
    }

    /// Returns the next key transition, capturing and decoding a fresh input
    /// buffer when the previous batch has been drained. Without an input
    /// device there are never any events.
    pub fn poll_key_event(&mut self) -> Result<Option<KeyEvent>> {
        let Some(input) = self.input.as_mut() else {
            return Ok(None);
        };

        if self.events.needs_refill() {
            // A failed read leaves the queue asking for a capture.
            input.read(&mut self.capture)?;
            self.events.begin_cycle();
            let queued = self.decoder.decode(&self.capture, &mut self.events)?;
            if queued > 0 {
                debug!(queued, "decoded key transitions");
            }
        }

        Ok(self.events.pop())
    }

    /// Milliseconds since the backend was created.
    pub fn elapsed_ms(&self) -> u32 {
        self.clock.elapsed_ms()
    }

    pub fn sleep_ms(&self, ms: u32) {
        timing::sleep_ms(ms);
    }

    /// There is no window to title; the call is accepted and ignored.
    pub fn set_window_title(&mut self, title: &str) {
        trace!(title, "ignoring window title");
    }

    /// Flushes the output device, if any.
    pub fn finish(&mut self) -> Result<()> {
        match self.output.as_mut() {
            Some(output) => output.finish(),
            None => Ok(()),
        }
    }
}

type Devices = (Option<Box<dyn AudioSink>>, Option<Box<dyn AudioSource>>);

#[cfg(feature = "driver")]
fn open_devices(config: &AppConfig) -> Result<Devices> {
    use crate::device::{open_input, open_output};

    let output: Option<Box<dyn AudioSink>> = if config.profile.plays_audio() {
        Some(Box::new(open_output(&config.output)?))
    } else {
        None
    };
    let input: Option<Box<dyn AudioSource>> = if config.profile.captures_input() {
        Some(Box::new(open_input(&config.input)?))
    } else {
        None
    };
    Ok((output, input))
}

#[cfg(not(feature = "driver"))]
fn open_devices(config: &AppConfig) -> Result<Devices> {
    if config.profile.plays_audio() {
        return Err(SonicFrameError::driver(
            "open_devices",
            "built without the `driver` feature",
        ));
    }
    Ok((None, None))
}

impl std::fmt::Debug for AudioBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioBackend")
            .field("profile", &self.profile)
            .field("sonifier", &self.sonifier)
            .field("decoder", &self.decoder)
            .field("events", &self.events)
            .field("has_output", &self.output.is_some())
            .field("has_input", &self.input.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::{
        config::{FrameConfig, InputConfig, OutputConfig},
        device::{MemorySink, ScriptedSource},
        Key, ToneController,
    };

    /// Fails its first read, then behaves like the wrapped script.
    struct FlakySource {
        failed: bool,
        inner: ScriptedSource,
    }

    impl AudioSource for FlakySource {
        fn read(&mut self, buffer: &mut [i16]) -> Result<()> {
            if !self.failed {
                self.failed = true;
                return Err(SonicFrameError::driver("read", "stream interrupted"));
            }
            self.inner.read(buffer)
        }
    }

    const WIDTH: usize = 4;
    const HEIGHT: usize = 2;

    fn test_config(profile: BackendProfile, frame_time_ms: u32) -> AppConfig {
        AppConfig {
            profile,
            frame: FrameConfig {
                width: WIDTH,
                height: HEIGHT,
                top_frequency_hz: 300.0,
                ..FrameConfig::default()
            },
            output: OutputConfig {
                sample_rate: 1_000,
                frame_time_ms,
            },
            input: InputConfig {
                sample_rate: 128_000,
                ..InputConfig::default()
            },
        }
    }

    fn lit_pixels() -> Vec<u32> {
        vec![0x00ff_ffff; WIDTH * HEIGHT]
    }

    #[test]
    fn null_profile_does_no_io() {
        let sink = MemorySink::new();
        let source = ScriptedSource::new();
        let mut backend = AudioBackend::with_devices(
            test_config(BackendProfile::Null, 0),
            Some(Box::new(sink.clone())),
            Some(Box::new(source.clone())),
        )
        .unwrap();

        let pixels = lit_pixels();
        let frame = FrameView::new(&pixels, WIDTH, HEIGHT).unwrap();
        backend.render_frame(&frame).unwrap();
        for _ in 0..3 {
            assert_eq!(backend.poll_key_event().unwrap(), None);
        }

        assert!(sink.is_empty().unwrap());
        assert_eq!(source.reads().unwrap(), 0);

        let before = backend.elapsed_ms();
        backend.sleep_ms(15);
        assert!(backend.elapsed_ms() >= before + 15);
    }

    #[test]
    fn null_profile_needs_no_devices() {
        let backend =
            AudioBackend::initialize(test_config(BackendProfile::Null, 0)).unwrap();
        assert_eq!(backend.profile(), BackendProfile::Null);
    }

    #[test]
    fn output_only_plays_one_second_per_frame() {
        let sink = MemorySink::new();
        let mut backend = AudioBackend::with_devices(
            test_config(BackendProfile::OutputOnly, 0),
            Some(Box::new(sink.clone())),
            None,
        )
        .unwrap();

        let pixels = lit_pixels();
        let frame = FrameView::new(&pixels, WIDTH, HEIGHT).unwrap();
        backend.render_frame(&frame).unwrap();
        backend.set_window_title("ignored");

        let buffers = sink.buffers().unwrap();
        assert_eq!(buffers.len(), 1);
        assert_eq!(buffers[0].samples.len(), 1_000);
        assert_eq!(backend.poll_key_event().unwrap(), None);
    }

    #[test]
    fn black_frame_plays_silence() {
        let sink = MemorySink::new();
        let mut backend = AudioBackend::with_devices(
            test_config(BackendProfile::OutputOnly, 0),
            Some(Box::new(sink.clone())),
            None,
        )
        .unwrap();

        let pixels = vec![0_u32; WIDTH * HEIGHT];
        let frame = FrameView::new(&pixels, WIDTH, HEIGHT).unwrap();
        backend.render_frame(&frame).unwrap();

        let buffers = sink.buffers().unwrap();
        assert!(buffers[0].samples.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn frames_start_at_least_one_frame_time_apart() {
        let frame_time = Duration::from_millis(60);
        let sink = MemorySink::new();
        let mut backend = AudioBackend::with_devices(
            test_config(BackendProfile::OutputOnly, 60),
            Some(Box::new(sink.clone())),
            None,
        )
        .unwrap();

        let pixels = lit_pixels();
        let frame = FrameView::new(&pixels, WIDTH, HEIGHT).unwrap();
        let start = Instant::now();
        backend.render_frame(&frame).unwrap();
        backend.render_frame(&frame).unwrap();

        let buffers = sink.buffers().unwrap();
        assert_eq!(buffers.len(), 2);
        assert!(buffers[1].at.duration_since(buffers[0].at) >= frame_time);
        assert!(start.elapsed() >= frame_time);
    }

    #[test]
    fn rejects_wrong_frame_size() {
        let mut backend = AudioBackend::with_devices(
            test_config(BackendProfile::OutputOnly, 0),
            Some(Box::new(MemorySink::new())),
            None,
        )
        .unwrap();

        let pixels = vec![0_u32; 4];
        let frame = FrameView::new(&pixels, 2, 2).unwrap();
        assert!(matches!(
            backend.render_frame(&frame),
            Err(SonicFrameError::FrameSize { .. })
        ));
    }

    #[test]
    fn missing_devices_are_reported() {
        let err = AudioBackend::with_devices(
            test_config(BackendProfile::Full, 0),
            Some(Box::new(MemorySink::new())),
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("input device"));

        let err =
            AudioBackend::with_devices(test_config(BackendProfile::OutputOnly, 0), None, None)
                .unwrap_err();
        assert!(err.to_string().contains("output device"));
    }

    #[test]
    fn polling_captures_once_per_drained_cycle() {
        let config = test_config(BackendProfile::Full, 0);
        let mut controller = ToneController::from_config(&config.input);
        controller.press(Key::Fire).unwrap();
        controller.press(Key::Tab).unwrap();

        let mut backend = AudioBackend::with_devices(
            config,
            Some(Box::new(MemorySink::new())),
            Some(Box::new(controller)),
        )
        .unwrap();

        assert_eq!(
            backend.poll_key_event().unwrap(),
            Some(KeyEvent::new(Key::Fire, true))
        );
        assert_eq!(
            backend.poll_key_event().unwrap(),
            Some(KeyEvent::new(Key::Tab, true))
        );
        // Drained: the next poll is empty, the one after captures again and
        // finds nothing new while the keys stay held.
        assert_eq!(backend.poll_key_event().unwrap(), None);
        assert_eq!(backend.poll_key_event().unwrap(), None);
        assert_eq!(backend.poll_key_event().unwrap(), None);
    }

    #[test]
    fn scripted_captures_drive_press_and_release() {
        let config = test_config(BackendProfile::Full, 0);
        let mut controller = ToneController::from_config(&config.input);
        controller.press(Key::UpArrow).unwrap();
        let mut held = vec![0_i16; config.input.capture_len];
        controller.fill_pcm16(&mut held);

        let source = ScriptedSource::new();
        source.push_capture(held).unwrap();
        let mut backend = AudioBackend::with_devices(
            config,
            Some(Box::new(MemorySink::new())),
            Some(Box::new(source.clone())),
        )
        .unwrap();

        assert_eq!(
            backend.poll_key_event().unwrap(),
            Some(KeyEvent::new(Key::UpArrow, true))
        );
        assert_eq!(backend.poll_key_event().unwrap(), None);
        assert_eq!(source.reads().unwrap(), 1);

        // The script is exhausted, so the next capture is silence.
        assert_eq!(
            backend.poll_key_event().unwrap(),
            Some(KeyEvent::new(Key::UpArrow, false))
        );
        assert_eq!(source.reads().unwrap(), 2);
    }

    #[test]
    fn empty_capture_still_reports_no_event() {
        let source = ScriptedSource::new();
        let mut backend = AudioBackend::with_devices(
            test_config(BackendProfile::Full, 0),
            Some(Box::new(MemorySink::new())),
            Some(Box::new(source.clone())),
        )
        .unwrap();

        assert_eq!(backend.poll_key_event().unwrap(), None);
        assert_eq!(source.reads().unwrap(), 1);
        assert_eq!(backend.poll_key_event().unwrap(), None);
        assert_eq!(source.reads().unwrap(), 2);
    }

    #[test]
    fn failed_capture_is_retried_on_the_next_poll() {
        let config = test_config(BackendProfile::Full, 0);
        let mut controller = ToneController::from_config(&config.input);
        controller.press(Key::Fire).unwrap();
        let mut held = vec![0_i16; config.input.capture_len];
        controller.fill_pcm16(&mut held);

        let script = ScriptedSource::new();
        script.push_capture(held).unwrap();
        let flaky = FlakySource {
            failed: false,
            inner: script.clone(),
        };
        let mut backend = AudioBackend::with_devices(
            config,
            Some(Box::new(MemorySink::new())),
            Some(Box::new(flaky)),
        )
        .unwrap();

        let err = backend.poll_key_event().unwrap_err();
        assert!(err.is_device_failure());
        assert_eq!(script.reads().unwrap(), 0);

        assert_eq!(
            backend.poll_key_event().unwrap(),
            Some(KeyEvent::new(Key::Fire, true))
        );
        assert_eq!(script.reads().unwrap(), 1);
    }
}
