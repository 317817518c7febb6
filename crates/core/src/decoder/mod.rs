use std::{fmt, str::FromStr, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    config::{InputConfig, KeyBinding},
    KeyEvent, KeyEventQueue, Result, SonicFrameError,
};

/// Keys a tone can signal, carrying the game's key codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Key {
    RightArrow,
    LeftArrow,
    UpArrow,
    DownArrow,
    Use,
    Fire,
    Escape,
    Enter,
    Tab,
    Digit1,
    Digit2,
    Digit3,
    Digit4,
    Digit5,
    Digit6,
}

impl Key {
    pub const ALL: [Key; 15] = [
        Self::RightArrow,
        Self::LeftArrow,
        Self::UpArrow,
        Self::DownArrow,
        Self::Use,
        Self::Fire,
        Self::Escape,
        Self::Enter,
        Self::Tab,
        Self::Digit1,
        Self::Digit2,
        Self::Digit3,
        Self::Digit4,
        Self::Digit5,
        Self::Digit6,
    ];

    /// Name used in configuration files and on the command line.
    pub fn name(self) -> &'static str {
        match self {
            Self::RightArrow => "right_arrow",
            Self::LeftArrow => "left_arrow",
            Self::UpArrow => "up_arrow",
            Self::DownArrow => "down_arrow",
            Self::Use => "use",
            Self::Fire => "fire",
            Self::Escape => "escape",
            Self::Enter => "enter",
            Self::Tab => "tab",
            Self::Digit1 => "digit1",
            Self::Digit2 => "digit2",
            Self::Digit3 => "digit3",
            Self::Digit4 => "digit4",
            Self::Digit5 => "digit5",
            Self::Digit6 => "digit6",
        }
    }

    /// Key code understood by the game host.
    pub fn code(self) -> u8 {
        match self {
            Self::RightArrow => 0xae,
            Self::LeftArrow => 0xac,
            Self::UpArrow => 0xad,
            Self::DownArrow => 0xaf,
            Self::Use => 0xa2,
            Self::Fire => 0xa3,
            Self::Escape => 27,
            Self::Enter => 13,
            Self::Tab => 9,
            Self::Digit1 => b'1',
            Self::Digit2 => b'2',
            Self::Digit3 => b'3',
            Self::Digit4 => b'4',
            Self::Digit5 => b'5',
            Self::Digit6 => b'6',
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Key {
    type Err = SonicFrameError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|key| key.name() == s)
            .ok_or_else(|| SonicFrameError::msg(format!("unknown key `{s}`")))
    }
}

/// Index into the packed transform output for `frequency_hz`.
///
/// The packed layout interleaves real and imaginary parts, so the index is
/// twice the spectral bin: `round(f * M * 2 / sample_rate)`.
pub fn bin_index_for(frequency_hz: f64, capture_len: usize, sample_rate: u32) -> usize {
    (frequency_hz * capture_len as f64 * 2.0 / f64::from(sample_rate)).round() as usize
}

/// One row of the key table together with its last observed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyMapping {
    pub bin_index: usize,
    pub key: Key,
    pub pressed: bool,
}

/// Key table fixed at construction. Only the `pressed` flags change.
#[derive(Debug, Clone)]
pub struct KeyMap {
    entries: Vec<KeyMapping>,
}

impl KeyMap {
    pub fn new(bindings: &[KeyBinding], capture_len: usize, sample_rate: u32) -> Result<Self> {
        let entries = bindings
            .iter()
            .map(|binding| {
                let bin_index = bin_index_for(binding.frequency_hz, capture_len, sample_rate);
                if bin_index >= capture_len {
                    return Err(SonicFrameError::config(format!(
                        "{:?} at {} Hz is outside the {capture_len}-sample capture",
                        binding.key, binding.frequency_hz
                    )));
                }
                Ok(KeyMapping {
                    bin_index,
                    key: binding.key,
                    pressed: false,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[KeyMapping] {
        &self.entries
    }

    pub fn is_pressed(&self, key: Key) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.key == key && entry.pressed)
    }
}

/// Classifies short captures into key transitions by thresholding single
/// coefficients of a real FFT.
///
/// The comparison is a hard cutoff with no hysteresis. A tone hovering around
/// the threshold produces a press/release pair on alternate captures.
pub struct SpectralDecoder {
    keymap: KeyMap,
    threshold: f32,
    capture_len: usize,
    fft: FftResources,
}

impl SpectralDecoder {
    pub fn new(config: &InputConfig) -> Result<Self> {
        if config.capture_len < 2 || !config.capture_len.is_power_of_two() {
            return Err(SonicFrameError::config(
                "capture_len must be a power of two of at least 2",
            ));
        }
        let keymap = KeyMap::new(&config.keys, config.capture_len, config.sample_rate)?;
        Ok(Self {
            keymap,
            threshold: config.threshold,
            capture_len: config.capture_len,
            fft: FftResources::new(config.capture_len),
        })
    }

    pub fn keymap(&self) -> &KeyMap {
        &self.keymap
    }

    pub fn capture_len(&self) -> usize {
        self.capture_len
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Transforms one capture and appends a [`KeyEvent`] for every key whose
    /// state flipped, in table order. Returns the number of events queued.
    pub fn decode(&mut self, samples: &[i16], queue: &mut KeyEventQueue) -> Result<usize> {
        if samples.len() != self.capture_len {
            return Err(SonicFrameError::InvalidInput(
                "capture length does not match the decoder",
            ));
        }

        for (slot, sample) in self.fft.input.iter_mut().zip(samples) {
            *slot = f32::from(*sample) / 32768.0;
        }
        self.fft.plan.process_with_scratch(
            &mut self.fft.input,
            &mut self.fft.spectrum,
            &mut self.fft.scratch,
        )?;

        let mut queued = 0;
        for entry in &mut self.keymap.entries {
            let magnitude = packed_coefficient(&self.fft.spectrum, entry.bin_index).abs();
            let pressed = magnitude > self.threshold;
            if pressed != entry.pressed {
                entry.pressed = pressed;
                let event = KeyEvent::new(entry.key, pressed);
                debug!(key = ?event.key, pressed, magnitude, "key transition");
                queue.push(event)?;
                queued += 1;
            }
        }
        Ok(queued)
    }
}

/// Reads the complex spectrum as if it were laid out in the packed real form:
/// `[Re(0), Re(M/2), Re(1), Im(1), Re(2), Im(2), ...]`.
fn packed_coefficient(spectrum: &[Complex32], index: usize) -> f32 {
    match index {
        0 => spectrum[0].re,
        1 => spectrum[spectrum.len() - 1].re,
        _ if index % 2 == 0 => spectrum[index / 2].re,
        _ => spectrum[index / 2].im,
    }
}

struct FftResources {
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl FftResources {
    fn new(size: usize) -> Self {
        let plan = RealFftPlanner::<f32>::new().plan_fft_forward(size);
        let scratch = plan.make_scratch_vec();
        let spectrum = plan.make_output_vec();
        let input = plan.make_input_vec();
        Self {
            plan,
            scratch,
            spectrum,
            input,
        }
    }
}

impl fmt::Debug for SpectralDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectralDecoder")
            .field("keymap", &self.keymap)
            .field("threshold", &self.threshold)
            .field("capture_len", &self.capture_len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::f64::consts::TAU;

    use super::*;

    // At 128 kHz a 128-sample capture has 1 kHz bins, so every default key
    // frequency lands exactly on the real part of a bin.
    const ALIGNED_RATE: u32 = 128_000;

    fn aligned_config() -> InputConfig {
        InputConfig {
            sample_rate: ALIGNED_RATE,
            ..InputConfig::default()
        }
    }

    fn cosine(frequency: f64, amplitude: f64, len: usize, rate: u32) -> Vec<i16> {
        (0..len)
            .map(|n| {
                let value = amplitude * (TAU * frequency * n as f64 / f64::from(rate)).cos();
                (value * 32767.0).round() as i16
            })
            .collect()
    }

    fn decode_once(decoder: &mut SpectralDecoder, samples: &[i16]) -> Vec<KeyEvent> {
        let mut queue = KeyEventQueue::with_capacity(decoder.keymap().len());
        queue.begin_cycle();
        decoder.decode(samples, &mut queue).unwrap();
        std::iter::from_fn(|| queue.pop()).collect()
    }

    #[test]
    fn default_bins_match_packed_layout() {
        let indices: Vec<usize> = KeyBinding::default_table()
            .iter()
            .map(|b| bin_index_for(b.frequency_hz, 128, 44_100))
            .collect();
        assert_eq!(indices[0], 12);
        assert_eq!(indices[1], 17);
        assert_eq!(indices[14], 93);
    }

    #[test]
    fn bin_index_is_deterministic() {
        for binding in KeyBinding::default_table() {
            let first = bin_index_for(binding.frequency_hz, 128, 44_100);
            let second = bin_index_for(binding.frequency_hz, 128, 44_100);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn rejects_bins_past_the_capture() {
        let bindings = [KeyBinding::new(40_000.0, Key::Fire)];
        assert!(KeyMap::new(&bindings, 128, 44_100).is_err());
    }

    #[test]
    fn single_tone_presses_exactly_one_key() {
        let mut decoder = SpectralDecoder::new(&aligned_config()).unwrap();
        let samples = cosine(7_000.0, 0.25, 128, ALIGNED_RATE);

        let events = decode_once(&mut decoder, &samples);
        assert_eq!(events, vec![KeyEvent::new(Key::Fire, true)]);
        assert!(decoder.keymap().is_pressed(Key::Fire));
        assert!(!decoder.keymap().is_pressed(Key::Use));
    }

    #[test]
    fn single_tone_presses_one_key_at_default_rate() {
        let config = InputConfig::default();
        let mut decoder = SpectralDecoder::new(&config).unwrap();
        let samples = cosine(7_000.0, 0.1, config.capture_len, config.sample_rate);

        let events = decode_once(&mut decoder, &samples);
        assert_eq!(events, vec![KeyEvent::new(Key::Fire, true)]);
        assert!(!decoder.keymap().is_pressed(Key::Use));
        assert!(!decoder.keymap().is_pressed(Key::Escape));
    }

    #[test]
    fn held_tone_reports_no_further_events() {
        let mut decoder = SpectralDecoder::new(&aligned_config()).unwrap();
        let samples = cosine(2_000.0, 0.25, 128, ALIGNED_RATE);

        assert_eq!(decode_once(&mut decoder, &samples).len(), 1);
        assert!(decode_once(&mut decoder, &samples).is_empty());
    }

    #[test]
    fn silence_releases_held_keys() {
        let mut decoder = SpectralDecoder::new(&aligned_config()).unwrap();
        decode_once(&mut decoder, &cosine(4_000.0, 0.25, 128, ALIGNED_RATE));

        let events = decode_once(&mut decoder, &[0; 128]);
        assert_eq!(events, vec![KeyEvent::new(Key::UpArrow, false)]);
    }

    #[test]
    fn two_tones_report_in_table_order() {
        let mut decoder = SpectralDecoder::new(&aligned_config()).unwrap();
        let high = cosine(16_000.0, 0.2, 128, ALIGNED_RATE);
        let low = cosine(3_000.0, 0.2, 128, ALIGNED_RATE);
        let mixed: Vec<i16> = high.iter().zip(&low).map(|(a, b)| a + b).collect();

        let events = decode_once(&mut decoder, &mixed);
        assert_eq!(
            events,
            vec![
                KeyEvent::new(Key::LeftArrow, true),
                KeyEvent::new(Key::Digit6, true),
            ]
        );
    }

    #[test]
    fn hard_threshold_chatters_at_the_boundary() {
        // Re(k) of an aligned cosine is amplitude * M / 2, so amplitudes
        // either side of 1 / 64 straddle the threshold of 1.0.
        let mut decoder = SpectralDecoder::new(&aligned_config()).unwrap();
        let above = cosine(5_000.0, 0.0165, 128, ALIGNED_RATE);
        let below = cosine(5_000.0, 0.0150, 128, ALIGNED_RATE);

        for _ in 0..3 {
            assert_eq!(
                decode_once(&mut decoder, &above),
                vec![KeyEvent::new(Key::DownArrow, true)]
            );
            assert_eq!(
                decode_once(&mut decoder, &below),
                vec![KeyEvent::new(Key::DownArrow, false)]
            );
        }
    }

    #[test]
    fn rejects_wrong_capture_length() {
        let mut decoder = SpectralDecoder::new(&InputConfig::default()).unwrap();
        let mut queue = KeyEventQueue::with_capacity(15);
        queue.begin_cycle();
        assert!(decoder.decode(&[0; 64], &mut queue).is_err());
    }

    #[test]
    fn key_names_parse_back() {
        for key in Key::ALL {
            assert_eq!(key.to_string().parse::<Key>().unwrap(), key);
        }
        assert!("jump".parse::<Key>().is_err());
    }

    #[test]
    fn key_names_match_config_spelling() {
        let json = serde_json::to_string(&Key::RightArrow).unwrap();
        assert_eq!(json, format!("\"{}\"", Key::RightArrow.name()));
    }

    #[test]
    fn key_codes_match_the_game() {
        assert_eq!(Key::Fire.code(), 0xa3);
        assert_eq!(Key::Escape.code(), 27);
        assert_eq!(Key::Digit4.code(), b'4');
    }
}
