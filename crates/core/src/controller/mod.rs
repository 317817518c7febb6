//! Tone-emitting controller: the sending side of the key decoder.
//!
//! Each held key sounds a continuous tone at its bound frequency. Played into
//! a microphone, the mix is what the decoder turns back into key events.

use std::f64::consts::TAU;

use crate::{
    config::{InputConfig, KeyBinding},
    device::AudioSource,
    Key, Result, SonicFrameError,
};

/// Per-tone level. Louder tones leak into neighbouring key bins when the
/// capture rate does not align key frequencies with bins (44.1 kHz does not).
pub const DEFAULT_TONE_AMPLITUDE: f32 = 0.1;

#[derive(Debug, Clone)]
pub struct ToneController {
    sample_rate: u32,
    amplitude: f32,
    bindings: Vec<KeyBinding>,
    held: Vec<KeyBinding>,
    position: u64,
}

impl ToneController {
    pub fn new(bindings: Vec<KeyBinding>, sample_rate: u32, amplitude: f32) -> Self {
        Self {
            sample_rate,
            amplitude,
            bindings,
            held: Vec::new(),
            position: 0,
        }
    }

    /// Controller for the key table and rate the decoder listens with.
    pub fn from_config(config: &InputConfig) -> Self {
        Self::new(config.keys.clone(), config.sample_rate, DEFAULT_TONE_AMPLITUDE)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn held_keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.held.iter().map(|binding| binding.key)
    }

    /// Starts the tone for `key`. Returns false if it was already sounding.
    pub fn press(&mut self, key: Key) -> Result<bool> {
        if self.held.iter().any(|binding| binding.key == key) {
            return Ok(false);
        }
        let binding = self
            .bindings
            .iter()
            .find(|binding| binding.key == key)
            .copied()
            .ok_or_else(|| SonicFrameError::msg(format!("{key:?} has no tone bound")))?;
        self.held.push(binding);
        Ok(true)
    }

    /// Stops the tone for `key`. Returns false if it was not sounding.
    pub fn release(&mut self, key: Key) -> bool {
        let before = self.held.len();
        self.held.retain(|binding| binding.key != key);
        self.held.len() != before
    }

    pub fn release_all(&mut self) {
        self.held.clear();
    }

    /// Writes the next `out.len()` samples of the mix. Tones start in cosine
    /// phase and stay continuous across calls; the sum is clamped to [-1, 1].
    pub fn fill(&mut self, out: &mut [f32]) {
        let rate = f64::from(self.sample_rate);
        for (offset, slot) in out.iter_mut().enumerate() {
            let t = (self.position + offset as u64) as f64 / rate;
            let mix: f64 = self
                .held
                .iter()
                .map(|binding| (TAU * binding.frequency_hz * t).cos())
                .sum();
            *slot = (mix as f32 * self.amplitude).clamp(-1.0, 1.0);
        }
        self.position += out.len() as u64;
    }

    /// Like [`fill`](Self::fill) but as signed 16-bit PCM.
    pub fn fill_pcm16(&mut self, out: &mut [i16]) {
        let mut mix = vec![0.0_f32; out.len()];
        self.fill(&mut mix);
        for (slot, value) in out.iter_mut().zip(mix) {
            *slot = (value * 32767.0).round() as i16;
        }
    }
}

impl AudioSource for ToneController {
    fn read(&mut self, buffer: &mut [i16]) -> Result<()> {
        self.fill_pcm16(buffer);
        Ok(())
    }
}
