//! Core library for SonicFrame, an audio I/O backend for a portable game
//! runtime.
//!
//! Rendered frames are played as sound: each row of pixels becomes a partial
//! whose loudness follows the row's brightness. Key input travels the other
//! way, as tones picked up by the microphone and classified by FFT bin
//! magnitude. [`AudioBackend`] ties the pieces together behind the host-facing
//! operations; the remaining modules are usable on their own.

pub mod backend;
pub mod config;
pub mod controller;
pub mod decoder;
pub mod device;
pub mod error;
pub mod queue;
pub mod record;
pub mod sonify;
pub mod timing;

pub use backend::AudioBackend;
pub use config::{AppConfig, BackendProfile, FrameConfig, InputConfig, KeyBinding, OutputConfig};
pub use controller::ToneController;
pub use decoder::{bin_index_for, Key, KeyMap, KeyMapping, SpectralDecoder};
pub use device::{AudioSink, AudioSource, MemorySink, ScriptedSource};
pub use error::{Result, SonicFrameError, StreamDirection};
pub use queue::{KeyEvent, KeyEventQueue};
pub use record::{RecordingSettings, WavRecorder};
pub use sonify::{Bgra, FrameSonifier, FrameView};
pub use timing::{sleep_ms, FramePacer, TickClock};
