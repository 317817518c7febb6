use std::fmt;

/// Result alias that carries the custom [`SonicFrameError`] type.
pub type Result<T> = std::result::Result<T, SonicFrameError>;

/// Direction of an audio stream, used to report which device is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    Output,
    Input,
}

impl fmt::Display for StreamDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Output => f.write_str("output"),
            Self::Input => f.write_str("input"),
        }
    }
}

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum SonicFrameError {
    /// Free-form message for conditions that do not warrant their own variant.
    #[error("{0}")]
    Message(String),
    /// No default device exists for the requested stream direction.
    #[error("no default {0} device available")]
    DeviceUnavailable(StreamDirection),
    /// A call into the audio driver returned an error.
    #[error("audio driver call `{call}` failed: {reason}")]
    Driver { call: &'static str, reason: String },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("frame is {actual} pixels but {width}x{height} requires {expected}")]
    FrameSize {
        width: usize,
        height: usize,
        expected: usize,
        actual: usize,
    },
    #[error("{0}")]
    InvalidInput(&'static str),
    #[error("key event queue is full ({capacity} events)")]
    QueueFull { capacity: usize },
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Fft(#[from] realfft::FftError),
    #[error("{0}")]
    Wav(#[from] hound::Error),
}

impl SonicFrameError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Wraps a driver error raised by `call`.
    pub fn driver(call: &'static str, reason: impl fmt::Display) -> Self {
        Self::Driver {
            call,
            reason: reason.to_string(),
        }
    }

    /// Returns true when the error came from the audio device layer. Hosts use
    /// this to decide whether to retry with the null profile.
    pub fn is_device_failure(&self) -> bool {
        matches!(self, Self::DeviceUnavailable(_) | Self::Driver { .. })
    }
}

impl From<&str> for SonicFrameError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for SonicFrameError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
