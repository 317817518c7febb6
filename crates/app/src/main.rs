use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use sonicframe_core::{
    AppConfig, AudioBackend, AudioSink, BackendProfile, FrameSonifier, FrameView, Key,
    RecordingSettings, SonicFrameError, ToneController, WavRecorder,
};
use tracing_subscriber::EnvFilter;

fn main() -> sonicframe_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            profile,
            frames,
            fallback_null,
        } => run(config.as_deref(), profile, frames, fallback_null),
        Commands::Tone {
            keys,
            seconds,
            output,
        } => play_tones(&keys, seconds, output.as_deref()),
        Commands::Render {
            input,
            output,
            config,
        } => render_to_wav(&input, &output, config.as_deref()),
        Commands::Devices => list_devices(),
    }
}

fn load_config(path: Option<&Path>) -> sonicframe_core::Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load(path),
        None => Ok(AppConfig::default()),
    }
}

fn run(
    config_path: Option<&Path>,
    profile: Option<ProfileArg>,
    frames: Option<u64>,
    fallback_null: bool,
) -> sonicframe_core::Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(profile) = profile {
        config.profile = profile.into();
    }
    tracing::info!(profile = ?config.profile, ?frames, "starting backend");

    let mut backend = match AudioBackend::initialize(config.clone()) {
        Ok(backend) => backend,
        Err(err) if fallback_null && err.is_device_failure() => {
            tracing::warn!(%err, "audio devices unavailable, continuing without audio");
            AudioBackend::initialize(config.clone().with_profile(BackendProfile::Null))?
        }
        Err(err) => return Err(err),
    };
    backend.set_window_title("SonicFrame");

    let (width, height) = (config.frame.width, config.frame.height);
    let mut pixels = vec![0_u32; width * height];
    let mut index = 0_u64;
    while frames.map_or(true, |limit| index < limit) {
        paint_test_pattern(&mut pixels, width, height, index);
        let frame = FrameView::new(&pixels, width, height)?;
        backend.render_frame(&frame)?;

        while let Some(event) = backend.poll_key_event()? {
            tracing::info!(
                key = %event.key,
                code = event.key.code(),
                pressed = event.pressed,
                "key event"
            );
        }

        if !backend.profile().plays_audio() {
            // Nothing paces a silent backend, so keep the demo at frame rate.
            backend.sleep_ms(config.output.frame_time_ms);
        }
        tracing::debug!(frame = index, ticks_ms = backend.elapsed_ms(), "frame done");
        index += 1;
    }

    backend.finish()
}

/// Draws a bright band that walks down the screen, one eighth of the height
/// per frame, so the played tone steps downward in pitch.
fn paint_test_pattern(pixels: &mut [u32], width: usize, height: usize, index: u64) {
    let band = (height / 8).max(1);
    let top = (index as usize * band) % height;
    for (y, row) in pixels.chunks_mut(width).enumerate() {
        let lit = y >= top && y < top + band;
        let value = if lit { 0xff_ff_ff_ff } else { 0xff_00_00_00 };
        row.fill(value);
    }
}

fn play_tones(keys: &[Key], seconds: f32, output: Option<&Path>) -> sonicframe_core::Result<()> {
    let config = AppConfig::default();
    let mut controller = ToneController::from_config(&config.input);
    for key in keys {
        controller.press(*key)?;
    }
    tracing::info!(?keys, seconds, "playing controller tones");

    let mut sink = open_tone_sink(&config, output)?;
    let total = (seconds.max(0.0) * controller.sample_rate() as f32) as usize;
    let mut block = vec![0.0_f32; 1024];
    let mut remaining = total;
    while remaining > 0 {
        let len = remaining.min(block.len());
        controller.fill(&mut block[..len]);
        sink.write(&block[..len])?;
        remaining -= len;
    }
    sink.finish()
}

fn open_tone_sink(
    config: &AppConfig,
    output: Option<&Path>,
) -> sonicframe_core::Result<Box<dyn AudioSink>> {
    if let Some(path) = output {
        let settings = RecordingSettings::new(path, config.input.sample_rate);
        return Ok(Box::new(WavRecorder::create(settings)?));
    }
    open_speaker(config)
}

#[cfg(feature = "driver")]
fn open_speaker(config: &AppConfig) -> sonicframe_core::Result<Box<dyn AudioSink>> {
    let mut output = config.output.clone();
    output.sample_rate = config.input.sample_rate;
    Ok(Box::new(sonicframe_core::device::open_output(&output)?))
}

#[cfg(not(feature = "driver"))]
fn open_speaker(_config: &AppConfig) -> sonicframe_core::Result<Box<dyn AudioSink>> {
    Err(SonicFrameError::driver(
        "open_output",
        "built without the `driver` feature; pass --output to write a WAV file",
    ))
}

fn render_to_wav(
    input: &Path,
    output: &Path,
    config_path: Option<&Path>,
) -> sonicframe_core::Result<()> {
    let config = load_config(config_path)?;
    tracing::info!(?input, ?output, "rendering frames to WAV");

    let bytes = std::fs::read(input)?;
    let frame_bytes = config.frame.pixel_count() * 4;
    if bytes.is_empty() || bytes.len() % frame_bytes != 0 {
        return Err(SonicFrameError::msg(format!(
            "{} is {} bytes, not a whole number of {}x{} BGRA frames",
            input.display(),
            bytes.len(),
            config.frame.width,
            config.frame.height
        )));
    }

    let mut sonifier = FrameSonifier::new(&config.frame, config.output.sample_rate);
    let mut recorder =
        WavRecorder::create(RecordingSettings::new(output, config.output.sample_rate))?;
    for chunk in bytes.chunks_exact(frame_bytes) {
        let pixels: Vec<u32> = chunk
            .chunks_exact(4)
            .map(|cell| u32::from_le_bytes([cell[0], cell[1], cell[2], cell[3]]))
            .collect();
        let frame = FrameView::new(&pixels, config.frame.width, config.frame.height)?;
        recorder.write(sonifier.render(&frame)?)?;
    }
    recorder.finish()
}

#[cfg(feature = "driver")]
fn list_devices() -> sonicframe_core::Result<()> {
    for device in sonicframe_core::device::list_devices()? {
        let marker = if device.is_default { "*" } else { " " };
        println!(
            "{marker} {:<6} {} {:?}",
            device.direction.to_string(),
            device.name,
            device.sample_rates
        );
    }
    Ok(())
}

#[cfg(not(feature = "driver"))]
fn list_devices() -> sonicframe_core::Result<()> {
    Err(SonicFrameError::driver(
        "list_devices",
        "built without the `driver` feature",
    ))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Plays frames as sound and reads keys from tones", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drive the backend with a moving test pattern and log decoded keys.
    Run {
        /// JSON configuration file. Defaults apply to anything it omits.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Override the configured backend profile.
        #[arg(short, long, value_enum)]
        profile: Option<ProfileArg>,
        /// Stop after this many frames instead of running forever.
        #[arg(short, long)]
        frames: Option<u64>,
        /// Fall back to the null profile when audio devices fail to open.
        #[arg(long)]
        fallback_null: bool,
    },
    /// Sound the controller tones for the given keys.
    Tone {
        /// Keys to hold, e.g. `fire` or `right_arrow`. May be repeated.
        #[arg(short = 'k', long = "key", required = true)]
        keys: Vec<Key>,
        /// How long to hold the keys.
        #[arg(short, long, default_value_t = 1.0)]
        seconds: f32,
        /// Write the tones to a WAV file instead of the speaker.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Sonify a raw BGRA frame file (one or more frames) into a WAV file.
    Render {
        /// Raw pixel file, four bytes per pixel in blue, green, red, alpha order.
        input: PathBuf,
        /// Output path for the WAV file.
        output: PathBuf,
        /// JSON configuration file supplying the frame size and sample rate.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// List the audio devices of the default host.
    Devices,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ProfileArg {
    Full,
    OutputOnly,
    Null,
}

impl From<ProfileArg> for BackendProfile {
    fn from(value: ProfileArg) -> Self {
        match value {
            ProfileArg::Full => Self::Full,
            ProfileArg::OutputOnly => Self::OutputOnly,
            ProfileArg::Null => Self::Null,
        }
    }
}
