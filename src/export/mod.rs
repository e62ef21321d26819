//! Timeline export
//!
//! Turns the write history captured by a
//! [`RecordingBackend`](crate::channel::RecordingBackend) into files:
//! - WAV (square-wave preview of the audible outputs)
//! - CSV (one row per register write)
//!
//! Pair the backend with a [`VirtualDelay`](crate::delay::VirtualDelay) on the
//! same clock to render a song without waiting it out in real time.
//!
//! ```no_run
//! use tonestream::channel::RecordingBackend;
//! use tonestream::delay::{VirtualClock, VirtualDelay};
//! use tonestream::export::{export_timeline_wav, ExportConfig};
//! use tonestream::{EngineConfig, MemorySource, Player};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let clock = VirtualClock::new();
//! let backend = RecordingBackend::with_clock(clock.clone());
//! let recording = backend.clone();
//! let delay = VirtualDelay::with_clock(clock);
//! let mut player = Player::new(EngineConfig::default(), backend, delay)?;
//! player.play_song(&mut MemorySource::new(vec![0x90, 69, 0x01, 0xF4, 0xF0]))?;
//!
//! let outputs = player.channels().voice_outputs();
//! export_timeline_wav(&recording.events(), &outputs, "preview.wav", &ExportConfig::default())?;
//! # Ok(())
//! # }
//! ```

mod csv;
mod wav;

pub use self::csv::{export_timeline_csv, write_timeline_csv};
pub use self::wav::{export_timeline_wav, render_timeline};

/// Export configuration options
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Sample rate for export (default: 44100 Hz)
    pub sample_rate: u32,
    /// Output gain applied to the mixed voices
    pub gain: f32,
    /// Silence appended after the last write, in milliseconds
    pub tail_ms: u32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            gain: 0.5,
            tail_ms: 250,
        }
    }
}

impl ExportConfig {
    /// Set the sample rate
    pub fn sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Set the trailing silence
    pub fn tail_ms(mut self, tail_ms: u32) -> Self {
        self.tail_ms = tail_ms;
        self
    }
}
