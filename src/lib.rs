//! Tone stream decoder and PWM playback engine
//!
//! Decodes a compact, byte-encoded musical event stream (the output of a
//! MIDI-to-tones compiler) and drives it onto variable-frequency,
//! variable-duty pulse outputs with millisecond timing.
//!
//! # Stream format
//! | Range | Meaning |
//! |---|---|
//! | `0x90..=0x96` | Note-On for voice 0-6, followed by the pitch |
//! | `0x80..=0x86` | Note-Off for voice 0-6 |
//! | `0xF0` | End of song |
//! | `0xE0` | Loop song (restart at position 0) |
//! | `0x00..=0x0F` | High byte of a big-endian millisecond delay |
//! | anything else | Skipped |
//!
//! The opcode table and voice count are configurable through
//! [`config::EngineConfig`].
//!
//! # Quick start
//! ```no_run
//! use tonestream::channel::RecordingBackend;
//! use tonestream::config::EngineConfig;
//! use tonestream::delay::BusyWaitDelay;
//! use tonestream::source::MemorySource;
//! use tonestream::Player;
//!
//! let config = EngineConfig::default();
//! let backend = RecordingBackend::new();
//! let mut player = Player::new(config, backend, BusyWaitDelay::new()).unwrap();
//! let mut song = MemorySource::new(vec![0x90, 60, 0x01, 0x2C, 0x80, 0xF0]);
//! let summary = player.play_song(&mut song).unwrap();
//! println!("stopped: {:?}", summary.stop_reason);
//! ```

#![warn(missing_docs)]

pub mod channel; // Channel Map & slice sharing
pub mod config; // Engine configuration
pub mod delay; // Delay Engine
#[cfg(feature = "export")]
pub mod export; // Timeline export (WAV/CSV)
pub mod loader; // Song file loading
pub mod opcode; // Opcode Classifier
pub mod pitch; // Pitch/Duty conversion
pub mod player; // Playback State Machine
pub mod scanner; // Operand Scanner
pub mod source; // Byte sources

/// Error types for tone stream decoding and playback
#[derive(thiserror::Error, Debug)]
pub enum PlayerError {
    /// The stream could not be decoded; playback of the current song was aborted
    #[error("Decode error at byte {position} (opcode 0x{opcode:02X}): {reason}")]
    Decode {
        /// Cursor position of the offending opcode
        position: usize,
        /// The opcode byte
        opcode: u8,
        /// What was missing or malformed
        reason: String,
    },

    /// IO error from a file-backed source or export
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Error while parsing a song file
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Error writing an export file
    #[error("Export error: {0}")]
    ExportError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for PlayerError {
    fn from(msg: String) -> Self {
        PlayerError::Other(msg)
    }
}

impl From<&str> for PlayerError {
    fn from(msg: &str) -> Self {
        PlayerError::Other(msg.to_string())
    }
}

/// Result type for playback operations
pub type Result<T> = std::result::Result<T, PlayerError>;

// Public API exports
pub use channel::{ChannelMap, OutputId, PwmBackend, RecordingBackend, Voice};
pub use config::EngineConfig;
pub use delay::{BusyWaitDelay, CancelToken, Delay, VirtualClock, VirtualDelay};
pub use opcode::{Opcode, OpcodeTable};
pub use pitch::{percent_to_duty, pitch_to_frequency};
pub use player::{PlaybackState, PlaybackSummary, Player, StopReason};
pub use source::{ByteSource, MemorySource, StreamSource};
