//! Opcode classification
//!
//! The stream separates structural bytes (opcodes) from data bytes (operands)
//! purely by value range, so classification is a set-membership test that
//! needs no context beyond the byte itself.

use crate::channel::Voice;
use serde::{Deserialize, Serialize};

/// Bytes below this value are delay markers (high nibble clear).
pub const DELAY_MARKER_LIMIT: u8 = 0x10;

/// Classified meaning of a single stream byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Start (or retune) a note on the voice; operands follow
    NoteOn(Voice),
    /// Silence the voice; optional delay operands follow
    NoteOff(Voice),
    /// Stop playback
    EndOfSong,
    /// Restart from position 0
    LoopSong,
    /// High byte of a big-endian millisecond delay; the next byte is the low byte
    DelayMarker,
    /// Not an opcode; skipped by the player
    Unclassified,
}

impl Opcode {
    /// Whether this byte begins an instruction (terminates an operand run)
    pub fn is_instruction(&self) -> bool {
        !matches!(self, Opcode::Unclassified)
    }

    /// Note, end, or loop code: a byte that can never be a Note-On pitch
    pub fn is_event(&self) -> bool {
        !matches!(self, Opcode::DelayMarker | Opcode::Unclassified)
    }
}

/// Byte ranges assigned to each instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpcodeTable {
    /// Note-On code for voice 0; voice `n` uses `note_on_base + n`
    pub note_on_base: u8,
    /// Note-Off code for voice 0; voice `n` uses `note_off_base + n`
    pub note_off_base: u8,
    /// Number of addressable voices (taken from the voice table, not serialized)
    #[serde(skip)]
    pub voice_count: u8,
    /// End-of-song sentinel
    pub end_of_song: u8,
    /// Loop-song sentinel
    pub loop_song: u8,
}

impl Default for OpcodeTable {
    fn default() -> Self {
        OpcodeTable {
            note_on_base: 0x90,
            note_off_base: 0x80,
            voice_count: 7,
            end_of_song: 0xF0,
            loop_song: 0xE0,
        }
    }
}

impl OpcodeTable {
    /// Table with the reference codes and the given number of voices
    pub fn with_voices(voice_count: u8) -> Self {
        OpcodeTable {
            voice_count,
            ..Self::default()
        }
    }

    /// Classify one byte
    pub fn classify(&self, byte: u8) -> Opcode {
        if let Some(voice) = Self::voice_in_range(byte, self.note_on_base, self.voice_count) {
            return Opcode::NoteOn(voice);
        }
        if let Some(voice) = Self::voice_in_range(byte, self.note_off_base, self.voice_count) {
            return Opcode::NoteOff(voice);
        }
        if byte == self.end_of_song {
            Opcode::EndOfSong
        } else if byte == self.loop_song {
            Opcode::LoopSong
        } else if byte < DELAY_MARKER_LIMIT {
            Opcode::DelayMarker
        } else {
            Opcode::Unclassified
        }
    }

    /// Whether the byte terminates an operand run
    pub fn is_opcode(&self, byte: u8) -> bool {
        self.classify(byte).is_instruction()
    }

    /// Note-On code for a voice
    pub fn note_on_code(&self, voice: Voice) -> u8 {
        self.note_on_base.wrapping_add(voice.index() as u8)
    }

    /// Note-Off code for a voice
    pub fn note_off_code(&self, voice: Voice) -> u8 {
        self.note_off_base.wrapping_add(voice.index() as u8)
    }

    fn voice_in_range(byte: u8, base: u8, count: u8) -> Option<Voice> {
        let offset = byte.checked_sub(base)?;
        if offset < count {
            Voice::from_index(offset as usize)
        } else {
            None
        }
    }
}
