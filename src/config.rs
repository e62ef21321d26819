//! Engine configuration
//!
//! Wiring, opcode table, and playback parameters. Every field has a default
//! matching the reference board (7 voices on a Raspberry Pi Pico), so a JSON
//! file only needs to name what differs:
//!
//! ```json
//! { "voices": [{ "output": 6 }, { "output": 7 }, { "output": 8 }, { "output": 9 }],
//!   "intensity_percent": 40.0 }
//! ```

use crate::channel::{OutputId, MAX_VOICES};
use crate::opcode::{OpcodeTable, DELAY_MARKER_LIMIT};
use crate::{PlayerError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Wiring of one voice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Audible output pin
    pub output: OutputId,
    /// Status indicator pin, driven with the same frequency and duty
    #[serde(default)]
    pub indicator: Option<OutputId>,
    /// Extra pins that must follow this voice's frequency
    #[serde(default)]
    pub slice_partners: Vec<OutputId>,
}

impl VoiceConfig {
    /// Voice on `output` with an indicator on `indicator`
    pub fn new(output: u8, indicator: Option<u8>) -> Self {
        VoiceConfig {
            output: OutputId(output),
            indicator: indicator.map(OutputId),
            slice_partners: Vec::new(),
        }
    }
}

/// Full engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Voice table; voice `n` is entry `n`
    pub voices: Vec<VoiceConfig>,
    /// Opcode byte assignments
    pub opcodes: OpcodeTable,
    /// Intensity for every note, in percent
    pub intensity_percent: f64,
    /// Pause after silencing, before the first byte is read
    pub settle_ms: u32,
    /// Mirror frequency onto outputs sharing an RP2040 slice
    pub mirror_slices: bool,
    /// Stop after this many loop-backs (None = loop forever)
    pub max_loops: Option<u32>,
    /// Emit per-byte decode traces
    pub debug: bool,
}

/// Reference wiring: (output pin, indicator pin) per voice
const REFERENCE_WIRING: [(u8, u8); 7] = [
    (0, 18),
    (3, 20),
    (15, 21),
    (11, 26),
    (23, 17),
    (21, 25),
    (22, 26),
];

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            voices: REFERENCE_WIRING
                .iter()
                .map(|&(out, led)| VoiceConfig::new(out, Some(led)))
                .collect(),
            opcodes: OpcodeTable::default(),
            intensity_percent: 50.0,
            settle_ms: 1000,
            mirror_slices: true,
            max_loops: None,
            debug: false,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON configuration and validate it
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)
            .map_err(|e| PlayerError::ConfigError(format!("invalid JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            PlayerError::ConfigError(format!("failed to read '{}': {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| PlayerError::ConfigError(format!("failed to serialize: {}", e)))
    }

    /// Keep only the first `count` voices of the table
    pub fn with_voice_count(mut self, count: usize) -> Self {
        self.voices.truncate(count);
        self
    }

    /// Opcode table sized to the voice table
    pub fn opcode_table(&self) -> OpcodeTable {
        OpcodeTable {
            voice_count: self.voices.len().min(MAX_VOICES) as u8,
            ..self.opcodes
        }
    }

    /// Check voice count, opcode ranges, and intensity
    pub fn validate(&self) -> Result<()> {
        let n = self.voices.len();
        if n == 0 || n > MAX_VOICES {
            return Err(PlayerError::ConfigError(format!(
                "voice count must be 1..={}, got {}",
                MAX_VOICES, n
            )));
        }

        if !self.intensity_percent.is_finite() || !(0.0..=100.0).contains(&self.intensity_percent)
        {
            return Err(PlayerError::ConfigError(format!(
                "intensity_percent must be within 0..=100, got {}",
                self.intensity_percent
            )));
        }

        let table = self.opcode_table();
        let on = code_range("note-on", table.note_on_base, n)?;
        let off = code_range("note-off", table.note_off_base, n)?;

        if on.0 < u16::from(DELAY_MARKER_LIMIT) || off.0 < u16::from(DELAY_MARKER_LIMIT) {
            return Err(PlayerError::ConfigError(
                "note codes must not overlap the delay marker range 0x00-0x0F".into(),
            ));
        }
        if on.0 < off.1 && off.0 < on.1 {
            return Err(PlayerError::ConfigError(
                "note-on and note-off ranges overlap".into(),
            ));
        }

        for (name, code) in [("end_of_song", table.end_of_song), ("loop_song", table.loop_song)] {
            let code16 = u16::from(code);
            if code < DELAY_MARKER_LIMIT {
                return Err(PlayerError::ConfigError(format!(
                    "{} 0x{:02X} overlaps the delay marker range",
                    name, code
                )));
            }
            if (on.0..on.1).contains(&code16) || (off.0..off.1).contains(&code16) {
                return Err(PlayerError::ConfigError(format!(
                    "{} 0x{:02X} overlaps a note range",
                    name, code
                )));
            }
        }
        if table.end_of_song == table.loop_song {
            return Err(PlayerError::ConfigError(
                "end_of_song and loop_song must differ".into(),
            ));
        }

        Ok(())
    }
}

/// Half-open code range `[base, base + n)`, rejecting wrap past 0xFF
fn code_range(name: &str, base: u8, n: usize) -> Result<(u16, u16)> {
    let start = u16::from(base);
    let end = start + n as u16;
    if end > 0x100 {
        return Err(PlayerError::ConfigError(format!(
            "{} range 0x{:02X}+{} runs past 0xFF",
            name, base, n
        )));
    }
    Ok((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid_reference() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.voices.len(), 7);
        assert_eq!(config.opcode_table().voice_count, 7);
        assert_eq!(config.voices[2].output, OutputId(15));
        assert_eq!(config.voices[2].indicator, Some(OutputId(21)));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json(
            r#"{
                "voices": [
                    { "output": 6 }, { "output": 7 }, { "output": 8 },
                    { "output": 9 }, { "output": 10 }
                ],
                "intensity_percent": 40.0
            }"#,
        )
        .unwrap();
        assert_eq!(config.voices.len(), 5);
        assert_eq!(config.opcode_table().voice_count, 5);
        assert_eq!(config.intensity_percent, 40.0);
        assert_eq!(config.settle_ms, 1000);
        assert_eq!(config.opcodes.note_on_base, 0x90);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = EngineConfig {
            max_loops: Some(3),
            ..EngineConfig::default()
        };
        let parsed = EngineConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed.max_loops, Some(3));
        assert_eq!(parsed.voices, config.voices);
    }

    #[test]
    fn test_rejects_bad_voice_counts() {
        assert!(EngineConfig::default().with_voice_count(0).validate().is_err());
        let mut config = EngineConfig::default();
        config.voices.extend((0..2).map(|i| VoiceConfig::new(i, None)));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_overlapping_ranges() {
        let mut config = EngineConfig::default();
        config.opcodes.note_off_base = 0x93;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.opcodes.end_of_song = 0x92;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.opcodes.note_on_base = 0x08;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.opcodes.loop_song = 0xF0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_intensity() {
        let config = EngineConfig {
            intensity_percent: 120.0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            EngineConfig::from_json("{ not json"),
            Err(PlayerError::ConfigError(_))
        ));
    }
}
