//! Channel Map and PWM slice sharing
//!
//! Maps each logical voice to a PWM output pin, an optional status indicator
//! pin, and the set of outputs that share its hardware slice.
//!
//! ## Slices
//! On the RP2040 every PWM slice drives two pins (channel A and B) from a
//! single counter, so both pins always run at the same frequency. Writing a
//! new frequency for one pin silently retunes its slice-mate. The map makes
//! that explicit: every frequency write on a voice is mirrored onto its slice
//! partners, while their duty is left alone.

pub mod recording;

pub use recording::{OutputEvent, OutputEventKind, OutputLog, OutputState, RecordingBackend};

use crate::config::EngineConfig;
use crate::pitch::{frequency_to_hz, percent_to_duty, pitch_to_frequency};
use crate::{PlayerError, Result};
use bitflags::bitflags;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound on simultaneously addressable voices
pub const MAX_VOICES: usize = 8;

/// Logical voice identifier
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, FromPrimitive, Serialize, Deserialize,
)]
pub enum Voice {
    /// Voice 0
    V0 = 0,
    /// Voice 1
    V1 = 1,
    /// Voice 2
    V2 = 2,
    /// Voice 3
    V3 = 3,
    /// Voice 4
    V4 = 4,
    /// Voice 5
    V5 = 5,
    /// Voice 6
    V6 = 6,
    /// Voice 7
    V7 = 7,
}

impl Voice {
    /// Voice for a table ordinal
    pub fn from_index(index: usize) -> Option<Self> {
        Voice::from_usize(index)
    }

    /// Table ordinal
    pub fn index(self) -> usize {
        self as usize
    }

    /// Single-bit mask for this voice
    pub fn mask(self) -> VoiceMask {
        VoiceMask::from_bits_truncate(1 << self.index())
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "voice {}", self.index())
    }
}

bitflags! {
    /// Set of voices (e.g. those currently sounding)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct VoiceMask: u8 {
        /// Voice 0
        const V0 = 0x01;
        /// Voice 1
        const V1 = 0x02;
        /// Voice 2
        const V2 = 0x04;
        /// Voice 3
        const V3 = 0x08;
        /// Voice 4
        const V4 = 0x10;
        /// Voice 5
        const V5 = 0x20;
        /// Voice 6
        const V6 = 0x40;
        /// Voice 7
        const V7 = 0x80;
    }
}

/// Hardware output identifier (GPIO pin number)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputId(pub u8);

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GP{}", self.0)
    }
}

/// RP2040 PWM slice driving a GPIO pin
pub fn rp2040_slice(output: OutputId) -> u8 {
    (output.0 >> 1) & 7
}

/// Hardware capability the engine drives.
///
/// Implemented by the board's PWM driver, or by [`RecordingBackend`] when no
/// hardware is present.
pub trait PwmBackend {
    /// Set the PWM frequency of an output, in Hz
    fn set_frequency(&mut self, output: OutputId, hz: u32);

    /// Set the duty of an output (0 = silent, 65535 = always high)
    fn set_duty(&mut self, output: OutputId, duty: u16);
}

impl<B: PwmBackend + ?Sized> PwmBackend for &mut B {
    fn set_frequency(&mut self, output: OutputId, hz: u32) {
        (**self).set_frequency(output, hz)
    }

    fn set_duty(&mut self, output: OutputId, duty: u16) {
        (**self).set_duty(output, duty)
    }
}

impl<B: PwmBackend + ?Sized> PwmBackend for Box<B> {
    fn set_frequency(&mut self, output: OutputId, hz: u32) {
        (**self).set_frequency(output, hz)
    }

    fn set_duty(&mut self, output: OutputId, duty: u16) {
        (**self).set_duty(output, duty)
    }
}

/// Static wiring of one voice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDescriptor {
    /// Logical voice
    pub voice: Voice,
    /// Audible output
    pub output: OutputId,
    /// Status indicator, mirrors frequency and duty
    pub indicator: Option<OutputId>,
    /// Outputs that receive this voice's frequency but keep their own duty
    pub slice_partners: Vec<OutputId>,
}

impl ChannelDescriptor {
    /// Descriptor without indicator or partners
    pub fn new(voice: Voice, output: OutputId) -> Self {
        ChannelDescriptor {
            voice,
            output,
            indicator: None,
            slice_partners: Vec::new(),
        }
    }

    /// Attach a status indicator
    pub fn with_indicator(mut self, indicator: OutputId) -> Self {
        self.indicator = Some(indicator);
        self
    }

    /// Add an explicit slice partner
    pub fn with_partner(mut self, partner: OutputId) -> Self {
        if !self.slice_partners.contains(&partner) {
            self.slice_partners.push(partner);
        }
        self
    }

    /// Outputs this voice writes duty to
    fn driven_outputs(&self) -> impl Iterator<Item = OutputId> + '_ {
        std::iter::once(self.output).chain(self.indicator)
    }
}

/// Voice-to-output table plus the live hardware it drives
#[derive(Debug)]
pub struct ChannelMap<B> {
    descriptors: Vec<ChannelDescriptor>,
    backend: B,
    active: VoiceMask,
}

impl<B: PwmBackend> ChannelMap<B> {
    /// Build a map from descriptors ordered by voice (descriptor `i` is voice `i`)
    pub fn new(descriptors: Vec<ChannelDescriptor>, backend: B) -> Result<Self> {
        if descriptors.is_empty() || descriptors.len() > MAX_VOICES {
            return Err(PlayerError::ConfigError(format!(
                "channel map needs 1..={} voices, got {}",
                MAX_VOICES,
                descriptors.len()
            )));
        }
        for (i, desc) in descriptors.iter().enumerate() {
            if desc.voice.index() != i {
                return Err(PlayerError::ConfigError(format!(
                    "descriptor {} is for {}, expected voice {}",
                    i, desc.voice, i
                )));
            }
        }

        Ok(ChannelMap {
            descriptors,
            backend,
            active: VoiceMask::empty(),
        })
    }

    /// Build the map described by an engine configuration
    pub fn from_config(config: &EngineConfig, backend: B) -> Result<Self> {
        let mut descriptors = Vec::with_capacity(config.voices.len());
        for (i, vc) in config.voices.iter().enumerate() {
            let voice = Voice::from_index(i).ok_or_else(|| {
                PlayerError::ConfigError(format!("at most {} voices supported", MAX_VOICES))
            })?;
            let mut desc = ChannelDescriptor::new(voice, vc.output);
            desc.indicator = vc.indicator;
            for &partner in &vc.slice_partners {
                desc = desc.with_partner(partner);
            }
            descriptors.push(desc);
        }

        if config.mirror_slices {
            infer_slice_partners(&mut descriptors);
        }

        let map = Self::new(descriptors, backend)?;
        map.warn_shared_pins();
        Ok(map)
    }

    /// Descriptor for a voice
    pub fn descriptor(&self, voice: Voice) -> Option<&ChannelDescriptor> {
        self.descriptors.get(voice.index())
    }

    /// All descriptors, in voice order
    pub fn descriptors(&self) -> &[ChannelDescriptor] {
        &self.descriptors
    }

    /// Number of configured voices
    pub fn voice_count(&self) -> usize {
        self.descriptors.len()
    }

    /// Outputs whose frequency follows this voice
    pub fn slice_partners(&self, voice: Voice) -> &[OutputId] {
        self.descriptor(voice)
            .map(|d| d.slice_partners.as_slice())
            .unwrap_or(&[])
    }

    /// Whether this voice shares a slice with another configured output
    pub fn shares_slice(&self, voice: Voice) -> bool {
        !self.slice_partners(voice).is_empty()
    }

    /// Audible voice outputs, in voice order
    pub fn voice_outputs(&self) -> Vec<OutputId> {
        self.descriptors.iter().map(|d| d.output).collect()
    }

    /// Every output the map may write, deduplicated
    pub fn all_outputs(&self) -> Vec<OutputId> {
        let mut outputs: Vec<OutputId> = self
            .descriptors
            .iter()
            .flat_map(|d| d.driven_outputs())
            .collect();
        outputs.sort_unstable();
        outputs.dedup();
        outputs
    }

    /// Voices with a note currently sounding
    pub fn active_voices(&self) -> VoiceMask {
        self.active
    }

    /// Play `note` on a voice at `percent` intensity.
    ///
    /// A voice that is already sounding is retuned without an intermediate stop.
    pub fn play_note(&mut self, voice: Voice, note: u8, percent: f64) {
        let hz = frequency_to_hz(pitch_to_frequency(f64::from(note)));
        let duty = percent_to_duty(percent);
        self.drive(voice, hz, duty);
    }

    /// Drive a voice at a raw frequency and duty
    pub fn drive(&mut self, voice: Voice, hz: u32, duty: u16) {
        let Some(desc) = self.descriptors.get(voice.index()) else {
            log::warn!("note on unconfigured {}, ignored", voice);
            return;
        };

        for output in desc.driven_outputs() {
            self.backend.set_frequency(output, hz);
            self.backend.set_duty(output, duty);
        }
        for &partner in &desc.slice_partners {
            self.backend.set_frequency(partner, hz);
        }

        if duty == 0 {
            self.active.remove(voice.mask());
        } else {
            self.active.insert(voice.mask());
        }
    }

    /// Silence a voice. Frequency is left as is.
    pub fn stop_channel(&mut self, voice: Voice) {
        let Some(desc) = self.descriptors.get(voice.index()) else {
            log::warn!("note off on unconfigured {}, ignored", voice);
            return;
        };

        for output in desc.driven_outputs() {
            self.backend.set_duty(output, 0);
        }
        self.active.remove(voice.mask());
    }

    /// Zero the duty of every configured output
    pub fn stop_all(&mut self) {
        for desc in &self.descriptors {
            for output in desc.driven_outputs() {
                self.backend.set_duty(output, 0);
            }
        }
        self.active = VoiceMask::empty();
    }

    /// Borrow the hardware backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutably borrow the hardware backend
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Tear down the map, returning the backend
    pub fn into_backend(self) -> B {
        self.backend
    }

    fn warn_shared_pins(&self) {
        let mut seen: Vec<(OutputId, Voice)> = Vec::new();
        for desc in &self.descriptors {
            for output in desc.driven_outputs() {
                let clash = seen
                    .iter()
                    .find(|(o, v)| *o == output && *v != desc.voice);
                if let Some((_, other)) = clash {
                    log::warn!("{} is wired to both {} and {}", output, other, desc.voice);
                }
                seen.push((output, desc.voice));
            }
        }
    }
}

/// Add every configured output that shares an RP2040 slice with a voice's
/// output or indicator to that voice's partner list.
pub fn infer_slice_partners(descriptors: &mut [ChannelDescriptor]) {
    let all: Vec<OutputId> = descriptors
        .iter()
        .flat_map(|d| d.driven_outputs())
        .collect();

    for desc in descriptors.iter_mut() {
        let own: Vec<OutputId> = desc.driven_outputs().collect();
        let slices: Vec<u8> = own.iter().map(|&o| rp2040_slice(o)).collect();

        for &candidate in &all {
            if own.contains(&candidate) || desc.slice_partners.contains(&candidate) {
                continue;
            }
            if slices.contains(&rp2040_slice(candidate)) {
                desc.slice_partners.push(candidate);
            }
        }
    }
}
