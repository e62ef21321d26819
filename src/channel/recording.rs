//! Recording PWM backend
//!
//! Stands in for real hardware: keeps the live frequency/duty of every output
//! and a timestamped log of every write. Clones share the same log, so a test
//! or CLI can keep a handle while the player owns the backend.

use super::{OutputId, PwmBackend};
use crate::delay::VirtualClock;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// What an output write changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputEventKind {
    /// Frequency in Hz
    Frequency,
    /// Duty (0-65535)
    Duty,
}

/// One recorded write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OutputEvent {
    /// Milliseconds since the backend was created
    pub time_ms: u64,
    /// Output written
    pub output: OutputId,
    /// Register written
    pub kind: OutputEventKind,
    /// Value written
    pub value: u32,
}

/// Current register values of one output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputState {
    /// Last frequency written, if any
    pub frequency: Option<u32>,
    /// Last duty written
    pub duty: u16,
}

/// Live state and write history
#[derive(Debug, Default)]
pub struct OutputLog {
    /// Current state per output
    pub states: BTreeMap<OutputId, OutputState>,
    /// Every write, in order
    pub events: Vec<OutputEvent>,
}

#[derive(Debug, Clone)]
enum Timebase {
    Wall(Instant),
    Virtual(VirtualClock),
}

impl Timebase {
    fn now_ms(&self) -> u64 {
        match self {
            Timebase::Wall(start) => start.elapsed().as_millis() as u64,
            Timebase::Virtual(clock) => clock.now_ms(),
        }
    }
}

/// PWM backend that records instead of driving pins
#[derive(Debug, Clone)]
pub struct RecordingBackend {
    log: Arc<Mutex<OutputLog>>,
    timebase: Timebase,
    history: bool,
}

impl RecordingBackend {
    /// Backend stamping writes with wall-clock time
    pub fn new() -> Self {
        RecordingBackend {
            log: Arc::new(Mutex::new(OutputLog::default())),
            timebase: Timebase::Wall(Instant::now()),
            history: true,
        }
    }

    /// Backend stamping writes with a virtual clock
    pub fn with_clock(clock: VirtualClock) -> Self {
        RecordingBackend {
            log: Arc::new(Mutex::new(OutputLog::default())),
            timebase: Timebase::Virtual(clock),
            history: true,
        }
    }

    /// Track live state only; [`events`](Self::events) stays empty.
    ///
    /// Keeps memory flat for songs that loop forever.
    pub fn without_history(mut self) -> Self {
        self.history = false;
        self
    }

    /// Last frequency written to an output
    pub fn frequency(&self, output: OutputId) -> Option<u32> {
        self.log
            .lock()
            .states
            .get(&output)
            .and_then(|s| s.frequency)
    }

    /// Current duty of an output (0 if never written)
    pub fn duty(&self, output: OutputId) -> u16 {
        self.log
            .lock()
            .states
            .get(&output)
            .map(|s| s.duty)
            .unwrap_or(0)
    }

    /// Whether every output that was ever written is at zero duty
    pub fn all_silent(&self) -> bool {
        self.log.lock().states.values().all(|s| s.duty == 0)
    }

    /// Copy of the write history
    pub fn events(&self) -> Vec<OutputEvent> {
        self.log.lock().events.clone()
    }

    /// Writes to one output, in order
    pub fn events_for(&self, output: OutputId) -> Vec<OutputEvent> {
        self.log
            .lock()
            .events
            .iter()
            .filter(|e| e.output == output)
            .copied()
            .collect()
    }

    /// Frequencies written to an output while its duty was being raised,
    /// i.e. the notes it played, in order
    pub fn notes_played(&self, output: OutputId) -> Vec<u32> {
        let log = self.log.lock();
        let mut notes = Vec::new();
        let mut pending: Option<u32> = None;
        for event in log.events.iter().filter(|e| e.output == output) {
            match event.kind {
                OutputEventKind::Frequency => pending = Some(event.value),
                OutputEventKind::Duty if event.value > 0 => {
                    if let Some(hz) = pending.take() {
                        notes.push(hz);
                    }
                }
                OutputEventKind::Duty => {}
            }
        }
        notes
    }

    /// Forget history and state
    pub fn clear(&self) {
        let mut log = self.log.lock();
        log.states.clear();
        log.events.clear();
    }

    fn record(&self, output: OutputId, kind: OutputEventKind, value: u32) {
        let time_ms = self.timebase.now_ms();
        let mut log = self.log.lock();
        let state = log.states.entry(output).or_default();
        match kind {
            OutputEventKind::Frequency => state.frequency = Some(value),
            OutputEventKind::Duty => state.duty = value as u16,
        }
        if !self.history {
            return;
        }
        log.events.push(OutputEvent {
            time_ms,
            output,
            kind,
            value,
        });
    }
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PwmBackend for RecordingBackend {
    fn set_frequency(&mut self, output: OutputId, hz: u32) {
        self.record(output, OutputEventKind::Frequency, hz);
    }

    fn set_duty(&mut self, output: OutputId, duty: u16) {
        self.record(output, OutputEventKind::Duty, u32::from(duty));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_without_history_keeps_state_only() {
        let backend = RecordingBackend::new().without_history();
        let mut writer = backend.clone();
        writer.set_frequency(OutputId(4), 440);
        writer.set_duty(OutputId(4), 100);
        assert_eq!(backend.frequency(OutputId(4)), Some(440));
        assert_eq!(backend.duty(OutputId(4)), 100);
        assert!(backend.events().is_empty());
    }

    #[test]
    fn test_clones_share_log() {
        let mut backend = RecordingBackend::new();
        let handle = backend.clone();
        backend.set_frequency(OutputId(4), 440);
        backend.set_duty(OutputId(4), 100);
        assert_eq!(handle.frequency(OutputId(4)), Some(440));
        assert_eq!(handle.duty(OutputId(4)), 100);
        assert!(!handle.all_silent());
    }

    #[test]
    fn test_virtual_timestamps() {
        let clock = VirtualClock::new();
        let mut backend = RecordingBackend::with_clock(clock.clone());
        backend.set_duty(OutputId(1), 5);
        clock.advance(250);
        backend.set_duty(OutputId(1), 0);

        let events = backend.events_for(OutputId(1));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].time_ms, 0);
        assert_eq!(events[1].time_ms, 250);
    }

    #[test]
    fn test_notes_played() {
        let mut backend = RecordingBackend::new();
        backend.set_frequency(OutputId(0), 262);
        backend.set_duty(OutputId(0), 100);
        backend.set_duty(OutputId(0), 0);
        backend.set_frequency(OutputId(0), 440);
        backend.set_duty(OutputId(0), 100);
        assert_eq!(backend.notes_played(OutputId(0)), vec![262, 440]);
    }

    #[test]
    fn test_clear() {
        let mut backend = RecordingBackend::new();
        backend.set_duty(OutputId(2), 7);
        backend.clear();
        assert!(backend.events().is_empty());
        assert_eq!(backend.duty(OutputId(2)), 0);
    }
}
