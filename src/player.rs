//! Playback State Machine
//!
//! Drives one song from a [`ByteSource`] onto a [`ChannelMap`]:
//!
//! ```text
//! Idle -> Silencing -> Reading -> { NoteOn | NoteOff | Delay | End | Loop | Skip }
//!                         ^                                                  |
//!                         +--------------------------------------------------+-> Stopped
//! ```
//!
//! Execution is single-threaded and blocking: [`Player::play_song`] owns the
//! calling thread until the song stops. The only way to interrupt it is the
//! [`CancelToken`], which is polled before every byte and during every delay.
//!
//! Every exit path, including decode errors, leaves all outputs silenced.

use crate::channel::{ChannelMap, PwmBackend};
use crate::config::EngineConfig;
use crate::delay::{CancelToken, Delay, WaitOutcome};
use crate::opcode::{Opcode, OpcodeTable};
use crate::scanner::{delay_from_pair, scan_note_on_into, scan_operands_into, Operands};
use crate::source::{ByteSource, StreamSource};
use crate::{PlayerError, Result};
use std::io::{Read, Seek};

/// Coarse engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    /// No song has been started
    #[default]
    Idle,
    /// Outputs zeroed, waiting out the settle pause
    Silencing,
    /// Decoding instructions
    Reading,
    /// Song finished or aborted; outputs silent
    Stopped,
}

/// Why a song stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// End-of-song opcode reached
    EndOfSong,
    /// Cursor ran past the end of the source
    Exhausted,
    /// `max_loops` loop-backs were performed
    LoopLimit,
    /// The cancel token was raised
    Cancelled,
}

/// Read position within the current song
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaybackCursor {
    /// Index of the next byte to decode
    pub position: usize,
    /// Set once the song has stopped
    pub done: bool,
}

/// Statistics for one finished song
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackSummary {
    /// Why playback ended
    pub stop_reason: StopReason,
    /// Note-On instructions executed
    pub notes_played: u64,
    /// Note-Off instructions executed
    pub notes_stopped: u64,
    /// Delays executed (standalone and folded)
    pub delays: u64,
    /// Total milliseconds of delay requested
    pub delay_ms: u64,
    /// Loop-backs performed
    pub loops: u32,
    /// Unclassified bytes skipped
    pub skipped_bytes: u64,
    /// Cursor position when playback stopped
    pub final_position: usize,
}

#[derive(Debug, Default)]
struct Counters {
    notes_played: u64,
    notes_stopped: u64,
    delays: u64,
    delay_ms: u64,
    loops: u32,
    skipped_bytes: u64,
}

impl Counters {
    fn finish(&self, stop_reason: StopReason, final_position: usize) -> PlaybackSummary {
        PlaybackSummary {
            stop_reason,
            notes_played: self.notes_played,
            notes_stopped: self.notes_stopped,
            delays: self.delays,
            delay_ms: self.delay_ms,
            loops: self.loops,
            skipped_bytes: self.skipped_bytes,
            final_position,
        }
    }
}

/// Tone stream player
///
/// Owns the channel map (and through it the PWM hardware) and a delay engine,
/// both injected at construction so the decoder runs against fakes in tests.
#[derive(Debug)]
pub struct Player<B, D> {
    config: EngineConfig,
    table: OpcodeTable,
    channels: ChannelMap<B>,
    delay: D,
    cancel: CancelToken,
    state: PlaybackState,
    cursor: PlaybackCursor,
    operands: Operands,
}

impl<B: PwmBackend, D: Delay> Player<B, D> {
    /// Validate the configuration, build the channel map, and silence every output
    pub fn new(config: EngineConfig, backend: B, delay: D) -> Result<Self> {
        config.validate()?;
        let table = config.opcode_table();
        let mut channels = ChannelMap::from_config(&config, backend)?;
        channels.stop_all();

        Ok(Player {
            config,
            table,
            channels,
            delay,
            cancel: CancelToken::new(),
            state: PlaybackState::Idle,
            cursor: PlaybackCursor::default(),
            operands: Operands::default(),
        })
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current state
    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Cursor of the current (or last) song
    pub fn cursor(&self) -> PlaybackCursor {
        self.cursor
    }

    /// Token that stops the current song when raised.
    ///
    /// A raised token is lowered when the song it stopped returns, so the
    /// next [`play_song`](Self::play_song) plays normally.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Channel map and live outputs
    pub fn channels(&self) -> &ChannelMap<B> {
        &self.channels
    }

    /// Mutable channel map, e.g. to drive outputs between songs
    pub fn channels_mut(&mut self) -> &mut ChannelMap<B> {
        &mut self.channels
    }

    /// Delay engine
    pub fn delay(&self) -> &D {
        &self.delay
    }

    /// Zero every output
    pub fn stop_all(&mut self) {
        self.channels.stop_all();
    }

    /// Tear down the player, returning the backend and delay engine
    pub fn into_parts(self) -> (B, D) {
        (self.channels.into_backend(), self.delay)
    }

    /// Play a seekable stream (e.g. an open file) until it stops
    pub fn play_reader<R: Read + Seek>(&mut self, reader: R) -> Result<PlaybackSummary> {
        let mut source = StreamSource::new(reader)?;
        self.play_song(&mut source)
    }

    /// Play a song until it ends, is exhausted, hits the loop cap, or is cancelled.
    ///
    /// A Note-On with no pitch operand aborts the song with
    /// [`PlayerError::Decode`]. I/O errors from the source are returned as is.
    /// Outputs are silenced before this returns, whatever the outcome.
    pub fn play_song<S: ByteSource + ?Sized>(&mut self, source: &mut S) -> Result<PlaybackSummary> {
        self.cursor = PlaybackCursor::default();
        let mut counters = Counters::default();

        self.state = PlaybackState::Silencing;
        self.channels.stop_all();

        let outcome = if self.settle() == WaitOutcome::Cancelled {
            Ok(StopReason::Cancelled)
        } else {
            self.state = PlaybackState::Reading;
            self.run(source, &mut counters)
        };

        self.channels.stop_all();
        self.cancel.reset();
        self.cursor.done = true;
        self.state = PlaybackState::Stopped;

        match outcome {
            Ok(reason) => {
                log::info!(
                    "song stopped ({:?}) at byte {} after {} notes, {} loops",
                    reason,
                    self.cursor.position,
                    counters.notes_played,
                    counters.loops
                );
                Ok(counters.finish(reason, self.cursor.position))
            }
            Err(e) => {
                log::warn!("song aborted: {}", e);
                Err(e)
            }
        }
    }

    fn settle(&mut self) -> WaitOutcome {
        if self.config.settle_ms == 0 {
            return WaitOutcome::Elapsed;
        }
        self.delay.wait(self.config.settle_ms, &self.cancel)
    }

    fn run<S: ByteSource + ?Sized>(
        &mut self,
        source: &mut S,
        counters: &mut Counters,
    ) -> Result<StopReason> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(StopReason::Cancelled);
            }

            let pos = self.cursor.position;
            let Some(byte) = source.byte_at(pos)? else {
                self.trace(format_args!("out of range at {}", pos));
                return Ok(StopReason::Exhausted);
            };

            let opcode = self.table.classify(byte);
            self.trace(format_args!("[{:>6}] 0x{:02X} {:?}", pos, byte, opcode));

            match opcode {
                Opcode::DelayMarker => {
                    let Some(lo) = source.byte_at(pos + 1)? else {
                        self.trace(format_args!("delay marker without low byte at {}", pos));
                        return Ok(StopReason::Exhausted);
                    };
                    if self.wait(delay_from_pair(byte, lo), counters) == WaitOutcome::Cancelled {
                        return Ok(StopReason::Cancelled);
                    }
                    self.cursor.position = pos + 2;
                }
                Opcode::NoteOn(voice) => {
                    scan_note_on_into(source, &self.table, pos, &mut self.operands)?;
                    let Some(pitch) = self.operands.first() else {
                        return Err(PlayerError::Decode {
                            position: pos,
                            opcode: byte,
                            reason: "note-on without a pitch operand".into(),
                        });
                    };

                    self.trace(format_args!("{} note {}", voice, pitch));
                    self.channels
                        .play_note(voice, pitch, self.config.intensity_percent);
                    counters.notes_played += 1;

                    if let Some(ms) = self.operands.note_on_delay() {
                        if self.wait(ms, counters) == WaitOutcome::Cancelled {
                            return Ok(StopReason::Cancelled);
                        }
                    }
                    self.cursor.position = self.operands.next_position();
                }
                Opcode::NoteOff(voice) => {
                    scan_operands_into(source, &self.table, pos, &mut self.operands)?;
                    self.trace(format_args!("stopping {}", voice));
                    self.channels.stop_channel(voice);
                    counters.notes_stopped += 1;

                    if let Some(ms) = self.operands.note_off_delay() {
                        if self.wait(ms, counters) == WaitOutcome::Cancelled {
                            return Ok(StopReason::Cancelled);
                        }
                    }
                    self.cursor.position = self.operands.next_position();
                }
                Opcode::EndOfSong => {
                    log::info!("song is over");
                    return Ok(StopReason::EndOfSong);
                }
                Opcode::LoopSong => {
                    if let Some(max) = self.config.max_loops {
                        if counters.loops >= max {
                            return Ok(StopReason::LoopLimit);
                        }
                    }
                    counters.loops += 1;
                    log::info!("looping song (pass {})", counters.loops + 1);
                    self.cursor.position = 0;
                }
                Opcode::Unclassified => {
                    counters.skipped_bytes += 1;
                    self.cursor.position = pos + 1;
                }
            }
        }
    }

    fn wait(&mut self, ms: u16, counters: &mut Counters) -> WaitOutcome {
        self.trace(format_args!("sleeping for {} ms", ms));
        let outcome = self.delay.wait(u32::from(ms), &self.cancel);
        if outcome == WaitOutcome::Elapsed {
            counters.delays += 1;
            counters.delay_ms += u64::from(ms);
        }
        outcome
    }

    fn trace(&self, args: std::fmt::Arguments<'_>) {
        if self.config.debug {
            log::debug!("{}", args);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{OutputId, RecordingBackend};
    use crate::delay::{VirtualClock, VirtualDelay};
    use crate::source::MemorySource;

    const V0_OUT: OutputId = OutputId(0);

    fn player() -> (TestPlayer, RecordingBackend) {
        let clock = VirtualClock::new();
        let backend = RecordingBackend::with_clock(clock.clone());
        let handle = backend.clone();
        let config = EngineConfig {
            settle_ms: 0,
            ..EngineConfig::default()
        };
        let player = Player::new(config, backend, VirtualDelay::with_clock(clock)).unwrap();
        (player, handle)
    }

    type TestPlayer = Player<RecordingBackend, VirtualDelay>;

    fn play(bytes: Vec<u8>) -> (Result<PlaybackSummary>, TestPlayer, RecordingBackend) {
        let (mut player, handle) = player();
        let result = player.play_song(&mut MemorySource::new(bytes));
        (result, player, handle)
    }

    #[test]
    fn test_new_silences_outputs() {
        let (player, handle) = player();
        assert_eq!(player.state(), PlaybackState::Idle);
        assert!(!handle.events().is_empty());
        assert!(handle.all_silent());
    }

    #[test]
    fn test_note_then_end() {
        let (result, player, handle) = play(vec![0x90, 69, 0x01, 0x2C, 0x80, 0xF0]);
        let summary = result.unwrap();
        assert_eq!(summary.stop_reason, StopReason::EndOfSong);
        assert_eq!(summary.notes_played, 1);
        assert_eq!(summary.notes_stopped, 1);
        assert_eq!(summary.delay_ms, 300);
        assert_eq!(summary.final_position, 5);
        assert_eq!(handle.notes_played(V0_OUT), vec![440]);
        assert_eq!(player.delay().requested(), &[300]);
        assert_eq!(player.state(), PlaybackState::Stopped);
        assert!(player.cursor().done);
        assert!(handle.all_silent());
    }

    #[test]
    fn test_zero_delay_does_not_hang() {
        let (result, player, _) = play(vec![0x00, 0x00, 0xF0]);
        assert_eq!(result.unwrap().stop_reason, StopReason::EndOfSong);
        assert_eq!(player.delay().requested(), &[0]);
    }

    #[test]
    fn test_exhaustion_stops_gracefully() {
        let (result, _, handle) = play(vec![0x90, 60]);
        let summary = result.unwrap();
        assert_eq!(summary.stop_reason, StopReason::Exhausted);
        assert_eq!(summary.notes_played, 1);
        assert!(handle.all_silent());
    }

    #[test]
    fn test_delay_marker_without_low_byte() {
        let (result, player, _) = play(vec![0x90, 60, 0x01]);
        assert_eq!(result.unwrap().stop_reason, StopReason::Exhausted);
        assert!(player.delay().requested().is_empty());
    }

    #[test]
    fn test_note_on_without_pitch_is_fatal() {
        let (result, player, handle) = play(vec![0x90]);
        match result {
            Err(PlayerError::Decode {
                position, opcode, ..
            }) => {
                assert_eq!(position, 0);
                assert_eq!(opcode, 0x90);
            }
            other => panic!("expected decode error, got {:?}", other),
        }
        assert_eq!(player.state(), PlaybackState::Stopped);
        assert!(handle.all_silent());
    }

    #[test]
    fn test_note_on_followed_by_opcode_is_fatal() {
        let (result, _, handle) = play(vec![0x91, 64, 0x90, 0x80, 0xF0]);
        assert!(matches!(result, Err(PlayerError::Decode { position: 2, .. })));
        assert!(handle.all_silent());
    }

    #[test]
    fn test_note_off_needs_no_operands() {
        let (result, _, _) = play(vec![0x80, 0x81, 0xF0]);
        let summary = result.unwrap();
        assert_eq!(summary.notes_stopped, 2);
    }

    #[test]
    fn test_folded_note_on_delay() {
        let (result, player, _) = play(vec![0x90, 60, 0x12, 0x34, 0xF0]);
        let summary = result.unwrap();
        assert_eq!(summary.final_position, 4);
        assert_eq!(player.delay().requested(), &[0x1234]);
    }

    #[test]
    fn test_note_off_delay_operands() {
        let (result, player, _) = play(vec![0x80, 0x20, 0x10, 0xF0]);
        result.unwrap();
        assert_eq!(player.delay().requested(), &[0x2010]);
    }

    #[test]
    fn test_skips_unclassified_bytes() {
        let (result, _, handle) = play(vec![0x50, 0x90, 62, 0x50, 0x00, 0x10, 0xF0]);
        let summary = result.unwrap();
        // The 0x50 after the pitch is consumed as an operand, not skipped
        assert_eq!(summary.skipped_bytes, 1);
        assert_eq!(summary.notes_played, 1);
        assert_eq!(summary.delay_ms, 0x10);
        assert_eq!(handle.notes_played(V0_OUT), vec![294]);
    }

    #[test]
    fn test_retune_without_stop() {
        let (result, _, handle) = play(vec![0x90, 60, 0x90, 72, 0xF0]);
        result.unwrap();
        assert_eq!(handle.notes_played(V0_OUT), vec![262, 523]);
    }

    #[test]
    fn test_loop_limit() {
        let (mut player, handle) = player();
        player.config.max_loops = Some(3);
        let summary = player
            .play_song(&mut MemorySource::new(vec![0x90, 60, 0xE0]))
            .unwrap();
        assert_eq!(summary.stop_reason, StopReason::LoopLimit);
        assert_eq!(summary.loops, 3);
        assert_eq!(summary.notes_played, 4);
        assert_eq!(summary.final_position, 2);
        assert_eq!(handle.notes_played(V0_OUT), vec![262; 4]);
    }

    #[test]
    fn test_zero_loop_cap_stops_at_first_loop() {
        let (mut player, _) = player();
        player.config.max_loops = Some(0);
        let summary = player
            .play_song(&mut MemorySource::new(vec![0x90, 60, 0xE0]))
            .unwrap();
        assert_eq!(summary.stop_reason, StopReason::LoopLimit);
        assert_eq!(summary.loops, 0);
    }

    #[test]
    fn test_cancel_before_start() {
        let (mut player, handle) = player();
        player.cancel_token().cancel();
        let summary = player
            .play_song(&mut MemorySource::new(vec![0x90, 60, 0xE0]))
            .unwrap();
        assert_eq!(summary.stop_reason, StopReason::Cancelled);
        assert_eq!(summary.notes_played, 0);
        assert!(handle.all_silent());
    }

    #[test]
    fn test_cancel_is_lowered_for_the_next_song() {
        let (mut player, handle) = player();
        player.cancel_token().cancel();
        let first = player
            .play_song(&mut MemorySource::new(vec![0x90, 60, 0xE0]))
            .unwrap();
        assert_eq!(first.stop_reason, StopReason::Cancelled);
        assert!(!player.cancel_token().is_cancelled());

        let second = player
            .play_song(&mut MemorySource::new(vec![0x90, 69, 0xF0]))
            .unwrap();
        assert_eq!(second.stop_reason, StopReason::EndOfSong);
        assert_eq!(second.notes_played, 1);
        assert_eq!(handle.notes_played(V0_OUT), vec![440]);
    }

    struct CancellingDelay;

    impl Delay for CancellingDelay {
        fn wait(&mut self, _ms: u32, cancel: &CancelToken) -> WaitOutcome {
            cancel.cancel();
            WaitOutcome::Cancelled
        }
    }

    #[test]
    fn test_cancelled_delay_is_not_counted() {
        let config = EngineConfig {
            settle_ms: 0,
            ..EngineConfig::default()
        };
        let mut player = Player::new(config, RecordingBackend::new(), CancellingDelay).unwrap();
        let summary = player
            .play_song(&mut MemorySource::new(vec![0x90, 60, 0x01, 0x2C, 0xF0]))
            .unwrap();
        assert_eq!(summary.stop_reason, StopReason::Cancelled);
        assert_eq!(summary.notes_played, 1);
        assert_eq!(summary.delays, 0);
        assert_eq!(summary.delay_ms, 0);
    }

    #[test]
    fn test_low_pitch_note_on() {
        let (result, player, handle) = play(vec![0x90, 12, 0x00, 0x64, 0x80, 0xF0]);
        let summary = result.unwrap();
        assert_eq!(summary.stop_reason, StopReason::EndOfSong);
        assert_eq!(summary.notes_played, 1);
        assert_eq!(player.delay().requested(), &[100]);
        assert_eq!(handle.notes_played(V0_OUT), vec![16]);
    }

    #[test]
    fn test_unconfigured_voice_code_is_skipped() {
        let (mut player, _) = player();
        player.table.voice_count = 2;
        let summary = player
            .play_song(&mut MemorySource::new(vec![0x92, 0x91, 60, 0xF0]))
            .unwrap();
        assert_eq!(summary.skipped_bytes, 1);
        assert_eq!(summary.notes_played, 1);
        assert!(player.channels().active_voices().is_empty());
    }

    #[test]
    fn test_out_of_range_pitch_does_not_panic() {
        let (result, _, handle) = play(vec![0x90, 0xFF, 0xF0]);
        result.unwrap();
        assert_eq!(handle.notes_played(V0_OUT).len(), 1);
    }

    #[test]
    fn test_settle_pause_uses_delay_engine() {
        let clock = VirtualClock::new();
        let backend = RecordingBackend::with_clock(clock.clone());
        let mut player = Player::new(
            EngineConfig::default(),
            backend,
            VirtualDelay::with_clock(clock.clone()),
        )
        .unwrap();
        player.play_song(&mut MemorySource::new(vec![0xF0])).unwrap();
        assert_eq!(player.delay().requested(), &[1000]);
        assert_eq!(clock.now_ms(), 1000);
    }

    #[test]
    fn test_play_reader() {
        let (mut player, handle) = player();
        let summary = player
            .play_reader(std::io::Cursor::new(vec![0x93, 57, 0x83, 0xF0]))
            .unwrap();
        assert_eq!(summary.stop_reason, StopReason::EndOfSong);
        assert_eq!(handle.notes_played(OutputId(11)), vec![220]);
    }
}
