//! Pitch and duty conversion
//!
//! Equal-tempered tuning referenced to note 69 (concert A, 440 Hz) and a
//! linear percent-to-duty mapping onto the 16-bit PWM duty range.

/// Reference note number (A4)
pub const REFERENCE_NOTE: f64 = 69.0;

/// Frequency of the reference note in Hz
pub const REFERENCE_FREQUENCY: f64 = 440.0;

/// Full-scale duty value (16-bit PWM compare register)
pub const DUTY_MAX: u16 = u16::MAX;

/// Convert a note number to a drive frequency in Hz.
///
/// No bounds checking: any note number produces a finite frequency.
pub fn pitch_to_frequency(note: f64) -> f64 {
    2f64.powf((note - REFERENCE_NOTE) / 12.0) * REFERENCE_FREQUENCY
}

/// Round a frequency to the integer resolution of the PWM driver.
///
/// Values outside the `u32` range saturate; NaN maps to 0.
pub fn frequency_to_hz(frequency: f64) -> u32 {
    frequency.round() as u32
}

/// Convert an intensity percentage to a duty value: `round(percent / 100 * 65535)`.
///
/// `percent` is expected in `0.0..=100.0`. Out-of-range input saturates at the
/// ends of the `u16` range rather than wrapping.
pub fn percent_to_duty(percent: f64) -> u16 {
    (percent / 100.0 * f64::from(DUTY_MAX)).round() as u16
}
