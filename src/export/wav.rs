//! WAV preview rendering

use super::ExportConfig;
use crate::channel::{OutputEvent, OutputEventKind, OutputId};
use crate::pitch::DUTY_MAX;
use crate::{PlayerError, Result};
use std::path::Path;

#[derive(Debug, Clone, Copy, Default)]
struct Pulse {
    hz: f64,
    duty: f64,
    phase: f64,
}

impl Pulse {
    fn sample(&mut self, sample_rate: f64) -> f32 {
        if self.duty <= 0.0 || self.hz <= 0.0 {
            return 0.0;
        }
        let out = if self.phase < self.duty { 1.0 } else { -1.0 };
        self.phase = (self.phase + self.hz / sample_rate).fract();
        out
    }
}

/// Mix the pulse outputs in `outputs` into mono samples.
///
/// Writes to outputs not listed (indicators, slice partners outside the
/// voice table) are ignored.
pub fn render_timeline(
    events: &[OutputEvent],
    outputs: &[OutputId],
    config: &ExportConfig,
) -> Vec<f32> {
    if outputs.is_empty() || config.sample_rate == 0 {
        return Vec::new();
    }

    let end_ms = events.last().map(|e| e.time_ms).unwrap_or(0) + u64::from(config.tail_ms);
    let total = (end_ms * u64::from(config.sample_rate) / 1000) as usize;
    let sample_rate = f64::from(config.sample_rate);
    let scale = config.gain / outputs.len() as f32;

    let mut pulses = vec![Pulse::default(); outputs.len()];
    let mut samples = Vec::with_capacity(total);
    let mut next_event = 0;

    for n in 0..total {
        let now_ms = n as u64 * 1000 / u64::from(config.sample_rate);
        while let Some(event) = events.get(next_event).filter(|e| e.time_ms <= now_ms) {
            if let Some(i) = outputs.iter().position(|&o| o == event.output) {
                match event.kind {
                    OutputEventKind::Frequency => pulses[i].hz = f64::from(event.value),
                    OutputEventKind::Duty => {
                        pulses[i].duty = f64::from(event.value) / f64::from(DUTY_MAX)
                    }
                }
            }
            next_event += 1;
        }

        let mixed: f32 = pulses.iter_mut().map(|p| p.sample(sample_rate)).sum();
        samples.push(mixed * scale);
    }

    samples
}

/// Render a timeline and write it as a mono 16-bit WAV file.
///
/// Returns the number of samples written.
pub fn export_timeline_wav<P: AsRef<Path>>(
    events: &[OutputEvent],
    outputs: &[OutputId],
    output_path: P,
    config: &ExportConfig,
) -> Result<usize> {
    let samples = render_timeline(events, outputs, config);
    log::info!(
        "writing {} samples ({:.1}s) to {}",
        samples.len(),
        samples.len() as f32 / config.sample_rate.max(1) as f32,
        output_path.as_ref().display()
    );
    write_wav_file(output_path.as_ref(), &samples, config.sample_rate)?;
    Ok(samples.len())
}

/// Write samples to WAV file
fn write_wav_file(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| PlayerError::ExportError(format!("Failed to create WAV file: {}", e)))?;

    for &sample in samples {
        let sample_i16 = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer
            .write_sample(sample_i16)
            .map_err(|e| PlayerError::ExportError(format!("Failed to write sample: {}", e)))?;
    }

    writer
        .finalize()
        .map_err(|e| PlayerError::ExportError(format!("Failed to finalize WAV file: {}", e)))?;

    Ok(())
}
