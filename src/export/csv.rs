//! CSV timeline export

use crate::channel::OutputEvent;
use crate::{PlayerError, Result};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Write one `time_ms,output,kind,value` row per event
pub fn write_timeline_csv<W: Write>(events: &[OutputEvent], writer: W) -> Result<()> {
    let mut wtr = ::csv::Writer::from_writer(writer);
    for event in events {
        wtr.serialize(event)
            .map_err(|e| PlayerError::ExportError(format!("Failed to write CSV row: {}", e)))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write a timeline CSV to a file
pub fn export_timeline_csv<P: AsRef<Path>>(events: &[OutputEvent], path: P) -> Result<()> {
    let file = File::create(path.as_ref())?;
    write_timeline_csv(events, file)
}
