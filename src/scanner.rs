//! Operand scanning
//!
//! Collects the run of non-opcode bytes that follows a Note-On/Note-Off opcode.
//!
//! A Note-On pitch is the exception: the byte right after the opcode is the
//! pitch even when its value falls in the delay-marker range (notes 0-15).

use crate::opcode::OpcodeTable;
use crate::source::ByteSource;
use crate::Result;

/// Operand bytes collected after an opcode
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Operands {
    bytes: Vec<u8>,
    /// Position of the byte that ended the scan (next opcode, or source length)
    next: usize,
    exhausted: bool,
}

impl Operands {
    /// Scanned bytes in stream order
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of scanned bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether no operands followed the opcode
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// First operand (the pitch of a Note-On)
    pub fn first(&self) -> Option<u8> {
        self.bytes.first().copied()
    }

    /// Position at which decoding resumes: the terminating opcode
    pub fn next_position(&self) -> usize {
        self.next
    }

    /// Whether the scan ran off the end of the source
    pub fn hit_end(&self) -> bool {
        self.exhausted
    }

    /// Delay carried by a Note-On: exactly three operands, trailing two big-endian
    pub fn note_on_delay(&self) -> Option<u16> {
        match self.bytes.as_slice() {
            [_, hi, lo] => Some(delay_from_pair(*hi, *lo)),
            _ => None,
        }
    }

    /// Delay carried by a Note-Off: the first two operands, big-endian
    pub fn note_off_delay(&self) -> Option<u16> {
        match self.bytes.as_slice() {
            [hi, lo, ..] => Some(delay_from_pair(*hi, *lo)),
            _ => None,
        }
    }

    fn clear(&mut self) {
        self.bytes.clear();
        self.next = 0;
        self.exhausted = false;
    }
}

/// Combine a high/low byte pair into a millisecond count
pub fn delay_from_pair(hi: u8, lo: u8) -> u16 {
    u16::from_be_bytes([hi, lo])
}

/// Scan the operands of the opcode at `opcode_pos`.
///
/// Reads from `opcode_pos + 1` until an opcode byte or the end of the source.
/// The terminating opcode is not consumed: [`Operands::next_position`] points
/// at it so the player re-reads it as the next instruction.
pub fn scan_operands<S: ByteSource + ?Sized>(
    source: &mut S,
    table: &OpcodeTable,
    opcode_pos: usize,
) -> Result<Operands> {
    let mut operands = Operands::default();
    scan_operands_into(source, table, opcode_pos, &mut operands)?;
    Ok(operands)
}

/// Like [`scan_operands`], reusing `out`'s buffer.
pub fn scan_operands_into<S: ByteSource + ?Sized>(
    source: &mut S,
    table: &OpcodeTable,
    opcode_pos: usize,
    out: &mut Operands,
) -> Result<()> {
    out.clear();
    scan_from(source, table, opcode_pos + 1, out)
}

/// Scan the operands of the Note-On at `opcode_pos`.
///
/// The byte after the opcode is taken as the pitch unless it is missing or a
/// note, end, or loop code; the scan then continues as in [`scan_operands`].
/// An empty result means the Note-On has no pitch.
pub fn scan_note_on_into<S: ByteSource + ?Sized>(
    source: &mut S,
    table: &OpcodeTable,
    opcode_pos: usize,
    out: &mut Operands,
) -> Result<()> {
    out.clear();
    let pitch_pos = opcode_pos + 1;

    match source.byte_at(pitch_pos)? {
        None => {
            out.exhausted = true;
            out.next = pitch_pos;
            Ok(())
        }
        Some(byte) if table.classify(byte).is_event() => {
            out.next = pitch_pos;
            Ok(())
        }
        Some(pitch) => {
            out.bytes.push(pitch);
            scan_from(source, table, pitch_pos + 1, out)
        }
    }
}

fn scan_from<S: ByteSource + ?Sized>(
    source: &mut S,
    table: &OpcodeTable,
    start: usize,
    out: &mut Operands,
) -> Result<()> {
    let mut pos = start;

    loop {
        match source.byte_at(pos)? {
            None => {
                out.exhausted = true;
                break;
            }
            Some(byte) if table.is_opcode(byte) => break,
            Some(byte) => {
                out.bytes.push(byte);
                pos += 1;
            }
        }
    }

    out.next = pos;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn scan(bytes: &[u8], at: usize) -> Operands {
        let mut src = MemorySource::new(bytes);
        scan_operands(&mut src, &OpcodeTable::default(), at).unwrap()
    }

    #[test]
    fn test_stops_at_next_opcode() {
        let ops = scan(&[0x90, 60, 0x01, 0x2C], 0);
        assert_eq!(ops.as_slice(), &[60]);
        assert_eq!(ops.next_position(), 2);
        assert!(!ops.hit_end());
    }

    #[test]
    fn test_stops_at_end_of_source() {
        let ops = scan(&[0x90, 60, 70], 0);
        assert_eq!(ops.as_slice(), &[60, 70]);
        assert_eq!(ops.next_position(), 3);
        assert!(ops.hit_end());
    }

    #[test]
    fn test_zero_operands() {
        let ops = scan(&[0x90], 0);
        assert!(ops.is_empty());
        assert_eq!(ops.first(), None);
        assert!(ops.hit_end());

        let ops = scan(&[0x90, 0x80], 0);
        assert!(ops.is_empty());
        assert_eq!(ops.next_position(), 1);
    }

    #[test]
    fn test_note_on_folded_delay() {
        let ops = scan(&[0x90, 60, 0x11, 0x2C, 0xF0], 0);
        assert_eq!(ops.note_on_delay(), Some(0x112C));

        let ops = scan(&[0x90, 60, 0x20], 0);
        assert_eq!(ops.note_on_delay(), None);
    }

    #[test]
    fn test_note_off_delay() {
        let ops = scan(&[0x80, 0x12, 0x34, 0x56], 0);
        assert_eq!(ops.note_off_delay(), Some(0x1234));
        let ops = scan(&[0x80, 0x12], 0);
        assert_eq!(ops.note_off_delay(), None);
    }

    fn scan_note_on(bytes: &[u8]) -> Operands {
        let mut src = MemorySource::new(bytes);
        let mut ops = Operands::default();
        scan_note_on_into(&mut src, &OpcodeTable::default(), 0, &mut ops).unwrap();
        ops
    }

    #[test]
    fn test_low_pitch_is_not_a_delay_marker() {
        let ops = scan_note_on(&[0x90, 12, 0x00, 0x64]);
        assert_eq!(ops.as_slice(), &[12]);
        assert_eq!(ops.next_position(), 2);

        let ops = scan_note_on(&[0x90, 0x00, 0x11, 0x2C, 0x80]);
        assert_eq!(ops.first(), Some(0));
        assert_eq!(ops.note_on_delay(), Some(0x112C));
        assert_eq!(ops.next_position(), 4);
    }

    #[test]
    fn test_note_on_pitch_missing() {
        let ops = scan_note_on(&[0x90]);
        assert!(ops.is_empty());
        assert!(ops.hit_end());

        for next in [0x91, 0x80, 0xF0, 0xE0] {
            let ops = scan_note_on(&[0x90, next]);
            assert!(ops.is_empty(), "0x{:02X}", next);
            assert_eq!(ops.next_position(), 1);
        }
    }

    #[test]
    fn test_delay_pair() {
        assert_eq!(delay_from_pair(0x01, 0x2C), 300);
        assert_eq!(delay_from_pair(0x00, 0x00), 0);
    }
}
