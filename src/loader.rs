//! Song Loading
//!
//! Songs arrive either as raw compiled bytes or as the C source the upstream
//! MIDI-to-tones compiler emits:
//!
//! ```c
//! // Playtune bytestream for file "song.mid"
//! const unsigned char PROGMEM score [] = {
//! 0x90,72, 0,150, 0x80, 0xf0};
//! ```
//!
//! Both are turned into a plain byte vector here.

use crate::{PlayerError, Result};
use nom::branch::alt;
use nom::bytes::complete::{tag, tag_no_case, take_until};
use nom::character::complete::{char, digit1, hex_digit1, multispace1, not_line_ending};
use nom::combinator::{all_consuming, map_res, opt, value};
use nom::multi::{many0, separated_list0};
use nom::sequence::{delimited, pair, preceded, terminated, tuple};
use nom::IResult;
use std::fmt;
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// On-disk song representation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SongFormat {
    /// Compiled bytes, used as is
    Binary,
    /// C array literal from the compiler
    CArray,
}

impl fmt::Display for SongFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SongFormat::Binary => f.write_str("binary"),
            SongFormat::CArray => f.write_str("C array"),
        }
    }
}

/// Guess the format from content: printable ASCII is C source, anything else binary
pub fn detect_format(data: &[u8]) -> SongFormat {
    let printable = |b: &u8| matches!(b, b'\t' | b'\n' | b'\r' | 0x20..=0x7E);
    if !data.is_empty() && data.iter().all(printable) {
        SongFormat::CArray
    } else {
        SongFormat::Binary
    }
}

/// Bytes inspected by [`sniff_format`]
pub const SNIFF_LEN: usize = 512;

/// Guess the format of a seekable song from its first [`SNIFF_LEN`] bytes.
///
/// The reader is left where it started, ready for streamed playback.
pub fn sniff_format<R: Read + Seek>(reader: &mut R) -> Result<SongFormat> {
    let start = reader.stream_position()?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    reader.by_ref().take(SNIFF_LEN as u64).read_to_end(&mut head)?;
    reader.seek(SeekFrom::Start(start))?;
    Ok(detect_format(&head))
}

/// Read a song file from disk and decode it
pub fn load_song_bytes<P: AsRef<Path>>(path: P) -> Result<(Vec<u8>, SongFormat)> {
    let path = path.as_ref();
    let data = fs::read(path).map_err(|e| {
        PlayerError::ParseError(format!("failed to read '{}': {}", path.display(), e))
    })?;
    parse_song(&data)
}

/// Decode song bytes, auto-detecting the format
pub fn parse_song(data: &[u8]) -> Result<(Vec<u8>, SongFormat)> {
    match detect_format(data) {
        SongFormat::Binary => Ok((data.to_vec(), SongFormat::Binary)),
        SongFormat::CArray => {
            let text = std::str::from_utf8(data)
                .map_err(|e| PlayerError::ParseError(format!("invalid text: {}", e)))?;
            Ok((parse_c_array(text)?, SongFormat::CArray))
        }
    }
}

/// Extract the bytes of a C array initializer.
///
/// Accepts a full compiler output file (the first `{ ... }` block is used) or
/// a bare comma-separated list. Literals may be hex (`0x90`) or decimal;
/// `//` and `/* */` comments are ignored.
pub fn parse_c_array(text: &str) -> Result<Vec<u8>> {
    let body = match array_body(text) {
        Ok((_, body)) => body,
        Err(_) => text,
    };

    all_consuming(delimited(ws, byte_list, ws))(body)
        .map(|(_, bytes)| bytes)
        .map_err(|e| PlayerError::ParseError(format!("malformed byte list: {}", e)))
}

fn array_body(input: &str) -> IResult<&str, &str> {
    preceded(
        pair(take_until("{"), char('{')),
        terminated(take_until("}"), char('}')),
    )(input)
}

fn comment(input: &str) -> IResult<&str, ()> {
    alt((
        value((), pair(tag("//"), not_line_ending)),
        value((), tuple((tag("/*"), take_until("*/"), tag("*/")))),
    ))(input)
}

fn ws(input: &str) -> IResult<&str, ()> {
    value((), many0(alt((value((), multispace1), comment))))(input)
}

fn literal(input: &str) -> IResult<&str, u8> {
    alt((
        map_res(preceded(tag_no_case("0x"), hex_digit1), |h: &str| {
            u8::from_str_radix(h, 16)
        }),
        map_res(digit1, |d: &str| d.parse::<u8>()),
    ))(input)
}

fn separator(input: &str) -> IResult<&str, char> {
    delimited(ws, char(','), ws)(input)
}

fn byte_list(input: &str) -> IResult<&str, Vec<u8>> {
    terminated(separated_list0(separator, literal), opt(separator))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPILER_OUTPUT: &str = r#"// Playtune bytestream for file "test.mid" created by MIDITONES
#ifdef __AVR__
#include <avr/pgmspace.h>
#else
#define PROGMEM
#endif
const unsigned char PROGMEM score [] = {
0x90,72, 0,150, 0x80, 0x91,69, /* chord */ 1,44,
0x81, 0xf0};
// This score contains 14 bytes, and 2 tone generators are used.
"#;

    #[test]
    fn test_parse_compiler_output() {
        let bytes = parse_c_array(COMPILER_OUTPUT).unwrap();
        assert_eq!(
            bytes,
            vec![0x90, 72, 0, 150, 0x80, 0x91, 69, 1, 44, 0x81, 0xF0]
        );
    }

    #[test]
    fn test_parse_bare_list() {
        assert_eq!(parse_c_array("0x90, 60,\n0xF0,").unwrap(), vec![0x90, 60, 0xF0]);
        assert_eq!(parse_c_array("  ").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_rejects_out_of_range_literal() {
        assert!(parse_c_array("{ 0x90, 300 }").is_err());
        assert!(parse_c_array("{ 0x90, 0x1FF }").is_err());
        assert!(parse_c_array("{ 0x90 60 }").is_err());
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format(b"0x90,60"), SongFormat::CArray);
        assert_eq!(detect_format(&[0x90, 60, 0xF0]), SongFormat::Binary);
        assert_eq!(detect_format(&[0x01, 0x2C]), SongFormat::Binary);
        assert_eq!(detect_format(&[]), SongFormat::Binary);
    }

    #[test]
    fn test_sniff_format_rewinds() {
        let mut text = std::io::Cursor::new(COMPILER_OUTPUT.as_bytes().to_vec());
        assert_eq!(sniff_format(&mut text).unwrap(), SongFormat::CArray);
        assert_eq!(text.position(), 0);

        let mut binary = std::io::Cursor::new(vec![0x90u8, 60, 0xF0]);
        binary.set_position(1);
        assert_eq!(sniff_format(&mut binary).unwrap(), SongFormat::Binary);
        assert_eq!(binary.position(), 1);
    }

    #[test]
    fn test_parse_song_passthrough_binary() {
        let (bytes, format) = parse_song(&[0x90, 60, 0xF0]).unwrap();
        assert_eq!(format, SongFormat::Binary);
        assert_eq!(bytes, vec![0x90, 60, 0xF0]);
    }

    #[test]
    fn test_load_song_bytes_missing_file() {
        assert!(matches!(
            load_song_bytes("/nonexistent/song.bin"),
            Err(PlayerError::ParseError(_))
        ));
    }
}
