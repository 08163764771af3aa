//! Serial types are the compact type-and-size codes SQLite packs into a
//! record header. This module maps a serial type to its content length,
//! to a coarse "simplified" class used by signature matching, and
//! decodes the bytes it denotes into a [`Value`].

use byteorder::{BigEndian, ReadBytesExt};
use std::io::{Cursor, Read};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Error reading value bytes: {0}")]
    Io(String),
    #[error("Reserved serial type code (10 or 11) is not valid in a well-formed database.")]
    ReservedSerialType,
    #[error("Bytes were not valid text in the declared encoding.")]
    InvalidTextEncoding,
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

/// Text encoding declared in the database header (byte 56).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
}

/// One decoded column value. `Null`, `Integer`, `Real`, `Text`, `Blob` are
/// SQLite's storage classes; every serial type maps to exactly one.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{}", r),
            Value::Text(s) => write!(f, "{}", s),
            Value::Blob(b) => write!(f, "<BLOB {} bytes>", b.len()),
        }
    }
}

/// The five storage classes a serial type collapses to for signature
/// comparison. Storage-class integers 8 and 9 (the literal-0/literal-1
/// serial types) collapse to `Integer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimplifiedType {
    Null,
    Integer,
    Real,
    Text,
    Blob,
}

pub fn simplified_type(serial_type: i64) -> SimplifiedType {
    match serial_type {
        0 => SimplifiedType::Null,
        1..=6 | 8 | 9 => SimplifiedType::Integer,
        7 => SimplifiedType::Real,
        x if x >= 12 && x % 2 == 0 => SimplifiedType::Blob,
        x if x >= 13 && x % 2 == 1 => SimplifiedType::Text,
        // Reserved codes 10/11 and negative codes never appear in a
        // well-formed database; a carve attempt that produces one is
        // simply not a plausible record and the caller treats it as such.
        _ => SimplifiedType::Null,
    }
}

/// Number of content bytes the body carries for this serial type.
pub fn content_length(serial_type: i64) -> usize {
    match serial_type {
        0 | 8 | 9 | 10 | 11 => 0,
        1 => 1,
        2 => 2,
        3 => 3,
        4 => 4,
        5 => 6,
        6 | 7 => 8,
        x if x >= 12 => ((x - 12) / 2) as usize,
        _ => 0,
    }
}

/// Decodes the `content_length(serial_type)` bytes at the front of `data`
/// into a [`Value`]. `data` must be at least `content_length` bytes long.
pub fn to_value(serial_type: i64, data: &[u8], encoding: TextEncoding) -> Result<Value, Error> {
    let mut c = Cursor::new(data);
    match serial_type {
        0 => Ok(Value::Null),
        1 => Ok(Value::Integer(c.read_i8()? as i64)),
        2 => Ok(Value::Integer(c.read_i16::<BigEndian>()? as i64)),
        3 => {
            let mut bytes = [0_u8; 4];
            c.read_exact(&mut bytes[1..])?;
            bytes[0] = if bytes[1] & 0x80 != 0 { 0xff } else { 0 };
            Ok(Value::Integer(i32::from_be_bytes(bytes) as i64))
        }
        4 => Ok(Value::Integer(c.read_i32::<BigEndian>()? as i64)),
        5 => {
            let mut bytes = [0_u8; 8];
            c.read_exact(&mut bytes[2..])?;
            bytes[0] = if bytes[2] & 0x80 != 0 { 0xff } else { 0 };
            bytes[1] = bytes[0];
            Ok(Value::Integer(i64::from_be_bytes(bytes)))
        }
        6 => Ok(Value::Integer(c.read_i64::<BigEndian>()?)),
        7 => Ok(Value::Real(c.read_f64::<BigEndian>()?)),
        8 => Ok(Value::Integer(0)),
        9 => Ok(Value::Integer(1)),
        10 | 11 => Err(Error::ReservedSerialType),
        x if x >= 12 && x % 2 == 0 => {
            let mut buf = vec![0_u8; content_length(x)];
            c.read_exact(&mut buf)?;
            Ok(Value::Blob(buf))
        }
        x if x >= 13 => {
            let mut buf = vec![0_u8; content_length(x)];
            c.read_exact(&mut buf)?;
            Ok(Value::Text(decode_text(&buf, encoding)?))
        }
        _ => Err(Error::ReservedSerialType),
    }
}

fn decode_text(buf: &[u8], encoding: TextEncoding) -> Result<String, Error> {
    match encoding {
        TextEncoding::Utf8 => {
            String::from_utf8(buf.to_vec()).map_err(|_| Error::InvalidTextEncoding)
        }
        TextEncoding::Utf16Le => utf16_to_string(buf, u16::from_le_bytes),
        TextEncoding::Utf16Be => utf16_to_string(buf, u16::from_be_bytes),
    }
}

fn utf16_to_string(buf: &[u8], from_bytes: fn([u8; 2]) -> u16) -> Result<String, Error> {
    if !buf.len().is_multiple_of(2) {
        return Err(Error::InvalidTextEncoding);
    }
    let units: Vec<u16> = buf
        .chunks_exact(2)
        .map(|c| from_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16(&units).map_err(|_| Error::InvalidTextEncoding)
}
