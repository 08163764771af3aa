//! The WAL file header (32 bytes) and the per-frame header (24 bytes) that
//! precedes each page image in the WAL.
//! https://www.sqlite.org/fileformat.html#the_write_ahead_log

use byteorder::{BigEndian, ReadBytesExt};
use std::io::Cursor;

pub const HEADER_BYTES: usize = 32;
pub const FRAME_HEADER_BYTES: usize = 24;

const MAGIC_LE: u32 = 0x377f_0682;
const MAGIC_BE: u32 = 0x377f_0683;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("WAL magic {0:#010x} is neither the little- nor big-endian checksum marker.")]
    WrongMagic(u32),
    #[error("Error reading WAL header bytes: {0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

/// Which byte order the WAL's running checksum uses; determined by which
/// of the two magic constants is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumEndian {
    Little,
    Big,
}

#[derive(Debug, Clone)]
pub struct WalHeader {
    pub checksum_endian: ChecksumEndian,
    pub file_format_version: u32,
    pub page_size: u32,
    pub checkpoint_sequence: u32,
    pub salt1: u32,
    pub salt2: u32,
    pub checksum1: u32,
    pub checksum2: u32,
}

pub fn parse(bytes: &[u8; HEADER_BYTES]) -> Result<WalHeader, Error> {
    let mut c = Cursor::new(&bytes[..]);
    let magic = c.read_u32::<BigEndian>()?;
    let checksum_endian = match magic {
        MAGIC_LE => ChecksumEndian::Little,
        MAGIC_BE => ChecksumEndian::Big,
        other => return Err(Error::WrongMagic(other)),
    };
    let file_format_version = c.read_u32::<BigEndian>()?;
    let page_size = c.read_u32::<BigEndian>()?;
    let checkpoint_sequence = c.read_u32::<BigEndian>()?;
    let salt1 = c.read_u32::<BigEndian>()?;
    let salt2 = c.read_u32::<BigEndian>()?;
    let checksum1 = c.read_u32::<BigEndian>()?;
    let checksum2 = c.read_u32::<BigEndian>()?;
    Ok(WalHeader {
        checksum_endian,
        file_format_version,
        page_size,
        checkpoint_sequence,
        salt1,
        salt2,
        checksum1,
        checksum2,
    })
}

#[derive(Debug, Clone, Copy)]
pub struct WalFrameHeader {
    pub page_number: u32,
    /// Nonzero iff this frame ends a transaction; carries the database
    /// size in pages after the commit.
    pub db_size_after_commit: u32,
    pub salt1: u32,
    pub salt2: u32,
    pub checksum1: u32,
    pub checksum2: u32,
}

impl WalFrameHeader {
    pub fn is_commit_frame(&self) -> bool {
        self.db_size_after_commit != 0
    }
}

pub fn parse_frame_header(bytes: &[u8; FRAME_HEADER_BYTES]) -> Result<WalFrameHeader, Error> {
    let mut c = Cursor::new(&bytes[..]);
    let page_number = c.read_u32::<BigEndian>()?;
    let db_size_after_commit = c.read_u32::<BigEndian>()?;
    let salt1 = c.read_u32::<BigEndian>()?;
    let salt2 = c.read_u32::<BigEndian>()?;
    let checksum1 = c.read_u32::<BigEndian>()?;
    let checksum2 = c.read_u32::<BigEndian>()?;
    Ok(WalFrameHeader {
        page_number,
        db_size_after_commit,
        salt1,
        salt2,
        checksum1,
        checksum2,
    })
}

/// Builds a 32-byte WAL header, used only by tests that synthesize WAL
/// fixtures in memory rather than shipping binary `.wal` files.
#[cfg(test)]
pub fn build_header_bytes(endian: ChecksumEndian, page_size: u32, salt1: u32, salt2: u32) -> [u8; HEADER_BYTES] {
    let mut buf = [0_u8; HEADER_BYTES];
    let magic = match endian {
        ChecksumEndian::Little => MAGIC_LE,
        ChecksumEndian::Big => MAGIC_BE,
    };
    buf[0..4].copy_from_slice(&magic.to_be_bytes());
    buf[4..8].copy_from_slice(&3_007_000_u32.to_be_bytes());
    buf[8..12].copy_from_slice(&page_size.to_be_bytes());
    buf[12..16].copy_from_slice(&0_u32.to_be_bytes());
    buf[16..20].copy_from_slice(&salt1.to_be_bytes());
    buf[20..24].copy_from_slice(&salt2.to_be_bytes());
    buf
}

#[cfg(test)]
pub fn build_frame_header_bytes(
    page_number: u32,
    db_size_after_commit: u32,
    salt1: u32,
    salt2: u32,
) -> [u8; FRAME_HEADER_BYTES] {
    let mut buf = [0_u8; FRAME_HEADER_BYTES];
    buf[0..4].copy_from_slice(&page_number.to_be_bytes());
    buf[4..8].copy_from_slice(&db_size_after_commit.to_be_bytes());
    buf[8..12].copy_from_slice(&salt1.to_be_bytes());
    buf[12..16].copy_from_slice(&salt2.to_be_bytes());
    buf
}
