//! The rollback-journal header. Per spec, a journal is parsed only to this
//! point: the page records that follow are treated as opaque unallocated
//! blocks, never as structured cells.
//! https://www.sqlite.org/fileformat.html#the_rollback_journal

use byteorder::{BigEndian, ReadBytesExt};
use std::io::Cursor;

pub const HEADER_BYTES: usize = 28;

const MAGIC: u64 = 0xd9d5_05f9_20a1_63d7;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Rollback journal magic did not match.")]
    WrongMagic,
    #[error("Error reading journal header bytes: {0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct JournalHeader {
    /// -1 is the sentinel for "all pages up to EOF belong to this journal".
    pub page_count: i32,
    pub nonce: u32,
    pub initial_size_in_pages: u32,
    pub sector_size: u32,
    pub page_size: u32,
}

pub fn parse(bytes: &[u8; HEADER_BYTES]) -> Result<JournalHeader, Error> {
    let mut c = Cursor::new(&bytes[..]);
    let magic = c.read_u64::<BigEndian>()?;
    if magic != MAGIC {
        return Err(Error::WrongMagic);
    }
    let page_count = c.read_i32::<BigEndian>()?;
    let nonce = c.read_u32::<BigEndian>()?;
    let initial_size_in_pages = c.read_u32::<BigEndian>()?;
    let sector_size = c.read_u32::<BigEndian>()?;
    let page_size = c.read_u32::<BigEndian>()?;
    Ok(JournalHeader {
        page_count,
        nonce,
        initial_size_in_pages,
        sector_size,
        page_size,
    })
}
