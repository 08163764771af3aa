//! Freelist trunk and leaf pages.
//! https://www.sqlite.org/fileformat.html#the_freelist

use byteorder::{BigEndian, ReadBytesExt};
use std::io::Cursor;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Freelist trunk page declares {declared} leaf entries but the page has room for at most {max}.")]
    TooManyLeafEntries { declared: u32, max: u32 },
    #[error("Error reading freelist page bytes: {0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct FreelistTrunkPage {
    pub next_trunk_page: u32,
    pub leaf_pages: Vec<u32>,
}

/// Parses a freelist trunk page: a next-trunk pointer, a leaf-entry count,
/// and that many leaf page numbers. Leaf pages themselves have no
/// structure at all — every byte past page 0 is unallocated and is a
/// carving target like any other freed page.
pub fn parse_trunk_page(page: &[u8]) -> Result<FreelistTrunkPage, Error> {
    let mut c = Cursor::new(page);
    let next_trunk_page = c.read_u32::<BigEndian>()?;
    let leaf_count = c.read_u32::<BigEndian>()?;
    let max_entries = (page.len() as u32 - 8) / 4;
    if leaf_count > max_entries {
        return Err(Error::TooManyLeafEntries {
            declared: leaf_count,
            max: max_entries,
        });
    }
    let mut leaf_pages = Vec::with_capacity(leaf_count as usize);
    for _ in 0..leaf_count {
        leaf_pages.push(c.read_u32::<BigEndian>()?);
    }
    Ok(FreelistTrunkPage {
        next_trunk_page,
        leaf_pages,
    })
}
