//! Pointer-map pages, present only in auto-vacuum/incremental-vacuum
//! databases. Every page is either a pointer-map page or a page described
//! by one; membership is a pure function of the page number and page size,
//! not of the page's own bytes.
//! https://www.sqlite.org/fileformat.html#pointer_map_or_ptrmap_pages

use byteorder::{BigEndian, ReadBytesExt};
use std::io::Cursor;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Pointer map entry type byte {0} is not one of {{1, 2, 3, 4, 5}}.")]
    InvalidEntryType(u8),
    #[error("Error reading pointer map page bytes: {0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    RootPage,
    FreelistPage,
    FirstOrOnlyOverflowPage,
    NonFirstOverflowPage,
    BtreeNonRootPage,
}

impl EntryType {
    fn from_byte(b: u8) -> Result<EntryType, Error> {
        match b {
            1 => Ok(EntryType::RootPage),
            2 => Ok(EntryType::FreelistPage),
            3 => Ok(EntryType::FirstOrOnlyOverflowPage),
            4 => Ok(EntryType::NonFirstOverflowPage),
            5 => Ok(EntryType::BtreeNonRootPage),
            other => Err(Error::InvalidEntryType(other)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PointerMapEntry {
    pub entry_type: EntryType,
    /// Meaning depends on `entry_type`: the parent b-tree page for
    /// non-root/non-first-overflow entries, or the previous overflow page
    /// for non-first overflow entries; 0 for root/freelist entries.
    pub parent_page: u32,
}

/// How many page entries fit on one pointer-map page of this usable size.
pub fn entries_per_page(usable_size: usize) -> usize {
    usable_size / 5
}

/// Page numbers follow the pattern: page 1 is never a pointer-map page
/// (it's the database header's page); page 2 is always one; thereafter
/// every `entries_per_page + 1`-th page is one.
pub fn is_pointer_map_page(page_number: u32, usable_size: usize) -> bool {
    if page_number < 2 {
        return false;
    }
    let n = entries_per_page(usable_size) as u32 + 1;
    (page_number - 2).is_multiple_of(n)
}

pub fn parse(page: &[u8]) -> Result<Vec<PointerMapEntry>, Error> {
    let mut entries = Vec::new();
    let mut c = Cursor::new(page);
    while (c.position() as usize) + 5 <= page.len() {
        let type_byte = c.read_u8()?;
        if type_byte == 0 {
            break;
        }
        let entry_type = EntryType::from_byte(type_byte)?;
        let parent_page = c.read_u32::<BigEndian>()?;
        entries.push(PointerMapEntry { entry_type, parent_page });
    }
    Ok(entries)
}
