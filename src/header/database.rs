//! The 100-byte database file header (page 1, offset 0).
//! https://www.sqlite.org/fileformat.html#the_database_header

use byteorder::{BigEndian, ReadBytesExt};
use std::io::{Cursor, Read, Seek, SeekFrom};

use super::Diagnostic;
use crate::serial_type::TextEncoding;

pub const HEADER_BYTES: usize = 100;

const MAGIC: &[u8; 16] = b"SQLite format 3\0";

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("The magic bytes for this file are not the SQLite 3 header string.")]
    WrongMagic,
    #[error("Page size {0} is not a power of two in [512, 65536], or the value 1 for 65536.")]
    UnsupportedPageSize(u32),
    #[error("Embedded payload fraction for {field} was {actual}, expected {expected}.")]
    UnsupportedFraction {
        field: &'static str,
        actual: u8,
        expected: u8,
    },
    #[error("Text encoding code {0} is not one of {{1, 2, 3}}.")]
    UnsupportedEncoding(u32),
    #[error("Schema format {0} is not one of {{1, 2, 3, 4}}.")]
    UnsupportedSchemaFormat(u32),
    #[error("Reserved space {0} exceeds the largest size any known SQLite extension (e.g. SQLCipher) reserves per page.")]
    UnsupportedReservedSpace(u8),
    #[error("Error reading header bytes: {0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseHeader {
    pub page_size: u32,
    pub write_version: u8,
    pub read_version: u8,
    pub reserved_space: u8,
    pub max_embedded_payload_fraction: u8,
    pub min_embedded_payload_fraction: u8,
    pub leaf_payload_fraction: u8,
    pub file_change_counter: u32,
    /// The in-header page count. May be unreliable — see
    /// [`DatabaseHeader::reliable_size_in_pages`].
    pub database_size_in_pages: u32,
    pub freelist_trunk_page: u32,
    pub freelist_page_count: u32,
    pub schema_cookie: u32,
    pub schema_format: u32,
    pub default_cache_size: u32,
    pub largest_root_btree_page: u32,
    pub text_encoding: TextEncoding,
    pub user_version: u32,
    pub incremental_vacuum: bool,
    pub application_id: u32,
    pub version_valid_for: u32,
    pub sqlite_version_number: u32,
}

impl DatabaseHeader {
    /// The in-header size is only trustworthy when `version_valid_for`
    /// equals `file_change_counter` (§4.2, §9 open question). Otherwise
    /// the caller should derive the size from `file_len / page_size`.
    pub fn size_is_reliable(&self) -> bool {
        self.version_valid_for == self.file_change_counter
    }

    pub fn reliable_size_in_pages(&self, file_len: u64) -> u32 {
        if self.size_is_reliable() && self.database_size_in_pages != 0 {
            self.database_size_in_pages
        } else {
            (file_len / self.page_size as u64) as u32
        }
    }

    pub fn usable_page_size(&self) -> usize {
        self.page_size as usize - self.reserved_space as usize
    }
}

/// Parses the 100-byte database header. In strict mode any structural
/// violation is a fatal `Error`. In non-strict mode the same conditions
/// are tolerated and reported as `Diagnostic`s; the returned header uses
/// the raw declared values so downstream decoders can defend against them.
pub fn parse(bytes: &[u8; HEADER_BYTES], strict: bool) -> Result<(DatabaseHeader, Vec<Diagnostic>), Error> {
    let mut diags = Vec::new();
    let mut c = Cursor::new(&bytes[..]);

    let mut magic = [0_u8; 16];
    c.read_exact(&mut magic)?;
    if &magic != MAGIC {
        if strict {
            return Err(Error::WrongMagic);
        }
        diags.push(Diagnostic::new(0, "magic", "magic bytes do not match \"SQLite format 3\\0\""));
    }

    let page_size_raw = c.read_u16::<BigEndian>()?;
    let page_size = match page_size_raw {
        1 => 65536,
        n @ 512..=32768 if n.is_power_of_two() => n as u32,
        n => {
            if strict {
                return Err(Error::UnsupportedPageSize(n as u32));
            }
            diags.push(Diagnostic::new(16, "page_size", format!("{} is not a valid page size", n)));
            n as u32
        }
    };

    let write_version = c.read_u8()?;
    let read_version = c.read_u8()?;
    let reserved_space = c.read_u8()?;
    const MAX_SANE_RESERVED_SPACE: u8 = 32;
    if reserved_space > MAX_SANE_RESERVED_SPACE {
        if strict {
            return Err(Error::UnsupportedReservedSpace(reserved_space));
        }
        diags.push(Diagnostic::new(20, "reserved_space", format!("{} is larger than any known use of this field", reserved_space)));
    }

    let max_embedded_payload_fraction = c.read_u8()?;
    if max_embedded_payload_fraction != 64 {
        if strict {
            return Err(Error::UnsupportedFraction {
                field: "max_embedded_payload_fraction",
                actual: max_embedded_payload_fraction,
                expected: 64,
            });
        }
        diags.push(Diagnostic::new(21, "max_embedded_payload_fraction", "expected 64"));
    }
    let min_embedded_payload_fraction = c.read_u8()?;
    if min_embedded_payload_fraction != 32 {
        if strict {
            return Err(Error::UnsupportedFraction {
                field: "min_embedded_payload_fraction",
                actual: min_embedded_payload_fraction,
                expected: 32,
            });
        }
        diags.push(Diagnostic::new(22, "min_embedded_payload_fraction", "expected 32"));
    }
    let leaf_payload_fraction = c.read_u8()?;
    if leaf_payload_fraction != 32 {
        if strict {
            return Err(Error::UnsupportedFraction {
                field: "leaf_payload_fraction",
                actual: leaf_payload_fraction,
                expected: 32,
            });
        }
        diags.push(Diagnostic::new(23, "leaf_payload_fraction", "expected 32"));
    }

    let file_change_counter = c.read_u32::<BigEndian>()?;
    let database_size_in_pages = c.read_u32::<BigEndian>()?;
    let freelist_trunk_page = c.read_u32::<BigEndian>()?;
    let freelist_page_count = c.read_u32::<BigEndian>()?;
    let schema_cookie = c.read_u32::<BigEndian>()?;

    let schema_format = c.read_u32::<BigEndian>()?;
    if !(1..=4).contains(&schema_format) {
        if strict {
            return Err(Error::UnsupportedSchemaFormat(schema_format));
        }
        diags.push(Diagnostic::new(44, "schema_format", "expected 1..=4"));
    }

    let default_cache_size = c.read_u32::<BigEndian>()?;
    let largest_root_btree_page = c.read_u32::<BigEndian>()?;

    let encoding_raw = c.read_u32::<BigEndian>()?;
    let text_encoding = match encoding_raw {
        1 => TextEncoding::Utf8,
        2 => TextEncoding::Utf16Le,
        3 => TextEncoding::Utf16Be,
        other => {
            if strict {
                return Err(Error::UnsupportedEncoding(other));
            }
            diags.push(Diagnostic::new(56, "text_encoding", "expected 1, 2 or 3; assuming UTF-8"));
            TextEncoding::Utf8
        }
    };

    let user_version = c.read_u32::<BigEndian>()?;
    let incremental_vacuum = c.read_u32::<BigEndian>()? != 0;
    let application_id = c.read_u32::<BigEndian>()?;

    c.seek(SeekFrom::Start(92))?;
    let version_valid_for = c.read_u32::<BigEndian>()?;
    let sqlite_version_number = c.read_u32::<BigEndian>()?;

    Ok((
        DatabaseHeader {
            page_size,
            write_version,
            read_version,
            reserved_space,
            max_embedded_payload_fraction,
            min_embedded_payload_fraction,
            leaf_payload_fraction,
            file_change_counter,
            database_size_in_pages,
            freelist_trunk_page,
            freelist_page_count,
            schema_cookie,
            schema_format,
            default_cache_size,
            largest_root_btree_page,
            text_encoding,
            user_version,
            incremental_vacuum,
            application_id,
            version_valid_for,
            sqlite_version_number,
        },
        diags,
    ))
}
