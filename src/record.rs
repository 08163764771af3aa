//! A SQLite record is a header (a varint `header_length`, then one
//! serial-type varint per column) followed by a body of column values
//! packed in serial-type order. Both iterators here borrow a payload
//! slice for their lifetime; the caller is responsible for reassembling
//! overflow chains into a contiguous slice first (see `page::overflow`).

use crate::varint;

/// Iterates over the serial-type codes in a record header.
pub struct HeaderIterator<'a> {
    data: &'a [u8],
    offset: usize,
    hdr_len: usize,
}

impl<'a> HeaderIterator<'a> {
    /// `s` begins at the record header length varint and extends through
    /// the last byte of the record body.
    pub fn new(s: &'a [u8]) -> HeaderIterator<'a> {
        let (hdr_len, hdr_len_len) = varint::read_varint(s);
        HeaderIterator {
            data: s,
            offset: hdr_len_len,
            hdr_len: hdr_len as usize,
        }
    }
}

impl<'a> Iterator for HeaderIterator<'a> {
    type Item = i64;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.hdr_len {
            return None;
        }
        let (serial_type, bytes_read) = varint::read_varint(&self.data[self.offset..]);
        self.offset += bytes_read;
        Some(serial_type)
    }
}

/// Iterates over `(serial_type, value_bytes)` pairs in a record body.
/// `value_bytes` borrows directly from the payload; no copy is made.
pub struct ValueIterator<'a> {
    data: &'a [u8],
    hdr_offset: usize,
    hdr_len: usize,
    value_offset: usize,
}

impl<'a> ValueIterator<'a> {
    pub fn new(s: &'a [u8]) -> ValueIterator<'a> {
        let (hdr_len, hdr_len_len) = varint::read_varint(s);
        ValueIterator {
            data: s,
            hdr_offset: hdr_len_len,
            hdr_len: hdr_len as usize,
            value_offset: hdr_len as usize,
        }
    }
}

impl<'a> Iterator for ValueIterator<'a> {
    type Item = (i64, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.hdr_offset >= self.hdr_len {
            return None;
        }
        let (serial_type, bytes_read) = varint::read_varint(&self.data[self.hdr_offset..]);
        self.hdr_offset += bytes_read;
        let value_len = crate::serial_type::content_length(serial_type);
        let start = self.value_offset;
        self.value_offset += value_len;
        Some((serial_type, &self.data[start..start + value_len]))
    }
}

/// Decodes every column of a record into `(serial_type, Value)` pairs,
/// using `encoding` for any text columns.
pub fn decode_row(
    payload: &[u8],
    encoding: crate::serial_type::TextEncoding,
) -> Result<Vec<(i64, crate::serial_type::Value)>, crate::serial_type::Error> {
    ValueIterator::new(payload)
        .map(|(st, bytes)| Ok((st, crate::serial_type::to_value(st, bytes, encoding)?)))
        .collect()
}
