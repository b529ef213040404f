//! Bounds-checked cursor for decoding fixed-layout PE structures.
//!
//! This module provides the [`crate::file::parser::Parser`] type, a cursor over a byte slice that
//! has been read from the source. Headers, section entries, import descriptors and resource
//! directory entries are all fixed-layout records; the parser decodes them field by field and
//! turns every short read into an [`crate::Error::TruncatedInput`] that names the absolute file
//! offset of the failure.
//!
//! # Usage Examples
//!
//! ```rust
//! use pescope::Parser;
//!
//! // A COFF header fragment that was read from file offset 0x84
//! let data = [0x64, 0x86, 0x02, 0x00];
//! let mut parser = Parser::at(&data, 0x84);
//!
//! assert_eq!(parser.read_le::<u16>()?, 0x8664);
//! assert_eq!(parser.read_le::<u16>()?, 2);
//! assert!(parser.read_le::<u32>().is_err());
//! # Ok::<(), pescope::Error>(())
//! ```

use crate::{
    file::io::{read_le_at, read_le_at_dyn, PeIO},
    Error, Result,
};

/// A cursor over a byte slice with an optional base file offset.
///
/// The base is only used for error reporting: a parser created with [`Parser::at`] reports
/// truncation at `base + position`, which is where the structure lives in the file.
pub struct Parser<'a> {
    data: &'a [u8],
    position: usize,
    base: u64,
}

impl<'a> Parser<'a> {
    /// Create a new parser over `data`, reporting offsets relative to the slice start.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser {
            data,
            position: 0,
            base: 0,
        }
    }

    /// Create a new parser over `data`, which was read from file offset `base`.
    #[must_use]
    pub fn at(data: &'a [u8], base: u64) -> Self {
        Parser {
            data,
            position: 0,
            base,
        }
    }

    /// Returns the length of the underlying slice.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the underlying slice is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns true if at least one unread byte remains.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Move the cursor to `pos`.
    ///
    /// # Errors
    /// Returns [`crate::Error::TruncatedInput`] if `pos` lies past the end of the slice.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(self.truncated(pos, 0));
        }

        self.position = pos;
        Ok(())
    }

    /// Move the cursor forward by `step` bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::TruncatedInput`] if fewer than `step` bytes remain.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        self.ensure_remaining(step)?;
        self.position += step;
        Ok(())
    }

    /// Current position relative to the slice start.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Current position as an absolute file offset.
    #[must_use]
    pub fn file_offset(&self) -> u64 {
        self.base + self.position as u64
    }

    /// Number of unread bytes.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Fail unless at least `needed` bytes remain.
    ///
    /// # Errors
    /// Returns [`crate::Error::TruncatedInput`] if fewer bytes remain.
    pub fn ensure_remaining(&self, needed: usize) -> Result<()> {
        if self.remaining() < needed {
            return Err(self.truncated(self.position, needed));
        }
        Ok(())
    }

    /// Read a little-endian value and advance.
    ///
    /// # Errors
    /// Returns [`crate::Error::TruncatedInput`] if the slice is too short.
    pub fn read_le<T: PeIO>(&mut self) -> Result<T> {
        let start = self.position;
        read_le_at::<T>(self.data, &mut self.position)
            .map_err(|_| self.truncated(start, std::mem::size_of::<T>()))
    }

    /// Read a pointer-sized value (8 bytes if `is_large`, else 4) and advance.
    ///
    /// # Errors
    /// Returns [`crate::Error::TruncatedInput`] if the slice is too short.
    pub fn read_le_dyn(&mut self, is_large: bool) -> Result<u64> {
        let start = self.position;
        read_le_at_dyn(self.data, &mut self.position, is_large)
            .map_err(|_| self.truncated(start, if is_large { 8 } else { 4 }))
    }

    /// Read a fixed-size byte array and advance.
    ///
    /// # Errors
    /// Returns [`crate::Error::TruncatedInput`] if fewer than `N` bytes remain.
    pub fn read_bytes<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.ensure_remaining(N)?;
        let mut out = [0_u8; N];
        out.copy_from_slice(&self.data[self.position..self.position + N]);
        self.position += N;
        Ok(out)
    }

    /// Read `count` little-endian UTF-16 code units and advance.
    ///
    /// The units are returned as-is; unpaired surrogates are preserved for the caller to
    /// render lossily.
    ///
    /// # Errors
    /// Returns [`crate::Error::TruncatedInput`] if fewer than `count * 2` bytes remain.
    pub fn read_utf16_units(&mut self, count: usize) -> Result<Vec<u16>> {
        let Some(byte_len) = count.checked_mul(2) else {
            return Err(self.truncated(self.position, usize::MAX));
        };
        self.ensure_remaining(byte_len)?;

        let units = self.data[self.position..self.position + byte_len]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        self.position += byte_len;
        Ok(units)
    }

    fn truncated(&self, position: usize, needed: usize) -> Error {
        truncated_error!(
            self.base + position as u64,
            needed,
            self.data.len().saturating_sub(position)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_reads() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        let mut parser = Parser::new(&data);

        assert_eq!(parser.read_le::<u32>().unwrap(), 0x04030201);
        assert_eq!(parser.pos(), 4);
        assert_eq!(parser.remaining(), 4);

        parser.seek(6).unwrap();
        assert_eq!(parser.read_le::<u16>().unwrap(), 0x0807);
        assert!(!parser.has_more_data());
    }

    #[test]
    fn truncation_reports_file_offset() {
        let data = [0xAA, 0xBB, 0xCC];
        let mut parser = Parser::at(&data, 0x200);

        parser.advance_by(2).unwrap();
        match parser.read_le::<u32>() {
            Err(Error::TruncatedInput {
                offset,
                needed,
                available,
            }) => {
                assert_eq!(offset, 0x202);
                assert_eq!(needed, 4);
                assert_eq!(available, 1);
            }
            other => panic!("Expected TruncatedInput, got {other:?}"),
        }
        // A failed read leaves the cursor untouched
        assert_eq!(parser.pos(), 2);
        assert_eq!(parser.file_offset(), 0x202);
    }

    #[test]
    fn dyn_reads() {
        let data = [0x01, 0x00, 0x00, 0x80, 0x00, 0x00, 0x00, 0x80];
        let mut parser = Parser::new(&data);
        assert_eq!(parser.read_le_dyn(false).unwrap(), 0x8000_0001);

        let mut parser = Parser::new(&data);
        assert_eq!(parser.read_le_dyn(true).unwrap(), 0x8000_0000_8000_0001);

        let mut parser = Parser::new(&data[..6]);
        assert!(parser.read_le_dyn(true).is_err());
    }

    #[test]
    fn fixed_bytes() {
        let data = *b".text\0\0\0rest";
        let mut parser = Parser::new(&data);
        let name = parser.read_bytes::<8>().unwrap();
        assert_eq!(&name, b".text\0\0\0");
        assert_eq!(parser.remaining(), 4);
        assert!(parser.read_bytes::<8>().is_err());
    }

    #[test]
    fn utf16_units() {
        let data = [0x48, 0x00, 0x69, 0x00, 0x00, 0xD8];
        let mut parser = Parser::new(&data);
        assert_eq!(parser.read_utf16_units(3).unwrap(), vec![0x48, 0x69, 0xD800]);

        let mut parser = Parser::new(&data);
        assert!(parser.read_utf16_units(4).is_err());
        assert!(parser.read_utf16_units(usize::MAX).is_err());
    }

    #[test]
    fn seek_and_advance_bounds() {
        let data = [0_u8; 4];
        let mut parser = Parser::new(&data);
        assert!(parser.seek(4).is_ok());
        assert!(parser.seek(5).is_err());
        parser.seek(0).unwrap();
        assert!(parser.advance_by(5).is_err());
        assert!(parser.advance_by(4).is_ok());
        assert!(parser.ensure_remaining(1).is_err());
    }
}
