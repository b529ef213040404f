//! Shared, closable handle around a [`crate::file::Backend`].
//!
//! Every structure this crate decodes is addressed by an absolute file offset, so all readers
//! (header parsing, the lazy import and resource sequences) go through a single
//! [`crate::file::source::Source`]. Closing the source drops the backend; any read issued
//! afterwards fails with [`crate::Error::ResourceClosed`] instead of touching freed data.

use std::sync::RwLock;

use super::Backend;
use crate::{
    file::io::{read_le, PeIO},
    Error::{ResourceClosed, StringDecode},
    Result,
};

/// Bytes scanned per backend read while searching for a string terminator.
const STRING_CHUNK: u64 = 256;

/// A closable, thread-safe byte source.
pub struct Source {
    backend: RwLock<Option<Box<dyn Backend>>>,
    size: u64,
}

impl Source {
    /// Wrap a backend.
    #[must_use]
    pub fn new(backend: Box<dyn Backend>) -> Source {
        let size = backend.size();
        Source {
            backend: RwLock::new(Some(backend)),
            size,
        }
    }

    /// Size of the source in bytes. Remains available after [`Source::close`].
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Release the backend. Idempotent.
    pub fn close(&self) {
        write_lock!(self.backend).take();
    }

    /// Returns true once [`Source::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        read_lock!(self.backend).is_none()
    }

    /// Read `len` bytes at `offset` and hand them to `f`.
    ///
    /// The closure runs while the read lock is held, so the bytes may be borrowed from a
    /// memory-mapped backend without copying.
    ///
    /// # Errors
    /// Returns [`crate::Error::ResourceClosed`] after [`Source::close`], the backend's error
    /// for an out-of-bounds read, or whatever `f` returns.
    pub fn with_bytes<T>(
        &self,
        offset: u64,
        len: usize,
        f: impl FnOnce(&[u8]) -> Result<T>,
    ) -> Result<T> {
        let guard = read_lock!(self.backend);
        let Some(backend) = guard.as_ref() else {
            return Err(ResourceClosed);
        };

        let bytes = backend.read(offset, len)?;
        f(&bytes)
    }

    /// Read `len` bytes at `offset` into an owned buffer.
    ///
    /// # Errors
    /// See [`Source::with_bytes`].
    pub fn read_vec(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.with_bytes(offset, len, |bytes| Ok(bytes.to_vec()))
    }

    /// Read a little-endian value at `offset`.
    ///
    /// # Errors
    /// See [`Source::with_bytes`].
    pub fn read_le<T: PeIO>(&self, offset: u64) -> Result<T> {
        self.with_bytes(offset, std::mem::size_of::<T>(), read_le::<T>)
    }

    /// Read a NUL-terminated UTF-8 string that starts at `offset` and ends within `limit`
    /// bytes, terminator included.
    ///
    /// # Errors
    /// Returns [`crate::Error::StringDecode`] if no terminator is found before the limit or the
    /// end of the source, or if the bytes are not valid UTF-8.
    pub fn read_cstring(&self, offset: u64, limit: usize) -> Result<String> {
        self.scan_cstring(offset, limit, false)
    }

    /// Read a string like [`Source::read_cstring`], where the bytes past `limit` are known to
    /// be zero. Exhausting the limit ends the string instead of failing.
    ///
    /// # Errors
    /// Returns [`crate::Error::StringDecode`] if the source ends before the limit does, or if
    /// the bytes are not valid UTF-8.
    pub fn read_cstring_padded(&self, offset: u64, limit: usize) -> Result<String> {
        self.scan_cstring(offset, limit, true)
    }

    fn scan_cstring(&self, offset: u64, limit: usize, zero_padded: bool) -> Result<String> {
        if self.is_closed() {
            return Err(ResourceClosed);
        }

        let end = offset.saturating_add(limit as u64).min(self.size);
        let mut collected = Vec::new();
        let mut cursor = offset;

        while cursor < end {
            let chunk = (end - cursor).min(STRING_CHUNK);
            let terminated = self.with_bytes(cursor, chunk as usize, |bytes| {
                match bytes.iter().position(|&b| b == 0) {
                    Some(nul) => {
                        collected.extend_from_slice(&bytes[..nul]);
                        Ok(true)
                    }
                    None => {
                        collected.extend_from_slice(bytes);
                        Ok(false)
                    }
                }
            })?;

            if terminated {
                return decode_utf8(collected, offset);
            }
            cursor += chunk;
        }

        if zero_padded && (limit == 0 || offset.saturating_add(limit as u64) <= self.size) {
            return decode_utf8(collected, offset);
        }

        Err(StringDecode {
            offset,
            reason: format!(
                "no NUL terminator within {} bytes",
                end.saturating_sub(offset)
            ),
        })
    }
}

fn decode_utf8(bytes: Vec<u8>, offset: u64) -> Result<String> {
    String::from_utf8(bytes).map_err(|error| StringDecode {
        offset,
        reason: format!("invalid UTF-8 - {error}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::Memory;

    fn source(data: Vec<u8>) -> Source {
        Source::new(Box::new(Memory::new(data)))
    }

    #[test]
    fn reads_and_closes() {
        let source = source(vec![0x4D, 0x5A, 0x90, 0x00]);

        assert_eq!(source.size(), 4);
        assert_eq!(source.read_le::<u16>(0).unwrap(), 0x5A4D);
        assert_eq!(source.read_vec(2, 2).unwrap(), vec![0x90, 0x00]);
        assert!(!source.is_closed());

        source.close();
        assert!(source.is_closed());
        assert_eq!(source.size(), 4);
        assert!(matches!(source.read_le::<u16>(0), Err(ResourceClosed)));
        assert!(matches!(source.read_cstring(0, 4), Err(ResourceClosed)));

        // Closing twice is harmless
        source.close();
    }

    #[test]
    fn cstring() {
        let mut data = b"KERNEL32.dll\0junk".to_vec();
        let source = source(data.clone());
        assert_eq!(source.read_cstring(0, 64).unwrap(), "KERNEL32.dll");
        assert_eq!(source.read_cstring(6, 64).unwrap(), "32.dll");

        // The terminator must fall inside the limit
        assert!(matches!(
            source.read_cstring(0, 12),
            Err(StringDecode { offset: 0, .. })
        ));
        assert!(source.read_cstring(0, 13).is_ok());

        // No terminator before the end of the source
        assert!(matches!(
            source.read_cstring(13, 64),
            Err(StringDecode { offset: 13, .. })
        ));

        data[1] = 0xFF;
        let source = self::source(data);
        assert!(matches!(source.read_cstring(0, 64), Err(StringDecode { .. })));
    }

    #[test]
    fn cstring_padded() {
        let source = source(b"abc\0defgh".to_vec());

        assert_eq!(source.read_cstring_padded(0, 8).unwrap(), "abc");
        assert_eq!(source.read_cstring_padded(4, 5).unwrap(), "defgh");
        assert_eq!(source.read_cstring_padded(4, 0).unwrap(), "");
        assert_eq!(source.read_cstring_padded(100, 0).unwrap(), "");
        assert!(source.read_cstring(4, 5).is_err());
        assert!(matches!(
            source.read_cstring_padded(4, 7),
            Err(StringDecode { offset: 4, .. })
        ));

        source.close();
        assert!(matches!(
            source.read_cstring_padded(0, 0),
            Err(ResourceClosed)
        ));
    }

    #[test]
    fn cstring_spans_chunks() {
        let mut data = vec![b'a'; 700];
        data.push(0);
        let source = source(data);

        let value = source.read_cstring(0, 16384).unwrap();
        assert_eq!(value.len(), 700);
        assert!(source.read_cstring(0, 600).is_err());
    }

    #[test]
    fn out_of_bounds() {
        let source = source(vec![0; 8]);
        assert!(matches!(
            source.read_le::<u64>(4),
            Err(crate::Error::TruncatedInput { .. })
        ));
        assert!(source.read_cstring(100, 16).is_err());
    }
}
