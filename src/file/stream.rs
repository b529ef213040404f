//! Seekable stream backend.
//!
//! [`crate::file::stream::Stream`] adapts any `Read + Seek` value (an open file handle, a
//! `Cursor` over a buffer owned elsewhere, a decompressing reader with seek support) to the
//! [`crate::file::Backend`] trait. Every read seeks to its absolute offset first, so the
//! position the reader was left at never matters. Reads are serialized by a mutex and return
//! owned buffers.

use std::{
    borrow::Cow,
    io::{ErrorKind, Read, Seek, SeekFrom},
    sync::Mutex,
};

use super::{checked_range, Backend};
use crate::{Error::FileError, Result};

/// Input file backed by a `Read + Seek` stream
pub struct Stream<R> {
    reader: Mutex<R>,
    size: u64,
}

impl<R: Read + Seek + Send> Stream<R> {
    /// Create a new stream backend. The stream length is determined once, by seeking to its end.
    ///
    /// ## Arguments
    /// * 'reader' - The stream to consume
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the stream cannot be seeked.
    pub fn new(mut reader: R) -> Result<Stream<R>> {
        let size = reader.seek(SeekFrom::End(0)).map_err(FileError)?;

        Ok(Stream {
            reader: Mutex::new(reader),
            size,
        })
    }
}

impl<R: Read + Seek + Send> Backend for Stream<R> {
    fn read(&self, offset: u64, len: usize) -> Result<Cow<'_, [u8]>> {
        checked_range(offset, len, self.size)?;

        let mut buffer = vec![0_u8; len];
        let mut reader = lock!(self.reader);
        reader.seek(SeekFrom::Start(offset)).map_err(FileError)?;
        reader.read_exact(&mut buffer).map_err(|error| {
            if error.kind() == ErrorKind::UnexpectedEof {
                // The stream shrank after it was measured
                truncated_error!(offset, len, 0)
            } else {
                FileError(error)
            }
        })?;

        Ok(Cow::Owned(buffer))
    }

    fn size(&self) -> u64 {
        self.size
    }
}
