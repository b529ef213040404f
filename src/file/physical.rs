//! Physical file backend for memory-mapped I/O.
//!
//! This module provides the [`crate::file::physical::Physical`] backend that implements the
//! [`crate::file::Backend`] trait for files on disk. The file is mapped read-only into the
//! process's address space, so only the pages the parser actually touches (headers, section
//! table, the directories being walked) are ever loaded.
//!
//! # Usage Examples
//!
//! ```rust,ignore
//! use pescope::file::{Backend, Physical};
//! use std::path::Path;
//!
//! let physical = Physical::new(Path::new("notepad.exe"))?;
//! println!("File size: {} bytes", physical.size());
//!
//! let dos_magic = physical.read(0, 2)?;
//! assert_eq!(dos_magic.as_ref(), b"MZ");
//! # Ok::<(), pescope::Error>(())
//! ```

use std::{borrow::Cow, fs, path::Path};

use memmap2::Mmap;

use super::{checked_range, Backend};
use crate::{Error::FileError, Result};

/// A file backend that uses memory-mapped I/O for efficient access to files on disk.
///
/// All access operations include bounds checking; the mapping itself is never indexed
/// without a validated range.
#[derive(Debug)]
pub struct Physical {
    /// Memory-mapped file data
    data: Mmap,
}

impl Physical {
    /// Create a new physical file backend by memory-mapping the specified file.
    ///
    /// # Arguments
    /// * `path` - Path to the PE file on disk. Accepts `&Path`, `&str`, `String`, or `PathBuf`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or mapped.
    pub fn new(path: impl AsRef<Path>) -> Result<Physical> {
        let file = fs::File::open(path).map_err(FileError)?;

        Self::from_std_file(&file)
    }

    /// Creates a new physical file backend from an opened [`std::fs::File`].
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if memory mapping fails.
    pub fn from_std_file(file: &fs::File) -> Result<Physical> {
        // The mapping stays valid after `file` is dropped.
        let mmap = unsafe { Mmap::map(file) }.map_err(FileError)?;

        Ok(Physical { data: mmap })
    }
}

impl Backend for Physical {
    fn read(&self, offset: u64, len: usize) -> Result<Cow<'_, [u8]>> {
        let range = checked_range(offset, len, self.size())?;
        Ok(Cow::Borrowed(&self.data[range]))
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}
