//! Data directories and their resolution to file offsets.
//!
//! The optional header ends with an array of up to sixteen `{rva, size}` pairs. The index of a
//! pair names the table it points at (exports, imports, resources, ...). Locating a directory
//! means translating its RVA through the section table; a directory that cannot be located only
//! affects its own accessor.

use std::fmt;

use strum::{EnumCount, EnumIter, FromRepr};

use crate::{
    file::parser::Parser,
    pe::SectionTable,
    AddressError, Error, Result,
};

/// Size of one data directory entry in bytes
pub const DATA_DIRECTORY_SIZE: usize = 8;

/// The well-known data directory slots, in table order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumCount, FromRepr, strum::Display,
)]
#[repr(usize)]
pub enum DataDirectoryKind {
    /// Export directory (`.edata`)
    Export = 0,
    /// Import directory (`.idata`)
    Import = 1,
    /// Resource directory (`.rsrc`)
    Resource = 2,
    /// Exception table (`.pdata`)
    Exception = 3,
    /// Attribute certificate table. Its address is a file offset, not an RVA.
    Certificate = 4,
    /// Base relocation table (`.reloc`)
    #[strum(to_string = "Base relocation")]
    BaseRelocation = 5,
    /// Debug data
    Debug = 6,
    /// Reserved, must be zero
    Architecture = 7,
    /// Global pointer register value
    #[strum(to_string = "Global pointer")]
    GlobalPtr = 8,
    /// Thread local storage table
    #[strum(to_string = "TLS")]
    Tls = 9,
    /// Load configuration table
    #[strum(to_string = "Load config")]
    LoadConfig = 10,
    /// Bound import table
    #[strum(to_string = "Bound import")]
    BoundImport = 11,
    /// Import address table
    #[strum(to_string = "IAT")]
    Iat = 12,
    /// Delay-load import descriptors
    #[strum(to_string = "Delay import")]
    DelayImport = 13,
    /// CLR runtime header
    #[strum(to_string = "CLR runtime")]
    ClrRuntime = 14,
    /// Reserved, must be zero
    Reserved = 15,
}

/// One `{rva, size}` pair of the data directory array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataDirectory {
    /// RVA of the table (a file offset for [`DataDirectoryKind::Certificate`])
    pub virtual_address: u32,
    /// Size of the table in bytes
    pub size: u32,
}

impl DataDirectory {
    /// A directory is present when both its address and its size are non-zero.
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.virtual_address != 0 && self.size != 0
    }
}

/// The data directory array of the optional header.
///
/// Holds at most [`DataDirectoryKind::COUNT`] entries; images may declare fewer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DataDirectories {
    entries: Vec<DataDirectory>,
}

impl DataDirectories {
    /// Decode `count` consecutive entries.
    ///
    /// # Errors
    /// Returns [`crate::Error::TruncatedInput`] if the parser runs out of data.
    pub fn parse(parser: &mut Parser, count: usize) -> Result<DataDirectories> {
        let count = count.min(DataDirectoryKind::COUNT);
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(DataDirectory {
                virtual_address: parser.read_le::<u32>()?,
                size: parser.read_le::<u32>()?,
            });
        }

        Ok(DataDirectories { entries })
    }

    /// Build from already decoded entries. Entries beyond the sixteenth are dropped.
    #[must_use]
    pub fn new(mut entries: Vec<DataDirectory>) -> DataDirectories {
        entries.truncate(DataDirectoryKind::COUNT);
        DataDirectories { entries }
    }

    /// Number of entries the image declares (after clamping).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the image declares no data directories.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The raw entry in the slot of `kind`, even if it is zero.
    #[must_use]
    pub fn raw(&self, kind: DataDirectoryKind) -> Option<&DataDirectory> {
        self.entries.get(kind as usize)
    }

    /// The entry for `kind`, or `None` if the slot is missing or empty.
    #[must_use]
    pub fn get(&self, kind: DataDirectoryKind) -> Option<DataDirectory> {
        self.raw(kind).copied().filter(DataDirectory::is_present)
    }

    /// Iterate over all declared slots together with their kind.
    pub fn iter(&self) -> impl Iterator<Item = (DataDirectoryKind, &DataDirectory)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| DataDirectoryKind::from_repr(index).map(|k| (k, entry)))
    }

    /// Locate the directory of `kind`.
    ///
    /// Returns `Ok(None)` when the slot is missing or empty. The RVA of every directory except
    /// the certificate table is translated through `sections`; the certificate table's address
    /// is already a file offset and is only checked against `source_size`.
    ///
    /// # Errors
    /// Returns [`crate::Error::DirectoryUnavailable`] if the address cannot be translated.
    pub fn locate(
        &self,
        kind: DataDirectoryKind,
        sections: &SectionTable,
        source_size: u64,
    ) -> Result<Option<LocatedDirectory>> {
        let Some(entry) = self.get(kind) else {
            return Ok(None);
        };

        let offset = if kind == DataDirectoryKind::Certificate {
            let start = u64::from(entry.virtual_address);
            if start + u64::from(entry.size) > source_size {
                Err(AddressError::InvalidOffset {
                    offset: start,
                    len: source_size,
                })
            } else {
                Ok(start)
            }
        } else {
            sections.resolve(entry.virtual_address)
        };

        match offset {
            Ok(offset) => {
                log::debug!(
                    "{kind} directory at RVA {:#x} -> offset {offset:#x}, {} bytes",
                    entry.virtual_address,
                    entry.size
                );
                Ok(Some(LocatedDirectory {
                    kind,
                    rva: entry.virtual_address,
                    size: entry.size,
                    offset,
                }))
            }
            Err(error) => Err(Error::DirectoryUnavailable {
                kind,
                source: Box::new(error.into()),
            }),
        }
    }
}

/// A data directory that was successfully translated to a file offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocatedDirectory {
    /// Which directory this is
    pub kind: DataDirectoryKind,
    /// The address from the data directory entry
    pub rva: u32,
    /// The size from the data directory entry
    pub size: u32,
    /// File offset of the first byte of the directory
    pub offset: u64,
}

impl LocatedDirectory {
    /// Returns true if `rva` falls inside the directory's declared extent.
    #[must_use]
    pub fn contains_rva(&self, rva: u32) -> bool {
        rva >= self.rva && u64::from(rva) < u64::from(self.rva) + u64::from(self.size)
    }
}

impl fmt::Display for LocatedDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: RVA {:#010x}, size {:#x}, offset {:#x}",
            self.kind, self.rva, self.size, self.offset
        )
    }
}
