//! Export directory.
//!
//! A 40-byte header points at three tables: the export address table (one RVA per ordinal), the
//! name pointer table (RVAs of the exported names, sorted lexically) and the ordinal table, which
//! maps each name to an index into the address table. An address that points back into the
//! export directory itself is not code but a forwarder string such as `NTDLL.RtlAllocateHeap`.

use std::fmt;

use crate::{
    file::PeFile,
    pe::LocatedDirectory,
    AddressError, Result,
};

/// Size of the export directory header in bytes
pub const EXPORT_DIRECTORY_SIZE: usize = 40;

/// Where an export leads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExportTarget {
    /// RVA of the exported code or data
    Rva(u32),
    /// `DLL.Symbol` or `DLL.#ordinal` in another module
    Forwarder(String),
}

/// One exported symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Export {
    /// Biased ordinal (index into the address table plus the ordinal base)
    pub ordinal: u32,
    /// Export name, `None` for ordinal-only exports
    pub name: Option<String>,
    /// Where the export leads
    pub target: ExportTarget,
}

impl fmt::Display for Export {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ", self.ordinal)?;
        match &self.name {
            Some(name) => write!(f, "{name}")?,
            None => f.write_str("<unnamed>")?,
        }
        match &self.target {
            ExportTarget::Rva(rva) => write!(f, " -> {rva:#x}"),
            ExportTarget::Forwarder(forward) => write!(f, " -> {forward}"),
        }
    }
}

/// The export directory of a [`PeFile`].
#[derive(Debug, Clone)]
pub struct ExportDirectory<'a> {
    file: &'a PeFile,
    directory: LocatedDirectory,
    /// Seconds since 1970-01-01 00:00 UTC at link time
    pub time_date_stamp: u32,
    /// Major version, user defined
    pub major_version: u16,
    /// Minor version, user defined
    pub minor_version: u16,
    /// RVA of the DLL name
    pub name_rva: u32,
    /// Ordinal of the first address table entry
    pub ordinal_base: u32,
    /// Number of address table entries
    pub address_table_entries: u32,
    /// Number of entries in the name pointer and ordinal tables
    pub number_of_name_pointers: u32,
    /// RVA of the export address table
    pub export_address_table_rva: u32,
    /// RVA of the name pointer table
    pub name_pointer_rva: u32,
    /// RVA of the ordinal table
    pub ordinal_table_rva: u32,
}

impl<'a> ExportDirectory<'a> {
    /// Decode the export directory header.
    ///
    /// # Errors
    /// Returns [`crate::Error::AddressOutOfRange`] if the header does not fit in its section,
    /// [`crate::Error::TruncatedInput`] if the file ends first, and
    /// [`crate::Error::Malformed`] if its reserved flags field is not zero.
    pub(crate) fn parse(file: &'a PeFile, directory: LocatedDirectory) -> Result<Self> {
        file.parse_rva(directory.rva, EXPORT_DIRECTORY_SIZE as u32, |parser| {
            let flags = parser.read_le::<u32>()?;
            if flags != 0 {
                return Err(malformed_error!("Invalid export flags: {:#x}", flags));
            }

            Ok(ExportDirectory {
                file,
                directory,
                time_date_stamp: parser.read_le::<u32>()?,
                major_version: parser.read_le::<u16>()?,
                minor_version: parser.read_le::<u16>()?,
                name_rva: parser.read_le::<u32>()?,
                ordinal_base: parser.read_le::<u32>()?,
                address_table_entries: parser.read_le::<u32>()?,
                number_of_name_pointers: parser.read_le::<u32>()?,
                export_address_table_rva: parser.read_le::<u32>()?,
                name_pointer_rva: parser.read_le::<u32>()?,
                ordinal_table_rva: parser.read_le::<u32>()?,
            })
        })
    }

    /// The located export directory.
    #[must_use]
    pub fn directory(&self) -> &LocatedDirectory {
        &self.directory
    }

    /// The name of the DLL as recorded by the linker.
    ///
    /// # Errors
    /// Returns [`crate::Error::StringDecode`] or [`crate::Error::AddressOutOfRange`] if the
    /// name cannot be read.
    pub fn name(&self) -> Result<String> {
        self.file.read_rva_cstring(self.name_rva)
    }

    /// Start a new pass over the named exports, in name pointer table order.
    #[must_use]
    pub fn iter(&self) -> Exports<'a> {
        Exports {
            directory: self.clone(),
            index: 0,
            done: false,
        }
    }

    /// Look an export up by its biased ordinal.
    ///
    /// Returns `Ok(None)` if the ordinal is outside the address table or its slot is empty.
    ///
    /// # Errors
    /// Returns an error if one of the tables cannot be read.
    pub fn by_ordinal(&self, ordinal: u32) -> Result<Option<Export>> {
        let Some(index) = ordinal.checked_sub(self.ordinal_base) else {
            return Ok(None);
        };
        if index >= self.address_table_entries {
            return Ok(None);
        }

        let Some(target) = self.target(index)? else {
            return Ok(None);
        };

        let mut name = None;
        for slot in 0..self.number_of_name_pointers {
            if u32::from(self.ordinal_at(slot)?) == index {
                name = Some(self.name_at(slot)?);
                break;
            }
        }

        Ok(Some(Export {
            ordinal,
            name,
            target,
        }))
    }

    fn table_rva(base: u32, index: u32, entry: u32) -> Result<u32> {
        index
            .checked_mul(entry)
            .and_then(|delta| base.checked_add(delta))
            .ok_or_else(|| {
                AddressError::Overflow {
                    base: u64::from(base),
                    add: u64::from(index) * u64::from(entry),
                }
                .into()
            })
    }

    fn ordinal_at(&self, slot: u32) -> Result<u16> {
        let rva = Self::table_rva(self.ordinal_table_rva, slot, 2)?;
        self.file.read_rva_le::<u16>(rva)
    }

    fn name_at(&self, slot: u32) -> Result<String> {
        let rva = Self::table_rva(self.name_pointer_rva, slot, 4)?;
        let name_rva = self.file.read_rva_le::<u32>(rva)?;
        self.file.read_rva_cstring(name_rva)
    }

    /// The target of address table entry `index`, `None` for an empty slot.
    fn target(&self, index: u32) -> Result<Option<ExportTarget>> {
        let rva = Self::table_rva(self.export_address_table_rva, index, 4)?;
        let address = self.file.read_rva_le::<u32>(rva)?;

        if address == 0 {
            Ok(None)
        } else if self.directory.contains_rva(address) {
            Ok(Some(ExportTarget::Forwarder(
                self.file.read_rva_cstring(address)?,
            )))
        } else {
            Ok(Some(ExportTarget::Rva(address)))
        }
    }

    fn read_named(&self, slot: u32) -> Result<Export> {
        let name = self.name_at(slot)?;
        let index = u32::from(self.ordinal_at(slot)?);
        if index >= self.address_table_entries {
            return Err(malformed_error!(
                "Export '{}' refers to address table entry {}, the table has {}",
                name,
                index,
                self.address_table_entries
            ));
        }

        let target = self.target(index)?.unwrap_or(ExportTarget::Rva(0));

        Ok(Export {
            ordinal: self.ordinal_base.wrapping_add(index),
            name: Some(name),
            target,
        })
    }
}

impl<'a> IntoIterator for &ExportDirectory<'a> {
    type Item = Result<Export>;
    type IntoIter = Exports<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the named exports.
///
/// An error is yielded once, after which the iterator is exhausted.
#[derive(Debug, Clone)]
pub struct Exports<'a> {
    directory: ExportDirectory<'a>,
    index: u32,
    done: bool,
}

impl Iterator for Exports<'_> {
    type Item = Result<Export>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.index >= self.directory.number_of_name_pointers {
            self.done = true;
            return None;
        }

        match self.directory.read_named(self.index) {
            Ok(export) => {
                log::trace!("Export {}: {export}", self.index);
                self.index += 1;
                Some(Ok(export))
            }
            Err(error) => {
                self.done = true;
                Some(Err(error))
            }
        }
    }
}

impl std::iter::FusedIterator for Exports<'_> {}
