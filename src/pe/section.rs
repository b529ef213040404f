//! Section table and RVA translation.
//!
//! The section table follows the optional header and holds one 40-byte entry per section. Each
//! entry maps a range of RVAs onto a range of the file. Translation uses the first section (in
//! table order) whose virtual extent covers the RVA; overlapping sections are tolerated and
//! resolved by that rule.
//!
//! # Key Components
//! - [`crate::pe::section::Section`] - One decoded section header
//! - [`crate::pe::section::SectionFlags`] - Section characteristics
//! - [`crate::pe::section::SectionTable`] - The ordered table with `resolve` / `resolve_range`

use std::fmt;

use bitflags::bitflags;

use crate::{file::parser::Parser, AddressError, Result};

/// Size of one section header in bytes
pub const SECTION_HEADER_SIZE: usize = 40;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Section characteristics
    pub struct SectionFlags: u32 {
        /// Section should not be padded to the next boundary (object files only)
        const TYPE_NO_PAD = 0x0000_0008;
        /// Section contains executable code
        const CNT_CODE = 0x0000_0020;
        /// Section contains initialized data
        const CNT_INITIALIZED_DATA = 0x0000_0040;
        /// Section contains uninitialized data
        const CNT_UNINITIALIZED_DATA = 0x0000_0080;
        /// Section contains comments or other information (object files only)
        const LNK_INFO = 0x0000_0200;
        /// Section will not become part of the image (object files only)
        const LNK_REMOVE = 0x0000_0800;
        /// Section contains COMDAT data (object files only)
        const LNK_COMDAT = 0x0000_1000;
        /// Section contains data referenced through the global pointer
        const GPREL = 0x0000_8000;
        /// Alignment field, see [`SectionFlags::alignment`]
        const ALIGN_MASK = 0x00F0_0000;
        /// Section contains extended relocations
        const LNK_NRELOC_OVFL = 0x0100_0000;
        /// Section can be discarded as needed
        const MEM_DISCARDABLE = 0x0200_0000;
        /// Section cannot be cached
        const MEM_NOT_CACHED = 0x0400_0000;
        /// Section is not pageable
        const MEM_NOT_PAGED = 0x0800_0000;
        /// Section can be shared in memory
        const MEM_SHARED = 0x1000_0000;
        /// Section can be executed as code
        const MEM_EXECUTE = 0x2000_0000;
        /// Section can be read
        const MEM_READ = 0x4000_0000;
        /// Section can be written to
        const MEM_WRITE = 0x8000_0000;
    }
}

impl SectionFlags {
    /// Data alignment in bytes encoded in bits 20..24, if any (object files only).
    #[must_use]
    pub fn alignment(self) -> Option<u32> {
        match (self.bits() & Self::ALIGN_MASK.bits()) >> 20 {
            0 | 0xF => None,
            n => Some(1 << (n - 1)),
        }
    }
}

/// A decoded section header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Raw name, NUL-padded, not necessarily NUL-terminated
    pub name: [u8; 8],
    /// Size of the section when loaded
    pub virtual_size: u32,
    /// RVA of the first byte of the section when loaded
    pub virtual_address: u32,
    /// Size of the initialized data on disk
    pub size_of_raw_data: u32,
    /// File offset of the section's data
    pub pointer_to_raw_data: u32,
    /// File offset of the relocation entries (object files only)
    pub pointer_to_relocations: u32,
    /// File offset of the COFF line numbers (deprecated)
    pub pointer_to_linenumbers: u32,
    /// Number of relocation entries
    pub number_of_relocations: u16,
    /// Number of line-number entries
    pub number_of_linenumbers: u16,
    /// Section characteristics
    pub characteristics: SectionFlags,
}

impl Section {
    /// Decode one 40-byte section header.
    ///
    /// # Errors
    /// Returns [`crate::Error::TruncatedInput`] if the parser runs out of data.
    pub fn parse(parser: &mut Parser) -> Result<Section> {
        parser.ensure_remaining(SECTION_HEADER_SIZE)?;

        Ok(Section {
            name: parser.read_bytes::<8>()?,
            virtual_size: parser.read_le::<u32>()?,
            virtual_address: parser.read_le::<u32>()?,
            size_of_raw_data: parser.read_le::<u32>()?,
            pointer_to_raw_data: parser.read_le::<u32>()?,
            pointer_to_relocations: parser.read_le::<u32>()?,
            pointer_to_linenumbers: parser.read_le::<u32>()?,
            number_of_relocations: parser.read_le::<u16>()?,
            number_of_linenumbers: parser.read_le::<u16>()?,
            characteristics: SectionFlags::from_bits_retain(parser.read_le::<u32>()?),
        })
    }

    /// The section name with trailing NULs removed. Invalid UTF-8 is replaced.
    #[must_use]
    pub fn name(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(8);
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }

    /// Length of the virtual extent. Falls back to the raw data size when the virtual size is
    /// zero, as some linkers leave it unset.
    #[must_use]
    pub fn span(&self) -> u32 {
        if self.virtual_size == 0 {
            self.size_of_raw_data
        } else {
            self.virtual_size
        }
    }

    /// First RVA past the section.
    #[must_use]
    pub fn virtual_end(&self) -> u64 {
        u64::from(self.virtual_address) + u64::from(self.span())
    }

    /// Returns true if `rva` lies within the section's virtual extent.
    #[must_use]
    pub fn contains(&self, rva: u32) -> bool {
        rva >= self.virtual_address && u64::from(rva) < self.virtual_end()
    }

    /// Returns true if the file offset lies within the section's raw data.
    #[must_use]
    pub fn contains_offset(&self, offset: u64) -> bool {
        let start = u64::from(self.pointer_to_raw_data);
        offset >= start && offset < start + u64::from(self.size_of_raw_data)
    }

    /// Number of bytes of raw data from `rva` to the end of the section's data on disk.
    ///
    /// Zero if `rva` lies in the uninitialized tail of the section or outside it.
    #[must_use]
    pub fn raw_remaining(&self, rva: u32) -> u64 {
        if !self.contains(rva) {
            return 0;
        }
        u64::from(self.size_of_raw_data).saturating_sub(u64::from(rva - self.virtual_address))
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<8} RVA {:#010x} vsize {:#010x} raw {:#010x}+{:#x} {:?}",
            self.name(),
            self.virtual_address,
            self.virtual_size,
            self.pointer_to_raw_data,
            self.size_of_raw_data,
            self.characteristics
        )
    }
}

/// The ordered section table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SectionTable {
    sections: Vec<Section>,
}

impl SectionTable {
    /// Build a table from already decoded sections, keeping their order.
    #[must_use]
    pub fn new(sections: Vec<Section>) -> SectionTable {
        SectionTable { sections }
    }

    /// Decode `count` consecutive section headers.
    ///
    /// # Errors
    /// Returns [`crate::Error::TruncatedInput`] if the table is cut short.
    pub fn parse(parser: &mut Parser, count: usize) -> Result<SectionTable> {
        let mut sections = Vec::with_capacity(count);
        for _ in 0..count {
            let section = Section::parse(parser)?;
            if section.virtual_size == 0 {
                log::warn!(
                    "Section '{}' has a zero virtual size, using its raw size {:#x}",
                    section.name(),
                    section.size_of_raw_data
                );
            }
            sections.push(section);
        }

        Ok(SectionTable { sections })
    }

    /// Number of sections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    /// Returns true if the table has no sections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Iterate over the sections in table order.
    pub fn iter(&self) -> std::slice::Iter<'_, Section> {
        self.sections.iter()
    }

    /// The section at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Section> {
        self.sections.get(index)
    }

    /// The first section named `name`.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|section| section.name() == name)
    }

    /// The first section whose virtual extent covers `rva`.
    #[must_use]
    pub fn find(&self, rva: u32) -> Option<&Section> {
        self.sections.iter().find(|section| section.contains(rva))
    }

    /// Translate an RVA to a file offset.
    ///
    /// # Errors
    /// Returns [`AddressError::Unmapped`] if no section covers `rva`.
    pub fn resolve(&self, rva: u32) -> std::result::Result<u64, AddressError> {
        let section = self.find(rva).ok_or(AddressError::Unmapped { rva })?;
        Ok(u64::from(rva - section.virtual_address) + u64::from(section.pointer_to_raw_data))
    }

    /// Translate a span of `size` bytes at `rva`, which must lie within a single section.
    ///
    /// # Errors
    /// Returns [`AddressError::Unmapped`] if no section covers `rva`, and
    /// [`AddressError::CrossesSection`] if the span runs past the end of that section.
    pub fn resolve_range(&self, rva: u32, size: u32) -> std::result::Result<u64, AddressError> {
        self.resolve_backed(rva, size).map(|(offset, _)| offset)
    }

    /// Translate a span like [`SectionTable::resolve_range`] and also return how many of its
    /// leading bytes the section's raw data backs.
    ///
    /// The remaining `size - backed` bytes lie between `SizeOfRawData` and `VirtualSize`, where
    /// the image reads as zero. They must never be read from the file, which holds the next
    /// section's data there.
    ///
    /// # Errors
    /// Same as [`SectionTable::resolve_range`].
    pub fn resolve_backed(
        &self,
        rva: u32,
        size: u32,
    ) -> std::result::Result<(u64, u32), AddressError> {
        let section = self.find(rva).ok_or(AddressError::Unmapped { rva })?;

        let end = u64::from(rva) + u64::from(size);
        if end > section.virtual_end() {
            return Err(AddressError::CrossesSection {
                rva,
                size,
                section: section.name(),
                section_end: section.virtual_end(),
            });
        }

        let offset =
            u64::from(rva - section.virtual_address) + u64::from(section.pointer_to_raw_data);
        let backed = section.raw_remaining(rva).min(u64::from(size)) as u32;

        Ok((offset, backed))
    }

    /// Translate a file offset back to an RVA, using the first section whose raw data covers it.
    #[must_use]
    pub fn offset_to_rva(&self, offset: u64) -> Option<u32> {
        let section = self
            .sections
            .iter()
            .find(|section| section.contains_offset(offset))?;

        let delta = offset - u64::from(section.pointer_to_raw_data);
        u32::try_from(u64::from(section.virtual_address) + delta).ok()
    }
}

impl<'a> IntoIterator for &'a SectionTable {
    type Item = &'a Section;
    type IntoIter = std::slice::Iter<'a, Section>;

    fn into_iter(self) -> Self::IntoIter {
        self.sections.iter()
    }
}
