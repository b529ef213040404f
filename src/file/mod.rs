//! PE file abstraction.
//!
//! This module provides the [`crate::file::PeFile`] handle, which owns the bytes of an image and
//! its eagerly parsed headers, and hands out the lazy directory readers of [`crate::pe`]. The
//! bytes come from a [`crate::file::Backend`], so the same parser runs over an in-memory buffer,
//! a memory-mapped file or any seekable stream.
//!
//! # Architecture
//!
//! - **Backend system** - Pluggable, bounds-checked data sources
//! - **Source** - A shared handle around the backend that can be closed
//! - **Header parsing** - DOS header, PE signature, COFF header, optional header and section
//!   table are decoded when the file is opened
//! - **Address translation** - RVA, VA and file offset conversion through the section table
//! - **Directory access** - Imports, exports and resources, decoded on demand
//!
//! # Key Components
//!
//! ## Core Types
//! - [`crate::file::PeFile`] - Main PE file handle
//! - [`crate::file::Backend`] - Trait for different data sources
//!
//! ## Parsing Infrastructure
//! - [`crate::file::parser::Parser`] - Cursor over a byte slice
//! - [`crate::file::io`] - Little-endian reading helpers
//!
//! ## Backend Implementations
//! - [`crate::file::Physical`] - Memory-mapped file backend
//! - [`crate::file::Memory`] - In-memory buffer backend
//! - [`crate::file::Stream`] - Any `Read + Seek` value
//!
//! # Examples
//!
//! ## Loading from File
//!
//! ```rust,no_run
//! use pescope::PeFile;
//! use std::path::Path;
//!
//! let file = PeFile::from_file(Path::new("C:/Windows/System32/kernel32.dll"))?;
//! println!("Loaded PE file with {} bytes", file.len());
//! println!("Image base: 0x{:x}", file.image_base());
//! println!("Number of sections: {}", file.sections().len());
//! # Ok::<(), pescope::Error>(())
//! ```
//!
//! ## Walking the Imports
//!
//! ```rust,no_run
//! use pescope::PeFile;
//! use std::path::Path;
//!
//! let file = PeFile::from_file(Path::new("notepad.exe"))?;
//! for descriptor in file.imports()? {
//!     let descriptor = descriptor?;
//!     println!("{}", descriptor.name());
//!     for symbol in descriptor.symbols() {
//!         println!("    {}", symbol?);
//!     }
//! }
//! # Ok::<(), pescope::Error>(())
//! ```
//!
//! ## Address Translation
//!
//! ```rust,no_run
//! use pescope::PeFile;
//! use std::path::Path;
//!
//! let file = PeFile::from_file(Path::new("notepad.exe"))?;
//! let entry = file.entry_point();
//! let offset = file.rva_to_offset(entry)?;
//! let code = file.read_rva(entry, 16)?;
//! println!("Entry point at offset 0x{offset:x}: {code:02x?}");
//! # Ok::<(), pescope::Error>(())
//! ```
//!
//! # Thread Safety
//!
//! [`crate::file::PeFile`] is `Send + Sync`. Every read is addressed by absolute offset, so
//! independent iterators can be advanced from several threads at once.

pub mod io;
pub mod parser;

mod memory;
mod physical;
mod source;
mod stream;

pub use memory::Memory;
pub use physical::Physical;
pub use source::Source;
pub use stream::Stream;

use std::{
    borrow::Cow,
    fmt,
    io::{Read, Seek},
    ops::Range,
    path::Path,
};

use crate::{
    file::{
        io::{read_le, PeIO},
        parser::Parser,
    },
    pe::{
        verify_pe_signature, CoffHeader, DataDirectories, DataDirectoryKind, DosHeader,
        ExportDirectory, ImportTable, LocatedDirectory, OptionalHeader, ParseOptions,
        ResourceData, ResourceDirectory, SectionTable, COFF_HEADER_SIZE, DOS_HEADER_SIZE,
        SECTION_HEADER_SIZE,
    },
    AddressError,
    Error::{Empty, ResourceClosed},
    Result,
};

/// Backend trait for file data sources.
///
/// This trait abstracts over the source of PE data. Implementations never zero-fill: a read
/// that cannot be satisfied in full fails with [`crate::Error::TruncatedInput`]. All
/// implementations must be thread-safe.
pub trait Backend: Send + Sync {
    /// Returns `len` bytes starting at `offset`.
    ///
    /// Backends that hold the whole file in memory return borrowed data; others return an
    /// owned buffer.
    ///
    /// # Arguments
    ///
    /// * `offset` - The starting offset within the data.
    /// * `len` - The length of the slice in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::TruncatedInput`] if the requested range is out of bounds.
    fn read(&self, offset: u64, len: usize) -> Result<Cow<'_, [u8]>>;

    /// Returns the total length of the data in bytes.
    fn size(&self) -> u64;
}

/// Validate `offset..offset + len` against a source of `size` bytes.
pub(crate) fn checked_range(offset: u64, len: usize, size: u64) -> Result<Range<usize>> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= size => Ok(offset as usize..end as usize),
        _ => Err(truncated_error!(offset, len, size.saturating_sub(offset))),
    }
}

/// A loaded PE image.
///
/// Owns the byte source and the headers, which are parsed when the file is opened. The
/// directories are decoded lazily by the readers this type hands out; they borrow the file and
/// read through it, so they stay valid exactly as long as the file does.
///
/// After [`PeFile::close`] the headers stay available, but every read of the image (including
/// those of iterators created before) fails with [`crate::Error::ResourceClosed`].
///
/// # Examples
///
/// ```rust,no_run
/// use pescope::PeFile;
/// use std::fs;
///
/// let data = fs::read("notepad.exe")?;
/// let file = PeFile::from_mem(data)?;
///
/// println!("{}", file.coff_header());
/// for section in file.sections() {
///     println!("{section}");
/// }
/// # Ok::<(), pescope::Error>(())
/// ```
pub struct PeFile {
    source: Source,
    options: ParseOptions,
    dos_header: DosHeader,
    coff_header: CoffHeader,
    optional_header: OptionalHeader,
    sections: SectionTable,
}

impl fmt::Debug for PeFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeFile")
            .field("len", &self.source.size())
            .field("closed", &self.source.is_closed())
            .field("coff_header", &self.coff_header)
            .field("sections", &self.sections.len())
            .finish_non_exhaustive()
    }
}

impl PeFile {
    /// Loads a PE file from the given path. The file is memory-mapped.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the PE file on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or mapped, is empty, or its headers
    /// cannot be parsed.
    pub fn from_file(path: &Path) -> Result<PeFile> {
        Self::from_file_with_options(path, ParseOptions::default())
    }

    /// Loads a PE file from the given path with custom parse options.
    ///
    /// # Errors
    ///
    /// See [`PeFile::from_file`].
    pub fn from_file_with_options(path: &Path, options: ParseOptions) -> Result<PeFile> {
        let input = Physical::new(path)?;

        Self::load(Box::new(input), options)
    }

    /// Loads a PE file from a memory buffer.
    ///
    /// # Arguments
    ///
    /// * `data` - The bytes of the PE file.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is empty or its headers cannot be parsed.
    pub fn from_mem(data: Vec<u8>) -> Result<PeFile> {
        Self::from_mem_with_options(data, ParseOptions::default())
    }

    /// Loads a PE file from a memory buffer with custom parse options.
    ///
    /// # Errors
    ///
    /// See [`PeFile::from_mem`].
    pub fn from_mem_with_options(data: Vec<u8>, options: ParseOptions) -> Result<PeFile> {
        let input = Memory::new(data);

        Self::load(Box::new(input), options)
    }

    /// Loads a PE file from a seekable stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be read or seeked, is empty, or its headers
    /// cannot be parsed.
    pub fn from_reader<R: Read + Seek + Send + 'static>(reader: R) -> Result<PeFile> {
        Self::from_reader_with_options(reader, ParseOptions::default())
    }

    /// Loads a PE file from a seekable stream with custom parse options.
    ///
    /// # Errors
    ///
    /// See [`PeFile::from_reader`].
    pub fn from_reader_with_options<R: Read + Seek + Send + 'static>(
        reader: R,
        options: ParseOptions,
    ) -> Result<PeFile> {
        let input = Stream::new(reader)?;

        Self::load(Box::new(input), options)
    }

    /// Loads a PE file from a caller-provided backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is empty or its headers cannot be parsed.
    pub fn from_backend<B: Backend + 'static>(backend: B) -> Result<PeFile> {
        Self::from_backend_with_options(backend, ParseOptions::default())
    }

    /// Loads a PE file from a caller-provided backend with custom parse options.
    ///
    /// # Errors
    ///
    /// See [`PeFile::from_backend`].
    pub fn from_backend_with_options<B: Backend + 'static>(
        backend: B,
        options: ParseOptions,
    ) -> Result<PeFile> {
        Self::load(Box::new(backend), options)
    }

    /// Internal loader for any backend.
    fn load(backend: Box<dyn Backend>, options: ParseOptions) -> Result<PeFile> {
        if backend.size() == 0 {
            return Err(Empty);
        }

        let source = Source::new(backend);
        let size = source.size();

        let dos_header = source.with_bytes(0, DOS_HEADER_SIZE, |data| {
            DosHeader::parse(&mut Parser::new(data))
        })?;

        let pe_offset = u64::from(dos_header.e_lfanew);
        if pe_offset + 4 > size {
            return Err(AddressError::InvalidOffset {
                offset: pe_offset,
                len: size,
            }
            .into());
        }
        source.with_bytes(pe_offset, 4, |data| {
            verify_pe_signature(&mut Parser::at(data, pe_offset))
        })?;

        let coff_offset = pe_offset + 4;
        let coff_header = source.with_bytes(coff_offset, COFF_HEADER_SIZE, |data| {
            CoffHeader::parse(&mut Parser::at(data, coff_offset), &options)
        })?;

        let optional_offset = coff_offset + COFF_HEADER_SIZE as u64;
        let optional_size = usize::from(coff_header.size_of_optional_header);
        let optional_header = source.with_bytes(optional_offset, optional_size, |data| {
            OptionalHeader::parse(&mut Parser::at(data, optional_offset))
        })?;

        let sections_offset = optional_offset + optional_size as u64;
        let section_count = usize::from(coff_header.number_of_sections);
        let sections = source.with_bytes(
            sections_offset,
            section_count * SECTION_HEADER_SIZE,
            |data| SectionTable::parse(&mut Parser::at(data, sections_offset), section_count),
        )?;

        log::debug!(
            "Loaded PE image: {}, {} sections, {} bytes",
            coff_header.machine,
            sections.len(),
            size
        );

        Ok(PeFile {
            source,
            options,
            dos_header,
            coff_header,
            optional_header,
            sections,
        })
    }

    /// Returns the total size of the loaded file in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.source.size()
    }

    /// Returns `true` if the file has a length of zero. Never true for a loaded file.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The options this file was parsed with.
    #[must_use]
    pub fn options(&self) -> &ParseOptions {
        &self.options
    }

    /// Returns the DOS header.
    #[must_use]
    pub fn dos_header(&self) -> &DosHeader {
        &self.dos_header
    }

    /// Returns the COFF file header.
    #[must_use]
    pub fn coff_header(&self) -> &CoffHeader {
        &self.coff_header
    }

    /// Returns the optional header.
    #[must_use]
    pub fn optional_header(&self) -> &OptionalHeader {
        &self.optional_header
    }

    /// Returns the section table.
    #[must_use]
    pub fn sections(&self) -> &SectionTable {
        &self.sections
    }

    /// Returns the data directory array.
    #[must_use]
    pub fn data_directories(&self) -> &DataDirectories {
        &self.optional_header.data_directories
    }

    /// Returns true for PE32+ (64-bit) images.
    #[must_use]
    pub fn is_pe32_plus(&self) -> bool {
        self.optional_header.is_pe32_plus()
    }

    /// Returns the preferred load address.
    #[must_use]
    pub fn image_base(&self) -> u64 {
        self.optional_header.image_base
    }

    /// Returns the RVA of the entry point, zero if there is none.
    #[must_use]
    pub fn entry_point(&self) -> u32 {
        self.optional_header.address_of_entry_point
    }

    /// Locate a data directory.
    ///
    /// Returns `Ok(None)` if the image does not have the directory.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::DirectoryUnavailable`] if the directory's address cannot be
    /// translated. Other directories are unaffected.
    pub fn directory(&self, kind: DataDirectoryKind) -> Result<Option<LocatedDirectory>> {
        self.data_directories()
            .locate(kind, &self.sections, self.source.size())
    }

    /// Returns the import table. Images without imports yield an empty table.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::DirectoryUnavailable`] if the import directory cannot be
    /// located. Errors of individual descriptors surface while iterating.
    pub fn imports(&self) -> Result<ImportTable<'_>> {
        let located = self.directory(DataDirectoryKind::Import)?;
        Ok(ImportTable::new(self, located))
    }

    /// Returns the export directory, if the image has one.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::DirectoryUnavailable`] if the export directory cannot be
    /// located, and [`crate::Error::Malformed`] or [`crate::Error::TruncatedInput`] if its
    /// header is invalid.
    pub fn exports(&self) -> Result<Option<ExportDirectory<'_>>> {
        match self.directory(DataDirectoryKind::Export)? {
            Some(located) => Ok(Some(ExportDirectory::parse(self, located)?)),
            None => Ok(None),
        }
    }

    /// Returns a lazy handle on the root of the resource tree, if the image has one.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::DirectoryUnavailable`] if the resource directory cannot be
    /// located, and [`crate::Error::TruncatedInput`] if the root directory header is cut short.
    pub fn resource_root(&self) -> Result<Option<ResourceDirectory<'_>>> {
        match self.directory(DataDirectoryKind::Resource)? {
            Some(located) => Ok(Some(ResourceDirectory::root(self, located)?)),
            None => Ok(None),
        }
    }

    /// Read the bytes a resource data entry describes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::AddressOutOfRange`] if the data does not lie within one section,
    /// and [`crate::Error::TruncatedInput`] if the file ends before it does.
    pub fn resource_data(&self, data: &ResourceData) -> Result<Vec<u8>> {
        self.read_rva(data.data_rva, data.size)
    }

    /// Convert an RVA to a file offset.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::AddressOutOfRange`] if no section maps the RVA.
    pub fn rva_to_offset(&self, rva: u32) -> Result<u64> {
        Ok(self.sections.resolve(rva)?)
    }

    /// Convert a file offset to an RVA.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::AddressOutOfRange`] if no section's raw data covers the offset.
    pub fn offset_to_rva(&self, offset: u64) -> Result<u32> {
        self.sections.offset_to_rva(offset).ok_or_else(|| {
            AddressError::InvalidOffset {
                offset,
                len: self.source.size(),
            }
            .into()
        })
    }

    /// Convert a virtual address to a file offset.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::AddressOutOfRange`] if the address lies below the image base,
    /// more than 4 GiB above it, or in no section.
    pub fn va_to_offset(&self, va: u64) -> Result<u64> {
        let image_base = self.image_base();
        let overflow = AddressError::Overflow {
            base: image_base,
            add: va,
        };

        let delta = va.checked_sub(image_base).ok_or(overflow.clone())?;
        let rva = u32::try_from(delta).map_err(|_| overflow)?;

        self.rva_to_offset(rva)
    }

    /// Read `len` bytes at `rva`. The span must lie within a single section.
    ///
    /// Bytes past the section's raw data but inside its virtual size read as zero, as they do
    /// in the loaded image.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::AddressOutOfRange`] if the span is not mapped by one section,
    /// [`crate::Error::TruncatedInput`] if the file ends before the section's raw data does, and
    /// [`crate::Error::ResourceClosed`] after [`PeFile::close`].
    pub fn read_rva(&self, rva: u32, len: u32) -> Result<Vec<u8>> {
        self.with_rva_bytes(rva, len, |data, _| Ok(data.to_vec()))
    }

    /// Release the byte source. The headers stay available; every later read fails with
    /// [`crate::Error::ResourceClosed`]. Idempotent.
    pub fn close(&self) {
        log::debug!("Closing PE source");
        self.source.close();
    }

    /// Returns true once [`PeFile::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.source.is_closed()
    }

    /// Run `f` over the `len` bytes at `rva` together with their file offset.
    ///
    /// Only the part of the span backed by the section's raw data is read from the source; the
    /// rest is zero-filled up to the section's virtual size.
    pub(crate) fn with_rva_bytes<T>(
        &self,
        rva: u32,
        len: u32,
        f: impl FnOnce(&[u8], u64) -> Result<T>,
    ) -> Result<T> {
        let (offset, backed) = self.sections.resolve_backed(rva, len)?;
        if backed == len {
            return self.source.with_bytes(offset, len as usize, |data| f(data, offset));
        }

        log::trace!("RVA {rva:#x}: {backed:#x} of {len:#x} bytes backed by raw data");
        let mut buffer = vec![0_u8; len as usize];
        if backed > 0 {
            self.source.with_bytes(offset, backed as usize, |data| {
                buffer[..data.len()].copy_from_slice(data);
                Ok(())
            })?;
        } else if self.source.is_closed() {
            return Err(ResourceClosed);
        }
        f(&buffer, offset)
    }

    /// Decode a fixed-size record of `len` bytes at `rva` with a [`Parser`] positioned at its
    /// start. See [`PeFile::with_rva_bytes`].
    pub(crate) fn parse_rva<T>(
        &self,
        rva: u32,
        len: u32,
        f: impl FnOnce(&mut Parser) -> Result<T>,
    ) -> Result<T> {
        self.with_rva_bytes(rva, len, |data, offset| f(&mut Parser::at(data, offset)))
    }

    /// Read a little-endian value at `rva`. The value must lie within a single section.
    pub(crate) fn read_rva_le<T: PeIO>(&self, rva: u32) -> Result<T> {
        self.with_rva_bytes(rva, std::mem::size_of::<T>() as u32, |data, _| {
            read_le::<T>(data)
        })
    }

    /// Read a NUL-terminated string at `rva`.
    ///
    /// The string must end within [`ParseOptions::max_string_length`] bytes and within the
    /// virtual extent of the section it starts in. Reaching the end of the section's raw data
    /// inside that window ends the string, since the image is zero from there on.
    pub(crate) fn read_rva_cstring(&self, rva: u32) -> Result<String> {
        let section = self
            .sections
            .find(rva)
            .ok_or(AddressError::Unmapped { rva })?;
        let offset = self.sections.resolve(rva)?;

        let window = (section.virtual_end() - u64::from(rva))
            .min(self.options.max_string_length as u64);
        let backed = section.raw_remaining(rva);

        if backed < window {
            self.source.read_cstring_padded(offset, backed as usize)
        } else {
            self.source.read_cstring(offset, window as usize)
        }
    }
}
