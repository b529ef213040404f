//! PE/COFF structures.
//!
//! This module decodes the structures of a Portable Executable image, leaves first: the DOS and
//! COFF headers, the optional header with its data directory array, the section table that
//! translates RVAs to file offsets, and the import, export and resource directories that are
//! reached through it.
//!
//! # Key Components
//!
//! ## Headers
//! - [`crate::pe::DosHeader`], [`crate::pe::CoffHeader`] - The fixed headers at the start of the image
//! - [`crate::pe::OptionalHeader`] - PE32 / PE32+ optional header
//! - [`crate::pe::ParseOptions`] - Limits applied while parsing
//!
//! ## Address Translation
//! - [`crate::pe::SectionTable`] - `resolve(rva)` and `resolve_range(rva, size)`
//! - [`crate::pe::DataDirectories`] - Locates a directory by [`crate::pe::DataDirectoryKind`]
//!
//! ## Directories
//! - [`crate::pe::ImportTable`] - Lazy, restartable import descriptors and symbols
//! - [`crate::pe::ExportDirectory`] - Export header, named exports and ordinals
//! - [`crate::pe::ResourceDirectory`] - Lazy resource tree handles, materialization and walking
//!
//! All directory readers borrow the [`crate::PeFile`] they came from and read through it on
//! demand. Nothing beyond the headers is decoded until it is asked for.

mod directory;
mod exports;
mod header;
mod imports;
mod optional;
mod options;
mod resources;
mod section;

pub use directory::{
    DataDirectories, DataDirectory, DataDirectoryKind, LocatedDirectory, DATA_DIRECTORY_SIZE,
};
pub use exports::{Export, ExportDirectory, ExportTarget, Exports, EXPORT_DIRECTORY_SIZE};
pub use header::{
    verify_pe_signature, Characteristics, CoffHeader, DosHeader, Machine, SymbolTable,
    COFF_HEADER_SIZE, DOS_HEADER_SIZE, DOS_MAGIC, PE_SIGNATURE,
};
pub use imports::{
    ImportDescriptor, ImportDescriptors, ImportSymbols, ImportTable, ImportedSymbol,
    IMPORT_DESCRIPTOR_SIZE,
};
pub use optional::{
    DllCharacteristics, Magic, OptionalHeader, Subsystem, PE32_FIXED_SIZE, PE32_PLUS_FIXED_SIZE,
};
pub use options::ParseOptions;
pub use resources::{
    ResourceData, ResourceDirectory, ResourceDirectoryHeader, ResourceEntries, ResourceEntry,
    ResourceName, ResourceNode, ResourceTree, ResourceTreeEntry, ResourceTreeNode, ResourceType,
    ResourceWalker, WalkEntry,
};
pub use section::{Section, SectionFlags, SectionTable, SECTION_HEADER_SIZE};
