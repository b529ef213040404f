//! # pescope Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the pescope library. Import this module to get quick access to the essential
//! types for reading PE images.
//!
//! ```rust,no_run
//! use pescope::prelude::*;
//!
//! let file = PeFile::from_file("sample.dll".as_ref())?;
//! if let Some(exports) = file.exports()? {
//!     println!("{}", exports.name()?);
//! }
//! # Ok::<(), Error>(())
//! ```

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all pescope operations
pub use crate::Error;

/// Address translation failures
pub use crate::AddressError;

/// The result type used throughout pescope
pub use crate::Result;

/// Limits applied while parsing
pub use crate::ParseOptions;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// Main entry point for PE image analysis
pub use crate::PeFile;

/// Byte sources a [`PeFile`] can read from
pub use crate::file::{Backend, Memory, Physical, Stream};

/// Low-level parsing utilities
pub use crate::{file::io::PeIO, Parser};

// ================================================================================================
// Headers
// ================================================================================================

pub use crate::pe::{
    Characteristics, CoffHeader, DllCharacteristics, DosHeader, Machine, Magic, OptionalHeader,
    Subsystem,
};

// ================================================================================================
// Sections and Data Directories
// ================================================================================================

pub use crate::pe::{
    DataDirectories, DataDirectory, DataDirectoryKind, LocatedDirectory, Section, SectionFlags,
    SectionTable,
};

// ================================================================================================
// Directories
// ================================================================================================

/// Import directory
pub use crate::pe::{ImportDescriptor, ImportTable, ImportedSymbol};

/// Export directory
pub use crate::pe::{Export, ExportDirectory, ExportTarget};

/// Resource directory
pub use crate::pe::{
    ResourceData, ResourceDirectory, ResourceEntry, ResourceName, ResourceNode, ResourceTree,
    ResourceTreeNode, ResourceType, WalkEntry,
};
