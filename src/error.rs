use thiserror::Error;

use crate::pe::DataDirectoryKind;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! truncated_error {
    ($offset:expr, $needed:expr, $available:expr) => {
        crate::Error::TruncatedInput {
            offset: $offset as u64,
            needed: $needed as usize,
            available: $available as u64,
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The variants follow the way a PE image falls apart in practice: the input may simply be too
/// short, it may not be a PE image at all, it may be a PE variant this crate does not decode, or
/// one of its many relative addresses may point nowhere. Every variant carries the offset (or
/// RVA) and the expected/found values needed to report the problem precisely.
///
/// # Error Categories
///
/// ## Structural Errors
/// - [`Error::TruncatedInput`] - The source ends before a fixed-size structure does
/// - [`Error::InvalidSignature`] - `MZ` or `PE\0\0` magic mismatch
/// - [`Error::UnsupportedFormat`] - A recognised field holds a value this crate does not handle
/// - [`Error::Malformed`] - Internally inconsistent structure
/// - [`Error::Empty`] - Empty input provided
///
/// ## Address Errors
/// - [`Error::AddressOutOfRange`] - An RVA or offset that does not map into the image
/// - [`Error::DirectoryUnavailable`] - One data directory could not be located
///
/// ## Table Errors
/// - [`Error::StringDecode`] - Unterminated or invalid string
/// - [`Error::DepthExceeded`] - Resource tree nested deeper than allowed
///
/// ## Source Errors
/// - [`Error::ResourceClosed`] - The backing source was released
/// - [`Error::FileError`] - Filesystem I/O errors
///
/// # Examples
///
/// ```rust,no_run
/// use pescope::{Error, PeFile};
/// use std::path::Path;
///
/// match PeFile::from_file(Path::new("notepad.exe")) {
///     Ok(file) => println!("{} sections", file.sections().len()),
///     Err(Error::InvalidSignature { what, found, .. }) => {
///         eprintln!("not a PE image: bad {what} magic {found:#x}");
///     }
///     Err(Error::TruncatedInput { offset, needed, .. }) => {
///         eprintln!("file ends early: {needed} bytes needed at {offset:#x}");
///     }
///     Err(e) => eprintln!("Other error: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The source ended before a required structure did.
    ///
    /// Raised instead of zero-filling whenever a read of `needed` bytes at `offset` cannot be
    /// satisfied; `available` is the number of bytes the source still holds from `offset`.
    #[error("Truncated input - needed {needed} bytes at offset {offset:#x}, {available} available")]
    TruncatedInput {
        /// Absolute file offset of the failed read
        offset: u64,
        /// Number of bytes the structure requires
        needed: usize,
        /// Number of bytes actually available from `offset`
        available: u64,
    },

    /// A magic number did not match.
    #[error("Invalid {what} signature at offset {offset:#x} - expected {expected:#x}, found {found:#x}")]
    InvalidSignature {
        /// Which signature was checked (`"DOS"` or `"PE"`)
        what: &'static str,
        /// Absolute file offset of the signature
        offset: u64,
        /// The value the format requires
        expected: u32,
        /// The value that was read
        found: u32,
    },

    /// A recognised field carries a value this library does not decode.
    ///
    /// Kept apart from [`Error::Malformed`]: the input may well be a valid image of a newer or
    /// foreign variant rather than a corrupted one.
    #[error("Unsupported {what} - {value:#x}")]
    UnsupportedFormat {
        /// The field that holds the unsupported value
        what: &'static str,
        /// The value found
        value: u64,
    },

    /// An RVA or file offset that cannot be mapped into the image.
    #[error("Address out of range - {0}")]
    AddressOutOfRange(#[from] AddressError),

    /// A string could not be decoded at the given offset.
    #[error("String decode error at offset {offset:#x} - {reason}")]
    StringDecode {
        /// Absolute file offset the string starts at
        offset: u64,
        /// What went wrong
        reason: String,
    },

    /// The resource tree nests deeper than the configured limit.
    ///
    /// Malformed or adversarial images can point a sub-directory back at one of its ancestors;
    /// the depth limit turns such cycles into this error.
    #[error("Resource tree exceeds the maximum depth of {limit} at directory offset {offset:#x}")]
    DepthExceeded {
        /// The configured depth limit
        limit: usize,
        /// Offset of the offending directory, relative to the resource directory start
        offset: u32,
    },

    /// The backing source has been released.
    ///
    /// Returned by every lazy sequence that is advanced after [`crate::PeFile::close`].
    #[error("The backing source has been closed")]
    ResourceClosed,

    /// A single data directory could not be located.
    ///
    /// Only the accessor of the affected directory returns this; the headers and all other
    /// directories stay usable.
    #[error("{kind} directory unavailable - {source}")]
    DirectoryUnavailable {
        /// The directory that failed
        kind: DataDirectoryKind,
        /// Why it failed
        #[source]
        source: Box<Error>,
    },

    /// The file is damaged and could not be parsed.
    ///
    /// This error indicates that a structure is internally inconsistent. The error includes
    /// the source location where the malformation was detected for debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    ///
    /// Wraps standard I/O errors that can occur while opening, mapping or reading a file.
    #[error("{0}")]
    FileError(#[from] std::io::Error),
}

/// Failures of RVA and offset translation.
///
/// Produced by [`crate::pe::SectionTable::resolve`] and friends, and wrapped into
/// [`Error::AddressOutOfRange`] when it crosses into the rest of the crate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// No section maps the RVA.
    #[error("RVA {rva:#x} is not mapped by any section")]
    Unmapped {
        /// The RVA that was looked up
        rva: u32,
    },

    /// The span starts inside a section but runs past its end.
    #[error("span {rva:#x}+{size:#x} crosses the end of section '{section}' at {section_end:#x}")]
    CrossesSection {
        /// Start of the span
        rva: u32,
        /// Length of the span
        size: u32,
        /// Name of the section the span starts in
        section: String,
        /// First RVA past the section
        section_end: u64,
    },

    /// A raw file offset lies outside the source.
    #[error("offset {offset:#x} lies outside the {len:#x}-byte source")]
    InvalidOffset {
        /// The offending offset
        offset: u64,
        /// Size of the source
        len: u64,
    },

    /// Address arithmetic overflowed.
    #[error("address arithmetic overflow - {base:#x} + {add:#x}")]
    Overflow {
        /// Base value
        base: u64,
        /// Value added to it
        add: u64,
    },
}
