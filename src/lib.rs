// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::module_name_repetitions)]
//#![deny(unsafe_code)]
// - 'file/physical.rs' uses mmap to map a file into memory

//! # pescope
//!
//! A reader for Windows Portable Executable (PE/COFF) images. Given the bytes of an executable
//! or DLL, `pescope` decodes the DOS, COFF and optional headers, translates relative virtual
//! addresses through the section table, and exposes the import, export and resource
//! directories as lazy, restartable views.
//!
//! ## Features
//!
//! - **Several byte sources** - Memory buffers, memory-mapped files and `Read + Seek` streams
//! - **Lazy directories** - Nothing beyond the headers is decoded until it is asked for
//! - **Precise errors** - Every failure carries the offset and the expected and found values
//! - **Isolated failures** - A broken directory does not hide the headers or other directories
//! - **Bounded work** - Section counts, string lengths and resource depth are capped by [`ParseOptions`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pescope::prelude::*;
//!
//! let file = PeFile::from_file("C:/Windows/System32/kernel32.dll".as_ref())?;
//! println!("{} {}", file.coff_header().machine, file.optional_header());
//!
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
//! ## Architecture
//!
//! - [`file`] - Byte sources and the [`PeFile`] entry point
//! - [`pe`] - Headers, the section table and the directory readers
//! - [`prelude`] - Convenient re-exports of commonly used types
//! - [`Error`] and [`Result`] - Error handling
//!
//! ### Address translation
//!
//! Directories are referenced by RVA. [`pe::SectionTable::resolve`] maps an RVA to a file
//! offset through the section that covers it, and [`pe::SectionTable::resolve_range`]
//! additionally requires a span to stay within that section. All directory readers go
//! through these two operations.
//!
//! ### Lifetimes
//!
//! Directory readers borrow the [`PeFile`] and read from it on demand. Every read is
//! addressed by absolute offset, so independent iterators may be advanced interleaved or
//! from several threads. [`PeFile::close`] releases the byte source; pending iterators then
//! fail with [`Error::ResourceClosed`].
//!
//! ## Error Handling
//!
//! ```rust,no_run
//! use pescope::{Error, PeFile};
//!
//! match PeFile::from_file(std::path::Path::new("sample.exe")) {
//!     Ok(file) => println!("{} sections", file.sections().len()),
//!     Err(Error::InvalidSignature { what, .. }) => println!("not a PE image ({what})"),
//!     Err(Error::TruncatedInput { offset, .. }) => println!("truncated at {offset:#x}"),
//!     Err(e) => println!("Error: {}", e),
//! }
//! ```
//!
//! ## Development and Testing
//!
//! ```bash
//! cargo test
//! cargo +nightly fuzz run pefile --release
//! ```
#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

pub mod file;
pub mod pe;

/// Shared functionality which is used in unit- and integration-tests
#[cfg(test)]
pub(crate) mod test;

pub mod prelude;

/// The result type used throughout `pescope`.
///
/// ```rust,no_run
/// use pescope::{PeFile, Result};
///
/// fn load(path: &str) -> Result<PeFile> {
///     PeFile::from_file(std::path::Path::new(path))
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// `pescope` Error type
///
/// # Examples
///
/// ```rust,no_run
/// use pescope::{Error, PeFile};
///
/// match PeFile::from_mem(vec![0; 16]) {
///     Err(Error::TruncatedInput { needed, available, .. }) => {
///         println!("needed {needed} bytes, {available} available")
///     }
///     other => println!("{:?}", other.err()),
/// }
/// ```
pub use error::{AddressError, Error};

/// Main entry point for reading a PE image.
///
/// # Example
///
/// ```rust,no_run
/// use pescope::PeFile;
/// let file = PeFile::from_file(std::path::Path::new("sample.dll"))?;
/// println!("entry point at {:#x}", file.entry_point());
/// # Ok::<(), pescope::Error>(())
/// ```
pub use file::PeFile;

/// Low-level cursor over a byte slice.
pub use file::parser::Parser;

/// Limits applied while parsing.
pub use pe::ParseOptions;
