//! Little-endian reading helpers for PE structures.
//!
//! Every multi-byte integer in a PE image is little-endian; this is fixed by the format. The
//! [`crate::file::io::PeIO`] trait abstracts over the primitive integer types the format uses,
//! and the free functions read them from byte slices with bounds checking.
//!
//! # Key Components
//!
//! - [`crate::file::io::PeIO`] - Trait implemented for `u8`, `u16`, `u32`, `u64`
//! - [`crate::file::io::read_le`] - Read a value from the start of a buffer
//! - [`crate::file::io::read_le_at`] - Read a value at an offset and advance the offset
//! - [`crate::file::io::read_le_at_dyn`] - Read a pointer-sized value (4 or 8 bytes)
//!
//! # Usage Examples
//!
//! ```rust,ignore
//! use pescope::file::io::read_le_at;
//!
//! let data = [0x4C, 0x01, 0x03, 0x00];
//! let mut offset = 0;
//!
//! let machine: u16 = read_le_at(&data, &mut offset)?;  // offset: 0 -> 2
//! let sections: u16 = read_le_at(&data, &mut offset)?; // offset: 2 -> 4
//!
//! assert_eq!(machine, 0x014C);
//! assert_eq!(sections, 3);
//! # Ok::<(), pescope::Error>(())
//! ```
//!
//! # Error Handling
//!
//! All functions return [`crate::Error::TruncatedInput`] when the buffer holds fewer bytes than
//! the requested type. The reported offset is relative to the buffer; callers that know the
//! buffer's position in the file use [`crate::file::parser::Parser`], which rebases it.

use crate::Result;

/// Trait for implementing type-specific safe binary data reading operations.
///
/// Each implementation defines a `Bytes` associated type that represents the fixed-size
/// byte array required for that particular type (e.g., `[u8; 4]` for `u32`).
pub trait PeIO: Sized {
    /// Associated type representing the byte array type for this numeric type.
    type Bytes: Sized + for<'a> TryFrom<&'a [u8]>;

    /// Read T from a byte buffer in little-endian
    fn from_le_bytes(bytes: Self::Bytes) -> Self;
}

// Implement PeIO support for u64
impl PeIO for u64 {
    type Bytes = [u8; 8];

    fn from_le_bytes(bytes: Self::Bytes) -> Self {
        u64::from_le_bytes(bytes)
    }
}

// Implement PeIO support for u32
impl PeIO for u32 {
    type Bytes = [u8; 4];

    fn from_le_bytes(bytes: Self::Bytes) -> Self {
        u32::from_le_bytes(bytes)
    }
}

// Implement PeIO support for u16
impl PeIO for u16 {
    type Bytes = [u8; 2];

    fn from_le_bytes(bytes: Self::Bytes) -> Self {
        u16::from_le_bytes(bytes)
    }
}

// Implement PeIO support for u8
impl PeIO for u8 {
    type Bytes = [u8; 1];

    fn from_le_bytes(bytes: Self::Bytes) -> Self {
        u8::from_le_bytes(bytes)
    }
}

/// Read a little-endian value from the start of `data`.
///
/// # Errors
/// Returns [`crate::Error::TruncatedInput`] if `data` is shorter than `T`.
pub fn read_le<T: PeIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Read a little-endian value at `offset` and advance `offset` past it.
///
/// # Errors
/// Returns [`crate::Error::TruncatedInput`] if fewer than `size_of::<T>()` bytes remain.
pub fn read_le_at<T: PeIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(truncated_error!(*offset, type_len, 0));
    };
    if end > data.len() {
        return Err(truncated_error!(
            *offset,
            type_len,
            data.len().saturating_sub(*offset)
        ));
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(truncated_error!(*offset, type_len, data.len() - *offset));
    };

    *offset = end;

    Ok(T::from_le_bytes(read))
}

/// Read a pointer-sized value: 8 bytes when `is_large`, 4 bytes zero-extended otherwise.
///
/// Import lookup table entries and several optional-header fields change width between
/// PE32 and PE32+; this keeps the call sites free of the distinction.
///
/// # Errors
/// Returns [`crate::Error::TruncatedInput`] if the buffer is too short.
pub fn read_le_at_dyn(data: &[u8], offset: &mut usize, is_large: bool) -> Result<u64> {
    let res = if is_large {
        read_le_at::<u64>(data, offset)?
    } else {
        u64::from(read_le_at::<u32>(data, offset)?)
    };

    Ok(res)
}
