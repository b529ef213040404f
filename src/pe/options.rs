//! Parser limits for PE loading
//!
//! Every count and length in a PE image is attacker-controlled. These limits bound the work a
//! single [`crate::PeFile`] can be made to do and select which optional consistency checks run.

/// Configuration for PE parsing
///
/// The defaults match what the Windows loader tolerates and accept every well-formed image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOptions {
    /// Maximum number of section headers accepted from the COFF header (default: 96)
    pub max_sections: usize,

    /// Maximum nesting depth of the resource tree; the root directory is depth 0 (default: 32)
    pub max_resource_depth: usize,

    /// Maximum length of a NUL-terminated string, terminator included (default: 16384)
    pub max_string_length: usize,

    /// Maximum length of a resource name in UTF-16 code units (default: 4096)
    pub max_resource_name_length: usize,

    /// Reject import lookup entries whose reserved bits are set, and resource entries whose
    /// name flag disagrees with their place in the named or ID range (default: true)
    pub validate_reserved_bits: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            max_sections: 96,
            max_resource_depth: 32,
            max_string_length: 16384,
            max_resource_name_length: 4096,
            validate_reserved_bits: true,
        }
    }
}

impl ParseOptions {
    /// Creates a configuration for untrusted input
    ///
    /// Identical to the default, but resource trees may only nest eight levels. Real images use
    /// three (type, name, language).
    #[must_use]
    pub fn strict() -> Self {
        Self {
            max_resource_depth: 8,
            ..Self::default()
        }
    }

    /// Creates a configuration that accepts as much as the format can express
    ///
    /// Lifts the section limit to the full `u16` range, relaxes string limits and skips the
    /// reserved-bit check. The resource depth stays bounded.
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            max_sections: u16::MAX as usize,
            max_resource_depth: 64,
            max_string_length: 65536,
            max_resource_name_length: u16::MAX as usize,
            validate_reserved_bits: false,
        }
    }
}
