//! The optional header, in its PE32 and PE32+ variants.
//!
//! Despite its name the optional header is required for images. Its first field selects the
//! variant: PE32 images carry 32-bit address fields and an extra `BaseOfData`, PE32+ images
//! carry 64-bit ones. The header ends with the data directory array. The whole structure is
//! bounded by `SizeOfOptionalHeader` from the COFF header; nothing is read past it.

use std::fmt;

use bitflags::bitflags;
use strum::{EnumCount, FromRepr};

use crate::{
    file::parser::Parser,
    pe::{DataDirectories, DataDirectoryKind, DATA_DIRECTORY_SIZE},
    Error, Result,
};

/// Size of the fixed fields of a PE32 optional header
pub const PE32_FIXED_SIZE: usize = 96;
/// Size of the fixed fields of a PE32+ optional header
pub const PE32_PLUS_FIXED_SIZE: usize = 112;

/// Optional header variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr)]
#[repr(u16)]
pub enum Magic {
    /// 32-bit image
    Pe32 = 0x10b,
    /// 64-bit image
    Pe32Plus = 0x20b,
}

impl Magic {
    /// Size of the fixed fields of this variant, before the data directories.
    #[must_use]
    pub fn fixed_size(self) -> usize {
        match self {
            Magic::Pe32 => PE32_FIXED_SIZE,
            Magic::Pe32Plus => PE32_PLUS_FIXED_SIZE,
        }
    }
}

/// Windows subsystem required to run the image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, strum::Display)]
#[repr(u16)]
pub enum Subsystem {
    /// Unknown subsystem
    Unknown = 0,
    /// Device drivers and native Windows processes
    Native = 1,
    /// Windows graphical user interface
    #[strum(to_string = "Windows GUI")]
    WindowsGui = 2,
    /// Windows character subsystem
    #[strum(to_string = "Windows CUI")]
    WindowsCui = 3,
    /// OS/2 character subsystem
    #[strum(to_string = "OS/2 CUI")]
    Os2Cui = 5,
    /// POSIX character subsystem
    #[strum(to_string = "POSIX CUI")]
    PosixCui = 7,
    /// Native Win9x driver
    #[strum(to_string = "Native Windows")]
    NativeWindows = 8,
    /// Windows CE
    #[strum(to_string = "Windows CE GUI")]
    WindowsCeGui = 9,
    /// EFI application
    #[strum(to_string = "EFI application")]
    EfiApplication = 10,
    /// EFI driver with boot services
    #[strum(to_string = "EFI boot service driver")]
    EfiBootServiceDriver = 11,
    /// EFI driver with run-time services
    #[strum(to_string = "EFI runtime driver")]
    EfiRuntimeDriver = 12,
    /// EFI ROM image
    #[strum(to_string = "EFI ROM")]
    EfiRom = 13,
    /// XBOX
    Xbox = 14,
    /// Windows boot application
    #[strum(to_string = "Windows boot application")]
    WindowsBootApplication = 16,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// DLL characteristics of the optional header
    pub struct DllCharacteristics: u16 {
        /// Image can handle a high entropy 64-bit virtual address space
        const HIGH_ENTROPY_VA = 0x0020;
        /// DLL can be relocated at load time
        const DYNAMIC_BASE = 0x0040;
        /// Code integrity checks are enforced
        const FORCE_INTEGRITY = 0x0080;
        /// Image is NX compatible
        const NX_COMPAT = 0x0100;
        /// Isolation aware, but do not isolate the image
        const NO_ISOLATION = 0x0200;
        /// Does not use structured exception handling
        const NO_SEH = 0x0400;
        /// Do not bind the image
        const NO_BIND = 0x0800;
        /// Image must execute in an AppContainer
        const APPCONTAINER = 0x1000;
        /// A WDM driver
        const WDM_DRIVER = 0x2000;
        /// Image supports Control Flow Guard
        const GUARD_CF = 0x4000;
        /// Terminal Server aware
        const TERMINAL_SERVER_AWARE = 0x8000;
    }
}

/// The decoded optional header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionalHeader {
    /// PE32 or PE32+
    pub magic: Magic,
    /// Linker major version
    pub major_linker_version: u8,
    /// Linker minor version
    pub minor_linker_version: u8,
    /// Size of all code sections
    pub size_of_code: u32,
    /// Size of all initialized data sections
    pub size_of_initialized_data: u32,
    /// Size of all uninitialized data sections
    pub size_of_uninitialized_data: u32,
    /// RVA of the entry point, zero if there is none
    pub address_of_entry_point: u32,
    /// RVA of the start of the code section
    pub base_of_code: u32,
    /// RVA of the start of the data section (PE32 only)
    pub base_of_data: Option<u32>,
    /// Preferred load address
    pub image_base: u64,
    /// Alignment of sections in memory
    pub section_alignment: u32,
    /// Alignment of raw section data in the file
    pub file_alignment: u32,
    /// Required OS major version
    pub major_operating_system_version: u16,
    /// Required OS minor version
    pub minor_operating_system_version: u16,
    /// Image major version
    pub major_image_version: u16,
    /// Image minor version
    pub minor_image_version: u16,
    /// Subsystem major version
    pub major_subsystem_version: u16,
    /// Subsystem minor version
    pub minor_subsystem_version: u16,
    /// Reserved, must be zero
    pub win32_version_value: u32,
    /// Size of the loaded image
    pub size_of_image: u32,
    /// Combined size of all headers, rounded to the file alignment
    pub size_of_headers: u32,
    /// Image checksum
    pub check_sum: u32,
    /// Raw subsystem value, see [`OptionalHeader::subsystem_kind`]
    pub subsystem: u16,
    /// DLL characteristics
    pub dll_characteristics: DllCharacteristics,
    /// Stack reserve size
    pub size_of_stack_reserve: u64,
    /// Stack commit size
    pub size_of_stack_commit: u64,
    /// Heap reserve size
    pub size_of_heap_reserve: u64,
    /// Heap commit size
    pub size_of_heap_commit: u64,
    /// Reserved, must be zero
    pub loader_flags: u32,
    /// Declared number of data directory entries
    pub number_of_rva_and_sizes: u32,
    /// The data directories, clamped to what the header can hold
    pub data_directories: DataDirectories,
}

impl OptionalHeader {
    /// Decode an optional header. The parser must cover exactly `SizeOfOptionalHeader` bytes.
    ///
    /// # Errors
    /// - [`crate::Error::TruncatedInput`] if the header is too small for the fixed fields of its
    ///   variant
    /// - [`crate::Error::UnsupportedFormat`] if the magic is neither PE32 nor PE32+
    pub fn parse(parser: &mut Parser) -> Result<OptionalHeader> {
        let magic_value = parser.read_le::<u16>()?;
        let Some(magic) = Magic::from_repr(magic_value) else {
            return Err(Error::UnsupportedFormat {
                what: "optional header magic",
                value: u64::from(magic_value),
            });
        };

        let fixed = magic.fixed_size();
        if parser.len() < fixed {
            return Err(truncated_error!(
                parser.file_offset() - 2,
                fixed,
                parser.len()
            ));
        }

        let is_large = magic == Magic::Pe32Plus;

        let major_linker_version = parser.read_le::<u8>()?;
        let minor_linker_version = parser.read_le::<u8>()?;
        let size_of_code = parser.read_le::<u32>()?;
        let size_of_initialized_data = parser.read_le::<u32>()?;
        let size_of_uninitialized_data = parser.read_le::<u32>()?;
        let address_of_entry_point = parser.read_le::<u32>()?;
        let base_of_code = parser.read_le::<u32>()?;
        let base_of_data = if is_large {
            None
        } else {
            Some(parser.read_le::<u32>()?)
        };
        let image_base = parser.read_le_dyn(is_large)?;
        let section_alignment = parser.read_le::<u32>()?;
        let file_alignment = parser.read_le::<u32>()?;
        let major_operating_system_version = parser.read_le::<u16>()?;
        let minor_operating_system_version = parser.read_le::<u16>()?;
        let major_image_version = parser.read_le::<u16>()?;
        let minor_image_version = parser.read_le::<u16>()?;
        let major_subsystem_version = parser.read_le::<u16>()?;
        let minor_subsystem_version = parser.read_le::<u16>()?;
        let win32_version_value = parser.read_le::<u32>()?;
        let size_of_image = parser.read_le::<u32>()?;
        let size_of_headers = parser.read_le::<u32>()?;
        let check_sum = parser.read_le::<u32>()?;
        let subsystem = parser.read_le::<u16>()?;
        let dll_characteristics = DllCharacteristics::from_bits_retain(parser.read_le::<u16>()?);
        let size_of_stack_reserve = parser.read_le_dyn(is_large)?;
        let size_of_stack_commit = parser.read_le_dyn(is_large)?;
        let size_of_heap_reserve = parser.read_le_dyn(is_large)?;
        let size_of_heap_commit = parser.read_le_dyn(is_large)?;
        let loader_flags = parser.read_le::<u32>()?;
        let number_of_rva_and_sizes = parser.read_le::<u32>()?;

        let fits = parser.remaining() / DATA_DIRECTORY_SIZE;
        let count = usize::try_from(number_of_rva_and_sizes)
            .unwrap_or(usize::MAX)
            .min(DataDirectoryKind::COUNT)
            .min(fits);
        if count as u64 != u64::from(number_of_rva_and_sizes) {
            log::warn!(
                "Optional header declares {number_of_rva_and_sizes} data directories, using {count}"
            );
        }
        let data_directories = DataDirectories::parse(parser, count)?;

        log::debug!(
            "Optional header: {magic:?}, image base {image_base:#x}, entry point {address_of_entry_point:#x}, {count} data directories"
        );

        Ok(OptionalHeader {
            magic,
            major_linker_version,
            minor_linker_version,
            size_of_code,
            size_of_initialized_data,
            size_of_uninitialized_data,
            address_of_entry_point,
            base_of_code,
            base_of_data,
            image_base,
            section_alignment,
            file_alignment,
            major_operating_system_version,
            minor_operating_system_version,
            major_image_version,
            minor_image_version,
            major_subsystem_version,
            minor_subsystem_version,
            win32_version_value,
            size_of_image,
            size_of_headers,
            check_sum,
            subsystem,
            dll_characteristics,
            size_of_stack_reserve,
            size_of_stack_commit,
            size_of_heap_reserve,
            size_of_heap_commit,
            loader_flags,
            number_of_rva_and_sizes,
            data_directories,
        })
    }

    /// Returns true for PE32+ images.
    #[must_use]
    pub fn is_pe32_plus(&self) -> bool {
        self.magic == Magic::Pe32Plus
    }

    /// The subsystem, if it is one this crate knows.
    #[must_use]
    pub fn subsystem_kind(&self) -> Option<Subsystem> {
        Subsystem::from_repr(self.subsystem)
    }
}

impl fmt::Display for OptionalHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subsystem = match self.subsystem_kind() {
            Some(known) => known.to_string(),
            None => format!("{:#x}", self.subsystem),
        };
        write!(
            f,
            "{}, image base: {:#x}, entry point: {:#x}, alignment: {:#x}/{:#x}, image size: {:#x}, subsystem: {}, DLL characteristics: {:?}",
            match self.magic {
                Magic::Pe32 => "PE32",
                Magic::Pe32Plus => "PE32+",
            },
            self.image_base,
            self.address_of_entry_point,
            self.section_alignment,
            self.file_alignment,
            self.size_of_image,
            subsystem,
            self.dll_characteristics
        )
    }
}
