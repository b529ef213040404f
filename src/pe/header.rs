//! DOS header, PE signature and COFF file header.
//!
//! A PE image opens with the 64-byte MS-DOS header. Its `e_lfanew` field (at 0x3C) points at the
//! four-byte `PE\0\0` signature, which is immediately followed by the 20-byte COFF file header.
//!
//! # Reference
//! - Microsoft PE/COFF Specification, "MS-DOS Stub" and "COFF File Header"

use std::fmt;

use bitflags::bitflags;

use crate::{file::parser::Parser, pe::ParseOptions, Error, Result};

/// Size of the MS-DOS header in bytes
pub const DOS_HEADER_SIZE: usize = 64;
/// `MZ`
pub const DOS_MAGIC: u16 = 0x5A4D;
/// `PE\0\0`
pub const PE_SIGNATURE: u32 = 0x0000_4550;
/// Size of the COFF file header in bytes
pub const COFF_HEADER_SIZE: usize = 20;

/// The MS-DOS header. Only the two fields the PE loader looks at are decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosHeader {
    /// Magic number, always `MZ`
    pub e_magic: u16,
    /// File offset of the PE signature
    pub e_lfanew: u32,
}

impl DosHeader {
    /// Decode the DOS header from the first 64 bytes of the image.
    ///
    /// # Errors
    /// Returns [`crate::Error::TruncatedInput`] if fewer than 64 bytes are available, and
    /// [`crate::Error::InvalidSignature`] if the magic is not `MZ`.
    pub fn parse(parser: &mut Parser) -> Result<DosHeader> {
        parser.ensure_remaining(DOS_HEADER_SIZE)?;

        let offset = parser.file_offset();
        let e_magic = parser.read_le::<u16>()?;
        if e_magic != DOS_MAGIC {
            return Err(Error::InvalidSignature {
                what: "DOS",
                offset,
                expected: u32::from(DOS_MAGIC),
                found: u32::from(e_magic),
            });
        }

        parser.advance_by(0x3C - 2)?;
        let e_lfanew = parser.read_le::<u32>()?;

        Ok(DosHeader { e_magic, e_lfanew })
    }
}

/// Verify the `PE\0\0` signature.
///
/// # Errors
/// Returns [`crate::Error::InvalidSignature`] on a mismatch.
pub fn verify_pe_signature(parser: &mut Parser) -> Result<()> {
    let offset = parser.file_offset();
    let found = parser.read_le::<u32>()?;
    if found != PE_SIGNATURE {
        return Err(Error::InvalidSignature {
            what: "PE",
            offset,
            expected: PE_SIGNATURE,
            found,
        });
    }
    Ok(())
}

macro_rules! machines {
    ($($(#[$doc:meta])* $variant:ident = $value:literal => $name:literal,)*) => {
        /// Target architecture of the image.
        ///
        /// Values without a named variant are preserved in [`Machine::Unknown`].
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Machine {
            $($(#[$doc])* $variant,)*
            /// A machine type this crate has no name for
            Unknown(u16),
        }

        impl From<u16> for Machine {
            fn from(value: u16) -> Self {
                match value {
                    $($value => Machine::$variant,)*
                    other => Machine::Unknown(other),
                }
            }
        }

        impl Machine {
            /// The raw `Machine` field value
            #[must_use]
            pub fn raw(self) -> u16 {
                match self {
                    $(Machine::$variant => $value,)*
                    Machine::Unknown(value) => value,
                }
            }
        }

        impl fmt::Display for Machine {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $(Machine::$variant => f.write_str($name),)*
                    Machine::Unknown(value) => write!(f, "{value:#06x}"),
                }
            }
        }
    };
}

machines! {
    /// Contents assumed to be applicable to any machine type
    Any = 0x0 => "ANY",
    /// Intel 386 and compatible
    I386 = 0x14c => "I386",
    /// MIPS little endian
    R4000 = 0x166 => "R4000",
    /// MIPS little-endian WCE v2
    WceMipsV2 = 0x169 => "WCEMIPSV2",
    /// Alpha AXP, 32-bit address space
    Alpha = 0x184 => "ALPHA",
    /// Hitachi SH3
    Sh3 = 0x1a2 => "SH3",
    /// Hitachi SH3 DSP
    Sh3Dsp = 0x1a3 => "SH3DSP",
    /// Hitachi SH4
    Sh4 = 0x1a6 => "SH4",
    /// Hitachi SH5
    Sh5 = 0x1a8 => "SH5",
    /// ARM little endian
    Arm = 0x1c0 => "ARM",
    /// Thumb
    Thumb = 0x1c2 => "THUMB",
    /// ARM Thumb-2 little endian
    ArmNt = 0x1c4 => "ARMNT",
    /// Matsushita AM33
    Am33 = 0x1d3 => "AM33",
    /// Power PC little endian
    PowerPc = 0x1f0 => "POWERPC",
    /// Power PC with floating point support
    PowerPcFp = 0x1f1 => "POWERPCFP",
    /// Intel Itanium
    Ia64 = 0x200 => "IA64",
    /// MIPS16
    Mips16 = 0x266 => "MIPS16",
    /// Alpha 64, 64-bit address space
    Alpha64 = 0x284 => "ALPHA64",
    /// MIPS with FPU
    MipsFpu = 0x366 => "MIPSFPU",
    /// MIPS16 with FPU
    MipsFpu16 = 0x466 => "MIPSFPU16",
    /// EFI byte code
    Ebc = 0xebc => "EBC",
    /// RISC-V 32-bit address space
    RiscV32 = 0x5032 => "RISCV32",
    /// RISC-V 64-bit address space
    RiscV64 = 0x5064 => "RISCV64",
    /// RISC-V 128-bit address space
    RiscV128 = 0x5128 => "RISCV128",
    /// LoongArch 32-bit
    LoongArch32 = 0x6232 => "LOONGARCH32",
    /// LoongArch 64-bit
    LoongArch64 = 0x6264 => "LOONGARCH64",
    /// x64
    Amd64 = 0x8664 => "AMD64",
    /// Mitsubishi M32R little endian
    M32R = 0x9041 => "M32R",
    /// ARM64 little endian
    Arm64 = 0xaa64 => "ARM64",
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// COFF file header characteristics
    pub struct Characteristics: u16 {
        /// Image contains no base relocations
        const RELOCS_STRIPPED = 0x0001;
        /// Image is valid and can be run
        const EXECUTABLE_IMAGE = 0x0002;
        /// COFF line numbers have been removed (deprecated)
        const LINE_NUMS_STRIPPED = 0x0004;
        /// COFF local symbols have been removed (deprecated)
        const LOCAL_SYMS_STRIPPED = 0x0008;
        /// Aggressively trim working set (obsolete)
        const AGGRESSIVE_WS_TRIM = 0x0010;
        /// Application can handle addresses above 2 GB
        const LARGE_ADDRESS_AWARE = 0x0020;
        /// Little endian (deprecated)
        const BYTES_REVERSED_LO = 0x0080;
        /// Machine is based on a 32-bit-word architecture
        const MACHINE_32BIT = 0x0100;
        /// Debugging information is removed
        const DEBUG_STRIPPED = 0x0200;
        /// Copy to swap when run from removable media
        const REMOVABLE_RUN_FROM_SWAP = 0x0400;
        /// Copy to swap when run from network media
        const NET_RUN_FROM_SWAP = 0x0800;
        /// The image is a system file
        const SYSTEM = 0x1000;
        /// The image is a dynamic-link library
        const DLL = 0x2000;
        /// Run only on a uniprocessor machine
        const UP_SYSTEM_ONLY = 0x4000;
        /// Big endian (deprecated)
        const BYTES_REVERSED_HI = 0x8000;
    }
}

/// Location of the legacy COFF symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolTable {
    /// File offset of the symbol table
    pub pointer: u32,
    /// Number of symbol records
    pub count: u32,
}

/// The COFF file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoffHeader {
    /// Target architecture
    pub machine: Machine,
    /// Number of entries in the section table
    pub number_of_sections: u16,
    /// Seconds since 1970-01-01 00:00 UTC at link time
    pub time_date_stamp: u32,
    /// Legacy symbol table, absent in most images
    pub symbol_table: Option<SymbolTable>,
    /// Declared size of the optional header
    pub size_of_optional_header: u16,
    /// Image attributes
    pub characteristics: Characteristics,
}

impl CoffHeader {
    /// Decode the 20-byte COFF file header.
    ///
    /// # Errors
    /// Returns [`crate::Error::TruncatedInput`] if the header is cut short, and
    /// [`crate::Error::Malformed`] if it declares more sections than
    /// [`ParseOptions::max_sections`].
    pub fn parse(parser: &mut Parser, options: &ParseOptions) -> Result<CoffHeader> {
        parser.ensure_remaining(COFF_HEADER_SIZE)?;

        let machine = Machine::from(parser.read_le::<u16>()?);
        let number_of_sections = parser.read_le::<u16>()?;
        let time_date_stamp = parser.read_le::<u32>()?;
        let pointer = parser.read_le::<u32>()?;
        let count = parser.read_le::<u32>()?;
        let size_of_optional_header = parser.read_le::<u16>()?;
        let characteristics = Characteristics::from_bits_retain(parser.read_le::<u16>()?);

        if usize::from(number_of_sections) > options.max_sections {
            return Err(malformed_error!(
                "COFF header declares {} sections, at most {} are accepted",
                number_of_sections,
                options.max_sections
            ));
        }

        let symbol_table = if pointer == 0 {
            None
        } else {
            Some(SymbolTable { pointer, count })
        };

        Ok(CoffHeader {
            machine,
            number_of_sections,
            time_date_stamp,
            symbol_table,
            size_of_optional_header,
            characteristics,
        })
    }

    /// Returns true if the image is a DLL.
    #[must_use]
    pub fn is_dll(&self) -> bool {
        self.characteristics.contains(Characteristics::DLL)
    }
}

impl fmt::Display for CoffHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "machine: {}, sections: {}, timestamp: {:#010x}, optional header: {} bytes, characteristics: {:?}",
            self.machine,
            self.number_of_sections,
            self.time_date_stamp,
            self.size_of_optional_header,
            self.characteristics
        )?;
        if let Some(symbols) = self.symbol_table {
            write!(
                f,
                ", symbols: {} at {:#x}",
                symbols.count, symbols.pointer
            )?;
        }
        Ok(())
    }
}
