//! Import directory.
//!
//! The import directory is an array of 20-byte descriptors, one per imported DLL, ended by an
//! all-zero descriptor. Each descriptor points at the DLL name and at two parallel arrays of
//! pointer-sized entries: the import lookup table (ILT) and the import address table (IAT). The
//! loader overwrites the IAT with resolved addresses; on disk both describe the same symbols.
//!
//! Descriptors and symbols are decoded lazily. The iterators hold nothing but an index and
//! recompute every read from absolute offsets, so iterating the same table twice yields the
//! same results and several iterators can be advanced interleaved.
//!
//! # Examples
//!
//! ```rust,no_run
//! use pescope::{pe::ImportedSymbol, PeFile};
//! use std::path::Path;
//!
//! let file = PeFile::from_file(Path::new("notepad.exe"))?;
//! for descriptor in file.imports()? {
//!     let descriptor = descriptor?;
//!     for symbol in descriptor.symbols() {
//!         match symbol? {
//!             ImportedSymbol::ByName { name, hint } => println!("{}!{name} (hint {hint})", descriptor.name()),
//!             ImportedSymbol::ByOrdinal(ordinal) => println!("{}!#{ordinal}", descriptor.name()),
//!         }
//!     }
//! }
//! # Ok::<(), pescope::Error>(())
//! ```

use std::fmt;

use crate::{
    file::PeFile,
    pe::LocatedDirectory,
    AddressError, Result,
};

/// Size of one import descriptor in bytes
pub const IMPORT_DESCRIPTOR_SIZE: usize = 20;

/// The import directory of a [`PeFile`].
///
/// Cheap to copy; each call to [`ImportTable::iter`] starts a fresh pass over the descriptors.
#[derive(Debug, Clone, Copy)]
pub struct ImportTable<'a> {
    file: &'a PeFile,
    directory: Option<LocatedDirectory>,
}

impl<'a> ImportTable<'a> {
    pub(crate) fn new(file: &'a PeFile, directory: Option<LocatedDirectory>) -> Self {
        ImportTable { file, directory }
    }

    /// The located import directory, `None` if the image imports nothing.
    #[must_use]
    pub fn directory(&self) -> Option<&LocatedDirectory> {
        self.directory.as_ref()
    }

    /// Start a new pass over the import descriptors.
    #[must_use]
    pub fn iter(&self) -> ImportDescriptors<'a> {
        let limit = self
            .directory
            .map_or(0, |dir| dir.size as usize / IMPORT_DESCRIPTOR_SIZE);

        ImportDescriptors {
            file: self.file,
            directory: self.directory,
            index: 0,
            limit,
            done: false,
        }
    }
}

impl<'a> IntoIterator for ImportTable<'a> {
    type Item = Result<ImportDescriptor<'a>>;
    type IntoIter = ImportDescriptors<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a> IntoIterator for &ImportTable<'a> {
    type Item = Result<ImportDescriptor<'a>>;
    type IntoIter = ImportDescriptors<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the import descriptors.
///
/// Ends at the all-zero descriptor or when the directory's declared size is used up. An error
/// is yielded once, after which the iterator is exhausted.
#[derive(Debug, Clone)]
pub struct ImportDescriptors<'a> {
    file: &'a PeFile,
    directory: Option<LocatedDirectory>,
    index: usize,
    limit: usize,
    done: bool,
}

impl<'a> ImportDescriptors<'a> {
    fn read_descriptor(&self, directory: &LocatedDirectory) -> Result<Option<ImportDescriptor<'a>>> {
        let rva = (self.index * IMPORT_DESCRIPTOR_SIZE)
            .try_into()
            .ok()
            .and_then(|delta: u32| directory.rva.checked_add(delta))
            .ok_or(AddressError::Overflow {
                base: u64::from(directory.rva),
                add: (self.index * IMPORT_DESCRIPTOR_SIZE) as u64,
            })?;

        let fields = self
            .file
            .parse_rva(rva, IMPORT_DESCRIPTOR_SIZE as u32, |parser| {
                let mut fields = [0_u32; 5];
                for field in &mut fields {
                    *field = parser.read_le::<u32>()?;
                }
                Ok(fields)
            })?;

        if fields.iter().all(|&field| field == 0) {
            return Ok(None);
        }

        let [import_lookup_table_rva, time_date_stamp, forwarder_chain, name_rva, import_address_table_rva] =
            fields;
        let name = self.file.read_rva_cstring(name_rva)?;

        log::trace!("Import descriptor {} at RVA {rva:#x}: {name}", self.index);

        Ok(Some(ImportDescriptor {
            file: self.file,
            import_lookup_table_rva,
            time_date_stamp,
            forwarder_chain,
            name_rva,
            import_address_table_rva,
            name,
        }))
    }
}

impl<'a> Iterator for ImportDescriptors<'a> {
    type Item = Result<ImportDescriptor<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.index >= self.limit {
            self.done = true;
            return None;
        }
        let directory = self.directory?;

        match self.read_descriptor(&directory) {
            Ok(Some(descriptor)) => {
                self.index += 1;
                Some(Ok(descriptor))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(error) => {
                self.done = true;
                Some(Err(error))
            }
        }
    }
}

impl std::iter::FusedIterator for ImportDescriptors<'_> {}

/// One imported DLL.
#[derive(Debug, Clone)]
pub struct ImportDescriptor<'a> {
    file: &'a PeFile,
    /// RVA of the import lookup table, zero if the linker did not emit one
    pub import_lookup_table_rva: u32,
    /// Zero until the image is bound
    pub time_date_stamp: u32,
    /// Index of the first forwarder reference
    pub forwarder_chain: u32,
    /// RVA of the DLL name
    pub name_rva: u32,
    /// RVA of the import address table
    pub import_address_table_rva: u32,
    name: String,
}

impl<'a> ImportDescriptor<'a> {
    /// The name of the imported DLL.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// RVA of the table the symbols are read from: the lookup table, or the address table if
    /// there is no lookup table.
    #[must_use]
    pub fn thunk_table_rva(&self) -> u32 {
        if self.import_lookup_table_rva == 0 {
            self.import_address_table_rva
        } else {
            self.import_lookup_table_rva
        }
    }

    /// Start a new pass over the imported symbols.
    #[must_use]
    pub fn symbols(&self) -> ImportSymbols<'a> {
        ImportSymbols {
            file: self.file,
            table_rva: self.thunk_table_rva(),
            index: 0,
            done: false,
        }
    }
}

impl fmt::Display for ImportDescriptor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (ILT {:#x}, IAT {:#x})",
            self.name, self.import_lookup_table_rva, self.import_address_table_rva
        )
    }
}

/// A symbol imported from a DLL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImportedSymbol {
    /// Imported by name, with a hint into the exporter's name pointer table
    ByName {
        /// Symbol name
        name: String,
        /// Index the loader tries first
        hint: u16,
    },
    /// Imported by ordinal
    ByOrdinal(u16),
}

impl fmt::Display for ImportedSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportedSymbol::ByName { name, hint } => write!(f, "{name} (hint {hint})"),
            ImportedSymbol::ByOrdinal(ordinal) => write!(f, "#{ordinal}"),
        }
    }
}

/// Iterator over the symbols of one import descriptor.
///
/// Ends at the first zero entry. An error is yielded once, after which the iterator is
/// exhausted.
#[derive(Debug, Clone)]
pub struct ImportSymbols<'a> {
    file: &'a PeFile,
    table_rva: u32,
    index: u32,
    done: bool,
}

impl ImportSymbols<'_> {
    fn read_symbol(&self) -> Result<Option<ImportedSymbol>> {
        let is_large = self.file.is_pe32_plus();
        let entry_size: u32 = if is_large { 8 } else { 4 };

        let rva = self
            .index
            .checked_mul(entry_size)
            .and_then(|delta| self.table_rva.checked_add(delta))
            .ok_or(AddressError::Overflow {
                base: u64::from(self.table_rva),
                add: u64::from(self.index) * u64::from(entry_size),
            })?;
        let value = self
            .file
            .parse_rva(rva, entry_size, |parser| parser.read_le_dyn(is_large))?;

        if value == 0 {
            return Ok(None);
        }

        let (ordinal_flag, reserved) = if is_large {
            (1_u64 << 63, 0x7FFF_FFFF_8000_0000_u64)
        } else {
            (1_u64 << 31, 0)
        };

        if value & ordinal_flag != 0 {
            if self.file.options().validate_reserved_bits
                && value & !ordinal_flag & !0xFFFF != 0
            {
                return Err(malformed_error!(
                    "Import lookup entry {} at RVA {:#x} has reserved bits set: {:#x}",
                    self.index,
                    rva,
                    value
                ));
            }
            return Ok(Some(ImportedSymbol::ByOrdinal(value as u16)));
        }

        if self.file.options().validate_reserved_bits && value & reserved != 0 {
            return Err(malformed_error!(
                "Import lookup entry {} at RVA {:#x} has reserved bits set: {:#x}",
                self.index,
                rva,
                value
            ));
        }

        let hint_name_rva = (value & 0x7FFF_FFFF) as u32;
        let hint = self.file.read_rva_le::<u16>(hint_name_rva)?;
        let name = self
            .file
            .read_rva_cstring(hint_name_rva.checked_add(2).ok_or(AddressError::Overflow {
                base: u64::from(hint_name_rva),
                add: 2,
            })?)?;

        Ok(Some(ImportedSymbol::ByName { name, hint }))
    }
}

impl Iterator for ImportSymbols<'_> {
    type Item = Result<ImportedSymbol>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.table_rva == 0 {
            self.done = true;
            return None;
        }

        match self.read_symbol() {
            Ok(Some(symbol)) => {
                log::trace!("Import symbol {}: {symbol}", self.index);
                self.index += 1;
                Some(Ok(symbol))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(error) => {
                self.done = true;
                Some(Err(error))
            }
        }
    }
}

impl std::iter::FusedIterator for ImportSymbols<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        pe::ParseOptions,
        test::{import_section, sample_dll, ImportDll, PeBuilder, SectionSpec},
        Error,
    };

    fn image(pe32_plus: bool, dlls: &[ImportDll]) -> (Vec<u8>, PeBuilder, Vec<usize>) {
        let builder = if pe32_plus {
            PeBuilder::pe32_plus()
        } else {
            PeBuilder::pe32()
        };
        let section = import_section(0x2000, pe32_plus, dlls);
        let builder = builder
            .with_directory(1, 0x2000, section.directory_size)
            .with_section(SectionSpec::new(".idata", 0x2000, section.data));
        (builder.build(), builder, section.thunk_offsets)
    }

    fn collect(file: &PeFile) -> Vec<(String, Vec<ImportedSymbol>)> {
        file.imports()
            .unwrap()
            .iter()
            .map(|descriptor| {
                let descriptor = descriptor.unwrap();
                let symbols = descriptor.symbols().map(|s| s.unwrap()).collect();
                (descriptor.name().to_string(), symbols)
            })
            .collect()
    }

    #[test]
    fn single_import_pe32_plus() {
        let (data, _, _) = image(
            true,
            &[ImportDll::new("KERNEL32.DLL").with_name(0, "ExitProcess")],
        );
        let file = PeFile::from_mem(data).unwrap();

        let imports = collect(&file);
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].0, "KERNEL32.DLL");
        assert_eq!(
            imports[0].1,
            vec![ImportedSymbol::ByName {
                name: "ExitProcess".to_string(),
                hint: 0
            }]
        );
    }

    #[test]
    fn ordinals_pe32() {
        let (data, _, _) = image(
            false,
            &[ImportDll::new("WS2_32.dll")
                .with_ordinal(23)
                .with_name(7, "bind")
                .with_ordinal(0xFFFF)],
        );
        let file = PeFile::from_mem(data).unwrap();

        let imports = collect(&file);
        assert_eq!(
            imports[0].1,
            vec![
                ImportedSymbol::ByOrdinal(23),
                ImportedSymbol::ByName {
                    name: "bind".to_string(),
                    hint: 7
                },
                ImportedSymbol::ByOrdinal(0xFFFF),
            ]
        );
        assert_eq!(imports[0].1[0].to_string(), "#23");
        assert_eq!(imports[0].1[1].to_string(), "bind (hint 7)");
    }

    #[test]
    fn restartable() {
        let file = PeFile::from_mem(sample_dll()).unwrap();
        let table = file.imports().unwrap();

        let first: Vec<String> = table.iter().map(|d| d.unwrap().name().to_string()).collect();
        let second: Vec<String> = table.iter().map(|d| d.unwrap().name().to_string()).collect();
        assert_eq!(first, vec!["KERNEL32.dll", "WS2_32.dll"]);
        assert_eq!(first, second);

        let kernel32 = table.iter().next().unwrap().unwrap();
        let once: Vec<_> = kernel32.symbols().map(|s| s.unwrap()).collect();
        let twice: Vec<_> = kernel32.symbols().map(|s| s.unwrap()).collect();
        assert_eq!(once, twice);
        assert_eq!(once.len(), 2);
    }

    #[test]
    fn interleaved_iterators() {
        let file = PeFile::from_mem(sample_dll()).unwrap();
        let table = file.imports().unwrap();

        let mut a = table.iter();
        let mut b = table.iter();
        let a1 = a.next().unwrap().unwrap();
        let b1 = b.next().unwrap().unwrap();
        let a2 = a.next().unwrap().unwrap();
        assert_eq!(a1.name(), b1.name());
        assert_eq!(a2.name(), "WS2_32.dll");
        assert_eq!(b.next().unwrap().unwrap().name(), "WS2_32.dll");
        assert!(a.next().is_none());
        assert!(b.next().is_none());
    }

    #[test]
    fn falls_back_to_address_table() {
        let (data, _, _) = image(
            true,
            &[ImportDll::new("OLD.DLL")
                .with_name(1, "Legacy")
                .without_lookup_table()],
        );
        let file = PeFile::from_mem(data).unwrap();

        let descriptor = file.imports().unwrap().iter().next().unwrap().unwrap();
        assert_eq!(descriptor.import_lookup_table_rva, 0);
        assert_eq!(descriptor.thunk_table_rva(), descriptor.import_address_table_rva);
        assert_eq!(
            descriptor.symbols().map(|s| s.unwrap()).collect::<Vec<_>>(),
            vec![ImportedSymbol::ByName {
                name: "Legacy".to_string(),
                hint: 1
            }]
        );
    }

    #[test]
    fn stops_at_declared_size() {
        let dlls = [
            ImportDll::new("A.dll").with_ordinal(1),
            ImportDll::new("B.dll").with_ordinal(2),
        ];
        let section = import_section(0x2000, true, &dlls);
        // Declared size only covers the first descriptor
        let data = PeBuilder::pe32_plus()
            .with_directory(1, 0x2000, 20)
            .with_section(SectionSpec::new(".idata", 0x2000, section.data))
            .build();
        let file = PeFile::from_mem(data).unwrap();

        let names: Vec<String> = file
            .imports()
            .unwrap()
            .iter()
            .map(|d| d.unwrap().name().to_string())
            .collect();
        assert_eq!(names, vec!["A.dll"]);
    }

    #[test]
    fn no_import_directory() {
        let data = PeBuilder::pe32_plus()
            .with_section(SectionSpec::new(".text", 0x1000, vec![0xC3; 16]))
            .build();
        let file = PeFile::from_mem(data).unwrap();

        let table = file.imports().unwrap();
        assert!(table.directory().is_none());
        assert_eq!(table.iter().count(), 0);
    }

    #[test]
    fn unterminated_name() {
        let mut section = import_section(
            0x2000,
            true,
            &[ImportDll::new("KERNEL32.dll").with_ordinal(1)],
        );
        // Point the name at the last bytes of the section data, which hold no NUL
        let len = section.data.len();
        section.data.extend_from_slice(b"NOTERMINATED");
        let name_rva = 0x2000 + len as u32;
        section.data[12..16].copy_from_slice(&name_rva.to_le_bytes());

        let data = PeBuilder::pe32_plus()
            .with_directory(1, 0x2000, section.directory_size)
            .with_section(
                SectionSpec::new(".idata", 0x2000, section.data.clone())
                    .with_virtual_size(section.data.len() as u32),
            )
            .build();
        let file = PeFile::from_mem(data).unwrap();

        let mut descriptors = file.imports().unwrap().iter();
        assert!(matches!(
            descriptors.next(),
            Some(Err(Error::StringDecode { .. }))
        ));
        assert!(descriptors.next().is_none());
    }

    #[test]
    fn reserved_bits() {
        let (mut data, builder, thunks) = image(true, &[ImportDll::new("A.dll").with_ordinal(5)]);
        // Set bit 40 in the ordinal entry
        let at = builder.raw_pointer(0) as usize + thunks[0];
        data[at + 5] = 0x01;

        let file = PeFile::from_mem(data.clone()).unwrap();
        let descriptor = file.imports().unwrap().iter().next().unwrap().unwrap();
        let mut symbols = descriptor.symbols();
        assert!(matches!(symbols.next(), Some(Err(Error::Malformed { .. }))));
        assert!(symbols.next().is_none());

        let file = PeFile::from_mem_with_options(data, ParseOptions::permissive()).unwrap();
        let descriptor = file.imports().unwrap().iter().next().unwrap().unwrap();
        assert_eq!(
            descriptor.symbols().map(|s| s.unwrap()).collect::<Vec<_>>(),
            vec![ImportedSymbol::ByOrdinal(5)]
        );
    }

    /// A PE32+ image whose `.idata` has 0x200 bytes of raw data inside a 0x1000-byte virtual
    /// size. The raw data of a section filled with 0xCC follows it in the file.
    fn zero_tail_image(descriptor_at: usize, lookup_at: usize) -> Vec<u8> {
        fn put(data: &mut [u8], at: usize, bytes: &[u8]) {
            data[at..at + bytes.len()].copy_from_slice(bytes);
        }

        let mut idata = vec![0_u8; 0x200];
        put(&mut idata, descriptor_at, &(0x2000 + lookup_at as u32).to_le_bytes());
        put(&mut idata, descriptor_at + 12, &0x2040_u32.to_le_bytes());
        put(&mut idata, descriptor_at + 16, &0x2080_u32.to_le_bytes());
        put(&mut idata, 0x40, b"KERNEL32.dll\0");
        put(&mut idata, 0x60, b"\x05\x00Sleep\0");
        put(&mut idata, 0x80, &0x2060_u64.to_le_bytes());
        put(&mut idata, lookup_at, &0x2060_u64.to_le_bytes());

        PeBuilder::pe32_plus()
            .with_directory(1, 0x2000 + descriptor_at as u32, 40)
            .with_section(SectionSpec::new(".idata", 0x2000, idata).with_virtual_size(0x1000))
            .with_section(SectionSpec::new(".next", 0x3000, vec![0xCC; 0x200]))
            .build()
    }

    fn sleep() -> Vec<ImportedSymbol> {
        vec![ImportedSymbol::ByName {
            name: "Sleep".to_string(),
            hint: 5,
        }]
    }

    #[test]
    fn lookup_table_terminated_in_zero_tail() {
        // The last lookup entry fills the raw data; its terminator lies past SizeOfRawData
        let file = PeFile::from_mem(zero_tail_image(0, 0x1F8)).unwrap();

        let imports = collect(&file);
        assert_eq!(imports, vec![("KERNEL32.dll".to_string(), sleep())]);
    }

    #[test]
    fn descriptors_terminated_in_zero_tail() {
        let file = PeFile::from_mem(zero_tail_image(0x1EC, 0xA0)).unwrap();

        let imports = collect(&file);
        assert_eq!(imports, vec![("KERNEL32.dll".to_string(), sleep())]);
    }

    #[test]
    fn closed_file() {
        let file = PeFile::from_mem(sample_dll()).unwrap();
        let table = file.imports().unwrap();
        let mut descriptors = table.iter();
        let kernel32 = descriptors.next().unwrap().unwrap();
        let mut symbols = kernel32.symbols();

        file.close();
        assert!(matches!(descriptors.next(), Some(Err(Error::ResourceClosed))));
        assert!(descriptors.next().is_none());
        assert!(matches!(symbols.next(), Some(Err(Error::ResourceClosed))));
    }
}
