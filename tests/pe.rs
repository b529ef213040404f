//! End-to-end tests over synthetic images, cross-checked against goblin where the two overlap.

#[path = "../src/test/builder.rs"]
mod builder;

use std::{collections::BTreeSet, io::Cursor};

use builder::{
    import_section, resource_section, sample_dll, ImportDll, PeBuilder, ResKey, ResNode,
    SectionSpec,
};
use pescope::prelude::*;
use rayon::prelude::*;

fn kernel32_exit_process() -> Vec<u8> {
    let imports = import_section(
        0x1000,
        true,
        &[ImportDll::new("KERNEL32.DLL").with_name(0, "ExitProcess")],
    );

    PeBuilder::pe32_plus()
        .with_directory(1, 0x1000, imports.directory_size)
        .with_section(SectionSpec::new(".idata", 0x1000, imports.data))
        .build()
}

fn import_names(file: &PeFile) -> Vec<(String, Vec<ImportedSymbol>)> {
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
fn minimal_import_only_image() {
    let file = PeFile::from_mem(kernel32_exit_process()).unwrap();

    assert!(file.is_pe32_plus());
    assert_eq!(file.coff_header().machine, Machine::Amd64);
    assert_eq!(file.sections().len(), 1);

    let imports = import_names(&file);
    assert_eq!(imports.len(), 1);
    assert_eq!(imports[0].0, "KERNEL32.DLL");
    assert_eq!(
        imports[0].1,
        vec![ImportedSymbol::ByName {
            name: "ExitProcess".to_string(),
            hint: 0
        }]
    );

    assert!(file.resource_root().unwrap().is_none());
    assert!(file.exports().unwrap().is_none());
}

#[test]
fn backends_agree() {
    let data = sample_dll();
    let path = std::env::temp_dir().join(format!("pescope-backends-{}.dll", std::process::id()));
    std::fs::write(&path, &data).unwrap();

    let memory = PeFile::from_mem(data.clone()).unwrap();
    let stream = PeFile::from_reader(Cursor::new(data.clone())).unwrap();
    let mapped = PeFile::from_file(&path).unwrap();

    let expected = import_names(&memory);
    assert_eq!(import_names(&stream), expected);
    assert_eq!(import_names(&mapped), expected);

    for file in [&stream, &mapped] {
        assert_eq!(file.len(), memory.len());
        assert_eq!(file.entry_point(), memory.entry_point());
        assert_eq!(
            file.resource_root().unwrap().unwrap().load().unwrap(),
            memory.resource_root().unwrap().unwrap().load().unwrap()
        );
    }

    drop(mapped);
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn headers_match_goblin() {
    let data = sample_dll();
    let file = PeFile::from_mem(data.clone()).unwrap();
    let pe = goblin::pe::PE::parse(&data).unwrap();

    assert_eq!(pe.is_64, file.is_pe32_plus());
    assert_eq!(pe.header.coff_header.machine, file.coff_header().machine.raw());
    assert_eq!(
        pe.header.coff_header.number_of_sections as usize,
        file.sections().len()
    );
    assert_eq!(
        pe.header.coff_header.characteristics,
        file.coff_header().characteristics.bits()
    );
    assert_eq!(pe.is_lib, file.coff_header().is_dll());

    let optional = pe.header.optional_header.unwrap();
    assert_eq!(optional.windows_fields.image_base, file.image_base());
    assert_eq!(
        optional.standard_fields.address_of_entry_point as u32,
        file.entry_point()
    );

    for (theirs, ours) in pe.sections.iter().zip(file.sections()) {
        assert_eq!(theirs.name, ours.name);
        assert_eq!(theirs.virtual_address, ours.virtual_address);
        assert_eq!(theirs.pointer_to_raw_data, ours.pointer_to_raw_data);
        assert_eq!(theirs.size_of_raw_data, ours.size_of_raw_data);
    }
}

#[test]
fn address_translation_matches_goblin() {
    let data = sample_dll();
    let file = PeFile::from_mem(data.clone()).unwrap();
    let pe = goblin::pe::PE::parse(&data).unwrap();
    let alignment = pe
        .header
        .optional_header
        .unwrap()
        .windows_fields
        .file_alignment;
    let options = goblin::pe::options::ParseOptions::default();

    for rva in [0x1000_u32, 0x1010, 0x2000, 0x2040, 0x3000, 0x4000, 0x4020] {
        let theirs =
            goblin::pe::utils::find_offset(rva as usize, &pe.sections, alignment, &options);
        let ours = file.rva_to_offset(rva).unwrap();
        assert_eq!(theirs, Some(ours as usize), "rva {rva:#x}");
    }
}

#[test]
fn directories_match_goblin() {
    let data = sample_dll();
    let file = PeFile::from_mem(data.clone()).unwrap();
    let pe = goblin::pe::PE::parse(&data).unwrap();

    let theirs: BTreeSet<String> = pe.libraries.iter().map(|l| l.to_string()).collect();
    let ours: BTreeSet<String> = import_names(&file).into_iter().map(|(n, _)| n).collect();
    assert_eq!(theirs, ours);

    let theirs: BTreeSet<String> = pe
        .imports
        .iter()
        .filter(|import| !import.name.starts_with("ORDINAL"))
        .map(|import| import.name.to_string())
        .collect();
    let ours: BTreeSet<String> = import_names(&file)
        .into_iter()
        .flat_map(|(_, symbols)| symbols)
        .filter_map(|symbol| match symbol {
            ImportedSymbol::ByName { name, .. } => Some(name),
            ImportedSymbol::ByOrdinal(_) => None,
        })
        .collect();
    assert_eq!(theirs, ours);

    let exports = file.exports().unwrap().unwrap();
    let theirs: BTreeSet<String> = pe
        .exports
        .iter()
        .filter_map(|export| export.name.map(str::to_string))
        .collect();
    let ours: BTreeSet<String> = exports.iter().filter_map(|e| e.unwrap().name).collect();
    assert_eq!(theirs, ours);
    assert_eq!(pe.name, Some("sample.dll"));
}

#[test]
fn parallel_traversal() {
    let file = PeFile::from_mem(sample_dll()).unwrap();
    let expected = import_names(&file);
    let walk_len = file.resource_root().unwrap().unwrap().walk().count();

    let results: Vec<_> = (0..64)
        .into_par_iter()
        .map(|i| {
            if i % 2 == 0 {
                (import_names(&file), 0)
            } else {
                let root = file.resource_root().unwrap().unwrap();
                (Vec::new(), root.walk().map(|e| e.unwrap()).count())
            }
        })
        .collect();

    for (i, (imports, walked)) in results.into_iter().enumerate() {
        if i % 2 == 0 {
            assert_eq!(imports, expected);
        } else {
            assert_eq!(walked, walk_len);
        }
    }
}

#[test]
fn interleaved_directories() {
    let file = PeFile::from_mem(sample_dll()).unwrap();
    let imports = file.imports().unwrap();
    let root = file.resource_root().unwrap().unwrap();

    let mut descriptors = imports.iter();
    let mut walk = root.walk();

    let kernel32 = descriptors.next().unwrap().unwrap();
    let first = walk.next().unwrap().unwrap();
    let ws2 = descriptors.next().unwrap().unwrap();

    let mut a = kernel32.symbols();
    let mut b = ws2.symbols();
    assert_eq!(b.next().unwrap().unwrap(), ImportedSymbol::ByOrdinal(23));
    assert!(matches!(
        a.next().unwrap().unwrap(),
        ImportedSymbol::ByName { ref name, .. } if name == "ExitProcess"
    ));
    let second = walk.next().unwrap().unwrap();
    assert_eq!(b.next().unwrap().unwrap(), ImportedSymbol::ByOrdinal(115));

    assert_eq!(first.entry.resource_type(), Some(ResourceType::Version));
    assert_eq!(second.depth, 2);
    assert!(descriptors.next().is_none());
}

#[test]
fn broken_directory_is_isolated() {
    let resources = resource_section(
        0x1000,
        &ResNode::dir(vec![(ResKey::Id(24), ResNode::data(b"<assembly/>", 0))]),
    );
    let data = PeBuilder::pe32()
        .with_directory(1, 0x9000, 0x28)
        .with_directory(2, 0x1000, resources.len() as u32)
        .with_section(SectionSpec::new(".rsrc", 0x1000, resources))
        .build();
    let file = PeFile::from_mem(data).unwrap();

    match file.imports() {
        Err(Error::DirectoryUnavailable { kind, source }) => {
            assert_eq!(kind, DataDirectoryKind::Import);
            assert!(matches!(
                *source,
                Error::AddressOutOfRange(AddressError::Unmapped { rva: 0x9000 })
            ));
        }
        other => panic!("unexpected {:?}", other.map(|_| ())),
    }

    let root = file.resource_root().unwrap().unwrap();
    let entry = root.get(0).unwrap().unwrap();
    assert_eq!(entry.resource_type(), Some(ResourceType::Manifest));
    let bytes = file.resource_data(entry.data().unwrap()).unwrap();
    assert_eq!(bytes, b"<assembly/>");
    assert_eq!(file.coff_header().machine, Machine::I386);
}

#[test]
fn close_fails_pending_iterators() {
    let file = PeFile::from_mem(sample_dll()).unwrap();
    let imports = file.imports().unwrap();
    let mut descriptors = imports.iter();
    let kernel32 = descriptors.next().unwrap().unwrap();
    let mut symbols = kernel32.symbols();
    let exports = file.exports().unwrap().unwrap();
    let mut named = exports.iter();

    file.close();
    assert!(file.is_closed());

    assert!(matches!(descriptors.next(), Some(Err(Error::ResourceClosed))));
    assert!(descriptors.next().is_none());
    assert!(matches!(symbols.next(), Some(Err(Error::ResourceClosed))));
    assert!(matches!(named.next(), Some(Err(Error::ResourceClosed))));
    assert!(matches!(file.resource_root(), Err(Error::ResourceClosed)));

    // Headers were decoded when the file was opened
    assert_eq!(file.sections().len(), 4);
    assert_eq!(kernel32.name(), "KERNEL32.dll");
}

#[test]
fn rejects_non_pe() {
    assert!(matches!(PeFile::from_mem(Vec::new()), Err(Error::Empty)));
    assert!(matches!(
        PeFile::from_mem(vec![0; 32]),
        Err(Error::TruncatedInput { needed: 64, .. })
    ));
    assert!(matches!(
        PeFile::from_mem(vec![0; 256]),
        Err(Error::InvalidSignature { .. })
    ));
}
