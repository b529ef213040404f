#![no_main]

use libfuzzer_sys::fuzz_target;
use pescope::PeFile;

fuzz_target!(|data: &[u8]| {
    let Ok(file) = PeFile::from_mem(data.to_vec()) else {
        return;
    };

    if let Ok(imports) = file.imports() {
        for descriptor in imports.iter().flatten() {
            descriptor.symbols().for_each(drop);
        }
    }
    if let Ok(Some(exports)) = file.exports() {
        let _ = exports.name();
        exports.iter().for_each(drop);
    }
    if let Ok(Some(root)) = file.resource_root() {
        for entry in root.walk().flatten() {
            if let Some(data) = entry.entry.data() {
                let _ = file.resource_data(data);
            }
        }
    }
});
