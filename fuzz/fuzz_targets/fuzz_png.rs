#![no_main]

use libfuzzer_sys::fuzz_target;
use pl_png::{ReadOptions, read_metadata};

fuzz_target!(|data: &[u8]| {
    let options = ReadOptions::untrusted();
    if let Ok(metadata) = read_metadata(data, &options) {
        let _ = pl_parser::extract(&metadata.fields);
    }
});
