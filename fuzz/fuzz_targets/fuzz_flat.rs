#![no_main]

use libfuzzer_sys::fuzz_target;
use pl_core::SourceFormat;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let parsed = pl_parser::parse_flat(text);
    assert_eq!(parsed.source_format, SourceFormat::FlatText);
    assert!(parsed.parse_error.is_none());
    assert_eq!(parsed, pl_parser::parse_flat(text));
});
