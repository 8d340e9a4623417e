#![no_main]

use libfuzzer_sys::fuzz_target;
use pl_core::SourceFormat;

fuzz_target!(|data: &[u8]| {
    let Ok(blob) = std::str::from_utf8(data) else {
        return;
    };
    let parsed = pl_parser::parse_graph(blob);
    assert_eq!(parsed.source_format, SourceFormat::GraphWorkflow);
    if parsed.is_failure() {
        assert!(!parsed.has_content());
    }
});
