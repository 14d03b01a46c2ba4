#![no_main]

use dxport_rs::vfs::scan_fields;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    // First line is the input, the rest the format
    let (input, format) = text.split_once('\n').unwrap_or((&text, "%d %s %f"));
    let _ = scan_fields(input, format);
});
