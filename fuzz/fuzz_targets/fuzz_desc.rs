#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(source) = std::str::from_utf8(data) {
        // Descriptor deserialization should never panic on any input.
        let _ = serde_json::from_str::<nn2c_ir::GraphDesc>(source);
    }
});
