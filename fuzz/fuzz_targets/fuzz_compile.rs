#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(source) = std::str::from_utf8(data) {
        // The full deserialize + resolve + emit pipeline should never
        // panic; malformed graphs must fail through BuildError.
        if let Ok(desc) = serde_json::from_str::<nn2c_ir::GraphDesc>(source) {
            let _ = nn2c_backend_c::compile(&desc);
        }
    }
});
