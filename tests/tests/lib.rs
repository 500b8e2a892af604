wasm_bindgen_test::wasm_bindgen_test_configure!(run_in_dedicated_worker);

use std::ffi::CString;

mod sahpool;
mod sanity;

fn cstr(s: &str) -> CString {
    CString::new(s).unwrap()
}
