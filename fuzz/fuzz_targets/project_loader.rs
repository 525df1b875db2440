#![no_main]

use libfuzzer_sys::fuzz_target;
use patchbay_engine::project::fuzz_load_project;

fuzz_target!(|data: &[u8]| {
    fuzz_load_project(data);
});
