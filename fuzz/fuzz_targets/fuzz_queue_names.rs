#![no_main]

use autosign_core::queue::pending_from_names;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    let names: Vec<&str> = text.split('\n').collect();
    let pending = pending_from_names(names.iter().copied());

    // Sorted, unique, and each has an unsigned file but no signed one
    assert!(pending.windows(2).all(|w| w[0] < w[1]));
    for base in &pending {
        assert!(names.contains(&base.raw_file_name().as_str()));
        assert!(!names.contains(&base.signed_file_name().as_str()));
    }
});
