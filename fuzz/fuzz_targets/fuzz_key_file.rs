#![no_main]

use autosign_core::KeyMaterial;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(key) = KeyMaterial::parse(text) {
            assert_eq!(key.passphrase().len(), 64);
            assert!(key.passphrase().iter().all(u8::is_ascii_hexdigit));

            // Written form parses back to the same passphrase
            let again = KeyMaterial::parse(&key.file_contents()).unwrap();
            assert_eq!(key.passphrase(), again.passphrase());
        }
    }
});
