#![no_main]

use autosign_core::SignedTx;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(signed) = SignedTx::parse(data) {
        // Arbitrary signatures must be rejected, never panic
        let _ = signed.verify();
        let _ = signed.format_view();
        let _ = signed.non_wallet_outputs().count();
    }
});
