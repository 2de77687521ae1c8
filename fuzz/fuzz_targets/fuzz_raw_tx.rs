#![no_main]

use autosign_core::RawTx;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(tx) = RawTx::parse(data) {
        // Digest is over the canonical encoding, so it survives a round-trip
        let encoded = tx.to_json().unwrap();
        let reparsed = RawTx::parse(&encoded).unwrap();
        assert_eq!(tx.txid().unwrap(), reparsed.txid().unwrap());

        // Totals must not panic on overflow
        let _ = tx.input_total();
        let _ = tx.output_total();
        let _ = tx.fee();
    }
});
