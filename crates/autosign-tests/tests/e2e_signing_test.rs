//! End-to-end signing pass tests
//!
//! These run the controller against a scripted mount backend and a simulated
//! LED, with real sealed wallets, key file and transaction documents.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use autosign_core::{queue, tx::SignedTx, BaseName, KeyMaterial, WalletUnlocker};
use autosign_daemon::{DaemonError, IndicatorState, LedMode, RunMode};
use common::{never, Harness, ScriptedDevice, ScriptedMount, StalledUnlocker};

use IndicatorState::{Busy, Error, Off, Standby};

#[tokio::test]
async fn test_single_pass_signs_every_pending_file() {
    let h = Harness::new(1);
    h.write_raw("abc", "BTC", 0);
    h.write_raw("def", "BTC", 0);

    let mut signer = h.autosigner();
    let ok = signer.run(RunMode::Sign, never()).await.unwrap();

    assert!(ok);
    for base in ["abc", "def"] {
        let signed = SignedTx::parse(&std::fs::read(h.signed_path(base)).unwrap()).unwrap();
        signed.verify().unwrap();
        assert_eq!(signed.signatures.len(), 1);
    }
    assert_eq!(h.mount.mounts(), 1);
    assert_eq!(h.mount.unmounts(), 1);
    assert!(!h.mount.is_mounted());
    assert_eq!(h.led.history(), vec![Busy, Standby, Off]);
}

#[tokio::test]
async fn test_already_signed_base_names_are_skipped() {
    let h = Harness::new(1);
    h.write_raw("abc", "BTC", 0);
    h.write_raw("def", "BTC", 0);
    std::fs::write(h.signed_path("def"), b"signed elsewhere").unwrap();

    assert_eq!(
        queue::scan(&h.tx_dir()).unwrap(),
        vec![BaseName::from("abc")]
    );

    let ok = h.autosigner().run(RunMode::Sign, never()).await.unwrap();
    assert!(ok);
    assert!(h.signed_path("abc").exists());
    assert_eq!(
        std::fs::read(h.signed_path("def")).unwrap(),
        b"signed elsewhere"
    );
}

#[tokio::test]
async fn test_second_pass_rewrites_nothing() {
    let h = Harness::new(1);
    h.write_raw("abc", "BTC", 0);

    assert!(h.autosigner().run(RunMode::Sign, never()).await.unwrap());
    let first = std::fs::read(h.signed_path("abc")).unwrap();
    let modified = std::fs::metadata(h.signed_path("abc"))
        .unwrap()
        .modified()
        .unwrap();

    for _ in 0..2 {
        assert!(h.autosigner().run(RunMode::Sign, never()).await.unwrap());
        assert!(queue::scan(&h.tx_dir()).unwrap().is_empty());
    }

    assert_eq!(std::fs::read(h.signed_path("abc")).unwrap(), first);
    assert_eq!(
        std::fs::metadata(h.signed_path("abc"))
            .unwrap()
            .modified()
            .unwrap(),
        modified
    );
    assert_eq!(h.mount.mounts(), 3);
    assert_eq!(h.mount.unmounts(), 3);
}

#[tokio::test]
async fn test_bad_files_do_not_abort_the_batch() {
    let h = Harness::new(1);
    h.write_raw("a", "BTC", 0);
    h.write_garbage("b");
    h.write_raw("c", "BTC", 0);
    h.write_raw("d", "DOGE", 0);
    h.write_raw("e", "BTC", 0);

    let ok = h.autosigner().run(RunMode::Sign, never()).await.unwrap();

    assert!(!ok);
    assert_eq!(h.signed_count(), 3);
    assert!(!h.signed_path("b").exists());
    assert!(!h.signed_path("d").exists());
    assert_eq!(
        queue::scan(&h.tx_dir()).unwrap(),
        vec![BaseName::from("b"), BaseName::from("d")]
    );
    assert_eq!(h.mount.unmounts(), 1);
    assert_eq!(h.led.history(), vec![Busy, Error, Off]);
}

#[tokio::test]
async fn test_wrong_key_file_signs_nothing() {
    let h = Harness::new(1);
    h.write_raw("abc", "BTC", 0);

    // well-formed, but not the key the wallet was sealed under
    let other = KeyMaterial::generate();
    std::fs::write(h.config.key_path(), other.file_contents().as_bytes()).unwrap();

    let ok = h.autosigner().run(RunMode::Sign, never()).await.unwrap();

    assert!(!ok);
    assert_eq!(h.signed_count(), 0);
    assert!(h.tx_dir().join("abc.rawtx").exists());
    assert_eq!(h.mount.mounts(), 1);
    assert_eq!(h.mount.unmounts(), 1);
    assert_eq!(h.led.history(), vec![Busy, Error, Off]);
}

#[tokio::test]
async fn test_one_bad_wallet_locks_all() {
    let mut h = Harness::new(2);
    let stranger = KeyMaterial::generate();
    h.add_wallet([9; 32], &stranger);
    h.write_raw("abc", "BTC", 0);
    h.write_raw("def", "BTC", 1);

    let ok = h.autosigner().run(RunMode::Sign, never()).await.unwrap();

    assert!(!ok);
    assert_eq!(h.signed_count(), 0);
    assert_eq!(queue::scan(&h.tx_dir()).unwrap().len(), 2);
    assert_eq!(h.mount.unmounts(), 1);
}

#[tokio::test]
async fn test_missing_key_file_counts_as_unlock_failure() {
    let h = Harness::new(1);
    h.write_raw("abc", "BTC", 0);
    std::fs::remove_file(h.config.key_path()).unwrap();

    let ok = h.autosigner().run(RunMode::Sign, never()).await.unwrap();
    assert!(!ok);
    assert_eq!(h.signed_count(), 0);
    assert_eq!(h.mount.unmounts(), 1);
}

#[tokio::test]
async fn test_stealth_hides_locked_pass() {
    let mut h = Harness::new(1);
    h.config.led = LedMode::Stealth;
    std::fs::write(
        h.config.key_path(),
        KeyMaterial::generate().file_contents().as_bytes(),
    )
    .unwrap();

    let ok = h.autosigner().run(RunMode::Sign, never()).await.unwrap();
    assert!(!ok);
    assert_eq!(h.led.history(), vec![Off]);
}

#[tokio::test]
async fn test_stealth_reveals_busy_after_unlock() {
    let mut h = Harness::new(1);
    h.config.led = LedMode::Stealth;
    h.write_raw("abc", "BTC", 0);

    let ok = h.autosigner().run(RunMode::Sign, never()).await.unwrap();
    assert!(ok);
    assert_eq!(h.led.history(), vec![Busy, Off, Off]);
}

#[tokio::test]
async fn test_signal_mid_pass_unmounts_once() {
    let h = Harness::new(1);
    h.write_raw("abc", "BTC", 0);
    h.write_raw("def", "BTC", 0);

    let mount = Arc::clone(&h.mount);
    let shutdown = async move {
        mount.on_mount.notified().await;
        "SIGTERM"
    };

    let mut signer = h.autosigner();
    let err = signer.run(RunMode::Sign, shutdown).await.unwrap_err();

    assert!(matches!(err, DaemonError::Interrupted("SIGTERM")));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(h.mount.mounts(), 1);
    assert_eq!(h.mount.unmounts(), 1);
    assert!(!h.mount.is_mounted());
    assert_eq!(h.led.last(), Some(Off));
    assert_eq!(signer.indicator_state(), Off);
}

#[tokio::test]
async fn test_wait_loop_signs_once_per_insertion() {
    let h = Harness::new(1);
    h.write_raw("abc", "BTC", 0);

    let device = Arc::new(ScriptedDevice::new(&[false, false, true, true, false]));
    let watcher = Arc::clone(&device);
    let shutdown = async move {
        watcher.exhausted.notified().await;
        "SIGINT"
    };

    let mut signer = h.autosigner_with(device);
    let err = signer.run(RunMode::Wait, shutdown).await.unwrap_err();

    assert!(matches!(err, DaemonError::Interrupted("SIGINT")));
    assert_eq!(h.mount.mounts(), 1);
    assert_eq!(h.mount.unmounts(), 1);
    assert!(h.signed_path("abc").exists());
    assert_eq!(h.led.history(), vec![Standby, Busy, Standby, Off]);
}

#[tokio::test]
async fn test_wait_loop_survives_failed_pass() {
    let h = Harness::new(1);
    std::fs::remove_dir_all(h.tx_dir()).unwrap();

    let device = Arc::new(ScriptedDevice::new(&[true, false, true]));
    let watcher = Arc::clone(&device);
    let shutdown = async move {
        watcher.exhausted.notified().await;
        "SIGINT"
    };

    let err = h
        .autosigner_with(device)
        .run(RunMode::Wait, shutdown)
        .await
        .unwrap_err();

    assert!(matches!(err, DaemonError::Interrupted(_)));
    assert_eq!(h.mount.mounts(), 2);
    assert_eq!(h.mount.unmounts(), 2);
}

#[tokio::test]
async fn test_missing_tx_dir_is_fatal_but_unmounts() {
    let h = Harness::new(1);
    std::fs::remove_dir_all(h.tx_dir()).unwrap();

    let err = h
        .autosigner()
        .run(RunMode::Sign, never())
        .await
        .unwrap_err();

    assert!(matches!(err, DaemonError::TxDir(_)));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(h.mount.mounts(), 1);
    assert_eq!(h.mount.unmounts(), 1);
    assert_eq!(h.led.history(), vec![Busy, Error, Off]);
}

#[tokio::test]
async fn test_no_wallets_is_precondition_before_mount() {
    let h = Harness::new(0);
    h.write_garbage("abc");

    let err = h
        .autosigner()
        .run(RunMode::Sign, never())
        .await
        .unwrap_err();

    assert_eq!(err.exit_code(), 2);
    assert_eq!(h.mount.mounts(), 0);
    assert_eq!(h.mount.unmounts(), 0);
}

#[tokio::test]
async fn test_unreadable_queue_entries_do_not_abort_the_batch() {
    let h = Harness::new(1);
    h.write_raw("a", "BTC", 0);
    std::fs::create_dir(h.tx_dir().join("b.rawtx")).unwrap();
    h.write_raw("c", "BTC", 0);
    #[cfg(unix)]
    std::os::unix::fs::symlink(h.tx_dir().join("nowhere"), h.tx_dir().join("d.rawtx")).unwrap();
    h.write_raw("e", "BTC", 0);

    let ok = h.autosigner().run(RunMode::Sign, never()).await.unwrap();

    assert!(!ok);
    for base in ["a", "c", "e"] {
        assert!(h.signed_path(base).exists(), "{} not signed", base);
    }
    assert!(!h.signed_path("b").exists());
    assert_eq!(h.mount.unmounts(), 1);
    assert_eq!(h.led.history(), vec![Busy, Error, Off]);
}

#[tokio::test]
async fn test_unmount_failure_does_not_mask_success() {
    let mut h = Harness::new(1);
    h.mount = Arc::new(ScriptedMount::failing_unmount());
    h.write_raw("abc", "BTC", 0);

    let ok = h.autosigner().run(RunMode::Sign, never()).await.unwrap();

    assert!(ok);
    assert!(h.signed_path("abc").exists());
    assert!(h.mount.unmounts() >= 1);
    assert_eq!(h.led.history(), vec![Busy, Standby, Off]);
}

#[tokio::test]
async fn test_signal_during_unlock_is_not_held_up() {
    let mut h = Harness::new(1);
    h.write_raw("abc", "BTC", 0);
    let stalled = Arc::new(StalledUnlocker::default());
    h.unlocker = Arc::clone(&stalled) as Arc<dyn WalletUnlocker>;

    let entered = Arc::clone(&stalled);
    let shutdown = async move {
        entered.entered.notified().await;
        "SIGINT"
    };

    let started = Instant::now();
    let err = h
        .autosigner()
        .run(RunMode::Sign, shutdown)
        .await
        .unwrap_err();
    let elapsed = started.elapsed();
    stalled.release();

    assert!(matches!(err, DaemonError::Interrupted("SIGINT")));
    assert!(elapsed < Duration::from_secs(2), "took {:?}", elapsed);
    assert_eq!(h.mount.unmounts(), 1);
    assert_eq!(h.signed_count(), 0);
}
