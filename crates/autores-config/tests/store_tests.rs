//! ConfigStore integration tests
//!
//! Snapshot consistency under concurrent writers, and settings files on disk.

use autores_config::{
    Category, CategoryConfigPatch, ConfigStore, GlobalConfigPatch, Settings,
};
use autores_ledger::{AuditLedger, InMemoryLedger};
use proptest::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Writers always move threshold and kill switch together; a reader must
/// never observe one without the other.
#[test]
fn readers_never_observe_torn_snapshots() {
    let ledger = Arc::new(InMemoryLedger::new());
    let store = Arc::new(ConfigStore::new(ledger.clone()));
    let done = Arc::new(AtomicBool::new(false));

    let writer = {
        let store = Arc::clone(&store);
        std::thread::spawn(move || {
            for i in 0..200 {
                let locked = i % 2 == 0;
                let threshold = if locked { 0.99 } else { 0.80 };
                store
                    .update_global(
                        &GlobalConfigPatch::new().kill_switch(locked).threshold(threshold),
                        "writer",
                        "flip",
                    )
                    .unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                let mut observed = 0u64;
                while !done.load(Ordering::Relaxed) {
                    let snap = store.snapshot();
                    let g = &snap.global;
                    if snap.version > 0 {
                        let expected = if g.kill_switch_active { 0.99 } else { 0.80 };
                        assert!((g.default_confidence_threshold - expected).abs() < f64::EPSILON);
                    }
                    observed += 1;
                }
                observed
            })
        })
        .collect();

    writer.join().unwrap();
    done.store(true, Ordering::Relaxed);
    for r in readers {
        assert!(r.join().unwrap() > 0);
    }

    assert_eq!(store.snapshot().version, 200);
    assert_eq!(ledger.len(), 200);
    assert!(ledger.verify_integrity().is_ok());
}

#[test]
fn store_seeded_from_settings_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("autores.toml");
    std::fs::write(
        &path,
        r#"
[global]
max_concurrent_resolutions = 2

[[categories]]
category = "security"
auto_resolution_enabled = false
"#,
    )
    .unwrap();

    let settings = Settings::load(&path).unwrap();
    let store = ConfigStore::from_settings(&settings, Arc::new(InMemoryLedger::new())).unwrap();

    assert_eq!(store.get_global().max_concurrent_resolutions, 2);
    assert!(!store.get_category(&Category::Security).unwrap().auto_resolution_enabled);
    assert!(store.get_category(&Category::Network).unwrap().auto_resolution_enabled);
}

#[test]
fn missing_settings_file_reports_path() {
    let err = Settings::load("/definitely/not/here/autores.toml").unwrap_err();
    assert!(err.to_string().contains("/definitely/not/here/autores.toml"));
}

proptest! {
    /// Every accepted category update leaves exactly one ledger entry, every
    /// refused one leaves exactly one rejection entry, and the store only
    /// ever holds valid values.
    #[test]
    fn every_category_update_is_audited_once(
        thresholds in proptest::collection::vec(-0.5f64..1.5, 1..20)
    ) {
        let ledger = Arc::new(InMemoryLedger::new());
        let store = ConfigStore::new(ledger.clone());

        for (i, t) in thresholds.iter().enumerate() {
            let before = ledger.len();
            let result = store.update_category(
                &Category::Application,
                &CategoryConfigPatch::new().threshold(*t),
                "prop",
            );
            prop_assert_eq!(ledger.len(), before + 1);
            prop_assert_eq!(result.is_ok(), (0.0..=1.0).contains(t), "update {}", i);

            let current = store.get_category(&Category::Application).unwrap();
            let effective = current.effective_threshold(&store.get_global());
            prop_assert!((0.0..=1.0).contains(&effective));
        }
    }
}
