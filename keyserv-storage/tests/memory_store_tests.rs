use keyserv_license::{
    Activation, Application, ApplicationRepository, AuditEvent, AuditLog, CutOptions, KeyCutter,
    KeyCutterConfig, KeyIdAllocator, KeyRecord, KeyRecordParts, KeyRepository, KeyStatus,
    KeyVerifier,
    LicenseError, ProofClaims, token,
};
use keyserv_storage::MemoryStore;
use keyserv_types::{ApplicationId, KeyId};
use proptest::prelude::*;
use std::sync::{Arc, Barrier};
use std::thread;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("keyserv_storage=debug,keyserv_license=debug")
        .try_init();
}

fn store_with_key(max: u32) -> (MemoryStore, KeyRecord) {
    let store = MemoryStore::new();
    let app = store.create_application("Test Application", None).unwrap();
    let key = {
        let cutter = KeyCutter::new(KeyCutterConfig::default(), &store).unwrap();
        let options = CutOptions {
            max_activations: Some(max),
            ..CutOptions::default()
        };
        cutter.cut_with(&app, options).unwrap()
    };
    store.save_key(&key).unwrap();
    (store, key)
}

fn parts_of(key: &KeyRecord) -> KeyRecordParts {
    KeyRecordParts {
        id: key.id(),
        application_id: key.application_id(),
        status: key.status(),
        secret: key.secret().clone(),
        max_activations: key.max_activations(),
        activations: key.activations().to_vec(),
        memo: key.memo().map(String::from),
        created_at: key.created_at(),
    }
}

// ── Applications ─────────────────────────────────────────────────

#[test]
fn create_and_fetch_application() {
    let store = MemoryStore::new();
    let app = store
        .create_application("Editor", Some("support@example.com".into()))
        .unwrap();
    assert_eq!(app.id, ApplicationId::new(1));
    assert_eq!(store.fetch_application(app.id).unwrap(), app);
}

#[test]
fn missing_application() {
    let store = MemoryStore::new();
    let err = store.fetch_application(ApplicationId::new(5)).unwrap_err();
    assert!(matches!(err, LicenseError::ApplicationNotFound(_)));
}

#[test]
fn explicit_application_ids_advance_counter() {
    let store = MemoryStore::new();
    store
        .save_application(&Application::new(ApplicationId::new(10), "Imported"))
        .unwrap();
    let next = store.create_application("Fresh", None).unwrap();
    assert_eq!(next.id, ApplicationId::new(11));
}

// ── Keys ─────────────────────────────────────────────────────────

#[test]
fn saved_key_can_be_fetched() {
    let (store, key) = store_with_key(2);
    let fetched = store.fetch_key(key.id()).unwrap();
    assert_eq!(fetched.id(), key.id());
    assert_eq!(fetched.secret(), key.secret());
    assert_eq!(store.key_count().unwrap(), 1);
}

#[test]
fn missing_key() {
    let store = MemoryStore::new();
    let err = store.fetch_key(KeyId::new(1)).unwrap_err();
    assert!(matches!(err, LicenseError::KeyNotFound(_)));
}

#[test]
fn stale_resave_cannot_unbind_devices() {
    let (store, key) = store_with_key(1);
    let mut stale = store.fetch_key(key.id()).unwrap();
    store.activate(key.id(), Activation::new("A")).unwrap();

    stale.set_memo(Some("renewed".into()));
    let err = store.save_key(&stale).unwrap_err();
    assert!(matches!(err, LicenseError::KeyExists(id) if id == key.id()));

    let err = store.activate(key.id(), Activation::new("B")).unwrap_err();
    assert!(matches!(err, LicenseError::ActivationLimitExceeded(1)));
    assert!(store.fetch_key(key.id()).unwrap().is_activated("A"));
}

#[test]
fn resave_cannot_move_key_to_other_application() {
    let (store, key) = store_with_key(1);
    let moved = KeyRecord::restore(KeyRecordParts {
        application_id: ApplicationId::new(99),
        ..parts_of(&key)
    })
    .unwrap();

    assert!(matches!(
        store.save_key(&moved).unwrap_err(),
        LicenseError::KeyExists(_)
    ));
    assert_eq!(
        store.fetch_key(key.id()).unwrap().application_id(),
        key.application_id()
    );
}

#[test]
fn memo_update_keeps_activations() {
    let (store, key) = store_with_key(2);
    store.activate(key.id(), Activation::new("A")).unwrap();
    store.set_memo(key.id(), Some("renewed".into())).unwrap();

    let fetched = store.fetch_key(key.id()).unwrap();
    assert_eq!(fetched.memo(), Some("renewed"));
    assert!(fetched.is_activated("A"));
    assert_eq!(
        store.entries_for_key(key.id()).unwrap().last().unwrap().event,
        AuditEvent::KeyModified
    );
}

#[test]
fn memo_update_of_missing_key() {
    let store = MemoryStore::new();
    let err = store.set_memo(KeyId::new(7), None).unwrap_err();
    assert!(matches!(err, LicenseError::KeyNotFound(_)));
}

#[test]
fn exhausted_id_space_does_not_wrap() {
    let (store, key) = store_with_key(1);
    let last = KeyRecord::restore(KeyRecordParts {
        id: KeyId::new(u64::MAX - 1),
        activations: Vec::new(),
        ..parts_of(&key)
    })
    .unwrap();
    store.save_key(&last).unwrap();

    for _ in 0..2 {
        let err = store.next_key_id().unwrap_err();
        assert!(matches!(err, LicenseError::Storage(_)));
    }
}

#[test]
fn allocated_ids_are_unique() {
    let store = MemoryStore::new();
    let a = store.next_key_id().unwrap();
    let b = store.next_key_id().unwrap();
    assert_ne!(a, b);
}

#[test]
fn keys_are_listed_per_application() {
    let store = MemoryStore::new();
    let app_a = store.create_application("A", None).unwrap();
    let app_b = store.create_application("B", None).unwrap();
    let cutter = KeyCutter::new(KeyCutterConfig::default(), &store).unwrap();

    let k1 = cutter.cut(&app_a).unwrap();
    let k2 = cutter.cut(&app_b).unwrap();
    let k3 = cutter.cut(&app_a).unwrap();
    for key in [&k1, &k2, &k3] {
        store.save_key(key).unwrap();
    }

    assert_eq!(
        store.keys_for_application(app_a.id).unwrap(),
        vec![k1.id(), k3.id()]
    );
    assert_eq!(store.keys_for_application(app_b.id).unwrap(), vec![k2.id()]);
}

// ── Activation ───────────────────────────────────────────────────

#[test]
fn activation_scenario() {
    init_tracing();
    let (store, key) = store_with_key(1);

    let bound = store.activate(key.id(), Activation::new("A")).unwrap();
    assert_eq!(bound.key_id(), Some(key.id()));
    assert_eq!(store.fetch_key(key.id()).unwrap().activations().len(), 1);

    let err = store.activate(key.id(), Activation::new("B")).unwrap_err();
    assert!(matches!(err, LicenseError::ActivationLimitExceeded(1)));

    store.disable_key(key.id()).unwrap();
    assert_eq!(store.fetch_key(key.id()).unwrap().status(), KeyStatus::Inactive);

    let err = store.activate(key.id(), Activation::new("C")).unwrap_err();
    assert!(matches!(err, LicenseError::KeyInactive));
    assert_eq!(store.fetch_key(key.id()).unwrap().activations().len(), 1);
}

#[test]
fn duplicate_device_rejected() {
    let (store, key) = store_with_key(3);
    store.activate(key.id(), Activation::new("A")).unwrap();
    let err = store.activate(key.id(), Activation::new("A")).unwrap_err();
    assert!(matches!(err, LicenseError::AlreadyActivated(_)));
}

#[test]
fn activation_of_missing_key() {
    let store = MemoryStore::new();
    let err = store
        .activate(KeyId::new(3), Activation::new("A"))
        .unwrap_err();
    assert!(matches!(err, LicenseError::KeyNotFound(_)));
}

#[test]
fn deactivation_frees_slot() {
    let (store, key) = store_with_key(1);
    store.activate(key.id(), Activation::new("A")).unwrap();
    let removed = store.deactivate(key.id(), "A").unwrap();
    assert_eq!(removed.identifier(), "A");
    store.activate(key.id(), Activation::new("B")).unwrap();
}

#[test]
fn enable_after_disable() {
    let (store, key) = store_with_key(1);
    store.disable_key(key.id()).unwrap();
    store.enable_key(key.id()).unwrap();
    store.activate(key.id(), Activation::new("A")).unwrap();
}

#[test]
fn concurrent_activations_respect_cap() {
    const MAX: u32 = 3;
    const DEVICES: usize = 16;

    let (store, key) = store_with_key(MAX);
    let store = Arc::new(store);
    let barrier = Arc::new(Barrier::new(DEVICES));
    let key_id = key.id();

    let handles: Vec<_> = (0..DEVICES)
        .map(|i| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                store.activate(key_id, Activation::new(format!("device-{i}")))
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let successes = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(LicenseError::ActivationLimitExceeded(MAX))))
        .count();

    assert_eq!(successes, MAX as usize);
    assert_eq!(rejected, DEVICES - MAX as usize);
    assert_eq!(
        store.fetch_key(key_id).unwrap().activations().len(),
        MAX as usize
    );
}

#[test]
fn concurrent_same_device_binds_once() {
    const ATTEMPTS: usize = 8;

    let (store, key) = store_with_key(5);
    let store = Arc::new(store);
    let barrier = Arc::new(Barrier::new(ATTEMPTS));
    let key_id = key.id();

    let handles: Vec<_> = (0..ATTEMPTS)
        .map(|_| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                store.activate(key_id, Activation::new("same-device"))
            })
        })
        .collect();

    let successes = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(Result::is_ok)
        .count();
    assert_eq!(successes, 1);
    assert_eq!(store.fetch_key(key_id).unwrap().activations().len(), 1);
}

// ── Audit ────────────────────────────────────────────────────────

#[test]
fn audit_trail_records_lifecycle() {
    let (store, key) = store_with_key(1);
    store.activate(key.id(), Activation::new("A")).unwrap();
    let _ = store.activate(key.id(), Activation::new("B"));
    store.deactivate(key.id(), "A").unwrap();
    store.disable_key(key.id()).unwrap();

    let events: Vec<AuditEvent> = store
        .entries_for_key(key.id())
        .unwrap()
        .into_iter()
        .map(|e| e.event)
        .collect();
    assert_eq!(
        events,
        vec![
            AuditEvent::KeyCreated,
            AuditEvent::Activation,
            AuditEvent::FailedActivation,
            AuditEvent::Deactivation,
            AuditEvent::KeyModified,
        ]
    );
}

#[test]
fn audit_entries_are_scoped_to_key() {
    let (store, key) = store_with_key(1);
    store.activate(key.id(), Activation::new("A")).unwrap();
    assert!(store.entries_for_key(KeyId::new(999)).unwrap().is_empty());
    assert!(
        store
            .entries_for_key(key.id())
            .unwrap()
            .iter()
            .all(|e| e.key_id == key.id())
    );
}

// ── End to end ───────────────────────────────────────────────────

#[test]
fn verify_then_activate() {
    init_tracing();
    let (store, key) = store_with_key(2);

    // Client side: the key id and secret were delivered at purchase time.
    let claims = ProofClaims::new(
        key.application_id(),
        key.id(),
        chrono::Utc::now() + chrono::Duration::minutes(5),
    );
    let proof = token::encode(&claims, key.secret()).unwrap();

    let verified = KeyVerifier::new(&store).verify_key(&proof).unwrap();
    assert_eq!(verified.id(), key.id());
    store
        .activate(verified.id(), Activation::new("workstation"))
        .unwrap();

    let reverified = KeyVerifier::new(&store).verify_key(&proof).unwrap();
    assert!(reverified.is_activated("workstation"));
}

#[test]
fn audited_verification_records_key_access() {
    let (store, key) = store_with_key(1);
    let claims = ProofClaims::new(
        key.application_id(),
        key.id(),
        chrono::Utc::now() + chrono::Duration::minutes(5),
    );
    let proof = token::encode(&claims, key.secret()).unwrap();

    KeyVerifier::new(&store)
        .with_audit(&store)
        .verify_key(&proof)
        .unwrap();

    let events: Vec<AuditEvent> = store
        .entries_for_key(key.id())
        .unwrap()
        .into_iter()
        .map(|e| e.event)
        .collect();
    assert_eq!(events, vec![AuditEvent::KeyCreated, AuditEvent::KeyAccess]);
}

#[test]
fn failed_verification_records_no_access() {
    let (store, key) = store_with_key(1);
    let claims = ProofClaims::new(
        key.application_id(),
        key.id(),
        chrono::Utc::now() - chrono::Duration::minutes(5),
    );
    let proof = token::encode(&claims, key.secret()).unwrap();

    let verifier = KeyVerifier::new(&store).with_audit(&store);
    assert!(verifier.verify_key(&proof).is_err());
    assert!(
        store
            .entries_for_key(key.id())
            .unwrap()
            .iter()
            .all(|e| e.event != AuditEvent::KeyAccess)
    );
}

#[test]
fn token_for_other_application_is_rejected() {
    let (store, key) = store_with_key(1);
    let other = store.create_application("Other", None).unwrap();
    let claims = ProofClaims::new(
        other.id,
        key.id(),
        chrono::Utc::now() + chrono::Duration::minutes(5),
    );
    let proof = token::encode(&claims, key.secret()).unwrap();

    let err = KeyVerifier::new(&store).verify_key(&proof).unwrap_err();
    assert!(matches!(err, LicenseError::ApplicationMismatch { .. }));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn store_never_exceeds_cap(max in 0u32..8, attempts in 0usize..20) {
        let (store, key) = store_with_key(max);
        for i in 0..attempts {
            let _ = store.activate(key.id(), Activation::new(format!("d{i}")));
        }
        let len = store.fetch_key(key.id()).unwrap().activations().len();
        prop_assert_eq!(len, attempts.min(max as usize));
    }
}
