//! Write transactions and copies through the facade.

use confinedb_core::{Configuration, CoreError, Runtime, ThreadToken, KEY_SIZE};
use confinedb_storage::{inspect_file, EncryptionKey, SnapshotEngine};
use std::fs;
use tempfile::tempdir;

fn persisted(dir: &std::path::Path) -> Configuration {
    Configuration::builder(dir.join("store.cdb")).build().unwrap()
}

#[test]
fn nested_begin_fails_without_losing_changes() {
    let temp = tempdir().unwrap();
    let runtime = Runtime::new(SnapshotEngine::new());
    let me = ThreadToken::simulated();
    let db = runtime.open(me, &persisted(temp.path())).unwrap();

    db.begin_transaction(me).unwrap();
    db.put(me, b"a", b"1").unwrap();
    let err = db.begin_transaction(me).unwrap_err();

    assert!(matches!(err, CoreError::InvalidState { .. }));
    assert!(db.is_in_transaction());
    assert_eq!(db.get(me, b"a").unwrap(), Some(b"1".to_vec()));

    db.commit_transaction(me).unwrap();
    assert_eq!(db.get(me, b"a").unwrap(), Some(b"1".to_vec()));
    db.close(me).unwrap();
}

#[test]
fn cancel_restores_then_commit_works() {
    let temp = tempdir().unwrap();
    let runtime = Runtime::new(SnapshotEngine::new());
    let me = ThreadToken::simulated();
    let db = runtime.open(me, &persisted(temp.path())).unwrap();
    db.write(me, |db| db.put(me, b"a", b"before")).unwrap();

    db.begin_transaction(me).unwrap();
    db.put(me, b"a", b"during").unwrap();
    db.put(me, b"b", b"new").unwrap();
    db.delete(me, b"a").unwrap();
    db.cancel_transaction(me).unwrap();

    assert_eq!(db.get(me, b"a").unwrap(), Some(b"before".to_vec()));
    assert_eq!(db.get(me, b"b").unwrap(), None);
    assert_eq!(db.version(me).unwrap(), 1);

    db.begin_transaction(me).unwrap();
    db.put(me, b"b", b"new").unwrap();
    db.commit_transaction(me).unwrap();
    assert_eq!(db.version(me).unwrap(), 2);
    assert_eq!(db.len(me).unwrap(), 2);
    db.close(me).unwrap();
}

#[test]
fn commit_and_cancel_out_of_sequence_fail() {
    let temp = tempdir().unwrap();
    let runtime = Runtime::new(SnapshotEngine::new());
    let me = ThreadToken::simulated();
    let db = runtime.open(me, &persisted(temp.path())).unwrap();

    assert!(matches!(
        db.commit_transaction(me),
        Err(CoreError::InvalidState { .. })
    ));
    assert!(matches!(
        db.cancel_transaction(me),
        Err(CoreError::InvalidState { .. })
    ));
    db.close(me).unwrap();
}

#[test]
fn begin_sees_latest_commit_from_other_thread() {
    let temp = tempdir().unwrap();
    let runtime = Runtime::new(SnapshotEngine::new());
    let config = persisted(temp.path());
    let a = ThreadToken::simulated();
    let b = ThreadToken::simulated();
    let db_a = runtime.open(a, &config).unwrap();
    let db_b = runtime.open(b, &config).unwrap();

    db_a.write(a, |db| db.put(a, b"counter", b"1")).unwrap();
    assert_eq!(db_b.get(b, b"counter").unwrap(), None);

    db_b.begin_transaction(b).unwrap();
    assert_eq!(db_b.get(b, b"counter").unwrap(), Some(b"1".to_vec()));
    db_b.put(b, b"counter", b"2").unwrap();
    db_b.commit_transaction(b).unwrap();

    db_a.refresh(a).unwrap();
    assert_eq!(db_a.get(a, b"counter").unwrap(), Some(b"2".to_vec()));
    db_a.close(a).unwrap();
    db_b.close(b).unwrap();
}

#[test]
fn commits_survive_reopen() {
    let temp = tempdir().unwrap();
    let config = persisted(temp.path());
    let me = ThreadToken::simulated();

    {
        let runtime = Runtime::new(SnapshotEngine::new());
        let db = runtime.open(me, &config).unwrap();
        db.write(me, |db| db.put(me, b"kept", b"yes")).unwrap();
        db.close(me).unwrap();
    }

    let runtime = Runtime::new(SnapshotEngine::new());
    let db = runtime.open(me, &config).unwrap();
    assert_eq!(db.get(me, b"kept").unwrap(), Some(b"yes".to_vec()));
    db.close(me).unwrap();
}

#[test]
fn encrypted_copy_refuses_existing_destination_before_any_io() {
    let temp = tempdir().unwrap();
    let runtime = Runtime::new(SnapshotEngine::new());
    let me = ThreadToken::simulated();
    let config = persisted(temp.path());
    let db = runtime.open(me, &config).unwrap();
    db.write(me, |db| db.put(me, b"a", b"1")).unwrap();

    let source_before = fs::read(config.path()).unwrap();
    let destination = temp.path().join("exists.cdb");
    fs::write(&destination, b"occupied").unwrap();

    let err = db
        .write_encrypted_copy_to(me, &destination, &[9u8; KEY_SIZE])
        .unwrap_err();

    assert!(matches!(err, CoreError::DestinationExists { .. }));
    assert_eq!(fs::read(&destination).unwrap(), b"occupied");
    assert_eq!(fs::read(config.path()).unwrap(), source_before);
    db.close(me).unwrap();
}

#[test]
fn copies_reflect_current_view() {
    let temp = tempdir().unwrap();
    let runtime = Runtime::new(SnapshotEngine::new());
    let me = ThreadToken::simulated();
    let db = runtime.open(me, &persisted(temp.path())).unwrap();
    db.write(me, |db| db.put(me, b"a", b"1")).unwrap();

    let plain = temp.path().join("plain.cdb");
    db.write_copy_to(me, &plain).unwrap();
    let info = inspect_file(&plain, None).unwrap();
    assert!(!info.encrypted);
    assert_eq!(info.entries, Some(1));

    db.begin_transaction(me).unwrap();
    db.put(me, b"b", b"2").unwrap();
    let encrypted = temp.path().join("encrypted.cdb");
    db.write_encrypted_copy_to(me, &encrypted, &[3u8; KEY_SIZE])
        .unwrap();
    db.cancel_transaction(me).unwrap();

    let key = EncryptionKey::from_bytes(&[3u8; KEY_SIZE]).unwrap();
    let info = inspect_file(&encrypted, Some(&key)).unwrap();
    assert!(info.encrypted);
    assert_eq!(info.entries, Some(2));
    db.close(me).unwrap();
}

#[test]
fn closing_inside_transaction_discards_changes() {
    let temp = tempdir().unwrap();
    let runtime = Runtime::new(SnapshotEngine::new());
    let me = ThreadToken::simulated();
    let config = persisted(temp.path());

    let db = runtime.open(me, &config).unwrap();
    db.begin_transaction(me).unwrap();
    db.put(me, b"lost", b"1").unwrap();
    db.close(me).unwrap();

    let db = runtime.open(me, &config).unwrap();
    assert_eq!(db.get(me, b"lost").unwrap(), None);
    db.begin_transaction(me).unwrap();
    db.cancel_transaction(me).unwrap();
    db.close(me).unwrap();
}
