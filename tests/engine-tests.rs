use std::fs;
use std::io::Write;
use std::sync::Arc;

use assert_fs::TempDir;
use common::*;
use ocflkit::store::Store;
use ocflkit::{
    CommitOptions, DigestAlgorithm, FileSelector, ObjectConfig, OcflError, Result, UpdateMode,
    VersionNum,
};

mod common;

#[test]
fn first_commit_creates_version_one() -> Result<()> {
    let temp = TempDir::new().unwrap();
    let store = fs_store(&temp);
    let storage = flat_storage(store.clone());
    let object = storage.object("o1")?;

    let committed = object.update(|tx| tx.write("a.txt", b"hello"))?;

    assert_eq!(Some(VersionNum::new(1)), committed);

    let inventory = object.inventory(None)?.unwrap();
    assert_eq!(VersionNum::new(1), inventory.head);

    let expected_digest = DigestAlgorithm::Sha512.hash_bytes(b"hello");
    let state_digest = inventory
        .get_version(VersionNum::new(1))?
        .lookup_digest(&path("a.txt"))
        .unwrap();
    assert_eq!(&expected_digest, state_digest.as_ref());

    assert_eq!(
        "v1/content/a.txt",
        inventory
            .content_path_for_logical_path(&path("a.txt"), None)?
            .as_str()
    );

    assert_eq!(
        b"hello".to_vec(),
        object.read(FileSelector::Logical {
            path: "a.txt",
            version: None
        })?
    );

    // physical layout
    assert!(store.exists("o1/0=ocfl_object_1.1")?);
    assert_eq!(b"ocfl_object_1.1\n".to_vec(), store.read("o1/0=ocfl_object_1.1")?);
    assert!(store.exists("o1/inventory.json")?);
    assert!(store.exists("o1/inventory.json.sha512")?);
    assert!(store.exists("o1/v1/inventory.json")?);
    assert!(store.exists("o1/v1/content/a.txt")?);

    // the version copy of the inventory matches the root copy
    assert_eq!(store.read("o1/inventory.json")?, store.read("o1/v1/inventory.json")?);

    Ok(())
}

#[test]
fn identical_update_rolls_back_silently() -> Result<()> {
    let temp = TempDir::new().unwrap();
    let store = fs_store(&temp);
    let storage = flat_storage(store.clone());
    let object = storage.object("o1")?;

    object.update(|tx| tx.write("a.txt", b"hello"))?;
    let second = object.update(|tx| tx.write("a.txt", b"hello"))?;

    assert_eq!(None, second);
    assert_eq!(VersionNum::new(1), object.inventory(None)?.unwrap().head);
    assert!(!store.exists("o1/v2")?);
    assert!(!store.exists("o1__work")?);

    Ok(())
}

#[test]
fn rename_carries_digest_without_new_content() -> Result<()> {
    let temp = TempDir::new().unwrap();
    let store = fs_store(&temp);
    let storage = flat_storage(store.clone());
    let object = storage.object("o1")?;

    object.update(|tx| tx.write("a.txt", b"hello"))?;
    let committed = object.update(|tx| tx.move_files("a.txt", "b/b.txt"))?;

    assert_eq!(Some(VersionNum::new(2)), committed);

    let inventory = object.inventory(None)?.unwrap();
    let v1_digest = inventory
        .get_version(VersionNum::new(1))?
        .lookup_digest(&path("a.txt"))
        .unwrap()
        .clone();
    let v2 = inventory.get_version(VersionNum::new(2))?;

    assert_eq!(Some(&v1_digest), v2.lookup_digest(&path("b/b.txt")));
    assert_eq!(None, v2.lookup_digest(&path("a.txt")));

    // the content stays where v1 put it
    assert!(store.exists("o1/v1/content/a.txt")?);
    assert!(!store.exists("o1/v2/content")?);

    Ok(())
}

#[test]
fn removed_file_is_content_not_found() -> Result<()> {
    let temp = TempDir::new().unwrap();
    let storage = flat_storage(fs_store(&temp));
    let object = storage.object("o1")?;

    object.update(|tx| tx.write("a.txt", b"hello"))?;
    object.update(|tx| tx.move_files("a.txt", "b/b.txt"))?;
    object.update(|tx| tx.remove_files("b/b.txt").map(|_| ()))?;

    let err = object
        .read(FileSelector::Logical {
            path: "b/b.txt",
            version: None,
        })
        .unwrap_err();

    assert!(matches!(err, OcflError::ContentNotFound { .. }));

    // the old version still resolves
    assert_eq!(
        b"hello".to_vec(),
        object.read(FileSelector::Logical {
            path: "b/b.txt",
            version: Some(VersionNum::new(2))
        })?
    );

    Ok(())
}

#[test]
fn reinstate_restores_prior_mapping() -> Result<()> {
    let temp = TempDir::new().unwrap();
    let storage = flat_storage(fs_store(&temp));
    let object = storage.object("o1")?;

    object.update(|tx| tx.write("a.txt", b"hello"))?;
    object.update(|tx| tx.move_files("a.txt", "b/b.txt"))?;
    object.update(|tx| tx.remove_files("b/b.txt").map(|_| ()))?;
    let committed =
        object.update(|tx| tx.reinstate(VersionNum::new(2), "b/b.txt").map(|_| ()))?;

    assert_eq!(Some(VersionNum::new(4)), committed);

    let inventory = object.inventory(None)?.unwrap();
    let v2_digest = inventory
        .get_version(VersionNum::new(2))?
        .lookup_digest(&path("b/b.txt"))
        .unwrap()
        .clone();

    assert_eq!(
        Some(&v2_digest),
        inventory
            .get_version(VersionNum::new(4))?
            .lookup_digest(&path("b/b.txt"))
    );

    Ok(())
}

#[test]
fn second_open_transaction_is_rejected() -> Result<()> {
    let temp = TempDir::new().unwrap();
    let storage = flat_storage(fs_store(&temp));
    let object = storage.object("o1")?;

    object.update(|tx| tx.write("a.txt", b"hello"))?;

    let mut first = object.begin_update(UpdateMode::Merge)?;
    first.write("b.txt", b"more")?;

    let err = object.begin_update(UpdateMode::Merge).unwrap_err();
    assert!(matches!(err, OcflError::UncommittedChanges(_)));

    first.rollback()?;

    // rolled back workspace no longer blocks a new transaction
    let again = object.begin_update(UpdateMode::Merge)?;
    drop(again);

    Ok(())
}

#[test]
fn identical_content_is_written_once() -> Result<()> {
    let temp = TempDir::new().unwrap();
    let counting = Arc::new(CountingStore::new(temp.path())?);
    let store: Arc<dyn Store> = counting.clone();
    let storage = flat_storage(store);
    let object = storage.object("o1")?;

    object.update(|tx| {
        tx.write("a.txt", b"same bytes")?;
        tx.write("copy/b.txt", b"same bytes")
    })?;
    object.update(|tx| tx.write("c.txt", b"same bytes"))?;

    assert_eq!(1, counting.content_writes());

    let inventory = object.inventory(None)?.unwrap();
    let digest = DigestAlgorithm::Sha512.hash_bytes(b"same bytes");
    assert_eq!(
        "v1/content/a.txt",
        inventory
            .content_path_for_digest(&digest, None, None)?
            .as_str()
    );

    // the identical update in v2 changed state only, so no v2 content dir exists
    assert_eq!(VersionNum::new(2), inventory.head);

    Ok(())
}

#[test]
fn removing_missing_path_is_a_noop() -> Result<()> {
    let temp = TempDir::new().unwrap();
    let storage = flat_storage(fs_store(&temp));
    let object = storage.object("o1")?;

    object.update(|tx| tx.write("a.txt", b"hello"))?;

    let committed = object.update(|tx| {
        assert_eq!(0, tx.remove_files("missing.txt")?);
        Ok(())
    })?;

    assert_eq!(None, committed);
    assert_eq!(VersionNum::new(1), object.inventory(None)?.unwrap().head);

    Ok(())
}

#[test]
fn versions_are_monotonic_and_padded() -> Result<()> {
    let temp = TempDir::new().unwrap();
    let storage = flat_storage(fs_store(&temp));

    let object = storage.object_with_config(
        "padded",
        ObjectConfig {
            zero_padding_width: 4,
            ..ObjectConfig::default()
        },
    )?;

    object.update(|tx| tx.write("f.txt", b"1"))?;
    object.update(|tx| tx.write("f.txt", b"2"))?;
    let committed = object.update(|tx| tx.write("f.txt", b"3"))?;

    assert_eq!("v0003", committed.unwrap().to_string());
    assert_eq!("v0003", object.inventory(None)?.unwrap().head.to_string());

    Ok(())
}

#[test]
fn replace_mode_starts_from_empty_state() -> Result<()> {
    let temp = TempDir::new().unwrap();
    let storage = flat_storage(fs_store(&temp));
    let object = storage.object("o1")?;

    object.update(|tx| {
        tx.write("a.txt", b"one")?;
        tx.write("b.txt", b"two")
    })?;

    object.update_with(UpdateMode::Replace, CommitOptions::default(), |tx| {
        tx.write("only.txt", b"three")
    })?;

    let inventory = object.inventory(None)?.unwrap();
    let head = inventory.get_version(inventory.head)?;

    assert_eq!(1, head.state_len());
    assert!(head.lookup_digest(&path("only.txt")).is_some());
    assert_eq!(None, head.lookup_digest(&path("a.txt")));

    Ok(())
}

#[test]
fn tampered_inventory_is_detected() -> Result<()> {
    let temp = TempDir::new().unwrap();
    let store = fs_store(&temp);
    let storage = flat_storage(store.clone());

    storage.object("o1")?.update(|tx| tx.write("a.txt", b"hello"))?;

    let inventory_file = temp.path().join("o1").join("inventory.json");
    let mut bytes = fs::read(&inventory_file).unwrap();
    bytes.extend_from_slice(b"\n");
    fs::write(&inventory_file, &bytes).unwrap();

    // a fresh handle so the cached inventory is not used
    let err = storage.object("o1")?.inventory(None).unwrap_err();
    assert!(matches!(err, OcflError::InventoryCorrupted { .. }));

    Ok(())
}

#[test]
fn commit_is_terminal() -> Result<()> {
    let temp = TempDir::new().unwrap();
    let storage = flat_storage(fs_store(&temp));
    let object = storage.object("o1")?;

    let mut tx = object.begin_update(UpdateMode::Merge)?;
    tx.write("a.txt", b"hello")?;

    assert_eq!(Some(VersionNum::new(1)), tx.commit(commit_msg("v1"))?);

    // committing again is a no-op; crossing to rollback is an error
    assert_eq!(None, tx.commit(commit_msg("again"))?);
    assert!(matches!(
        tx.rollback().unwrap_err(),
        OcflError::TransactionAlreadyCommitted { .. }
    ));
    assert!(matches!(
        tx.write("b.txt", b"more").unwrap_err(),
        OcflError::TransactionAlreadyCommitted { .. }
    ));

    Ok(())
}

#[test]
fn rollback_discards_staged_changes() -> Result<()> {
    let temp = TempDir::new().unwrap();
    let store = fs_store(&temp);
    let storage = flat_storage(store.clone());
    let object = storage.object("o1")?;

    let mut tx = object.begin_update(UpdateMode::Merge)?;
    tx.write("a.txt", b"hello")?;
    tx.rollback()?;
    tx.rollback()?; // idempotent

    assert!(!object.exists()?);
    assert!(!store.exists("o1__work")?);
    assert!(matches!(
        tx.commit(commit_msg("v1")).unwrap_err(),
        OcflError::TransactionAlreadyCommitted { .. }
    ));

    Ok(())
}

#[test]
fn unfinalized_writer_fails_the_commit() -> Result<()> {
    let temp = TempDir::new().unwrap();
    let store = fs_store(&temp);
    let storage = flat_storage(store.clone());
    let object = storage.object("o1")?;

    let mut tx = object.begin_update(UpdateMode::Merge)?;
    tx.write("a.txt", b"fine")?;

    let mut writer = tx.writer("b.txt")?;
    writer.write_all(b"partial")?;
    drop(writer);

    let err = tx.commit(commit_msg("v1")).unwrap_err();
    assert!(matches!(
        err,
        OcflError::UnfinishedOperations { count: 1, .. }
    ));

    // the failed commit rolled everything back
    assert!(!object.exists()?);
    assert!(!store.exists("o1__work")?);

    Ok(())
}

#[test]
fn streaming_writer_round_trip() -> Result<()> {
    let temp = TempDir::new().unwrap();
    let storage = flat_storage(fs_store(&temp));
    let object = storage.object("o1")?;

    let mut tx = object.begin_update(UpdateMode::Merge)?;

    let mut writer = tx.writer("streamed.txt")?;
    writer.write_all(b"hello ")?;
    writer.write_all(b"world")?;
    writer.finalize(&mut tx)?;

    tx.commit(commit_msg("v1"))?;

    assert_eq!(
        b"hello world".to_vec(),
        object.read(FileSelector::Logical {
            path: "streamed.txt",
            version: None
        })?
    );

    Ok(())
}

#[test]
fn streaming_duplicate_content_is_discarded() -> Result<()> {
    let temp = TempDir::new().unwrap();
    let store = fs_store(&temp);
    let storage = flat_storage(store.clone());
    let object = storage.object("o1")?;

    object.update(|tx| tx.write("a.txt", b"same"))?;

    let mut tx = object.begin_update(UpdateMode::Merge)?;
    let mut writer = tx.writer("b.txt")?;
    writer.write_all(b"same")?;
    writer.finalize(&mut tx)?;
    tx.commit(commit_msg("v2"))?;

    assert!(!store.exists("o1/v2/content/b.txt")?);
    assert_eq!(
        b"same".to_vec(),
        object.read(FileSelector::Logical {
            path: "b.txt",
            version: None
        })?
    );

    Ok(())
}

#[test]
fn import_dir_preserves_structure() -> Result<()> {
    let temp = TempDir::new().unwrap();
    let storage = flat_storage(fs_store(&temp));
    let object = storage.object("o1")?;

    let source = TempDir::new().unwrap();
    create_file(&source, "x.txt", "one");
    create_file(&source, "sub/y.txt", "two");
    create_file(&source, "sub/deeper/z.txt", "one");

    object.update(|tx| tx.import_dir("data", source.path()))?;

    let inventory = object.inventory(None)?.unwrap();
    let head = inventory.get_version(inventory.head)?;

    assert_eq!(3, head.state_len());
    assert!(head.lookup_digest(&path("data/x.txt")).is_some());
    assert!(head.lookup_digest(&path("data/sub/y.txt")).is_some());

    // x.txt and z.txt have the same bytes and share a digest
    assert_eq!(
        head.lookup_digest(&path("data/x.txt")),
        head.lookup_digest(&path("data/sub/deeper/z.txt"))
    );

    assert_eq!(
        b"two".to_vec(),
        object.read(FileSelector::Logical {
            path: "data/sub/y.txt",
            version: None
        })?
    );

    Ok(())
}

#[test]
fn import_file_streams_from_disk() -> Result<()> {
    let temp = TempDir::new().unwrap();
    let storage = flat_storage(fs_store(&temp));
    let object = storage.object("o1")?;

    let source = TempDir::new().unwrap();
    create_file(&source, "big.bin", "payload");

    object.update(|tx| tx.import_file("files/big.bin", source.path().join("big.bin")))?;

    assert_eq!(
        b"payload".to_vec(),
        object.read(FileSelector::Logical {
            path: "files/big.bin",
            version: None
        })?
    );

    Ok(())
}

#[test]
fn fixity_digests_are_recorded_for_new_content() -> Result<()> {
    let temp = TempDir::new().unwrap();
    let storage = flat_storage(fs_store(&temp));

    let object = storage.object_with_config(
        "o1",
        ObjectConfig {
            fixity_algorithms: vec![DigestAlgorithm::Md5, DigestAlgorithm::Crc32],
            ..ObjectConfig::default()
        },
    )?;

    object.update(|tx| tx.write("f.txt", b"fixity me"))?;

    let inventory = object.inventory(None)?.unwrap();
    let fixity = inventory.fixity_for_content_path(&path("v1/content/f.txt"));

    let md5: String = DigestAlgorithm::Md5.hash_bytes(b"fixity me").into();
    let crc32: String = DigestAlgorithm::Crc32.hash_bytes(b"fixity me").into();

    assert_eq!(Some(&md5), fixity.get("md5"));
    assert_eq!(Some(&crc32), fixity.get("crc32"));

    Ok(())
}

#[test]
fn purge_rewrites_history_and_requires_force() -> Result<()> {
    let temp = TempDir::new().unwrap();
    let store = fs_store(&temp);
    let storage = flat_storage(store.clone());
    let object = storage.object("o1")?;

    object.update(|tx| {
        tx.write("secret.txt", b"remove me")?;
        tx.write("keep.txt", b"keep")
    })?;
    object.update(|tx| tx.write("secret.txt", b"remove me too"))?;

    let mut tx = object.begin_update(UpdateMode::Merge)?;
    assert_eq!(2, tx.purge("secret.txt")?);

    let err = tx.commit(commit_msg("purge")).unwrap_err();
    assert!(matches!(err, OcflError::IllegalState(_)));

    let mut options = commit_msg("purge");
    options.force = true;
    assert_eq!(Some(VersionNum::new(3)), tx.commit(options)?);

    let inventory = object.inventory(None)?.unwrap();
    for version in 1..=3 {
        assert_eq!(
            None,
            inventory
                .get_version(VersionNum::new(version))?
                .lookup_digest(&path("secret.txt"))
        );
    }

    assert!(!store.exists("o1/v1/content/secret.txt")?);
    assert!(!store.exists("o1/v2/content/secret.txt")?);
    assert_eq!(
        b"keep".to_vec(),
        object.read(FileSelector::Logical {
            path: "keep.txt",
            version: None
        })?
    );

    Ok(())
}

#[test]
fn updater_error_rolls_back() -> Result<()> {
    let temp = TempDir::new().unwrap();
    let store = fs_store(&temp);
    let storage = flat_storage(store.clone());
    let object = storage.object("o1")?;

    let result = object.update(|tx| {
        tx.write("a.txt", b"hello")?;
        Err(OcflError::General("updater failed".to_string()))
    });

    assert!(result.is_err());
    assert!(!object.exists()?);
    assert!(!store.exists("o1__work")?);

    Ok(())
}

#[test]
fn copy_aliases_content_within_a_version() -> Result<()> {
    let temp = TempDir::new().unwrap();
    let storage = flat_storage(fs_store(&temp));
    let object = storage.object("o1")?;

    object.update(|tx| tx.write("a.txt", b"hello"))?;
    object.update(|tx| tx.copy_files(None, "a.txt", "alias/a.txt").map(|_| ()))?;

    let inventory = object.inventory(None)?.unwrap();
    let head = inventory.get_version(inventory.head)?;

    assert_eq!(
        head.lookup_digest(&path("a.txt")),
        head.lookup_digest(&path("alias/a.txt"))
    );

    Ok(())
}

#[test]
fn superseding_an_aliased_file_keeps_the_alias_content() -> Result<()> {
    let temp = TempDir::new().unwrap();
    let store = fs_store(&temp);
    let storage = flat_storage(store.clone());
    let object = storage.object("o1")?;

    object.update(|tx| {
        tx.write("a.txt", b"one")?;
        tx.write("alias.txt", b"one")?;
        tx.write("a.txt", b"two")
    })?;

    assert_eq!(
        b"one".to_vec(),
        object.read(FileSelector::Logical {
            path: "alias.txt",
            version: None
        })?
    );
    assert_eq!(
        b"two".to_vec(),
        object.read(FileSelector::Logical {
            path: "a.txt",
            version: None
        })?
    );

    // the superseding bytes were staged beside the aliased bytes, not over them
    assert_eq!(b"one".to_vec(), store.read("o1/v1/content/a.txt")?);
    assert_eq!(b"two".to_vec(), store.read("o1/v1/content/a.txt-1")?);

    let inventory = object.inventory(None)?.unwrap();
    assert!(inventory.contains_digest(&DigestAlgorithm::Sha512.hash_bytes(b"one")));
    assert!(inventory.contains_digest(&DigestAlgorithm::Sha512.hash_bytes(b"two")));

    Ok(())
}

#[test]
fn moving_onto_an_aliased_file_keeps_the_alias_content() -> Result<()> {
    let temp = TempDir::new().unwrap();
    let store = fs_store(&temp);
    let storage = flat_storage(store.clone());
    let object = storage.object("o1")?;

    object.update(|tx| {
        tx.write("a.txt", b"one")?;
        tx.write("alias.txt", b"one")?;
        tx.write("b.txt", b"two")?;
        tx.move_files("b.txt", "a.txt")
    })?;

    assert_eq!(
        b"one".to_vec(),
        object.read(FileSelector::Logical {
            path: "alias.txt",
            version: None
        })?
    );
    assert_eq!(
        b"two".to_vec(),
        object.read(FileSelector::Logical {
            path: "a.txt",
            version: None
        })?
    );
    assert_eq!(b"one".to_vec(), store.read("o1/v1/content/a.txt")?);

    Ok(())
}

#[test]
fn removing_every_reference_drops_staged_content() -> Result<()> {
    let temp = TempDir::new().unwrap();
    let store = fs_store(&temp);
    let storage = flat_storage(store.clone());
    let object = storage.object("o1")?;

    object.update(|tx| {
        tx.write("keep.txt", b"keep")?;
        tx.write("a.txt", b"one")?;
        tx.write("alias.txt", b"one")?;

        // the alias still references the content
        assert_eq!(1, tx.remove_files("a.txt")?);
        assert!(tx.inventory().contains_digest(&DigestAlgorithm::Sha512.hash_bytes(b"one")));

        // the last reference is gone, so the staged file goes with it
        assert_eq!(1, tx.remove_files("alias.txt")?);
        Ok(())
    })?;

    let inventory = object.inventory(None)?.unwrap();
    assert!(!inventory.contains_digest(&DigestAlgorithm::Sha512.hash_bytes(b"one")));
    assert_eq!(1, inventory.get_version(inventory.head)?.state_len());

    assert!(!store.exists("o1/v1/content/a.txt")?);
    assert!(store.exists("o1/v1/content/keep.txt")?);

    Ok(())
}

#[test]
fn failed_root_inventory_swap_leaves_previous_version_intact() -> Result<()> {
    let temp = TempDir::new().unwrap();
    let failing = Arc::new(FailingStore::new(temp.path())?);
    let store: Arc<dyn Store> = failing.clone();
    let storage = flat_storage(store.clone());
    let object = storage.object("o1")?;

    object.update(|tx| tx.write("a.txt", b"one"))?;

    failing.fail_on_write("o1/inventory.json.tmp");
    let err = object.update(|tx| tx.write("b.txt", b"two")).unwrap_err();
    assert!(matches!(err, OcflError::General(_)));

    // the failed version was unpublished and the object still reads at v1
    assert_eq!(VersionNum::new(1), object.inventory(None)?.unwrap().head);
    assert!(!store.exists("o1/v2")?);
    assert!(!store.exists("o1__work")?);
    assert_eq!(
        b"one".to_vec(),
        object.read(FileSelector::Logical {
            path: "a.txt",
            version: None
        })?
    );

    // and a later commit picks up where the failed one left off
    failing.clear();
    let committed = object.update(|tx| tx.write("b.txt", b"two"))?;
    assert_eq!(Some(VersionNum::new(2)), committed);

    Ok(())
}

#[test]
fn directory_rename_moves_every_child() -> Result<()> {
    let temp = TempDir::new().unwrap();
    let storage = flat_storage(fs_store(&temp));
    let object = storage.object("o1")?;

    object.update(|tx| {
        tx.write("dir/a.txt", b"one")?;
        tx.write("dir/sub/b.txt", b"two")?;
        tx.write("other.txt", b"three")
    })?;
    object.update(|tx| tx.move_files("dir", "moved"))?;

    let inventory = object.inventory(None)?.unwrap();
    let head = inventory.get_version(inventory.head)?;

    assert_eq!(3, head.state_len());
    assert!(head.lookup_digest(&path("moved/a.txt")).is_some());
    assert!(head.lookup_digest(&path("moved/sub/b.txt")).is_some());
    assert!(head.lookup_digest(&path("other.txt")).is_some());
    assert_eq!(None, head.lookup_digest(&path("dir/a.txt")));

    Ok(())
}
