use std::collections::HashSet;

use burn_manager_core::model::{FileHandle, FileRecord, FileStatus, VolumeRecord};
use burn_manager_core::store::{CollectionEvent, Dataset};
use burn_manager_core::{ResultCode, VolumeId};
use std::sync::{Arc, Mutex};

fn make_test_file(path: &str, size: u64) -> FileHandle {
    FileHandle::new(FileRecord::new(path).with_size(size))
}

fn make_test_volume(id: VolumeId, capacity: u64) -> VolumeRecord {
    let mut volume = VolumeRecord::new(capacity).with_name(format!("Disc {id}"));
    volume.set_identifier_to(id);
    volume
}

/// Every relationship points at a volume holding the file and every volume
/// member holds a relationship back.
fn assert_bidirectional(dataset: &Dataset) {
    for volume in dataset.volumes().handles() {
        let volume = volume.lock();
        for member in volume.members() {
            assert!(
                member.lock().related_volumes.find(volume.id()).is_some(),
                "member of {} lacks relationship",
                volume.id()
            );
        }
    }
    for file in dataset.files().files() {
        let path = file.path().unwrap();
        let ids = file.lock().related_volumes.volume_ids();
        for id in ids {
            let matches = dataset.volumes().find(id);
            assert_eq!(matches.len(), 1);
            assert!(matches[0].lock().contains_path(&path));
        }
    }
}

/// Library layout:
///   Disc 1: /photos/a.jpg, /photos/b.jpg
///   Disc 2: /photos/b.jpg, /music/c.flac (burned once)
///   unassigned: /docs/d.pdf
fn build_library() -> Dataset {
    let dataset = Dataset::new();
    let disc1 = dataset.add_volume(make_test_volume(1, 10_000));
    let disc2 = dataset.add_volume(make_test_volume(2, 10_000));

    let a = make_test_file("/photos/a.jpg", 1_000);
    let b = make_test_file("/photos/b.jpg", 2_000);
    let c = make_test_file("/music/c.flac", 3_000);
    let d = make_test_file("/docs/d.pdf", 4_000);
    for file in [&a, &b, &c, &d] {
        assert_eq!(dataset.add_file(file.clone()), ResultCode::Successful);
    }

    disc1.lock().add(&a);
    disc1.lock().add(&b);
    disc2.lock().add(&b);
    disc2.lock().add(&c);
    disc2.lock().mark_burned(chrono::Utc::now());
    dataset
}

#[test]
fn test_round_trip_preserves_structure() {
    let original = build_library();
    let json = original.to_json().unwrap();
    let loaded = Dataset::load_json(&json).unwrap();

    assert!(original.structurally_equal(&loaded));
    assert_bidirectional(&loaded);
    assert_eq!(loaded.files().total_size(), 10_000);
    assert_eq!(loaded.files().pending_files().len(), 2);
}

#[test]
fn test_reencoding_is_stable() {
    let json = build_library().to_json().unwrap();
    let again = Dataset::load_json(&json).unwrap().to_json().unwrap();
    assert_eq!(json, again);
}

#[test]
fn test_cascade_remove_keeps_invariant_and_is_idempotent() {
    let dataset = build_library();
    assert_bidirectional(&dataset);

    let b = dataset.files().get("/photos/b.jpg").unwrap();
    assert_eq!(dataset.remove_file(&b).unwrap(), ResultCode::Successful);
    assert_bidirectional(&dataset);
    for volume in dataset.volumes().handles() {
        assert!(!volume.lock().contains_path("/photos/b.jpg"));
    }
    assert_eq!(dataset.files().total_size(), 8_000);

    assert_eq!(dataset.remove_file(&b).unwrap(), ResultCode::Unsuccessful);
    assert_eq!(dataset.files().total_size(), 8_000);
}

#[test]
fn test_duplicate_path_rejected() {
    let dataset = Dataset::new();
    let first = make_test_file("c:\\a", 10);
    let second = make_test_file("c:\\a", 10);

    assert_eq!(dataset.add_file(first), ResultCode::Successful);
    assert_eq!(dataset.add_file(second.clone()), ResultCode::Unsuccessful);
    assert_eq!(second.status(), Some(FileStatus::Duplicate));
    assert_eq!(dataset.files().len(), 1);
}

#[test]
fn test_redistribute_then_round_trip() {
    let dataset = build_library();
    let unplaceable = dataset.redistribute(1, 5_000, false).unwrap();
    assert!(unplaceable.is_empty());
    assert_bidirectional(&dataset);

    let mut placed = HashSet::new();
    for volume in dataset.volumes().handles() {
        let volume = volume.lock();
        assert!(volume.space_used() <= 5_000);
        for path in volume.member_paths() {
            assert!(placed.insert(path));
        }
    }
    assert_eq!(placed.len(), 4);

    let loaded = Dataset::load_json(&dataset.to_json().unwrap()).unwrap();
    assert!(dataset.structurally_equal(&loaded));
}

#[test]
fn test_remove_volume_detaches_members() {
    let dataset = build_library();
    assert!(dataset.remove_volume(2).unwrap());
    assert_bidirectional(&dataset);

    let c = dataset.files().get("/music/c.flac").unwrap();
    assert!(c.lock().related_volumes.is_empty());
    // The file itself stays in the library.
    assert_eq!(dataset.files().len(), 4);
}

#[test]
fn test_observer_sees_ingest_and_removal() {
    let dataset = Dataset::new();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    dataset.subscribe(Arc::new(move |event: &CollectionEvent| {
        sink.lock().unwrap().push(event.clone());
    }));

    let file = make_test_file("/x", 5);
    dataset.add_file(file.clone());
    dataset.remove_file(&file).unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], CollectionEvent::Added { .. }));
    assert!(matches!(events[1], CollectionEvent::Removed { .. }));
}
