mod support;

use auditstamp_core::AuditStore;
use chrono::Utc;
use std::sync::{Arc, Barrier};
use std::thread;
use support::{create_schema_file, registry, text};

const WORKERS: usize = 4;
const ROUNDS: usize = 5;

#[test]
fn concurrent_units_stamp_only_their_own_entities() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("concurrent.sqlite3");
    create_schema_file(&db_path);

    let handles: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let db_path = db_path.clone();
            thread::spawn(move || {
                let mut store = AuditStore::open(&db_path, registry()).unwrap();

                let mut uow = store.begin().unwrap();
                let user = uow
                    .create("User", [("name", text(&format!("worker-{worker}")))])
                    .unwrap();
                let committed = uow.commit().unwrap();
                let created = committed.entity(user).unwrap().clone();
                let user_id = created.identity().unwrap();

                for round in 0..ROUNDS {
                    let mut uow = store.begin().unwrap();
                    let user = uow.fetch("User", user_id).unwrap();
                    uow.mutate(user, "name", text(&format!("worker-{worker}-round-{round}")))
                        .unwrap();
                    let committed = uow.commit().unwrap();
                    let updated = committed.entity(user).unwrap();
                    assert_eq!(updated.created_at(), created.created_at());
                    assert!(updated.updated_at() >= created.created_at());
                }
                (worker, user_id, created.created_at())
            })
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();

    let mut store = AuditStore::open(&db_path, registry()).unwrap();
    let mut uow = store.begin().unwrap();
    for (worker, user_id, created_at) in results {
        let user = uow.fetch("User", user_id).unwrap();
        let loaded = uow.entity(user).unwrap();
        assert_eq!(
            loaded.text("name"),
            Some(format!("worker-{worker}-round-{}", ROUNDS - 1).as_str())
        );
        assert_eq!(loaded.created_at(), created_at);
        assert!(loaded.updated_at().is_some());
        assert!(loaded.updated_at() >= created_at);
    }
    uow.rollback().unwrap();
}

#[test]
fn racing_units_on_one_entity_leave_a_fresh_stamp_from_the_winner() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("race.sqlite3");
    create_schema_file(&db_path);

    let (user_id, created_at) = {
        let mut store = AuditStore::open(&db_path, registry()).unwrap();
        let mut uow = store.begin().unwrap();
        let user = uow.create("User", [("name", text("shared"))]).unwrap();
        let committed = uow.commit().unwrap();
        let user = committed.entity(user).unwrap();
        (user.identity().unwrap(), user.created_at())
    };

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|writer| {
            let db_path = db_path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut store = AuditStore::open(&db_path, registry()).unwrap();
                barrier.wait();
                let started = Utc::now();

                let mut uow = store.begin().unwrap();
                let user = uow.fetch("User", user_id).unwrap();
                uow.mutate(user, "name", text(&format!("writer-{writer}")))
                    .unwrap();
                uow.commit().unwrap();
                started
            })
        })
        .collect();

    let starts: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();

    let mut store = AuditStore::open(&db_path, registry()).unwrap();
    let mut uow = store.begin().unwrap();
    let user = uow.fetch("User", user_id).unwrap();
    let loaded = uow.entity(user).unwrap();

    assert!(matches!(loaded.text("name"), Some("writer-0") | Some("writer-1")));
    assert_eq!(loaded.created_at(), created_at);
    let updated_at = loaded.updated_at().expect("winning update is stamped");
    for started in starts {
        assert!(updated_at.timestamp_millis() >= started.timestamp_millis());
    }
    uow.rollback().unwrap();
}
