use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use futures::future::join_all;
use ulid::Ulid;

use officeflow::access::{Caller, Role};
use officeflow::config::Config;
use officeflow::engine::{Engine, WorkflowError};
use officeflow::model::{BookingStatus, DeviceRequestStatus, LeaveStatus, TimeSpan};

// ── Test infrastructure ──────────────────────────────────────

fn data_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("officeflow_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn config_for(dir: &Path, pairs: &[(&str, &str)]) -> Config {
    let dir = dir.display().to_string();
    let pairs: Vec<(String, String)> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .chain([("OFFICEFLOW_DATA_DIR".to_string(), dir)])
        .collect();
    Config::from_lookup(move |key| pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone()))
}

fn open(config: &Config) -> Engine {
    Engine::new(config.wal_path(), config.leave_policy()).unwrap()
}

fn date(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn time(s: &str) -> NaiveTime {
    NaiveTime::parse_from_str(s, "%H:%M").unwrap()
}

async fn hire(engine: &Engine, name: &str, role: Role, supervisor: Option<&Caller>) -> Caller {
    let hr = Caller::new(Ulid::new(), Role::Director);
    let e = engine
        .register_employee(&hr, name, role, supervisor.map(|s| s.id))
        .await
        .unwrap();
    Caller::new(e.id, e.role)
}

// ── End-to-end ───────────────────────────────────────────────

#[tokio::test]
async fn office_day_survives_restart() {
    let dir = data_dir();
    let config = config_for(&dir, &[]);
    let engine = open(&config);

    let director = hire(&engine, "Dana", Role::Director, None).await;
    let manager = hire(&engine, "Morgan", Role::Manager, Some(&director)).await;
    let alice = hire(&engine, "Alice", Role::Employee, Some(&manager)).await;
    let bob = hire(&engine, "Bob", Role::Employee, Some(&manager)).await;
    let it = hire(&engine, "Ira", Role::Administrator, Some(&director)).await;

    // Leave: Alice asks, Morgan approves.
    let leave = engine
        .submit_leave(&alice, "annual", date("2024-03-01"), date("2024-03-03"), "spring break")
        .await
        .unwrap();
    engine.approve_leave(&manager, leave.id).await.unwrap();

    // Devices: one projector, both want it, Alice collects first.
    let projector = engine.add_device(&it, "Projector", "av", 1, None).await.unwrap();
    let a = engine.create_device_request(&alice, projector.id).await.unwrap();
    let b = engine.create_device_request(&bob, projector.id).await.unwrap();
    engine.approve_device_request(&it, a.id).await.unwrap();
    engine.approve_device_request(&it, b.id).await.unwrap();
    engine.collect_device(&alice, a.id).await.unwrap();
    let err = engine.collect_device(&bob, b.id).await.unwrap_err();
    assert!(matches!(err, WorkflowError::ResourceUnavailable(_)));

    // Rooms: back-to-back is fine, overlap is not.
    let room = engine.add_room(&it, "Room 5", 6, Some("1F")).await.unwrap();
    let day = date("2024-01-01");
    engine
        .create_booking(&alice, room.id, day, time("09:00"), time("10:00"))
        .await
        .unwrap();
    engine
        .create_booking(&bob, room.id, day, time("10:00"), time("11:00"))
        .await
        .unwrap();
    let err = engine
        .create_booking(&manager, room.id, day, time("09:30"), time("10:30"))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::BookingConflict(_)));
    assert!(err.to_string().contains("Alice"));

    drop(engine);
    let engine = open(&config);

    assert_eq!(engine.leave(&leave.id).await.unwrap().status, LeaveStatus::Approved);
    assert_eq!(engine.device(&projector.id).await.unwrap().available_quantity, 0);
    assert_eq!(
        engine.device_request(&a.id).await.unwrap().status,
        DeviceRequestStatus::Collected
    );
    assert_eq!(
        engine.device_request(&b.id).await.unwrap().status,
        DeviceRequestStatus::Approved
    );
    assert!(engine.audit_inventory().await.is_empty());
    assert_eq!(engine.bookings_for_room_day(&room.id, day).await.unwrap().len(), 2);
    let err = engine
        .create_booking(&manager, room.id, day, time("09:30"), time("10:30"))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::BookingConflict(_)));

    // Alice returns the projector and Bob gets it.
    engine.initiate_return(&alice, a.id).await.unwrap();
    engine.confirm_return(&it, a.id).await.unwrap();
    engine.collect_device(&bob, b.id).await.unwrap();
    assert!(engine.audit_inventory().await.is_empty());
}

#[tokio::test]
async fn policy_comes_from_configuration() {
    let dir = data_dir();
    let config = config_for(
        &dir,
        &[
            ("OFFICEFLOW_AUTO_APPROVE_TOP_LEVEL", "false"),
            ("OFFICEFLOW_TOP_LEVEL_FALLBACK", "true"),
        ],
    );
    let engine = open(&config);
    let director = hire(&engine, "Dana", Role::Director, None).await;
    let deputy = hire(&engine, "Dev", Role::Director, None).await;

    let leave = engine
        .submit_leave(&director, "personal", date("2024-05-02"), date("2024-05-02"), "")
        .await
        .unwrap();
    assert_eq!(leave.status, LeaveStatus::Pending);

    // Another top-level employee reviews the unsupervised director.
    let approved = engine.approve_leave(&deputy, leave.id).await.unwrap();
    assert_eq!(approved.status, LeaveStatus::Approved);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn no_two_active_bookings_overlap_under_load() {
    let dir = data_dir();
    let engine = Arc::new(open(&config_for(&dir, &[])));
    let admin = hire(&engine, "Ira", Role::Administrator, None).await;
    let room = engine.add_room(&admin, "Atrium", 30, None).await.unwrap();
    let room_id = room.id;
    let day = date("2024-10-10");

    let mut people = Vec::new();
    for i in 0..24 {
        people.push(hire(&engine, &format!("P{i}"), Role::Employee, None).await);
    }

    // Half-hour starts between 08:00 and 13:30, each one or two hours long.
    let attempts = people.iter().enumerate().map(|(i, who)| {
        let engine = engine.clone();
        let who = *who;
        let start = NaiveTime::from_hms_opt(8 + (i as u32 % 12) / 2, (i as u32 % 2) * 30, 0).unwrap();
        let end = start + chrono::Duration::minutes(60 + 60 * (i as i64 % 2));
        tokio::spawn(async move { engine.create_booking(&who, room_id, day, start, end).await })
    });
    for result in join_all(attempts).await {
        match result.unwrap() {
            Ok(_) | Err(WorkflowError::BookingConflict(_)) => {}
            Err(e) => panic!("unexpected booking error: {e}"),
        }
    }

    let active = engine.bookings_for_room_day(&room_id, day).await.unwrap();
    assert!(!active.is_empty());
    for (i, x) in active.iter().enumerate() {
        assert_eq!(x.status, BookingStatus::Active);
        for y in &active[i + 1..] {
            assert!(!x.span.overlaps(&y.span), "{:?} overlaps {:?}", x.span, y.span);
        }
    }

    let window = TimeSpan::new(time("08:00"), time("18:00"));
    let free = engine.free_slots(&room_id, day, window).await.unwrap();
    let busy: i64 = active.iter().map(|b| b.span.minutes()).sum();
    let idle: i64 = free.iter().map(TimeSpan::minutes).sum();
    assert_eq!(busy + idle, window.minutes());
}

#[tokio::test]
async fn unknown_records_are_not_found() {
    let dir = data_dir();
    let engine = open(&config_for(&dir, &[]));
    let someone = hire(&engine, "Sol", Role::Employee, None).await;

    assert!(engine.leave(&Ulid::new()).await.is_none());
    assert!(engine.device(&Ulid::new()).await.is_none());
    assert!(engine.room(&Ulid::new()).await.is_none());
    assert!(engine.employee(&Ulid::new()).is_none());

    for err in [
        engine.approve_leave(&someone, Ulid::new()).await.unwrap_err(),
        engine.collect_device(&someone, Ulid::new()).await.unwrap_err(),
        engine.cancel_booking(&someone, Ulid::new()).await.unwrap_err(),
    ] {
        assert!(matches!(err, WorkflowError::NotFound { .. }), "{err}");
        assert!(!err.is_internal());
    }
}
