use std::path::PathBuf;

use super::*;

// ── Helpers ──────────────────────────────────────────────

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("trainbook_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn open(name: &str) -> Engine {
    Engine::open(&test_wal_path(name), RoomChangePolicy::KeepOccupancy).unwrap()
}

fn open_moving(name: &str) -> Engine {
    Engine::open(&test_wal_path(name), RoomChangePolicy::MoveOccupancy).unwrap()
}

fn room_draft(name: &str, capacity: u8) -> RoomDraft {
    RoomDraft {
        room_name: name.into(),
        capacity,
        trainer_id: 1,
        detail: "ground floor".into(),
    }
}

fn booking_draft(room_id: Id, driver_id: Id) -> BookingDraft {
    BookingDraft {
        room_id,
        driver_id,
        status: BookingStatus::InProgress,
    }
}

async fn seed(engine: &Engine, capacity: u8) -> (Room, Driver) {
    let room = engine.create_room(room_draft("Simulator", capacity)).await.unwrap();
    let driver = engine
        .register_driver(DriverDraft { name: "Anan".into() })
        .await
        .unwrap();
    (room, driver)
}

async fn occupancy(engine: &Engine, room_id: Id) -> u8 {
    engine.get_room(room_id).await.unwrap().current_bookings
}

// ── Create ───────────────────────────────────────────────

#[tokio::test]
async fn create_reserves_one_unit() {
    let engine = open("create_reserves.wal");
    let (room, driver) = seed(&engine, 2).await;
    engine.create_booking(booking_draft(room.id, driver.id)).await.unwrap();

    let view = engine.create_booking(booking_draft(room.id, driver.id)).await.unwrap();
    assert_eq!(view.room.as_ref().unwrap().current_bookings, 2);
    assert_eq!(view.driver, Some(driver));
    assert_eq!(view.status, BookingStatus::InProgress);
    assert_eq!(occupancy(&engine, room.id).await, 2);
    assert_eq!(engine.booking_count(), 2);
}

#[tokio::test]
async fn create_at_capacity_rejected_without_side_effects() {
    let engine = open("create_full.wal");
    let (room, driver) = seed(&engine, 2).await;
    for _ in 0..2 {
        engine.create_booking(booking_draft(room.id, driver.id)).await.unwrap();
    }

    let result = engine.create_booking(booking_draft(room.id, driver.id)).await;
    assert!(matches!(
        result,
        Err(EngineError::CapacityExceeded { capacity: 2, .. })
    ));
    assert_eq!(occupancy(&engine, room.id).await, 2);
    assert_eq!(engine.booking_count(), 2);
}

#[tokio::test]
async fn create_with_missing_room_touches_no_counter() {
    let engine = open("create_missing_room.wal");
    let (room, driver) = seed(&engine, 3).await;
    engine.create_booking(booking_draft(room.id, driver.id)).await.unwrap();

    let result = engine.create_booking(booking_draft(999, driver.id)).await;
    assert!(matches!(result, Err(EngineError::NotFound(Entity::Room, 999))));
    assert_eq!(occupancy(&engine, room.id).await, 1);
    assert_eq!(engine.booking_count(), 1);
}

#[tokio::test]
async fn create_with_missing_driver_touches_no_counter() {
    let engine = open("create_missing_driver.wal");
    let (room, _) = seed(&engine, 3).await;

    let result = engine.create_booking(booking_draft(room.id, 42)).await;
    assert!(matches!(result, Err(EngineError::NotFound(Entity::Driver, 42))));
    assert_eq!(occupancy(&engine, room.id).await, 0);
    assert_eq!(engine.booking_count(), 0);
}

#[tokio::test]
async fn create_in_deleted_room_not_found() {
    let engine = open("create_deleted_room.wal");
    let (room, driver) = seed(&engine, 3).await;
    engine.delete_room(room.id).await.unwrap();

    let result = engine.create_booking(booking_draft(room.id, driver.id)).await;
    assert!(matches!(result, Err(EngineError::NotFound(Entity::Room, _))));
}

#[tokio::test]
async fn concurrent_creates_never_overbook() {
    let engine = Arc::new(open("concurrent_creates.wal"));
    let (room, driver) = seed(&engine, 5).await;
    let (room_id, driver_id) = (room.id, driver.id);

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine.create_booking(booking_draft(room_id, driver_id)).await
            })
        })
        .collect();

    let mut created = 0;
    let mut rejected = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => created += 1,
            Err(EngineError::CapacityExceeded { .. }) => rejected += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(created, 5);
    assert_eq!(rejected, 15);
    assert_eq!(occupancy(&engine, room.id).await, 5);
    assert_eq!(engine.bookings_in_room(room.id), 5);
}

// ── Delete ───────────────────────────────────────────────

#[tokio::test]
async fn delete_releases_one_unit() {
    let engine = open("delete_releases.wal");
    let (room, driver) = seed(&engine, 2).await;
    let first = engine.create_booking(booking_draft(room.id, driver.id)).await.unwrap();
    engine.create_booking(booking_draft(room.id, driver.id)).await.unwrap();

    engine.delete_booking(first.id).await.unwrap();
    assert_eq!(occupancy(&engine, room.id).await, 1);
    assert!(matches!(
        engine.get_booking(first.id).await,
        Err(EngineError::NotFound(Entity::Booking, _))
    ));
}

#[tokio::test]
async fn delete_frees_room_for_next_create() {
    let engine = open("delete_frees.wal");
    let (room, driver) = seed(&engine, 1).await;
    let booking = engine.create_booking(booking_draft(room.id, driver.id)).await.unwrap();
    assert!(engine.create_booking(booking_draft(room.id, driver.id)).await.is_err());

    engine.delete_booking(booking.id).await.unwrap();
    engine.create_booking(booking_draft(room.id, driver.id)).await.unwrap();
    assert_eq!(occupancy(&engine, room.id).await, 1);
}

#[tokio::test]
async fn delete_with_deleted_room_still_succeeds() {
    let engine = open("delete_orphan.wal");
    let (room, driver) = seed(&engine, 2).await;
    let booking = engine.create_booking(booking_draft(room.id, driver.id)).await.unwrap();
    engine.delete_room(room.id).await.unwrap();

    let orphan = engine.get_booking(booking.id).await.unwrap();
    assert_eq!(orphan.room_id, room.id);
    assert!(orphan.room.is_none());

    engine.delete_booking(booking.id).await.unwrap();
    assert_eq!(engine.booking_count(), 0);
}

#[tokio::test]
async fn delete_missing_booking_not_found() {
    let engine = open("delete_missing.wal");
    let result = engine.delete_booking(7).await;
    assert!(matches!(result, Err(EngineError::NotFound(Entity::Booking, 7))));
}

#[tokio::test]
async fn delete_after_drift_floors_at_zero() {
    // With the default policy a moved booking leaves its unit behind, so the
    // destination room's counter can be zero when the booking is deleted.
    let engine = open("delete_floor.wal");
    let (r1, driver) = seed(&engine, 2).await;
    let r2 = engine.create_room(room_draft("Annex", 2)).await.unwrap();
    let booking = engine.create_booking(booking_draft(r1.id, driver.id)).await.unwrap();
    engine.update_booking(booking.id, booking_draft(r2.id, driver.id)).await.unwrap();

    engine.delete_booking(booking.id).await.unwrap();
    assert_eq!(occupancy(&engine, r2.id).await, 0);
    assert_eq!(occupancy(&engine, r1.id).await, 1);
}

// ── Update ───────────────────────────────────────────────

#[tokio::test]
async fn update_room_change_keeps_both_counters() {
    let engine = open("update_keep.wal");
    let (r1, driver) = seed(&engine, 2).await;
    let r2 = engine.create_room(room_draft("Annex", 2)).await.unwrap();
    let booking = engine.create_booking(booking_draft(r1.id, driver.id)).await.unwrap();

    let draft = BookingDraft {
        room_id: r2.id,
        driver_id: driver.id,
        status: BookingStatus::Completed,
    };
    let view = engine.update_booking(booking.id, draft).await.unwrap();
    assert_eq!(view.room_id, r2.id);
    assert_eq!(view.status, BookingStatus::Completed);
    assert_eq!(view.created_at, booking.created_at);
    assert_eq!(occupancy(&engine, r1.id).await, 1);
    assert_eq!(occupancy(&engine, r2.id).await, 0);
}

#[tokio::test]
async fn update_into_full_room_allowed_under_keep_policy() {
    let engine = open("update_keep_full.wal");
    let (r1, driver) = seed(&engine, 1).await;
    let r2 = engine.create_room(room_draft("Annex", 1)).await.unwrap();
    let booking = engine.create_booking(booking_draft(r1.id, driver.id)).await.unwrap();
    engine.create_booking(booking_draft(r2.id, driver.id)).await.unwrap();

    engine.update_booking(booking.id, booking_draft(r2.id, driver.id)).await.unwrap();
    assert_eq!(occupancy(&engine, r2.id).await, 1);
}

#[tokio::test]
async fn update_resolves_references_in_order() {
    let engine = open("update_not_found.wal");
    let (room, driver) = seed(&engine, 2).await;
    let booking = engine.create_booking(booking_draft(room.id, driver.id)).await.unwrap();

    assert!(matches!(
        engine.update_booking(99, booking_draft(500, 500)).await,
        Err(EngineError::NotFound(Entity::Booking, 99))
    ));
    assert!(matches!(
        engine.update_booking(booking.id, booking_draft(500, 500)).await,
        Err(EngineError::NotFound(Entity::Room, 500))
    ));
    assert!(matches!(
        engine.update_booking(booking.id, booking_draft(room.id, 500)).await,
        Err(EngineError::NotFound(Entity::Driver, 500))
    ));
}

#[tokio::test]
async fn update_moves_unit_under_move_policy() {
    let engine = open_moving("update_move.wal");
    let (r1, driver) = seed(&engine, 2).await;
    let r2 = engine.create_room(room_draft("Annex", 2)).await.unwrap();
    let booking = engine.create_booking(booking_draft(r1.id, driver.id)).await.unwrap();

    let view = engine.update_booking(booking.id, booking_draft(r2.id, driver.id)).await.unwrap();
    assert_eq!(view.room.unwrap().current_bookings, 1);
    assert_eq!(occupancy(&engine, r1.id).await, 0);
    assert_eq!(occupancy(&engine, r2.id).await, 1);
}

#[tokio::test]
async fn update_same_room_moves_nothing_under_move_policy() {
    let engine = open_moving("update_move_same.wal");
    let (room, driver) = seed(&engine, 1).await;
    let booking = engine.create_booking(booking_draft(room.id, driver.id)).await.unwrap();

    let draft = BookingDraft {
        status: BookingStatus::Completed,
        ..booking_draft(room.id, driver.id)
    };
    engine.update_booking(booking.id, draft).await.unwrap();
    assert_eq!(occupancy(&engine, room.id).await, 1);
}

#[tokio::test]
async fn update_move_into_full_room_changes_nothing() {
    let engine = open_moving("update_move_full.wal");
    let (r1, driver) = seed(&engine, 2).await;
    let r2 = engine.create_room(room_draft("Annex", 1)).await.unwrap();
    let booking = engine.create_booking(booking_draft(r1.id, driver.id)).await.unwrap();
    engine.create_booking(booking_draft(r2.id, driver.id)).await.unwrap();

    let result = engine.update_booking(booking.id, booking_draft(r2.id, driver.id)).await;
    assert!(matches!(result, Err(EngineError::CapacityExceeded { .. })));
    assert_eq!(occupancy(&engine, r1.id).await, 1);
    assert_eq!(occupancy(&engine, r2.id).await, 1);
    assert_eq!(engine.get_booking(booking.id).await.unwrap().room_id, r1.id);
}

#[tokio::test]
async fn update_move_out_of_deleted_room_only_reserves() {
    let engine = open_moving("update_move_orphan.wal");
    let (r1, driver) = seed(&engine, 2).await;
    let r2 = engine.create_room(room_draft("Annex", 2)).await.unwrap();
    let booking = engine.create_booking(booking_draft(r1.id, driver.id)).await.unwrap();
    engine.delete_room(r1.id).await.unwrap();

    engine.update_booking(booking.id, booking_draft(r2.id, driver.id)).await.unwrap();
    assert_eq!(occupancy(&engine, r2.id).await, 1);
}

// ── Rooms, drivers, queries ──────────────────────────────

#[tokio::test]
async fn room_validation() {
    let engine = open("room_validation.wal");
    assert!(matches!(
        engine.create_room(room_draft("  ", 2)).await,
        Err(EngineError::Invalid(_))
    ));
    assert!(matches!(
        engine.create_room(room_draft("Empty", 0)).await,
        Err(EngineError::Invalid(_))
    ));
    assert!(matches!(
        engine.create_room(room_draft(&"x".repeat(300), 2)).await,
        Err(EngineError::LimitExceeded(_))
    ));
    assert!(matches!(
        engine.register_driver(DriverDraft { name: String::new() }).await,
        Err(EngineError::Invalid(_))
    ));
}

#[tokio::test]
async fn room_capacity_cannot_drop_below_occupancy() {
    let engine = open("room_shrink.wal");
    let (room, driver) = seed(&engine, 3).await;
    engine.create_booking(booking_draft(room.id, driver.id)).await.unwrap();
    engine.create_booking(booking_draft(room.id, driver.id)).await.unwrap();

    let result = engine.update_room(room.id, room_draft("Simulator", 1)).await;
    assert!(matches!(
        result,
        Err(EngineError::CapacityBelowOccupancy { capacity: 1, current_bookings: 2, .. })
    ));

    let updated = engine.update_room(room.id, room_draft("Simulator B", 2)).await.unwrap();
    assert_eq!(updated.capacity, 2);
    assert_eq!(updated.current_bookings, 2);
    assert_eq!(updated.room_name, "Simulator B");
    assert!(engine.create_booking(booking_draft(room.id, driver.id)).await.is_err());
}

#[tokio::test]
async fn get_and_list_resolve_relations() {
    let engine = open("list_bookings.wal");
    let (room, driver) = seed(&engine, 4).await;
    let a = engine.create_booking(booking_draft(room.id, driver.id)).await.unwrap();
    let b = engine.create_booking(booking_draft(room.id, driver.id)).await.unwrap();

    let fetched = engine.get_booking(a.id).await.unwrap();
    assert_eq!(fetched.driver.as_ref().map(|d| d.name.as_str()), Some("Anan"));
    assert_eq!(fetched.room.as_ref().map(|r| r.current_bookings), Some(2));

    let ids: Vec<Id> = engine.list_bookings().await.iter().map(|v| v.id).collect();
    assert_eq!(ids, vec![a.id, b.id]);
    assert_eq!(engine.list_rooms().await.len(), 1);
    assert_eq!(engine.list_drivers(), vec![driver.clone()]);
    assert_eq!(engine.get_driver(driver.id).unwrap(), driver);
    assert!(matches!(
        engine.get_driver(driver.id + 1),
        Err(EngineError::NotFound(Entity::Driver, _))
    ));
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn state_survives_reopen() {
    let path = test_wal_path("reopen.wal");
    let (room, driver, kept) = {
        let engine = Engine::open(&path, RoomChangePolicy::KeepOccupancy).unwrap();
        let (room, driver) = seed(&engine, 3).await;
        let kept = engine.create_booking(booking_draft(room.id, driver.id)).await.unwrap();
        let dropped = engine.create_booking(booking_draft(room.id, driver.id)).await.unwrap();
        engine.delete_booking(dropped.id).await.unwrap();
        engine.close().await.unwrap();
        (room, driver, kept)
    };

    let engine = Engine::open(&path, RoomChangePolicy::KeepOccupancy).unwrap();
    assert_eq!(occupancy(&engine, room.id).await, 1);
    assert_eq!(engine.get_booking(kept.id).await.unwrap().status, BookingStatus::InProgress);
    assert_eq!(engine.get_driver(driver.id).unwrap().name, "Anan");

    // ids keep counting past the deleted booking
    let next = engine.create_booking(booking_draft(room.id, driver.id)).await.unwrap();
    assert_eq!(next.id, kept.id + 2);
}

#[tokio::test]
async fn writes_after_torn_tail_survive_next_restart() {
    use std::io::Write;

    let path = test_wal_path("torn_restart.wal");
    let (first, driver) = {
        let engine = Engine::open(&path, RoomChangePolicy::KeepOccupancy).unwrap();
        let seeded = seed(&engine, 2).await;
        engine.close().await.unwrap();
        seeded
    };
    {
        // crash mid-record: a length prefix with only part of its payload
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&200u32.to_le_bytes()).unwrap();
        f.write_all(&[1, 2]).unwrap();
    }

    let (second, booking) = {
        let engine = Engine::open(&path, RoomChangePolicy::KeepOccupancy).unwrap();
        assert_eq!(engine.list_rooms().await.len(), 1);
        let second = engine.create_room(room_draft("Annex", 2)).await.unwrap();
        let booking = engine.create_booking(booking_draft(second.id, driver.id)).await.unwrap();
        engine.close().await.unwrap();
        (second, booking)
    };

    let engine = Engine::open(&path, RoomChangePolicy::KeepOccupancy).unwrap();
    let rooms = engine.list_rooms().await;
    assert_eq!(rooms.iter().map(|r| r.id).collect::<Vec<_>>(), vec![first.id, second.id]);
    assert_eq!(occupancy(&engine, second.id).await, 1);
    assert_eq!(engine.get_booking(booking.id).await.unwrap().room_id, second.id);
}

#[tokio::test]
async fn compaction_preserves_counters_and_sequences() {
    let path = test_wal_path("compact.wal");
    let (r1, r2, driver, last) = {
        let engine = Engine::open(&path, RoomChangePolicy::KeepOccupancy).unwrap();
        let (r1, driver) = seed(&engine, 3).await;
        let r2 = engine.create_room(room_draft("Annex", 3)).await.unwrap();
        let moved = engine.create_booking(booking_draft(r1.id, driver.id)).await.unwrap();
        engine.update_booking(moved.id, booking_draft(r2.id, driver.id)).await.unwrap();
        let last = engine.create_booking(booking_draft(r1.id, driver.id)).await.unwrap();
        engine.delete_booking(last.id).await.unwrap();

        assert!(engine.wal_appends_since_compact().await > 0);
        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        engine.close().await.unwrap();
        (r1, r2, driver, last)
    };

    let engine = Engine::open(&path, RoomChangePolicy::KeepOccupancy).unwrap();
    // drift from the keep-policy move is carried verbatim
    assert_eq!(occupancy(&engine, r1.id).await, 1);
    assert_eq!(occupancy(&engine, r2.id).await, 0);
    assert_eq!(engine.booking_count(), 1);
    let next = engine.create_booking(booking_draft(r1.id, driver.id)).await.unwrap();
    assert_eq!(next.id, last.id + 1);
}

#[tokio::test]
async fn writes_after_close_fail() {
    let engine = open("closed.wal");
    let (room, driver) = seed(&engine, 2).await;
    engine.close().await.unwrap();

    let result = engine.create_booking(booking_draft(room.id, driver.id)).await;
    assert!(matches!(result, Err(EngineError::WalError(_))));
    // nothing applied in memory
    assert_eq!(occupancy(&engine, room.id).await, 0);
    assert_eq!(engine.booking_count(), 0);
}
