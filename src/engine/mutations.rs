use std::sync::Arc;

use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use tracing::{info, warn};

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::ledger::{release, try_reserve};
use super::{Engine, EngineError, Entity, RoomChangePolicy};

type RoomGuard = OwnedRwLockWriteGuard<Room>;

fn validate_room(draft: &RoomDraft) -> Result<(), EngineError> {
    if draft.room_name.trim().is_empty() {
        return Err(EngineError::Invalid("room_name is required"));
    }
    if draft.room_name.len() > MAX_ROOM_NAME_LEN {
        return Err(EngineError::LimitExceeded("room name too long"));
    }
    if draft.detail.len() > MAX_DETAIL_LEN {
        return Err(EngineError::LimitExceeded("room detail too long"));
    }
    if draft.capacity == 0 {
        return Err(EngineError::Invalid("capacity must be at least 1"));
    }
    Ok(())
}

fn reject_full(err: EngineError) -> EngineError {
    if let EngineError::CapacityExceeded { room_id, capacity } = &err {
        metrics::counter!(observability::CAPACITY_REJECTIONS_TOTAL).increment(1);
        warn!(room_id, capacity, "booking rejected: room full");
    }
    err
}

impl Engine {
    // ── Rooms ────────────────────────────────────────────────

    pub async fn create_room(&self, draft: RoomDraft) -> Result<Room, EngineError> {
        validate_room(&draft)?;
        if self.rooms.len() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        let _gate = self.commit_gate.read().await;

        let room = Room {
            id: self.rooms.allocate_id(),
            room_name: draft.room_name,
            capacity: draft.capacity,
            current_bookings: 0,
            trainer_id: draft.trainer_id,
            detail: draft.detail,
        };
        self.wal_append(&Event::RoomCreated { room: room.clone() })
            .await?;
        self.rooms.insert(room.id, Arc::new(RwLock::new(room.clone())));
        info!(room_id = room.id, capacity = room.capacity, "room created");
        Ok(room)
    }

    /// Full overwrite of the writable fields. The ledger counter is kept, and
    /// capacity may not drop below it.
    pub async fn update_room(&self, id: Id, draft: RoomDraft) -> Result<Room, EngineError> {
        validate_room(&draft)?;
        let _gate = self.commit_gate.read().await;
        let mut guard = self.lock_room(id).await?;
        if draft.capacity < guard.current_bookings {
            return Err(EngineError::CapacityBelowOccupancy {
                room_id: id,
                capacity: draft.capacity,
                current_bookings: guard.current_bookings,
            });
        }

        let event = Event::RoomUpdated {
            id,
            room_name: draft.room_name.clone(),
            capacity: draft.capacity,
            trainer_id: draft.trainer_id,
            detail: draft.detail.clone(),
        };
        self.wal_append(&event).await?;
        guard.room_name = draft.room_name;
        guard.capacity = draft.capacity;
        guard.trainer_id = draft.trainer_id;
        guard.detail = draft.detail;
        info!(room_id = id, capacity = guard.capacity, "room updated");
        Ok(guard.clone())
    }

    /// Bookings that still reference the room are kept; their room resolves
    /// to nothing from now on.
    pub async fn delete_room(&self, id: Id) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        let guard = self.lock_room(id).await?;
        self.wal_append(&Event::RoomDeleted { id }).await?;
        self.rooms.remove(&id);
        info!(room_id = id, orphaned = guard.current_bookings, "room deleted");
        Ok(())
    }

    /// Write-lock a room, failing if it is missing or was deleted while we
    /// waited for the lock.
    pub(super) async fn lock_room(&self, id: Id) -> Result<RoomGuard, EngineError> {
        let room = self
            .rooms
            .get(&id)
            .ok_or(EngineError::NotFound(Entity::Room, id))?;
        let guard = room.write_owned().await;
        if !self.rooms.contains(&id) {
            return Err(EngineError::NotFound(Entity::Room, id));
        }
        Ok(guard)
    }

    /// Write-lock the destination and (if it still exists) the source room of
    /// a move, in ascending id order.
    async fn lock_room_pair(
        &self,
        to: Id,
        from: Id,
    ) -> Result<(RoomGuard, Option<RoomGuard>), EngineError> {
        let to_room = self
            .rooms
            .get(&to)
            .ok_or(EngineError::NotFound(Entity::Room, to))?;
        let (to_guard, from_guard) = match self.rooms.get(&from) {
            None => (to_room.write_owned().await, None),
            Some(from_room) if from < to => {
                let f = from_room.write_owned().await;
                (to_room.write_owned().await, Some(f))
            }
            Some(from_room) => {
                let t = to_room.write_owned().await;
                (t, Some(from_room.write_owned().await))
            }
        };
        if !self.rooms.contains(&to) {
            return Err(EngineError::NotFound(Entity::Room, to));
        }
        let from_guard = from_guard.filter(|_| self.rooms.contains(&from));
        Ok((to_guard, from_guard))
    }

    // ── Drivers ──────────────────────────────────────────────

    pub async fn register_driver(&self, draft: DriverDraft) -> Result<Driver, EngineError> {
        if draft.name.trim().is_empty() {
            return Err(EngineError::Invalid("name is required"));
        }
        if draft.name.len() > MAX_DRIVER_NAME_LEN {
            return Err(EngineError::LimitExceeded("driver name too long"));
        }
        if self.drivers.len() >= MAX_DRIVERS {
            return Err(EngineError::LimitExceeded("too many drivers"));
        }
        let _gate = self.commit_gate.read().await;

        let driver = Driver {
            id: self.drivers.allocate_id(),
            name: draft.name,
        };
        self.wal_append(&Event::DriverRegistered { driver: driver.clone() })
            .await?;
        self.drivers.insert(driver.id, driver.clone());
        info!(driver_id = driver.id, "driver registered");
        Ok(driver)
    }

    // ── Bookings ─────────────────────────────────────────────

    /// Resolve room and driver, reserve one unit on the room, store the
    /// booking. Reservation and booking row commit as one WAL record.
    pub async fn create_booking(&self, draft: BookingDraft) -> Result<BookingView, EngineError> {
        if self.bookings.len() >= MAX_BOOKINGS {
            return Err(EngineError::LimitExceeded("too many bookings"));
        }
        let _gate = self.commit_gate.read().await;
        let mut guard = self.lock_room(draft.room_id).await?;
        let driver = self
            .drivers
            .get(&draft.driver_id)
            .ok_or(EngineError::NotFound(Entity::Driver, draft.driver_id))?;

        let mut room = guard.clone();
        try_reserve(&mut room).map_err(reject_full)?;

        let now = now_ms();
        let booking = Booking {
            id: self.bookings.allocate_id(),
            room_id: room.id,
            driver_id: Some(driver.id),
            status: draft.status,
            created_at: now,
            updated_at: now,
        };
        self.wal_append(&Event::BookingCreated { booking: booking.clone() })
            .await?;
        *guard = room.clone();
        self.bookings.insert(booking.id, booking.clone());

        metrics::counter!(observability::BOOKINGS_CREATED_TOTAL).increment(1);
        metrics::gauge!(observability::BOOKINGS_OPEN).increment(1.0);
        info!(
            booking_id = booking.id,
            room_id = room.id,
            occupancy = room.current_bookings,
            capacity = room.capacity,
            "booking created"
        );
        Ok(BookingView::new(booking, Some(room), Some(driver)))
    }

    /// Overwrite status, room and driver. Whether occupancy follows a room
    /// change depends on the engine's [`RoomChangePolicy`].
    pub async fn update_booking(
        &self,
        id: Id,
        draft: BookingDraft,
    ) -> Result<BookingView, EngineError> {
        let _gate = self.commit_gate.read().await;
        loop {
            let current = self
                .bookings
                .get(&id)
                .ok_or(EngineError::NotFound(Entity::Booking, id))?;
            if !self.rooms.contains(&draft.room_id) {
                return Err(EngineError::NotFound(Entity::Room, draft.room_id));
            }
            let driver = self
                .drivers
                .get(&draft.driver_id)
                .ok_or(EngineError::NotFound(Entity::Driver, draft.driver_id))?;

            let from = current.room_id;
            let moving =
                self.room_change == RoomChangePolicy::MoveOccupancy && from != draft.room_id;
            let updated = Booking {
                room_id: draft.room_id,
                driver_id: Some(driver.id),
                status: draft.status,
                updated_at: now_ms(),
                ..current
            };
            if !moving {
                return self.overwrite_booking(updated, driver).await;
            }
            if let Some(view) = self.move_booking(from, updated, driver).await? {
                return Ok(view);
            }
            // The booking changed rooms while we waited for the locks.
        }
    }

    async fn overwrite_booking(
        &self,
        updated: Booking,
        driver: Driver,
    ) -> Result<BookingView, EngineError> {
        let event = Event::BookingUpdated {
            booking: updated.clone(),
            released_from: None,
            reserved_on: None,
        };
        self.wal_append(&event).await?;
        if !self.bookings.replace(updated.id, updated.clone()) {
            return Err(EngineError::NotFound(Entity::Booking, updated.id));
        }
        info!(booking_id = updated.id, room_id = updated.room_id, status = updated.status.as_str(), "booking updated");
        let room = self.room_snapshot(updated.room_id).await;
        Ok(BookingView::new(updated, room, Some(driver)))
    }

    /// Returns `None` if the booking no longer sits in `from` once the locks
    /// are held; the caller retries.
    async fn move_booking(
        &self,
        from: Id,
        updated: Booking,
        driver: Driver,
    ) -> Result<Option<BookingView>, EngineError> {
        let (mut to_guard, mut from_guard) = self.lock_room_pair(updated.room_id, from).await?;
        match self.bookings.get(&updated.id) {
            None => return Err(EngineError::NotFound(Entity::Booking, updated.id)),
            Some(b) if b.room_id != from => return Ok(None),
            Some(_) => {}
        }

        let mut to_room = to_guard.clone();
        try_reserve(&mut to_room).map_err(reject_full)?;
        let from_room = from_guard.as_ref().map(|g| {
            let mut room = Room::clone(g);
            release(&mut room);
            room
        });

        let event = Event::BookingUpdated {
            booking: updated.clone(),
            released_from: from_room.as_ref().map(|r| r.id),
            reserved_on: Some(to_room.id),
        };
        self.wal_append(&event).await?;
        *to_guard = to_room.clone();
        if let (Some(guard), Some(room)) = (from_guard.as_mut(), from_room) {
            **guard = room;
        }
        self.bookings.replace(updated.id, updated.clone());

        info!(
            booking_id = updated.id,
            from_room = from,
            to_room = to_room.id,
            "booking moved"
        );
        Ok(Some(BookingView::new(updated, Some(to_room), Some(driver))))
    }

    /// Release the booking's unit on its room (skipped if the room is gone)
    /// and delete the row, committed as one WAL record.
    pub async fn delete_booking(&self, id: Id) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        loop {
            let booking = self
                .bookings
                .get(&id)
                .ok_or(EngineError::NotFound(Entity::Booking, id))?;
            let room_guard = match self.rooms.get(&booking.room_id) {
                Some(room) => {
                    let guard = room.write_owned().await;
                    self.rooms.contains(&booking.room_id).then_some(guard)
                }
                None => None,
            };
            match self.bookings.get(&id) {
                None => return Err(EngineError::NotFound(Entity::Booking, id)),
                Some(b) if b.room_id != booking.room_id => continue,
                Some(_) => {}
            }

            self.wal_append(&Event::BookingDeleted {
                id,
                room_id: booking.room_id,
            })
            .await?;
            let occupancy = room_guard.map(|mut guard| {
                release(&mut guard);
                guard.current_bookings
            });
            if self.bookings.remove(&id).is_none() {
                return Err(EngineError::NotFound(Entity::Booking, id));
            }

            metrics::counter!(observability::BOOKINGS_DELETED_TOTAL).increment(1);
            metrics::gauge!(observability::BOOKINGS_OPEN).decrement(1.0);
            match occupancy {
                Some(occupancy) => {
                    info!(booking_id = id, room_id = booking.room_id, occupancy, "booking deleted")
                }
                None => info!(
                    booking_id = id,
                    room_id = booking.room_id,
                    "booking deleted, room already gone"
                ),
            }
            return Ok(());
        }
    }
}
