use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::warn;

use crate::model::*;

use super::ledger::{release, try_reserve};

/// Rows keyed by surrogate id, plus the sequence that hands out new ids.
/// Ids are never reused, even after a delete.
pub struct Table<T> {
    rows: DashMap<Id, T>,
    next_id: AtomicU64,
}

impl<T: Clone> Default for Table<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Table<T> {
    pub fn new() -> Self {
        Self::from_rows(Vec::new(), 1)
    }

    pub fn from_rows(rows: impl IntoIterator<Item = (Id, T)>, next_id: Id) -> Self {
        Self {
            rows: rows.into_iter().collect(),
            next_id: AtomicU64::new(next_id.max(1)),
        }
    }

    pub fn allocate_id(&self) -> Id {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// The id the next `allocate_id` would return.
    pub fn next_id(&self) -> Id {
        self.next_id.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.rows.contains_key(id)
    }

    pub fn get(&self, id: &Id) -> Option<T> {
        self.rows.get(id).map(|e| e.value().clone())
    }

    /// All rows in ascending id order.
    pub fn all(&self) -> Vec<T> {
        let mut rows: Vec<(Id, T)> = self
            .rows
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        rows.sort_by_key(|(id, _)| *id);
        rows.into_iter().map(|(_, row)| row).collect()
    }

    pub fn insert(&self, id: Id, row: T) {
        self.rows.insert(id, row);
    }

    /// Full overwrite of an existing row. Returns false if the row is gone.
    pub fn replace(&self, id: Id, row: T) -> bool {
        match self.rows.get_mut(&id) {
            Some(mut entry) => {
                *entry = row;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: &Id) -> Option<T> {
        self.rows.remove(id).map(|(_, row)| row)
    }
}

/// Plain row state rebuilt from the WAL before the engine goes live.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RowState {
    pub rooms: BTreeMap<Id, Room>,
    pub drivers: BTreeMap<Id, Driver>,
    pub bookings: BTreeMap<Id, Booking>,
    pub next_room: Id,
    pub next_driver: Id,
    pub next_booking: Id,
}

fn bump(next: &mut Id, seen: Id) {
    *next = (*next).max(seen + 1);
}

impl RowState {
    pub fn replay(events: &[Event]) -> Self {
        let mut state = Self {
            next_room: 1,
            next_driver: 1,
            next_booking: 1,
            ..Self::default()
        };
        for event in events {
            state.apply(event);
        }
        state
    }

    fn reserve_on(&mut self, room_id: Id, booking_id: Id) {
        if let Some(room) = self.rooms.get_mut(&room_id)
            && let Err(e) = try_reserve(room)
        {
            warn!(booking_id, "replay: {e}");
        }
    }

    fn release_on(&mut self, room_id: Id) {
        if let Some(room) = self.rooms.get_mut(&room_id) {
            release(room);
        }
    }

    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::RoomCreated { room } | Event::RoomRestored { room } => {
                bump(&mut self.next_room, room.id);
                self.rooms.insert(room.id, room.clone());
            }
            Event::RoomUpdated {
                id,
                room_name,
                capacity,
                trainer_id,
                detail,
            } => {
                if let Some(room) = self.rooms.get_mut(id) {
                    room.room_name = room_name.clone();
                    room.capacity = *capacity;
                    room.trainer_id = *trainer_id;
                    room.detail = detail.clone();
                }
            }
            Event::RoomDeleted { id } => {
                self.rooms.remove(id);
            }
            Event::DriverRegistered { driver } => {
                bump(&mut self.next_driver, driver.id);
                self.drivers.insert(driver.id, driver.clone());
            }
            Event::BookingCreated { booking } => {
                bump(&mut self.next_booking, booking.id);
                self.reserve_on(booking.room_id, booking.id);
                self.bookings.insert(booking.id, booking.clone());
            }
            Event::BookingUpdated {
                booking,
                released_from,
                reserved_on,
            } => {
                // An update that lost a race with a delete is recorded but has no effect.
                if !self.bookings.contains_key(&booking.id) {
                    return;
                }
                if let Some(room_id) = released_from {
                    self.release_on(*room_id);
                }
                if let Some(room_id) = reserved_on {
                    self.reserve_on(*room_id, booking.id);
                }
                self.bookings.insert(booking.id, booking.clone());
            }
            Event::BookingDeleted { id, room_id } => {
                if self.bookings.remove(id).is_some() {
                    self.release_on(*room_id);
                }
            }
            Event::BookingRestored { booking } => {
                bump(&mut self.next_booking, booking.id);
                self.bookings.insert(booking.id, booking.clone());
            }
            Event::SequencesRestored {
                next_room,
                next_driver,
                next_booking,
            } => {
                self.next_room = self.next_room.max(*next_room);
                self.next_driver = self.next_driver.max(*next_driver);
                self.next_booking = self.next_booking.max(*next_booking);
            }
        }
    }
}
