use serde::{Deserialize, Serialize};

/// Surrogate row id, allocated from a per-table sequence.
pub type Id = u64;

/// Unix milliseconds.
pub type Ms = i64;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    #[serde(rename = "in-progress")]
    InProgress,
    #[serde(rename = "completed")]
    Completed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::InProgress => "in-progress",
            BookingStatus::Completed => "completed",
        }
    }
}

/// A room and its occupancy ledger.
///
/// `current_bookings` is only ever changed through [`crate::engine::try_reserve`]
/// and [`crate::engine::release`]; clients cannot write it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Id,
    pub room_name: String,
    pub capacity: u8,
    pub current_bookings: u8,
    pub trainer_id: Id,
    pub detail: String,
}

impl Room {
    pub fn is_full(&self) -> bool {
        self.current_bookings >= self.capacity
    }

    pub fn vacancies(&self) -> u8 {
        self.capacity.saturating_sub(self.current_bookings)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Driver {
    pub id: Id,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Id,
    pub room_id: Id,
    pub driver_id: Option<Id>,
    pub status: BookingStatus,
    pub created_at: Ms,
    pub updated_at: Ms,
}

// ── Client input ─────────────────────────────────────────────────

/// Writable room fields, used for both create and full-overwrite update.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoomDraft {
    pub room_name: String,
    pub capacity: u8,
    pub trainer_id: Id,
    #[serde(default)]
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DriverDraft {
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BookingDraft {
    pub room_id: Id,
    pub driver_id: Id,
    pub status: BookingStatus,
}

// ── WAL records ──────────────────────────────────────────────────

/// One WAL record. Every booking mutation carries its ledger effect in the
/// same record, so a replayed log can never hold a reservation without its
/// booking or the other way round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        room: Room,
    },
    RoomUpdated {
        id: Id,
        room_name: String,
        capacity: u8,
        trainer_id: Id,
        detail: String,
    },
    RoomDeleted {
        id: Id,
    },
    DriverRegistered {
        driver: Driver,
    },
    /// Reserves one unit on `booking.room_id`.
    BookingCreated {
        booking: Booking,
    },
    /// Overwrites the booking; `released_from`/`reserved_on` are set only
    /// when occupancy moved with a room change.
    BookingUpdated {
        booking: Booking,
        released_from: Option<Id>,
        reserved_on: Option<Id>,
    },
    /// Releases one unit on `room_id` if that room still exists.
    BookingDeleted {
        id: Id,
        room_id: Id,
    },
    // Compaction snapshot records: restore state verbatim, no ledger effect.
    RoomRestored {
        room: Room,
    },
    BookingRestored {
        booking: Booking,
    },
    SequencesRestored {
        next_room: Id,
        next_driver: Id,
        next_booking: Id,
    },
}

// ── Query result types ───────────────────────────────────────────

/// A booking with its room and driver resolved for response shaping.
/// Either side is `None` when the referenced row no longer exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingView {
    pub id: Id,
    pub room_id: Id,
    pub room: Option<Room>,
    pub driver_id: Option<Id>,
    pub driver: Option<Driver>,
    pub status: BookingStatus,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl BookingView {
    pub fn new(booking: Booking, room: Option<Room>, driver: Option<Driver>) -> Self {
        Self {
            id: booking.id,
            room_id: booking.room_id,
            room,
            driver_id: booking.driver_id,
            driver,
            status: booking.status,
            created_at: booking.created_at,
            updated_at: booking.updated_at,
        }
    }
}
