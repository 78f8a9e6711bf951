use std::fmt;

use crate::model::Id;

/// Which table a lookup missed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Room,
    Driver,
    Booking,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Entity::Room => "room",
            Entity::Driver => "driver",
            Entity::Booking => "booking",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{0} not found: {1}")]
    NotFound(Entity, Id),
    #[error("room {room_id} is full: capacity {capacity} exceeded")]
    CapacityExceeded { room_id: Id, capacity: u8 },
    #[error("room {room_id} holds {current_bookings} bookings, capacity {capacity} is too small")]
    CapacityBelowOccupancy {
        room_id: Id,
        capacity: u8,
        current_bookings: u8,
    },
    #[error("invalid input: {0}")]
    Invalid(&'static str),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}
