//! Room occupancy ledger.
//!
//! Both primitives act on a room the caller holds exclusively. Callers work
//! on a copy, persist the outcome, then publish the copy, so a rejected or
//! unpersisted reservation never shows up in the live room.

use crate::model::Room;

use super::EngineError;

/// Take one unit of occupancy, or fail if the room is already at capacity.
pub fn try_reserve(room: &mut Room) -> Result<(), EngineError> {
    if room.is_full() {
        return Err(EngineError::CapacityExceeded {
            room_id: room.id,
            capacity: room.capacity,
        });
    }
    room.current_bookings += 1;
    Ok(())
}

/// Give back one unit of occupancy. Floors at zero and never fails.
pub fn release(room: &mut Room) {
    room.current_bookings = room.current_bookings.saturating_sub(1);
}
