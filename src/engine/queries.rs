use tracing::debug;

use crate::model::*;

use super::{Engine, EngineError, Entity};

impl Engine {
    /// Current copy of a room, or `None` if it does not exist.
    pub(super) async fn room_snapshot(&self, id: Id) -> Option<Room> {
        let room = self.rooms.get(&id)?;
        let guard = room.read().await;
        Some(guard.clone())
    }

    pub async fn get_room(&self, id: Id) -> Result<Room, EngineError> {
        self.room_snapshot(id)
            .await
            .ok_or(EngineError::NotFound(Entity::Room, id))
    }

    pub async fn list_rooms(&self) -> Vec<Room> {
        let mut rooms = Vec::with_capacity(self.rooms.len());
        for room in self.rooms.all() {
            rooms.push(room.read().await.clone());
        }
        rooms
    }

    pub fn get_driver(&self, id: Id) -> Result<Driver, EngineError> {
        self.drivers
            .get(&id)
            .ok_or(EngineError::NotFound(Entity::Driver, id))
    }

    pub fn list_drivers(&self) -> Vec<Driver> {
        self.drivers.all()
    }

    /// Eagerly resolve the booking's room and driver.
    async fn resolve(&self, booking: Booking) -> BookingView {
        let room = self.room_snapshot(booking.room_id).await;
        let driver = booking.driver_id.and_then(|id| self.drivers.get(&id));
        BookingView::new(booking, room, driver)
    }

    pub async fn get_booking(&self, id: Id) -> Result<BookingView, EngineError> {
        let booking = self
            .bookings
            .get(&id)
            .ok_or(EngineError::NotFound(Entity::Booking, id))?;
        Ok(self.resolve(booking).await)
    }

    /// Every booking in id order.
    pub async fn list_bookings(&self) -> Vec<BookingView> {
        let bookings = self.bookings.all();
        debug!(count = bookings.len(), "listing bookings");
        let mut views = Vec::with_capacity(bookings.len());
        for booking in bookings {
            views.push(self.resolve(booking).await);
        }
        views
    }

    pub fn booking_count(&self) -> usize {
        self.bookings.len()
    }

    /// Bookings currently referencing `room_id`.
    pub fn bookings_in_room(&self, room_id: Id) -> usize {
        self.bookings
            .all()
            .iter()
            .filter(|b| b.room_id == room_id)
            .count()
    }
}
