mod error;
mod ledger;
mod mutations;
mod queries;
mod store;
#[cfg(test)]
mod tests;

pub use error::{EngineError, Entity};
pub use ledger::{release, try_reserve};
pub use store::{RowState, Table};

use std::io;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::info;

use crate::model::*;
use crate::observability;
use crate::wal::Wal;

pub type SharedRoom = Arc<RwLock<Room>>;

/// What happens to occupancy when an update moves a booking to another room.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RoomChangePolicy {
    /// Neither room's counter changes.
    #[default]
    KeepOccupancy,
    /// One unit moves from the old room to the new one; a full new room
    /// rejects the update.
    MoveOccupancy,
}

// ── Group-commit WAL channel ─────────────────────────────

type Pending = (Event, oneshot::Sender<io::Result<()>>);

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Control(Control),
}

pub(super) enum Control {
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
    Close {
        response: oneshot::Sender<io::Result<()>>,
    },
}

/// Sole owner of the WAL. Appends that queue up while a flush is running are
/// committed together by the next fsync. Returns after `Close`.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut batch: Vec<Pending> = Vec::new();
    while let Some(cmd) = rx.recv().await {
        let mut next = Some(cmd);
        while let Some(cmd) = next.take() {
            match cmd {
                WalCommand::Append { event, response } => {
                    batch.push((event, response));
                    next = rx.try_recv().ok();
                }
                WalCommand::Control(control) => {
                    commit_batch(&mut wal, &mut batch);
                    if !handle_control(&mut wal, control) {
                        return;
                    }
                }
            }
        }
        commit_batch(&mut wal, &mut batch);
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<Pending>) {
    if batch.is_empty() {
        return;
    }
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    // A failed batch is rolled back whole before the callers are answered.
    let result = wal.append_batch(batch.iter().map(|(event, _)| event));

    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let _ = tx.send(match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        });
    }
}

/// Returns false once the writer should stop.
fn handle_control(wal: &mut Wal, control: Control) -> bool {
    match control {
        Control::Compact { events, response } => {
            let result =
                Wal::write_snapshot(wal.path(), &events).and_then(|()| wal.install_snapshot());
            if result.is_ok() {
                metrics::counter!(observability::WAL_COMPACTIONS_TOTAL).increment(1);
            }
            let _ = response.send(result);
            true
        }
        Control::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
            true
        }
        Control::Close { response } => {
            let _ = response.send(wal.flush_sync());
            false
        }
    }
}

/// The booking store: rooms with their occupancy ledger, drivers, bookings.
///
/// Every ledger mutation holds the room's write lock from the capacity check
/// until the WAL record is durable and applied, so concurrent creates on one
/// room are serialized.
pub struct Engine {
    pub(super) rooms: Table<SharedRoom>,
    pub(super) drivers: Table<Driver>,
    pub(super) bookings: Table<Booking>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Mutations hold this shared, compaction exclusively, so a snapshot never
    /// misses a record committed while it was being taken. Always taken
    /// before any room lock.
    pub(super) commit_gate: RwLock<()>,
    pub(super) room_change: RoomChangePolicy,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start its writer task.
    pub fn open(wal_path: &Path, room_change: RoomChangePolicy) -> io::Result<Self> {
        let (wal, events) = Wal::recover(wal_path)?;
        let state = RowState::replay(&events);
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: Table::from_rows(
                state
                    .rooms
                    .into_iter()
                    .map(|(id, room)| (id, Arc::new(RwLock::new(room)))),
                state.next_room,
            ),
            drivers: Table::from_rows(state.drivers, state.next_driver),
            bookings: Table::from_rows(state.bookings, state.next_booking),
            wal_tx,
            commit_gate: RwLock::new(()),
            room_change,
        };
        metrics::gauge!(observability::BOOKINGS_OPEN).set(engine.bookings.len() as f64);
        info!(
            records = events.len(),
            rooms = engine.rooms.len(),
            drivers = engine.drivers.len(),
            bookings = engine.bookings.len(),
            "store opened from {}",
            wal_path.display()
        );
        Ok(engine)
    }

    pub fn room_change_policy(&self) -> RoomChangePolicy {
        self.room_change
    }

    async fn send_wal(&self, cmd: WalCommand) -> Result<(), EngineError> {
        self.wal_tx
            .send(cmd)
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))
    }

    /// Append through the group-commit writer; returns once durable.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send_wal(WalCommand::Append {
            event: event.clone(),
            response: tx,
        })
        .await?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Rewrite the WAL as a snapshot of the current rows.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;

        let mut events = vec![Event::SequencesRestored {
            next_room: self.rooms.next_id(),
            next_driver: self.drivers.next_id(),
            next_booking: self.bookings.next_id(),
        }];
        for room in self.rooms.all() {
            let room = room.read().await.clone();
            events.push(Event::RoomRestored { room });
        }
        events.extend(
            self.drivers
                .all()
                .into_iter()
                .map(|driver| Event::DriverRegistered { driver }),
        );
        events.extend(
            self.bookings
                .all()
                .into_iter()
                .map(|booking| Event::BookingRestored { booking }),
        );

        let (tx, rx) = oneshot::channel();
        self.send_wal(WalCommand::Control(Control::Compact { events, response: tx }))
            .await?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .send_wal(WalCommand::Control(Control::AppendsSinceCompact { response: tx }))
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Flush and stop the WAL writer. Later mutations fail with `WalError`.
    pub async fn close(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;
        let (tx, rx) = oneshot::channel();
        self.send_wal(WalCommand::Control(Control::Close { response: tx }))
            .await?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!("store closed");
        Ok(())
    }
}
