mod conflict;
mod error;
mod history;
mod mutations;
mod queries;
mod store;

pub use error::EngineError;
pub use history::Command;
pub use store::{RoomRegistry, SharedRoom};

use std::io;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedRwLockWriteGuard};
use tracing::{info, warn};

use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability;
use crate::persist::Persister;
use crate::snapshot::SnapshotStore;
use crate::users::UserRegistry;

use history::History;

/// Startup knobs for [`Engine::open`].
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Rooms created when no room snapshot exists yet.
    pub seed_rooms: Vec<String>,
    /// Undo depth; `None` keeps every command.
    pub history_limit: Option<usize>,
}

pub struct Engine {
    pub(super) rooms: RoomRegistry,
    pub(super) persister: Persister,
    pub notify: Arc<NotifyHub>,
    pub users: UserRegistry,
    /// Held across undo/redo replay, so always locked before a room lock.
    pub(super) history: Mutex<History>,
}

impl Engine {
    /// Load both snapshots and start the background writer.
    ///
    /// A missing room snapshot seeds `options.seed_rooms` and writes it. An
    /// unreadable or corrupt snapshot is an error; nothing gets overwritten.
    pub async fn open(
        store: Arc<dyn SnapshotStore>,
        notify: Arc<NotifyHub>,
        options: Options,
    ) -> io::Result<Self> {
        let loaded = store.load_rooms().await?;
        let seeded = loaded.is_none();
        let records = loaded.unwrap_or_else(|| {
            options
                .seed_rooms
                .iter()
                .map(RoomRecord::empty)
                .collect()
        });

        let rooms = RoomRegistry::new();
        let mut kept = Vec::with_capacity(records.len());
        for record in records {
            if rooms.contains_room(&record.name) {
                warn!(room = %record.name, "duplicate room in snapshot, keeping the first");
                continue;
            }
            audit_loaded(&record);
            rooms.insert_room(RoomState::from_record(record.clone()));
            kept.push(record);
        }

        if seeded {
            match store.save_rooms(&kept).await {
                Ok(()) => info!(rooms = kept.len(), "seeded room snapshot"),
                Err(e) => {
                    metrics::counter!(observability::PERSIST_FAILURES_TOTAL).increment(1);
                    warn!("seeded room snapshot not written: {e}");
                }
            }
        }

        let users = store.load_users().await?.unwrap_or_default();
        let user_count = users.len();
        let persister = Persister::spawn(store, kept);
        metrics::gauge!(observability::ROOMS_ACTIVE).set(rooms.room_count() as f64);
        info!(rooms = rooms.room_count(), users = user_count, "engine opened");

        Ok(Self {
            rooms,
            users: UserRegistry::new(users, persister.clone()),
            persister,
            notify,
            history: Mutex::new(History::new(options.history_limit)),
        })
    }

    pub fn get_room(&self, name: &str) -> Result<SharedRoom, EngineError> {
        self.rooms
            .get_room(name)
            .ok_or_else(|| EngineError::RoomNotFound(name.to_string()))
    }

    /// Write-lock a room. Fails with `RoomNotFound` if the room was removed
    /// while this call waited for the lock.
    pub(super) async fn lock_room(
        &self,
        name: &str,
    ) -> Result<OwnedRwLockWriteGuard<RoomState>, EngineError> {
        let shared = self.get_room(name)?;
        let guard = shared.clone().write_owned().await;
        if !self.rooms.is_current(name, &shared) {
            return Err(EngineError::RoomNotFound(name.to_string()));
        }
        Ok(guard)
    }

    pub fn room_for_reservation(&self, id: &ulid::Ulid) -> Option<String> {
        self.rooms.room_for_reservation(id)
    }

    /// Write the room's new state while the caller still holds its lock.
    /// Best-effort: a failed write is logged and counted, memory stays authoritative.
    pub(super) async fn persist_room(&self, rs: &RoomState) {
        if let Err(e) = self.persister.save_room(rs.record()).await {
            metrics::counter!(observability::PERSIST_FAILURES_TOTAL).increment(1);
            warn!(room = %rs.name, "room snapshot not saved, in-memory state stays authoritative: {e}");
        }
    }

    pub(super) fn publish(&self, notice: Notice) {
        self.notify.send(&notice);
    }
}

/// Loaded data is kept as-is; reversed ranges and overlapping active
/// bookings are only reported.
fn audit_loaded(record: &RoomRecord) {
    for r in &record.reservations {
        if r.range.start >= r.range.end || r.range.end > MINUTES_PER_DAY {
            warn!(room = %record.name, id = %r.id, range = %r.range, "snapshot reservation has an invalid range");
        }
    }
    for (a, b) in conflict::overlapping_pairs(&record.reservations) {
        let (a, b) = (&record.reservations[a], &record.reservations[b]);
        warn!(
            room = %record.name,
            date = %a.date,
            first = %a.id,
            second = %b.id,
            "snapshot holds overlapping active reservations"
        );
    }
}
