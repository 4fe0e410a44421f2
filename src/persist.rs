use std::io;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::engine::EngineError;
use crate::model::RoomRecord;
use crate::observability;
use crate::snapshot::SnapshotStore;
use crate::users::User;

// ── Group-commit snapshot channel ─────────────────────────────

enum PersistCommand {
    SaveRoom {
        record: RoomRecord,
        response: oneshot::Sender<io::Result<()>>,
    },
    DropRoom {
        name: String,
        response: oneshot::Sender<io::Result<()>>,
    },
    SaveUsers {
        users: Vec<User>,
        response: oneshot::Sender<io::Result<()>>,
    },
}

/// Handle to the background snapshot writer.
///
/// Callers send the new state of one room while still holding that room's
/// lock and wait for the write; the writer keeps the latest record of every
/// room and rewrites the full room snapshot once per batch.
#[derive(Clone)]
pub struct Persister {
    tx: mpsc::Sender<PersistCommand>,
}

impl Persister {
    /// Spawn the writer task. `rooms` is the snapshot as loaded at startup.
    pub fn spawn(store: Arc<dyn SnapshotStore>, rooms: Vec<RoomRecord>) -> Self {
        let (tx, rx) = mpsc::channel(1024);
        tokio::spawn(writer_loop(store, rooms, rx));
        Self { tx }
    }

    pub async fn save_room(&self, record: RoomRecord) -> Result<(), EngineError> {
        self.request(|response| PersistCommand::SaveRoom { record, response })
            .await
    }

    pub async fn drop_room(&self, name: String) -> Result<(), EngineError> {
        self.request(|response| PersistCommand::DropRoom { name, response })
            .await
    }

    pub async fn save_users(&self, users: Vec<User>) -> Result<(), EngineError> {
        self.request(|response| PersistCommand::SaveUsers { users, response })
            .await
    }

    async fn request(
        &self,
        build: impl FnOnce(oneshot::Sender<io::Result<()>>) -> PersistCommand,
    ) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(build(tx))
            .await
            .map_err(|_| EngineError::PersistenceFailure("snapshot writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::PersistenceFailure("snapshot writer dropped response".into()))?
            .map_err(|e| EngineError::PersistenceFailure(e.to_string()))
    }
}

/// 1. Block until the first command arrives.
/// 2. Drain everything immediately available (the batch window).
/// 3. Fold room updates into the cached snapshot; keep only the newest user list.
/// 4. One write per snapshot kind touched, then answer every sender.
async fn writer_loop(
    store: Arc<dyn SnapshotStore>,
    mut rooms: Vec<RoomRecord>,
    mut rx: mpsc::Receiver<PersistCommand>,
) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while let Ok(cmd) = rx.try_recv() {
            batch.push(cmd);
        }

        let mut rooms_dirty = false;
        let mut latest_users: Option<Vec<User>> = None;
        let mut room_waiters = Vec::new();
        let mut user_waiters = Vec::new();

        for cmd in batch {
            match cmd {
                PersistCommand::SaveRoom { record, response } => {
                    match rooms.iter_mut().find(|r| r.name == record.name) {
                        Some(slot) => *slot = record,
                        None => rooms.push(record),
                    }
                    rooms_dirty = true;
                    room_waiters.push(response);
                }
                PersistCommand::DropRoom { name, response } => {
                    rooms.retain(|r| r.name != name);
                    rooms_dirty = true;
                    room_waiters.push(response);
                }
                PersistCommand::SaveUsers { users, response } => {
                    latest_users = Some(users);
                    user_waiters.push(response);
                }
            }
        }

        metrics::histogram!(observability::PERSIST_BATCH_SIZE)
            .record((room_waiters.len() + user_waiters.len()) as f64);

        if rooms_dirty {
            let start = Instant::now();
            let result = store.save_rooms(&rooms).await;
            metrics::histogram!(observability::PERSIST_DURATION_SECONDS)
                .record(start.elapsed().as_secs_f64());
            debug!(rooms = rooms.len(), batch = room_waiters.len(), ok = result.is_ok(), "room snapshot written");
            respond(room_waiters, &result);
        }
        if let Some(users) = latest_users {
            let result = store.save_users(&users).await;
            respond(user_waiters, &result);
        }
    }
}

fn respond(waiters: Vec<oneshot::Sender<io::Result<()>>>, result: &io::Result<()>) {
    for tx in waiters {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}
