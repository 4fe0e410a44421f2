use std::collections::VecDeque;

use chrono::Local;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::model::*;

use super::conflict::{Resolution, is_expired, resolve};
use super::{Engine, EngineError};

/// A reversible booking operation as recorded in the undo log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Reserve {
        room: String,
        reservation: Reservation,
        /// Where the booking was stored when it was made.
        index: usize,
        /// Ids the booking overrode.
        displaced: Vec<Ulid>,
    },
    Cancel {
        room: String,
        reservation: Reservation,
        index: usize,
    },
}

impl Command {
    pub fn room(&self) -> &str {
        match self {
            Command::Reserve { room, .. } | Command::Cancel { room, .. } => room,
        }
    }

    pub fn reservation(&self) -> &Reservation {
        match self {
            Command::Reserve { reservation, .. } | Command::Cancel { reservation, .. } => {
                reservation
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Command::Reserve { .. } => "reserve",
            Command::Cancel { .. } => "cancel",
        }
    }
}

pub(crate) struct History {
    undo: VecDeque<Command>,
    redo: Vec<Command>,
    limit: Option<usize>,
}

impl History {
    pub(crate) fn new(limit: Option<usize>) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: Vec::new(),
            limit,
        }
    }

    /// A fresh command invalidates everything that could be redone.
    fn record(&mut self, cmd: Command) {
        self.redo.clear();
        self.push_undo(cmd);
    }

    fn push_undo(&mut self, cmd: Command) {
        self.undo.push_back(cmd);
        if let Some(limit) = self.limit {
            while self.undo.len() > limit {
                if let Some(evicted) = self.undo.pop_front() {
                    warn!(
                        kind = evicted.kind(),
                        room = evicted.room(),
                        id = %evicted.reservation().id,
                        limit,
                        "undo history full, oldest command evicted"
                    );
                }
            }
        }
    }
}

/// A command whose target vanished or has ended can never be replayed.
fn is_stale(e: &EngineError) -> bool {
    matches!(
        e,
        EngineError::RoomNotFound(_)
            | EngineError::ReservationNotFound(_)
            | EngineError::ReservationExpired(_)
    )
}

impl Engine {
    /// Reserve and record the booking for undo. The log is locked only to
    /// record, so bookings in different rooms never wait on each other.
    pub async fn book(&self, room: &str, request: ReservationRequest) -> Result<Booked, EngineError> {
        let (booked, reservation) = self.reserve_inner(room, request).await?;
        self.history.lock().await.record(Command::Reserve {
            room: room.to_string(),
            reservation,
            index: booked.index,
            displaced: booked.displaced.iter().map(|r| r.id).collect(),
        });
        Ok(booked)
    }

    /// Soft-delete and record the cancellation for undo. Cancelling an
    /// already inactive reservation changes nothing and records nothing.
    pub async fn cancel(&self, room: &str, target: ReservationRef) -> Result<Reservation, EngineError> {
        let (index, reservation, changed) = self.delete_inner(room, target, DeleteMode::Soft).await?;
        if changed {
            self.history.lock().await.record(Command::Cancel {
                room: room.to_string(),
                reservation: reservation.clone(),
                index,
            });
        }
        Ok(reservation)
    }

    /// Revert the newest command. `Ok(None)` when there is nothing to undo.
    pub async fn undo(&self) -> Result<Option<Command>, EngineError> {
        let mut history = self.history.lock().await;
        let Some(cmd) = history.undo.pop_back() else {
            return Ok(None);
        };
        match self.revert(&cmd).await {
            Ok(()) => {
                info!(kind = cmd.kind(), room = cmd.room(), "undone");
                history.redo.push(cmd.clone());
                Ok(Some(cmd))
            }
            Err(e) if is_stale(&e) => {
                warn!(kind = cmd.kind(), room = cmd.room(), "undo dropped stale command: {e}");
                Err(e)
            }
            Err(e) => {
                history.undo.push_back(cmd);
                Err(e)
            }
        }
    }

    /// Re-apply the newest undone command. `Ok(None)` when there is nothing to redo.
    pub async fn redo(&self) -> Result<Option<Command>, EngineError> {
        let mut history = self.history.lock().await;
        let Some(cmd) = history.redo.pop() else {
            return Ok(None);
        };
        match self.reapply(&cmd).await {
            Ok(cmd) => {
                info!(kind = cmd.kind(), room = cmd.room(), "redone");
                history.push_undo(cmd.clone());
                Ok(Some(cmd))
            }
            Err(e) if is_stale(&e) => {
                warn!(kind = cmd.kind(), room = cmd.room(), "redo dropped stale command: {e}");
                Err(e)
            }
            Err(e) => {
                history.redo.push(cmd);
                Err(e)
            }
        }
    }

    /// `(undo, redo)` stack depths.
    pub async fn history_depth(&self) -> (usize, usize) {
        let history = self.history.lock().await;
        (history.undo.len(), history.redo.len())
    }

    async fn revert(&self, cmd: &Command) -> Result<(), EngineError> {
        match cmd {
            Command::Reserve {
                room,
                reservation,
                displaced,
                ..
            } => {
                self.revert_booking(room, reservation.id, displaced).await?;
                Ok(())
            }
            Command::Cancel { room, reservation, .. } => {
                self.reactivate(room, reservation.id, true).await?;
                Ok(())
            }
        }
    }

    async fn reapply(&self, cmd: &Command) -> Result<Command, EngineError> {
        match cmd {
            Command::Reserve {
                room,
                reservation,
                index,
                ..
            } => {
                let displaced = self.reactivate(room, reservation.id, true).await?;
                Ok(Command::Reserve {
                    room: room.clone(),
                    reservation: reservation.clone(),
                    index: *index,
                    displaced: displaced.iter().map(|r| r.id).collect(),
                })
            }
            Command::Cancel { room, reservation, .. } => {
                let (index, reservation, _) = self
                    .delete_inner(room, ReservationRef::Id(reservation.id), DeleteMode::Soft)
                    .await?;
                Ok(Command::Cancel {
                    room: room.clone(),
                    reservation,
                    index,
                })
            }
        }
    }

    /// Deactivate a booking, then bring back each displaced reservation that
    /// has not ended and no longer conflicts with anything. One lock, one
    /// snapshot write. Returns the ids brought back.
    async fn revert_booking(
        &self,
        room: &str,
        id: Ulid,
        displaced: &[Ulid],
    ) -> Result<Vec<Ulid>, EngineError> {
        let mut guard = self.lock_room(room).await?;
        let idx = guard
            .position(id)
            .ok_or(EngineError::ReservationNotFound(ReservationRef::Id(id)))?;
        let was_active = guard.reservations[idx].active;
        guard.reservations[idx].active = false;

        let now = Local::now().naive_local();
        let mut restored = Vec::new();
        for &other in displaced {
            let Some(pos) = guard.position(other) else {
                debug!(room, id = %other, "displaced reservation gone, not restored");
                continue;
            };
            if guard.reservations[pos].active {
                continue;
            }
            if is_expired(&guard.reservations[pos], now) {
                debug!(room, id = %other, "displaced reservation has ended, not restored");
                continue;
            }
            let candidate = guard.reservations[pos].clone();
            match resolve(&guard.reservations, &candidate) {
                Resolution::Accept => {
                    guard.reservations[pos].active = true;
                    restored.push(other);
                }
                _ => debug!(room, id = %other, "displaced reservation still conflicts, not restored"),
            }
        }
        self.persist_room(&guard).await;
        drop(guard);

        if was_active {
            self.publish(Notice::Cancelled {
                room: room.to_string(),
                id,
            });
        }
        for &r in &restored {
            self.publish(Notice::Restored {
                room: room.to_string(),
                id: r,
            });
        }
        Ok(restored)
    }
}
