use chrono::{Local, NaiveDate, NaiveDateTime};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{Resolution, is_expired, resolve, validate_request};
use super::{Engine, EngineError};

/// Deactivate the reservations at `indices` and return them as they were.
fn displace(rs: &mut RoomState, indices: &[usize]) -> Vec<Reservation> {
    let mut displaced = Vec::with_capacity(indices.len());
    for &idx in indices {
        displaced.push(rs.reservations[idx].clone());
        rs.reservations[idx].active = false;
    }
    displaced
}

fn locate(rs: &RoomState, target: ReservationRef) -> Result<usize, EngineError> {
    let idx = match target {
        ReservationRef::Index(i) => (i < rs.reservations.len()).then_some(i),
        ReservationRef::Id(id) => rs.position(id),
    };
    idx.ok_or(EngineError::ReservationNotFound(target))
}

impl Engine {
    // ── Rooms ────────────────────────────────────────────────

    pub async fn add_room(&self, name: &str) -> Result<(), EngineError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::InvalidInput("room name must not be empty"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("room name too long"));
        }
        if self.rooms.room_count() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        let shared = self
            .rooms
            .insert_room(RoomState::new(name.to_string()))
            .ok_or_else(|| EngineError::RoomExists(name.to_string()))?;

        let guard = shared.write().await;
        if !self.rooms.is_current(name, &shared) {
            return Err(EngineError::RoomNotFound(name.to_string()));
        }
        self.persist_room(&guard).await;
        metrics::gauge!(observability::ROOMS_ACTIVE).set(self.rooms.room_count() as f64);
        self.publish(Notice::RoomAdded {
            room: name.to_string(),
        });
        info!(room = name, "room added");
        Ok(())
    }

    /// Remove a room and every reservation it holds.
    pub async fn remove_room(&self, name: &str) -> Result<(), EngineError> {
        let shared = self.get_room(name)?;
        let guard = shared.write().await;
        if !self.rooms.remove_room(name, &shared) {
            return Err(EngineError::RoomNotFound(name.to_string()));
        }
        for r in &guard.reservations {
            self.rooms.unmap_reservation(&r.id);
        }
        if let Err(e) = self.persister.drop_room(name.to_string()).await {
            metrics::counter!(observability::PERSIST_FAILURES_TOTAL).increment(1);
            warn!(room = name, "room removal not saved, in-memory state stays authoritative: {e}");
        }
        metrics::gauge!(observability::ROOMS_ACTIVE).set(self.rooms.room_count() as f64);
        self.publish(Notice::RoomRemoved {
            room: name.to_string(),
        });
        self.notify.remove(name);
        info!(room = name, reservations = guard.reservations.len(), "room removed");
        Ok(())
    }

    // ── Reservations ─────────────────────────────────────────

    /// Check-and-insert under the room's write lock. Lower-priority overlaps
    /// are soft-deleted and reported in `Booked::displaced`.
    pub async fn reserve(
        &self,
        room: &str,
        request: ReservationRequest,
    ) -> Result<Booked, EngineError> {
        let (booked, _) = self.reserve_inner(room, request).await?;
        Ok(booked)
    }

    /// Also hands back the stored reservation.
    pub(super) async fn reserve_inner(
        &self,
        room: &str,
        request: ReservationRequest,
    ) -> Result<(Booked, Reservation), EngineError> {
        validate_request(&request)?;
        let mut guard = self.lock_room(room).await?;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many reservations in room"));
        }

        let candidate = request.into_reservation();
        let displaced = match resolve(&guard.reservations, &candidate) {
            Resolution::Reject(conflict) => {
                metrics::counter!(observability::RESERVATIONS_TOTAL, "outcome" => "rejected")
                    .increment(1);
                debug!(room, %conflict, "reservation rejected");
                return Err(EngineError::SlotUnavailable {
                    conflict,
                    date: candidate.date,
                    range: candidate.range,
                });
            }
            Resolution::Accept => Vec::new(),
            Resolution::Override(indices) => displace(&mut guard, &indices),
        };

        let id = candidate.id;
        let index = guard.reservations.len();
        guard.reservations.push(candidate.clone());
        self.rooms.map_reservation(id, room);
        self.persist_room(&guard).await;
        drop(guard);

        let outcome = if displaced.is_empty() { "accepted" } else { "overridden" };
        metrics::counter!(observability::RESERVATIONS_TOTAL, "outcome" => outcome).increment(1);
        info!(
            room,
            %id,
            date = %candidate.date,
            range = %candidate.range,
            purpose = %candidate.purpose,
            displaced = displaced.len(),
            "reservation accepted"
        );
        self.publish(Notice::Booked {
            room: room.to_string(),
            reservation: candidate.clone(),
        });
        self.announce_displaced(room, &displaced);

        let booked = Booked {
            id,
            index,
            displaced,
        };
        Ok((booked, candidate))
    }

    /// Soft delete clears the active flag; hard delete drops the entry.
    /// Returns the reservation as it now is (soft) or as it was (hard).
    pub async fn delete_reservation(
        &self,
        room: &str,
        target: ReservationRef,
        mode: DeleteMode,
    ) -> Result<Reservation, EngineError> {
        let (_, reservation, _) = self.delete_inner(room, target, mode).await?;
        Ok(reservation)
    }

    /// Returns the index, the reservation, and whether anything changed.
    pub(super) async fn delete_inner(
        &self,
        room: &str,
        target: ReservationRef,
        mode: DeleteMode,
    ) -> Result<(usize, Reservation, bool), EngineError> {
        let mut guard = self.lock_room(room).await?;
        let idx = locate(&guard, target)?;

        let (reservation, was_active) = match mode {
            DeleteMode::Soft => {
                if !guard.reservations[idx].active {
                    return Ok((idx, guard.reservations[idx].clone(), false));
                }
                guard.reservations[idx].active = false;
                (guard.reservations[idx].clone(), true)
            }
            DeleteMode::Hard => {
                let removed = guard.reservations.remove(idx);
                self.rooms.unmap_reservation(&removed.id);
                let was_active = removed.active;
                (removed, was_active)
            }
        };
        self.persist_room(&guard).await;
        drop(guard);

        info!(room, id = %reservation.id, ?mode, "reservation deleted");
        if was_active {
            self.publish(Notice::Cancelled {
                room: room.to_string(),
                id: reservation.id,
            });
        }
        Ok((idx, reservation, true))
    }

    /// Reactivate a soft-deleted reservation through the conflict resolver.
    /// A reservation whose end has passed stays down. Returns what it displaced.
    pub async fn restore_reservation(&self, room: &str, id: Ulid) -> Result<Vec<Reservation>, EngineError> {
        self.reactivate(room, id, true).await
    }

    /// With `allow_override` false, any active overlap rejects.
    pub(super) async fn reactivate(
        &self,
        room: &str,
        id: Ulid,
        allow_override: bool,
    ) -> Result<Vec<Reservation>, EngineError> {
        let mut guard = self.lock_room(room).await?;
        let idx = guard
            .position(id)
            .ok_or(EngineError::ReservationNotFound(ReservationRef::Id(id)))?;
        if guard.reservations[idx].active {
            return Ok(Vec::new());
        }
        if is_expired(&guard.reservations[idx], Local::now().naive_local()) {
            return Err(EngineError::ReservationExpired(id));
        }

        let candidate = guard.reservations[idx].clone();
        let unavailable = |conflict| EngineError::SlotUnavailable {
            conflict,
            date: candidate.date,
            range: candidate.range,
        };
        let displaced = match resolve(&guard.reservations, &candidate) {
            Resolution::Reject(conflict) => return Err(unavailable(conflict)),
            Resolution::Override(indices) if !allow_override => {
                return Err(unavailable(guard.reservations[indices[0]].id));
            }
            Resolution::Override(indices) => displace(&mut guard, &indices),
            Resolution::Accept => Vec::new(),
        };
        guard.reservations[idx].active = true;
        self.persist_room(&guard).await;
        drop(guard);

        info!(room, %id, displaced = displaced.len(), "reservation restored");
        self.publish(Notice::Restored {
            room: room.to_string(),
            id,
        });
        self.announce_displaced(room, &displaced);
        Ok(displaced)
    }

    pub(super) fn announce_displaced(&self, room: &str, displaced: &[Reservation]) {
        if displaced.is_empty() {
            return;
        }
        metrics::counter!(observability::DISPLACED_TOTAL).increment(displaced.len() as u64);
        for r in displaced {
            info!(room, id = %r.id, leader = %r.leader, purpose = %r.purpose, "reservation displaced");
            self.publish(Notice::displaced(room, r));
        }
    }

    // ── Housekeeping ─────────────────────────────────────────

    /// Soft-delete every active reservation whose end has passed at `now`.
    pub async fn sweep_expired(&self, now: NaiveDateTime) -> usize {
        let mut total = 0;
        for (name, rs) in self.rooms.rooms_in_order() {
            let mut guard = rs.write().await;
            if !self.rooms.is_current(&name, &rs) {
                continue;
            }
            let mut expired = Vec::new();
            for r in guard.reservations.iter_mut() {
                if r.active && is_expired(r, now) {
                    r.active = false;
                    expired.push(r.id);
                }
            }
            if expired.is_empty() {
                continue;
            }
            self.persist_room(&guard).await;
            drop(guard);

            total += expired.len();
            for id in expired {
                self.publish(Notice::Expired {
                    room: name.clone(),
                    id,
                });
            }
        }
        if total > 0 {
            metrics::counter!(observability::SWEEP_EXPIRED_TOTAL).increment(total as u64);
            info!(expired = total, "swept expired reservations");
        }
        total
    }

    /// Hard-remove inactive reservations and anything dated before `today`.
    pub async fn daily_reset(&self, today: NaiveDate) -> usize {
        let mut total = 0;
        for (name, rs) in self.rooms.rooms_in_order() {
            let mut guard = rs.write().await;
            if !self.rooms.is_current(&name, &rs) {
                continue;
            }
            let before = guard.reservations.len();
            let mut purged = Vec::new();
            guard.reservations.retain(|r| {
                let keep = r.active && r.date >= today;
                if !keep {
                    purged.push(r.id);
                }
                keep
            });
            if purged.is_empty() {
                continue;
            }
            for id in &purged {
                self.rooms.unmap_reservation(id);
            }
            debug!(room = %guard.name, before, after = guard.reservations.len(), "room reset");
            self.persist_room(&guard).await;
            total += purged.len();
        }
        metrics::counter!(observability::RESET_PURGED_TOTAL).increment(total as u64);
        info!(purged = total, %today, "daily reset complete");
        total
    }
}
