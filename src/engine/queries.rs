use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;
use crate::slots::{SlotCatalog, parse_time};

use super::{Engine, EngineError};

impl Engine {
    /// Rooms in creation order with their reservation counts.
    pub async fn list_rooms(&self) -> Vec<RoomInfo> {
        let mut out = Vec::new();
        for (name, rs) in self.rooms.rooms_in_order() {
            let guard = rs.read().await;
            out.push(RoomInfo {
                name,
                active_reservations: guard.active_count(),
                stored_reservations: guard.reservations.len(),
            });
        }
        out
    }

    pub fn room_names(&self) -> Vec<String> {
        self.rooms
            .rooms_in_order()
            .into_iter()
            .map(|(name, _)| name)
            .collect()
    }

    /// Active reservations on `date`, in insertion order.
    pub async fn list_reservations(
        &self,
        room: &str,
        date: NaiveDate,
    ) -> Result<Vec<Reservation>, EngineError> {
        let rs = self.get_room(room)?;
        let guard = rs.read().await;
        Ok(guard.active_on(date).cloned().collect())
    }

    /// Every stored reservation, inactive ones included.
    pub async fn all_reservations(&self, room: &str) -> Result<Vec<Reservation>, EngineError> {
        let rs = self.get_room(room)?;
        let guard = rs.read().await;
        Ok(guard.reservations.clone())
    }

    pub async fn find_reservation(&self, id: Ulid) -> Result<(String, Reservation), EngineError> {
        let not_found = || EngineError::ReservationNotFound(ReservationRef::Id(id));
        let room = self.rooms.room_for_reservation(&id).ok_or_else(not_found)?;
        let rs = self.get_room(&room)?;
        let guard = rs.read().await;
        let idx = guard.position(id).ok_or_else(not_found)?;
        Ok((room, guard.reservations[idx].clone()))
    }

    /// Rooms with no active reservation overlapping `range` on `date`.
    /// Takes one room's read lock at a time.
    pub async fn rooms_available(&self, date: NaiveDate, range: TimeRange) -> Vec<String> {
        let mut free = Vec::new();
        for (name, rs) in self.rooms.rooms_in_order() {
            let guard = rs.read().await;
            if !guard.active_on(date).any(|r| r.range.overlaps(&range)) {
                free.push(name);
            }
        }
        free
    }

    /// True if the slot's start time falls inside an active reservation.
    pub async fn slot_occupied(
        &self,
        room: &str,
        date: NaiveDate,
        slot: &str,
    ) -> Result<bool, EngineError> {
        let t = parse_time(slot)?;
        let rs = self.get_room(room)?;
        let guard = rs.read().await;
        Ok(guard.active_on(date).any(|r| r.range.contains_instant(t)))
    }

    /// Lay a room's day over the slot catalog.
    pub async fn room_day(
        &self,
        room: &str,
        date: NaiveDate,
        catalog: &SlotCatalog,
    ) -> Result<DayView, EngineError> {
        let rs = self.get_room(room)?;
        let guard = rs.read().await;
        let active: Vec<&Reservation> = guard.active_on(date).collect();
        let cells = catalog
            .iter()
            .map(|(label, t)| SlotCell {
                label: label.to_string(),
                occupant: active
                    .iter()
                    .find(|r| r.range.contains_instant(t))
                    .map(|r| (*r).clone()),
            })
            .collect();
        Ok(DayView {
            room: guard.name.clone(),
            date,
            cells,
        })
    }
}
