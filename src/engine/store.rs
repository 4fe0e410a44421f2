use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

/// A room value and the lock that guards it.
pub type SharedRoom = Arc<RwLock<RoomState>>;

#[derive(Clone)]
struct RoomEntry {
    /// Creation order; listings follow it.
    seq: u64,
    state: SharedRoom,
}

/// Registry of rooms by name, plus a reservation id → room index.
///
/// The map itself never holds a room lock; callers clone the `SharedRoom`
/// out and lock it afterwards.
pub struct RoomRegistry {
    rooms: DashMap<String, RoomEntry>,
    reservation_to_room: DashMap<Ulid, String>,
    next_seq: AtomicU64,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            reservation_to_room: DashMap::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    // ── Rooms ────────────────────────────────────────────────

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn contains_room(&self, name: &str) -> bool {
        self.rooms.contains_key(name)
    }

    pub fn get_room(&self, name: &str) -> Option<SharedRoom> {
        self.rooms.get(name).map(|e| e.state.clone())
    }

    /// Insert a room and index its reservations. Returns `None` if the name is taken.
    pub fn insert_room(&self, state: RoomState) -> Option<SharedRoom> {
        use dashmap::mapref::entry::Entry;
        match self.rooms.entry(state.name.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                for r in &state.reservations {
                    self.reservation_to_room.insert(r.id, state.name.clone());
                }
                let shared = Arc::new(RwLock::new(state));
                slot.insert(RoomEntry {
                    seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                    state: shared.clone(),
                });
                Some(shared)
            }
        }
    }

    /// True while `state` is still the room registered under `name`.
    /// A lock taken on a room that has since been removed fails this check.
    pub fn is_current(&self, name: &str, state: &SharedRoom) -> bool {
        self.rooms
            .get(name)
            .is_some_and(|e| Arc::ptr_eq(&e.state, state))
    }

    /// Unregister `name` only if it still maps to `state`.
    pub fn remove_room(&self, name: &str, state: &SharedRoom) -> bool {
        self.rooms
            .remove_if(name, |_, e| Arc::ptr_eq(&e.state, state))
            .is_some()
    }

    /// All rooms in creation order.
    pub fn rooms_in_order(&self) -> Vec<(String, SharedRoom)> {
        let mut entries: Vec<(u64, String, SharedRoom)> = self
            .rooms
            .iter()
            .map(|e| (e.seq, e.key().clone(), e.state.clone()))
            .collect();
        entries.sort_by_key(|(seq, _, _)| *seq);
        entries.into_iter().map(|(_, name, state)| (name, state)).collect()
    }

    // ── Reservation index ────────────────────────────────────

    pub fn room_for_reservation(&self, id: &Ulid) -> Option<String> {
        self.reservation_to_room.get(id).map(|e| e.value().clone())
    }

    pub fn map_reservation(&self, id: Ulid, room: &str) {
        self.reservation_to_room.insert(id, room.to_string());
    }

    pub fn unmap_reservation(&self, id: &Ulid) {
        self.reservation_to_room.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[tokio::test]
    async fn insert_rejects_duplicate_names() {
        let reg = RoomRegistry::new();
        assert!(reg.insert_room(RoomState::new("Study Room 1".into())).is_some());
        assert!(reg.insert_room(RoomState::new("Study Room 1".into())).is_none());
        assert_eq!(reg.room_count(), 1);
    }

    #[tokio::test]
    async fn order_follows_creation() {
        let reg = RoomRegistry::new();
        for name in ["Study Room 2", "Conference Room", "LRE Room", "Study Room 1"] {
            reg.insert_room(RoomState::new(name.into()));
        }
        let old = reg.get_room("Conference Room").unwrap();
        assert!(reg.remove_room("Conference Room", &old));
        let new = reg.insert_room(RoomState::new("Conference Room".into())).unwrap();
        assert!(!reg.is_current("Conference Room", &old));
        assert!(reg.is_current("Conference Room", &new));
        // A stale handle cannot unregister the room that replaced it.
        assert!(!reg.remove_room("Conference Room", &old));
        let names: Vec<_> = reg.rooms_in_order().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Study Room 2", "LRE Room", "Study Room 1", "Conference Room"]);
    }

    #[tokio::test]
    async fn insert_indexes_loaded_reservations() {
        let reg = RoomRegistry::new();
        let r = ReservationRequest::new(
            NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
            TimeRange::new(540, 600),
            Purpose::Meeting,
            "lee",
        )
        .into_reservation();
        let id = r.id;
        let mut state = RoomState::new("Study Room 4".into());
        state.reservations.push(r);
        reg.insert_room(state);
        assert_eq!(reg.room_for_reservation(&id).as_deref(), Some("Study Room 4"));

        reg.unmap_reservation(&id);
        assert!(reg.room_for_reservation(&id).is_none());
    }
}
