use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

use crate::model::RoomRecord;
use crate::users::User;

pub const ROOMS_FILE: &str = "rooms.json";
pub const USERS_FILE: &str = "users.json";

/// Durable home of the room and user snapshots.
///
/// `load_*` returns `Ok(None)` when nothing has been saved yet, which is how
/// first-run seeding and admin bootstrap are detected.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load_rooms(&self) -> io::Result<Option<Vec<RoomRecord>>>;
    async fn save_rooms(&self, rooms: &[RoomRecord]) -> io::Result<()>;
    async fn load_users(&self) -> io::Result<Option<Vec<User>>>;
    async fn save_users(&self, users: &[User]) -> io::Result<()>;
}

/// Two JSON files in a data directory.
///
/// Each save writes a temp file, fsyncs it, and renames it over the target, so
/// a crash mid-write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn rooms_path(&self) -> PathBuf {
        self.dir.join(ROOMS_FILE)
    }

    pub fn users_path(&self) -> PathBuf {
        self.dir.join(USERS_FILE)
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("{}: {e}", path.display())))
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> io::Result<()> {
    let payload = serde_json::to_vec_pretty(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let tmp_path = path.with_extension("json.tmp");
    let mut file = File::create(&tmp_path).await?;
    file.write_all(&payload).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(&tmp_path, path).await
}

#[async_trait]
impl SnapshotStore for JsonFileStore {
    async fn load_rooms(&self) -> io::Result<Option<Vec<RoomRecord>>> {
        read_json(&self.rooms_path()).await
    }

    async fn save_rooms(&self, rooms: &[RoomRecord]) -> io::Result<()> {
        write_json(&self.rooms_path(), rooms).await
    }

    async fn load_users(&self) -> io::Result<Option<Vec<User>>> {
        read_json(&self.users_path()).await
    }

    async fn save_users(&self, users: &[User]) -> io::Result<()> {
        write_json(&self.users_path(), users).await
    }
}

/// In-process store for embedding and tests. Writes can be made to fail.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rooms: Mutex<Option<Vec<RoomRecord>>>,
    users: Mutex<Option<Vec<User>>>,
    fail_writes: AtomicBool,
    room_saves: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rooms(rooms: Vec<RoomRecord>) -> Self {
        let store = Self::default();
        *store.rooms.lock().unwrap_or_else(PoisonError::into_inner) = Some(rooms);
        store
    }

    /// Make every subsequent save fail with an I/O error (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn rooms(&self) -> Option<Vec<RoomRecord>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn users(&self) -> Option<Vec<User>> {
        self.users.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of successful room snapshot writes.
    pub fn room_saves(&self) -> u64 {
        self.room_saves.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> io::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::other("simulated write failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn load_rooms(&self) -> io::Result<Option<Vec<RoomRecord>>> {
        Ok(self.rooms())
    }

    async fn save_rooms(&self, rooms: &[RoomRecord]) -> io::Result<()> {
        self.check_writable()?;
        *self.rooms.lock().unwrap_or_else(PoisonError::into_inner) = Some(rooms.to_vec());
        self.room_saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load_users(&self) -> io::Result<Option<Vec<User>>> {
        Ok(self.users())
    }

    async fn save_users(&self, users: &[User]) -> io::Result<()> {
        self.check_writable()?;
        *self.users.lock().unwrap_or_else(PoisonError::into_inner) = Some(users.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::users::Role;
    use chrono::NaiveDate;

    fn tmp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roombook_test_snapshot").join(name);
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn sample_rooms() -> Vec<RoomRecord> {
        let date = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();
        let mut booked = RoomRecord::empty("Study Room 1");
        booked.reservations.push(
            ReservationRequest::new(date, TimeRange::new(540, 600), Purpose::StudySession, "kim")
                .with_info("group 4")
                .into_reservation(),
        );
        vec![booked, RoomRecord::empty("Conference Room")]
    }

    #[tokio::test]
    async fn missing_files_load_as_none() {
        let store = JsonFileStore::new(tmp_dir("missing"));
        assert!(store.load_rooms().await.unwrap().is_none());
        assert!(store.load_users().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rooms_save_and_load() {
        let dir = tmp_dir("rooms_roundtrip");
        let store = JsonFileStore::new(&dir);
        let rooms = sample_rooms();
        store.save_rooms(&rooms).await.unwrap();

        let loaded = store.load_rooms().await.unwrap().unwrap();
        assert_eq!(loaded, rooms);
        assert!(!dir.join("rooms.json.tmp").exists());
    }

    #[tokio::test]
    async fn save_replaces_previous_snapshot() {
        let store = JsonFileStore::new(tmp_dir("replace"));
        store.save_rooms(&sample_rooms()).await.unwrap();
        store.save_rooms(&[RoomRecord::empty("LRE Room")]).await.unwrap();

        let loaded = store.load_rooms().await.unwrap().unwrap();
        assert_eq!(loaded, vec![RoomRecord::empty("LRE Room")]);
    }

    #[tokio::test]
    async fn null_reservation_lists_are_normalized() {
        let dir = tmp_dir("normalize");
        std::fs::write(
            dir.join(ROOMS_FILE),
            r#"[{"name":"Study Room 2","reservations":null},{"name":"Study Room 3"}]"#,
        )
        .unwrap();
        let store = JsonFileStore::new(&dir);
        let loaded = store.load_rooms().await.unwrap().unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.iter().all(|r| r.reservations.is_empty()));
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tmp_dir("corrupt");
        std::fs::write(dir.join(ROOMS_FILE), b"[{\"name\":").unwrap();
        let store = JsonFileStore::new(&dir);
        let err = store.load_rooms().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn users_save_and_load() {
        let store = JsonFileStore::new(tmp_dir("users"));
        let users = vec![User::new("root", "correct horse", Role::Admin)];
        store.save_users(&users).await.unwrap();
        let loaded = store.load_users().await.unwrap().unwrap();
        assert_eq!(loaded, users);
    }

    #[tokio::test]
    async fn memory_store_failure_injection() {
        let store = MemoryStore::new();
        store.save_rooms(&sample_rooms()).await.unwrap();
        assert_eq!(store.room_saves(), 1);

        store.set_fail_writes(true);
        assert!(store.save_rooms(&[]).await.is_err());
        assert_eq!(store.rooms().unwrap().len(), 2); // previous snapshot kept
        assert_eq!(store.room_saves(), 1);
    }
}
