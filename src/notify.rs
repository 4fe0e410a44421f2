use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::Notice;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for booking notices, per room plus one firehose.
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<Notice>>,
    all: broadcast::Sender<Notice>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            all: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to one room's notices. Creates the channel if needed.
    pub fn subscribe(&self, room: &str) -> broadcast::Receiver<Notice> {
        let sender = self
            .channels
            .entry(room.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Subscribe to every room's notices.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Notice> {
        self.all.subscribe()
    }

    /// Send a notice. No-op if nobody is listening.
    pub fn send(&self, notice: &Notice) {
        if let Some(sender) = self.channels.get(notice.room()) {
            let _ = sender.send(notice.clone());
        }
        let _ = self.all.send(notice.clone());
    }

    /// Drop a room's channel (e.g. when the room is removed).
    pub fn remove(&self, room: &str) {
        self.channels.remove(room);
    }
}
