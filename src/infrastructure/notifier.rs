// Real-time notifier - per-user rooms over tokio broadcast channels

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::core::UserId;
use crate::error::AppResult;
use crate::models::Notification;

#[async_trait]
pub trait RealtimeNotifier: Send + Sync {
    /// Push a notification to the user's room. Returns how many live
    /// subscribers received it.
    async fn notify_user(&self, user: UserId, notification: Notification) -> AppResult<usize>;
}

pub struct RoomNotifier {
    rooms: RwLock<HashMap<UserId, broadcast::Sender<Notification>>>,
    room_capacity: usize,
}

impl RoomNotifier {
    pub fn new(room_capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            room_capacity: room_capacity.max(1),
        }
    }

    /// Join a user's room
    pub async fn subscribe(&self, user: UserId) -> broadcast::Receiver<Notification> {
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(user)
            .or_insert_with(|| broadcast::channel(self.room_capacity).0)
            .subscribe()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

impl Default for RoomNotifier {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl RealtimeNotifier for RoomNotifier {
    async fn notify_user(&self, user: UserId, notification: Notification) -> AppResult<usize> {
        {
            let rooms = self.rooms.read().await;
            let Some(sender) = rooms.get(&user) else {
                debug!("No room for user {}, dropping {}", user, notification.kind);
                return Ok(0);
            };
            if sender.receiver_count() > 0 {
                // send only fails when every receiver is gone
                return Ok(sender.send(notification).unwrap_or(0));
            }
        }

        // no receivers left, close the room unless someone joined meanwhile
        let mut rooms = self.rooms.write().await;
        if let Some(sender) = rooms.get(&user) {
            if sender.receiver_count() > 0 {
                return Ok(sender.send(notification).unwrap_or(0));
            }
            rooms.remove(&user);
            debug!("Closed empty room for user {}", user);
        }
        Ok(0)
    }
}
