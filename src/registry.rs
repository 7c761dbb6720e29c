//! Top-level room directory and join-attempt rate limiting (§4.A).

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::Instant;

use tokio::sync::RwLock;

use crate::blob_store::BlobStore;
use crate::config::{RATE_LIMIT_MAX_ATTEMPTS, RATE_LIMIT_WINDOW};
use crate::ids::{ParticipantId, RoomCode};
use crate::room::Room;

pub struct Registry {
    upload_root: String,
    rooms: RwLock<HashMap<RoomCode, Room>>,
    rate_limits: Mutex<HashMap<IpAddr, Vec<Instant>>>,
}

impl Registry {
    pub fn new(upload_root: String) -> Self {
        Self {
            upload_root,
            rooms: RwLock::new(HashMap::new()),
            rate_limits: Mutex::new(HashMap::new()),
        }
    }

    /// §4.A `create`. Mints a fresh code and host id, never colliding with a
    /// room already in the directory.
    pub async fn create(&self, password: &str) -> (Room, ParticipantId) {
        let host_id = ParticipantId::new();
        let digest = bcrypt::hash(password, bcrypt::DEFAULT_COST).expect("bcrypt hash");

        let mut rooms = self.rooms.write().await;
        let code = loop {
            let candidate = RoomCode::generate();
            if !rooms.contains_key(&candidate) {
                break candidate;
            }
        };

        let blob_store = BlobStore::new(&self.upload_root, &code);
        let room = Room::new(code.clone(), digest, host_id, blob_store);
        rooms.insert(code, room.clone());
        (room, host_id)
    }

    pub async fn lookup(&self, code: &RoomCode) -> Option<Room> {
        self.rooms.read().await.get(code).cloned()
    }

    /// §4.A `verify`: password check gated by per-address rate limiting.
    pub async fn verify(
        &self,
        code: &RoomCode,
        password: &str,
        remote: IpAddr,
    ) -> Result<Room, crate::error::RdmError> {
        if !self.check_rate_limit(remote) {
            return Err(crate::error::RdmError::RateLimited);
        }
        self.record_attempt(remote);

        let room = self.lookup(code).await.ok_or(crate::error::RdmError::NotFound)?;
        if room.verify_password(password) {
            Ok(room)
        } else {
            Err(crate::error::RdmError::AuthFailure)
        }
    }

    /// Returns `false` if `remote` has exceeded `RATE_LIMIT_MAX_ATTEMPTS`
    /// join attempts within `RATE_LIMIT_WINDOW`.
    fn check_rate_limit(&self, remote: IpAddr) -> bool {
        let mut limits = self.rate_limits.lock().unwrap();
        let now = Instant::now();
        let attempts = limits.entry(remote).or_default();
        attempts.retain(|t| now.duration_since(*t) < RATE_LIMIT_WINDOW);
        attempts.len() < RATE_LIMIT_MAX_ATTEMPTS
    }

    fn record_attempt(&self, remote: IpAddr) {
        let mut limits = self.rate_limits.lock().unwrap();
        limits.entry(remote).or_default().push(Instant::now());
    }

    /// §4.A `sweep`: reaps rooms whose `last_activity` is older than
    /// `expiry`, closing any remaining channels with reason "expired" and
    /// deleting their blob directories. Idempotent: a room already removed
    /// by an earlier sweep is simply absent from `expired` next time.
    pub async fn sweep(&self, expiry: std::time::Duration) {
        let now = Instant::now();
        let expired: Vec<RoomCode> = {
            let rooms = self.rooms.read().await;
            rooms
                .values()
                .filter(|room| room.is_expired(now, expiry))
                .map(|room| room.code().clone())
                .collect()
        };

        if expired.is_empty() {
            return;
        }

        let mut rooms = self.rooms.write().await;
        for code in expired {
            if let Some(room) = rooms.remove(&code) {
                log::info!("reaping expired room {code}");
                room.close_all("expired");
                room.blob_store().clone().drop_room().await;
            }
        }
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

/// Spawns the periodic sweep task; runs for the lifetime of the process.
pub fn spawn_sweeper(registry: std::sync::Arc<Registry>, interval: std::time::Duration, expiry: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            registry.sweep(expiry).await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_lookup_round_trips() {
        let registry = Registry::new(std::env::temp_dir().to_string_lossy().into_owned());
        let (room, host_id) = registry.create("secret").await;
        let found = registry.lookup(room.code()).await.unwrap();
        assert_eq!(found.host_id(), host_id);
    }

    #[tokio::test]
    async fn verify_rejects_wrong_password() {
        let registry = Registry::new(std::env::temp_dir().to_string_lossy().into_owned());
        let (room, _) = registry.create("secret").await;
        let remote: IpAddr = "127.0.0.1".parse().unwrap();
        let result = registry.verify(room.code(), "wrong", remote).await;
        assert!(matches!(result, Err(crate::error::RdmError::AuthFailure)));
    }

    #[tokio::test]
    async fn rate_limit_blocks_after_threshold() {
        let registry = Registry::new(std::env::temp_dir().to_string_lossy().into_owned());
        let (room, _) = registry.create("secret").await;
        let remote: IpAddr = "10.0.0.1".parse().unwrap();
        for _ in 0..RATE_LIMIT_MAX_ATTEMPTS {
            let _ = registry.verify(room.code(), "wrong", remote).await;
        }
        let result = registry.verify(room.code(), "secret", remote).await;
        assert!(matches!(result, Err(crate::error::RdmError::RateLimited)));
    }

    #[tokio::test]
    async fn sweep_reaps_empty_expired_rooms() {
        let registry = Registry::new(std::env::temp_dir().to_string_lossy().into_owned());
        let (room, _) = registry.create("secret").await;
        registry.sweep(std::time::Duration::from_secs(0)).await;
        assert!(registry.lookup(room.code()).await.is_none());
    }
}
