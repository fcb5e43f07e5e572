//! Channel-key store
//!
//! Bidirectional map of channel name ↔ 48-character alphanumeric key.
//! Keys are opaque capability tokens: knowing a key authorizes publishing
//! to its channel. Entries persist to a JSON file (`{channel: key}`),
//! rewritten every 15 seconds when dirty.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{info, warn};

use crate::error::Result;
use crate::session::server::PublishAuth;

/// Key length in characters
pub const KEY_LEN: usize = 48;

/// Persistence cadence
pub const PERSIST_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Default)]
struct Maps {
    channel_to_key: HashMap<String, String>,
    key_to_channel: HashMap<String, String>,
}

/// The store
pub struct ChannelKeys {
    maps: RwLock<Maps>,
    dirty: AtomicBool,
    file: Option<PathBuf>,
}

impl ChannelKeys {
    pub fn new(file: Option<PathBuf>) -> Self {
        Self {
            maps: RwLock::new(Maps::default()),
            dirty: AtomicBool::new(false),
            file,
        }
    }

    /// Load persisted entries; a missing file is an empty store.
    pub async fn load(&self) -> Result<()> {
        let Some(path) = &self.file else {
            return Ok(());
        };
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let entries: HashMap<String, String> = serde_json::from_slice(&raw).unwrap_or_default();
        let mut maps = self.maps.write().unwrap();
        for (channel, key) in entries {
            maps.key_to_channel.insert(key.clone(), channel.clone());
            maps.channel_to_key.insert(channel, key);
        }
        info!(count = maps.channel_to_key.len(), "channel keys loaded");
        Ok(())
    }

    /// The channel's key, created on first request.
    pub fn get_key(&self, channel: &str) -> String {
        if let Some(key) = self.maps.read().unwrap().channel_to_key.get(channel) {
            return key.clone();
        }
        self.set_key(channel)
    }

    /// Rotate (or create) the channel's key.
    pub fn set_key(&self, channel: &str) -> String {
        let mut maps = self.maps.write().unwrap();
        let key = loop {
            let candidate = random_key();
            if !maps.key_to_channel.contains_key(&candidate) {
                break candidate;
            }
        };
        if let Some(old) = maps.channel_to_key.insert(channel.to_string(), key.clone()) {
            maps.key_to_channel.remove(&old);
        }
        maps.key_to_channel.insert(key.clone(), channel.to_string());
        self.dirty.store(true, Ordering::Release);
        key
    }

    /// Which channel a key authorizes
    pub fn channel_for_key(&self, key: &str) -> Option<String> {
        self.maps.read().unwrap().key_to_channel.get(key).cloned()
    }

    /// Remove by channel name; both directions go.
    pub fn delete_channel(&self, channel: &str) -> bool {
        let mut maps = self.maps.write().unwrap();
        match maps.channel_to_key.remove(channel) {
            Some(key) => {
                maps.key_to_channel.remove(&key);
                self.dirty.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Remove by key; both directions go.
    pub fn delete_key(&self, key: &str) -> bool {
        let mut maps = self.maps.write().unwrap();
        match maps.key_to_channel.remove(key) {
            Some(channel) => {
                maps.channel_to_key.remove(&channel);
                self.dirty.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.maps.read().unwrap().channel_to_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the store to disk if anything changed.
    pub async fn persist(&self) -> Result<()> {
        let Some(path) = &self.file else {
            return Ok(());
        };
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let snapshot = self.maps.read().unwrap().channel_to_key.clone();
        let json = serde_json::to_vec_pretty(&snapshot).unwrap_or_default();
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    /// Background persistence on the 15 s cadence
    pub fn spawn_persist_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PERSIST_INTERVAL);
            loop {
                ticker.tick().await;
                if let Err(e) = store.persist().await {
                    warn!(error = %e, "key persistence failed");
                }
            }
        })
    }
}

impl PublishAuth for ChannelKeys {
    fn authorize(&self, channel: &str, token: Option<&str>) -> bool {
        match token {
            Some(token) => self
                .channel_for_key(token)
                .map(|owner| owner == channel)
                .unwrap_or(false),
            None => false,
        }
    }
}

fn random_key() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(KEY_LEN)
        .map(char::from)
        .collect()
}
