//! Persistence seam.
//!
//! [`AltStore`] is everything the runner and presence tracker read or write
//! durably. [`MemoryStore`] keeps the whole data set in memory and, when opened
//! on a path, rewrites a JSON snapshot of it after every mutation.

use crate::error::{StoreError, StoreResult};
use crate::types::{
    AltId, AltRecord, ChannelId, GuildId, PersistedStatus, PlayerIdentity, TrackerConfig,
    TrackerConfigPatch, TrackerKind,
};
use crate::watchlist;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs as tokio_fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

/// Persistence collaborator
#[async_trait]
pub trait AltStore: Send + Sync {
    async fn get_alt(&self, alt_id: AltId) -> StoreResult<AltRecord>;

    async fn list_alts(&self, guild_id: &str) -> StoreResult<Vec<AltRecord>>;

    async fn delete_alt(&self, alt_id: AltId) -> StoreResult<()>;

    /// Records the in-game username learned after login
    async fn update_username(&self, alt_id: AltId, username: &str) -> StoreResult<()>;

    async fn set_status(&self, alt_id: AltId, status: PersistedStatus, last_seen: i64) -> StoreResult<()>;

    async fn set_identity(&self, alt_id: AltId, identity: PlayerIdentity) -> StoreResult<()>;

    async fn set_world(&self, alt_id: AltId, world: &str, updated_at: i64) -> StoreResult<()>;

    /// Sorted watch-list of a guild
    async fn watchlist(&self, guild_id: &str) -> StoreResult<Vec<String>>;

    /// Returns `false` when the name was already listed
    async fn watch_add(&self, guild_id: &str, name: &str) -> StoreResult<bool>;

    /// Returns `false` when the name was not listed
    async fn watch_remove(&self, guild_id: &str, name: &str) -> StoreResult<bool>;

    async fn tracker_config(&self, guild_id: &str, kind: TrackerKind) -> StoreResult<TrackerConfig>;

    async fn upsert_tracker_config(
        &self,
        guild_id: &str,
        kind: TrackerKind,
        patch: TrackerConfigPatch,
    ) -> StoreResult<TrackerConfig>;

    /// Alt designated to run presence probes for this guild and kind
    async fn checker_alt(&self, guild_id: &str, kind: TrackerKind) -> StoreResult<Option<AltId>>;

    /// Operator channel for alt notices
    async fn alt_channel(&self, guild_id: &str) -> StoreResult<Option<ChannelId>>;
}

/// Per-guild settings owned by the admin surface
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuildSettings {
    #[serde(default)]
    pub alt_channel_id: Option<ChannelId>,
    #[serde(default)]
    pub checker_alts: BTreeMap<TrackerKind, AltId>,
}

/// Serialized form of the whole store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub alts: BTreeMap<AltId, AltRecord>,
    #[serde(default)]
    pub guilds: BTreeMap<GuildId, GuildSettings>,
    #[serde(default)]
    pub watchlists: BTreeMap<GuildId, Vec<String>>,
    #[serde(default)]
    pub trackers: BTreeMap<GuildId, BTreeMap<TrackerKind, TrackerConfig>>,
}

/// In-memory store with optional JSON file mirroring
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<StoreSnapshot>,
    path: Option<PathBuf>,
}

impl MemoryStore {
    /// Volatile store, nothing is written to disk
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a file-backed store, loading the snapshot if the file exists
    #[instrument]
    pub async fn open(path: PathBuf) -> StoreResult<Self> {
        let data = if tokio_fs::try_exists(&path).await.unwrap_or(false) {
            let contents = tokio_fs::read_to_string(&path)
                .await
                .map_err(|e| StoreError::FileRead(path.clone(), e))?;
            let snapshot: StoreSnapshot = serde_json::from_str(&contents)
                .map_err(|e| StoreError::Deserialization(path.clone(), e))?;
            info!("📂 Loaded {} alts from {}", snapshot.alts.len(), path.display());
            snapshot
        } else {
            info!("📂 No store file at {}, starting empty", path.display());
            StoreSnapshot::default()
        };

        Ok(Self {
            data: RwLock::new(data),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        self.data.read().await.clone()
    }

    /// Inserts or replaces an alt record
    pub async fn insert_alt(&self, record: AltRecord) -> StoreResult<()> {
        self.mutate(|data| {
            data.alts.insert(record.id, record);
            Ok(())
        })
        .await
    }

    pub async fn set_checker_alt(&self, guild_id: &str, kind: TrackerKind, alt_id: Option<AltId>) -> StoreResult<()> {
        self.mutate(|data| {
            let guild = data.guilds.entry(guild_id.to_string()).or_default();
            match alt_id {
                Some(id) => guild.checker_alts.insert(kind, id),
                None => guild.checker_alts.remove(&kind),
            };
            Ok(())
        })
        .await
    }

    pub async fn set_alt_channel(&self, guild_id: &str, channel_id: Option<ChannelId>) -> StoreResult<()> {
        self.mutate(|data| {
            data.guilds.entry(guild_id.to_string()).or_default().alt_channel_id = channel_id;
            Ok(())
        })
        .await
    }

    /// Applies `f` to a copy under the write lock; the copy replaces the live
    /// data only once it has been mirrored to disk
    async fn mutate<T>(&self, f: impl FnOnce(&mut StoreSnapshot) -> StoreResult<T>) -> StoreResult<T> {
        let mut data = self.data.write().await;
        let mut next = data.clone();
        let result = f(&mut next)?;
        if let Some(path) = &self.path {
            Self::write_snapshot(path, &next).await?;
        }
        *data = next;
        Ok(result)
    }

    fn alt_mut(data: &mut StoreSnapshot, alt_id: AltId) -> StoreResult<&mut AltRecord> {
        data.alts.get_mut(&alt_id).ok_or(StoreError::AltNotFound(alt_id))
    }

    async fn write_snapshot(path: &Path, data: &StoreSnapshot) -> StoreResult<()> {
        let json = serde_json::to_string_pretty(data).map_err(StoreError::Serialization)?;
        let temp_path = path.with_extension("tmp");

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio_fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::FileWrite(parent.to_path_buf(), e))?;
        }

        let mut file = tokio_fs::File::create(&temp_path)
            .await
            .map_err(|e| StoreError::FileWrite(temp_path.clone(), e))?;
        file.write_all(json.as_bytes())
            .await
            .map_err(|e| StoreError::FileWrite(temp_path.clone(), e))?;
        file.sync_all()
            .await
            .map_err(|e| StoreError::FileWrite(temp_path.clone(), e))?;

        // Atomic rename
        tokio_fs::rename(&temp_path, path)
            .await
            .map_err(|e| StoreError::FileWrite(path.to_path_buf(), e))?;

        debug!("💾 Store snapshot written to {}", path.display());
        Ok(())
    }
}

#[async_trait]
impl AltStore for MemoryStore {
    async fn get_alt(&self, alt_id: AltId) -> StoreResult<AltRecord> {
        self.data
            .read()
            .await
            .alts
            .get(&alt_id)
            .cloned()
            .ok_or(StoreError::AltNotFound(alt_id))
    }

    async fn list_alts(&self, guild_id: &str) -> StoreResult<Vec<AltRecord>> {
        Ok(self
            .data
            .read()
            .await
            .alts
            .values()
            .filter(|a| a.guild_id == guild_id)
            .cloned()
            .collect())
    }

    async fn delete_alt(&self, alt_id: AltId) -> StoreResult<()> {
        self.mutate(|data| {
            data.alts.remove(&alt_id).ok_or(StoreError::AltNotFound(alt_id))?;
            for guild in data.guilds.values_mut() {
                guild.checker_alts.retain(|_, id| *id != alt_id);
            }
            Ok(())
        })
        .await
    }

    async fn update_username(&self, alt_id: AltId, username: &str) -> StoreResult<()> {
        self.mutate(|data| {
            let alt = Self::alt_mut(data, alt_id)?;
            match alt.identity.as_mut() {
                Some(identity) => identity.username = username.to_string(),
                None => {
                    alt.identity = Some(PlayerIdentity {
                        uuid: None,
                        username: username.to_string(),
                    })
                }
            }
            Ok(())
        })
        .await
    }

    async fn set_status(&self, alt_id: AltId, status: PersistedStatus, last_seen: i64) -> StoreResult<()> {
        self.mutate(|data| {
            let alt = Self::alt_mut(data, alt_id)?;
            alt.last_status = Some(status);
            alt.last_seen = last_seen;
            Ok(())
        })
        .await
    }

    async fn set_identity(&self, alt_id: AltId, identity: PlayerIdentity) -> StoreResult<()> {
        self.mutate(|data| {
            Self::alt_mut(data, alt_id)?.identity = Some(identity);
            Ok(())
        })
        .await
    }

    async fn set_world(&self, alt_id: AltId, world: &str, updated_at: i64) -> StoreResult<()> {
        self.mutate(|data| {
            let alt = Self::alt_mut(data, alt_id)?;
            alt.last_world = Some(world.to_string());
            alt.world_updated_at = updated_at;
            Ok(())
        })
        .await
    }

    async fn watchlist(&self, guild_id: &str) -> StoreResult<Vec<String>> {
        let data = self.data.read().await;
        Ok(data
            .watchlists
            .get(guild_id)
            .map(|list| watchlist::normalize_names(list.iter()))
            .unwrap_or_default())
    }

    async fn watch_add(&self, guild_id: &str, name: &str) -> StoreResult<bool> {
        self.mutate(|data| {
            let list = data.watchlists.entry(guild_id.to_string()).or_default();
            Ok(watchlist::add_name(list, name))
        })
        .await
    }

    async fn watch_remove(&self, guild_id: &str, name: &str) -> StoreResult<bool> {
        self.mutate(|data| {
            Ok(data
                .watchlists
                .get_mut(guild_id)
                .map(|list| watchlist::remove_name(list, name))
                .unwrap_or(false))
        })
        .await
    }

    async fn tracker_config(&self, guild_id: &str, kind: TrackerKind) -> StoreResult<TrackerConfig> {
        let data = self.data.read().await;
        Ok(data
            .trackers
            .get(guild_id)
            .and_then(|kinds| kinds.get(&kind))
            .cloned()
            .unwrap_or_default())
    }

    async fn upsert_tracker_config(
        &self,
        guild_id: &str,
        kind: TrackerKind,
        patch: TrackerConfigPatch,
    ) -> StoreResult<TrackerConfig> {
        self.mutate(|data| {
            let config = data
                .trackers
                .entry(guild_id.to_string())
                .or_default()
                .entry(kind)
                .or_default();
            patch.apply(config);
            Ok(config.clone())
        })
        .await
    }

    async fn checker_alt(&self, guild_id: &str, kind: TrackerKind) -> StoreResult<Option<AltId>> {
        let data = self.data.read().await;
        Ok(data
            .guilds
            .get(guild_id)
            .and_then(|g| g.checker_alts.get(&kind).copied()))
    }

    async fn alt_channel(&self, guild_id: &str) -> StoreResult<Option<ChannelId>> {
        let data = self.data.read().await;
        Ok(data.guilds.get(guild_id).and_then(|g| g.alt_channel_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_alt_crud_and_status() {
        let store = MemoryStore::new();
        store.insert_alt(AltRecord::new(1, "g1", "Scout")).await.unwrap();
        store.insert_alt(AltRecord::new(2, "g2", "Other")).await.unwrap();

        store.set_status(1, PersistedStatus::Online, 500).await.unwrap();
        store.set_world(1, "Nebula", 501).await.unwrap();

        let alt = store.get_alt(1).await.unwrap();
        assert_eq!(alt.last_status, Some(PersistedStatus::Online));
        assert_eq!(alt.last_seen, 500);
        assert_eq!(alt.last_world.as_deref(), Some("Nebula"));
        assert_eq!(alt.world_updated_at, 501);

        assert_eq!(store.list_alts("g1").await.unwrap().len(), 1);

        store.delete_alt(1).await.unwrap();
        assert!(matches!(store.get_alt(1).await, Err(StoreError::AltNotFound(1))));
        assert!(matches!(store.set_status(1, PersistedStatus::Offline, 0).await, Err(StoreError::AltNotFound(1))));
    }

    #[tokio::test]
    async fn test_update_username_creates_identity() {
        let store = MemoryStore::new();
        store.insert_alt(AltRecord::new(5, "g", "Five")).await.unwrap();
        store.update_username(5, "FiveMC").await.unwrap();
        assert_eq!(store.get_alt(5).await.unwrap().identity.unwrap().username, "FiveMC");
    }

    #[tokio::test]
    async fn test_watchlist_round_trip() {
        let store = MemoryStore::new();
        assert!(store.watch_add("g", " Steve ").await.unwrap());
        assert!(!store.watch_add("g", "STEVE").await.unwrap());
        assert!(store.watch_add("g", "alex").await.unwrap());
        assert_eq!(store.watchlist("g").await.unwrap(), vec!["alex", "Steve"]);
        assert!(store.watch_remove("g", "steve").await.unwrap());
        assert!(!store.watch_remove("other", "steve").await.unwrap());
    }

    #[tokio::test]
    async fn test_tracker_config_upsert_merges() {
        let store = MemoryStore::new();
        assert_eq!(store.tracker_config("g", TrackerKind::Shard).await.unwrap(), TrackerConfig::default());

        store
            .upsert_tracker_config(
                "g",
                TrackerKind::Shard,
                TrackerConfigPatch {
                    enabled: Some(true),
                    channel_id: Some("c1".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let cfg = store
            .upsert_tracker_config("g", TrackerKind::Shard, TrackerConfigPatch { last_run_at: Some(42), ..Default::default() })
            .await
            .unwrap();
        assert!(cfg.enabled);
        assert_eq!(cfg.channel_id.as_deref(), Some("c1"));
        assert_eq!(cfg.last_run_at, 42);
        assert_eq!(store.tracker_config("g", TrackerKind::Rpost).await.unwrap(), TrackerConfig::default());
    }

    #[tokio::test]
    async fn test_deleting_alt_clears_checker_assignment() {
        let store = MemoryStore::new();
        store.insert_alt(AltRecord::new(9, "g", "Checker")).await.unwrap();
        store.set_checker_alt("g", TrackerKind::Rpost, Some(9)).await.unwrap();
        assert_eq!(store.checker_alt("g", TrackerKind::Rpost).await.unwrap(), Some(9));

        store.delete_alt(9).await.unwrap();
        assert_eq!(store.checker_alt("g", TrackerKind::Rpost).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_backed_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        {
            let store = MemoryStore::open(path.clone()).await.unwrap();
            store.insert_alt(AltRecord::new(3, "g", "Three")).await.unwrap();
            store.set_alt_channel("g", Some("alts".into())).await.unwrap();
            store.watch_add("g", "Notch").await.unwrap();
        }

        let reopened = MemoryStore::open(path.clone()).await.unwrap();
        assert_eq!(reopened.get_alt(3).await.unwrap().label, "Three");
        assert_eq!(reopened.alt_channel("g").await.unwrap().as_deref(), Some("alts"));
        assert_eq!(reopened.watchlist("g").await.unwrap(), vec!["Notch"]);
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_data_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = MemoryStore::open(path.clone()).await.unwrap();
        store.insert_alt(AltRecord::new(1, "g", "One")).await.unwrap();

        // A non-empty directory at the target path makes the final rename fail
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("blocker"), "x").unwrap();

        assert!(matches!(
            store.insert_alt(AltRecord::new(2, "g", "Two")).await,
            Err(StoreError::FileWrite(..))
        ));
        assert!(matches!(store.get_alt(2).await, Err(StoreError::AltNotFound(2))));
        assert!(matches!(store.set_status(1, PersistedStatus::Online, 9).await, Err(StoreError::FileWrite(..))));
        assert_eq!(store.get_alt(1).await.unwrap().last_status, None);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(MemoryStore::open(path).await, Err(StoreError::Deserialization(..))));
    }
}
