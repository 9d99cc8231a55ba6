//! Persistence seams for guild settings and violation records, plus the
//! sled-backed implementation used by the daemon.
//!
//! | Tree             | Key                   | Value                    |
//! |------------------|-----------------------|--------------------------|
//! | `guild_settings` | `{guild_id}`          | `GuildSettings` (JSON)   |
//! | `violations`     | `{guild_id}/{user_id}`| `ViolationRecord` (JSON) |

use crate::error::{ModerationError, ModerationResult};
use crate::settings::GuildSettings;
use crate::shared::ViolationRecord;
use sled::Db;
use std::path::Path;

const SETTINGS_TREE: &str = "guild_settings";
const VIOLATIONS_TREE: &str = "violations";

/// Guild settings persistence.
#[async_trait::async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_settings(&self, guild_id: &str) -> ModerationResult<Option<GuildSettings>>;

    /// Creates and persists the default row for a guild.
    async fn create_default_settings(&self, guild_id: &str) -> ModerationResult<GuildSettings>;

    async fn save_settings(&self, settings: &GuildSettings) -> ModerationResult<()>;

    /// Loads settings, creating the default row when the guild has none.
    async fn load_or_create_settings(&self, guild_id: &str) -> ModerationResult<GuildSettings> {
        match self.get_settings(guild_id).await? {
            Some(settings) => Ok(settings),
            None => self.create_default_settings(guild_id).await,
        }
    }
}

/// Violation record persistence.
#[async_trait::async_trait]
pub trait ViolationStore: Send + Sync {
    async fn get_violation(
        &self,
        user_id: &str,
        guild_id: &str,
    ) -> ModerationResult<Option<ViolationRecord>>;

    /// Creates and persists a fresh record (count 0, no punishment, not exempt).
    async fn create_violation(&self, user_id: &str, guild_id: &str)
        -> ModerationResult<ViolationRecord>;

    async fn save_violation(&self, record: &ViolationRecord) -> ModerationResult<()>;

    /// Re-reads the stored copy of `record`.
    async fn reload_violation(&self, record: &ViolationRecord) -> ModerationResult<ViolationRecord> {
        self.get_violation(&record.user_id, &record.guild_id)
            .await?
            .ok_or_else(|| ModerationError::NotFound(record.key()))
    }
}

/// Sled store holding both settings and violation trees.
#[derive(Clone)]
pub struct SledModerationStore {
    db: Db,
}

impl SledModerationStore {
    /// Opens or creates the store at the given path.
    pub fn open_path<P: AsRef<Path>>(path: P) -> ModerationResult<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// In-memory store removed on drop.
    pub fn temporary() -> ModerationResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    async fn put(&self, tree_name: &str, key: &str, value: &[u8]) -> ModerationResult<()> {
        let tree = self.db.open_tree(tree_name)?;
        let prev = tree.insert(key.as_bytes(), value)?;
        tree.flush_async().await?;
        tracing::debug!(
            target: "volguard::store",
            tree = tree_name,
            key = key,
            bytes = value.len(),
            action = if prev.is_some() { "UPDATE" } else { "INSERT" },
            "stored key '{}'",
            key
        );
        Ok(())
    }

    fn fetch(&self, tree_name: &str, key: &str) -> ModerationResult<Option<Vec<u8>>> {
        let tree = self.db.open_tree(tree_name)?;
        Ok(tree.get(key.as_bytes())?.map(|iv| iv.to_vec()))
    }
}

#[async_trait::async_trait]
impl SettingsStore for SledModerationStore {
    async fn get_settings(&self, guild_id: &str) -> ModerationResult<Option<GuildSettings>> {
        self.fetch(SETTINGS_TREE, guild_id)?
            .map(|bytes| GuildSettings::from_bytes(&bytes))
            .transpose()
    }

    async fn create_default_settings(&self, guild_id: &str) -> ModerationResult<GuildSettings> {
        let settings = GuildSettings::new(guild_id);
        self.save_settings(&settings).await?;
        tracing::info!(target: "volguard::store", guild_id, "created default guild settings");
        Ok(settings)
    }

    async fn save_settings(&self, settings: &GuildSettings) -> ModerationResult<()> {
        self.put(SETTINGS_TREE, &settings.guild_id, &settings.to_bytes()?)
            .await
    }
}

#[async_trait::async_trait]
impl ViolationStore for SledModerationStore {
    async fn get_violation(
        &self,
        user_id: &str,
        guild_id: &str,
    ) -> ModerationResult<Option<ViolationRecord>> {
        self.fetch(VIOLATIONS_TREE, &ViolationRecord::store_key(guild_id, user_id))?
            .map(|bytes| ViolationRecord::from_bytes(&bytes))
            .transpose()
    }

    async fn create_violation(
        &self,
        user_id: &str,
        guild_id: &str,
    ) -> ModerationResult<ViolationRecord> {
        let record = ViolationRecord::new(user_id, guild_id);
        self.save_violation(&record).await?;
        Ok(record)
    }

    async fn save_violation(&self, record: &ViolationRecord) -> ModerationResult<()> {
        self.put(VIOLATIONS_TREE, &record.key(), &record.to_bytes()?)
            .await
    }
}
