use std::{ops::Deref, sync::Arc};

use async_trait::async_trait;
use dashmap::DashMap;
use poise::serenity_prelude as serenity;
use serde::{Deserialize, Serialize};
use serenity::prelude::TypeMapKey;

use crate::moderation::{Infraction, InfractionStore, RevTask, TaskStore};

/// Guild configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildConfig {
    // The ID of the guild
    pub guild_id: u64,
    // Fallback mute duration when a moderator supplies none; None or 0
    // means mutes always need an explicit duration
    pub default_mute_duration_ms: Option<i64>,
    // Whether moderation commands must carry a reason
    pub require_reason: bool,
    // Whether to record infractions for moderation done outside the bot
    pub track_native: bool,
    // Whether to DM users when their mute expires
    pub notify_on_expiry: bool,
    // Role whose holders may use moderation commands
    pub mod_role_id: Option<u64>,
    // Channel for moderation log entries
    pub log_channel_id: Option<u64>,
}

impl Default for GuildConfig {
    fn default() -> Self {
        Self {
            guild_id: 0,
            default_mute_duration_ms: None,
            require_reason: false,
            track_native: true,
            notify_on_expiry: true,
            mod_role_id: None,
            log_channel_id: None,
        }
    }
}

/// Boolean guild settings addressable from the settings command.
///
/// Each variant maps to exactly one typed field, so a new toggle that is
/// not wired up here fails to compile instead of falling through a string
/// key lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, poise::ChoiceParameter)]
pub enum ConfigToggle {
    /// Require a reason on every moderation command
    RequireReason,
    /// Record infractions for platform-native moderation actions
    TrackNative,
    /// DM users when their mute expires
    NotifyOnExpiry,
}

impl ConfigToggle {
    /// Write the toggle's field.
    pub fn apply(self, config: &mut GuildConfig, value: bool) {
        match self {
            Self::RequireReason => config.require_reason = value,
            Self::TrackNative => config.track_native = value,
            Self::NotifyOnExpiry => config.notify_on_expiry = value,
        }
    }

    /// Read the toggle's field.
    #[must_use]
    pub fn read(self, config: &GuildConfig) -> bool {
        match self {
            Self::RequireReason => config.require_reason,
            Self::TrackNative => config.track_native,
            Self::NotifyOnExpiry => config.notify_on_expiry,
        }
    }
}

/// Source of truth for guild configuration records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GuildConfigProvider: Send + Sync {
    /// Fetch a guild's configuration, defaulted when none exists yet.
    async fn fetch(&self, guild_id: u64) -> GuildConfig;

    /// Replace a guild's configuration.
    async fn put(&self, guild_id: u64, config: GuildConfig);
}

/// Read-through cache over a [`GuildConfigProvider`].
///
/// Passed explicitly into the components that need config access; there is
/// no process-global config state. `invalidate` drops a cached entry so the
/// next `get` re-fetches.
#[derive(Clone)]
pub struct GuildConfigCache {
    provider: Arc<dyn GuildConfigProvider>,
    cached: Arc<DashMap<u64, GuildConfig>>,
}

impl GuildConfigCache {
    /// Create a cache over a provider.
    pub fn new(provider: Arc<dyn GuildConfigProvider>) -> Self {
        Self {
            provider,
            cached: Arc::new(DashMap::new()),
        }
    }

    /// Get a guild's configuration, fetching on a cache miss.
    pub async fn get(&self, guild_id: u64) -> GuildConfig {
        if let Some(config) = self.cached.get(&guild_id) {
            return config.value().clone();
        }
        let config = self.provider.fetch(guild_id).await;
        self.cached.insert(guild_id, config.clone());
        config
    }

    /// Drop the cached entry for a guild.
    pub fn invalidate(&self, guild_id: u64) {
        self.cached.remove(&guild_id);
    }

    /// Write a guild's configuration through to the provider and refresh
    /// the cached copy.
    pub async fn update(&self, guild_id: u64, config: GuildConfig) {
        self.provider.put(guild_id, config.clone()).await;
        self.cached.insert(guild_id, config);
    }
}

/// Centralized data structure for the bot
#[derive(Clone)]
pub struct Data(pub Arc<DataInner>);

// Implement TypeMapKey for Data to allow storing it in Serenity's data map
impl TypeMapKey for Data {
    type Value = Data;
}

impl Default for Data {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("guild_configs", &self.guild_configs.len())
            .field("infractions", &self.infractions.len())
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

impl Deref for Data {
    type Target = DataInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Data {
    /// Create a new Data instance
    #[must_use]
    pub fn new() -> Self {
        Self(DataInner::new().into())
    }

    /// Load data from YAML files
    pub async fn load() -> Self {
        Self(Arc::new(DataInner::load().await))
    }

    /// Save data to YAML files
    /// # Errors
    /// This function will return an error if:
    /// - The data directory cannot be created
    /// - The records cannot be serialized to YAML
    /// - The YAML data cannot be written to disk
    pub async fn save(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.0.save().await
    }

    /// Get the guild configuration for a specific guild, defaulted when
    /// none exists yet.
    #[must_use]
    pub fn get_guild_config(&self, guild_id: u64) -> GuildConfig {
        self.0.guild_configs.get(&guild_id).map_or_else(
            || GuildConfig {
                guild_id,
                ..GuildConfig::default()
            },
            |entry| entry.value().clone(),
        )
    }

    /// Replace a guild's configuration.
    pub fn set_guild_config(&self, config: GuildConfig) {
        self.0.guild_configs.insert(config.guild_id, config);
    }
}

#[async_trait]
impl GuildConfigProvider for Data {
    async fn fetch(&self, guild_id: u64) -> GuildConfig {
        self.get_guild_config(guild_id)
    }

    async fn put(&self, guild_id: u64, mut config: GuildConfig) {
        config.guild_id = guild_id;
        self.set_guild_config(config);
        if let Err(e) = self.save().await {
            tracing::error!("Failed to save guild config: {e}");
        }
    }
}

#[async_trait]
impl crate::moderation::StatePersistence for Data {
    async fn persist(&self) {
        if let Err(e) = self.save().await {
            tracing::error!("Failed to persist stores: {e}");
        }
    }
}

/// Main centralized data structure for the bot
pub struct DataInner {
    // Map of guild_id -> guild configuration
    pub guild_configs: DashMap<u64, GuildConfig>,
    // Durable infraction history
    pub infractions: InfractionStore,
    // Pending reversal tasks
    pub tasks: TaskStore,
}

impl Default for DataInner {
    fn default() -> Self {
        Self::new()
    }
}

const CONFIG_FILE: &str = "data/guild_configs.yaml";
const INFRACTIONS_FILE: &str = "data/infractions.yaml";
const TASKS_FILE: &str = "data/tasks.yaml";
const DATA_DIR: &str = "data";

impl DataInner {
    // Create a new Data instance
    #[must_use]
    pub fn new() -> Self {
        Self {
            guild_configs: DashMap::new(),
            infractions: InfractionStore::new(),
            tasks: TaskStore::new(),
        }
    }

    /// Load data from YAML files
    ///
    /// Missing or unreadable files yield empty stores.
    pub async fn load() -> Self {
        let data = Self::new();

        if let Ok(file_content) = tokio::fs::read_to_string(CONFIG_FILE).await {
            if let Ok(configs) = serde_yaml::from_str::<Vec<GuildConfig>>(&file_content) {
                for config in configs {
                    data.guild_configs.insert(config.guild_id, config);
                }
            }
        }

        if let Ok(file_content) = tokio::fs::read_to_string(INFRACTIONS_FILE).await {
            if let Ok(records) = serde_yaml::from_str::<Vec<Infraction>>(&file_content) {
                data.infractions.restore(records);
            }
        }

        if let Ok(file_content) = tokio::fs::read_to_string(TASKS_FILE).await {
            if let Ok(tasks) = serde_yaml::from_str::<Vec<RevTask>>(&file_content) {
                data.tasks.restore(tasks);
            }
        }

        data
    }

    /// Save data to YAML files
    ///
    /// # Errors
    ///
    /// This function will return an error if:
    /// - The data directory cannot be created
    /// - The records cannot be serialized to YAML
    /// - The YAML data cannot be written to disk
    pub async fn save(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if !std::path::Path::new(DATA_DIR).exists() {
            tokio::fs::create_dir_all(DATA_DIR).await?;
        }

        let configs: Vec<GuildConfig> = self
            .guild_configs
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        tokio::fs::write(CONFIG_FILE, serde_yaml::to_string(&configs)?).await?;

        tokio::fs::write(
            INFRACTIONS_FILE,
            serde_yaml::to_string(&self.infractions.snapshot())?,
        )
        .await?;

        tokio::fs::write(TASKS_FILE, serde_yaml::to_string(&self.tasks.snapshot())?).await?;

        Ok(())
    }
}

/// Tests for the data module
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_new() {
        let data = Data::new();
        assert_eq!(data.guild_configs.len(), 0);
        assert!(data.infractions.is_empty());
        assert!(data.tasks.is_empty());
    }

    #[test]
    fn test_guild_config_default() {
        let config = GuildConfig::default();
        assert_eq!(config.guild_id, 0);
        assert!(config.default_mute_duration_ms.is_none());
        assert!(!config.require_reason);
        assert!(config.track_native);
        assert!(config.notify_on_expiry);
    }

    #[test]
    fn test_get_guild_config_defaults_to_guild_id() {
        let data = Data::new();
        let config = data.get_guild_config(12345);
        assert_eq!(config.guild_id, 12345);
    }

    #[test]
    fn test_config_toggle_round_trip() {
        let mut config = GuildConfig::default();
        for toggle in [
            ConfigToggle::RequireReason,
            ConfigToggle::TrackNative,
            ConfigToggle::NotifyOnExpiry,
        ] {
            toggle.apply(&mut config, true);
            assert!(toggle.read(&config));
            toggle.apply(&mut config, false);
            assert!(!toggle.read(&config));
        }
    }

    #[test]
    fn test_guild_config_serialization() {
        let config = GuildConfig {
            guild_id: 12345,
            default_mute_duration_ms: Some(3_600_000),
            require_reason: true,
            mod_role_id: Some(67890),
            log_channel_id: Some(54321),
            ..Default::default()
        };

        let serialized = serde_yaml::to_string(&config).expect("Failed to serialize");
        assert!(serialized.contains("guild_id: 12345"));
        assert!(serialized.contains("default_mute_duration_ms: 3600000"));
        assert!(serialized.contains("require_reason: true"));

        let deserialized: GuildConfig =
            serde_yaml::from_str(&serialized).expect("Failed to deserialize");
        assert_eq!(deserialized.guild_id, 12345);
        assert_eq!(deserialized.default_mute_duration_ms, Some(3_600_000));
        assert_eq!(deserialized.mod_role_id, Some(67890));
    }

    #[tokio::test]
    async fn test_cache_reads_through_and_invalidates() {
        let mut provider = MockGuildConfigProvider::new();
        provider
            .expect_fetch()
            .times(2)
            .returning(|guild_id| GuildConfig {
                guild_id,
                ..GuildConfig::default()
            });
        let cache = GuildConfigCache::new(Arc::new(provider));

        // First get fetches, second hits the cache
        let first = cache.get(10).await;
        let second = cache.get(10).await;
        assert_eq!(first.guild_id, second.guild_id);

        // Invalidate forces the second fetch expected above
        cache.invalidate(10);
        let _ = cache.get(10).await;
    }

    #[tokio::test]
    async fn test_cache_update_writes_through() {
        let mut provider = MockGuildConfigProvider::new();
        provider.expect_put().once().returning(|_, _| ());
        // fetch must never run: the updated copy stays cached
        provider.expect_fetch().never();
        let cache = GuildConfigCache::new(Arc::new(provider));

        let config = GuildConfig {
            guild_id: 10,
            require_reason: true,
            ..GuildConfig::default()
        };
        cache.update(10, config).await;

        assert!(cache.get(10).await.require_reason);
    }
}
