use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::Weekday;
use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{JournalError, Result, RetryPolicy, Scene, SceneRouter};

/// Application configuration settings.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Root of the note vault
    pub vault_dir: PathBuf,

    /// Vault-relative directory holding the dated notes
    pub daily_subdir: String,

    /// Vault-relative directory holding attachments
    pub attachments_subdir: String,

    /// Vault-relative directory holding generated digests
    pub digests_subdir: String,

    /// Glob patterns (vault-relative) skipped while scanning notes
    pub ignore_globs: Vec<String>,

    /// How long a directory scan may be reused, in seconds
    pub cache_ttl_secs: u64,

    /// Watch the vault for external edits and drop the scan cache on change
    pub watch_vault: bool,

    /// Largest attachment stored, in bytes
    pub max_attachment_bytes: usize,

    /// Channel name pattern → scene; empty means the built-in mapping
    pub channels: BTreeMap<String, Scene>,

    /// Commit and push the vault after every write
    pub sync_enabled: bool,

    /// Remote pushed to by the sync step
    pub git_remote: String,

    /// Branch pushed by the sync step (current branch when unset)
    pub git_branch: Option<String>,

    /// Retry policy for transcription calls
    pub transcription_retry: RetryPolicy,

    /// Whether `serve` runs the scheduled jobs
    pub scheduler_enabled: bool,

    /// Day of the week the digest is generated
    pub digest_weekday: Weekday,

    /// Local hour the digest is generated
    pub digest_hour: u32,

    /// Local hour the reminder is sent
    pub reminder_hour: u32,

    /// Days of notes scanned for unresolved next actions
    pub reminder_lookback_days: i64,

    /// Channel receiving digest and reminder notifications
    pub notify_channel_id: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        let vault_dir = dirs::document_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("courtnotes-vault");

        Self {
            vault_dir,
            daily_subdir: "daily".to_string(),
            attachments_subdir: "attachments".to_string(),
            digests_subdir: "digests".to_string(),
            ignore_globs: vec![".obsidian/**".to_string(), "templates/**".to_string()],
            cache_ttl_secs: 60,
            watch_vault: false,
            max_attachment_bytes: 20 * 1024 * 1024,
            channels: BTreeMap::new(),
            sync_enabled: false,
            git_remote: "origin".to_string(),
            git_branch: None,
            transcription_retry: RetryPolicy::default(),
            scheduler_enabled: true,
            digest_weekday: Weekday::Sun,
            digest_hour: 21,
            reminder_hour: 20,
            reminder_lookback_days: 14,
            notify_channel_id: None,
        }
    }
}

impl Config {
    /// Config rooted at `vault_dir` with every other setting at its default.
    pub fn with_vault(vault_dir: impl Into<PathBuf>) -> Self {
        Self {
            vault_dir: vault_dir.into(),
            ..Self::default()
        }
    }

    pub fn daily_root(&self) -> PathBuf {
        self.vault_dir.join(&self.daily_subdir)
    }

    pub fn attachments_root(&self) -> PathBuf {
        self.vault_dir.join(&self.attachments_subdir)
    }

    pub fn digests_root(&self) -> PathBuf {
        self.vault_dir.join(&self.digests_subdir)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Router built from the configured channel table, or the built-in one.
    pub fn scene_router(&self) -> SceneRouter {
        if self.channels.is_empty() {
            SceneRouter::default()
        } else {
            SceneRouter::new(self.channels.iter().map(|(k, v)| (k.clone(), *v)))
        }
    }

    /// Default location of the config file for this platform.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "courtnotes").map(|dirs| dirs.config_dir().join("config.json"))
    }

    /// Loads the config file (when present), then applies environment
    /// overrides. `.env` in the working directory is read first.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        dotenv::dotenv().ok();

        let path = path.map(Path::to_path_buf).or_else(Config::default_path);
        let mut config = match &path {
            Some(p) if p.exists() => {
                debug!("Loading configuration from {}", p.display());
                let text = fs::read_to_string(p)?;
                serde_json::from_str(&text).map_err(|e| JournalError::ConfigError {
                    message: format!("invalid config file {}: {}", p.display(), e),
                })?
            }
            Some(p) => {
                info!("No config file at {}, using defaults", p.display());
                Config::default()
            }
            None => Config::default(),
        };

        config.apply_env(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `COURTNOTES_*` overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(vault) = lookup("COURTNOTES_VAULT") {
            self.vault_dir = PathBuf::from(vault);
        }
        if let Some(sync) = lookup("COURTNOTES_SYNC") {
            self.sync_enabled = parse_bool("COURTNOTES_SYNC", &sync)?;
        }
        if let Some(remote) = lookup("COURTNOTES_GIT_REMOTE") {
            self.git_remote = remote;
        }
        if let Some(ttl) = lookup("COURTNOTES_CACHE_TTL") {
            self.cache_ttl_secs = ttl.parse().map_err(|_| JournalError::ConfigError {
                message: format!("COURTNOTES_CACHE_TTL must be a number of seconds, got '{}'", ttl),
            })?;
        }
        if let Some(channel) = lookup("COURTNOTES_NOTIFY_CHANNEL") {
            self.notify_channel_id = Some(channel.parse().map_err(|_| JournalError::ConfigError {
                message: format!("COURTNOTES_NOTIFY_CHANNEL must be a channel id, got '{}'", channel),
            })?);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.digest_hour > 23 || self.reminder_hour > 23 {
            return Err(JournalError::ConfigError {
                message: "digest_hour and reminder_hour must be between 0 and 23".to_string(),
            });
        }
        if self.reminder_lookback_days < 1 {
            return Err(JournalError::ConfigError {
                message: "reminder_lookback_days must be at least 1".to_string(),
            });
        }
        if self.daily_subdir == self.digests_subdir {
            warn!("Digests share the daily note directory; digests will show up in searches");
        }
        Ok(())
    }

    /// Writes the config as pretty JSON, creating the parent directory.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|_| JournalError::DirectoryError {
                path: parent.to_path_buf(),
            })?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(JournalError::ConfigError {
            message: format!("{} must be a boolean, got '{}'", key, other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn env_overrides_file_values() {
        let vars: HashMap<&str, &str> = [
            ("COURTNOTES_VAULT", "/tmp/vault"),
            ("COURTNOTES_SYNC", "yes"),
            ("COURTNOTES_NOTIFY_CHANNEL", "1234"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.vault_dir, PathBuf::from("/tmp/vault"));
        assert!(config.sync_enabled);
        assert_eq!(config.notify_channel_id, Some(1234));
    }

    #[test]
    fn rejects_bad_env_values() {
        let mut config = Config::default();
        let err = config
            .apply_env(|key| (key == "COURTNOTES_SYNC").then(|| "maybe".to_string()))
            .unwrap_err();
        assert!(matches!(err, JournalError::ConfigError { .. }));
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{ "vault_dir": "/srv/vault", "channels": { "court-1": "match" } }"#,
        )
        .unwrap();

        let config = Config::load(Some(path.as_path())).unwrap();
        assert_eq!(config.daily_subdir, "daily");
        assert_eq!(config.cache_ttl_secs, 60);
        assert_eq!(config.scene_router().route("court-1"), Scene::Match);
        assert_eq!(config.scene_router().route("wall"), Scene::Unknown);
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config::with_vault(dir.path().join("vault"));
        config.save(&path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let loaded: Config = serde_json::from_str(&text).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn validates_hours() {
        let config = Config {
            digest_hour: 24,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
