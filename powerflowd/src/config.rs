use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use powerflow_core::parse_timestamp;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::warn;

const DEFAULT_DIR_NAME: &str = ".powerflow";
const CONFIG_FILE: &str = "config.json";
const PID_FILE: &str = "daemon.pid";
const STATE_FILE: &str = "daemon_state.json";
const LOG_FILE: &str = "daemon.log";

/// Locations of everything powerflow persists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPaths {
    pub dir: PathBuf,
    pub config_file: PathBuf,
    pub pid_file: PathBuf,
    pub state_file: PathBuf,
    pub log_file: PathBuf,
}

impl ConfigPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            config_file: dir.join(CONFIG_FILE),
            pid_file: dir.join(PID_FILE),
            state_file: dir.join(STATE_FILE),
            log_file: dir.join(LOG_FILE),
            dir,
        }
    }

    /// `$POWERFLOW_HOME` when set, else `~/.powerflow`.
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        let dir = std::env::var("POWERFLOW_HOME")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(|value| expand_with_home(value.trim(), &home))
            .unwrap_or_else(|| home.join(DEFAULT_DIR_NAME));
        Ok(Self::new(dir))
    }

    pub fn ensure_dir(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create config dir at {}", self.dir.display()))
    }
}

/// Which destination column each recording field is written to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyMap {
    pub title: String,
    #[serde(alias = "pocket_id")]
    pub dedup_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
}

impl Default for PropertyMap {
    fn default() -> Self {
        Self {
            title: "Name".to_string(),
            dedup_key: "Inbox ID".to_string(),
            priority: Some("Priority".to_string()),
            due_date: Some("Due Date".to_string()),
            context: Some("Context".to_string()),
            source_url: Some("Source".to_string()),
            tags: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotionSettings {
    #[serde(default)]
    pub database_id: Option<String>,
    #[serde(default)]
    pub database_name: Option<String>,
    #[serde(default)]
    pub property_map: PropertyMap,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PocketSettings {
    /// RFC 3339 watermark.
    #[serde(default)]
    pub last_sync: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pocket_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notion_api_key: Option<String>,
}

impl StoredCredentials {
    pub fn is_empty(&self) -> bool {
        self.pocket_api_key.is_none() && self.notion_api_key.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub notion: NotionSettings,
    #[serde(default)]
    pub pocket: PocketSettings,
    #[serde(default, skip_serializing_if = "StoredCredentials::is_empty")]
    pub credentials: StoredCredentials,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl Config {
    /// Missing files give defaults; so do unreadable or corrupt ones, with a
    /// warning.
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(config) => config,
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %format!("{err:#}"),
                    "config unusable, using defaults"
                );
                Self::default()
            }
        }
    }

    /// Like [`Config::load`] but only a missing file yields defaults. Use it
    /// before writing back, so a failed read never overwrites the file.
    pub fn try_load(path: &Path) -> anyhow::Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()));
            }
        };
        serde_json::from_str(&raw)
            .with_context(|| format!("{} is not valid config", path.display()))
    }

    pub fn save(&mut self, path: &Path) -> anyhow::Result<()> {
        if self.created_at.is_none() {
            self.created_at = Some(format_timestamp(OffsetDateTime::now_utc()));
        }
        let json = serde_json::to_vec_pretty(self).context("failed to serialize config")?;
        write_atomic(path, &json)
    }

    pub fn is_configured(&self) -> bool {
        self.notion
            .database_id
            .as_deref()
            .is_some_and(|id| !id.trim().is_empty())
    }

    pub fn last_sync(&self) -> Option<OffsetDateTime> {
        self.pocket.last_sync.as_deref().and_then(parse_timestamp)
    }

    pub fn set_last_sync(&mut self, at: OffsetDateTime) {
        self.pocket.last_sync = Some(format_timestamp(at));
    }
}

pub fn format_timestamp(at: OffsetDateTime) -> String {
    at.format(&Rfc3339)
        .unwrap_or_else(|_| at.unix_timestamp().to_string())
}

/// Writes through a sibling temp file and renames it into place, so readers
/// never observe a half-written file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let file_name = path
        .file_name()
        .with_context(|| format!("{} has no file name", path.display()))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(format!(".{}.tmp", std::process::id()));
    let tmp = path.with_file_name(tmp_name);

    let result = (|| -> anyhow::Result<()> {
        let mut file = create_private(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    })();
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result.with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(unix)]
fn create_private(path: &Path) -> std::io::Result<std::fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn create_private(path: &Path) -> std::io::Result<std::fs::File> {
    std::fs::File::create(path)
}

pub fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}
