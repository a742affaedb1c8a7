use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use powerflow_core::{FetchedRecordings, NewPage, NotionClient, PocketClient};
use time::OffsetDateTime;

use crate::config::{Config, PropertyMap};

/// Where recordings come from.
#[async_trait]
pub trait RecordingSource: Send + Sync {
    /// Recordings created after `since` (everything when `None`), hydrated
    /// with details, plus the listed ones whose details could not be read.
    async fn fetch_recordings(
        &self,
        since: Option<OffsetDateTime>,
    ) -> anyhow::Result<FetchedRecordings>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedRecord {
    pub id: String,
    pub url: Option<String>,
}

/// Where recordings are written.
#[async_trait]
pub trait RecordDestination: Send + Sync {
    /// The subset of `keys` already present. Must not touch the network for
    /// an empty slice.
    async fn batch_check_existing(&self, keys: &[String]) -> anyhow::Result<HashSet<String>>;

    async fn create_record(&self, page: NewPage) -> anyhow::Result<CreatedRecord>;
}

/// Configuration and watermark as the engine sees them.
pub trait SyncStateStore: Send + Sync {
    fn is_configured(&self) -> bool;
    fn property_map(&self) -> PropertyMap;
    fn last_sync(&self) -> Option<OffsetDateTime>;
    fn record_sync(&mut self, at: OffsetDateTime) -> anyhow::Result<()>;
}

pub struct PocketSource {
    client: PocketClient,
}

impl PocketSource {
    pub fn new(client: PocketClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RecordingSource for PocketSource {
    async fn fetch_recordings(
        &self,
        since: Option<OffsetDateTime>,
    ) -> anyhow::Result<FetchedRecordings> {
        Ok(self.client.fetch_recordings(since).await?)
    }
}

pub struct NotionDestination {
    client: NotionClient,
    database_id: Option<String>,
    dedup_property: String,
}

impl NotionDestination {
    pub fn new(client: NotionClient, database_id: Option<String>, dedup_property: String) -> Self {
        Self {
            client,
            database_id,
            dedup_property,
        }
    }

    fn database_id(&self) -> anyhow::Result<&str> {
        self.database_id
            .as_deref()
            .context("no Notion database selected")
    }
}

#[async_trait]
impl RecordDestination for NotionDestination {
    async fn batch_check_existing(&self, keys: &[String]) -> anyhow::Result<HashSet<String>> {
        if keys.is_empty() {
            return Ok(HashSet::new());
        }
        let database_id = self.database_id()?;
        Ok(self
            .client
            .batch_check_existing(database_id, keys, &self.dedup_property)
            .await?)
    }

    async fn create_record(&self, page: NewPage) -> anyhow::Result<CreatedRecord> {
        let database_id = self.database_id()?;
        let created = self.client.create_page(database_id, &page).await?;
        Ok(CreatedRecord {
            id: created.id,
            url: created.url,
        })
    }
}

/// Config file backed state. The watermark write re-reads the file first so
/// concurrent edits (a re-run of setup, say) are not clobbered.
pub struct FileStateStore {
    path: PathBuf,
    config: Config,
}

impl FileStateStore {
    pub fn load(path: PathBuf) -> Self {
        let config = Config::load(&path);
        Self { path, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl SyncStateStore for FileStateStore {
    fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    fn property_map(&self) -> PropertyMap {
        self.config.notion.property_map.clone()
    }

    fn last_sync(&self) -> Option<OffsetDateTime> {
        self.config.last_sync()
    }

    fn record_sync(&mut self, at: OffsetDateTime) -> anyhow::Result<()> {
        let mut fresh = Config::try_load(&self.path)?;
        fresh.set_last_sync(at);
        fresh.save(&self.path)?;
        self.config = fresh;
        Ok(())
    }
}
