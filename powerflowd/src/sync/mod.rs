pub mod engine;
pub mod ports;
pub mod render;
mod result;

use std::sync::Arc;

use anyhow::Context;
use powerflow_core::{NotionClient, PocketClient, RateLimiter};

pub use engine::{SyncEngine, SyncError};
pub use ports::{
    CreatedRecord, FileStateStore, NotionDestination, PocketSource, RecordDestination,
    RecordingSource, SyncStateStore,
};
pub use result::SyncResult;

use crate::config::ConfigPaths;
use crate::credentials::ApiKeys;

pub const POCKET_URL_ENV: &str = "POCKET_API_URL";
pub const NOTION_URL_ENV: &str = "NOTION_API_URL";

pub type LiveEngine = SyncEngine<PocketSource, NotionDestination, FileStateStore>;

/// One limiter per remote service, shared by every client talking to it.
#[derive(Debug, Clone)]
pub struct ClientLimiters {
    pub pocket: Arc<RateLimiter>,
    pub notion: Arc<RateLimiter>,
}

impl Default for ClientLimiters {
    fn default() -> Self {
        Self {
            pocket: Arc::new(RateLimiter::pocket()),
            notion: Arc::new(RateLimiter::notion()),
        }
    }
}

pub fn pocket_client(api_key: &str, limiters: &ClientLimiters) -> anyhow::Result<PocketClient> {
    let limiter = Arc::clone(&limiters.pocket);
    let client = match env_url(POCKET_URL_ENV) {
        Some(url) => PocketClient::with_base_url(&url, api_key, limiter),
        None => PocketClient::new(api_key, limiter),
    };
    client.context("failed to build Pocket client")
}

pub fn notion_client(api_key: &str, limiters: &ClientLimiters) -> anyhow::Result<NotionClient> {
    let limiter = Arc::clone(&limiters.notion);
    let client = match env_url(NOTION_URL_ENV) {
        Some(url) => NotionClient::with_base_url(&url, api_key, limiter),
        None => NotionClient::new(api_key, limiter),
    };
    client.context("failed to build Notion client")
}

/// Engine over the real clients and the config file in `paths`.
pub fn build_engine(
    paths: &ConfigPaths,
    keys: &ApiKeys,
    limiters: &ClientLimiters,
) -> anyhow::Result<LiveEngine> {
    let state = FileStateStore::load(paths.config_file.clone());
    let database_id = state.config().notion.database_id.clone();
    let dedup_property = state.config().notion.property_map.dedup_key.clone();
    let source = PocketSource::new(pocket_client(&keys.pocket, limiters)?);
    let destination = NotionDestination::new(
        notion_client(&keys.notion, limiters)?,
        database_id,
        dedup_property,
    );
    Ok(SyncEngine::new(source, destination, state))
}

fn env_url(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
