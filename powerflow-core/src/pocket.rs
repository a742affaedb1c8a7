use std::sync::Arc;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::backoff::RetryPolicy;
use crate::http::{ApiError, HttpClient};
use crate::rate_limit::RateLimiter;
use crate::recording::{ActionItem, OutlineNode, Recording, parse_timestamp};

pub const DEFAULT_POCKET_URL: &str = "https://public.heypocketai.com/api/v1";
pub const POCKET_WEB_URL: &str = "https://heypocket.com";

const LIST_PAGE_SIZE: u32 = 100;
const UNTITLED_ACTION: &str = "Untitled Action";

/// Client for the Pocket recordings API.
#[derive(Clone)]
pub struct PocketClient {
    http: HttpClient,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    data: T,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Default, Deserialize)]
struct Pagination {
    #[serde(default, alias = "hasMore")]
    has_more: bool,
}

/// Entry of the recordings listing. Details are fetched separately.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordingSummary {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "createdAt")]
    created_at: Option<String>,
}

/// A listed recording whose details could not be fetched. Callers keep it in
/// view so it is looked at again on the next run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailFailure {
    pub id: String,
    pub created_at: Option<OffsetDateTime>,
    pub error: String,
}

/// Hydrated recordings plus the ones whose detail fetch failed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedRecordings {
    pub recordings: Vec<Recording>,
    pub failures: Vec<DetailFailure>,
}

impl FetchedRecordings {
    pub fn is_empty(&self) -> bool {
        self.recordings.is_empty() && self.failures.is_empty()
    }
}

impl RecordingSummary {
    pub fn created_at(&self) -> Option<OffsetDateTime> {
        self.created_at.as_deref().and_then(parse_timestamp)
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawRecording {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, alias = "name")]
    title: Option<String>,
    #[serde(default, alias = "createdAt")]
    created_at: Option<String>,
    #[serde(default, alias = "durationSeconds")]
    duration: Option<Value>,
    #[serde(default)]
    tags: Vec<Value>,
    #[serde(default)]
    transcript: Option<Value>,
    #[serde(default)]
    summarizations: Option<Summarizations>,
}

#[derive(Debug, Default, Deserialize)]
struct Summarizations {
    #[serde(default)]
    v2_summary: Option<RawSummary>,
    #[serde(default)]
    v2_mind_map: Option<RawMindMap>,
    #[serde(default)]
    v2_action_items: Option<RawActions>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSummary {
    #[serde(default)]
    markdown: Option<String>,
    #[serde(default)]
    summary: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawMindMap {
    #[serde(default)]
    nodes: Vec<RawNode>,
}

#[derive(Debug, Deserialize)]
struct RawNode {
    #[serde(default)]
    node_id: Option<String>,
    #[serde(default)]
    parent_node_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawActions {
    #[serde(default)]
    actions: Vec<RawAction>,
}

#[derive(Debug, Deserialize)]
struct RawAction {
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default, alias = "dueDate")]
    due_date: Option<String>,
    #[serde(default)]
    assignee: Option<String>,
    #[serde(default)]
    context: Option<String>,
    #[serde(default, rename = "type")]
    item_type: Option<String>,
}

impl PocketClient {
    pub fn new(api_key: &str, limiter: Arc<RateLimiter>) -> Result<Self, ApiError> {
        Self::with_base_url(DEFAULT_POCKET_URL, api_key, limiter)
    }

    pub fn with_base_url(
        base_url: &str,
        api_key: &str,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {api_key}"))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        Ok(Self {
            http: HttpClient::new(base_url, headers, limiter, RetryPolicy::pocket())?,
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.http.set_retry_policy(retry);
        self
    }

    /// Lists every recording, following pagination when the API reports more.
    pub async fn list_recordings(&self) -> Result<Vec<RecordingSummary>, ApiError> {
        let mut all = Vec::new();
        let mut page = 1u32;
        loop {
            let mut query = vec![("limit", LIST_PAGE_SIZE.to_string())];
            if page > 1 {
                query.push(("page", page.to_string()));
            }
            let envelope: Envelope<Vec<RecordingSummary>> =
                self.http.get("public/recordings", &query).await?;
            let received = envelope.data.len();
            all.extend(envelope.data);
            let has_more = envelope.pagination.is_some_and(|p| p.has_more);
            if !has_more || received == 0 {
                break;
            }
            page += 1;
        }
        debug!(count = all.len(), "listed recordings");
        Ok(all)
    }

    pub async fn get_recording(&self, id: &str) -> Result<Option<Recording>, ApiError> {
        let path = format!("public/recordings/{id}");
        let envelope: Envelope<RawRecording> = self.http.get(&path, &[]).await?;
        Ok(convert_recording(envelope.data))
    }

    /// Recordings created strictly after `since` (all when `None`), with
    /// details. Listing entries without an id are ignored. A failed detail
    /// fetch is reported in `failures` and does not stop the others.
    pub async fn fetch_recordings(
        &self,
        since: Option<OffsetDateTime>,
    ) -> Result<FetchedRecordings, ApiError> {
        let listed = self.list_recordings().await?;
        let mut fetched = FetchedRecordings::default();
        let mut skipped = 0usize;

        for summary in &listed {
            let Some(id) = summary.id.as_deref().filter(|id| !id.is_empty()) else {
                continue;
            };
            if let (Some(since), Some(created)) = (since, summary.created_at()) {
                if created <= since {
                    skipped += 1;
                    continue;
                }
            }
            match self.get_recording(id).await {
                Ok(Some(recording)) => fetched.recordings.push(recording),
                Ok(None) => {}
                Err(err) => {
                    warn!(recording_id = id, error = %err, "failed to fetch recording details");
                    fetched.failures.push(DetailFailure {
                        id: id.to_string(),
                        created_at: summary.created_at(),
                        error: err.to_string(),
                    });
                }
            }
        }

        info!(
            listed = listed.len(),
            fetched = fetched.recordings.len(),
            skipped,
            failed = fetched.failures.len(),
            "fetched recordings"
        );
        Ok(fetched)
    }

    pub async fn test_connection(&self) -> Result<(), ApiError> {
        let _: Envelope<Vec<RecordingSummary>> = self
            .http
            .get("public/recordings", &[("limit", "1".to_string())])
            .await?;
        Ok(())
    }
}

pub fn recording_web_url(id: &str) -> String {
    format!("{POCKET_WEB_URL}/recordings/{id}")
}

fn convert_recording(raw: RawRecording) -> Option<Recording> {
    let id = raw.id.filter(|id| !id.is_empty())?;
    let summarizations = raw.summarizations.unwrap_or_default();

    let summary = summarizations
        .v2_summary
        .and_then(|s| non_empty(s.markdown).or_else(|| non_empty(s.summary)));

    let outline = summarizations
        .v2_mind_map
        .unwrap_or_default()
        .nodes
        .into_iter()
        .filter_map(|node| {
            Some(OutlineNode {
                node_id: node.node_id?,
                parent_node_id: node.parent_node_id,
                title: node.title.unwrap_or_else(|| "Untitled".to_string()),
            })
        })
        .collect();

    let action_items = summarizations
        .v2_action_items
        .unwrap_or_default()
        .actions
        .into_iter()
        .map(|action| ActionItem {
            label: non_empty(action.label).unwrap_or_else(|| UNTITLED_ACTION.to_string()),
            priority: non_empty(action.priority),
            due_date: action.due_date.as_deref().and_then(parse_timestamp),
            assignee: action.assignee,
            context: non_empty(action.context),
            item_type: action.item_type,
        })
        .collect();

    let tags = raw.tags.iter().filter_map(tag_name).collect();
    let transcript = raw
        .transcript
        .as_ref()
        .and_then(|t| t.get("text"))
        .and_then(Value::as_str)
        .map(str::to_string);

    Some(Recording {
        source_url: Some(recording_web_url(&id)),
        id,
        title: raw.title,
        summary,
        transcript,
        tags,
        action_items,
        outline,
        created_at: raw.created_at.as_deref().and_then(parse_timestamp),
        duration_seconds: raw.duration.as_ref().and_then(duration_seconds),
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn tag_name(value: &Value) -> Option<String> {
    let name = match value {
        Value::String(name) => Some(name.as_str()),
        Value::Object(map) => map
            .get("name")
            .and_then(Value::as_str)
            .or_else(|| map.get("label").and_then(Value::as_str)),
        _ => None,
    }?;
    (!name.trim().is_empty()).then(|| name.to_string())
}

fn duration_seconds(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| *f >= 0.0).map(|f| f as u64),
        _ => None,
    }
    .filter(|seconds| *seconds > 0)
}
