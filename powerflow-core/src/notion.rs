use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use reqwest::Method;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::backoff::RetryPolicy;
use crate::blocks::Block;
use crate::http::{ApiError, HttpClient};
use crate::page::{Icon, NewPage, PropertyKind, PropertyValue};
use crate::rate_limit::RateLimiter;

pub const DEFAULT_NOTION_URL: &str = "https://api.notion.com/v1";
pub const NOTION_VERSION: &str = "2022-06-28";

/// Most filter clauses and child blocks a single request may carry.
pub const FILTER_CHUNK_SIZE: usize = 100;
const CHILDREN_PER_REQUEST: usize = 100;
const QUERY_PAGE_SIZE: u32 = 100;

#[derive(Clone)]
pub struct NotionClient {
    http: HttpClient,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSummary {
    pub id: String,
    pub title: String,
    pub emoji: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Database {
    pub id: String,
    #[serde(default)]
    pub title: Vec<PlainText>,
    #[serde(default)]
    pub icon: Option<Icon>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub properties: HashMap<String, PropertySchema>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlainText {
    #[serde(default)]
    pub plain_text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub kind: PropertyKind,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Page {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct Paginated<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    next_cursor: Option<String>,
}

/// Database query filter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryFilter {
    Or { or: Vec<QueryFilter> },
    RichTextEquals { property: String, rich_text: Equals },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Equals {
    pub equals: String,
}

impl QueryFilter {
    pub fn rich_text_equals(property: &str, value: &str) -> Self {
        QueryFilter::RichTextEquals {
            property: property.to_string(),
            rich_text: Equals {
                equals: value.to_string(),
            },
        }
    }

    pub fn any_rich_text_equals(property: &str, values: &[String]) -> Self {
        QueryFilter::Or {
            or: values
                .iter()
                .map(|value| Self::rich_text_equals(property, value))
                .collect(),
        }
    }
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    filter: SearchFilter,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_cursor: Option<&'a str>,
}

#[derive(Serialize)]
struct SearchFilter {
    property: &'static str,
    value: &'static str,
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<&'a QueryFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_cursor: Option<&'a str>,
}

#[derive(Serialize)]
struct CreatePageRequest<'a> {
    parent: Parent<'a>,
    properties: &'a HashMap<String, PropertyValue>,
    #[serde(skip_serializing_if = "<[Block]>::is_empty")]
    children: &'a [Block],
    #[serde(skip_serializing_if = "Option::is_none")]
    icon: Option<&'a Icon>,
}

#[derive(Serialize)]
struct Parent<'a> {
    database_id: &'a str,
}

#[derive(Serialize)]
struct AppendChildren<'a> {
    children: &'a [Block],
}

impl NotionClient {
    pub fn new(api_key: &str, limiter: Arc<RateLimiter>) -> Result<Self, ApiError> {
        Self::with_base_url(DEFAULT_NOTION_URL, api_key, limiter)
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
        headers.insert(
            HeaderName::from_static("notion-version"),
            HeaderValue::from_static(NOTION_VERSION),
        );
        Ok(Self {
            http: HttpClient::new(base_url, headers, limiter, RetryPolicy::notion())?,
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.http.set_retry_policy(retry);
        self
    }

    /// Every database shared with the integration.
    pub async fn search_databases(&self) -> Result<Vec<DatabaseSummary>, ApiError> {
        let mut databases = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let request = SearchRequest {
                filter: SearchFilter {
                    property: "object",
                    value: "database",
                },
                start_cursor: cursor.as_deref(),
            };
            let page: Paginated<Database> = self.http.send(Method::POST, "search", &request).await?;
            databases.extend(page.results.into_iter().map(DatabaseSummary::from));
            match next_cursor(page.has_more, page.next_cursor) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        debug!(count = databases.len(), "found databases");
        Ok(databases)
    }

    pub async fn get_database(&self, database_id: &str) -> Result<Database, ApiError> {
        self.http.get(&format!("databases/{database_id}"), &[]).await
    }

    pub async fn get_database_schema(
        &self,
        database_id: &str,
    ) -> Result<HashMap<String, PropertyKind>, ApiError> {
        let database = self.get_database(database_id).await?;
        Ok(database
            .properties
            .into_iter()
            .map(|(name, schema)| (name, schema.kind))
            .collect())
    }

    /// All pages matching `filter`, following cursors to the end.
    pub async fn query_database(
        &self,
        database_id: &str,
        filter: Option<&QueryFilter>,
    ) -> Result<Vec<Page>, ApiError> {
        let path = format!("databases/{database_id}/query");
        let mut pages = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let request = QueryRequest {
                page_size: QUERY_PAGE_SIZE,
                filter,
                start_cursor: cursor.as_deref(),
            };
            let page: Paginated<Page> = self.http.send(Method::POST, &path, &request).await?;
            pages.extend(page.results);
            match next_cursor(page.has_more, page.next_cursor) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(pages)
    }

    /// Which of `keys` already exist in `property`. Keys are checked in OR
    /// filters of at most [`FILTER_CHUNK_SIZE`] clauses; no request is made
    /// for an empty slice.
    pub async fn batch_check_existing(
        &self,
        database_id: &str,
        keys: &[String],
        property: &str,
    ) -> Result<HashSet<String>, ApiError> {
        let mut existing = HashSet::new();
        if keys.is_empty() {
            return Ok(existing);
        }
        for chunk in keys.chunks(FILTER_CHUNK_SIZE) {
            let filter = QueryFilter::any_rich_text_equals(property, chunk);
            for page in self.query_database(database_id, Some(&filter)).await? {
                if let Some(value) = page.property_text(property) {
                    existing.insert(value);
                }
            }
        }
        debug!(
            checked = keys.len(),
            existing = existing.len(),
            "checked existing records"
        );
        Ok(existing)
    }

    /// Creates a database row. Bodies over the per-request block limit are
    /// appended in follow-up requests.
    pub async fn create_page(&self, database_id: &str, page: &NewPage) -> Result<Page, ApiError> {
        let (first, rest) = page
            .children
            .split_at(page.children.len().min(CHILDREN_PER_REQUEST));
        let request = CreatePageRequest {
            parent: Parent { database_id },
            properties: &page.properties,
            children: first,
            icon: page.icon.as_ref(),
        };
        let created: Page = self.http.send(Method::POST, "pages", &request).await?;
        for chunk in rest.chunks(CHILDREN_PER_REQUEST) {
            let path = format!("blocks/{}/children", created.id);
            let _: Value = self
                .http
                .send(Method::PATCH, &path, &AppendChildren { children: chunk })
                .await?;
        }
        info!(page_id = %created.id, blocks = page.children.len(), "created page");
        Ok(created)
    }

    /// Adds a column. Kinds that cannot be created directly fall back to
    /// rich text.
    pub async fn create_property(
        &self,
        database_id: &str,
        name: &str,
        kind: PropertyKind,
    ) -> Result<(), ApiError> {
        let config = match kind.schema_config() {
            Some(config) => config,
            None => {
                warn!(
                    property = name,
                    kind = kind.as_str(),
                    "unsupported property type, creating rich_text instead"
                );
                PropertyKind::RichText
                    .schema_config()
                    .unwrap_or_else(|| Value::Object(Map::new()))
            }
        };
        let mut properties = Map::new();
        properties.insert(name.to_string(), config);
        let body = serde_json::json!({ "properties": properties });
        let _: Value = self
            .http
            .send(Method::PATCH, &format!("databases/{database_id}"), &body)
            .await?;
        info!(property = name, kind = kind.as_str(), "created database property");
        Ok(())
    }

    /// Creates whichever of `required` are missing; returns their names in
    /// the order given.
    pub async fn ensure_properties_exist(
        &self,
        database_id: &str,
        required: &[(String, PropertyKind)],
    ) -> Result<Vec<String>, ApiError> {
        let schema = self.get_database_schema(database_id).await?;
        let mut created = Vec::new();
        for (name, kind) in required {
            if schema.contains_key(name) || created.contains(name) {
                continue;
            }
            self.create_property(database_id, name, *kind).await?;
            created.push(name.clone());
        }
        Ok(created)
    }

    pub async fn test_connection(&self) -> Result<(), ApiError> {
        let request = SearchRequest {
            filter: SearchFilter {
                property: "object",
                value: "database",
            },
            start_cursor: None,
        };
        let _: Paginated<Value> = self.http.send(Method::POST, "search", &request).await?;
        Ok(())
    }
}

fn next_cursor(has_more: bool, next: Option<String>) -> Option<String> {
    if has_more { next.filter(|c| !c.is_empty()) } else { None }
}

impl Page {
    /// Concatenated plain text of a rich_text or title property.
    pub fn property_text(&self, name: &str) -> Option<String> {
        let property = self.properties.get(name)?;
        let runs = property
            .get("rich_text")
            .or_else(|| property.get("title"))?
            .as_array()?;
        let text: String = runs
            .iter()
            .filter_map(|run| {
                run.get("plain_text")
                    .or_else(|| run.get("text").and_then(|t| t.get("content")))
                    .and_then(Value::as_str)
            })
            .collect();
        (!text.is_empty()).then_some(text)
    }
}

impl From<Database> for DatabaseSummary {
    fn from(database: Database) -> Self {
        let title = database
            .title
            .first()
            .map(|t| t.plain_text.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Untitled".to_string());
        let emoji = database
            .icon
            .as_ref()
            .and_then(Icon::as_emoji)
            .unwrap_or("📄")
            .to_string();
        Self {
            id: database.id,
            title,
            emoji,
            url: database.url.unwrap_or_default(),
        }
    }
}
