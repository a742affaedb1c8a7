mod backoff;
mod blocks;
mod http;
mod notion;
mod page;
mod pocket;
mod rate_limit;
mod recording;

pub use backoff::{Backoff, RETRIABLE_STATUSES, RetryPolicy};
pub use blocks::{
    Annotations, Block, Color, RICH_TEXT_MAX_CHARS, RichText, markdown_to_blocks,
    parse_bold_segments,
};
pub use http::{ApiError, ApiErrorClass};
pub use notion::{
    DEFAULT_NOTION_URL, Database, DatabaseSummary, FILTER_CHUNK_SIZE, NOTION_VERSION,
    NotionClient, Page, QueryFilter,
};
pub use page::{Icon, NewPage, PropertyKind, PropertyValue, SelectOption};
pub use pocket::{
    DEFAULT_POCKET_URL, DetailFailure, FetchedRecordings, POCKET_WEB_URL, PocketClient,
    RecordingSummary, recording_web_url,
};
pub use rate_limit::RateLimiter;
pub use recording::{
    ActionItem, DEDUP_KEY_PREFIX, OutlineNode, Recording, dedup_key_for, parse_timestamp,
    truncate_with_ellipsis,
};
