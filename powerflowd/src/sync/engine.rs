use std::collections::HashSet;
use std::time::Duration;

use powerflow_core::{FetchedRecordings, Recording};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::ports::{RecordDestination, RecordingSource, SyncStateStore};
use super::render::render_page;
use super::result::SyncResult;

/// Ways a run can fail. The first three stop the run; `Detail` and `Record`
/// are isolated to one recording.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Not configured. Run 'powerflow setup' first.")]
    NotConfigured,
    #[error("Failed to fetch recordings: {0:#}")]
    Fetch(anyhow::Error),
    #[error("Failed to check existing records: {0:#}")]
    DedupCheck(anyhow::Error),
    #[error("Failed to fetch recording '{id}': {error}")]
    Detail { id: String, error: String },
    #[error("Failed to sync '{title}': {error:#}")]
    Record { title: String, error: anyhow::Error },
}

pub type Clock = fn() -> OffsetDateTime;

/// One-directional, create-only sync from a recording source into a
/// destination database.
pub struct SyncEngine<S, D, C> {
    source: S,
    destination: D,
    state: C,
    clock: Clock,
}

impl<S, D, C> SyncEngine<S, D, C>
where
    S: RecordingSource,
    D: RecordDestination,
    C: SyncStateStore,
{
    pub fn new(source: S, destination: D, state: C) -> Self {
        Self {
            source,
            destination,
            state,
            clock: OffsetDateTime::now_utc,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> &C {
        &self.state
    }

    pub fn destination(&self) -> &D {
        &self.destination
    }

    pub async fn sync(&mut self, dry_run: bool) -> SyncResult {
        if !self.state.is_configured() {
            return SyncResult::aborted(SyncError::NotConfigured.to_string());
        }

        let since = self.state.last_sync();
        debug!(since = ?since, dry_run, "starting sync");
        let fetched = match self.source.fetch_recordings(since).await {
            Ok(fetched) => fetched,
            Err(err) => {
                let err = SyncError::Fetch(err);
                warn!(error = %err, "sync aborted");
                return SyncResult::aborted(err.to_string());
            }
        };
        if fetched.is_empty() {
            debug!("nothing new upstream");
            return SyncResult::default();
        }
        let FetchedRecordings {
            recordings,
            failures,
        } = fetched;

        let mut result = SyncResult::default();
        for failure in &failures {
            let err = SyncError::Detail {
                id: failure.id.clone(),
                error: failure.error.clone(),
            };
            result.failed += 1;
            result.errors.push(err.to_string());
        }
        let (ready, not_ready): (Vec<&Recording>, Vec<&Recording>) =
            recordings.iter().partition(|rec| rec.is_ready());
        result.pending = not_ready.len();
        for rec in &not_ready {
            debug!(recording_id = %rec.id, "recording not processed yet, leaving pending");
        }

        let existing = if ready.is_empty() {
            HashSet::new()
        } else {
            let keys = unique_keys(&ready);
            match self.destination.batch_check_existing(&keys).await {
                Ok(existing) => existing,
                Err(err) => {
                    let err = SyncError::DedupCheck(err);
                    warn!(error = %err, "sync aborted");
                    return SyncResult::aborted(err.to_string());
                }
            }
        };

        let property_map = self.state.property_map();
        let mut handled = HashSet::new();
        let mut failed_records: Vec<&Recording> = Vec::new();
        for rec in ready {
            let key = rec.dedup_key();
            if existing.contains(&key) || !handled.insert(key) {
                result.skipped += 1;
                continue;
            }
            if dry_run {
                result.created += 1;
                continue;
            }
            let page = render_page(rec, &property_map);
            match self.destination.create_record(page).await {
                Ok(created) => {
                    info!(recording_id = %rec.id, page_id = %created.id, "created record");
                    result.created += 1;
                }
                Err(error) => {
                    let err = SyncError::Record {
                        title: rec.display_title(),
                        error,
                    };
                    warn!(recording_id = %rec.id, error = %err, "record failed");
                    result.failed += 1;
                    result.errors.push(err.to_string());
                    failed_records.push(rec);
                }
            }
        }

        if !dry_run && (result.created > 0 || result.skipped > 0) {
            let now = (self.clock)();
            let retry = not_ready
                .iter()
                .chain(&failed_records)
                .map(|rec| rec.created_at)
                .chain(failures.iter().map(|failure| failure.created_at));
            let watermark = next_watermark(now, since, retry);
            if let Err(err) = self.state.record_sync(watermark) {
                warn!(error = %format!("{err:#}"), "failed to persist sync watermark");
                result
                    .errors
                    .push(format!("Failed to save sync state: {err:#}"));
            }
        }

        info!(
            created = result.created,
            skipped = result.skipped,
            pending = result.pending,
            failed = result.failed,
            dry_run,
            "sync finished"
        );
        result
    }

    /// How many ready recordings a sync would create right now. Falls back to
    /// the pre-dedup count when the existence check fails.
    pub async fn pending_count(&self) -> Result<usize, SyncError> {
        if !self.state.is_configured() {
            return Err(SyncError::NotConfigured);
        }
        let fetched = self
            .source
            .fetch_recordings(self.state.last_sync())
            .await
            .map_err(SyncError::Fetch)?;
        let ready: Vec<&Recording> = fetched
            .recordings
            .iter()
            .filter(|rec| rec.is_ready())
            .collect();
        if ready.is_empty() {
            return Ok(0);
        }
        let keys = unique_keys(&ready);
        match self.destination.batch_check_existing(&keys).await {
            Ok(existing) => Ok(keys.iter().filter(|key| !existing.contains(*key)).count()),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "existence check failed, counting all as new");
                Ok(keys.len())
            }
        }
    }
}

fn unique_keys(records: &[&Recording]) -> Vec<String> {
    let mut seen = HashSet::new();
    records
        .iter()
        .map(|rec| rec.dedup_key())
        .filter(|key| seen.insert(key.clone()))
        .collect()
}

/// Advances to `now`, but never past a recording that still needs another
/// look: the watermark stops just short of the oldest pending or failed
/// `created_at`. It never moves backwards.
fn next_watermark(
    now: OffsetDateTime,
    previous: Option<OffsetDateTime>,
    retry: impl Iterator<Item = Option<OffsetDateTime>>,
) -> OffsetDateTime {
    let oldest_retry = retry.flatten().min();
    let mut watermark = match oldest_retry {
        Some(oldest) => now.min(oldest - Duration::from_millis(1)),
        None => now,
    };
    if let Some(previous) = previous {
        watermark = watermark.max(previous);
    }
    watermark
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
