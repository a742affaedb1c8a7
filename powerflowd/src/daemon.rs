use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, ConfigPaths, format_timestamp, write_atomic};
use crate::credentials::CredentialChain;
use crate::notify::{DesktopNotifier, Notifier};
use crate::sync::{ClientLimiters, SyncResult, build_engine};

pub const DEFAULT_INTERVAL_MINUTES: u64 = 15;
pub const MIN_INTERVAL_MINUTES: u64 = 1;
pub const MAX_INTERVAL_MINUTES: u64 = 1440;
pub const RETRY_DELAY: Duration = Duration::from_secs(60);
pub const MAX_RETRIES: u32 = 2;
const ERRORS_KEPT_IN_STATE: usize = 3;
const STOP_POLL: Duration = Duration::from_millis(500);
const STOP_POLL_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaemonSettings {
    pub interval_minutes: u64,
    pub retry_delay: Duration,
    pub max_retries: u32,
}

impl DaemonSettings {
    pub fn new(interval_minutes: u64) -> Self {
        Self {
            interval_minutes,
            retry_delay: RETRY_DELAY,
            max_retries: MAX_RETRIES,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }

    /// A short retry while the failure streak is within budget, the full
    /// interval otherwise.
    pub fn delay_after(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures > 0 && consecutive_failures <= self.max_retries {
            self.retry_delay
        } else {
            self.interval()
        }
    }
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL_MINUTES)
    }
}

/// One sync attempt as the loop sees it. Never fails; problems come back as
/// [`CycleOutcome::Failed`].
#[async_trait]
pub trait CycleRunner: Send {
    async fn run_cycle(&mut self) -> CycleOutcome;
}

/// Re-reads config and keys every cycle, so a re-run of setup takes effect
/// without restarting the daemon.
pub struct LiveCycle {
    paths: ConfigPaths,
    limiters: ClientLimiters,
}

impl LiveCycle {
    pub fn new(paths: ConfigPaths) -> Self {
        Self {
            paths,
            limiters: ClientLimiters::default(),
        }
    }
}

#[async_trait]
impl CycleRunner for LiveCycle {
    async fn run_cycle(&mut self) -> CycleOutcome {
        let config = Config::load(&self.paths.config_file);
        let keys = match CredentialChain::non_interactive(&config).resolve_both() {
            Ok(keys) => keys,
            Err(err) => return CycleOutcome::failed(err.to_string()),
        };
        let mut engine = match build_engine(&self.paths, &keys, &self.limiters) {
            Ok(engine) => engine,
            Err(err) => return CycleOutcome::failed(format!("{err:#}")),
        };
        // A panic inside the engine becomes an error outcome instead of
        // taking the loop down.
        match tokio::spawn(async move { engine.sync(false).await }).await {
            Ok(result) => CycleOutcome::from_result(&result),
            Err(err) => CycleOutcome::failed(format!("sync task failed: {err}")),
        }
    }
}

/// Runs cycles until `shutdown` fires. Waits between cycles end as soon as
/// the token is cancelled; a cycle already in flight runs to completion.
pub async fn run_loop<R: CycleRunner>(
    runner: &mut R,
    notifier: &dyn Notifier,
    settings: &DaemonSettings,
    state_file: &Path,
    shutdown: &CancellationToken,
) {
    let mut state = DaemonState {
        status: DaemonStatus::Running,
        pid: Some(std::process::id()),
        interval_minutes: Some(settings.interval_minutes),
        started_at: Some(format_timestamp(OffsetDateTime::now_utc())),
        ..load_state(state_file)
    };
    state.stopped_at = None;
    persist_state(state_file, &state);

    let mut consecutive_failures = 0u32;
    while !shutdown.is_cancelled() {
        info!("starting sync cycle");
        let started = tokio::time::Instant::now();
        let outcome = runner.run_cycle().await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            CycleOutcome::Failed { error } => {
                consecutive_failures += 1;
                error!(error = %error, consecutive_failures, elapsed_ms, "sync cycle failed");
                if consecutive_failures <= settings.max_retries {
                    info!(
                        retry_in_secs = settings.retry_delay.as_secs(),
                        attempt = consecutive_failures,
                        max_retries = settings.max_retries,
                        "will retry soon"
                    );
                } else {
                    warn!("retry budget exhausted, waiting for the next interval");
                    if consecutive_failures == settings.max_retries + 1 {
                        notifier.notify(
                            "Power-Flow Sync Failed",
                            "Sync keeps failing. Run 'powerflow daemon status' for details.",
                        );
                    }
                }
            }
            CycleOutcome::Completed {
                created,
                skipped,
                failed,
                ..
            } => {
                consecutive_failures = 0;
                info!(created, skipped, failed, elapsed_ms, "sync cycle complete");
                if *created > 0 {
                    notifier.notify(
                        "Power-Flow Synced",
                        &format!("{created} new items added to Notion"),
                    );
                }
            }
        }

        let wait = settings.delay_after(consecutive_failures);
        let now = OffsetDateTime::now_utc();
        state.last_sync = Some(format_timestamp(now));
        state.last_result = Some(outcome);
        state.consecutive_failures = consecutive_failures;
        state.next_sync = Some(format_timestamp(now + wait));
        persist_state(state_file, &state);

        debug!(wait_secs = wait.as_secs(), "sleeping until next cycle");
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }
    }

    state.status = DaemonStatus::Stopping;
    state.next_sync = None;
    persist_state(state_file, &state);
}

/// Foreground daemon: claims the PID file, runs the loop until SIGTERM or
/// Ctrl+C, then removes the PID file and records the stopped state.
pub async fn run_daemon(paths: &ConfigPaths, settings: DaemonSettings) -> anyhow::Result<()> {
    paths.ensure_dir()?;
    let pid_guard = PidFile::new(&paths.pid_file).acquire()?;
    let shutdown = CancellationToken::new();
    let listener = spawn_shutdown_listener(shutdown.clone());

    info!(
        pid = std::process::id(),
        interval_minutes = settings.interval_minutes,
        "daemon started"
    );
    let notifier = DesktopNotifier;
    let mut runner = LiveCycle::new(paths.clone());
    run_loop(&mut runner, &notifier, &settings, &paths.state_file, &shutdown).await;

    listener.abort();
    drop(pid_guard);
    mark_stopped(&paths.state_file);
    info!("daemon stopped");
    Ok(())
}

fn mark_stopped(state_file: &Path) {
    let mut state = load_state(state_file);
    state.status = DaemonStatus::Stopped;
    state.pid = None;
    state.next_sync = None;
    state.stopped_at = Some(format_timestamp(OffsetDateTime::now_utc()));
    persist_state(state_file, &state);
}

/// Turns the first SIGTERM or Ctrl+C into a cancelled token.
pub fn spawn_shutdown_listener(shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        shutdown.cancel();
    })
}

async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            warn!(error = %err, "failed to install SIGTERM handler");
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
            return;
        }
    };
    tokio::select! {
        _ = terminate.recv() => info!("received SIGTERM, shutting down"),
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("received interrupt, shutting down"),
            Err(err) => {
                warn!(error = %err, "failed to listen for Ctrl+C");
                terminate.recv().await;
                info!("received SIGTERM, shutting down");
            }
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    AlreadyRunning(i32),
    Started(u32),
}

/// Re-executes this binary as `daemon run` in its own process group with
/// output appended to the log file.
pub fn start_background(
    paths: &ConfigPaths,
    interval_minutes: u64,
) -> anyhow::Result<StartOutcome> {
    use std::os::unix::process::CommandExt;

    if let Some(pid) = PidFile::new(&paths.pid_file).running_pid() {
        return Ok(StartOutcome::AlreadyRunning(pid));
    }
    paths.ensure_dir()?;
    let exe = std::env::current_exe().context("failed to locate the powerflow executable")?;
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&paths.log_file)
        .with_context(|| format!("failed to open {}", paths.log_file.display()))?;
    let log_err = log.try_clone().context("failed to duplicate log handle")?;

    let child = std::process::Command::new(exe)
        .args(["daemon", "run", "--interval", &interval_minutes.to_string()])
        .env("POWERFLOW_HOME", &paths.dir)
        .stdin(Stdio::null())
        .stdout(log)
        .stderr(log_err)
        .process_group(0)
        .spawn()
        .context("failed to spawn daemon process")?;
    info!(pid = child.id(), interval_minutes, "daemon spawned");
    Ok(StartOutcome::Started(child.id()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    Stopped(i32),
    Killed(i32),
}

pub async fn stop_daemon(paths: &ConfigPaths) -> anyhow::Result<StopOutcome> {
    let pid_file = PidFile::new(&paths.pid_file);
    stop_with(&pid_file, &paths.state_file, STOP_POLL, STOP_POLL_ATTEMPTS).await
}

/// SIGTERM, then poll for exit; SIGKILL if it is still around after
/// `attempts` polls. A daemon that did not shut down itself gets its state
/// file marked stopped here.
pub async fn stop_with(
    pid_file: &PidFile,
    state_file: &Path,
    poll: Duration,
    attempts: u32,
) -> anyhow::Result<StopOutcome> {
    let Some(pid) = pid_file.running_pid() else {
        return Ok(StopOutcome::NotRunning);
    };
    match send_signal(pid, libc::SIGTERM) {
        Ok(()) => info!(pid, "sent SIGTERM to daemon"),
        Err(err) if err.raw_os_error() == Some(libc::ESRCH) => {
            pid_file.remove();
            mark_stopped(state_file);
            return Ok(StopOutcome::NotRunning);
        }
        Err(err) if err.raw_os_error() == Some(libc::EPERM) => {
            anyhow::bail!("Permission denied. Try: sudo kill {pid}");
        }
        Err(err) => return Err(err).with_context(|| format!("failed to signal PID {pid}")),
    }

    for _ in 0..attempts {
        tokio::time::sleep(poll).await;
        if !process_alive(pid) {
            pid_file.remove();
            return Ok(StopOutcome::Stopped(pid));
        }
    }

    warn!(pid, "daemon ignored SIGTERM, sending SIGKILL");
    if let Err(err) = send_signal(pid, libc::SIGKILL) {
        debug!(pid, error = %err, "SIGKILL failed");
    }
    tokio::time::sleep(poll).await;
    pid_file.remove();
    mark_stopped(state_file);
    Ok(StopOutcome::Killed(pid))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonReport {
    pub running_pid: Option<i32>,
    pub state: DaemonState,
    pub log_file: PathBuf,
}

pub fn daemon_report(paths: &ConfigPaths) -> DaemonReport {
    DaemonReport {
        running_pid: PidFile::new(&paths.pid_file).running_pid(),
        state: load_state(&paths.state_file),
        log_file: paths.log_file.clone(),
    }
}

include!("daemon_helpers.rs");

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
