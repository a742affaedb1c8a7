#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntervalError {
    #[error("Invalid interval '{0}'. Examples: 5m, 15m, 1h, 30")]
    Invalid(String),
    #[error("Interval must be at least 1 minute")]
    TooShort,
    #[error("Interval must be at most 1440 minutes (24 hours)")]
    TooLong,
}

/// Accepts `Nm`, `Nh` or bare minutes, case-insensitive. Blank input means
/// the default interval.
pub fn parse_interval(input: &str) -> Result<u64, IntervalError> {
    let normalized = input.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        return Ok(DEFAULT_INTERVAL_MINUTES);
    }
    let (digits, factor) = if let Some(hours) = normalized.strip_suffix('h') {
        (hours, 60)
    } else if let Some(minutes) = normalized.strip_suffix('m') {
        (minutes, 1)
    } else {
        (normalized.as_str(), 1)
    };
    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|_| IntervalError::Invalid(input.trim().to_string()))?;
    let minutes = value.checked_mul(factor).ok_or(IntervalError::TooLong)?;
    if minutes < MIN_INTERVAL_MINUTES {
        return Err(IntervalError::TooShort);
    }
    if minutes > MAX_INTERVAL_MINUTES {
        return Err(IntervalError::TooLong);
    }
    Ok(minutes)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DaemonStatus {
    Running,
    Stopping,
    #[default]
    Stopped,
}

/// What one loop iteration produced, as persisted for `daemon status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CycleOutcome {
    Failed {
        error: String,
    },
    Completed {
        created: usize,
        skipped: usize,
        failed: usize,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        errors: Vec<String>,
    },
}

impl CycleOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        CycleOutcome::Failed {
            error: error.into(),
        }
    }

    /// Aborted runs are errors; per-record failures still count as a
    /// completed cycle.
    pub fn from_result(result: &SyncResult) -> Self {
        if result.is_aborted() {
            return CycleOutcome::failed(result.errors.join("; "));
        }
        let (errors, _) = result.errors_for_display(ERRORS_KEPT_IN_STATE);
        CycleOutcome::Completed {
            created: result.created,
            skipped: result.skipped,
            failed: result.failed,
            errors: errors.to_vec(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, CycleOutcome::Failed { .. })
    }
}

/// Persisted run state. Written after every iteration so status queries
/// never have to run the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonState {
    #[serde(default)]
    pub status: DaemonStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_minutes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<String>,
    #[serde(default)]
    pub last_sync: Option<String>,
    #[serde(default)]
    pub last_result: Option<CycleOutcome>,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_sync: Option<String>,
}

pub fn load_state(path: &Path) -> DaemonState {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %err, "failed to read daemon state");
            }
            return DaemonState::default();
        }
    };
    serde_json::from_str(&raw).unwrap_or_else(|err| {
        warn!(path = %path.display(), error = %err, "daemon state corrupted, ignoring");
        DaemonState::default()
    })
}

pub fn save_state(path: &Path, state: &DaemonState) -> anyhow::Result<()> {
    let json = serde_json::to_vec_pretty(state).context("failed to serialize daemon state")?;
    write_atomic(path, &json)
}

fn persist_state(path: &Path, state: &DaemonState) {
    if let Err(err) = save_state(path, state) {
        warn!(path = %path.display(), error = %format!("{err:#}"), "failed to write daemon state");
    }
}

/// The PID file that marks a live daemon.
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// PID of the live daemon, if any. A file naming a dead process (or
    /// holding garbage) is stale and removed.
    pub fn running_pid(&self) -> Option<i32> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        match raw.trim().parse::<i32>() {
            Ok(pid) if process_alive(pid) => Some(pid),
            _ => {
                debug!(path = %self.path.display(), "removing stale pid file");
                self.remove();
                None
            }
        }
    }

    /// Claims the file for this process. Fails while another instance lives.
    pub fn acquire(&self) -> anyhow::Result<PidGuard> {
        let own = std::process::id();
        if let Some(pid) = self.running_pid() {
            if u32::try_from(pid).ok() != Some(own) {
                anyhow::bail!("Daemon already running (PID: {pid})");
            }
        }
        write_atomic(&self.path, own.to_string().as_bytes())
            .context("failed to write pid file")?;
        Ok(PidGuard {
            file: self.clone(),
            pid: own,
        })
    }

    pub fn remove(&self) {
        match std::fs::remove_file(&self.path) {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), error = %err, "failed to remove pid file");
            }
            _ => {}
        }
    }
}

/// Removes the PID file on drop, unless another process has claimed it since.
#[derive(Debug)]
pub struct PidGuard {
    file: PidFile,
    pid: u32,
}

impl Drop for PidGuard {
    fn drop(&mut self) {
        let ours = std::fs::read_to_string(self.file.path())
            .ok()
            .and_then(|raw| raw.trim().parse::<u32>().ok())
            == Some(self.pid);
        if ours {
            self.file.remove();
        }
    }
}

pub fn send_signal(pid: i32, signal: libc::c_int) -> std::io::Result<()> {
    // SAFETY: kill(2) takes plain integers and touches no memory we own.
    let rc = unsafe { libc::kill(pid, signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// Signal 0 probes for existence. EPERM means the process exists but belongs
/// to someone else, which still counts as alive.
pub fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    match send_signal(pid, 0) {
        Ok(()) => true,
        Err(err) => err.raw_os_error() == Some(libc::EPERM),
    }
}
