//! Expiry of archives written to disk.

use crate::error::{HarvestError, Result};
use chrono::{DateTime, Duration, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

const RETAINED_PREFIX: &str = "pdf_files_";
const RETAINED_SUFFIX: &str = ".zip";

/// `pdf_files_<uuid>.zip`
pub fn retained_file_name(id: Uuid) -> String {
    format!("{}{}{}", RETAINED_PREFIX, id, RETAINED_SUFFIX)
}

/// Whether `name` has the shape of [`retained_file_name`] output.
pub fn is_retained_name(name: &str) -> bool {
    name.strip_prefix(RETAINED_PREFIX)
        .and_then(|rest| rest.strip_suffix(RETAINED_SUFFIX))
        .is_some_and(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_hexdigit() || c == '-'))
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetainedArtifact {
    pub path: PathBuf,
    pub expires_at: DateTime<Utc>,
}

/// Owns archives handed over by the orchestrator and deletes them once expired.
pub trait RetentionPolicy: Send + Sync {
    /// Directory new archives are written into.
    fn directory(&self) -> &Path;

    /// Take ownership of `path`; returns when it will be deleted.
    fn retain(&self, path: PathBuf) -> Result<DateTime<Utc>>;

    /// Whether `path` is still live (tracked and not expired).
    fn is_live(&self, path: &Path) -> bool;

    /// Delete every expired artifact. Returns the paths removed.
    fn sweep(&self) -> Vec<PathBuf>;
}

pub struct DiskRetention {
    dir: PathBuf,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    tracked: Mutex<Vec<RetainedArtifact>>,
}

impl DiskRetention {
    /// Create the retention directory if needed.
    ///
    /// Archives already in the directory are adopted and expire `ttl` after their
    /// modification time.
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> io::Result<Self> {
        Self::with_clock(dir, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(
        dir: impl Into<PathBuf>,
        ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        info!("Retaining archives in {} for {}h", dir.display(), ttl.num_hours());

        let now = clock.now();
        let adopted = adopt_existing(&dir, ttl, now)?;
        if !adopted.is_empty() {
            info!("Adopted {} archives left in {}", adopted.len(), dir.display());
        }

        Ok(Self {
            dir,
            ttl,
            clock,
            tracked: Mutex::new(adopted),
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn tracked(&self) -> Vec<RetainedArtifact> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<RetainedArtifact>> {
        self.tracked.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RetentionPolicy for DiskRetention {
    fn directory(&self) -> &Path {
        &self.dir
    }

    fn retain(&self, path: PathBuf) -> Result<DateTime<Utc>> {
        let expires_at = self
            .clock
            .now()
            .checked_add_signed(self.ttl)
            .ok_or_else(|| {
                HarvestError::Unexpected(format!(
                    "expiry of {} overflows the calendar",
                    path.display()
                ))
            })?;
        debug!("Retaining {} until {}", path.display(), expires_at);
        let mut tracked = self.lock();
        tracked.retain(|a| a.path != path);
        tracked.push(RetainedArtifact { path, expires_at });
        Ok(expires_at)
    }

    fn is_live(&self, path: &Path) -> bool {
        let now = self.clock.now();
        self.lock()
            .iter()
            .any(|a| a.path == path && a.expires_at > now)
    }

    fn sweep(&self) -> Vec<PathBuf> {
        let now = self.clock.now();
        let expired: Vec<RetainedArtifact> = {
            let mut tracked = self.lock();
            let (expired, live) = tracked.drain(..).partition(|a| a.expires_at <= now);
            *tracked = live;
            expired
        };

        let mut removed = Vec::new();
        for artifact in expired {
            match fs::remove_file(&artifact.path) {
                Ok(()) => {
                    info!("Deleted expired archive {}", artifact.path.display());
                    removed.push(artifact.path);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    removed.push(artifact.path);
                }
                Err(e) => {
                    warn!("Failed to delete {}: {}", artifact.path.display(), e);
                    // try again on the next sweep
                    self.lock().push(artifact);
                }
            }
        }
        removed
    }
}

/// Track the retained archives found in `dir`.
fn adopt_existing(
    dir: &Path,
    ttl: Duration,
    now: DateTime<Utc>,
) -> io::Result<Vec<RetainedArtifact>> {
    let mut adopted = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if !name.to_str().is_some_and(is_retained_name) {
            continue;
        }
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let written = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or(now);
        let expires_at = written.checked_add_signed(ttl).unwrap_or(written);
        debug!("Adopting {} until {}", entry.path().display(), expires_at);
        adopted.push(RetainedArtifact {
            path: entry.path(),
            expires_at,
        });
    }
    Ok(adopted)
}

/// Run [`RetentionPolicy::sweep`] every `interval` until the task is aborted.
pub fn spawn_sweeper(
    policy: Arc<dyn RetentionPolicy>,
    interval: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = policy.sweep();
            if !removed.is_empty() {
                debug!("Sweep removed {} archives", removed.len());
            }
        }
    })
}
