//! Registry of ephemeral sessions, keyed by session id.
//!
//! The store replaces coordination through bare file timestamps with an
//! in-memory entry per session. Each entry holds the session's creation and
//! last-touch times and an async mutex that serializes engine runs against
//! the session's block files. The files themselves stay on disk and are
//! named by [`ArtifactLayout`].
//!
//! # Thread Safety
//!
//! The entry map sits behind an `RwLock`:
//! - Liveness checks and lookups take the read lock
//! - Allocation, release and sweeps take the write lock, and do their file
//!   work while holding it, so a sweep never deletes a marker that a
//!   concurrent allocation has just written
//!
//! # Invariants
//!
//! - `allocate` never hands out an id that is live, recently touched, or busy
//! - `last_touched_ms` of an entry only ever increases
//! - Every entry in the map has a marker file on disk

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::OwnedMutexGuard;

use super::{ArtifactLayout, SessionId};
use crate::time::{TimeSource, ms_from_system_time, system_time_from_ms};

/// Session lifetime settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// A session untouched for longer than this is expired.
    pub ttl_secs: u64,
    /// An id untouched for at most this long is never reallocated.
    ///
    /// Independent from `ttl_secs`; allocation honours whichever is stricter.
    pub id_reuse_after_secs: u64,
    /// Ids are drawn uniformly from this range.
    pub id_range: RangeInclusive<u32>,
    /// Number of candidates sampled before giving up.
    pub allocation_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 1197,
            id_reuse_after_secs: 1200,
            id_range: 10..=25,
            allocation_attempts: 32,
        }
    }
}

/// Error returned by session store operations.
#[derive(Debug)]
pub enum SessionStoreError {
    /// The entry map lock was poisoned.
    LockPoisoned,
    /// No free id was found within the configured number of attempts.
    Exhausted { attempts: u32 },
    /// The session is not live.
    NotLive(SessionId),
    /// The store configuration is unusable.
    InvalidConfig(String),
    /// An artifact could not be written or removed.
    Io(io::Error),
}

impl std::fmt::Display for SessionStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LockPoisoned => write!(f, "session store lock poisoned"),
            Self::Exhausted { attempts } => {
                write!(f, "no free session id after {attempts} attempts")
            }
            Self::NotLive(id) => write!(f, "session {id} is not live"),
            Self::InvalidConfig(reason) => write!(f, "invalid session configuration: {reason}"),
            Self::Io(e) => write!(f, "session artifact I/O error: {e}"),
        }
    }
}

impl std::error::Error for SessionStoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SessionStoreError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

struct SessionEntry {
    created_ms: u64,
    last_touched_ms: AtomicU64,
    operation: Arc<tokio::sync::Mutex<()>>,
}

impl SessionEntry {
    fn last_touched_ms(&self) -> u64 {
        self.last_touched_ms.load(Ordering::SeqCst)
    }

    fn is_busy(&self) -> bool {
        self.operation.try_lock().is_err()
    }
}

/// Exclusive right to operate on one session's artifacts.
///
/// Dropping the guard lets the next queued operation on the session run.
#[derive(Debug)]
pub struct SessionGuard {
    id: SessionId,
    created_ms: u64,
    _permit: OwnedMutexGuard<()>,
}

impl SessionGuard {
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Creation time of the session this guard was taken on.
    #[must_use]
    pub const fn created_ms(&self) -> u64 {
        self.created_ms
    }
}

/// Counts reported by [`SessionStore::sweep`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired sessions dropped together with their artifacts.
    pub sessions_removed: usize,
    /// Stale files removed that belonged to no known session.
    pub orphan_files_removed: usize,
}

/// Registry of ephemeral sessions.
pub struct SessionStore {
    entries: RwLock<HashMap<SessionId, Arc<SessionEntry>>>,
    layout: ArtifactLayout,
    config: SessionConfig,
    time: Arc<dyn TimeSource>,
    rng: Mutex<StdRng>,
}

impl SessionStore {
    /// Open a store over `layout`, creating its directory if needed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for an empty id range, a range containing zero
    /// or zero allocation attempts, and an I/O error if the artifact
    /// directory cannot be created.
    pub fn open(
        layout: ArtifactLayout,
        config: SessionConfig,
        time: Arc<dyn TimeSource>,
    ) -> Result<Self, SessionStoreError> {
        Self::open_with_rng(layout, config, time, StdRng::from_os_rng())
    }

    /// Open a store whose id sampling is reproducible.
    pub fn open_seeded(
        layout: ArtifactLayout,
        config: SessionConfig,
        time: Arc<dyn TimeSource>,
        seed: u64,
    ) -> Result<Self, SessionStoreError> {
        Self::open_with_rng(layout, config, time, StdRng::seed_from_u64(seed))
    }

    fn open_with_rng(
        layout: ArtifactLayout,
        config: SessionConfig,
        time: Arc<dyn TimeSource>,
        rng: StdRng,
    ) -> Result<Self, SessionStoreError> {
        if config.id_range.is_empty() || *config.id_range.start() == 0 {
            return Err(SessionStoreError::InvalidConfig(format!(
                "id range {}..={} must be non-empty and exclude zero",
                config.id_range.start(),
                config.id_range.end()
            )));
        }
        if config.allocation_attempts == 0 {
            return Err(SessionStoreError::InvalidConfig(
                "allocation attempts must be at least 1".to_string(),
            ));
        }
        std::fs::create_dir_all(layout.directory())?;

        Ok(Self {
            entries: RwLock::new(HashMap::new()),
            layout,
            config,
            time,
            rng: Mutex::new(rng),
        })
    }

    #[must_use]
    pub const fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Allocate a fresh session id and reserve it.
    ///
    /// Samples candidates from the id range and skips any that are live,
    /// were touched within the reuse threshold (in memory or, for ids left
    /// behind by an earlier process, by marker mtime), or have an operation
    /// in flight. The winner's marker is written with the current time and
    /// the returned guard already holds its operation lock.
    ///
    /// # Errors
    ///
    /// Returns `Exhausted` if every sampled candidate was taken, or an I/O
    /// error if the marker could not be written.
    #[allow(clippy::significant_drop_tightening)] // The map stays locked while the marker is written
    pub fn allocate(&self) -> Result<SessionGuard, SessionStoreError> {
        let now = self.time.now_ms();
        let mut entries = self
            .entries
            .write()
            .map_err(|_| SessionStoreError::LockPoisoned)?;
        let mut rng = self.rng.lock().map_err(|_| SessionStoreError::LockPoisoned)?;

        for _ in 0..self.config.allocation_attempts {
            let raw = rng.random_range(self.config.id_range.clone());
            let Some(candidate) = SessionId::new(raw) else {
                continue;
            };

            let taken = match entries.get(&candidate) {
                Some(entry) => {
                    self.entry_is_live(entry, now)
                        || !self.reusable(entry.last_touched_ms(), now)
                        || entry.is_busy()
                }
                None => self
                    .marker_touched_ms(candidate)
                    .is_some_and(|touched| !self.reusable(touched, now)),
            };
            if taken {
                tracing::debug!("session id {candidate} is taken, resampling");
                continue;
            }

            self.write_marker(candidate, now)?;
            let entry = Arc::new(SessionEntry {
                created_ms: now,
                last_touched_ms: AtomicU64::new(now),
                operation: Arc::new(tokio::sync::Mutex::new(())),
            });
            // A brand-new mutex is always free.
            let Ok(permit) = Arc::clone(&entry.operation).try_lock_owned() else {
                return Err(SessionStoreError::LockPoisoned);
            };
            entries.insert(candidate, entry);

            tracing::info!("allocated session {candidate}");
            return Ok(SessionGuard {
                id: candidate,
                created_ms: now,
                _permit: permit,
            });
        }

        tracing::warn!(
            "session id allocation exhausted after {} attempts",
            self.config.allocation_attempts
        );
        Err(SessionStoreError::Exhausted {
            attempts: self.config.allocation_attempts,
        })
    }

    /// Whether the session has a marker and was touched within the TTL.
    #[must_use]
    pub fn is_live(&self, id: SessionId) -> bool {
        let now = self.time.now_ms();
        self.entry(id)
            .is_some_and(|entry| self.entry_is_live(&entry, now))
            && self.layout.marker(id).exists()
    }

    /// Reset the session's last-touch time to now.
    ///
    /// The new time is strictly greater than the previous one, even if the
    /// clock has not moved.
    ///
    /// # Errors
    ///
    /// Returns `NotLive` if the session is not live, or an I/O error if the
    /// marker mtime could not be updated.
    pub fn touch(&self, id: SessionId) -> Result<u64, SessionStoreError> {
        if !self.is_live(id) {
            return Err(SessionStoreError::NotLive(id));
        }
        let Some(entry) = self.entry(id) else {
            return Err(SessionStoreError::NotLive(id));
        };
        self.touch_entry(id, &entry)
    }

    /// Reset the last-touch time of the session `guard` holds, even if its
    /// TTL ran out while the guard was held.
    ///
    /// A held session is busy, so its id cannot have been reallocated or
    /// swept in the meantime. Used to record an operation that has already
    /// committed.
    ///
    /// # Errors
    ///
    /// Returns `NotLive` if the id now belongs to a different session, or an
    /// I/O error if the marker mtime could not be updated.
    pub fn renew(&self, guard: &SessionGuard) -> Result<u64, SessionStoreError> {
        let id = guard.id();
        let entry = self
            .entry(id)
            .filter(|entry| entry.created_ms == guard.created_ms())
            .ok_or(SessionStoreError::NotLive(id))?;
        self.touch_entry(id, &entry)
    }

    fn touch_entry(&self, id: SessionId, entry: &SessionEntry) -> Result<u64, SessionStoreError> {
        let now = self.time.now_ms();
        let previous = entry
            .last_touched_ms
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            .unwrap_or(now);
        let touched = now.max(previous.saturating_add(1));

        File::options()
            .write(true)
            .open(self.layout.marker(id))?
            .set_modified(system_time_from_ms(touched))?;

        Ok(touched)
    }

    /// Whether the leaf-block artifact exists for the session.
    #[must_use]
    pub fn has_built_tree(&self, id: SessionId) -> bool {
        self.layout.leaf_blocks(id).exists()
    }

    /// Remove the session's block, input and staging artifacts.
    ///
    /// The marker is kept. Missing files are not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing artifact cannot be removed.
    pub fn clear_artifacts(&self, id: SessionId) -> Result<(), SessionStoreError> {
        for path in self.layout.data_artifacts(id) {
            remove_if_exists(&path)?;
        }
        Ok(())
    }

    /// Drop the session and remove every artifact including the marker.
    ///
    /// Used when a fresh build fails after its id was reserved.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned or a file cannot be removed.
    pub fn release(&self, id: SessionId) -> Result<(), SessionStoreError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| SessionStoreError::LockPoisoned)?;
        entries.remove(&id);
        self.remove_all_artifacts(id)?;
        drop(entries);

        tracing::info!("released session {id}");
        Ok(())
    }

    /// Wait for exclusive access to the session's artifacts.
    ///
    /// Returns `None` if the session is unknown. Callers must re-check
    /// liveness after acquiring the guard.
    pub async fn lock(&self, id: SessionId) -> Option<SessionGuard> {
        let entry = self.entry(id)?;
        let permit = Arc::clone(&entry.operation).lock_owned().await;
        Some(SessionGuard {
            id,
            created_ms: entry.created_ms,
            _permit: permit,
        })
    }

    /// Creation time of the session currently holding `id`.
    #[must_use]
    pub fn created_at(&self, id: SessionId) -> Option<u64> {
        self.entry(id).map(|entry| entry.created_ms)
    }

    /// Last-touch time of the session currently holding `id`.
    #[must_use]
    pub fn last_touched_at(&self, id: SessionId) -> Option<u64> {
        self.entry(id).map(|entry| entry.last_touched_ms())
    }

    /// Reclaim sessions expired for longer than `grace_multiple` TTLs.
    ///
    /// Busy sessions are skipped. Files in the artifact directory that belong
    /// to no known session and are older than the same window are removed
    /// too; these are left behind by an earlier process.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned or the directory cannot be read.
    pub fn sweep(&self, grace_multiple: u64) -> Result<SweepReport, SessionStoreError> {
        let now = self.time.now_ms();
        let window_ms = self
            .config
            .ttl_secs
            .saturating_mul(grace_multiple.max(1))
            .saturating_mul(1000);
        let mut report = SweepReport::default();

        let mut entries = self
            .entries
            .write()
            .map_err(|_| SessionStoreError::LockPoisoned)?;

        let expired: Vec<SessionId> = entries
            .iter()
            .filter(|(_, entry)| {
                now.saturating_sub(entry.last_touched_ms()) > window_ms && !entry.is_busy()
            })
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            entries.remove(&id);
            if let Err(e) = self.remove_all_artifacts(id) {
                tracing::warn!("failed to remove artifacts of expired session {id}: {e}");
            }
            report.sessions_removed += 1;
        }

        for dir_entry in std::fs::read_dir(self.layout.directory())? {
            let dir_entry = dir_entry?;
            let file_name = dir_entry.file_name();
            let Some(id) = file_name.to_str().and_then(ArtifactLayout::session_of) else {
                continue;
            };
            if entries.contains_key(&id) {
                continue;
            }
            let Ok(modified) = dir_entry.metadata().and_then(|m| m.modified()) else {
                continue;
            };
            if now.saturating_sub(ms_from_system_time(modified)) > window_ms {
                match std::fs::remove_file(dir_entry.path()) {
                    Ok(()) => report.orphan_files_removed += 1,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => tracing::warn!(
                        "failed to remove orphan artifact {}: {e}",
                        dir_entry.path().display()
                    ),
                }
            }
        }
        drop(entries);

        Ok(report)
    }

    fn entry(&self, id: SessionId) -> Option<Arc<SessionEntry>> {
        let entries = self.entries.read().ok()?;
        entries.get(&id).map(Arc::clone)
    }

    fn ttl_ms(&self) -> u64 {
        self.config.ttl_secs.saturating_mul(1000)
    }

    fn entry_is_live(&self, entry: &SessionEntry, now: u64) -> bool {
        now.saturating_sub(entry.last_touched_ms()) <= self.ttl_ms()
    }

    fn reusable(&self, last_touched_ms: u64, now: u64) -> bool {
        now.saturating_sub(last_touched_ms) > self.config.id_reuse_after_secs.saturating_mul(1000)
    }

    fn marker_touched_ms(&self, id: SessionId) -> Option<u64> {
        let modified = std::fs::metadata(self.layout.marker(id))
            .and_then(|m| m.modified())
            .ok()?;
        Some(ms_from_system_time(modified))
    }

    fn write_marker(&self, id: SessionId, now: u64) -> io::Result<()> {
        let marker = self.layout.marker(id);
        std::fs::write(&marker, now.to_string())?;
        File::options()
            .write(true)
            .open(&marker)?
            .set_modified(system_time_from_ms(now))
    }

    fn remove_all_artifacts(&self, id: SessionId) -> io::Result<()> {
        for path in self.layout.data_artifacts(id) {
            remove_if_exists(&path)?;
        }
        remove_if_exists(&self.layout.marker(id))
    }
}

fn remove_if_exists(path: &std::path::Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
