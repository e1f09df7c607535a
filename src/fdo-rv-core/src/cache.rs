//! On-disk revocation list cache with staged refresh.
//!
//! Revocation lists live as plain files in one directory, keyed by file
//! name. Refresh never writes a live file directly:
//!
//! 1. every download is written to a temp file and persisted as
//!    `<name>.new`,
//! 2. once all staging is done the `cache_updated` sentinel is created,
//! 3. the next [`RevocationCache::reconcile`] renames each staged file over
//!    its live counterpart, removes the sentinel, and reloads.
//!
//! Readers go through an immutable snapshot that is swapped wholesale on
//! reload, so a lookup never observes a half-written list.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwap;
use futures::future::join_all;
use reqwest::Url;
use tempfile::NamedTempFile;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::config::RvConfig;
use crate::error::RvError;
use crate::https::{self, CrlFetcher};

/// Marker file signalling that staged files await promotion.
pub const SENTINEL: &str = "cache_updated";

/// Suffix of staged replacement files.
pub const STAGED_SUFFIX: &str = ".new";

const CRL_EXTENSION: &str = ".crl";

type Snapshot = HashMap<String, Arc<Vec<u8>>>;

/// Where the cache is in its stage/promote cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// No staged files are pending.
    Idle,
    /// A refresh staged files and set the sentinel.
    Staged,
    /// A reconcile is promoting staged files.
    Promoting,
}

/// Revocation list cache backed by a local directory.
pub struct RevocationCache {
    dir: PathBuf,
    sources: Vec<Url>,
    fetcher: CrlFetcher,
    entries: ArcSwap<Snapshot>,
    /// Also the reconcile critical section.
    state: Mutex<CacheState>,
}

impl RevocationCache {
    /// Open a cache over an existing directory and load what is there.
    ///
    /// Pending staged files left by an earlier refresh are promoted first.
    ///
    /// # Errors
    ///
    /// `ConfigError` if `dir` is missing or not a directory,
    /// `InvalidReference` if a source is not a URL.
    pub fn open(
        dir: impl Into<PathBuf>,
        sources: &[String],
        fetcher: CrlFetcher,
    ) -> Result<Self, RvError> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(RvError::ConfigError {
                message: format!("CRL cache path {} is not a directory", dir.display()),
            });
        }

        let sources = sources
            .iter()
            .map(|s| {
                Url::parse(s).map_err(|_| RvError::InvalidReference {
                    reference: s.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let cache = Self {
            dir,
            sources,
            fetcher,
            entries: ArcSwap::from_pointee(HashMap::new()),
            state: Mutex::new(CacheState::Idle),
        };

        if !cache.reconcile()? {
            cache.reload();
        }

        Ok(cache)
    }

    /// Open the cache described by `config`, refreshing once if
    /// `crl_auto_update` is set.
    pub async fn from_config(config: &RvConfig) -> Result<Self, RvError> {
        let dir = config
            .crl_cache_dir
            .clone()
            .ok_or_else(|| RvError::ConfigError {
                message: "crl_cache_dir is not set".into(),
            })?;

        let cache = Self::open(dir, &config.crl_sources, CrlFetcher::new(config.timeout)?)?;

        if config.crl_auto_update {
            cache.refresh().await;
            cache.reconcile()?;
        }

        Ok(cache)
    }

    /// Directory backing the cache.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current stage/promote state.
    pub fn state(&self) -> CacheState {
        *self.lock_state()
    }

    /// Number of loaded revocation lists.
    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    /// Whether no revocation list is loaded.
    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }

    /// Look up the revocation list for a distribution point URL.
    ///
    /// Runs [`reconcile`](Self::reconcile) first. Returns `Ok(None)` for a
    /// well-formed reference that is not cached.
    ///
    /// # Errors
    ///
    /// `InvalidReference` if `reference` is not a URL or has no file name.
    pub fn get(&self, reference: &str) -> Result<Option<Arc<Vec<u8>>>, RvError> {
        let invalid = || RvError::InvalidReference {
            reference: reference.to_string(),
        };
        let url = Url::parse(reference).map_err(|_| invalid())?;
        let name = https::file_name(&url).ok_or_else(invalid)?;

        if let Err(e) = self.reconcile() {
            warn!(error = %e, "CRL cache reconcile failed; serving current snapshot");
        }

        Ok(self.entries.load().get(&name).cloned())
    }

    /// Promote staged files if the sentinel is present.
    ///
    /// Returns whether a promotion happened. Without a sentinel this is a
    /// no-op. Concurrent callers are serialized so each staged file is
    /// promoted once.
    pub fn reconcile(&self) -> Result<bool, RvError> {
        let mut state = self.lock_state();

        let sentinel = self.dir.join(SENTINEL);
        if !sentinel.exists() {
            *state = CacheState::Idle;
            return Ok(false);
        }

        *state = CacheState::Promoting;
        let promoted = self.promote_staged()?;

        // Removed last: an interrupted promotion resumes on the next call.
        fs::remove_file(&sentinel)?;
        self.reload();
        *state = CacheState::Idle;

        info!(promoted, "CRL cache: staged revocation lists promoted");
        Ok(true)
    }

    /// Download every revocation list from the configured sources and
    /// stage it for the next reconcile.
    ///
    /// Best effort: failures are logged and skipped, never returned.
    /// Returns how many files were staged.
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn refresh(&self) -> usize {
        let mut staged = 0;

        for source in &self.sources {
            let links = match self.fetcher.list(source).await {
                Ok(links) => links,
                Err(e) => {
                    warn!(source = %source, error = %e, "CRL source listing failed");
                    continue;
                },
            };

            let downloads = join_all(links.iter().map(|url| self.fetcher.download(url))).await;

            for (url, download) in links.iter().zip(downloads) {
                let Some(name) = https::file_name(url) else {
                    warn!(url = %url, "CRL link has no file name");
                    continue;
                };

                match download.and_then(|bytes| self.stage(&name, &bytes)) {
                    Ok(()) => staged += 1,
                    Err(e) => warn!(url = %url, error = %e, "CRL download failed"),
                }
            }
        }

        if staged > 0 {
            let mut state = self.lock_state();
            match fs::write(self.dir.join(SENTINEL), b"") {
                Ok(()) => *state = CacheState::Staged,
                Err(e) => warn!(error = %e, "Could not write CRL cache sentinel"),
            }
        }

        info!(staged, "CRL cache refresh finished");
        staged
    }

    /// Refresh and reconcile every `period` on a background task.
    ///
    /// The first refresh runs immediately. Abort the returned handle to
    /// stop.
    pub fn spawn_refresh(cache: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                cache.refresh().await;
                if let Err(e) = cache.reconcile() {
                    warn!(error = %e, "CRL cache reconcile after refresh failed");
                }
            }
        })
    }

    fn stage(&self, name: &str, bytes: &[u8]) -> Result<(), RvError> {
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.dir.join(format!("{name}{STAGED_SUFFIX}")))
            .map_err(|e| RvError::Io(e.error))?;

        debug!(name, bytes = bytes.len(), "CRL staged");
        Ok(())
    }

    fn promote_staged(&self) -> Result<usize, RvError> {
        let mut promoted = 0;

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(target) = name.strip_suffix(STAGED_SUFFIX) else {
                continue;
            };
            if target.is_empty() || !path.is_file() {
                continue;
            }

            let target = self.dir.join(target);
            // Windows rename does not replace an existing file.
            if cfg!(windows) && target.exists() {
                fs::remove_file(&target)?;
            }
            fs::rename(&path, &target)?;
            promoted += 1;
        }

        Ok(promoted)
    }

    fn reload(&self) {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "CRL cache directory unreadable");
                return;
            },
        };

        let mut snapshot = Snapshot::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !path.is_file() || !name.to_ascii_lowercase().ends_with(CRL_EXTENSION) {
                continue;
            }

            match fs::read(&path) {
                Ok(bytes) => {
                    snapshot.insert(name.to_string(), Arc::new(bytes));
                },
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable CRL"),
            }
        }

        debug!(count = snapshot.len(), "CRL cache loaded");
        self.entries.store(Arc::new(snapshot));
    }

    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        // The state is advisory; the directory is the source of truth.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
