//! In-memory storage backends.
//!
//! Suitable for tests and single-process deployments. Nothing survives a
//! restart.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use fdo_crypto::{KeySigner, PublicKey};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::RvConfig;
use crate::error::RvError;
use crate::session::{Nonce3, SessionObserver, SessionState, SessionToken};
use crate::storage::{To0ClientStorage, To0ServerStorage};
use crate::types::{RedirectBlob, RedirectRecord};
use crate::voucher::OwnershipVoucher;

/// A lifecycle transition as seen by the storage layer.
pub type Transition = (SessionState, Option<SessionToken>);

/// Transitions kept by default; older ones are dropped.
pub const DEFAULT_TRANSITION_LOG: usize = 1024;

#[derive(Debug, Clone, Copy)]
struct Binding {
    nonce: Nonce3,
    bound_at: DateTime<Utc>,
}

/// In-memory server storage.
#[derive(Debug)]
pub struct MemoryTo0Storage {
    sessions: DashMap<SessionToken, Binding>,
    redirects: DashMap<Uuid, RedirectRecord>,
    allow: DashSet<String>,
    deny: DashSet<String>,
    max_wait_seconds: u32,
    transitions: Mutex<VecDeque<Transition>>,
    transition_log: usize,
}

impl MemoryTo0Storage {
    /// Create an empty store granting at most `max_wait_seconds`.
    pub fn new(max_wait_seconds: u32) -> Self {
        Self {
            sessions: DashMap::new(),
            redirects: DashMap::new(),
            allow: DashSet::new(),
            deny: DashSet::new(),
            max_wait_seconds,
            transitions: Mutex::new(VecDeque::new()),
            transition_log: DEFAULT_TRANSITION_LOG,
        }
    }

    /// Create an empty store capped at `config.max_wait_seconds`.
    pub fn from_config(config: &RvConfig) -> Self {
        Self::new(config.max_wait_seconds)
    }

    /// Keep at most `len` recent transitions.
    pub fn with_transition_log(mut self, len: usize) -> Self {
        self.transition_log = len;
        self
    }

    /// Registration stored for `guid`.
    pub fn redirect(&self, guid: &Uuid) -> Option<RedirectRecord> {
        self.redirects.get(guid).map(|r| r.clone())
    }

    /// Number of live session bindings.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Most recent transitions, oldest first.
    pub fn transitions(&self) -> Vec<Transition> {
        self.transitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Drop bindings older than `ttl`. Returns how many were dropped.
    pub fn purge_expired_sessions(&self, ttl: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
        else {
            return 0;
        };

        let before = self.sessions.len();
        self.sessions.retain(|_, binding| binding.bound_at > cutoff);
        let purged = before.saturating_sub(self.sessions.len());

        if purged > 0 {
            info!(purged, "Abandoned sessions purged");
        }
        purged
    }

    /// Drop registrations that lapsed at `now`. Returns how many were
    /// dropped.
    pub fn purge_expired_redirects(&self, now: DateTime<Utc>) -> usize {
        let before = self.redirects.len();
        self.redirects.retain(|_, record| !record.is_expired(now));
        before.saturating_sub(self.redirects.len())
    }

    /// Purge sessions older than `session_ttl` and lapsed registrations
    /// every `period` on a background task.
    ///
    /// `period` must be non-zero. Abort the returned handle to stop.
    pub fn spawn_purge(
        store: Arc<Self>,
        session_ttl: Duration,
        period: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                store.purge_expired_sessions(session_ttl);
                let lapsed = store.purge_expired_redirects(Utc::now());
                if lapsed > 0 {
                    debug!(lapsed, "Lapsed registrations purged");
                }
            }
        })
    }
}

impl SessionObserver for MemoryTo0Storage {
    fn on_transition(
        &self,
        state: SessionState,
        token: Option<&SessionToken>,
    ) -> Result<(), RvError> {
        debug!(state = %state, token = ?token.map(SessionToken::as_str), "Session transition stored");
        let mut transitions = self.transitions.lock().unwrap_or_else(PoisonError::into_inner);
        transitions.push_back((state, token.cloned()));
        while transitions.len() > self.transition_log {
            transitions.pop_front();
        }
        Ok(())
    }
}

impl To0ServerStorage for MemoryTo0Storage {
    fn bind_nonce(&self, token: &SessionToken, nonce: Nonce3) -> Result<(), RvError> {
        self.sessions.insert(
            token.clone(),
            Binding {
                nonce,
                bound_at: Utc::now(),
            },
        );
        Ok(())
    }

    fn resolve_nonce(&self, token: &SessionToken) -> Result<Option<Nonce3>, RvError> {
        Ok(self.sessions.get(token).map(|b| b.nonce))
    }

    fn release_session(&self, token: &SessionToken) -> Result<(), RvError> {
        self.sessions.remove(token);
        Ok(())
    }

    fn store_redirect(&self, record: RedirectRecord) -> Result<u32, RvError> {
        let granted = record.requested_wait.min(self.max_wait_seconds);
        self.redirects.insert(record.guid, record);
        Ok(granted)
    }

    fn allowlist(&self) -> Result<Vec<String>, RvError> {
        Ok(self.allow.iter().map(|f| f.clone()).collect())
    }

    fn denylist(&self) -> Result<Vec<String>, RvError> {
        Ok(self.deny.iter().map(|f| f.clone()).collect())
    }

    fn insert_allowlist(&self, fingerprints: &[String]) -> Result<(), RvError> {
        for fingerprint in fingerprints {
            self.allow.insert(fingerprint.clone());
        }
        Ok(())
    }

    fn insert_denylist(&self, fingerprints: &[String]) -> Result<(), RvError> {
        for fingerprint in fingerprints {
            self.deny.insert(fingerprint.clone());
        }
        Ok(())
    }
}

/// In-memory client storage holding one registration and the owner keys
/// it may sign with.
pub struct MemoryTo0ClientStorage {
    voucher: OwnershipVoucher,
    blob: RedirectBlob,
    request_wait: u32,
    response_wait: Option<u32>,
    signers: HashMap<String, Arc<dyn KeySigner>>,
}

impl MemoryTo0ClientStorage {
    /// Register `blob` for `voucher`, asking for `request_wait` seconds.
    pub fn new(voucher: OwnershipVoucher, blob: RedirectBlob, request_wait: u32) -> Self {
        Self {
            voucher,
            blob,
            request_wait,
            response_wait: None,
            signers: HashMap::new(),
        }
    }

    /// Make a signer available for its public key.
    pub fn add_signer(&mut self, signer: Arc<dyn KeySigner>) -> Result<(), RvError> {
        let fingerprint = signer.public_key()?.fingerprint();
        self.signers.insert(fingerprint, signer);
        Ok(())
    }

    /// Wait granted by the server, once the exchange finished.
    pub fn response_wait(&self) -> Option<u32> {
        self.response_wait
    }
}

impl SessionObserver for MemoryTo0ClientStorage {}

impl To0ClientStorage for MemoryTo0ClientStorage {
    fn voucher(&self) -> &OwnershipVoucher {
        &self.voucher
    }

    fn redirect_blob(&self) -> &RedirectBlob {
        &self.blob
    }

    fn request_wait(&self) -> u32 {
        self.request_wait
    }

    fn set_response_wait(&mut self, granted: u32) {
        self.response_wait = Some(granted);
    }

    fn owner_signing_key(&self, owner_key: &PublicKey) -> Result<Arc<dyn KeySigner>, RvError> {
        self.signers
            .get(&owner_key.fingerprint())
            .cloned()
            .ok_or_else(|| RvError::ConfigError {
                message: format!("no signing key for owner key {}", owner_key.fingerprint()),
            })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;

    fn record(guid: Uuid, wait: u32, created_at: DateTime<Utc>) -> RedirectRecord {
        RedirectRecord::new(guid, vec![7; 4], "AB".into(), None, wait, created_at)
    }

    #[test]
    fn test_grant_is_capped() {
        let store = MemoryTo0Storage::new(600);
        let guid = Uuid::new_v4();

        assert_eq!(store.store_redirect(record(guid, 3600, Utc::now())).unwrap(), 600);
        assert_eq!(store.store_redirect(record(guid, 60, Utc::now())).unwrap(), 60);
        assert_eq!(store.redirect(&guid).unwrap().requested_wait, 60);
    }

    #[test]
    fn test_binding_lifecycle() {
        let store = MemoryTo0Storage::new(600);
        let token = SessionToken::generate();
        let nonce = Nonce3::random();

        store.bind_nonce(&token, nonce).unwrap();
        assert_eq!(store.resolve_nonce(&token).unwrap(), Some(nonce));

        store.release_session(&token).unwrap();
        assert_eq!(store.resolve_nonce(&token).unwrap(), None);
        store.release_session(&token).unwrap();
    }

    #[test]
    fn test_purge_expired() {
        let store = MemoryTo0Storage::new(3600);
        store.bind_nonce(&SessionToken::generate(), Nonce3::random()).unwrap();

        assert_eq!(store.purge_expired_sessions(Duration::from_secs(60)), 0);
        assert_eq!(store.purge_expired_sessions(Duration::ZERO), 1);

        let now = Utc::now();
        store.store_redirect(record(Uuid::new_v4(), 10, now)).unwrap();
        store.store_redirect(record(Uuid::new_v4(), 1000, now)).unwrap();
        assert_eq!(store.purge_expired_redirects(now + ChronoDuration::seconds(10)), 1);
    }

    #[test]
    fn test_transition_log_is_bounded() {
        let store = MemoryTo0Storage::new(60).with_transition_log(4);
        for _ in 0..10 {
            let token = SessionToken::generate();
            store.on_transition(SessionState::Started, Some(&token)).unwrap();
            store.on_transition(SessionState::Completed, Some(&token)).unwrap();
        }

        let kept = store.transitions();
        assert_eq!(kept.len(), 4);
        assert_eq!(kept[3].0, SessionState::Completed);
    }

    #[test]
    fn test_from_config_caps_grant() {
        let config = RvConfig {
            max_wait_seconds: 900,
            ..RvConfig::default()
        };
        let store = MemoryTo0Storage::from_config(&config);
        assert_eq!(
            store.store_redirect(record(Uuid::new_v4(), 3600, Utc::now())).unwrap(),
            900
        );
    }

    #[tokio::test]
    async fn test_background_purge() {
        let store = Arc::new(MemoryTo0Storage::new(60));
        store.bind_nonce(&SessionToken::generate(), Nonce3::random()).unwrap();
        store
            .store_redirect(record(Uuid::new_v4(), 0, Utc::now()))
            .unwrap();

        let handle =
            MemoryTo0Storage::spawn_purge(store.clone(), Duration::ZERO, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert_eq!(store.session_count(), 0);
        assert_eq!(store.purge_expired_redirects(Utc::now()), 0);
    }

    #[test]
    fn test_list_inserts_are_idempotent() {
        let store = MemoryTo0Storage::new(60);
        store.insert_denylist(&["AA".to_string(), "AA".to_string()]).unwrap();
        store.insert_denylist(&["AA".to_string()]).unwrap();
        assert_eq!(store.denylist().unwrap(), vec!["AA".to_string()]);
    }
}
