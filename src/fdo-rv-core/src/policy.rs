//! Owner-key fingerprint allow/deny policy.
//!
//! ## Precedence
//!
//! 1. A denied fingerprint is rejected, even if also allowed.
//! 2. With a non-empty allowlist, only listed fingerprints are accepted.
//! 3. With an empty allowlist, every fingerprint that is not denied is
//!    accepted.
//!
//! Fingerprints are opaque, case-sensitive strings. The lists are shared
//! process-wide and read on every registration, so readers load an
//! immutable snapshot and writers swap in a new one.

use std::collections::HashSet;

use arc_swap::ArcSwap;
use tracing::debug;

#[derive(Debug, Clone, Default)]
struct Lists {
    allow: HashSet<String>,
    deny: HashSet<String>,
}

/// Process-wide owner-key fingerprint policy.
#[derive(Debug)]
pub struct KeyPolicy {
    lists: ArcSwap<Lists>,
}

impl Default for KeyPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyPolicy {
    /// Create a policy that accepts every fingerprint.
    pub fn new() -> Self {
        Self {
            lists: ArcSwap::from_pointee(Lists::default()),
        }
    }

    /// Create a policy from existing lists.
    pub fn from_lists<A, D>(allow: A, deny: D) -> Self
    where
        A: IntoIterator<Item = String>,
        D: IntoIterator<Item = String>,
    {
        Self {
            lists: ArcSwap::from_pointee(Lists {
                allow: allow.into_iter().collect(),
                deny: deny.into_iter().collect(),
            }),
        }
    }

    /// Whether an owner key with this fingerprint may register.
    pub fn is_allowed(&self, fingerprint: &str) -> bool {
        let lists = self.lists.load();
        if lists.deny.contains(fingerprint) {
            return false;
        }
        lists.allow.is_empty() || lists.allow.contains(fingerprint)
    }

    /// Add fingerprints to the allowlist. Already present entries are left
    /// as they are.
    pub fn seed_allowlist<I, S>(&self, fingerprints: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fingerprints: Vec<String> = fingerprints.into_iter().map(Into::into).collect();
        self.lists.rcu(|current| {
            let mut next = Lists::clone(current);
            next.allow.extend(fingerprints.iter().cloned());
            next
        });
        debug!(count = fingerprints.len(), "Allowlist seeded");
    }

    /// Add fingerprints to the denylist. Already present entries are left
    /// as they are.
    pub fn seed_denylist<I, S>(&self, fingerprints: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fingerprints: Vec<String> = fingerprints.into_iter().map(Into::into).collect();
        self.lists.rcu(|current| {
            let mut next = Lists::clone(current);
            next.deny.extend(fingerprints.iter().cloned());
            next
        });
        debug!(count = fingerprints.len(), "Denylist seeded");
    }

    /// Snapshot of the allowlist.
    pub fn allowlist(&self) -> HashSet<String> {
        self.lists.load().allow.clone()
    }

    /// Snapshot of the denylist.
    pub fn denylist(&self) -> HashSet<String> {
        self.lists.load().deny.clone()
    }
}
