use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::models::VerifiedIdentity;

/// Process-wide cache of password verifications, keyed by credential fingerprint.
///
/// Entries live until the provider token they were derived from expires.
/// Expired entries are dropped on lookup, and swept in bulk whenever the map
/// grows past a size that doubles with the number of live entries.
/// Concurrent writers for the same key race; the last one wins.
#[derive(Clone)]
pub struct IdentityCache {
    entries: Arc<DashMap<String, CachedIdentity>>,
    sweep_at: Arc<AtomicUsize>,
}

const SWEEP_THRESHOLD: usize = 1024;

#[derive(Clone)]
struct CachedIdentity {
    identity: VerifiedIdentity,
    expires_at: DateTime<Utc>,
}

impl Default for IdentityCache {
    fn default() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            sweep_at: Arc::new(AtomicUsize::new(SWEEP_THRESHOLD)),
        }
    }
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// SHA-256 over the NUL-separated parts. Raw secrets never become keys.
    pub fn fingerprint(parts: &[&str]) -> String {
        let mut hasher = Sha256::new();
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                hasher.update([0u8]);
            }
            hasher.update(part.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    pub fn get(&self, fingerprint: &str) -> Option<VerifiedIdentity> {
        self.get_at(fingerprint, Utc::now())
    }

    fn get_at(&self, fingerprint: &str, now: DateTime<Utc>) -> Option<VerifiedIdentity> {
        let cached = self.entries.get(fingerprint).map(|e| e.value().clone())?;
        if cached.expires_at <= now {
            self.entries.remove(fingerprint);
            return None;
        }
        Some(cached.identity)
    }

    pub fn insert(&self, fingerprint: String, identity: VerifiedIdentity, expires_at: DateTime<Utc>) {
        self.insert_at(fingerprint, identity, expires_at, Utc::now());
    }

    fn insert_at(
        &self,
        fingerprint: String,
        identity: VerifiedIdentity,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        if self.len() >= self.sweep_at.load(Ordering::Relaxed) {
            self.sweep(now);
        }
        self.entries.insert(
            fingerprint,
            CachedIdentity {
                identity,
                expires_at,
            },
        );
    }

    fn sweep(&self, now: DateTime<Utc>) {
        let before = self.len();
        self.entries.retain(|_, e| e.expires_at > now);
        let live = self.len();
        self.sweep_at
            .store((live * 2).max(SWEEP_THRESHOLD), Ordering::Relaxed);
        tracing::debug!(evicted = before.saturating_sub(live), live, "Swept identity cache");
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
