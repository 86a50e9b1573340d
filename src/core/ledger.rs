//! Memory of unresolved faces that have already been offered for enrollment.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Content hash of a rounded embedding. Two captures of the same face a few
/// moments apart round to the same components and so share a hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn of(embedding: &[f32]) -> Self {
        let mut hasher = Sha256::new();
        for value in embedding {
            // Quantize to two decimals; integer form keeps -0.0 and 0.0 together
            let rounded = (value * 100.0).round() as i32;
            hasher.update(rounded.to_le_bytes());
        }
        let digest = hasher.finalize();
        let hex: String = digest[..8].iter().map(|b| format!("{:02x}", b)).collect();
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy)]
struct LedgerEntry {
    first_seen_at: Instant,
    permanent: bool,
}

/// A hash present here means "do not start another dialog for this face".
/// Expired entries are only removed by `sweep`, which the pipeline calls every
/// few frames, so `is_known` stays a plain lookup.
#[derive(Debug)]
pub struct StrangerLedger {
    cooldown: Duration,
    entries: HashMap<ContentHash, LedgerEntry>,
}

impl StrangerLedger {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            entries: HashMap::new(),
        }
    }

    pub fn hash(embedding: &[f32]) -> ContentHash {
        ContentHash::of(embedding)
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn is_known(&self, hash: &ContentHash) -> bool {
        self.entries.contains_key(hash)
    }

    /// Inserts the hash or refreshes its timestamp.
    pub fn mark_seen(&mut self, hash: ContentHash, now: Instant) {
        self.entries
            .entry(hash)
            .and_modify(|entry| entry.first_seen_at = now)
            .or_insert(LedgerEntry { first_seen_at: now, permanent: false });
    }

    /// Exempts the hash from expiry, e.g. once the face was saved as a known stranger.
    pub fn mark_permanent(&mut self, hash: ContentHash, now: Instant) {
        self.entries
            .entry(hash)
            .and_modify(|entry| entry.permanent = true)
            .or_insert(LedgerEntry { first_seen_at: now, permanent: true });
    }

    /// Drops entries older than the cooldown. Returns how many were removed.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        let cooldown = self.cooldown;
        self.entries.retain(|_, entry| {
            entry.permanent || now.saturating_duration_since(entry.first_seen_at) <= cooldown
        });
        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::debug!("Stranger ledger sweep removed {} expired entries", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
