//! Replay store: a bounded set of recently-seen credential fingerprints
//! with time-based eviction (§4.3).

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Length of the fingerprint prefix taken from a credential's MAC tag.
/// Sixteen bytes is comfortably collision-resistant for this purpose even
/// against the shortest supported tag (HMAC-MD5, also 16 bytes).
pub const MIN_MD_LEN: usize = 16;

/// Number of times a client may retransmit the same request before the
/// retry counter itself is treated as abuse (`SOCKET` at the dispatcher).
pub const MAX_RETRIES: u8 = 2;

/// A replay fingerprint: the leading [`MIN_MD_LEN`] bytes of a credential's
/// MAC tag, plus its absolute expiry. Two fingerprints are equal iff both
/// components are equal (§3 "Replay fingerprint"), so that two credentials
/// whose truncated tags happen to collide but expire at different times
/// are tracked as distinct entries rather than masking one another.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct Fingerprint {
    tag_prefix: [u8; MIN_MD_LEN],
    expiry: u32,
}

impl Fingerprint {
    /// Take the fingerprint from a full-length MAC tag and the credential's
    /// absolute expiry (`encode_time + ttl`).
    pub fn from_tag(tag: &[u8], expiry: u32) -> Self {
        let mut tag_prefix = [0u8; MIN_MD_LEN];
        let n = tag.len().min(MIN_MD_LEN);
        tag_prefix[..n].copy_from_slice(&tag[..n]);
        Fingerprint { tag_prefix, expiry }
    }
}

/// Outcome of an [`ReplayStore::insert`] call.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum InsertOutcome {
    /// The fingerprint was not previously present (or was masked by a valid retry)
    Fresh,
    /// The fingerprint was already present and the retry counter did not excuse it
    Duplicate,
}

/// Hash-set of recently-decoded credential fingerprints. The absolute
/// expiry is carried inside [`Fingerprint`] itself (§3's equality rule), so
/// the set keys on the pair directly rather than on the tag prefix alone.
pub struct ReplayStore {
    entries: Mutex<HashSet<Fingerprint>>,
}

impl ReplayStore {
    pub fn new() -> Self {
        ReplayStore {
            entries: Mutex::new(HashSet::new()),
        }
    }

    /// Insert `fingerprint`. If `retry` is in `1..=MAX_RETRIES` and an
    /// identical fingerprint (same tag prefix *and* same expiry) is already
    /// present, the duplicate is masked as [`InsertOutcome::Fresh`] per
    /// §4.3's retry-leniency rule, to tolerate a client retransmitting
    /// after a lost response rather than weakening the defense against
    /// genuine replay.
    pub fn insert(&self, fingerprint: Fingerprint, retry: u8) -> InsertOutcome {
        let mut entries = self.entries.lock().expect("replay store mutex poisoned");

        if entries.contains(&fingerprint) {
            if retry >= 1 && retry <= MAX_RETRIES {
                return InsertOutcome::Fresh;
            }
            return InsertOutcome::Duplicate;
        }

        entries.insert(fingerprint);
        InsertOutcome::Fresh
    }

    /// Remove `fingerprint`, used to unplay an insert whose response
    /// delivery subsequently failed (§4.3, "unplay-on-send-failure").
    pub fn remove(&self, fingerprint: &Fingerprint) {
        let mut entries = self.entries.lock().expect("replay store mutex poisoned");
        entries.remove(fingerprint);
    }

    /// Evict every entry whose expiry is strictly less than `now`.
    pub fn purge(&self, now: u32) {
        let mut entries = self.entries.lock().expect("replay store mutex poisoned");
        entries.retain(|fp| fp.expiry >= now);
    }

    /// Number of fingerprints currently tracked; exposed for tests and metrics.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("replay store mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ReplayStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Current time as Unix seconds, used by the dispatcher's periodic purge
/// timer to evict entries whose `expiry` has passed.
pub fn now_secs() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(byte: u8, expiry: u32) -> Fingerprint {
        Fingerprint::from_tag(&[byte; MIN_MD_LEN], expiry)
    }

    #[test]
    fn first_insert_is_fresh_second_is_duplicate() {
        let store = ReplayStore::new();
        assert_eq!(store.insert(fp(1, 100), 0), InsertOutcome::Fresh);
        assert_eq!(store.insert(fp(1, 100), 0), InsertOutcome::Duplicate);
    }

    #[test]
    fn retry_in_range_masks_duplicate_as_fresh() {
        let store = ReplayStore::new();
        assert_eq!(store.insert(fp(2, 100), 0), InsertOutcome::Fresh);
        assert_eq!(store.insert(fp(2, 100), 1), InsertOutcome::Fresh);
        assert_eq!(store.insert(fp(2, 100), MAX_RETRIES), InsertOutcome::Fresh);
    }

    #[test]
    fn retry_out_of_range_is_still_duplicate() {
        let store = ReplayStore::new();
        assert_eq!(store.insert(fp(3, 100), 0), InsertOutcome::Fresh);
        assert_eq!(
            store.insert(fp(3, 100), MAX_RETRIES + 1),
            InsertOutcome::Duplicate
        );
    }

    #[test]
    fn purge_evicts_expired_entries_only() {
        let store = ReplayStore::new();
        store.insert(fp(4, 50), 0);
        store.insert(fp(5, 150), 0);
        store.purge(100);
        assert_eq!(store.len(), 1);
        assert_eq!(store.insert(fp(5, 150), 0), InsertOutcome::Duplicate);
        assert_eq!(store.insert(fp(4, 200), 0), InsertOutcome::Fresh);
    }

    #[test]
    fn remove_unplays_an_insert() {
        let store = ReplayStore::new();
        store.insert(fp(6, 100), 0);
        store.remove(&fp(6, 100));
        assert_eq!(store.insert(fp(6, 100), 0), InsertOutcome::Fresh);
    }

    #[test]
    fn same_tag_prefix_with_different_expiry_is_a_distinct_entry() {
        // Two credentials whose truncated MAC tags collide but expire at
        // different times must not be confused for one another (§3).
        let store = ReplayStore::new();
        assert_eq!(store.insert(fp(7, 100), 0), InsertOutcome::Fresh);
        assert_eq!(store.insert(fp(7, 200), 0), InsertOutcome::Fresh);
        assert_eq!(store.len(), 2);
    }
}
