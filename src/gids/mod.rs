//! Group-membership cache: a background-refreshed `uid -> sorted set of
//! supplementary gid` map, built by scanning the system group database
//! (§4.4).
//!
//! The old map is swapped out atomically under a mutex on each rebuild, per
//! the concurrency model's "group-map swap is atomic" guarantee (§5): a
//! concurrent [`GroupCache::is_member`] either sees the map before or after
//! a refresh, never a partially rebuilt one.

use std::collections::{HashMap, HashSet};
use std::ffi::CStr;
use std::fs;
use std::sync::Mutex;
use std::time::SystemTime;

use log::{info, warn};

/// Path to the system group database consulted when building the cache.
pub const GROUP_FILE: &str = "/etc/group";

type GidMap = HashMap<u32, Vec<u32>>;

/// Background-refreshed `uid -> supplementary gids` cache.
pub struct GroupCache {
    map: Mutex<GidMap>,
    ghosts: Mutex<HashSet<String>>,
    last_group_mtime: Mutex<Option<SystemTime>>,
    check_mtime: bool,
}

impl GroupCache {
    /// Build an initially empty cache and perform one synchronous rebuild.
    pub fn new(check_mtime: bool) -> Self {
        let cache = GroupCache {
            map: Mutex::new(HashMap::new()),
            ghosts: Mutex::new(HashSet::new()),
            last_group_mtime: Mutex::new(None),
            check_mtime,
        };
        cache.rebuild_if_needed();
        cache
    }

    /// Is `uid` a member of supplementary group `gid`?
    pub fn is_member(&self, uid: u32, gid: u32) -> bool {
        let map = self.map.lock().expect("group cache mutex poisoned");
        map.get(&uid).map(|gids| gids.binary_search(&gid).is_ok()).unwrap_or(false)
    }

    /// Rebuild the map, skipping the scan if `check_mtime` is enabled and
    /// `/etc/group`'s mtime has not advanced since the last successful scan.
    pub fn rebuild_if_needed(&self) {
        if self.check_mtime {
            match fs::metadata(GROUP_FILE).and_then(|m| m.modified()) {
                Ok(mtime) => {
                    let mut last = self.last_group_mtime.lock().expect("mtime mutex poisoned");
                    if *last == Some(mtime) {
                        return;
                    }
                    *last = Some(mtime);
                }
                Err(e) => {
                    warn!("failed to stat {}: {}", GROUP_FILE, e);
                }
            }
        }

        let (new_map, newly_missing) = self.scan();

        {
            let mut map = self.map.lock().expect("group cache mutex poisoned");
            *map = new_map;
        }

        let mut ghosts = self.ghosts.lock().expect("ghost set mutex poisoned");
        for user in newly_missing {
            if ghosts.insert(user.clone()) {
                warn!("user \"{}\" referenced by a group but not found in the password database", user);
            }
        }
    }

    /// Scan the group database, resolving member names to UIDs via `getpwnam`.
    fn scan(&self) -> (GidMap, Vec<String>) {
        let mut map: GidMap = HashMap::new();
        let mut newly_missing = Vec::new();
        let mut resolved: HashMap<String, Option<u32>> = HashMap::new();

        unsafe { libc::setgrent() };
        loop {
            let entry = unsafe { libc::getgrent() };
            if entry.is_null() {
                break;
            }
            let gid = unsafe { (*entry).gr_gid };
            let members = unsafe { (*entry).gr_mem };
            if members.is_null() {
                continue;
            }
            let mut i = 0;
            loop {
                let ptr = unsafe { *members.add(i) };
                if ptr.is_null() {
                    break;
                }
                let name = unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
                let uid = *resolved
                    .entry(name.clone())
                    .or_insert_with(|| lookup_uid(&name));

                match uid {
                    Some(uid) => {
                        let gids = map.entry(uid).or_default();
                        if let Err(pos) = gids.binary_search(&gid) {
                            gids.insert(pos, gid);
                        }
                    }
                    None => newly_missing.push(name),
                }
                i += 1;
            }
        }
        unsafe { libc::endgrent() };

        (map, newly_missing)
    }

    /// Number of UIDs currently mapped; exposed for tests.
    pub fn len(&self) -> usize {
        self.map.lock().expect("group cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lookup_uid(user: &str) -> Option<u32> {
    let cname = std::ffi::CString::new(user).ok()?;
    let entry = unsafe { libc::getpwnam(cname.as_ptr()) };
    if entry.is_null() {
        None
    } else {
        Some(unsafe { (*entry).pw_uid })
    }
}

/// Log a summary line about the cache's scheduling, matching the daemon's
/// startup-time log message.
pub fn log_scheduling(interval_secs: u64, check_mtime: bool) {
    if interval_secs == 0 {
        info!("disabled updates to supplementary group mapping");
    } else {
        info!(
            "updating supplementary group mapping every {} second{}",
            interval_secs,
            if interval_secs == 1 { "" } else { "s" }
        );
    }
    info!(
        "{} supplementary group mtime check of \"{}\"",
        if check_mtime { "enabled" } else { "disabled" },
        GROUP_FILE
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_builds_without_panicking() {
        let cache = GroupCache::new(false);
        // root (uid 0) is at worst absent from supplementary groups; the
        // call must not panic regardless of the host's group database.
        let _ = cache.is_member(0, 0);
    }

    #[test]
    fn empty_cache_reports_no_membership() {
        let cache = GroupCache {
            map: Mutex::new(HashMap::new()),
            ghosts: Mutex::new(HashSet::new()),
            last_group_mtime: Mutex::new(None),
            check_mtime: false,
        };
        assert!(!cache.is_member(1000, 1000));
        assert!(cache.is_empty());
    }
}
