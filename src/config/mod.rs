//! Daemon configuration: every knob named in the external-interfaces table,
//! plus the directory-security walk used to validate the paths it names.

pub mod path_security;

use std::path::PathBuf;

use crate::crypto::{CipherType, MacType, ZipType};

/// Upper bound on an encoded `data` payload, enforced at framing.
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Default worker-pool size when `num_threads` is left unset; scaled by the
/// number of visible CPUs at daemon startup.
pub const DEFAULT_THREADS_PER_CPU: usize = 4;

/// Ceiling the decode pipeline clamps `ttl` to, overridable per daemon.
pub const DEFAULT_MAX_TTL_SECS: u32 = 3600;

/// Default credential time-to-live substituted for a `DEFAULT` sentinel.
pub const DEFAULT_TTL_SECS: u32 = 300;

/// Interval between scheduled replay-store purges.
pub const DEFAULT_REPLAY_PURGE_SECS: u64 = 100;

/// Interval between group-membership cache rebuilds.
pub const DEFAULT_GROUP_UPDATE_INTERVAL_SECS: u64 = 3600;

/// Wall-clock timeout on a single connection's read/write.
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 5;

/// Every external-facing configuration field named in the design (§6).
#[derive(Debug, Clone)]
pub struct Config {
    /// Unix-domain socket the daemon listens on
    pub socket_path: PathBuf,
    /// Shared secret key file, ≥ 1024 bytes
    pub key_file: PathBuf,
    /// Optional PRNG-state persistence file
    pub seed_file: Option<PathBuf>,
    /// Optional PID file, removed on clean shutdown
    pub pid_file: Option<PathBuf>,
    /// Optional log file; absent means log to stderr
    pub log_file: Option<PathBuf>,
    /// Worker-pool thread count; `None` derives it from visible CPUs
    pub num_threads: Option<usize>,
    /// Upper bound on accepted `ttl`, both at encode and decode
    pub max_ttl: u32,
    /// Default TTL substituted for a request's `DEFAULT` sentinel
    pub default_ttl: u32,
    /// Default cipher substituted for a request's `DEFAULT` sentinel
    pub default_cipher: CipherType,
    /// Default MAC substituted for a request's `DEFAULT` sentinel
    pub default_mac: MacType,
    /// Default compression substituted for a request's `DEFAULT` sentinel
    pub default_zip: ZipType,
    /// Seconds between group-cache refreshes; `0` disables periodic refresh
    pub group_update_interval: u64,
    /// Skip a refresh when `/etc/group`'s mtime hasn't advanced
    pub group_check_mtime: bool,
    /// Explicit origin: hostname, dotted-quad, or interface name
    pub origin: Option<String>,
    /// GID permitted to share write access to daemon directories
    pub trusted_group: Option<String>,
    /// Root decodes any credential regardless of `auth_uid`
    pub allow_root_decode: bool,
    /// Permit backdating up to `ttl` seconds on decode
    pub allow_clock_skew: bool,
    /// Downgrade certain startup security checks from fatal to warning
    pub force: bool,
    /// Connection read/write timeout
    pub connection_timeout_secs: u64,
    /// Interval between scheduled replay-store purges
    pub replay_purge_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            socket_path: PathBuf::from("/var/run/munge/munge.socket.2"),
            key_file: PathBuf::from("/etc/munge/munge.key"),
            seed_file: Some(PathBuf::from("/var/lib/munge/munge.seed")),
            pid_file: Some(PathBuf::from("/var/run/munge/munged.pid")),
            log_file: Some(PathBuf::from("/var/log/munge/munged.log")),
            num_threads: None,
            max_ttl: DEFAULT_MAX_TTL_SECS,
            default_ttl: DEFAULT_TTL_SECS,
            default_cipher: CipherType::Aes128,
            default_mac: MacType::Sha256,
            default_zip: ZipType::None,
            group_update_interval: DEFAULT_GROUP_UPDATE_INTERVAL_SECS,
            group_check_mtime: true,
            origin: None,
            trusted_group: None,
            allow_root_decode: true,
            allow_clock_skew: false,
            force: false,
            connection_timeout_secs: DEFAULT_CONNECTION_TIMEOUT_SECS,
            replay_purge_secs: DEFAULT_REPLAY_PURGE_SECS,
        }
    }
}

impl Config {
    /// Resolve the effective worker-pool size: the configured value, or
    /// `DEFAULT_THREADS_PER_CPU` times the number of visible CPUs.
    pub fn effective_num_threads(&self) -> usize {
        self.num_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get() * DEFAULT_THREADS_PER_CPU)
                .unwrap_or(DEFAULT_THREADS_PER_CPU)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_derives_thread_count() {
        let config = Config::default();
        assert!(config.effective_num_threads() > 0);
    }

    #[test]
    fn explicit_thread_count_is_honored() {
        let mut config = Config::default();
        config.num_threads = Some(7);
        assert_eq!(config.effective_num_threads(), 7);
    }
}
