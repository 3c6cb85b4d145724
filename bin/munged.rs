//! `munged`: the MUNGE authentication daemon.
//!
//! Reads the shared secret key, derives subkeys, binds the listening
//! socket, spawns the worker pool and the maintenance timers, and runs
//! until `SIGTERM`/`SIGINT` (or `SIGHUP` to trigger a group-cache refresh).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use log::{error, info, warn};

use munge_core::config::Config;
use munge_core::crypto::Prng;
use munge_core::dispatch::lock::LockFile;
use munge_core::dispatch::{DaemonContext, Dispatcher};
use munge_core::gids::{self, GroupCache};
use munge_core::replay::ReplayStore;
use munge_core::subkey::Subkeys;
use munge_core::{Error, ErrorKind};

#[derive(Parser, Debug)]
#[command(name = "munged")]
#[command(about = "MUNGE authentication daemon")]
struct Args {
    /// Path to the shared secret key file
    #[arg(long)]
    key_file: Option<PathBuf>,

    /// Unix-domain socket to listen on
    #[arg(long)]
    socket: Option<PathBuf>,

    /// PRNG seed persistence file
    #[arg(long)]
    seed_file: Option<PathBuf>,

    /// File to write this process's PID to
    #[arg(long)]
    pid_file: Option<PathBuf>,

    /// Worker-thread count (default: derived from visible CPUs)
    #[arg(long)]
    num_threads: Option<usize>,

    /// Upper bound on accepted credential TTL, in seconds
    #[arg(long)]
    max_ttl: Option<u32>,

    /// Default credential TTL substituted for an unset request TTL
    #[arg(long)]
    default_ttl: Option<u32>,

    /// Seconds between supplementary-group cache rebuilds (0 disables)
    #[arg(long)]
    group_update_interval: Option<u64>,

    /// Explicit origin: hostname, dotted-quad, or interface name
    #[arg(long)]
    origin: Option<String>,

    /// Root decodes any credential regardless of `auth_uid`
    #[arg(long)]
    allow_root_decode: bool,

    /// Permit backdating up to `ttl` seconds on decode
    #[arg(long)]
    allow_clock_skew: bool,

    /// GID permitted to share write access to daemon directories
    #[arg(long)]
    trusted_group: Option<String>,

    /// Downgrade certain startup security checks from fatal to warning
    #[arg(long)]
    force: bool,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(e) = run(args) {
        error!("{}", e);
        std::process::exit(exit_code_for(e.kind()));
    }
}

fn run(args: Args) -> Result<(), Error> {
    let mut config = Config::default();
    if let Some(key_file) = args.key_file {
        config.key_file = key_file;
    }
    if let Some(socket) = args.socket {
        config.socket_path = socket;
    }
    if let Some(seed_file) = args.seed_file {
        config.seed_file = Some(seed_file);
    }
    if let Some(pid_file) = args.pid_file {
        config.pid_file = Some(pid_file);
    }
    if let Some(num_threads) = args.num_threads {
        config.num_threads = Some(num_threads);
    }
    if let Some(max_ttl) = args.max_ttl {
        config.max_ttl = max_ttl;
    }
    if let Some(default_ttl) = args.default_ttl {
        config.default_ttl = default_ttl;
    }
    if let Some(interval) = args.group_update_interval {
        config.group_update_interval = interval;
    }
    if args.origin.is_some() {
        config.origin = args.origin;
    }
    config.allow_root_decode |= args.allow_root_decode;
    config.allow_clock_skew |= args.allow_clock_skew;
    if args.trusted_group.is_some() {
        config.trusted_group = args.trusted_group;
    }
    config.force |= args.force;

    info!("starting munged, key file \"{}\"", config.key_file.display());

    let lock = LockFile::acquire(&config.socket_path)?;
    info!("acquired exclusive lock at \"{}\"", lock.path().display());

    let trusted_gid = config
        .trusted_group
        .as_deref()
        .map(resolve_trusted_gid)
        .transpose()?;
    if let (Some(name), Some(gid)) = (config.trusted_group.as_deref(), trusted_gid) {
        info!("trusted group \"{}\" resolved to gid {}", name, gid);
    }

    let check_opts = munge_core::config::path_security::CheckOptions {
        trusted_gid,
        force: config.force,
    };
    let subkeys = Subkeys::derive_with(&config.key_file, &check_opts)?;
    info!("derived dek/mac subkeys from key file");

    let prng = Prng::new(config.seed_file.as_deref());

    let origin_addr = munge_core::origin::resolve(config.origin.as_deref());
    if origin_addr.is_unspecified() {
        warn!("stamping null origin address 0.0.0.0");
    } else {
        info!("stamping origin address {}", origin_addr);
    }

    gids::log_scheduling(config.group_update_interval, config.group_check_mtime);
    let gids_cache = GroupCache::new(config.group_check_mtime);

    let replay = ReplayStore::new();

    if let Some(pid_file) = &config.pid_file {
        write_pid_file(pid_file)?;
    }

    let context = DaemonContext {
        subkeys,
        prng,
        replay,
        gids: gids_cache,
        config: config.clone(),
        origin_addr: Some(origin_addr),
    };

    let dispatcher = Dispatcher::bind(&config.socket_path, context)?;
    dispatcher.run()?;
    info!("listening on \"{}\"", config.socket_path.display());

    wait_for_termination(&dispatcher);
    info!("received termination signal, shutting down");

    dispatcher.shutdown();

    if let Some(seed_file) = &config.seed_file {
        if let Err(e) = dispatcher.context().prng.save(seed_file) {
            warn!("couldn't persist PRNG seed file \"{}\": {}", seed_file.display(), e);
        }
    }

    if let Some(pid_file) = &config.pid_file {
        let _ = std::fs::remove_file(pid_file);
    }

    Ok(())
}

/// Resolve a group name to a GID via `getgrnam(3)`, for the `trusted_group`
/// configuration knob (§6).
fn resolve_trusted_gid(name: &str) -> Result<u32, Error> {
    use std::ffi::CString;

    let cname = CString::new(name)
        .map_err(|_| anomaly::format_err!(ErrorKind::BadArg, "trusted group name contains a NUL byte"))?;

    let entry = unsafe { libc::getgrnam(cname.as_ptr()) };
    if entry.is_null() {
        return Err(anomaly::format_err!(ErrorKind::BadArg, "unknown trusted group \"{}\"", name).into());
    }
    Ok(unsafe { (*entry).gr_gid })
}

fn write_pid_file(path: &std::path::Path) -> Result<(), Error> {
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    let pid = std::process::id();
    let mut file = std::fs::File::create(path)
        .map_err(|e| anomaly::format_err!(ErrorKind::Snafu, "couldn't create pid file: {}", e))?;
    write!(file, "{}\n", pid).map_err(|e| anomaly::format_err!(ErrorKind::Snafu, "couldn't write pid file: {}", e))?;
    file.set_permissions(std::fs::Permissions::from_mode(0o644))
        .map_err(|e| anomaly::format_err!(ErrorKind::Snafu, "couldn't chmod pid file: {}", e))?;
    Ok(())
}

static TERMINATE: AtomicBool = AtomicBool::new(false);
static HANGUP: AtomicBool = AtomicBool::new(false);

extern "C" fn on_terminate(_sig: libc::c_int) {
    TERMINATE.store(true, Ordering::SeqCst);
}

extern "C" fn on_hangup(_sig: libc::c_int) {
    HANGUP.store(true, Ordering::SeqCst);
}

/// Install handlers for `SIGTERM`/`SIGINT`/`SIGHUP` and block the main
/// thread until a termination signal arrives, polling briefly so `SIGHUP`
/// can be observed and acted on in between (§4.8 cancellation semantics).
fn wait_for_termination(dispatcher: &Dispatcher) {
    unsafe {
        libc::signal(libc::SIGTERM, on_terminate as libc::sighandler_t);
        libc::signal(libc::SIGINT, on_terminate as libc::sighandler_t);
        libc::signal(libc::SIGHUP, on_hangup as libc::sighandler_t);
    }

    while !TERMINATE.load(Ordering::SeqCst) {
        if HANGUP.swap(false, Ordering::SeqCst) {
            info!("SIGHUP received; rebuilding supplementary group cache");
            dispatcher.refresh_groups();
        }
        std::thread::sleep(std::time::Duration::from_millis(200));
    }
}

fn exit_code_for(kind: ErrorKind) -> i32 {
    kind.to_u8() as i32
}
