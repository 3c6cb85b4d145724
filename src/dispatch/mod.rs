//! The worker-pool dispatcher: a fixed set of OS threads independently
//! accepting one-shot connections off a single `UnixListener` (§5, §6).
//!
//! Generalizes the single-threaded blocking accept loop of
//! `connector::http::server::Server::run()` to N threads sharing one
//! listening socket, each handling exactly one connection at a time before
//! looping back to `accept()`.

pub mod lock;

use std::net::Ipv4Addr;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::authentication::{self, PeerIdentity};
use crate::config::Config;
use crate::crypto::{self, mac, zip, CipherType};
use crate::decode::{self, DecodeContext};
use crate::encode::{self, EncodeContext};
use crate::error::{Error, ErrorKind};
use crate::gids::GroupCache;
use crate::replay::ReplayStore;
use crate::subkey::Subkeys;
use crate::timer::{Timer, TimerHandle};
use crate::wire::{DecodeRequest, DecodeResponse, EncodeRequest, EncodeResponse, Frame, MessageType, HEADER_LEN};
use anomaly::format_err;

/// Everything shared read-only (or behind its own interior locking) across
/// every connection the worker pool handles.
pub struct DaemonContext {
    pub subkeys: Subkeys,
    pub prng: crypto::Prng,
    pub replay: ReplayStore,
    pub gids: GroupCache,
    pub config: Config,
    pub origin_addr: Option<Ipv4Addr>,
}

impl DaemonContext {
    fn encode_ctx(&self) -> EncodeContext<'_> {
        EncodeContext {
            subkeys: &self.subkeys,
            default_cipher: self.config.default_cipher,
            default_mac: self.config.default_mac,
            default_zip: self.config.default_zip,
            default_ttl: self.config.default_ttl,
            max_ttl: self.config.max_ttl,
            origin_addr: self.origin_addr.map(|a| a.octets()),
        }
    }

    fn decode_ctx(&self) -> DecodeContext<'_> {
        DecodeContext {
            subkeys: &self.subkeys,
            prng: &self.prng,
            replay: &self.replay,
            gids: &self.gids,
            max_ttl: self.config.max_ttl,
            allow_clock_skew: self.config.allow_clock_skew,
            allow_root_decode: self.config.allow_root_decode,
            max_retries: crate::replay::MAX_RETRIES,
        }
    }
}

struct Worker {
    id: usize,
}

impl Worker {
    fn id(&self) -> usize {
        self.id
    }
}

/// Owns the listening socket and the worker-thread pool reading off it.
pub struct Dispatcher {
    context: Arc<DaemonContext>,
    listener: UnixListener,
    terminate: Arc<AtomicBool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    timer: Arc<Timer>,
}

impl Dispatcher {
    /// Bind `socket_path` (removing a stale socket left by a crashed prior
    /// instance) and prepare a dispatcher with `num_threads` idle workers.
    pub fn bind(socket_path: &Path, context: DaemonContext) -> Result<Self, Error> {
        match std::fs::remove_file(socket_path) {
            Ok(()) => info!("removed stale socket {}", socket_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(format_err!(ErrorKind::Snafu, "couldn't remove stale socket: {}", e).into()),
        }

        let listener = UnixListener::bind(socket_path)
            .map_err(|e| format_err!(ErrorKind::Snafu, "couldn't bind socket {}: {}", socket_path.display(), e))?;

        Ok(Dispatcher {
            context: Arc::new(context),
            listener,
            terminate: Arc::new(AtomicBool::new(false)),
            handles: Mutex::new(Vec::new()),
            timer: Arc::new(Timer::start()),
        })
    }

    /// Spawn the worker pool and the periodic replay-purge/group-rebuild
    /// timers, then return immediately; workers run in the background until
    /// [`Dispatcher::shutdown`] is called.
    pub fn run(&self) -> Result<(), Error> {
        let num_threads = self.context.config.effective_num_threads();
        info!("starting {} worker threads", num_threads);

        self.schedule_maintenance();

        let mut handles = self.handles.lock().expect("dispatcher handle list poisoned");
        for id in 0..num_threads {
            let listener = self
                .listener
                .try_clone()
                .map_err(|e| format_err!(ErrorKind::Snafu, "couldn't clone listener: {}", e))?;
            let context = Arc::clone(&self.context);
            let terminate = Arc::clone(&self.terminate);
            handles.push(std::thread::spawn(move || worker_loop(Worker { id }, listener, context, terminate)));
        }
        Ok(())
    }

    fn schedule_maintenance(&self) {
        let context = Arc::clone(&self.context);
        let purge_interval = Duration::from_secs(context.config.replay_purge_secs.max(1));
        schedule_repeating(self.timer.handle(), purge_interval, {
            let context = Arc::clone(&context);
            move || {
                let now = crate::replay::now_secs();
                context.replay.purge(now);
            }
        });

        let group_interval_secs = context.config.group_update_interval;
        if group_interval_secs > 0 {
            let group_interval = Duration::from_secs(group_interval_secs);
            schedule_repeating(self.timer.handle(), group_interval, {
                let context = Arc::clone(&context);
                move || context.gids.rebuild_if_needed()
            });
        }
    }

    /// Trigger an out-of-cycle group-membership cache rebuild, as when the
    /// daemon receives `SIGHUP` (§4.4, "Refresh ... on SIGHUP").
    pub fn refresh_groups(&self) {
        self.context.gids.rebuild_if_needed();
    }

    /// The shared daemon context, exposed so the binary front-end can reach
    /// long-lived state (e.g. the PRNG, to persist it at shutdown) that
    /// outlives any single connection.
    pub fn context(&self) -> &DaemonContext {
        &self.context
    }

    /// Signal all workers to stop accepting new connections and wait for the
    /// in-flight ones to finish.
    pub fn shutdown(&self) {
        self.terminate.store(true, Ordering::SeqCst);
        // Wake blocked accept() calls by connecting to our own socket once
        // per worker; a clean shutdown doesn't need more than this.
        if let Ok(addr) = self.listener.local_addr() {
            if let Some(path) = addr.as_pathname() {
                let _ = UnixStream::connect(path);
            }
        }
        let mut handles = self.handles.lock().expect("dispatcher handle list poisoned");
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Re-fire `callback` on `interval` for as long as the timer lives, by
/// having each firing reschedule itself.
fn schedule_repeating(timer: TimerHandle, interval: Duration, callback: impl Fn() + Send + Sync + 'static) {
    let callback = Arc::new(callback);
    fire(timer, interval, callback);

    fn fire(timer: TimerHandle, interval: Duration, callback: Arc<dyn Fn() + Send + Sync>) {
        let next_timer = timer.clone();
        let next_callback = Arc::clone(&callback);
        timer.set_relative(interval, move || {
            callback();
            fire(next_timer, interval, next_callback);
        });
    }
}

fn worker_loop(worker: Worker, listener: UnixListener, context: Arc<DaemonContext>, terminate: Arc<AtomicBool>) {
    worker_debug!(worker, "started");
    while !terminate.load(Ordering::SeqCst) {
        let (stream, _addr) = match listener.accept() {
            Ok(pair) => pair,
            Err(e) => {
                worker_error!(worker, "accept failed: {}", e);
                continue;
            }
        };
        if terminate.load(Ordering::SeqCst) {
            break;
        }
        if let Err(e) = handle_connection(&worker, &stream, &context) {
            worker_error!(worker, "connection handling failed: {}", e);
        }
    }
    worker_debug!(worker, "stopped");
}

fn handle_connection(worker: &Worker, stream: &UnixStream, context: &DaemonContext) -> Result<(), Error> {
    let timeout = Duration::from_secs(context.config.connection_timeout_secs.max(1));
    stream
        .set_read_timeout(Some(timeout))
        .map_err(|e| format_err!(ErrorKind::Socket, "couldn't set read timeout: {}", e))?;
    stream
        .set_write_timeout(Some(timeout))
        .map_err(|e| format_err!(ErrorKind::Socket, "couldn't set write timeout: {}", e))?;

    let peer = authentication::peer_identity(stream)?;

    let mut header = [0u8; HEADER_LEN];
    read_exact(stream, &mut header)?;
    let payload_len = Frame::peek_payload_len(&header)?;
    if payload_len > crate::config::MAX_MESSAGE_LEN {
        return Err(Error::from(ErrorKind::BadLength));
    }
    let mut rest = vec![0u8; payload_len];
    read_exact(stream, &mut rest)?;

    let mut buf = Vec::with_capacity(HEADER_LEN + payload_len);
    buf.extend_from_slice(&header);
    buf.extend_from_slice(&rest);
    let frame = Frame::unpack(&buf)?;

    worker_debug!(worker, "request type {:?} from uid {}", frame.msg_type, peer.uid);

    // Track the fingerprint a successful decode inserted into the replay
    // store so it can be unplayed if the response never reaches the client
    // (§4.3 "unplay-on-send-failure", §4.7 step 14).
    let mut inserted_fingerprint = None;

    let response_frame = match frame.msg_type {
        MessageType::EncodeRequest => handle_encode(context, peer, &frame.payload, frame.retry),
        MessageType::DecodeRequest => {
            let (result, fingerprint) = handle_decode(context, peer, &frame.payload, frame.retry);
            inserted_fingerprint = fingerprint;
            result
        }
        other => {
            warn!("unsupported request type {:?}", other);
            Err(Error::from(ErrorKind::BadArg))
        }
    };

    let response_frame = response_frame.unwrap_or_else(|e| error_frame(&frame.msg_type, *e.kind()));
    let send_result = write_all(stream, &response_frame.pack());
    if send_result.is_err() {
        if let Some(fingerprint) = inserted_fingerprint {
            worker_debug!(worker, "unplaying fingerprint after failed response delivery");
            context.replay.remove(&fingerprint);
        }
    }
    send_result
}

fn handle_encode(context: &DaemonContext, peer: PeerIdentity, payload: &[u8], retry: u8) -> Result<Frame, Error> {
    let request = EncodeRequest::unpack(payload)?;
    let ctx = context.encode_ctx();
    let response = match encode::encode(&ctx, peer, &request, retry) {
        Ok(armored) => EncodeResponse::success(armored),
        Err(e) => EncodeResponse::failure(e.kind().to_u8(), e.to_string()),
    };
    Ok(Frame {
        msg_type: MessageType::EncodeResponse,
        retry: 0,
        payload: response.pack(),
    })
}

fn handle_decode(
    context: &DaemonContext,
    peer: PeerIdentity,
    payload: &[u8],
    retry: u8,
) -> (Result<Frame, Error>, Option<crate::replay::Fingerprint>) {
    let request = match DecodeRequest::unpack(payload) {
        Ok(request) => request,
        Err(e) => return (Err(e), None),
    };
    let ctx = context.decode_ctx();

    let (response, fingerprint) = match decode::decode(&ctx, peer, &request.armored, retry) {
        Ok(outcome) => (
            DecodeResponse {
                error_kind: None,
                error_message: String::new(),
                metadata: outcome.metadata,
            },
            outcome.fingerprint,
        ),
        Err((e, Some(outcome))) => (
            DecodeResponse {
                error_kind: Some(e.kind().to_u8()),
                error_message: e.to_string(),
                metadata: outcome.metadata,
            },
            None,
        ),
        Err((e, None)) => (
            DecodeResponse {
                error_kind: Some(e.kind().to_u8()),
                error_message: e.to_string(),
                metadata: Default::default(),
            },
            None,
        ),
    };

    (
        Ok(Frame {
            msg_type: MessageType::DecodeResponse,
            retry,
            payload: response.pack(),
        }),
        fingerprint,
    )
}

fn error_frame(request_type: &MessageType, kind: ErrorKind) -> Frame {
    let (msg_type, payload) = match request_type {
        MessageType::EncodeRequest => (
            MessageType::EncodeResponse,
            EncodeResponse::failure(kind.to_u8(), kind.to_string()).pack(),
        ),
        _ => (
            MessageType::DecodeResponse,
            DecodeResponse {
                error_kind: Some(kind.to_u8()),
                error_message: kind.to_string(),
                metadata: Default::default(),
            }
            .pack(),
        ),
    };
    Frame {
        msg_type,
        retry: 0,
        payload,
    }
}

fn read_exact(mut stream: &UnixStream, buf: &mut [u8]) -> Result<(), Error> {
    use std::io::Read;
    stream
        .read_exact(buf)
        .map_err(|e| format_err!(ErrorKind::Socket, "short read: {}", e).into())
}

fn write_all(mut stream: &UnixStream, buf: &[u8]) -> Result<(), Error> {
    use std::io::Write;
    stream
        .write_all(buf)
        .map_err(|e| format_err!(ErrorKind::Socket, "short write: {}", e).into())
}
