//! `pixelserv`: a tiny HTTP/HTTPS responder for ad-blocking DNS
//! redirectors. Wires together the request classifier, the stats
//! collector, the on-disk certificate store and the TLS terminator
//! behind the CLI surface in §6.

mod dispatcher;
mod worker;

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;

use clap::Parser;
use pixelserv_certstore::{load_ca_bundle, FsCertStore};
use pixelserv_core::config::Config;
use pixelserv_core::model::{CaBundle, Listener};
use pixelserv_core::status::PipeMessage;
use pixelserv_core::stats::StatsSnapshot;
use pixelserv_tls::{CertGenerator, TlsTerminator};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Concrete terminator type every other module names by this alias,
/// since `TlsTerminator<S>` is generic over the store implementation and
/// the binary only ever wires up the one real, on-disk store.
pub(crate) type Terminator = TlsTerminator<FsCertStore>;

/// CLI flags mirror the original single-letter options (§6) rather than
/// long GNU-style names, since that table is the documented external
/// contract callers (init scripts, DNS redirector configs) already
/// depend on.
#[derive(Parser, Debug)]
#[command(name = "pixelserv", version, about = "Minimal HTTP/HTTPS responder for ad-blocking DNS redirectors")]
struct Cli {
    /// Bind address; defaults to all interfaces.
    #[arg(default_value = "0.0.0.0")]
    bind_addr: IpAddr,

    /// Disable the `/generate_204` shortcut.
    #[arg(short = '2')]
    no_204: bool,

    /// Stay in the foreground instead of daemonizing.
    #[arg(short = 'f')]
    foreground: bool,

    /// Disable redirect-target decoding in the classifier.
    #[arg(short = 'R')]
    no_redirect_decode: bool,

    /// Log verbosity, 0-5. Bare `-l` means INFO (3); omitted means ERROR.
    #[arg(short = 'l', num_args = 0..=1, default_missing_value = "3")]
    log_level: Option<u8>,

    /// Bind listeners to a named network interface.
    #[arg(short = 'n')]
    iface: Option<String>,

    /// Per-read timeout, seconds.
    #[arg(short = 'o', default_value_t = 10)]
    select_timeout_secs: u64,

    /// Total keepalive budget per connection, seconds.
    #[arg(short = 'O', default_value_t = 60)]
    http_keepalive_secs: u64,

    /// HTTP listening port; repeatable, defaults to 80 if never given.
    #[arg(short = 'p')]
    http_ports: Vec<u16>,

    /// HTTPS listening port; repeatable, defaults to 443 if never given.
    #[arg(short = 'k')]
    tls_ports: Vec<u16>,

    /// Path served as the HTML stats page.
    #[arg(short = 's', default_value = "/servstats")]
    stats_html_url: String,

    /// Path served as the plaintext stats page.
    #[arg(short = 't', default_value = "/servstats.txt")]
    stats_text_url: String,

    /// Maximum concurrent connections (§5 admission control).
    #[arg(short = 'T', default_value_t = 1200)]
    max_threads: usize,

    /// Drop privileges to this user after binding listeners.
    #[arg(short = 'u', default_value = "nobody")]
    drop_user: String,

    /// Directory holding `ca.crt` and the cached leaf PEMs (§6).
    #[arg(short = 'z', default_value = "/opt/var/cache/pixelserv")]
    pem_dir: PathBuf,
}

impl Cli {
    fn into_config(self) -> Config {
        Config {
            bind_addr: self.bind_addr,
            bind_iface: self.iface,
            http_ports: if self.http_ports.is_empty() { vec![80] } else { self.http_ports },
            tls_ports: if self.tls_ports.is_empty() { vec![443] } else { self.tls_ports },
            do_204: !self.no_204,
            decode_redirects: !self.no_redirect_decode,
            foreground: self.foreground,
            select_timeout: Duration::from_secs(self.select_timeout_secs),
            http_keepalive: Duration::from_secs(self.http_keepalive_secs),
            max_threads: self.max_threads,
            pem_dir: self.pem_dir,
            stats_html_url: self.stats_html_url,
            stats_text_url: self.stats_text_url,
            drop_user: Some(self.drop_user),
            log_verbosity: self.log_level.unwrap_or(0),
        }
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "info",
        4 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Raises `RLIMIT_NOFILE` to comfortably cover `max_threads` sockets plus
/// the cert store/stats/signal file descriptors every worker may open.
fn raise_fd_limit(max_threads: usize) {
    let want = (max_threads as u64).saturating_mul(2).saturating_add(64);
    match rlimit::setrlimit(rlimit::Resource::NOFILE, want, want) {
        Ok(()) => info!(want, "raised RLIMIT_NOFILE"),
        Err(e) => warn!(error = %e, want, "failed to raise RLIMIT_NOFILE, continuing with current limit"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Arc::new(cli.into_config());

    init_logging(config.log_verbosity);
    raise_fd_limit(config.max_threads);

    std::fs::create_dir_all(&config.pem_dir)?;

    let ca_path = config.pem_dir.join("ca.crt");
    let ca_bundle: CaBundle = load_ca_bundle(&ca_path)
        .map_err(|e| anyhow::anyhow!("loading CA bundle from {}: {e}", ca_path.display()))?;
    let ca_bundle = Arc::new(ca_bundle);
    info!(path = %ca_path.display(), self_signed = ca_bundle.self_signed, "loaded CA bundle");

    let (miss_tx, miss_rx) = mpsc::channel::<String>(1024);
    let cert_store = Arc::new(FsCertStore::new(config.pem_dir.clone(), miss_tx));
    let cert_generator = Arc::new(CertGenerator::new(cert_store.clone(), ca_bundle.clone()));
    tokio::spawn(cert_generator.run(miss_rx));

    let tls_terminator = Arc::new(TlsTerminator::new(config.pem_dir.clone(), ca_bundle, cert_store));

    let stats = Arc::new(StdRwLock::new(StatsSnapshot::new()));
    let (msg_tx, msg_rx) = mpsc::channel::<PipeMessage>(4096);
    tokio::spawn(dispatcher::run_stats_aggregator(stats.clone(), msg_rx));

    let kcc = Arc::new(AtomicU64::new(0));

    for listener in config.listener_plan() {
        let tls = listener.is_tls.then(|| tls_terminator.clone());
        spawn_acceptor(listener, &config, tls, &stats, &msg_tx, &kcc)?;
    }

    if let Some(user) = &config.drop_user {
        drop_privileges(user);
    }

    wait_for_shutdown(stats).await;
    Ok(())
}

/// Drops root privileges to `user` once every listener is bound (§6:
/// "-u user"). Binding happens first since low ports need root; this
/// runs after, so already-open listener fds are unaffected. A no-op
/// when not running as root, matching the original's behavior of never
/// failing startup just because privilege dropping wasn't needed.
fn drop_privileges(user: &str) {
    if unsafe { libc::getuid() } != 0 {
        return;
    }
    let c_user = match std::ffi::CString::new(user) {
        Ok(s) => s,
        Err(_) => {
            warn!(user, "username contains a NUL byte, skipping privilege drop");
            return;
        }
    };
    let pw = unsafe { libc::getpwnam(c_user.as_ptr()) };
    if pw.is_null() {
        warn!(user, "unknown user, skipping privilege drop");
        return;
    }
    let (uid, gid) = unsafe { ((*pw).pw_uid, (*pw).pw_gid) };
    unsafe {
        if libc::setgid(gid) != 0 {
            warn!(user, "setgid failed, staying as root");
            return;
        }
        if libc::setuid(uid) != 0 {
            warn!(user, "setuid failed, staying as root");
            return;
        }
    }
    info!(user, uid, gid, "dropped privileges");
}

fn spawn_acceptor(
    listener: Listener,
    config: &Arc<Config>,
    tls: Option<Arc<Terminator>>,
    stats: &Arc<StdRwLock<StatsSnapshot>>,
    msg_tx: &mpsc::Sender<PipeMessage>,
    kcc: &Arc<AtomicU64>,
) -> anyhow::Result<()> {
    let tcp_listener = dispatcher::bind_listener(&listener, config.bind_iface.as_deref())
        .map_err(|e| anyhow::anyhow!("binding {}:{} (tls={}): {e}", listener.addr, listener.port, listener.is_tls))?;
    info!(addr = %listener.addr, port = listener.port, is_tls = listener.is_tls, "listening");

    tokio::spawn(dispatcher::run_acceptor(
        tcp_listener,
        listener,
        config.clone(),
        tls,
        stats.clone(),
        msg_tx.clone(),
        kcc.clone(),
    ));
    Ok(())
}

/// §6 signal semantics: `SIGTERM` dumps stats then exits; `SIGUSR1`
/// dumps stats and keeps running; `SIGUSR2` dumps a debug snapshot at
/// `trace` level. `SIGPIPE` is left at its default-ignored tokio
/// behavior since every write already goes through `AsyncWrite`.
async fn wait_for_shutdown(stats: Arc<StdRwLock<StatsSnapshot>>) {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            return;
        }
    };
    let mut sigusr1 = signal(SignalKind::user_defined1()).expect("SIGUSR1 handler");
    let mut sigusr2 = signal(SignalKind::user_defined2()).expect("SIGUSR2 handler");

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                dump_stats(&stats, "sigterm");
                info!("shutting down");
                return;
            }
            _ = sigusr1.recv() => {
                dump_stats(&stats, "sigusr1");
            }
            _ = sigusr2.recv() => {
                let snapshot = stats.read().expect("stats lock poisoned").clone();
                tracing::trace!(?snapshot, "debug trace dump");
            }
        }
    }
}

fn dump_stats(stats: &Arc<StdRwLock<StatsSnapshot>>, trigger: &str) {
    let snapshot = stats.read().expect("stats lock poisoned");
    match serde_json::to_string(&*snapshot) {
        Ok(json) => info!(trigger, stats = %json, "stats dump"),
        Err(e) => warn!(trigger, error = %e, "failed to serialize stats dump"),
    }
}
