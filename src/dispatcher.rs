//! Dispatcher (§4.H). The C source multiplexes every listener and the
//! stats pipe on one `select()` loop; tokio's reactor already performs
//! that multiplexing underneath each awaited future, so the two
//! cooperating halves of that loop are modeled here as two independent
//! tasks instead: one stats aggregator (sole writer of `StatsSnapshot`,
//! preserving §4.C's single-writer invariant) and one acceptor per
//! configured listener, each admission-controlled against the same
//! shared concurrency counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};

use pixelserv_core::config::Config;
use pixelserv_core::model::{ConnectionContext, Listener};
use pixelserv_core::status::PipeMessage;
use pixelserv_core::stats::StatsSnapshot;
use socket2::{Domain, Socket, TcpKeepalive, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::worker::{self, WorkerContext};
use crate::Terminator;

/// §4.H: bind one listening socket with the non-default options the
/// spec calls out (`SO_REUSEADDR`, `TCP_NODELAY`, `TCP_FASTOPEN` where
/// the kernel supports it), which tokio's `TcpListener::bind` doesn't
/// expose directly — grounded on `socket2`'s own "raw options, wrap in
/// tokio after" pattern rather than any one example repo, since none of
/// the retrieved corpus binds a raw listening socket itself.
pub fn bind_listener(listener: &Listener, iface: Option<&str>) -> std::io::Result<TcpListener> {
    let addr = std::net::SocketAddr::new(listener.addr, listener.port);
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.set_tcp_keepalive(&TcpKeepalive::new())?;

    #[cfg(target_os = "linux")]
    if let Some(name) = iface {
        socket.bind_device(Some(name.as_bytes()))?;
    }
    #[cfg(not(target_os = "linux"))]
    let _ = iface;

    #[cfg(target_os = "linux")]
    {
        // TCP_FASTOPEN needs kernel >= 3.16; failure here is advisory
        // only, never fatal to startup.
        if let Err(e) = socket.set_tcp_fastopen(16) {
            warn!(error = %e, "TCP_FASTOPEN unavailable, continuing without it");
        }
    }

    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    let std_listener: std::net::TcpListener = socket.into();
    std_listener.set_nonblocking(true)?;
    TcpListener::from_std(std_listener)
}

/// Sole writer of the shared `StatsSnapshot` (§4.C). Runs until every
/// worker-side `msg_tx` clone has been dropped, i.e. process shutdown.
pub async fn run_stats_aggregator(stats: Arc<StdRwLock<StatsSnapshot>>, mut msg_rx: mpsc::Receiver<PipeMessage>) {
    while let Some(msg) = msg_rx.recv().await {
        stats.write().expect("stats lock poisoned").apply(&msg);
    }
}

/// One listener's accept loop (§4.H). Applies admission control against
/// `max_threads` (§5: "a new connection arriving when `kcc >= T` is
/// accepted and immediately closed, counted against `clt`") before
/// spawning a connection worker per accepted socket.
///
/// `listener.is_tls` marks a port named by `-k` (§6); the original's `-k`
/// case falls through into the same bind-list `-p` populates, so such a
/// port gets exactly one listening socket, not a dedicated TLS-only one.
/// Every connection accepted on it is then peeked for a TLS
/// `ClientHello` (leading byte `0x16`, the TLS record `ContentType::
/// Handshake`) to decide per-connection whether to terminate TLS or
/// serve it as plain HTTP — the "`-k` also adds as plain port" behavior
/// documented in §6's CLI table.
pub async fn run_acceptor(
    tcp_listener: TcpListener,
    listener: Listener,
    config: Arc<Config>,
    tls: Option<Arc<Terminator>>,
    stats: Arc<StdRwLock<StatsSnapshot>>,
    msg_tx: mpsc::Sender<PipeMessage>,
    kcc: Arc<AtomicU64>,
) -> ! {
    loop {
        let (stream, peer_addr) = match tcp_listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(port = listener.port, error = %e, "accept failed");
                continue;
            }
        };

        if kcc.load(Ordering::Acquire) as usize >= config.max_threads {
            stats.write().expect("stats lock poisoned").clt += 1;
            drop(stream);
            continue;
        }

        if let Err(e) = stream.set_nodelay(true) {
            warn!(%peer_addr, error = %e, "failed to set TCP_NODELAY");
        }

        kcc.fetch_add(1, Ordering::AcqRel);
        stats.write().expect("stats lock poisoned").record_connection_started();

        let ctx = Arc::new(WorkerContext {
            config: config.clone(),
            tls: tls.clone(),
            stats: stats.clone(),
            msg_tx: msg_tx.clone(),
        });
        let kcc = kcc.clone();
        let port = listener.port;
        let tls_capable = listener.is_tls;

        tokio::spawn(async move {
            spawn_worker(stream, peer_addr, port, tls_capable, ctx).await;
            kcc.fetch_sub(1, Ordering::AcqRel);
        });
    }
}

/// Decides plain-vs-TLS for one accepted connection and runs it to
/// completion. Only ports marked TLS-capable are peeked at all, so a
/// plain-only `-p` port never pays for the extra syscall.
async fn spawn_worker(stream: TcpStream, peer_addr: std::net::SocketAddr, port: u16, tls_capable: bool, ctx: Arc<WorkerContext>) {
    let is_tls = tls_capable && looks_like_tls_handshake(&stream).await;
    info!(%peer_addr, port, is_tls, "connection accepted");
    let conn_ctx = ConnectionContext::new(peer_addr, port, is_tls);
    worker::run(stream, conn_ctx, is_tls, ctx).await;
}

/// Peeks (without consuming) the first byte of the connection to tell a
/// TLS `ClientHello` from plain HTTP. A read error or a connection that
/// closes before sending anything is treated as not-TLS; the worker's
/// own read loop handles reporting that outcome.
async fn looks_like_tls_handshake(stream: &TcpStream) -> bool {
    const TLS_HANDSHAKE_CONTENT_TYPE: u8 = 0x16;
    let mut probe = [0u8; 1];
    matches!(stream.peek(&mut probe).await, Ok(1) if probe[0] == TLS_HANDSHAKE_CONTENT_TYPE)
}
