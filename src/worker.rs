//! Connection Worker (§4.G). One `tokio::task` per accepted connection
//! (see SPEC_FULL.md's task-model note on why a spawned task stands in
//! for the "detached, 32 KiB stack" OS thread the original called for).

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::task::{Context, Poll};
use std::time::Instant;

use pixelserv_core::classify::{self, ClassifyResult};
use pixelserv_core::config::{Config, CHAR_BUF_SIZE, MAX_CHAR_BUF_LOTS, MAX_HTTP_POST_WAIT};
use pixelserv_core::model::{ConnectionContext, TlsHandshakeState};
use pixelserv_core::status::{PipeMessage, StatusCode, TlsOutcome};
use pixelserv_core::stats::StatsSnapshot;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::Terminator;

/// Either side of the listener: plain or TLS-terminated. A small manual
/// `AsyncRead`/`AsyncWrite` wrapper so the keepalive loop below doesn't
/// need to know which one it's holding.
enum Conn {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::server::TlsStream<TcpStream>>),
}

impl AsyncRead for Conn {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Conn::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Conn::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Conn {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Conn::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Conn::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Conn::Plain(s) => Pin::new(s).poll_flush(cx),
            Conn::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Conn::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Conn::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Everything a worker needs that outlives any single connection.
pub struct WorkerContext {
    pub config: Arc<Config>,
    pub tls: Option<Arc<Terminator>>,
    /// Read by every worker to render the stats pages, written only by
    /// the stats aggregator task (§4.C: "owned exclusively by the
    /// dispatcher"); a `std::sync::RwLock` because `classify()`'s
    /// `stats_html`/`stats_text` callbacks are synchronous closures.
    pub stats: Arc<StdRwLock<StatsSnapshot>>,
    pub msg_tx: mpsc::Sender<PipeMessage>,
}

/// §4.G: run one connection to completion. Never propagates an error —
/// every failure is recovered locally into a status code (§7).
pub async fn run(stream: TcpStream, conn_ctx: ConnectionContext, is_tls: bool, ctx: Arc<WorkerContext>) {
    let peer_addr = conn_ctx.peer_addr;
    let local_port = conn_ctx.local_port;
    let start_time = conn_ctx.accepted_at;
    let mut num_req: u32 = 0;

    // §4.F.4/§3: `pipedata.ssl` is set once, right after the handshake,
    // and every subsequent per-request pipe write on this connection
    // reuses that same value (`socket_handler.c`: set at line 676,
    // reused unchanged through every `write(pipefd, ...)` in the event
    // loop). `Unknown` for plain connections, where it's never read.
    let mut tls_outcome = TlsOutcome::Unknown;

    let mut conn = if is_tls {
        match accept_tls(stream, local_port, &ctx).await {
            Ok(conn) => {
                tls_outcome = TlsOutcome::Hit;
                conn
            }
            Err(outcome) => {
                let _ = ctx
                    .msg_tx
                    .send(PipeMessage::request(StatusCode::FailGeneral, 0, 0).with_tls(outcome))
                    .await;
                let _ = ctx.msg_tx.send(PipeMessage::dec_kcc(0)).await;
                return;
            }
        }
    } else {
        Conn::Plain(stream)
    };

    // every per-request message on this connection carries the same
    // `tls_outcome` the handshake produced (`Unknown` on plain
    // connections, where `with_tls` is simply never called).
    let send_msg = |status: StatusCode, rx_total: u64, run_time_ms: u64| {
        let msg = PipeMessage::request(status, rx_total, run_time_ms);
        if is_tls {
            msg.with_tls(tls_outcome)
        } else {
            msg
        }
    };

    let wait_budget = ctx.config.keepalive_wait_rounds();

    loop {
        let mut wait_cnt = wait_budget;
        let read_result = loop {
            match read_request(&mut conn, &ctx.config).await {
                ReadOutcome::Data(buf) => break Some(buf),
                ReadOutcome::PeerClosed { first_read } => {
                    if first_read && is_tls && tls_outcome == TlsOutcome::Hit {
                        // client disconnected right after a successful
                        // handshake without ever sending a request
                        // (§4.F.4: tracked separately as `slc`).
                        debug!(%peer_addr, "tls peer closed without sending bytes");
                        tls_outcome = TlsOutcome::HitThenClose;
                        let _ = ctx.msg_tx.send(send_msg(StatusCode::FailClosed, 0, 0)).await;
                    }
                    break None;
                }
                ReadOutcome::TimedOut => {
                    wait_cnt -= 1;
                    if wait_cnt == 0 {
                        let _ = ctx.msg_tx.send(send_msg(StatusCode::FailTimeout, 0, 0)).await;
                        break None;
                    }
                }
                ReadOutcome::Reset => {
                    let _ = ctx.msg_tx.send(send_msg(StatusCode::FailClosed, 0, 0)).await;
                    break None;
                }
            }
        };

        let Some(buf) = read_result else { break };

        let request_start = Instant::now();
        let mut rx_total = buf.len() as u64;
        let Some(parsed) = classify::parse_request(&buf) else {
            let _ = ctx.msg_tx.send(send_msg(StatusCode::FailGeneral, rx_total, 0)).await;
            break;
        };

        if parsed.method == "POST" {
            rx_total += drain_post_body(&mut conn, &parsed).await;
        }

        let stats = &ctx.stats;
        let ClassifyResult { status, response } = classify::classify(
            &parsed,
            &ctx.config,
            || stats.read().expect("stats lock poisoned").render_html(),
            || stats.read().expect("stats lock poisoned").render_text(),
        );

        if !response.is_empty() {
            if let Err(e) = conn.write_all(&response).await {
                let fail_status = match e.kind() {
                    io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset => StatusCode::FailReply,
                    _ => StatusCode::FailGeneral,
                };
                let _ = ctx.msg_tx.send(send_msg(fail_status, rx_total, 0)).await;
                break;
            }
        }

        num_req += 1;
        let run_time_ms = request_start.elapsed().as_millis() as u64;
        let _ = ctx.msg_tx.send(send_msg(status, rx_total, run_time_ms)).await;

        // jpeg replies close the connection even though the worker still
        // waits for a keepalive round per §9's documented quirk.
        if status == StatusCode::SendJpg {
            break;
        }
    }

    let _ = conn.shutdown().await;
    let _ = ctx.msg_tx.send(PipeMessage::dec_kcc(num_req)).await;
    debug!(%peer_addr, elapsed = ?start_time.elapsed(), num_req, "connection closed");
}

async fn accept_tls(stream: TcpStream, local_port: u16, ctx: &WorkerContext) -> Result<Conn, TlsOutcome> {
    let terminator = ctx.tls.as_ref().expect("is_tls implies a configured terminator");
    let state = Arc::new(StdMutex::new(TlsHandshakeState::default()));
    let fallback = stream
        .local_addr()
        .map(|a| a.ip().to_string())
        .unwrap_or_else(|_| format!("0.0.0.0:{local_port}"));

    let server_config = match terminator.server_config(fallback, state.clone()) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(error = %e, "failed to build per-connection tls config");
            return Err(TlsOutcome::Err);
        }
    };

    let acceptor = tokio_rustls::TlsAcceptor::from(server_config);
    let outcome_of = |state: &StdMutex<TlsHandshakeState>| state.lock().expect("tls state lock poisoned").outcome;

    match acceptor.accept(stream).await {
        Ok(tls_stream) => {
            let outcome = outcome_of(&state);
            if outcome == TlsOutcome::Hit {
                Ok(Conn::Tls(Box::new(tls_stream)))
            } else {
                Err(outcome)
            }
        }
        Err(_) => {
            let outcome = outcome_of(&state);
            Err(if outcome == TlsOutcome::Unknown { TlsOutcome::Err } else { outcome })
        }
    }
}

enum ReadOutcome {
    Data(Vec<u8>),
    PeerClosed { first_read: bool },
    TimedOut,
    Reset,
}

async fn read_request(conn: &mut Conn, config: &Config) -> ReadOutcome {
    let mut buf = Vec::with_capacity(CHAR_BUF_SIZE);
    let mut lots = 0;
    let mut first_read = true;

    loop {
        let mut chunk = vec![0u8; CHAR_BUF_SIZE];
        let n = match timeout(config.select_timeout, conn.read(&mut chunk)).await {
            Ok(Ok(n)) => n,
            Ok(Err(_)) => return ReadOutcome::Reset,
            Err(_) => return ReadOutcome::TimedOut,
        };

        if n == 0 {
            return if buf.is_empty() {
                ReadOutcome::PeerClosed { first_read }
            } else {
                ReadOutcome::Data(buf)
            };
        }

        buf.extend_from_slice(&chunk[..n]);
        first_read = false;

        if n < CHAR_BUF_SIZE {
            return ReadOutcome::Data(buf);
        }

        lots += 1;
        if lots >= MAX_CHAR_BUF_LOTS {
            return ReadOutcome::Data(buf);
        }
    }
}

/// Reads whatever is left of a POST body that wasn't already in
/// `parsed.body_prefix`, returning only the byte count newly read from
/// the socket (the caller already counted `body_prefix` once, via the
/// initial read's `rx_total`). Mirrors `socket_handler.c`'s
/// `recv_len = body_len - 4; length -= recv_len; post_buf_size -= recv_len;`
/// (subtract what's already in hand before planning further reads) and
/// `pipedata.rx_total += rv` (accumulate only genuinely new bytes).
async fn drain_post_body(conn: &mut Conn, parsed: &classify::ParsedRequest) -> u64 {
    let content_length = classify::parse_content_length(&parsed.headers);
    let planned = classify::post_read_plan(content_length);
    let already_buffered = parsed.body_prefix.len().min(planned);
    let mut remaining = planned - already_buffered;
    if remaining == 0 {
        return 0;
    }

    let mut drained_from_socket: u64 = 0;
    let mut scratch = vec![0u8; CHAR_BUF_SIZE.min(remaining)];
    let drained = timeout(MAX_HTTP_POST_WAIT, async {
        while remaining > 0 {
            let want = remaining.min(scratch.len());
            match conn.read(&mut scratch[..want]).await {
                Ok(0) => break,
                Ok(n) => {
                    drained_from_socket += n as u64;
                    remaining = remaining.saturating_sub(n);
                }
                Err(_) => break,
            }
        }
    })
    .await;
    if drained.is_err() {
        warn!("timed out waiting for post body");
    }
    drained_from_socket
}
