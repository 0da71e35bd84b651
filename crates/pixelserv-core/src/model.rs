//! Core data model (§3). Types here are shared by the dispatcher, the
//! connection worker, the certificate store and the TLS terminator; none
//! of them own any I/O, so this module has no dependency on `tokio`'s
//! networking types, `rustls` or `rcgen`.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Instant;

use crate::status::TlsOutcome;

/// One configured listening socket. Immutable after startup; lifetime is
/// the whole process (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Listener {
    pub addr: IpAddr,
    pub port: u16,
    pub is_tls: bool,
}

impl Listener {
    pub fn new(addr: IpAddr, port: u16, is_tls: bool) -> Self {
        Self { addr, port, is_tls }
    }
}

/// Per-connection TLS bookkeeping populated by the SNI callback and read
/// back by stats reporting (§3).
#[derive(Debug, Clone, Default)]
pub struct TlsHandshakeState {
    pub requested_sni: Option<String>,
    pub resolved_pem_path: Option<PathBuf>,
    pub outcome: TlsOutcome,
}

/// State owned by exactly one connection worker; created at accept,
/// dropped when the worker returns (§3).
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub peer_addr: std::net::SocketAddr,
    pub local_port: u16,
    pub accepted_at: Instant,
    pub tls_state: Option<TlsHandshakeState>,
}

impl ConnectionContext {
    pub fn new(peer_addr: std::net::SocketAddr, local_port: u16, is_tls: bool) -> Self {
        Self {
            peer_addr,
            local_port,
            accepted_at: Instant::now(),
            tls_state: is_tls.then(TlsHandshakeState::default),
        }
    }
}

/// The root CA certificate and, if it is not self-signed, the rest of the
/// chain parsed from the same file (§3). Loaded once at startup and shared
/// read-only by every worker; `rcgen`/`rustls` types live in
/// `pixelserv-tls`/`pixelserv-certstore`, so this just carries DER bytes.
#[derive(Clone)]
pub struct CaBundle {
    /// DER-encoded CA certificate used to sign leaves.
    pub ca_cert_der: Vec<u8>,
    /// PKCS#8 DER-encoded CA private key.
    pub ca_key_der: Vec<u8>,
    /// Additional chain certificates (DER), in the order they should be
    /// presented to the client, i.e. already reversed from file order per
    /// §4.F step 2 ("iterated in reverse").
    pub extra_chain_der: Vec<Vec<u8>>,
    /// Whether `ca_cert_der`'s signature verified against its own public
    /// key (§3). When `false`, `extra_chain_der` holds the rest of the
    /// `X509_INFO` chain parsed from the same PEM file.
    pub self_signed: bool,
}
