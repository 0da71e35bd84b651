//! Status codes carried on the worker→dispatcher stats channel (§7).
//!
//! Mirrors the C source's flat `enum status_code`, split here into the
//! three families the spec groups it into: connection-level failures,
//! classification/send outcomes, and control messages. Keeping them as one
//! enum (rather than three) matches §3's `PipeMessage.status_code` being a
//! single discriminant field.

use serde::{Deserialize, Serialize};
use std::fmt;

/// `status_code` field of a `PipeMessage` (§3, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    // -- connection-level failures --
    FailGeneral,
    FailTimeout,
    FailClosed,
    FailReply,

    // -- classification / send outcomes --
    SendNoUrl,
    SendNoExt,
    SendUnkExt,
    SendBadPath,
    SendBad,
    SendPost,
    SendHead,
    SendOptions,
    SendRedirect,
    Send204,

    // -- successful media --
    SendGif,
    SendPng,
    SendJpg,
    SendSwf,
    SendIco,
    SendTxt,
    SendStats,
    SendStatsText,

    // -- control messages --
    ActionLogVerb(u8),
    ActionDecKcc,
}

impl StatusCode {
    /// True for every variant that represents one served/failed request,
    /// i.e. everything except the control messages (§4.C: "If status <
    /// ACTION_LOG_VERB: increment the counter...").
    pub fn is_request_outcome(self) -> bool {
        !matches!(self, StatusCode::ActionLogVerb(_) | StatusCode::ActionDecKcc)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// `tls_status_code` field of a `PipeMessage` (§3, §4.F).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TlsOutcome {
    #[default]
    Unknown,
    Hit,
    HitThenClose,
    Miss,
    Err,
}

/// The fixed-size IPC record sent from every Connection Worker to the
/// Dispatcher (§3). Only enum discriminants are meaningful; payload fields
/// are valid only for specific statuses, as documented per-field below.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipeMessage {
    pub status_code: StatusCode,
    /// Only meaningful on TLS connections; `TlsOutcome::Unknown` otherwise.
    pub tls_status_code: TlsOutcome,
    /// Bytes read from the client for this request; 0 if unknown/unread.
    pub rx_total: u64,
    /// Wall-clock time to serve this request, in milliseconds. Zero for
    /// the terminal `ActionDecKcc` message (§4.G step 7).
    pub run_time_ms: u64,
    /// Only meaningful on `ActionDecKcc`: number of requests served on the
    /// connection before it closed.
    pub keepalive_req_count: u32,
}

impl PipeMessage {
    pub fn request(status_code: StatusCode, rx_total: u64, run_time_ms: u64) -> Self {
        Self {
            status_code,
            tls_status_code: TlsOutcome::Unknown,
            rx_total,
            run_time_ms,
            keepalive_req_count: 0,
        }
    }

    pub fn with_tls(mut self, tls_status_code: TlsOutcome) -> Self {
        self.tls_status_code = tls_status_code;
        self
    }

    pub fn dec_kcc(keepalive_req_count: u32) -> Self {
        Self {
            status_code: StatusCode::ActionDecKcc,
            tls_status_code: TlsOutcome::Unknown,
            rx_total: 0,
            run_time_ms: 0,
            keepalive_req_count,
        }
    }

    pub fn log_verb(level: u8) -> Self {
        Self {
            status_code: StatusCode::ActionLogVerb(level),
            tls_status_code: TlsOutcome::Unknown,
            rx_total: 0,
            run_time_ms: 0,
            keepalive_req_count: 0,
        }
    }
}
