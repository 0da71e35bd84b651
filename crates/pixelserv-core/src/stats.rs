//! Stats Collector (§4.C). Owned exclusively by the dispatcher task; every
//! worker reports in over the `PipeMessage` channel instead of touching
//! shared counters directly, which is how `Arc<Mutex<_>>` contention around
//! the old C source's global counters (§9) gets designed out entirely.

use serde::Serialize;

use crate::config::N_EMA_MAX;
use crate::status::{PipeMessage, StatusCode, TlsOutcome};

/// Running counters and EMAs, rendered verbatim as the body of both stats
/// pages (§4.A `STATS_HTML`/`STATS_TEXT`), and serializable for periodic
/// structured-logging dumps (SIGUSR1/SIGTERM).
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsSnapshot {
    // per-outcome request counters
    pub err: u64,
    pub tmo: u64,
    pub cls: u64,
    pub cly: u64,
    pub gif: u64,
    pub txt: u64,
    pub jpg: u64,
    pub png: u64,
    pub swf: u64,
    pub ico: u64,
    pub bad: u64,
    pub sta: u64,
    pub stt: u64,
    pub noc: u64,
    pub rdr: u64,
    pub nfe: u64,
    pub ufe: u64,
    pub nou: u64,
    pub pth: u64,
    pub pst: u64,
    pub hed: u64,
    pub opt: u64,

    // TLS handshake outcome counters
    pub slh: u64,
    pub slc: u64,
    pub slm: u64,
    pub sle: u64,
    pub slu: u64,

    // connection-level counters
    pub clt: u64,
    pub count: u64,
    pub kcc: u64,
    pub kmx: u64,
    pub krq: u64,

    // EMAs and maxima
    pub avg: f64,
    pub rmx: u64,
    pub tav: f64,
    pub tmx: u64,
    pub kvg: f64,

    #[serde(skip)]
    kvg_samples: u64,
}

fn ema(old: f64, sample: f64, n: u64) -> f64 {
    let divisor = n.min(N_EMA_MAX).max(1) as f64;
    old + (sample - old) / divisor
}

impl StatsSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher calls this the moment it spawns a worker for a newly
    /// accepted connection, before any `PipeMessage` for it can arrive.
    pub fn record_connection_started(&mut self) {
        self.clt += 1;
        self.kcc += 1;
        self.kmx = self.kmx.max(self.kcc);
    }

    /// §4.C: "If status < ACTION_LOG_VERB, increment the matching counter;
    /// if rx_total > 0, update avg/rmx; if status != FAIL_TIMEOUT, update
    /// tav/tmx from run_time_ms." `avg`/`rmx` track request size (bytes);
    /// `tav`/`tmx` track service latency (ms) — excluded on timeout since
    /// there's no meaningful elapsed-time sample for a connection that
    /// never produced a response.
    pub fn apply(&mut self, msg: &PipeMessage) {
        if msg.status_code.is_request_outcome() {
            self.count += 1;
            if msg.rx_total > 0 {
                self.avg = ema(self.avg, msg.rx_total as f64, self.count);
                self.rmx = self.rmx.max(msg.rx_total);
            }
            if msg.status_code != StatusCode::FailTimeout {
                self.tav = ema(self.tav, msg.run_time_ms as f64, self.count);
                self.tmx = self.tmx.max(msg.run_time_ms);
            }
            self.bump_outcome(msg.status_code);
            self.bump_tls(msg.tls_status_code);
            return;
        }

        match msg.status_code {
            StatusCode::ActionDecKcc => {
                self.kcc = self.kcc.saturating_sub(1);
                self.krq = self.krq.max(msg.keepalive_req_count as u64);
                self.kvg_samples += 1;
                self.kvg = ema(self.kvg, msg.keepalive_req_count as f64, self.kvg_samples);
            }
            StatusCode::ActionLogVerb(_) => {
                // verbosity change only; the dispatcher applies the new
                // level to its own tracing filter, nothing to count here.
            }
            _ => unreachable!("request outcomes handled above"),
        }
    }

    fn bump_outcome(&mut self, status: StatusCode) {
        match status {
            StatusCode::FailGeneral => self.err += 1,
            StatusCode::FailTimeout => self.tmo += 1,
            StatusCode::FailClosed => self.cls += 1,
            StatusCode::FailReply => self.cly += 1,
            StatusCode::SendGif => self.gif += 1,
            StatusCode::SendTxt => self.txt += 1,
            StatusCode::SendJpg => self.jpg += 1,
            StatusCode::SendPng => self.png += 1,
            StatusCode::SendSwf => self.swf += 1,
            StatusCode::SendIco => self.ico += 1,
            StatusCode::SendBad => self.bad += 1,
            StatusCode::SendStats => self.sta += 1,
            StatusCode::SendStatsText => self.stt += 1,
            StatusCode::Send204 => self.noc += 1,
            StatusCode::SendRedirect => self.rdr += 1,
            StatusCode::SendNoExt => self.nfe += 1,
            StatusCode::SendUnkExt => self.ufe += 1,
            StatusCode::SendNoUrl => self.nou += 1,
            StatusCode::SendBadPath => self.pth += 1,
            StatusCode::SendPost => self.pst += 1,
            StatusCode::SendHead => self.hed += 1,
            StatusCode::SendOptions => self.opt += 1,
            StatusCode::ActionLogVerb(_) | StatusCode::ActionDecKcc => {
                unreachable!("control messages filtered by is_request_outcome")
            }
        }
    }

    fn bump_tls(&mut self, outcome: TlsOutcome) {
        match outcome {
            TlsOutcome::Hit => self.slh += 1,
            TlsOutcome::HitThenClose => self.slc += 1,
            TlsOutcome::Miss => self.slm += 1,
            TlsOutcome::Err => self.sle += 1,
            TlsOutcome::Unknown => self.slu += 1,
        }
    }

    /// `STATS_TEXT` body.
    pub fn render_text(&self) -> String {
        self.render()
    }

    /// `STATS_HTML` body; `stats_html_response` wraps this in the
    /// `<pre>` prelude/epilogue, so the two bodies are identical here.
    pub fn render_html(&self) -> String {
        self.render()
    }

    /// Plain `key value` lines, one per counter, shared by both stats
    /// endpoints.
    fn render(&self) -> String {
        format!(
            "err {err}\ntmo {tmo}\ncls {cls}\ncly {cly}\n\
             gif {gif}\ntxt {txt}\njpg {jpg}\npng {png}\nswf {swf}\nico {ico}\n\
             bad {bad}\nsta {sta}\nstt {stt}\nnoc {noc}\nrdr {rdr}\n\
             nfe {nfe}\nufe {ufe}\nnou {nou}\npth {pth}\npst {pst}\nhed {hed}\nopt {opt}\n\
             slh {slh}\nslc {slc}\nslm {slm}\nsle {sle}\nslu {slu}\n\
             clt {clt}\ncount {count}\nkcc {kcc}\nkmx {kmx}\nkrq {krq}\n\
             avg {avg:.2}\nrmx {rmx}\ntav {tav:.2}\ntmx {tmx}\nkvg {kvg:.2}\n",
            err = self.err,
            tmo = self.tmo,
            cls = self.cls,
            cly = self.cly,
            gif = self.gif,
            txt = self.txt,
            jpg = self.jpg,
            png = self.png,
            swf = self.swf,
            ico = self.ico,
            bad = self.bad,
            sta = self.sta,
            stt = self.stt,
            noc = self.noc,
            rdr = self.rdr,
            nfe = self.nfe,
            ufe = self.ufe,
            nou = self.nou,
            pth = self.pth,
            pst = self.pst,
            hed = self.hed,
            opt = self.opt,
            slh = self.slh,
            slc = self.slc,
            slm = self.slm,
            sle = self.sle,
            slu = self.slu,
            clt = self.clt,
            count = self.count,
            kcc = self.kcc,
            kmx = self.kmx,
            krq = self.krq,
            avg = self.avg,
            rmx = self.rmx,
            tav = self.tav,
            tmx = self.tmx,
            kvg = self.kvg,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_lifecycle_updates_concurrency_counters() {
        let mut stats = StatsSnapshot::new();
        stats.record_connection_started();
        stats.record_connection_started();
        assert_eq!(stats.kcc, 2);
        assert_eq!(stats.kmx, 2);

        stats.apply(&PipeMessage::dec_kcc(3));
        assert_eq!(stats.kcc, 1);
        assert_eq!(stats.krq, 3);
        assert_eq!(stats.kvg, 3.0);
    }

    #[test]
    fn gif_request_bumps_counter_and_ema() {
        let mut stats = StatsSnapshot::new();
        stats.apply(&PipeMessage::request(StatusCode::SendGif, 120, 4));
        assert_eq!(stats.gif, 1);
        assert_eq!(stats.count, 1);
        assert_eq!(stats.avg, 120.0);
        assert_eq!(stats.tav, 4.0);
        assert_eq!(stats.rmx, 120);
        assert_eq!(stats.tmx, 4);
    }

    #[test]
    fn ema_converges_toward_recent_samples_after_window() {
        let mut stats = StatsSnapshot::new();
        for _ in 0..(N_EMA_MAX * 2) {
            stats.apply(&PipeMessage::request(StatusCode::SendGif, 0, 10));
        }
        for _ in 0..32 {
            stats.apply(&PipeMessage::request(StatusCode::SendGif, 0, 100));
        }
        assert!(stats.tav > 10.0);
        assert!(stats.tav < 100.0);
    }

    #[test]
    fn log_verb_control_message_does_not_bump_counters() {
        let mut stats = StatsSnapshot::new();
        stats.apply(&PipeMessage::log_verb(3));
        assert_eq!(stats.count, 0);
    }

    #[test]
    fn tls_outcome_is_tallied_alongside_request_outcome() {
        let mut stats = StatsSnapshot::new();
        stats.apply(&PipeMessage::request(StatusCode::SendGif, 10, 1).with_tls(TlsOutcome::Hit));
        assert_eq!(stats.slh, 1);
        assert_eq!(stats.gif, 1);
    }

    #[test]
    fn render_includes_every_field_name() {
        let stats = StatsSnapshot::new();
        let text = stats.render();
        for key in ["err", "gif", "slh", "kcc", "avg", "kvg"] {
            assert!(text.contains(key), "missing {key} in rendered stats");
        }
    }
}
