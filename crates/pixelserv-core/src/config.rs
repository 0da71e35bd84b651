//! Shared runtime configuration (§6, ambient). CLI parsing itself lives in
//! the `pixelserv` binary (out of scope per §1), but the parsed result is
//! this plain value type so the dispatcher, worker and classifier all
//! close over one `Arc<Config>` instead of scattered globals — the
//! single-owner-value translation of the C source's global option
//! variables that §9 already prescribes for the stats counters.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::model::Listener;

/// `CHAR_BUF_SIZE` from the C source: the unit the read buffer grows by.
pub const CHAR_BUF_SIZE: usize = 4096;
/// Hard ceiling on the growable read buffer (§4.G, §9): 128 KiB.
pub const MAX_CHAR_BUF_LOTS: usize = 32;
/// `MAX_HTTP_POST_LEN`: cap on bytes read from a POST body.
pub const MAX_HTTP_POST_LEN: usize = 65536;
/// `MAX_HTTP_POST_WAIT`: total seconds to wait for a POST body to arrive.
pub const MAX_HTTP_POST_WAIT: Duration = Duration::from_secs(30);
/// `LGG_DEBUG`: highest accepted `/log=` verbosity level.
pub const LGG_DEBUG: u8 = 5;
/// `N_EMA_MAX`: sample count after which the stats EMAs switch from
/// cumulative-average to fixed-window behavior (§4.C).
pub const N_EMA_MAX: u64 = 128;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: IpAddr,
    pub bind_iface: Option<String>,
    pub http_ports: Vec<u16>,
    pub tls_ports: Vec<u16>,
    pub do_204: bool,
    pub decode_redirects: bool,
    pub foreground: bool,
    pub select_timeout: Duration,
    pub http_keepalive: Duration,
    pub max_threads: usize,
    pub pem_dir: PathBuf,
    pub stats_html_url: String,
    pub stats_text_url: String,
    pub drop_user: Option<String>,
    pub log_verbosity: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::from([0, 0, 0, 0]),
            bind_iface: None,
            http_ports: vec![80],
            tls_ports: vec![443],
            do_204: true,
            decode_redirects: true,
            foreground: false,
            select_timeout: Duration::from_secs(10),
            http_keepalive: Duration::from_secs(60),
            max_threads: 1200,
            pem_dir: PathBuf::from("/opt/var/cache/pixelserv"),
            stats_html_url: "/servstats".to_string(),
            stats_text_url: "/servstats.txt".to_string(),
            drop_user: Some("nobody".to_string()),
            log_verbosity: 0,
        }
    }
}

impl Config {
    /// `wait_cnt` from §4.G: idle-round budget for the keepalive loop.
    pub fn keepalive_wait_rounds(&self) -> u32 {
        let rounds = self.http_keepalive.as_secs_f64() / self.select_timeout.as_secs_f64().max(1e-9);
        rounds.floor().max(1.0) as u32
    }

    pub fn is_tls_port(&self, port: u16) -> bool {
        self.tls_ports.contains(&port)
    }

    /// One `Listener` per distinct configured port (§6 `-p`/`-k`). The
    /// original's `-k` case falls through into the same `ports[]` bind
    /// list `-p` populates (`case 'k': ... /* fall through to case 'p' */`)
    /// — a `-k` port gets exactly one listening socket, not two. We carry
    /// that forward as one `Listener` per port, deduplicated, ordered
    /// TLS ports first. A port named by both `-p` and `-k` is bound once
    /// and treated as TLS-capable.
    pub fn listener_plan(&self) -> Vec<Listener> {
        let mut seen = BTreeSet::new();
        let mut plan = Vec::new();
        for &port in self.tls_ports.iter().chain(self.http_ports.iter()) {
            if seen.insert(port) {
                plan.push(Listener::new(self.bind_addr, port, self.is_tls_port(port)));
            }
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keepalive_wait_rounds_matches_spec_example() {
        let mut cfg = Config::default();
        cfg.select_timeout = Duration::from_secs(10);
        cfg.http_keepalive = Duration::from_secs(60);
        assert_eq!(cfg.keepalive_wait_rounds(), 6);
    }

    #[test]
    fn keepalive_wait_rounds_floors_at_one() {
        let mut cfg = Config::default();
        cfg.select_timeout = Duration::from_secs(10);
        cfg.http_keepalive = Duration::from_secs(5);
        assert_eq!(cfg.keepalive_wait_rounds(), 1);
    }

    #[test]
    fn listener_plan_dedupes_a_port_named_by_both_flags() {
        let mut cfg = Config::default();
        cfg.http_ports = vec![80, 443];
        cfg.tls_ports = vec![443];
        let plan = cfg.listener_plan();
        assert_eq!(plan.len(), 2);
        let port_443 = plan.iter().find(|l| l.port == 443).unwrap();
        assert!(port_443.is_tls);
        let port_80 = plan.iter().find(|l| l.port == 80).unwrap();
        assert!(!port_80.is_tls);
    }
}
