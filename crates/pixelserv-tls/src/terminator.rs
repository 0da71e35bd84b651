//! TLS Terminator (§4.F). Grounded on `phantom-capture::proxy`'s
//! `generate_ca()`/`RcgenAuthority` pairing of `rustls` + `rcgen`, but
//! unlike `hudsucker::RcgenAuthority` (which mints and caches leaves
//! entirely inside the proxy library) the SNI resolution here is a
//! hand-rolled `ResolvesServerCert`: the whole point of this crate is to
//! own that subsystem, not wrap one.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use pixelserv_certstore::{CertificateStore, Lookup};
use pixelserv_core::model::{CaBundle, TlsHandshakeState};
use pixelserv_core::status::TlsOutcome;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

/// Cipher list per §4.F step 1, restricted to the suites rustls' `ring`
/// provider actually implements. The original's exact list
/// (`PIXELSERV_CIPHER_LIST` in `pixelserv.c`) is
/// `ECDHE-ECDSA-AES128-GCM-SHA256:ECDHE-RSA-AES128-GCM-SHA256:
/// ECDHE-RSA-AES128-SHA`; rustls never implemented non-AEAD (CBC) cipher
/// suites, so the trailing `-SHA` (CBC) suite has no equivalent here and
/// is dropped rather than silently miscompiled.
fn cipher_suites() -> Vec<rustls::SupportedCipherSuite> {
    use rustls::crypto::ring::cipher_suite;
    vec![
        cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
        cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    ]
}

/// Builds a fresh `ServerConfig` per accepted TLS connection (§4.F step
/// 1), each wired to the same CA bundle and cert store but its own
/// `TlsHandshakeState` for the worker to read back afterwards.
///
/// Generic over the store implementation the same way `CertGenerator<S>`
/// is (§4.E), so the resolver depends on `pixelserv_certstore`'s
/// `CertificateStore` abstraction instead of reaching around it.
pub struct TlsTerminator<S> {
    pem_dir: PathBuf,
    ca: Arc<CaBundle>,
    store: Arc<S>,
}

impl<S: CertificateStore + 'static> TlsTerminator<S> {
    pub fn new(pem_dir: impl Into<PathBuf>, ca: Arc<CaBundle>, store: Arc<S>) -> Self {
        Self {
            pem_dir: pem_dir.into(),
            ca,
            store,
        }
    }

    /// §4.F step 1: TLS 1.2-only server context with the fixed cipher
    /// list and an SNI callback wired to the store (§4.D).
    pub fn server_config(
        &self,
        local_addr_fallback: String,
        state: Arc<Mutex<TlsHandshakeState>>,
    ) -> Result<Arc<ServerConfig>, pixelserv_core::error::TlsError> {
        let provider = rustls::crypto::CryptoProvider {
            cipher_suites: cipher_suites(),
            ..rustls::crypto::ring::default_provider()
        };

        let resolver = Arc::new(CertResolver {
            pem_dir: self.pem_dir.clone(),
            ca: self.ca.clone(),
            store: self.store.clone(),
            fallback_sni: local_addr_fallback,
            state,
        });

        let config = ServerConfig::builder_with_provider(Arc::new(provider))
            .with_protocol_versions(&[&rustls::version::TLS12])
            .map_err(|e| pixelserv_core::error::TlsError::Handshake(e.to_string()))?
            .with_no_client_auth()
            .with_cert_resolver(resolver);

        Ok(Arc::new(config))
    }
}

struct CertResolver<S> {
    pem_dir: PathBuf,
    ca: Arc<CaBundle>,
    store: Arc<S>,
    fallback_sni: String,
    state: Arc<Mutex<TlsHandshakeState>>,
}

impl<S> std::fmt::Debug for CertResolver<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertResolver").finish_non_exhaustive()
    }
}

impl<S: CertificateStore + 'static> ResolvesServerCert for CertResolver<S> {
    /// §4.D/§4.F step 2: capture `requested_sni` (falling back to the
    /// local address), resolve the store key, and on a hit build a
    /// `CertifiedKey` carrying the reversed chain extras.
    ///
    /// `rustls::server::ResolvesServerCert` is a synchronous callback, but
    /// `CertificateStore::lookup` is `async` (it does real filesystem I/O
    /// and, on a miss, a blocking-semantics send down the miss channel —
    /// §4.D/§6's "write-only blocking mode": a miss must never be silently
    /// dropped). `block_in_place` moves this worker thread out of the
    /// async scheduler for the duration of the call so `block_on` can
    /// drive `lookup` to completion without starving other tasks on a
    /// current-thread runtime; this is the standard tokio bridge for
    /// calling async code from a sync callback invoked inside a task.
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let sni = client_hello
            .server_name()
            .map(str::to_string)
            .unwrap_or_else(|| self.fallback_sni.clone());
        let key = pixelserv_certstore::store_key(&sni);

        if let Ok(mut state) = self.state.lock() {
            state.requested_sni = Some(sni.clone());
        }

        let store = self.store.clone();
        let lookup_key = key.clone();
        let lookup = tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(store.lookup(&lookup_key))
        });

        match lookup {
            Lookup::Hit(pem_bytes) => match build_certified_key(&pem_bytes, &self.ca) {
                Ok(certified) => {
                    if let Ok(mut state) = self.state.lock() {
                        state.resolved_pem_path = Some(self.pem_dir.join(&key));
                        state.outcome = TlsOutcome::Hit;
                    }
                    Some(Arc::new(certified))
                }
                Err(e) => {
                    tracing::warn!(key, error = %e, "failed to load certified key from cached pem");
                    if let Ok(mut state) = self.state.lock() {
                        state.outcome = TlsOutcome::Err;
                    }
                    None
                }
            },
            Lookup::Miss => {
                // `store.lookup` already delivered the miss notification
                // (blocking, never dropped) before returning here.
                if let Ok(mut state) = self.state.lock() {
                    state.outcome = TlsOutcome::Miss;
                }
                None
            }
        }
    }
}

/// Parse `<pem_dir>/<key>` (cert + private key concatenated, §3) into a
/// `CertifiedKey`, appending the CA's extra chain certs — already stored
/// reversed per §4.F step 2.
fn build_certified_key(
    pem_bytes: &[u8],
    ca: &CaBundle,
) -> Result<CertifiedKey, pixelserv_core::error::TlsError> {
    let blocks = pem::parse_many(pem_bytes)
        .map_err(|e| pixelserv_core::error::TlsError::Handshake(format!("parsing cached pem: {e}")))?;

    let mut chain = Vec::new();
    let mut private_key = None;
    for block in blocks {
        match block.tag() {
            "CERTIFICATE" => chain.push(CertificateDer::from(block.contents().to_vec())),
            "PRIVATE KEY" => {
                private_key = Some(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
                    block.contents().to_vec(),
                )))
            }
            _ => {}
        }
    }

    if chain.is_empty() {
        return Err(pixelserv_core::error::TlsError::Handshake(
            "cached pem contains no certificate".into(),
        ));
    }
    let private_key = private_key.ok_or_else(|| {
        pixelserv_core::error::TlsError::Handshake("cached pem contains no private key".into())
    })?;

    for extra in &ca.extra_chain_der {
        chain.push(CertificateDer::from(extra.clone()));
    }

    let signing_key = rustls::crypto::ring::sign::any_supported_type(&private_key)
        .map_err(|e| pixelserv_core::error::TlsError::Handshake(format!("unsupported leaf key: {e}")))?;

    Ok(CertifiedKey::new(chain, signing_key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cipher_suites_are_non_empty_and_aead_only() {
        let suites = cipher_suites();
        assert!(!suites.is_empty());
    }
}
