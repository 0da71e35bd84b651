//! Certificate Generator (§4.E). Grounded on `phantom-capture::proxy`'s
//! `generate_ca()` use of `rcgen::CertificateParams`/`KeyPair`, extended
//! here to sign leaves under a CA loaded from disk rather than one
//! generated fresh at process start.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use pixelserv_core::error::TlsError;
use pixelserv_core::model::CaBundle;
use rcgen::{CertificateDer, CertificateParams, DnType, KeyPair};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{info, warn};

use pixelserv_certstore::{CertificateStore, Lookup};

/// Consumes the miss channel (§4.D/§4.E) and signs leaves on demand.
/// Concurrent misses for the same key collapse onto one signing attempt
/// via a per-key async mutex (§4.E step 1).
pub struct CertGenerator<S> {
    store: Arc<S>,
    ca: Arc<CaBundle>,
    inflight: Arc<StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl<S: CertificateStore + 'static> CertGenerator<S> {
    pub fn new(store: Arc<S>, ca: Arc<CaBundle>) -> Self {
        Self {
            store,
            ca,
            inflight: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    /// Runs until `miss_rx` closes (process shutdown, §5: "on process exit
    /// the certificate generator task is cancelled"). Each miss is handled
    /// on its own spawned task so a slow sign for one hostname never
    /// delays misses for others.
    pub async fn run(self: Arc<Self>, mut miss_rx: mpsc::Receiver<String>) {
        while let Some(key) = miss_rx.recv().await {
            let this = self.clone();
            tokio::spawn(async move {
                this.handle_miss(key).await;
            });
        }
    }

    async fn handle_miss(&self, key: String) {
        let lock = {
            let mut inflight = self.inflight.lock().expect("inflight mutex poisoned");
            inflight
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let _guard = lock.lock().await;

        if matches!(self.store.lookup(&key).await, Lookup::Hit(_)) {
            // another flight already generated it while we waited.
            self.inflight.lock().expect("inflight mutex poisoned").remove(&key);
            return;
        }

        match sign_leaf(&key, &self.ca) {
            Ok(pem) => match self.store.insert(&key, &pem).await {
                Ok(()) => info!(key, "generated and cached leaf certificate"),
                Err(e) => warn!(key, error = %e, "failed to persist generated certificate"),
            },
            Err(e) => warn!(key, error = %e, "certificate signing failed, not retrying immediately"),
        }

        self.inflight.lock().expect("inflight mutex poisoned").remove(&key);
    }
}

/// `SignLeaf(hostname, ca_key, ca_cert) -> PEM` (§4.E step 3): a fresh key
/// pair and an end-entity cert for `hostname`, signed by the CA, returned
/// as the concatenated cert+key PEM that gets written to the store.
fn sign_leaf(hostname: &str, ca: &CaBundle) -> Result<Vec<u8>, TlsError> {
    let ca_key = KeyPair::try_from(ca.ca_key_der.as_slice())
        .map_err(|e| TlsError::SignFailed(format!("loading ca key: {e}")))?;
    let ca_cert_der = CertificateDer::from(ca.ca_cert_der.clone());
    let ca_params = CertificateParams::from_ca_cert_der(&ca_cert_der)
        .map_err(|e| TlsError::SignFailed(format!("parsing ca cert: {e}")))?;
    let ca_cert = ca_params
        .self_signed(&ca_key)
        .map_err(|e| TlsError::SignFailed(format!("rebuilding ca issuer: {e}")))?;

    let leaf_key =
        KeyPair::generate().map_err(|e| TlsError::SignFailed(format!("generating leaf key: {e}")))?;
    let mut leaf_params = CertificateParams::new(vec![hostname.to_string()])
        .map_err(|e| TlsError::SignFailed(format!("invalid hostname {hostname}: {e}")))?;
    leaf_params
        .distinguished_name
        .push(DnType::CommonName, hostname);

    let leaf_cert = leaf_params
        .signed_by(&leaf_key, &ca_cert, &ca_key)
        .map_err(|e| TlsError::SignFailed(format!("signing leaf for {hostname}: {e}")))?;

    let mut pem = leaf_cert.pem();
    pem.push_str(&leaf_key.serialize_pem());
    Ok(pem.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{BasicConstraints, IsCa};

    fn test_ca() -> CaBundle {
        let ca_key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params
            .distinguished_name
            .push(DnType::CommonName, "pixelserv test CA");
        let ca_cert = params.self_signed(&ca_key).unwrap();
        CaBundle {
            ca_cert_der: ca_cert.der().to_vec(),
            ca_key_der: ca_key.serialize_der(),
            extra_chain_der: Vec::new(),
            self_signed: true,
        }
    }

    #[test]
    fn sign_leaf_produces_cert_and_key_pem_blocks() {
        let ca = test_ca();
        let pem_bytes = sign_leaf("_example.com", &ca).unwrap();
        let text = String::from_utf8(pem_bytes).unwrap();
        assert!(text.contains("BEGIN CERTIFICATE"));
        assert!(text.contains("BEGIN PRIVATE KEY"));
    }
}
