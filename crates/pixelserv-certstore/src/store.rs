//! On-disk certificate store (§4.D). Grounded on the storage/backend trait
//! split in `phantom-core::storage::TraceStore` + `phantom-storage`'s one
//! concrete implementation, but the backing technology here is a plain PEM
//! directory rather than an embedded KV engine: §4.D's contract (`stat()`
//! lookup, atomic rename on insert) is filesystem-shaped, not KV-shaped.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use pixelserv_core::error::CertStoreError;

/// Result of a cache lookup (§4.D).
pub enum Lookup {
    /// The PEM file's raw bytes: concatenated leaf certificate + key.
    Hit(Vec<u8>),
    Miss,
}

/// Abstraction over the cert cache, so the TLS terminator and certificate
/// generator depend on behavior rather than a concrete filesystem layout.
pub trait CertificateStore: Send + Sync {
    fn lookup(&self, key: &str) -> impl Future<Output = Lookup> + Send;
    fn insert(&self, key: &str, pem_bytes: &[u8]) -> impl Future<Output = Result<(), CertStoreError>> + Send;
}

/// Filesystem-backed store: `<pem_dir>/<key>` holds the PEM, written
/// atomically (temp file + fsync + rename, §4.E step 3). Misses are
/// reported on `miss_tx`, read by the certificate generator (§4.E).
pub struct FsCertStore {
    pem_dir: PathBuf,
    miss_tx: mpsc::Sender<String>,
}

impl FsCertStore {
    pub fn new(pem_dir: impl Into<PathBuf>, miss_tx: mpsc::Sender<String>) -> Self {
        Self {
            pem_dir: pem_dir.into(),
            miss_tx,
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.pem_dir.join(key)
    }

    /// §4.D: "emit a miss notification by writing `<key>:` to the miss
    /// channel." The trailing `:` is the wire-format record delimiter for
    /// the FIFO the spec describes; our in-process channel carries one key
    /// per message so no delimiter is needed on this side of the boundary.
    async fn notify_miss(&self, key: &str) {
        if self.miss_tx.send(key.to_string()).await.is_err() {
            warn!(key, "miss channel closed, certificate generator is gone");
        }
    }
}

impl CertificateStore for FsCertStore {
    async fn lookup(&self, key: &str) -> Lookup {
        let path = self.path_for(key);
        match tokio::fs::metadata(&path).await {
            Ok(_) => match tokio::fs::read(&path).await {
                Ok(bytes) => Lookup::Hit(bytes),
                Err(e) => {
                    warn!(key, error = %e, "pem present per stat but read failed");
                    self.notify_miss(key).await;
                    Lookup::Miss
                }
            },
            Err(_) => {
                debug!(key, "certificate cache miss");
                self.notify_miss(key).await;
                Lookup::Miss
            }
        }
    }

    async fn insert(&self, key: &str, pem_bytes: &[u8]) -> Result<(), CertStoreError> {
        atomic_write(&self.pem_dir, key, pem_bytes).await
    }
}

async fn atomic_write(dir: &Path, key: &str, bytes: &[u8]) -> Result<(), CertStoreError> {
    let tmp_path = dir.join(format!(".{key}.tmp"));
    let final_path = dir.join(key);

    let mut file = tokio::fs::File::create(&tmp_path)
        .await
        .map_err(|e| CertStoreError::Write(format!("creating {}: {e}", tmp_path.display())))?;
    file.write_all(bytes)
        .await
        .map_err(|e| CertStoreError::Write(format!("writing {}: {e}", tmp_path.display())))?;
    file.sync_all()
        .await
        .map_err(|e| CertStoreError::Write(format!("fsync {}: {e}", tmp_path.display())))?;
    drop(file);

    tokio::fs::rename(&tmp_path, &final_path)
        .await
        .map_err(|e| CertStoreError::Write(format!("renaming into {}: {e}", final_path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn miss_then_insert_then_hit() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        let store = FsCertStore::new(dir.path(), tx);

        match store.lookup("_example.com").await {
            Lookup::Miss => {}
            Lookup::Hit(_) => panic!("expected a miss on empty store"),
        }
        assert_eq!(rx.recv().await.unwrap(), "_example.com");

        store.insert("_example.com", b"cert+key pem").await.unwrap();
        match store.lookup("_example.com").await {
            Lookup::Hit(bytes) => assert_eq!(bytes, b"cert+key pem"),
            Lookup::Miss => panic!("expected a hit after insert"),
        }
    }

    #[tokio::test]
    async fn insert_leaves_no_partial_file_visible_under_final_name() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::channel(4);
        let store = FsCertStore::new(dir.path(), tx);
        store.insert("host", b"data").await.unwrap();
        assert!(!dir.path().join(".host.tmp").exists());
        assert!(dir.path().join("host").exists());
    }
}
