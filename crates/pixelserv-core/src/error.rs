use thiserror::Error;

#[derive(Debug, Error)]
pub enum CertStoreError {
    #[error("failed to open pem directory: {0}")]
    Open(String),
    #[error("failed to write certificate record: {0}")]
    Write(String),
    #[error("failed to read certificate record: {0}")]
    Read(String),
    #[error("failed to load ca bundle: {0}")]
    CaBundle(String),
}

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("certificate cache miss for {0}")]
    Miss(String),
    #[error("certificate generation failed: {0}")]
    SignFailed(String),
    #[error("tls handshake error: {0}")]
    Handshake(String),
}
