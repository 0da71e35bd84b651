pub mod classify;
pub mod config;
pub mod error;
pub mod model;
pub mod responses;
pub mod stats;
pub mod status;

pub use config::Config;
pub use error::{CertStoreError, TlsError};
pub use model::{CaBundle, ConnectionContext, Listener, TlsHandshakeState};
pub use stats::StatsSnapshot;
pub use status::{PipeMessage, StatusCode, TlsOutcome};
