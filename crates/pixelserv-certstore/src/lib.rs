pub mod ca;
pub mod key;
pub mod store;

pub use ca::load_ca_bundle;
pub use key::store_key;
pub use store::{CertificateStore, FsCertStore, Lookup};
