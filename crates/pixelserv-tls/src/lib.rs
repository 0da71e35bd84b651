pub mod certgen;
pub mod terminator;

pub use certgen::CertGenerator;
pub use terminator::TlsTerminator;
