//! CA bundle loading (§3 `CaBundle`, §6 `<pem_dir>/ca.crt`). Determines
//! whether the configured CA certificate is self-signed or the leaf of a
//! longer chain, the same `x509-parser`-backed check the rest of the
//! retrieved corpus pairs with `rcgen` for (`codex-network-proxy`,
//! `plabayo-rama`).

use std::path::Path;

use pixelserv_core::{error::CertStoreError, model::CaBundle};
use rcgen::KeyPair;

/// Load `<pem_dir>/ca.crt` (§6): one or more `CERTIFICATE` blocks (CA
/// cert first, any chain intermediates after) plus one `PRIVATE KEY`
/// block for the CA's key, all concatenated in the same file — the same
/// cert+key-in-one-file shape as a leaf `CertificateRecord` (§3).
pub fn load_ca_bundle(ca_path: &Path) -> Result<CaBundle, CertStoreError> {
    let text = std::fs::read_to_string(ca_path)
        .map_err(|e| CertStoreError::CaBundle(format!("reading {}: {e}", ca_path.display())))?;

    let blocks = pem::parse_many(text.as_bytes())
        .map_err(|e| CertStoreError::CaBundle(format!("parsing {}: {e}", ca_path.display())))?;

    let mut certs_der: Vec<Vec<u8>> = Vec::new();
    let mut key_der: Option<Vec<u8>> = None;
    for block in blocks {
        match block.tag() {
            "CERTIFICATE" => certs_der.push(block.contents().to_vec()),
            "PRIVATE KEY" => key_der = Some(block.contents().to_vec()),
            _ => {}
        }
    }

    if certs_der.is_empty() {
        return Err(CertStoreError::CaBundle(format!(
            "{} contains no CERTIFICATE blocks",
            ca_path.display()
        )));
    }
    let key_der = key_der.ok_or_else(|| {
        CertStoreError::CaBundle(format!("{} contains no PRIVATE KEY block", ca_path.display()))
    })?;
    // validate the key parses before committing it to the bundle.
    KeyPair::try_from(key_der.as_slice())
        .map_err(|e| CertStoreError::CaBundle(format!("parsing ca private key: {e}")))?;

    let ca_cert_der = certs_der.remove(0);
    let self_signed = verify_self_signed(&ca_cert_der);

    // §4.F step 2: chain extras are attached "iterated in reverse".
    let extra_chain_der = if self_signed {
        Vec::new()
    } else {
        certs_der.into_iter().rev().collect()
    };

    Ok(CaBundle {
        ca_cert_der,
        ca_key_der: key_der,
        extra_chain_der,
        self_signed,
    })
}

fn verify_self_signed(der: &[u8]) -> bool {
    match x509_parser::parse_x509_certificate(der) {
        Ok((_, cert)) => cert.verify_signature(None).is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa};
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn self_signed_ca_is_detected() {
        let key_pair = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params
            .distinguished_name
            .push(DnType::CommonName, "pixelserv test CA");
        let cert = params.self_signed(&key_pair).unwrap();

        let combined = format!("{}{}", cert.pem(), key_pair.serialize_pem());
        let ca_file = write_temp(&combined);

        let bundle = load_ca_bundle(ca_file.path()).unwrap();
        assert!(bundle.self_signed);
        assert!(bundle.extra_chain_der.is_empty());
    }
}
