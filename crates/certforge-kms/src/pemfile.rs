//! PEM encoding helpers for certificates and RSA private keys on disk.
//!
//! Private keys are written PKCS#1 PEM with mode 0600. These helpers back
//! the local KMS signer and the local provider's CA material; the remote
//! backend never touches key files.

use std::path::Path;

use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey, LineEnding};
use rsa::RsaPrivateKey;

use crate::{KmsError, Result};

/// PEM-encodes DER certificate bytes and writes them to the given path.
pub fn write_certificate(path: &Path, cert_der: &[u8]) -> Result<()> {
    let block = pem::Pem::new("CERTIFICATE", cert_der.to_vec());
    std::fs::write(path, pem::encode(&block))?;
    Ok(())
}

/// Reads a PEM-encoded certificate and returns its DER bytes.
pub fn read_certificate(path: &Path) -> Result<Vec<u8>> {
    let raw = std::fs::read_to_string(path)?;
    let block = pem::parse(&raw).map_err(|e| KmsError::KeyMaterial(e.to_string()))?;
    Ok(block.into_contents())
}

/// PKCS#1 PEM-encodes an RSA private key and writes it with mode 0600.
pub fn write_private_key(path: &Path, key: &RsaPrivateKey) -> Result<()> {
    let encoded = key
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| KmsError::KeyMaterial(e.to_string()))?;
    std::fs::write(path, encoded.as_bytes())?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path)?.permissions();
        perms.set_mode(0o600);
        std::fs::set_permissions(path, perms)?;
    }

    Ok(())
}

/// Reads a PKCS#1 PEM-encoded RSA private key from disk.
pub fn read_private_key(path: &Path) -> Result<RsaPrivateKey> {
    let raw = std::fs::read_to_string(path)?;
    RsaPrivateKey::from_pkcs1_pem(&raw).map_err(|e| KmsError::KeyMaterial(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_key_round_trips() {
        let mut rng = rand::thread_rng();
        let key = RsaPrivateKey::new(&mut rng, 1024).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tenant.key");
        write_private_key(&path, &key).unwrap();

        let loaded = read_private_key(&path).unwrap();
        assert_eq!(loaded, key);
    }

    #[cfg(unix)]
    #[test]
    fn private_key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let mut rng = rand::thread_rng();
        let key = RsaPrivateKey::new(&mut rng, 1024).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tenant.key");
        write_private_key(&path, &key).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn certificate_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ca.cert");
        let der = vec![0x30, 0x03, 0x02, 0x01, 0x01];

        write_certificate(&path, &der).unwrap();
        assert_eq!(read_certificate(&path).unwrap(), der);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.starts_with("-----BEGIN CERTIFICATE-----"));
    }
}
