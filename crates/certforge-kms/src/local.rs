//! Local file-backed KMS signer.
//!
//! Keys are RSA keypairs generated in-process and persisted PKCS#1
//! PEM-encoded at `<keyId>.key` (mode 0600) under the configured directory.
//! The backend exposes no key handles, so `create_key` returns the empty id
//! and callers bind signing operations by tenant id. This backend exists to
//! enable integration testing without cloud dependencies and is explicitly
//! not a security boundary.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rsa::pkcs8::EncodePublicKey;
use rsa::RsaPrivateKey;
use tracing::{debug, info};

use crate::adapter::InMemoryRsaKey;
use crate::{check_digest, pemfile, KmsError, KmsSigner, Result, SigningScheme, KEY_SIZE};

/// File-backed signer for test deployments.
pub struct LocalKeyStore {
    dir: PathBuf,
    key_bits: usize,
}

impl LocalKeyStore {
    /// Creates a signer storing key files under the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            key_bits: KEY_SIZE,
        }
    }

    /// Overrides the generated key size. Issuance policy is RSA-4096; the
    /// validator imposes no modulus-size check, so test suites may trade
    /// key size for generation speed.
    pub fn with_key_bits(mut self, key_bits: usize) -> Self {
        self.key_bits = key_bits;
        self
    }

    /// Directory holding the key files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, key_id: &str) -> PathBuf {
        self.dir.join(format!("{key_id}.key"))
    }

    fn load_key(&self, key_id: &str) -> Result<RsaPrivateKey> {
        let path = self.key_path(key_id);
        if !path.exists() {
            return Err(KmsError::NotFound(key_id.to_string()));
        }
        pemfile::read_private_key(&path)
    }
}

#[async_trait]
impl KmsSigner for LocalKeyStore {
    async fn public_key(&self, key_id: &str) -> Result<Vec<u8>> {
        let key = self.load_key(key_id)?;
        Ok(key
            .to_public_key()
            .to_public_key_der()
            .map_err(|e| KmsError::KeyMaterial(e.to_string()))?
            .as_bytes()
            .to_vec())
    }

    async fn sign_digest(
        &self,
        key_id: &str,
        digest: &[u8],
        scheme: SigningScheme,
    ) -> Result<Vec<u8>> {
        check_digest(digest, scheme)?;
        let key = InMemoryRsaKey::from_private_key(self.load_key(key_id)?)?;
        key.sign_digest(digest)
    }

    async fn create_key(&self, _description: &str, alias: &str) -> Result<String> {
        let path = self.key_path(alias);
        if path.exists() {
            debug!("requested key already exists in the local key store");
            return Ok(String::new());
        }

        let bits = self.key_bits;
        let key = tokio::task::spawn_blocking(move || {
            let mut rng = rand::thread_rng();
            RsaPrivateKey::new(&mut rng, bits)
        })
        .await
        .map_err(|e| KmsError::Backend(e.to_string()))?
        .map_err(|e| KmsError::KeyMaterial(e.to_string()))?;

        pemfile::write_private_key(&path, &key)?;
        info!("generated a signing key in the local key store");

        // No key handles on this backend.
        Ok(String::new())
    }

    async fn delete_key(&self, alias: &str) -> Result<()> {
        match std::fs::remove_file(self.key_path(alias)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(KmsError::Io(e)),
        }
    }
}
