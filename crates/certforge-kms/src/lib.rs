//! Key management service (KMS) signers for the certforge CA.
//!
//! All private-key operations in the CA go through the [`KmsSigner`]
//! capability: produce a signature over a pre-computed digest for a named
//! key, expose the public half, create and delete keys. Two realizations are
//! provided:
//!
//! - [`AwsKmsSigner`] - HSM-backed keys in AWS KMS; private keys never leave
//!   the service
//! - [`LocalKeyStore`] - in-process RSA keys persisted as PEM files; enables
//!   integration testing without cloud dependencies and is explicitly not a
//!   security boundary
//!
//! The [`adapter`] module bridges a signer into the certificate authoring
//! library's synchronous signing callback: the adapter pre-hashes the
//! to-be-signed message with SHA-256 and hands only the digest to the
//! signer.

pub mod adapter;
pub mod aws;
pub mod local;
pub mod pemfile;

#[cfg(any(test, feature = "test-util"))]
pub mod fake;

pub use adapter::{InMemoryRsaKey, KmsSigningKey, RsaSubjectKey};
pub use aws::{AwsKmsSigner, KmsApi};
pub use local::LocalKeyStore;

use async_trait::async_trait;

/// Size of the RSA keys used by the CA.
pub const KEY_SIZE: usize = 4096;

/// Errors returned by KMS signer operations.
#[derive(Debug, thiserror::Error)]
pub enum KmsError {
    /// The requested key does not exist.
    #[error("key not found: {0}")]
    NotFound(String),

    /// The digest length does not match the signing scheme.
    #[error("digest length {actual} does not match signing scheme (expected {expected})")]
    DigestLength { expected: usize, actual: usize },

    /// Key material could not be parsed or encoded.
    #[error("key material error: {0}")]
    KeyMaterial(String),

    /// The KMS backend reported a failure.
    #[error("kms error: {0}")]
    Backend(String),

    /// A KMS request exceeded its deadline.
    #[error("kms request timed out")]
    Timeout,

    /// A local key file could not be read or written.
    #[error("key file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for KMS signer operations.
pub type Result<T> = std::result::Result<T, KmsError>;

/// Signature schemes supported by the CA. Issuance policy is fixed to
/// RSASSA-PKCS1-v1.5 with SHA-256.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningScheme {
    /// RSASSA-PKCS1-v1.5 over a SHA-256 digest.
    RsaPkcs1v15Sha256,
}

impl SigningScheme {
    /// Length in bytes of the digest this scheme signs.
    pub fn digest_len(&self) -> usize {
        match self {
            SigningScheme::RsaPkcs1v15Sha256 => 32,
        }
    }
}

/// Capability interface for private-key custody and signing.
///
/// The two realizations have materially different trust models: the remote
/// backend performs signing inside an HSM and never releases key material,
/// while the local backend holds keys in-process. Nothing outside a signer
/// implementation handles raw private keys in the remote path.
#[async_trait]
pub trait KmsSigner: Send + Sync {
    /// Returns the DER-encoded SubjectPublicKeyInfo of the named key.
    async fn public_key(&self, key_id: &str) -> Result<Vec<u8>>;

    /// Signs a pre-computed digest with the named key. The digest length
    /// must match the scheme.
    async fn sign_digest(&self, key_id: &str, digest: &[u8], scheme: SigningScheme)
        -> Result<Vec<u8>>;

    /// Creates a signing key under the given alias, returning the backend
    /// key id. Creation is idempotent by alias: if a key already exists
    /// under the alias its id is returned. Backends without key handles
    /// return an empty id.
    async fn create_key(&self, description: &str, alias: &str) -> Result<String>;

    /// Deletes the key behind the given alias. Remote backends schedule
    /// deletion rather than destroying the key immediately.
    async fn delete_key(&self, alias: &str) -> Result<()>;
}

pub(crate) fn check_digest(digest: &[u8], scheme: SigningScheme) -> Result<()> {
    let expected = scheme.digest_len();
    if digest.len() != expected {
        return Err(KmsError::DigestLength {
            expected,
            actual: digest.len(),
        });
    }
    Ok(())
}
