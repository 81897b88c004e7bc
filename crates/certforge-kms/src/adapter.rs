//! Bridges between KMS signers and the certificate authoring library.
//!
//! `rcgen` drives signing through a synchronous callback that receives the
//! full to-be-signed message. [`KmsSigningKey`] adapts that callback to the
//! async [`KmsSigner`] capability: it pre-hashes the message with SHA-256
//! and forwards only the digest, re-entering the runtime through a captured
//! handle. Certificate assembly therefore runs on a blocking thread (the
//! providers use `spawn_blocking`), never directly on a runtime worker.

use std::sync::Arc;

use rcgen::{PublicKeyData, SignatureAlgorithm, SigningKey, PKCS_RSA_SHA256};
use rsa::pkcs1::EncodeRsaPublicKey;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use tracing::error;

use crate::{KmsError, KmsSigner, Result, SigningScheme};

/// Extracts the raw `subjectPublicKey` bytes (PKCS#1 `RSAPublicKey`) from a
/// DER-encoded SubjectPublicKeyInfo.
fn spki_to_pkcs1(spki_der: &[u8]) -> Result<Vec<u8>> {
    let public_key = RsaPublicKey::from_public_key_der(spki_der)
        .map_err(|e| KmsError::KeyMaterial(e.to_string()))?;
    let document = public_key
        .to_pkcs1_der()
        .map_err(|e| KmsError::KeyMaterial(e.to_string()))?;
    Ok(document.as_bytes().to_vec())
}

/// A signing key whose private half lives behind a [`KmsSigner`].
///
/// Constructed per signing operation around (signer, key id, public key).
/// The signing callback must only be invoked from a blocking thread; it
/// re-enters the async runtime to reach the signer.
pub struct KmsSigningKey {
    signer: Arc<dyn KmsSigner>,
    key_id: String,
    subject_public_key: Vec<u8>,
    handle: tokio::runtime::Handle,
}

impl KmsSigningKey {
    /// Binds a signing key to the named KMS key, fetching and caching its
    /// public half.
    pub async fn bind(signer: Arc<dyn KmsSigner>, key_id: &str) -> Result<Self> {
        let spki = signer.public_key(key_id).await?;
        let subject_public_key = spki_to_pkcs1(&spki)?;
        Ok(Self {
            signer,
            key_id: key_id.to_string(),
            subject_public_key,
            handle: tokio::runtime::Handle::current(),
        })
    }

    /// The KMS key id this signing key is bound to.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }
}

impl PublicKeyData for KmsSigningKey {
    fn der_bytes(&self) -> &[u8] {
        &self.subject_public_key
    }

    fn algorithm(&self) -> &'static SignatureAlgorithm {
        &PKCS_RSA_SHA256
    }
}

impl SigningKey for KmsSigningKey {
    fn sign(&self, msg: &[u8]) -> std::result::Result<Vec<u8>, rcgen::Error> {
        let digest = Sha256::digest(msg);
        self.handle
            .block_on(self.signer.sign_digest(
                &self.key_id,
                &digest,
                SigningScheme::RsaPkcs1v15Sha256,
            ))
            .map_err(|e| {
                error!(error = %e, "kms signing request failed");
                rcgen::Error::RemoteKeyError
            })
    }
}

/// A bare RSA subject public key for certificates whose subject key lives in
/// the KMS (the tenant signing certificates).
pub struct RsaSubjectKey {
    subject_public_key: Vec<u8>,
}

impl RsaSubjectKey {
    /// Parses a DER-encoded SubjectPublicKeyInfo.
    pub fn from_spki_der(spki_der: &[u8]) -> Result<Self> {
        Ok(Self {
            subject_public_key: spki_to_pkcs1(spki_der)?,
        })
    }
}

impl PublicKeyData for RsaSubjectKey {
    fn der_bytes(&self) -> &[u8] {
        &self.subject_public_key
    }

    fn algorithm(&self) -> &'static SignatureAlgorithm {
        &PKCS_RSA_SHA256
    }
}

/// An in-process RSA keypair. Used by the local signer backend and by
/// enrollment-side CSR generation; never part of the remote path.
pub struct InMemoryRsaKey {
    private_key: RsaPrivateKey,
    subject_public_key: Vec<u8>,
}

impl InMemoryRsaKey {
    /// Generates a fresh keypair of the given size.
    pub fn generate(bits: usize) -> Result<Self> {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, bits)
            .map_err(|e| KmsError::KeyMaterial(e.to_string()))?;
        Self::from_private_key(private_key)
    }

    /// Wraps an existing private key.
    pub fn from_private_key(private_key: RsaPrivateKey) -> Result<Self> {
        let subject_public_key = private_key
            .to_public_key()
            .to_pkcs1_der()
            .map_err(|e| KmsError::KeyMaterial(e.to_string()))?
            .as_bytes()
            .to_vec();
        Ok(Self {
            private_key,
            subject_public_key,
        })
    }

    /// The wrapped private key.
    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    /// DER-encoded SubjectPublicKeyInfo of the public half.
    pub fn public_key_spki_der(&self) -> Result<Vec<u8>> {
        Ok(self
            .private_key
            .to_public_key()
            .to_public_key_der()
            .map_err(|e| KmsError::KeyMaterial(e.to_string()))?
            .as_bytes()
            .to_vec())
    }

    /// Signs a SHA-256 digest with RSASSA-PKCS1-v1.5.
    pub fn sign_digest(&self, digest: &[u8]) -> Result<Vec<u8>> {
        crate::check_digest(digest, SigningScheme::RsaPkcs1v15Sha256)?;
        self.private_key
            .sign(Pkcs1v15Sign::new::<Sha256>(), digest)
            .map_err(|e| KmsError::Backend(e.to_string()))
    }
}

impl PublicKeyData for InMemoryRsaKey {
    fn der_bytes(&self) -> &[u8] {
        &self.subject_public_key
    }

    fn algorithm(&self) -> &'static SignatureAlgorithm {
        &PKCS_RSA_SHA256
    }
}

impl SigningKey for InMemoryRsaKey {
    fn sign(&self, msg: &[u8]) -> std::result::Result<Vec<u8>, rcgen::Error> {
        let digest = Sha256::digest(msg);
        self.sign_digest(&digest).map_err(|e| {
            error!(error = %e, "local signing failed");
            rcgen::Error::RemoteKeyError
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::signature::Verifier;

    #[test]
    fn in_memory_key_signs_verifiable_digests() {
        let key = InMemoryRsaKey::generate(1024).unwrap();

        let digest = Sha256::digest(b"to be signed");
        let signature = key.sign_digest(&digest).unwrap();

        let verifying_key = rsa::pkcs1v15::VerifyingKey::<Sha256>::new(
            key.private_key().to_public_key(),
        );
        let signature = rsa::pkcs1v15::Signature::try_from(signature.as_slice()).unwrap();
        verifying_key.verify(b"to be signed", &signature).unwrap();
    }

    #[test]
    fn sign_digest_rejects_wrong_digest_length() {
        let key = InMemoryRsaKey::generate(1024).unwrap();
        let err = key.sign_digest(&[0u8; 20]).unwrap_err();
        assert!(matches!(
            err,
            KmsError::DigestLength {
                expected: 32,
                actual: 20
            }
        ));
    }

    #[test]
    fn spki_conversion_round_trips() {
        let key = InMemoryRsaKey::generate(1024).unwrap();
        let spki = key.public_key_spki_der().unwrap();

        let subject = RsaSubjectKey::from_spki_der(&spki).unwrap();
        assert_eq!(subject.der_bytes(), key.der_bytes());
    }

    #[test]
    fn spki_conversion_rejects_garbage() {
        assert!(matches!(
            RsaSubjectKey::from_spki_der(&[0x30, 0x00]),
            Err(KmsError::KeyMaterial(_))
        ));
    }
}
