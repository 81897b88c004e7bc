//! Certificate signing request validation and generation.
//!
//! Acceptance is deliberately narrow: a CSR must DER-parse, its embedded
//! self-signature must verify, and both the signature algorithm
//! (SHA-256 with RSA) and the public key algorithm (RSA) are fixed. Nothing
//! else about the request is policed; in particular there is no
//! modulus-size check.

use certforge_kms::InMemoryRsaKey;
use rcgen::CertificateParams;
use tracing::error;
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::oid_registry::{OID_PKCS1_RSAENCRYPTION, OID_PKCS1_SHA256WITHRSA};
use x509_parser::prelude::FromDer;

use crate::{CaError, Result};

/// A device CSR that has passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedCsr {
    der: Vec<u8>,
}

impl ValidatedCsr {
    /// The DER bytes of the validated request.
    pub fn der(&self) -> &[u8] {
        &self.der
    }
}

/// Parses and validates a device certificate signing request.
///
/// # Errors
///
/// Every failure is [`CaError::BadRequest`]: malformed DER, a self-signature
/// that does not verify, or an algorithm outside the fixed policy.
pub fn validate_device_csr(csr_der: &[u8]) -> Result<ValidatedCsr> {
    let (rem, csr) = X509CertificationRequest::from_der(csr_der).map_err(|_| {
        error!("failed to parse the specified CSR");
        CaError::BadRequest("failed to parse csr".to_string())
    })?;
    if !rem.is_empty() {
        error!("trailing bytes after the specified CSR");
        return Err(CaError::BadRequest("failed to parse csr".to_string()));
    }

    csr.verify_signature().map_err(|_| {
        error!("failed to check the signature of the specified CSR");
        CaError::BadRequest("failed to check csr signature".to_string())
    })?;

    if csr.signature_algorithm.algorithm != OID_PKCS1_SHA256WITHRSA {
        error!("unsupported signature algorithm specified in CSR");
        return Err(CaError::BadRequest(
            "unsupported signature algorithm".to_string(),
        ));
    }
    if csr.certification_request_info.subject_pki.algorithm.algorithm != OID_PKCS1_RSAENCRYPTION {
        error!("unsupported public key algorithm specified in CSR");
        return Err(CaError::BadRequest(
            "unsupported public key algorithm".to_string(),
        ));
    }

    Ok(ValidatedCsr {
        der: csr_der.to_vec(),
    })
}

/// Options for generating a device enrollment CSR.
///
/// Used by enrollment-side tooling and the test suites. The CA's own keys
/// are RSA-4096; enrollment keys default to the same size.
#[derive(Debug, Clone)]
pub struct CsrOptions {
    key_bits: usize,
}

impl CsrOptions {
    /// Creates options with the default RSA-4096 key size.
    pub fn new() -> Self {
        Self {
            key_bits: certforge_kms::KEY_SIZE,
        }
    }

    /// Overrides the RSA key size.
    pub fn with_key_bits(mut self, key_bits: usize) -> Self {
        self.key_bits = key_bits;
        self
    }

    /// Generates a fresh RSA keypair and a CSR self-signed with it.
    pub fn generate(&self) -> Result<DeviceCsr> {
        let key = InMemoryRsaKey::generate(self.key_bits)
            .map_err(|e| CaError::Internal(e.to_string()))?;
        let params = CertificateParams::default();
        let csr = params
            .serialize_request(&key)
            .map_err(|e| CaError::Internal(format!("csr serialization failed: {e}")))?;
        Ok(DeviceCsr {
            der: csr.der().as_ref().to_vec(),
            key,
        })
    }
}

impl Default for CsrOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// A generated enrollment CSR and the keypair behind it.
pub struct DeviceCsr {
    der: Vec<u8>,
    key: InMemoryRsaKey,
}

impl DeviceCsr {
    /// The DER bytes of the request.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Consumes self and returns the DER bytes.
    pub fn into_der(self) -> Vec<u8> {
        self.der
    }

    /// The keypair the request was signed with.
    pub fn key(&self) -> &InMemoryRsaKey {
        &self.key
    }
}
