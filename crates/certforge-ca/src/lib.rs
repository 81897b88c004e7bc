//! Certificate issuance engine for the certforge CA.
//!
//! The CA maintains a three-tier signing hierarchy: a root CA certificate
//! signs long-lived tenant signing certificates, which in turn sign
//! short-lived device identity certificates. Device enrollment services
//! submit a tenant id and a PKCS#10 CSR; the CA assigns a fresh device id,
//! binds it into a signed certificate and returns it with the parent chain
//! packaged as a PKCS#7 certs-only bundle.
//!
//! # Components
//!
//! - [`templates`] - unsigned certificate templates for the three tiers
//! - [`csr`] - CSR validation and enrollment CSR generation
//! - [`serial`] - certificate serial numbers
//! - [`pkcs7`] - degenerate certs-only bundles
//! - [`provider`] - the issuance operations over a pluggable KMS
//! - [`manager`] - provider selection at startup

pub mod csr;
pub mod manager;
pub mod oids;
pub mod pkcs7;
pub mod provider;
pub mod serial;
pub mod templates;

mod issuance;

pub use csr::{validate_device_csr, CsrOptions, DeviceCsr, ValidatedCsr};
pub use manager::CertificateManager;
pub use provider::{AwsKmsProvider, IssuedDeviceCertificate, KmsProvider, LocalKmsProvider};
pub use templates::TemplateBuilder;

use certforge_kms::KmsError;
use certforge_store::StoreError;

/// Reserved store id of the common signing entry. Device certificates for
/// tenants without a dedicated signing key are signed under this entry.
pub const COMMON_SIGNING_KEY_ID: &str = "SharedTenantSigningKey";

/// Reserved store id (and KMS alias) of the root CA entry in production
/// deployments.
pub const CA_KEY_ALIAS: &str = "alias/CAKey";

/// Common name of the common signing certificate.
pub const COMMON_DEVICE_CERT_ISSUER: &str = "HP Device Certificate Issuer";

/// Errors surfaced by the issuance engine.
#[derive(Debug, thiserror::Error)]
pub enum CaError {
    /// Caller-visible input is malformed. Never retried, surfaced verbatim.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The requested signing certificate does not exist.
    #[error("certificate not found")]
    NotFound,

    /// A failure originating from the KMS, the certificate store,
    /// certificate parsing or template construction.
    #[error("internal error: {0}")]
    Internal(String),

    /// Invalid configuration. Fatal at startup.
    #[error(transparent)]
    Config(#[from] certforge_config::ConfigError),
}

/// Result type for issuance operations.
pub type Result<T> = std::result::Result<T, CaError>;

impl From<StoreError> for CaError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => CaError::NotFound,
            other => CaError::Internal(other.to_string()),
        }
    }
}

impl From<KmsError> for CaError {
    fn from(e: KmsError) -> Self {
        CaError::Internal(e.to_string())
    }
}
