//! The issuance operations exposed by the CA, over a pluggable KMS.
//!
//! A provider owns the root CA material, the cached common signing entry,
//! the certificate store and the KMS signer. Two realizations exist:
//!
//! - [`AwsKmsProvider`] - production; private keys live in AWS KMS HSMs
//! - [`LocalKmsProvider`] - test mode; keys on the local filesystem

pub mod aws;
pub mod local;

pub use aws::AwsKmsProvider;
pub use local::LocalKmsProvider;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::Result;

/// A freshly issued device certificate.
#[derive(Debug, Clone)]
pub struct IssuedDeviceCertificate {
    /// The device identifier bound into the certificate subject.
    pub device_id: String,

    /// DER-encoded signed device certificate.
    pub certificate: Vec<u8>,

    /// The parent chain (tenant signing certificate and root CA) as a
    /// PKCS#7 certs-only bundle.
    pub parent_bundle: Vec<u8>,

    /// Expiry of the issued certificate.
    pub not_after: DateTime<Utc>,
}

/// The issuance operations implemented by every KMS provider.
///
/// Operations are async and abort when their future is dropped; remote
/// backend calls additionally carry per-request deadlines. Providers are
/// safe to share across request workers.
#[async_trait]
pub trait KmsProvider: Send + Sync + std::fmt::Debug {
    /// Creates a signing key and certificate for the tenant and persists
    /// the entry. Returns the certificate's subject key id as the visible
    /// cert id.
    async fn create_tenant_signing_certificate(
        &self,
        tenant_id: &str,
        tenant_name: &str,
    ) -> Result<String>;

    /// Returns the DER-encoded signing certificate of the tenant.
    async fn get_tenant_signing_certificate(&self, tenant_id: &str) -> Result<Vec<u8>>;

    /// Deletes the tenant's signing entry and schedules deletion of its
    /// signing key.
    async fn delete_tenant_signing_certificate(&self, tenant_id: &str) -> Result<()>;

    /// Issues a device certificate for a fresh device id in exchange for a
    /// CSR.
    async fn create_device_certificate(
        &self,
        tenant_id: &str,
        device_csr: &[u8],
    ) -> Result<IssuedDeviceCertificate>;

    /// Issues a fresh device certificate re-using the caller-supplied
    /// device id. The caller is trusted to have proved ownership of the id.
    async fn renew_device_certificate(
        &self,
        tenant_id: &str,
        device_id: &str,
        device_csr: &[u8],
    ) -> Result<IssuedDeviceCertificate>;

    /// Releases provider resources.
    async fn shutdown(&self);
}
