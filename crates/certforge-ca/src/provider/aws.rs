//! AWS KMS provider.
//!
//! Private keys are bound to the HSM behind AWS KMS and never leave it;
//! signing hands digests to the service. In production the root CA entry is
//! provisioned out-of-band under the `alias/CAKey` alias and this provider
//! verifies at startup that the stored certificate matches the HSM key. In
//! test mode the CA material may be created in-process through KMS.

use std::sync::Arc;

use async_trait::async_trait;
use certforge_config::Config;
use certforge_kms::{AwsKmsSigner, KmsError, KmsSigner};
use certforge_store::CertStore;
use tracing::{error, info};
use uuid::Uuid;

use crate::issuance::{self, CaMaterial};
use crate::provider::{IssuedDeviceCertificate, KmsProvider};
use crate::templates::TemplateBuilder;
use crate::{csr, CaError, Result, CA_KEY_ALIAS, COMMON_SIGNING_KEY_ID};

fn tenant_key_alias(tenant_id: &str) -> String {
    format!("alias/{tenant_id}")
}

/// HSM-backed KMS provider for production deployments.
pub struct AwsKmsProvider {
    templates: TemplateBuilder,
    store: Arc<dyn CertStore>,
    signer: Arc<dyn KmsSigner>,
    ca: CaMaterial,
    common: certforge_store::SigningCertificateEntry,
    per_tenant_signing: bool,
}

impl std::fmt::Debug for AwsKmsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsKmsProvider")
            .field("per_tenant_signing", &self.per_tenant_signing)
            .finish_non_exhaustive()
    }
}

impl AwsKmsProvider {
    /// Initializes the provider from configuration using ambient AWS
    /// credentials.
    pub async fn init(config: &Config) -> Result<Self> {
        let store = certforge_store::init(config.cert_store()?, config.data_dir()).await?;
        let signer = Arc::new(AwsKmsSigner::connect().await);
        Self::init_with(config, store, signer).await
    }

    /// Initializes the provider over explicit store and signer instances.
    pub async fn init_with(
        config: &Config,
        store: Arc<dyn CertStore>,
        signer: Arc<dyn KmsSigner>,
    ) -> Result<Self> {
        let templates = TemplateBuilder::new(Arc::new(config.cert_template().clone()));

        let ca = if config.test_mode {
            Self::generate_ca(&templates, &signer, config).await?
        } else {
            Self::load_ca(&store, &signer).await?
        };

        let common = issuance::ensure_common_signing_entry(
            &templates,
            &store,
            &signer,
            &ca,
            &tenant_key_alias(COMMON_SIGNING_KEY_ID),
        )
        .await
        .map_err(|e| {
            error!("failed to initialize the common signing certificate");
            e
        })?;

        info!("AWS KMS provider initialized");
        Ok(Self {
            templates,
            store,
            signer,
            ca,
            common,
            per_tenant_signing: config.certificate_authority.per_tenant_signing,
        })
    }

    /// Production startup: the CA certificate comes from the certificate
    /// store and must match the CA key held by KMS.
    async fn load_ca(
        store: &Arc<dyn CertStore>,
        signer: &Arc<dyn KmsSigner>,
    ) -> Result<CaMaterial> {
        let ca_spki = signer.public_key(CA_KEY_ALIAS).await.map_err(|e| {
            error!("failed to get the public key of the CA key from KMS");
            CaError::from(e)
        })?;
        let entry = store.get(CA_KEY_ALIAS).await.map_err(|e| {
            error!("failed to get the CA certificate from the certificate store");
            CaError::from(e)
        })?;
        issuance::verify_key_binding(&entry.certificate, &ca_spki).map_err(|e| {
            error!("CA certificate public key does not match the CA key stored in KMS");
            e
        })?;

        Ok(CaMaterial {
            cert_der: entry.certificate,
            key_id: CA_KEY_ALIAS.to_string(),
        })
    }

    /// Test-mode startup: generate the CA key in KMS if absent and sign a
    /// fresh root certificate with it. Production CA material is
    /// provisioned by operators, never from inside the service.
    async fn generate_ca(
        templates: &TemplateBuilder,
        signer: &Arc<dyn KmsSigner>,
        config: &Config,
    ) -> Result<CaMaterial> {
        let key_id = match signer.public_key(CA_KEY_ALIAS).await {
            Ok(_) => CA_KEY_ALIAS.to_string(),
            Err(KmsError::NotFound(_)) => {
                signer
                    .create_key(&config.cert_template().issuer_name, CA_KEY_ALIAS)
                    .await?
            }
            Err(e) => {
                error!("failed to check for the CA key in KMS");
                return Err(e.into());
            }
        };

        let params = templates.root_template()?;
        let cert_der = issuance::self_sign_root(params, signer.clone(), &key_id).await?;
        info!("generated the CA certificate through KMS");
        Ok(CaMaterial {
            cert_der,
            key_id,
        })
    }

    async fn issue(
        &self,
        tenant_id: &str,
        device_id: String,
        device_csr: &[u8],
    ) -> Result<IssuedDeviceCertificate> {
        let validated = csr::validate_device_csr(device_csr)?;
        let entry = issuance::resolve_signing_entry(
            &self.store,
            self.per_tenant_signing,
            &self.common,
            tenant_id,
        )
        .await?;
        issuance::issue_device_certificate(
            &self.templates,
            self.signer.clone(),
            &entry,
            &self.ca,
            tenant_id,
            device_id,
            &validated,
        )
        .await
    }
}

#[async_trait]
impl KmsProvider for AwsKmsProvider {
    async fn create_tenant_signing_certificate(
        &self,
        tenant_id: &str,
        tenant_name: &str,
    ) -> Result<String> {
        if tenant_id.is_empty() {
            return Err(CaError::BadRequest("invalid tenant id".to_string()));
        }
        let cert_id = issuance::create_signing_entry(
            &self.templates,
            &self.store,
            &self.signer,
            &self.ca,
            tenant_id,
            tenant_name,
            &tenant_key_alias(tenant_id),
        )
        .await?;
        info!(tenant_id, "generated the tenant signing certificate");
        Ok(cert_id)
    }

    async fn get_tenant_signing_certificate(&self, tenant_id: &str) -> Result<Vec<u8>> {
        if tenant_id.is_empty() {
            return Err(CaError::BadRequest("invalid tenant id".to_string()));
        }
        let entry = self.store.get(tenant_id).await.map_err(|e| {
            error!(tenant_id, "failed to retrieve the tenant signing certificate");
            CaError::from(e)
        })?;
        Ok(entry.certificate)
    }

    async fn delete_tenant_signing_certificate(&self, tenant_id: &str) -> Result<()> {
        if tenant_id.is_empty() {
            return Err(CaError::BadRequest("invalid tenant id".to_string()));
        }
        self.store.delete(tenant_id).await.map_err(|e| {
            error!(tenant_id, "failed to delete the tenant signing certificate");
            CaError::from(e)
        })?;
        self.signer
            .delete_key(&tenant_key_alias(tenant_id))
            .await
            .map_err(|e| {
                error!(tenant_id, "failed to delete the tenant key from KMS");
                CaError::from(e)
            })?;
        Ok(())
    }

    async fn create_device_certificate(
        &self,
        tenant_id: &str,
        device_csr: &[u8],
    ) -> Result<IssuedDeviceCertificate> {
        if tenant_id.is_empty() || device_csr.is_empty() {
            error!("invalid CSR or tenant id");
            return Err(CaError::BadRequest("invalid parameter".to_string()));
        }
        self.issue(tenant_id, Uuid::new_v4().to_string(), device_csr)
            .await
    }

    async fn renew_device_certificate(
        &self,
        tenant_id: &str,
        device_id: &str,
        device_csr: &[u8],
    ) -> Result<IssuedDeviceCertificate> {
        if tenant_id.is_empty() || device_id.is_empty() || device_csr.is_empty() {
            error!("invalid CSR, tenant id or device id");
            return Err(CaError::BadRequest("invalid parameter".to_string()));
        }
        self.issue(tenant_id, device_id.to_string(), device_csr).await
    }

    async fn shutdown(&self) {
        self.store.shutdown().await;
        info!("AWS KMS provider shut down");
    }
}
