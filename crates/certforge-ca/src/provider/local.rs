//! Local KMS provider.
//!
//! Keys are generated in-process and held on the local filesystem; the root
//! CA keypair and certificate are persisted as `ca.key` / `ca.cert` under
//! the data directory on first start and reloaded afterwards. This provider
//! exists to enable integration testing without cloud dependencies and is
//! not recommended outside test mode.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use certforge_config::Config;
use certforge_kms::{pemfile, KmsSigner, LocalKeyStore};
use certforge_store::CertStore;
use tracing::{error, info};
use uuid::Uuid;

use crate::issuance::{self, CaMaterial};
use crate::provider::{IssuedDeviceCertificate, KmsProvider};
use crate::templates::TemplateBuilder;
use crate::{csr, CaError, Result, COMMON_SIGNING_KEY_ID};

/// Signer key id of the root CA key; its key file is `ca.key`.
const CA_KEY_ID: &str = "ca";

/// File holding the PEM-encoded root CA certificate.
const CA_CERT_FILE: &str = "ca.cert";

/// File-backed KMS provider for test deployments.
pub struct LocalKmsProvider {
    templates: TemplateBuilder,
    store: Arc<dyn CertStore>,
    signer: Arc<dyn KmsSigner>,
    ca: CaMaterial,
    common: certforge_store::SigningCertificateEntry,
    per_tenant_signing: bool,
}

impl std::fmt::Debug for LocalKmsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKmsProvider")
            .field("per_tenant_signing", &self.per_tenant_signing)
            .finish_non_exhaustive()
    }
}

impl LocalKmsProvider {
    /// Initializes the provider from configuration, creating the store and
    /// signer it needs.
    pub async fn init(config: &Config) -> Result<Self> {
        let store = certforge_store::init(config.cert_store()?, config.data_dir()).await?;
        let signer = Arc::new(LocalKeyStore::new(config.data_dir()));
        Self::init_with(config, store, signer).await
    }

    /// Initializes the provider over explicit store and signer instances.
    pub async fn init_with(
        config: &Config,
        store: Arc<dyn CertStore>,
        signer: Arc<LocalKeyStore>,
    ) -> Result<Self> {
        let templates = TemplateBuilder::new(Arc::new(config.cert_template().clone()));
        let data_dir = config.data_dir().to_path_buf();
        let signer: Arc<dyn KmsSigner> = signer;

        let ca = Self::load_or_generate_ca(&templates, &signer, &data_dir).await?;

        let common = issuance::ensure_common_signing_entry(
            &templates,
            &store,
            &signer,
            &ca,
            COMMON_SIGNING_KEY_ID,
        )
        .await
        .map_err(|e| {
            error!("failed to initialize the common signing certificate");
            e
        })?;

        info!("local KMS provider initialized");
        Ok(Self {
            templates,
            store,
            signer,
            ca,
            common,
            per_tenant_signing: config.certificate_authority.per_tenant_signing,
        })
    }

    /// Loads the persisted root CA material, or generates and persists it on
    /// first start.
    async fn load_or_generate_ca(
        templates: &TemplateBuilder,
        signer: &Arc<dyn KmsSigner>,
        data_dir: &Path,
    ) -> Result<CaMaterial> {
        let cert_path = data_dir.join(CA_CERT_FILE);
        if cert_path.exists() {
            let cert_der =
                pemfile::read_certificate(&cert_path).map_err(|e| CaError::Internal(e.to_string()))?;
            // The stored certificate must still match the key on disk.
            let signer_spki = signer.public_key(CA_KEY_ID).await?;
            issuance::verify_key_binding(&cert_der, &signer_spki)?;
            info!("loaded the local CA certificate");
            return Ok(CaMaterial {
                cert_der,
                key_id: CA_KEY_ID.to_string(),
            });
        }

        signer.create_key("Local CA key", CA_KEY_ID).await?;
        let params = templates.root_template()?;
        let cert_der = issuance::self_sign_root(params, signer.clone(), CA_KEY_ID).await?;
        pemfile::write_certificate(&cert_path, &cert_der)
            .map_err(|e| CaError::Internal(e.to_string()))?;

        info!("generated the local CA certificate");
        Ok(CaMaterial {
            cert_der,
            key_id: CA_KEY_ID.to_string(),
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
impl KmsProvider for LocalKmsProvider {
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
            tenant_id,
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
        self.signer.delete_key(tenant_id).await.map_err(|e| {
            error!(tenant_id, "failed to delete the tenant signing key");
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
        info!("local KMS provider shut down");
    }
}
