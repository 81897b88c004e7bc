//! Shared certificate issuance flows.
//!
//! Both KMS providers run the same template-build-sign pipeline; they differ
//! in how CA material is bootstrapped, how key aliases are formed and which
//! key id is persisted. Certificate assembly happens on a blocking thread
//! because the signing adapter re-enters the runtime to reach the KMS.

use std::sync::Arc;

use certforge_kms::{KmsSigner, KmsSigningKey, RsaSubjectKey};
use certforge_store::{CertStore, SigningCertificateEntry, StoreError};
use chrono::{DateTime, Utc};
use rcgen::{CertificateParams, CertificateSigningRequestParams, Issuer};
use rustls_pki_types::{CertificateDer, CertificateSigningRequestDer};
use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;
use tracing::{debug, error, warn};
use x509_parser::prelude::*;

use crate::csr::ValidatedCsr;
use crate::pkcs7;
use crate::provider::IssuedDeviceCertificate;
use crate::templates::TemplateBuilder;
use crate::{CaError, Result};

/// The root CA material a provider signs tenant certificates with.
#[derive(Clone)]
pub(crate) struct CaMaterial {
    /// DER of the root CA certificate.
    pub cert_der: Vec<u8>,
    /// Signer key reference for the root CA private key.
    pub key_id: String,
}

/// The key reference a signing entry binds signing operations to. Backends
/// without key handles persist an empty kms key id and are keyed by tenant
/// id instead.
pub(crate) fn signer_key_reference(entry: &SigningCertificateEntry) -> &str {
    if entry.kms_key_id.is_empty() {
        &entry.tenant_id
    } else {
        &entry.kms_key_id
    }
}

/// Extracts the hex-encoded SubjectKeyIdentifier of a signed certificate,
/// verifying along the way that the certificate parses.
pub(crate) fn subject_key_id_hex(cert_der: &[u8]) -> Result<String> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| CaError::Internal(format!("failed to parse the signed certificate: {e}")))?;
    for ext in cert.extensions() {
        if let ParsedExtension::SubjectKeyIdentifier(key_id) = ext.parsed_extension() {
            return Ok(hex::encode(key_id.0));
        }
    }
    Err(CaError::Internal(
        "signed certificate carries no subject key identifier".to_string(),
    ))
}

/// Verifies that the public key embedded in a certificate matches a
/// DER-encoded SubjectPublicKeyInfo retrieved from the signer.
pub(crate) fn verify_key_binding(cert_der: &[u8], signer_spki: &[u8]) -> Result<()> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| CaError::Internal(format!("failed to parse the CA certificate: {e}")))?;
    let cert_key = RsaPublicKey::from_public_key_der(cert.public_key().raw)
        .map_err(|e| CaError::Internal(format!("failed to parse the certificate key: {e}")))?;
    let signer_key = RsaPublicKey::from_public_key_der(signer_spki)
        .map_err(|e| CaError::Internal(format!("failed to parse the signer key: {e}")))?;
    if cert_key != signer_key {
        return Err(CaError::Internal(
            "key mismatch: certificate public key does not match the key held by the KMS"
                .to_string(),
        ));
    }
    Ok(())
}

/// Resolves the signing entry used to sign a device certificate for the
/// given tenant. A missing per-tenant entry falls back to the common
/// signing entry; any other store failure surfaces.
pub(crate) async fn resolve_signing_entry(
    store: &Arc<dyn CertStore>,
    per_tenant_signing: bool,
    common: &SigningCertificateEntry,
    tenant_id: &str,
) -> Result<SigningCertificateEntry> {
    if !per_tenant_signing {
        return Ok(common.clone());
    }
    match store.get(tenant_id).await {
        Ok(entry) => Ok(entry),
        Err(StoreError::NotFound) => {
            debug!(tenant_id, "no dedicated signing entry, using the common signing certificate");
            Ok(common.clone())
        }
        Err(e) => {
            error!(tenant_id, "failed to retrieve the tenant signing certificate");
            Err(e.into())
        }
    }
}

/// Signs a self-signed root CA certificate with the CA key held by the
/// signer.
pub(crate) async fn self_sign_root(
    params: CertificateParams,
    signer: Arc<dyn KmsSigner>,
    ca_key_id: &str,
) -> Result<Vec<u8>> {
    let signing_key = KmsSigningKey::bind(signer, ca_key_id).await?;
    let der = tokio::task::spawn_blocking(move || {
        params
            .self_signed(&signing_key)
            .map(|cert| cert.der().to_vec())
            .map_err(|e| CaError::Internal(format!("failed to sign the CA certificate: {e}")))
    })
    .await
    .map_err(|e| CaError::Internal(e.to_string()))??;
    Ok(der)
}

/// Signs a tenant signing certificate under the root CA and returns its DER
/// together with the hex subject key id used as the visible cert id.
pub(crate) async fn sign_tenant_certificate(
    templates: &TemplateBuilder,
    signer: Arc<dyn KmsSigner>,
    ca: &CaMaterial,
    tenant_id: &str,
    tenant_name: &str,
    tenant_spki: Vec<u8>,
) -> Result<(Vec<u8>, String)> {
    let params = templates.tenant_template(tenant_id, tenant_name)?;
    let ca_signing_key = KmsSigningKey::bind(signer, &ca.key_id).await?;
    let ca_cert = CertificateDer::from(ca.cert_der.clone());

    let der = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
        let subject_key = RsaSubjectKey::from_spki_der(&tenant_spki)?;
        let issuer = Issuer::from_ca_cert_der(&ca_cert, ca_signing_key)
            .map_err(|e| CaError::Internal(format!("failed to load the CA issuer: {e}")))?;
        let cert = params
            .signed_by(&subject_key, &issuer)
            .map_err(|e| CaError::Internal(format!("failed to sign the certificate: {e}")))?;
        Ok(cert.der().to_vec())
    })
    .await
    .map_err(|e| CaError::Internal(e.to_string()))??;

    // An entry is only persisted once the certificate signed and parsed.
    let cert_id = subject_key_id_hex(&der)?;
    Ok((der, cert_id))
}

/// Creates a tenant signing key and certificate and persists the entry.
///
/// On a store failure after the key was created, the key is deleted on a
/// best-effort basis so the KMS is not left with an orphan.
pub(crate) async fn create_signing_entry(
    templates: &TemplateBuilder,
    store: &Arc<dyn CertStore>,
    signer: &Arc<dyn KmsSigner>,
    ca: &CaMaterial,
    tenant_id: &str,
    tenant_name: &str,
    key_alias: &str,
) -> Result<String> {
    let kms_key_id = signer
        .create_key(&format!("Signing key: {tenant_id}"), key_alias)
        .await?;
    let key_ref = if kms_key_id.is_empty() {
        key_alias
    } else {
        kms_key_id.as_str()
    };
    let tenant_spki = signer.public_key(key_ref).await?;

    let (cert_der, cert_id) = sign_tenant_certificate(
        templates,
        signer.clone(),
        ca,
        tenant_id,
        tenant_name,
        tenant_spki,
    )
    .await?;

    let entry = SigningCertificateEntry {
        tenant_id: tenant_id.to_string(),
        kms_key_id,
        certificate: cert_der,
    };
    if let Err(e) = store.put(&entry).await {
        // Best-effort cleanup of the fresh key; the alias stays out of the
        // error-severity logs.
        if signer.delete_key(key_alias).await.is_err() {
            warn!("failed to clean up the signing key after a store failure");
        }
        error!("failed to add the tenant signing certificate to the store");
        return Err(e.into());
    }

    Ok(cert_id)
}

/// Signs a device certificate under the resolved signing entry and packages
/// the parent bundle.
pub(crate) async fn issue_device_certificate(
    templates: &TemplateBuilder,
    signer: Arc<dyn KmsSigner>,
    entry: &SigningCertificateEntry,
    ca: &CaMaterial,
    tenant_id: &str,
    device_id: String,
    csr: &ValidatedCsr,
) -> Result<IssuedDeviceCertificate> {
    let params = templates.device_template(tenant_id, &device_id)?;
    let not_after = DateTime::<Utc>::from_timestamp(params.not_after.unix_timestamp(), 0)
        .ok_or_else(|| CaError::Internal("certificate validity out of range".to_string()))?;

    let signing_key = KmsSigningKey::bind(signer, signer_key_reference(entry)).await?;
    let issuer_cert = CertificateDer::from(entry.certificate.clone());
    let csr_der = CertificateSigningRequestDer::from(csr.der().to_vec());

    let cert_der = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
        let mut csr_params = CertificateSigningRequestParams::from_der(&csr_der)
            .map_err(|e| CaError::BadRequest(format!("failed to parse csr: {e}")))?;
        // The CSR contributes only its public key; subject, validity and
        // extensions come from the device template.
        csr_params.params = params;
        let issuer = Issuer::from_ca_cert_der(&issuer_cert, signing_key)
            .map_err(|e| CaError::Internal(format!("failed to load the signing issuer: {e}")))?;
        let cert = csr_params
            .signed_by(&issuer)
            .map_err(|e| CaError::Internal(format!("failed to sign the device certificate: {e}")))?;
        Ok(cert.der().to_vec())
    })
    .await
    .map_err(|e| CaError::Internal(e.to_string()))??;

    // Parent bundle: tenant signing certificate plus the root.
    let parent_bundle = pkcs7::degenerate_bundle(&[&entry.certificate, &ca.cert_der])?;

    Ok(IssuedDeviceCertificate {
        device_id,
        certificate: cert_der,
        parent_bundle,
        not_after,
    })
}

/// Ensures the common signing entry exists, creating it on first demand.
pub(crate) async fn ensure_common_signing_entry(
    templates: &TemplateBuilder,
    store: &Arc<dyn CertStore>,
    signer: &Arc<dyn KmsSigner>,
    ca: &CaMaterial,
    common_key_alias: &str,
) -> Result<SigningCertificateEntry> {
    match store.get(crate::COMMON_SIGNING_KEY_ID).await {
        Ok(entry) => Ok(entry),
        Err(StoreError::NotFound) => {
            debug!("common signing certificate absent, creating it");
            create_signing_entry(
                templates,
                store,
                signer,
                ca,
                crate::COMMON_SIGNING_KEY_ID,
                "",
                common_key_alias,
            )
            .await?;
            store.get(crate::COMMON_SIGNING_KEY_ID).await.map_err(|e| {
                error!("failed to get the common signing certificate from the store");
                e.into()
            })
        }
        Err(e) => {
            error!("failed to get the common signing certificate from the store");
            Err(e.into())
        }
    }
}
