//! Certificate templates for the three certificate tiers.
//!
//! The builder holds the process-wide template configuration, written once
//! at startup and immutable afterwards. All templates share a CSPRNG serial,
//! NotBefore = now and SHA-256-with-RSA signatures; the tier determines the
//! subject, lifetime, key usages and the asserted extension OID.

use std::sync::Arc;

use certforge_config::CertTemplateConfig;
use rcgen::{
    BasicConstraints, CertificateParams, CustomExtension, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, KeyUsagePurpose,
};
use time::{Duration, OffsetDateTime};

use crate::{oids, serial, Result, COMMON_DEVICE_CERT_ISSUER, COMMON_SIGNING_KEY_ID};

/// Root CA certificate lifetime.
const CA_CERT_LIFETIME_DAYS: i64 = 3650;

/// Tenant signing certificate lifetime.
const TENANT_CERT_LIFETIME_DAYS: i64 = 3650;

/// Device certificate lifetime.
const DEVICE_CERT_LIFETIME_DAYS: i64 = 365;

/// Subject RDN type for street addresses (`2.5.4.9`).
const STREET_ADDRESS_RDN_OID: &[u64] = &[2, 5, 4, 9];

/// Subject RDN type for postal codes (`2.5.4.17`).
const POSTAL_CODE_RDN_OID: &[u64] = &[2, 5, 4, 17];

/// Builds unsigned certificate templates from the immutable template
/// configuration.
#[derive(Clone)]
pub struct TemplateBuilder {
    config: Arc<CertTemplateConfig>,
}

impl TemplateBuilder {
    /// Creates a builder over the startup template configuration.
    pub fn new(config: Arc<CertTemplateConfig>) -> Self {
        Self { config }
    }

    /// Template for the root CA certificate: a 10-year CA certificate whose
    /// subject carries the configured issuer locality fields with the issuer
    /// name as the organizational unit.
    pub fn root_template(&self) -> Result<CertificateParams> {
        let cfg = &self.config;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CountryName, cfg.country.clone());
        dn.push(DnType::StateOrProvinceName, cfg.province.clone());
        dn.push(DnType::LocalityName, cfg.locality.clone());
        dn.push(
            DnType::CustomDnType(STREET_ADDRESS_RDN_OID.to_vec()),
            DnValue::Utf8String(cfg.street_address.clone()),
        );
        dn.push(
            DnType::CustomDnType(POSTAL_CODE_RDN_OID.to_vec()),
            DnValue::Utf8String(cfg.postal_code.clone()),
        );
        dn.push(DnType::OrganizationName, cfg.organization.clone());
        dn.push(DnType::OrganizationalUnitName, cfg.issuer_name.clone());

        let mut params = signing_tier_params(dn, CA_CERT_LIFETIME_DAYS);
        params.custom_extensions = vec![CustomExtension::from_oid_content(
            oids::CA_CERTIFICATE_OID,
            Vec::new(),
        )];
        Ok(params)
    }

    /// Template for a tenant signing certificate: a 10-year CA certificate
    /// issued under the root.
    ///
    /// The common signing certificate (reserved tenant id) carries only the
    /// common issuer name; every other tenant certificate names the tenant in
    /// its common name and asserts the tenant id as an extra subject RDN.
    pub fn tenant_template(&self, tenant_id: &str, tenant_name: &str) -> Result<CertificateParams> {
        let mut dn = DistinguishedName::new();
        dn.push(DnType::OrganizationName, tenant_name.to_string());
        if tenant_id == COMMON_SIGNING_KEY_ID {
            dn.push(DnType::CommonName, COMMON_DEVICE_CERT_ISSUER);
        } else {
            dn.push(
                DnType::CommonName,
                format!("Device Certificate Issuer: {tenant_name}"),
            );
            dn.push(
                DnType::CustomDnType(oids::TENANT_ID_RDN_OID.to_vec()),
                DnValue::Utf8String(tenant_id.to_string()),
            );
        }

        let mut params = signing_tier_params(dn, TENANT_CERT_LIFETIME_DAYS);
        params.custom_extensions = vec![CustomExtension::from_oid_content(
            oids::TENANT_CERTIFICATE_OID,
            Vec::new(),
        )];
        Ok(params)
    }

    /// Template for a device certificate: a one-year end-entity certificate
    /// whose common name is the device id, with the tenant id as an extra
    /// subject RDN. The subject public key is taken from the device CSR by
    /// the signing path.
    pub fn device_template(&self, tenant_id: &str, device_id: &str) -> Result<CertificateParams> {
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, device_id.to_string());
        dn.push(
            DnType::CustomDnType(oids::TENANT_ID_RDN_OID.to_vec()),
            DnValue::Utf8String(tenant_id.to_string()),
        );

        let mut params = CertificateParams::default();
        params.distinguished_name = dn;
        let now = OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + Duration::days(DEVICE_CERT_LIFETIME_DAYS);
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ClientAuth,
            ExtendedKeyUsagePurpose::ServerAuth,
        ];
        params.custom_extensions = vec![CustomExtension::from_oid_content(
            oids::DEVICE_CERTIFICATE_OID,
            Vec::new(),
        )];
        params.serial_number = Some(serial::new_serial());
        Ok(params)
    }
}

/// Shared shape of the two CA tiers (root and tenant signing certificates).
fn signing_tier_params(dn: DistinguishedName, lifetime_days: i64) -> CertificateParams {
    let mut params = CertificateParams::default();
    params.distinguished_name = dn;
    let now = OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + Duration::days(lifetime_days);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyCertSign,
    ];
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ClientAuth,
        ExtendedKeyUsagePurpose::ServerAuth,
    ];
    params.serial_number = Some(serial::new_serial());
    params
}
