//! Configuration for the certforge certificate authority.
//!
//! Settings are read from a YAML file and may be overridden through
//! environment variables. All fields consumed by the issuance engine are
//! validated once at startup; a bad provider tag or a missing certificate
//! template field aborts initialization.
//!
//! # Example
//!
//! ```
//! use certforge_config::Config;
//!
//! let yaml = r#"
//! certificate_authority:
//!   kms_provider: local_kms
//!   cert_store: localdb
//!   per_tenant_signing: true
//!   cert_template:
//!     issuer_name: "Example Device Root CA"
//!     country: "US"
//!     province: "California"
//!     locality: "Palo Alto"
//!     street_address: "1501 Page Mill Road"
//!     postal_code: "94304"
//!     organization: "Example Inc."
//! test_mode: true
//! "#;
//!
//! let config = Config::from_yaml_str(yaml).unwrap();
//! assert!(config.test_mode);
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

/// Provider tag for the local, file-backed KMS. Test use only.
pub const KMS_PROVIDER_LOCAL: &str = "local_kms";

/// Provider tag for the AWS KMS backend.
pub const KMS_PROVIDER_AWS: &str = "aws_kms";

/// Provider tag for the embedded local certificate store.
pub const CERT_STORE_LOCALDB: &str = "localdb";

/// Provider tag for the DynamoDB certificate store.
pub const CERT_STORE_DYNAMODB: &str = "dynamodb";

/// Errors raised while loading or validating configuration. All of these are
/// fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid YAML for the expected schema.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// An unsupported KMS provider was requested.
    #[error("unsupported KMS provider requested: {0}")]
    InvalidKmsProvider(String),

    /// An unsupported certificate store provider was requested.
    #[error("unsupported certificate store provider requested: {0}")]
    InvalidCertStore(String),

    /// A mandatory certificate template field is missing or empty.
    #[error("certificate template field `{0}` is required")]
    MissingTemplateField(&'static str),
}

/// The KMS provider selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KmsProviderKind {
    /// In-process keys on the local filesystem; not a security boundary.
    Local,
    /// HSM-backed keys in AWS KMS.
    Aws,
}

/// The certificate store backend selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertStoreKind {
    /// Embedded single-file store.
    LocalDb,
    /// Remote DynamoDB table.
    DynamoDb,
}

/// Values stamped into the certificate templates issued by the CA.
///
/// Every field is mandatory; the issuer identity of a certificate authority
/// is not something to guess defaults for.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CertTemplateConfig {
    /// Name of the certificate issuer, used as the root OU.
    pub issuer_name: String,

    /// Country of the issuer.
    pub country: String,

    /// Province of the issuer's address.
    pub province: String,

    /// Locality of the issuer.
    pub locality: String,

    /// Street address of the issuer.
    pub street_address: String,

    /// Postal code of the issuer.
    pub postal_code: String,

    /// Organization issuing the certificates.
    pub organization: String,
}

impl CertTemplateConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let fields: [(&'static str, &str); 7] = [
            ("issuer_name", &self.issuer_name),
            ("country", &self.country),
            ("province", &self.province),
            ("locality", &self.locality),
            ("street_address", &self.street_address),
            ("postal_code", &self.postal_code),
            ("organization", &self.organization),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingTemplateField(name));
            }
        }
        Ok(())
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".")
}

/// Settings for the certificate authority core.
#[derive(Debug, Clone, Deserialize)]
pub struct CertificateAuthority {
    /// Key management service provider to use.
    pub kms_provider: String,

    /// Certificate store used to persist signing certificates.
    pub cert_store: String,

    /// Whether device certificates are signed with per-tenant signing keys.
    /// When false, every device certificate is signed with the common
    /// signing certificate.
    #[serde(default)]
    pub per_tenant_signing: bool,

    /// Certificate template settings.
    pub cert_template: CertTemplateConfig,

    /// Directory holding the embedded certificate database and local key
    /// material.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for CertificateAuthority {
    fn default() -> Self {
        Self {
            kms_provider: String::new(),
            cert_store: String::new(),
            per_tenant_signing: false,
            cert_template: CertTemplateConfig::default(),
            data_dir: default_data_dir(),
        }
    }
}

/// Top-level configuration for the CA service.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Certificate authority settings.
    #[serde(default)]
    pub certificate_authority: CertificateAuthority,

    /// Whether the CA runs in test mode. In test mode the AWS provider is
    /// permitted to create the root CA key material in-process. Must not be
    /// set in production.
    #[serde(default)]
    pub test_mode: bool,
}

impl Config {
    /// Loads configuration from a YAML file, applies environment variable
    /// overrides and validates the result.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let mut config: Config = serde_yaml::from_str(&raw)?;
        config.apply_env_overrides();
        config.validate()?;
        info!(path = %path.as_ref().display(), "loaded CA configuration");
        Ok(config)
    }

    /// Parses configuration from a YAML string and validates it. Environment
    /// overrides are not applied.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies overrides from the supported environment variables.
    pub fn apply_env_overrides(&mut self) {
        override_string("CA_KMS_PROVIDER", &mut self.certificate_authority.kms_provider);
        override_string("CA_CERT_STORE_PROVIDER", &mut self.certificate_authority.cert_store);
        override_bool(
            "CA_PER_TENANT_SIGNING_ENABLED",
            &mut self.certificate_authority.per_tenant_signing,
        );
        override_bool("CA_TEST_MODE", &mut self.test_mode);
    }

    /// Validates provider tags and the certificate template fields.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.kms_provider()?;
        self.cert_store()?;
        self.certificate_authority.cert_template.validate()?;
        Ok(())
    }

    /// Returns the configured KMS provider kind.
    pub fn kms_provider(&self) -> Result<KmsProviderKind, ConfigError> {
        match self.certificate_authority.kms_provider.as_str() {
            KMS_PROVIDER_LOCAL => Ok(KmsProviderKind::Local),
            KMS_PROVIDER_AWS => Ok(KmsProviderKind::Aws),
            other => Err(ConfigError::InvalidKmsProvider(other.to_string())),
        }
    }

    /// Returns the configured certificate store kind.
    pub fn cert_store(&self) -> Result<CertStoreKind, ConfigError> {
        match self.certificate_authority.cert_store.as_str() {
            CERT_STORE_LOCALDB => Ok(CertStoreKind::LocalDb),
            CERT_STORE_DYNAMODB => Ok(CertStoreKind::DynamoDb),
            other => Err(ConfigError::InvalidCertStore(other.to_string())),
        }
    }

    /// Returns the certificate template settings.
    pub fn cert_template(&self) -> &CertTemplateConfig {
        &self.certificate_authority.cert_template
    }

    /// Returns the directory used for local state.
    pub fn data_dir(&self) -> &Path {
        &self.certificate_authority.data_dir
    }
}

fn override_string(var: &str, target: &mut String) {
    if let Ok(value) = std::env::var(var) {
        if !value.is_empty() {
            info!(variable = var, "overriding configuration from environment");
            *target = value;
        }
    }
}

fn override_bool(var: &str, target: &mut bool) {
    if let Ok(value) = std::env::var(var) {
        if value.is_empty() {
            return;
        }
        match value.parse::<bool>() {
            Ok(parsed) => {
                info!(variable = var, "overriding configuration from environment");
                *target = parsed;
            }
            Err(_) => tracing::error!(variable = var, "bad boolean value in environment"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_yaml() -> &'static str {
        r#"
certificate_authority:
  kms_provider: local_kms
  cert_store: localdb
  per_tenant_signing: true
  cert_template:
    issuer_name: "Example Device Root CA"
    country: "US"
    province: "California"
    locality: "Palo Alto"
    street_address: "1501 Page Mill Road"
    postal_code: "94304"
    organization: "Example Inc."
test_mode: true
"#
    }

    #[test]
    fn parses_valid_config() {
        let config = Config::from_yaml_str(valid_yaml()).unwrap();
        assert_eq!(config.kms_provider().unwrap(), KmsProviderKind::Local);
        assert_eq!(config.cert_store().unwrap(), CertStoreKind::LocalDb);
        assert!(config.certificate_authority.per_tenant_signing);
        assert!(config.test_mode);
        assert_eq!(config.cert_template().country, "US");
        assert_eq!(config.data_dir(), Path::new("."));
    }

    #[test]
    fn rejects_unknown_kms_provider() {
        let yaml = valid_yaml().replace("local_kms", "vault");
        let err = Config::from_yaml_str(&yaml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidKmsProvider(p) if p == "vault"));
    }

    #[test]
    fn rejects_unknown_cert_store() {
        let yaml = valid_yaml().replace("localdb", "etcd");
        let err = Config::from_yaml_str(&yaml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidCertStore(p) if p == "etcd"));
    }

    #[test]
    fn rejects_missing_template_field() {
        let yaml = valid_yaml().replace(r#"locality: "Palo Alto""#, r#"locality: """#);
        let err = Config::from_yaml_str(&yaml).unwrap_err();
        assert!(matches!(err, ConfigError::MissingTemplateField("locality")));
    }

    #[test]
    fn per_tenant_signing_defaults_to_false() {
        let yaml = valid_yaml().replace("  per_tenant_signing: true\n", "");
        let config = Config::from_yaml_str(&yaml).unwrap();
        assert!(!config.certificate_authority.per_tenant_signing);
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ca.yaml");
        std::fs::write(&path, valid_yaml()).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.kms_provider().unwrap(), KmsProviderKind::Local);
    }

    #[test]
    fn data_dir_is_configurable() {
        let yaml = valid_yaml().replace(
            "cert_store: localdb",
            "cert_store: localdb\n  data_dir: /var/lib/certforge",
        );
        let config = Config::from_yaml_str(&yaml).unwrap();
        assert_eq!(config.data_dir(), Path::new("/var/lib/certforge"));
    }
}
