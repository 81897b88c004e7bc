//! Object identifiers asserted in issued certificates.
//!
//! The arc is fixed:
//!
//! ```text
//! 1.3.6.1.4.1.58515           vendor
//! 1.3.6.1.4.1.58515.7         web services
//! 1.3.6.1.4.1.58515.7.1       infrastructure
//! 1.3.6.1.4.1.58515.7.1.1     device certificate authority
//! 1.3.6.1.4.1.58515.7.1.1.1   root CA certificate
//! 1.3.6.1.4.1.58515.7.1.1.2   tenant signing certificate
//! 1.3.6.1.4.1.58515.7.1.1.3   device certificate
//! ```
//!
//! Each certificate carries its kind's OID as a non-critical extension with
//! an empty value.

/// Extension OID asserted in the root CA certificate.
pub const CA_CERTIFICATE_OID: &[u64] = &[1, 3, 6, 1, 4, 1, 58515, 7, 1, 1, 1];

/// Extension OID asserted in tenant signing certificates.
pub const TENANT_CERTIFICATE_OID: &[u64] = &[1, 3, 6, 1, 4, 1, 58515, 7, 1, 1, 2];

/// Extension OID asserted in device certificates.
pub const DEVICE_CERTIFICATE_OID: &[u64] = &[1, 3, 6, 1, 4, 1, 58515, 7, 1, 1, 3];

/// RDN attribute type carrying the tenant id in certificate subjects
/// (`2.5.4.10`, organization).
pub const TENANT_ID_RDN_OID: &[u64] = &[2, 5, 4, 10];

/// Dotted-string form of a component OID, as rendered by parsers.
pub fn dotted(oid: &[u64]) -> String {
    oid.iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arcs_are_fixed() {
        assert_eq!(dotted(CA_CERTIFICATE_OID), "1.3.6.1.4.1.58515.7.1.1.1");
        assert_eq!(dotted(TENANT_CERTIFICATE_OID), "1.3.6.1.4.1.58515.7.1.1.2");
        assert_eq!(dotted(DEVICE_CERTIFICATE_OID), "1.3.6.1.4.1.58515.7.1.1.3");
        assert_eq!(dotted(TENANT_ID_RDN_OID), "2.5.4.10");
    }
}
