//! Certificate revocation checking against the local CRL cache.
//!
//! This module implements the fail-secure rule for device certificate
//! chains: ANY revoked certificate, and ANY certificate whose revocation
//! status cannot be established, fails the whole chain.
//!
//! ## Security Properties
//!
//! - **Cache only**: lists are read from [`RevocationCache`]; nothing is
//!   fetched during a check
//! - **Miss is failure**: a distribution point absent from the cache is
//!   `Unknown`, never "assume not revoked"
//! - **Opt-in per certificate**: a certificate without a CRL distribution
//!   point is not subject to revocation checking

use x509_parser::extensions::{DistributionPointName, GeneralName, ParsedExtension};
use x509_parser::prelude::*;
use x509_parser::revocation_list::CertificateRevocationList;

use tracing::{debug, error, instrument, warn};

use crate::cache::RevocationCache;
use crate::error::RvError;

/// Revocation status of one certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationStatus {
    /// Not listed in any of its CRLs, or has no distribution point.
    Good,
    /// Listed as revoked.
    Revoked,
    /// A CRL is missing from the cache or unparseable, or the certificate
    /// itself could not be parsed.
    Unknown,
}

impl RevocationStatus {
    /// Whether this status lets the certificate pass.
    pub fn is_good(&self) -> bool {
        matches!(self, Self::Good)
    }
}

/// Extract the CRL distribution point URIs of a DER certificate.
///
/// Only full-name URI entries are returned; relative names and other
/// general name forms are ignored.
pub fn distribution_points(cert_der: &[u8]) -> Result<Vec<String>, X509Error> {
    let (_, cert) = X509Certificate::from_der(cert_der).map_err(|e| match e {
        x509_parser::nom::Err::Error(e) | x509_parser::nom::Err::Failure(e) => e,
        x509_parser::nom::Err::Incomplete(_) => X509Error::InvalidCertificate,
    })?;

    Ok(cert_distribution_points(&cert))
}

fn cert_distribution_points(cert: &X509Certificate<'_>) -> Vec<String> {
    let mut urls = Vec::new();

    for ext in cert.extensions() {
        let ParsedExtension::CRLDistributionPoints(points) = ext.parsed_extension() else {
            continue;
        };
        for point in points.points.iter() {
            let Some(DistributionPointName::FullName(names)) = &point.distribution_point else {
                continue;
            };
            for name in names {
                if let GeneralName::URI(uri) = name {
                    urls.push((*uri).to_string());
                }
            }
        }
    }

    urls
}

/// Parse a cached CRL, DER first and PEM as a fallback.
fn with_crl<T>(bytes: &[u8], f: impl FnOnce(&CertificateRevocationList<'_>) -> T) -> Option<T> {
    if let Ok((_, crl)) = CertificateRevocationList::from_der(bytes) {
        return Some(f(&crl));
    }

    let (_, pem) = x509_parser::pem::parse_x509_pem(bytes).ok()?;
    let (_, crl) = CertificateRevocationList::from_der(&pem.contents).ok()?;
    Some(f(&crl))
}

fn lists_certificate(crl: &CertificateRevocationList<'_>, cert: &X509Certificate<'_>) -> bool {
    if crl.issuer().as_raw() != cert.issuer().as_raw() {
        return false;
    }
    crl.iter_revoked_certificates()
        .any(|revoked| revoked.raw_serial() == cert.raw_serial())
}

/// Revocation checker over a CRL cache.
pub struct RevocationChecker<'a> {
    cache: &'a RevocationCache,
}

impl<'a> RevocationChecker<'a> {
    /// Create a checker reading from `cache`.
    pub fn new(cache: &'a RevocationCache) -> Self {
        Self { cache }
    }

    /// Check one DER certificate against every CRL it points at.
    ///
    /// # Errors
    ///
    /// `InvalidReference` if a distribution point cannot be mapped to a
    /// cache entry.
    pub fn check(&self, cert_der: &[u8]) -> Result<RevocationStatus, RvError> {
        let Ok((_, cert)) = X509Certificate::from_der(cert_der) else {
            warn!("Certificate could not be parsed for revocation checking");
            return Ok(RevocationStatus::Unknown);
        };
        let serial = cert.raw_serial_as_string();

        let points = cert_distribution_points(&cert);
        if points.is_empty() {
            debug!(serial = %serial, "No CRL distribution point; not subject to revocation");
            return Ok(RevocationStatus::Good);
        }

        for point in &points {
            let Some(bytes) = self.cache.get(point)? else {
                warn!(serial = %serial, crl = %point, "CRL not in cache");
                return Ok(RevocationStatus::Unknown);
            };

            match with_crl(&bytes, |crl| lists_certificate(crl, &cert)) {
                Some(true) => {
                    error!(serial = %serial, crl = %point, "REVOKED CERTIFICATE DETECTED");
                    return Ok(RevocationStatus::Revoked);
                },
                Some(false) => {},
                None => {
                    warn!(crl = %point, "Cached CRL could not be parsed");
                    return Ok(RevocationStatus::Unknown);
                },
            }
        }

        Ok(RevocationStatus::Good)
    }

    /// Check every certificate of a chain, leaf first.
    ///
    /// Returns `Ok(false)` as soon as one certificate is not
    /// [`RevocationStatus::Good`].
    ///
    /// # Errors
    ///
    /// `InvalidChain` if the chain is empty, `InvalidReference` as for
    /// [`check`](Self::check).
    #[instrument(skip_all, fields(chain_len = chain.len()))]
    pub fn check_chain<C: AsRef<[u8]>>(&self, chain: &[C]) -> Result<bool, RvError> {
        if chain.is_empty() {
            return Err(RvError::InvalidChain);
        }

        for (depth, cert) in chain.iter().enumerate() {
            let status = self.check(cert.as_ref())?;
            if !status.is_good() {
                warn!(depth, status = ?status, "Certificate chain failed revocation check");
                return Ok(false);
            }
        }

        Ok(true)
    }
}
