//! On-die signature trust engine.
//!
//! Combines the raw-signature check from [`fdo_crypto::ondie`] with the
//! revocation status of the signer's certificate chain.
//!
//! Verification failures of any kind, including an unmappable CRL
//! reference, come back as `false`. Only an empty chain is an error, since
//! that is a caller mistake rather than untrusted input.

use std::sync::Arc;

use fdo_crypto::ondie;
use tracing::{debug, warn};
use x509_parser::prelude::*;

use crate::cache::RevocationCache;
use crate::config::RvConfig;
use crate::error::RvError;
use crate::revocation::RevocationChecker;

/// Verify a raw on-die signature against a SEC1 P-384 public key.
#[must_use]
pub fn verify(signed_data: &[u8], raw_signature: &[u8], public_key: &[u8]) -> bool {
    ondie::verify(signed_data, raw_signature, public_key)
}

/// Verify a raw on-die signature made by the leaf of `cert_chain`.
///
/// With `revocation_enabled`, every certificate of the chain (leaf first)
/// must pass [`RevocationChecker::check`] before the signature is checked
/// against the leaf's public key.
///
/// # Errors
///
/// `InvalidChain` if `cert_chain` is empty.
pub fn verify_with_revocation<C: AsRef<[u8]>>(
    signed_data: &[u8],
    raw_signature: &[u8],
    cert_chain: &[C],
    cache: &RevocationCache,
    revocation_enabled: bool,
) -> Result<bool, RvError> {
    let Some(leaf) = cert_chain.first() else {
        return Err(RvError::InvalidChain);
    };

    if revocation_enabled && !chain_passes(cert_chain, cache)? {
        return Ok(false);
    }

    let Some(public_key) = leaf_public_key(leaf.as_ref()) else {
        warn!("Leaf certificate could not be parsed");
        return Ok(false);
    };

    let verified = ondie::verify(signed_data, raw_signature, &public_key);
    debug!(verified, "On-die signature checked");
    Ok(verified)
}

fn chain_passes<C: AsRef<[u8]>>(
    cert_chain: &[C],
    cache: &RevocationCache,
) -> Result<bool, RvError> {
    match RevocationChecker::new(cache).check_chain(cert_chain) {
        Err(RvError::InvalidReference { reference }) => {
            warn!(reference = %reference, "Unusable CRL distribution point");
            Ok(false)
        },
        other => other,
    }
}

/// SEC1 encoding of a certificate's subject public key.
pub fn leaf_public_key(cert_der: &[u8]) -> Option<Vec<u8>> {
    let (_, cert) = X509Certificate::from_der(cert_der).ok()?;
    Some(cert.public_key().subject_public_key.data.to_vec())
}

/// Trust engine bound to a cache and a revocation setting.
#[derive(Clone)]
pub struct TrustEngine {
    cache: Arc<RevocationCache>,
    revocation_enabled: bool,
}

impl TrustEngine {
    /// Create an engine over `cache`.
    pub fn new(cache: Arc<RevocationCache>, revocation_enabled: bool) -> Self {
        Self {
            cache,
            revocation_enabled,
        }
    }

    /// Create an engine over `cache` honouring `config.revocation_enabled`.
    pub fn from_config(cache: Arc<RevocationCache>, config: &RvConfig) -> Self {
        Self::new(cache, config.revocation_enabled)
    }

    /// The CRL cache this engine reads.
    pub fn cache(&self) -> &RevocationCache {
        &self.cache
    }

    /// Whether chains are checked for revocation.
    pub fn revocation_enabled(&self) -> bool {
        self.revocation_enabled
    }

    /// See [`verify`].
    pub fn verify(&self, signed_data: &[u8], raw_signature: &[u8], public_key: &[u8]) -> bool {
        verify(signed_data, raw_signature, public_key)
    }

    /// See [`verify_with_revocation`].
    pub fn verify_with_revocation<C: AsRef<[u8]>>(
        &self,
        signed_data: &[u8],
        raw_signature: &[u8],
        cert_chain: &[C],
    ) -> Result<bool, RvError> {
        verify_with_revocation(
            signed_data,
            raw_signature,
            cert_chain,
            &self.cache,
            self.revocation_enabled,
        )
    }

    /// Check a chain for revocation alone. Always passes when revocation
    /// is disabled.
    pub fn check_chain<C: AsRef<[u8]>>(&self, cert_chain: &[C]) -> Result<bool, RvError> {
        if cert_chain.is_empty() {
            return Err(RvError::InvalidChain);
        }
        if !self.revocation_enabled {
            return Ok(true);
        }
        chain_passes(cert_chain, &self.cache)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::https::CrlFetcher;

    fn engine(dir: &std::path::Path, enabled: bool) -> TrustEngine {
        let fetcher = CrlFetcher::new(Duration::from_secs(1)).unwrap();
        let cache = RevocationCache::open(dir, &[], fetcher).unwrap();
        TrustEngine::new(Arc::new(cache), enabled)
    }

    #[test]
    fn test_empty_chain_is_invalid() {
        let tmp = tempfile::tempdir().unwrap();
        let chain: [Vec<u8>; 0] = [];

        for enabled in [true, false] {
            let engine = engine(tmp.path(), enabled);
            assert!(matches!(
                engine.verify_with_revocation(b"data", &[0u8; 132], &chain),
                Err(RvError::InvalidChain)
            ));
            assert!(matches!(engine.check_chain(&chain), Err(RvError::InvalidChain)));
        }
    }

    #[test]
    fn test_from_config_follows_revocation_flag() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = engine(tmp.path(), true).cache;

        for enabled in [true, false] {
            let config = RvConfig {
                revocation_enabled: enabled,
                ..RvConfig::default()
            };
            let engine = TrustEngine::from_config(cache.clone(), &config);
            assert_eq!(engine.revocation_enabled(), enabled);
        }

        // Disabled: any non-empty chain passes without consulting the cache.
        let disabled = TrustEngine::from_config(
            cache,
            &RvConfig {
                revocation_enabled: false,
                ..RvConfig::default()
            },
        );
        assert!(disabled.check_chain(&[b"anything".to_vec()]).unwrap());
    }

    #[test]
    fn test_unparseable_leaf_is_false() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path(), false);

        let chain = [b"not a certificate".to_vec()];
        assert!(!engine.verify_with_revocation(b"data", &[0u8; 132], &chain).unwrap());
    }

    #[test]
    fn test_short_signature_is_false() {
        assert!(!verify(b"data", &[0u8; 10], &[0x04; 97]));
    }
}
