//! On-die trust engine against a CRL cache populated with real
//! certificates and revocation lists.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use fdo_crypto::{KeySigner, P384Signer};
use fdo_rv_core::cache::{SENTINEL, STAGED_SUFFIX};
use fdo_rv_core::trust::leaf_public_key;
use fdo_rv_core::{
    distribution_points, verify_with_revocation, CrlFetcher, KeyPolicy, MemoryTo0ClientStorage,
    MemoryTo0Storage, OwnershipVoucher, RedirectBlob, RevocationCache, RevocationChecker,
    RevocationStatus, RvError, To0Client, To0Server, Transport, TrustEngine,
};
use rcgen::{
    date_time_ymd, BasicConstraints, Certificate, CertificateParams,
    CertificateRevocationListParams, CrlDistributionPoint, DnType, IsCa, KeyIdMethod, KeyPair,
    KeyUsagePurpose, RevocationReason, RevokedCertParams, SerialNumber, PKCS_ECDSA_P384_SHA384,
};
use tempfile::TempDir;
use uuid::Uuid;

const CRL_URL: &str = "https://crl.example.com/ondie/OnDieCA.crl";
const CRL_FILE: &str = "OnDieCA.crl";
const DEVICE_SERIAL: u8 = 0x42;
const TASK_INFO: [u8; 36] = [0x11; 36];

struct Pki {
    ca: Certificate,
    ca_key: KeyPair,
}

impl Pki {
    fn new() -> Self {
        let ca_key = KeyPair::generate_for(&PKCS_ECDSA_P384_SHA384).unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params
            .distinguished_name
            .push(DnType::CommonName, "On Die Test CA");
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        let ca = params.self_signed(&ca_key).unwrap();
        Self { ca, ca_key }
    }

    /// Device certificate and its key pair.
    fn device(&self, serial: u8, crl_url: Option<&str>) -> (Vec<u8>, KeyPair) {
        let key = KeyPair::generate_for(&PKCS_ECDSA_P384_SHA384).unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params
            .distinguished_name
            .push(DnType::CommonName, format!("device-{serial:02x}"));
        params.serial_number = Some(SerialNumber::from_slice(&[serial]));
        // Without an explicit basic constraint rcgen writes no extensions.
        params.is_ca = IsCa::ExplicitNoCa;
        if let Some(url) = crl_url {
            params.crl_distribution_points = vec![CrlDistributionPoint {
                uris: vec![url.to_string()],
            }];
        }
        let der = params
            .signed_by(&key, &self.ca, &self.ca_key)
            .unwrap()
            .der()
            .to_vec();

        let points = distribution_points(&der).unwrap();
        match crl_url {
            Some(url) => assert_eq!(points, vec![url.to_string()]),
            None => assert!(points.is_empty()),
        }
        (der, key)
    }

    fn chain(&self, leaf: Vec<u8>) -> Vec<Vec<u8>> {
        vec![leaf, self.ca.der().to_vec()]
    }

    fn crl(&self, revoked: &[u8]) -> Vec<u8> {
        CertificateRevocationListParams {
            this_update: date_time_ymd(2024, 1, 1),
            next_update: date_time_ymd(2034, 1, 1),
            crl_number: SerialNumber::from(1u64),
            issuing_distribution_point: None,
            revoked_certs: revoked
                .iter()
                .map(|&serial| RevokedCertParams {
                    serial_number: SerialNumber::from_slice(&[serial]),
                    revocation_time: date_time_ymd(2024, 6, 1),
                    reason_code: Some(RevocationReason::KeyCompromise),
                    invalidity_date: None,
                })
                .collect(),
            key_identifier_method: KeyIdMethod::Sha256,
        }
        .signed_by(&self.ca, &self.ca_key)
        .unwrap()
        .der()
        .to_vec()
    }
}

/// Sign `data` the way on-die hardware does.
fn ondie_sign(key: &KeyPair, data: &[u8]) -> Vec<u8> {
    let signer = P384Signer::from_pkcs8_der(&key.serialize_der()).unwrap();
    let message = [TASK_INFO.as_slice(), data].concat();
    let rs = signer.sign(&message).unwrap();
    [TASK_INFO.as_slice(), &rs].concat()
}

fn open_cache(dir: &Path) -> RevocationCache {
    RevocationCache::open(dir, &[], CrlFetcher::new(Duration::from_secs(1)).unwrap()).unwrap()
}

fn cache_with(crl: Option<Vec<u8>>) -> (TempDir, RevocationCache) {
    let dir = TempDir::new().unwrap();
    if let Some(crl) = crl {
        fs::write(dir.path().join(CRL_FILE), crl).unwrap();
    }
    let cache = open_cache(dir.path());
    (dir, cache)
}

#[test]
fn test_device_certificate_points_at_crl() {
    let pki = Pki::new();
    let (leaf, _) = pki.device(DEVICE_SERIAL, Some(CRL_URL));

    assert_eq!(distribution_points(&leaf).unwrap(), vec![CRL_URL.to_string()]);
    assert!(distribution_points(pki.ca.der()).unwrap().is_empty());
}

#[test]
fn test_good_chain_verifies() {
    let pki = Pki::new();
    let (leaf, key) = pki.device(DEVICE_SERIAL, Some(CRL_URL));
    let (_dir, cache) = cache_with(Some(pki.crl(&[0x07])));

    let raw = ondie_sign(&key, b"serial-1234");
    let chain = pki.chain(leaf);
    assert!(verify_with_revocation(b"serial-1234", &raw, &chain, &cache, true).unwrap());
    assert!(!verify_with_revocation(b"serial-9999", &raw, &chain, &cache, true).unwrap());
}

#[test]
fn test_revoked_leaf_fails() {
    let pki = Pki::new();
    let (leaf, key) = pki.device(DEVICE_SERIAL, Some(CRL_URL));
    let (_dir, cache) = cache_with(Some(pki.crl(&[DEVICE_SERIAL])));

    assert_eq!(
        RevocationChecker::new(&cache).check(&leaf).unwrap(),
        RevocationStatus::Revoked
    );

    let raw = ondie_sign(&key, b"data");
    let chain = pki.chain(leaf);
    assert!(!verify_with_revocation(b"data", &raw, &chain, &cache, true).unwrap());
    // The signature itself is fine.
    assert!(verify_with_revocation(b"data", &raw, &chain, &cache, false).unwrap());
}

#[test]
fn test_missing_crl_fails_closed() {
    let pki = Pki::new();
    let (leaf, key) = pki.device(DEVICE_SERIAL, Some(CRL_URL));
    let (_dir, cache) = cache_with(None);

    assert_eq!(
        RevocationChecker::new(&cache).check(&leaf).unwrap(),
        RevocationStatus::Unknown
    );

    let raw = ondie_sign(&key, b"data");
    let chain = pki.chain(leaf);
    assert!(!verify_with_revocation(b"data", &raw, &chain, &cache, true).unwrap());
}

#[test]
fn test_certificate_without_distribution_point_passes() {
    let pki = Pki::new();
    let (leaf, key) = pki.device(DEVICE_SERIAL, None);
    let (_dir, cache) = cache_with(None);

    let raw = ondie_sign(&key, b"data");
    assert!(verify_with_revocation(b"data", &raw, &pki.chain(leaf), &cache, true).unwrap());
}

#[test]
fn test_empty_chain_is_an_error() {
    let (_dir, cache) = cache_with(None);
    let empty: &[Vec<u8>] = &[];

    assert!(matches!(
        verify_with_revocation(b"data", &[0u8; 132], empty, &cache, true),
        Err(RvError::InvalidChain)
    ));
    assert!(matches!(
        TrustEngine::new(Arc::new(cache), false).check_chain(empty),
        Err(RvError::InvalidChain)
    ));
}

#[test]
fn test_leaf_key_matches_signer() {
    let pki = Pki::new();
    let (leaf, key) = pki.device(DEVICE_SERIAL, None);
    let signer = P384Signer::from_pkcs8_der(&key.serialize_der()).unwrap();

    assert_eq!(
        leaf_public_key(&leaf).unwrap(),
        signer.public_key().unwrap().encoded
    );
}

#[test]
fn test_staged_crl_becomes_visible_after_promotion() {
    let pki = Pki::new();
    let (leaf, _) = pki.device(DEVICE_SERIAL, Some(CRL_URL));
    let (dir, cache) = cache_with(Some(pki.crl(&[])));
    let checker = RevocationChecker::new(&cache);
    assert_eq!(checker.check(&leaf).unwrap(), RevocationStatus::Good);

    let staged = dir.path().join(format!("{CRL_FILE}{STAGED_SUFFIX}"));
    fs::write(&staged, pki.crl(&[DEVICE_SERIAL])).unwrap();
    assert_eq!(checker.check(&leaf).unwrap(), RevocationStatus::Good);

    fs::write(dir.path().join(SENTINEL), b"").unwrap();
    assert_eq!(checker.check(&leaf).unwrap(), RevocationStatus::Revoked);
    assert!(!staged.exists());
    assert!(!dir.path().join(SENTINEL).exists());
}

#[tokio::test]
async fn test_refresh_from_unreachable_source_stages_nothing() {
    let dir = TempDir::new().unwrap();
    let cache = RevocationCache::open(
        dir.path(),
        &["http://127.0.0.1:9/crls/".to_string()],
        CrlFetcher::new(Duration::from_secs(1)).unwrap(),
    )
    .unwrap();

    assert_eq!(cache.refresh().await, 0);
    assert!(!dir.path().join(SENTINEL).exists());
    assert!(!cache.reconcile().unwrap());
    assert!(cache.is_empty());
}

struct Direct<'a>(&'a To0Server<MemoryTo0Storage>);

impl Transport for Direct<'_> {
    fn send(&mut self, msg: fdo_rv_core::Message) -> Result<fdo_rv_core::Message, RvError> {
        self.0.handle(&msg)
    }
}

fn register_device(chain: Vec<Vec<u8>>, cache: RevocationCache) -> Result<(), RvError> {
    let server = To0Server::new(
        Arc::new(MemoryTo0Storage::new(3600)),
        Arc::new(KeyPolicy::new()),
    )
    .with_trust_engine(TrustEngine::new(Arc::new(cache), true));

    let owner = Arc::new(P384Signer::random());
    let voucher =
        OwnershipVoucher::new(Uuid::new_v4(), owner.public_key()?).with_device_chain(chain);
    let guid = voucher.guid;
    let mut storage = MemoryTo0ClientStorage::new(voucher, RedirectBlob::default(), 600);
    storage.add_signer(owner)?;

    let result = To0Client::new(storage).run(&mut Direct(&server));
    assert_eq!(result.is_ok(), server.storage().redirect(&guid).is_some());
    result.map(|_| ())
}

#[test]
fn test_registration_checks_device_chain() {
    let pki = Pki::new();
    let (good, _) = pki.device(0x10, Some(CRL_URL));
    let (revoked, _) = pki.device(0x11, Some(CRL_URL));
    let crl = pki.crl(&[0x11]);

    let (_good_dir, cache) = cache_with(Some(crl.clone()));
    register_device(pki.chain(good.clone()), cache).unwrap();

    let (_revoked_dir, cache) = cache_with(Some(crl));
    let err = register_device(pki.chain(revoked), cache).unwrap_err();
    assert!(err.is_authentication_failure());

    let (_empty_dir, cache) = cache_with(None);
    let err = register_device(pki.chain(good), cache).unwrap_err();
    assert!(err.is_authentication_failure());
}
