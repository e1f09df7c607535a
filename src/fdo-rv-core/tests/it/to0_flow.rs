//! End-to-end TO0 registration between a client and a server.
//!
//! Messages travel through a loopback transport that round-trips them
//! through their JSON wire encoding.

use std::sync::Arc;

use base64::Engine;
use fdo_crypto::{KeySigner, P384Signer};
use fdo_rv_core::message::{FIELD_TO0D, FIELD_TO1D};
use fdo_rv_core::{
    KeyPolicy, MemoryTo0ClientStorage, MemoryTo0Storage, Message, MsgType, Nonce3,
    OwnershipVoucher, RedirectBlob, RendezvousAddress, RvError, RvProtocol, SessionState,
    SignedRedirect, To0Client, To0ClientStorage, To0Server, To0d, Transport,
};
use uuid::Uuid;

type Tamper = Box<dyn FnMut(&mut Message)>;

struct Loopback<'a> {
    server: &'a To0Server<MemoryTo0Storage>,
    tamper: Option<Tamper>,
    sent: Vec<Message>,
}

impl<'a> Loopback<'a> {
    fn new(server: &'a To0Server<MemoryTo0Storage>) -> Self {
        Self {
            server,
            tamper: None,
            sent: Vec::new(),
        }
    }

    fn tampering(server: &'a To0Server<MemoryTo0Storage>, tamper: Tamper) -> Self {
        Self {
            server,
            tamper: Some(tamper),
            sent: Vec::new(),
        }
    }
}

impl Transport for Loopback<'_> {
    fn send(&mut self, mut msg: Message) -> Result<Message, RvError> {
        if msg.msg_type == MsgType::OwnerSign {
            if let Some(tamper) = self.tamper.as_mut() {
                tamper(&mut msg);
            }
        }

        let wire = serde_json::to_vec(&msg).unwrap();
        let msg: Message = serde_json::from_slice(&wire).unwrap();
        self.sent.push(msg.clone());

        let reply = self.server.handle(&msg)?;
        let wire = serde_json::to_vec(&reply).unwrap();
        Ok(serde_json::from_slice(&wire).unwrap())
    }
}

fn server(max_wait: u32) -> To0Server<MemoryTo0Storage> {
    To0Server::new(
        Arc::new(MemoryTo0Storage::new(max_wait)),
        Arc::new(KeyPolicy::new()),
    )
}

fn blob() -> RedirectBlob {
    RedirectBlob {
        addresses: vec![RendezvousAddress {
            dns: Some("owner.example.com".into()),
            ip: None,
            port: 8043,
            protocol: RvProtocol::Https,
        }],
    }
}

fn client(request_wait: u32) -> To0Client<MemoryTo0ClientStorage> {
    let signer = Arc::new(P384Signer::random());
    let voucher = OwnershipVoucher::new(Uuid::new_v4(), signer.public_key().unwrap());
    let mut storage = MemoryTo0ClientStorage::new(voucher, blob(), request_wait);
    storage.add_signer(signer).unwrap();
    To0Client::new(storage)
}

fn states(server: &To0Server<MemoryTo0Storage>) -> Vec<SessionState> {
    server
        .storage()
        .transitions()
        .into_iter()
        .map(|(state, _)| state)
        .collect()
}

#[test]
fn test_registration_round_trip() {
    let server = server(86400);
    let mut client = client(3600);
    let mut transport = Loopback::new(&server);

    let lease = client.run(&mut transport).unwrap();
    assert_eq!(lease.requested_wait, 3600);
    assert_eq!(lease.granted_wait, 3600);
    assert_eq!(client.state(), SessionState::Completed);
    assert_eq!(client.storage().response_wait(), Some(3600));

    // The token the server minted came back on every later message.
    let token = client.token().cloned().unwrap();
    assert!(transport.sent[1..]
        .iter()
        .all(|msg| msg.token().as_ref() == Some(&token)));

    let completed: Vec<_> = server
        .storage()
        .transitions()
        .into_iter()
        .filter(|(state, _)| *state == SessionState::Completed)
        .collect();
    assert_eq!(completed, vec![(SessionState::Completed, Some(token))]);
    assert_eq!(server.storage().session_count(), 0);
}

#[test]
fn test_stored_redirect_is_what_the_owner_signed() {
    let server = server(86400);
    let mut client = client(3600);
    let guid = client.storage().voucher().guid;

    let lease = client.run(&mut Loopback::new(&server)).unwrap();
    assert!(lease.granted_wait <= 3600);

    let record = server.storage().redirect(&guid).unwrap();
    assert_eq!(record.requested_wait, 3600);
    assert_eq!(
        record.owner_fingerprint,
        client.storage().voucher().owner_public_key.fingerprint()
    );

    let signed = SignedRedirect::from_bytes(&record.signed_blob).unwrap();
    assert!(signed
        .verify(&client.storage().voucher().owner_public_key)
        .unwrap());
    assert_eq!(signed.decode_payload().unwrap().blob, blob());
}

#[test]
fn test_server_caps_the_lease() {
    let server = server(600);
    let mut client = client(3600);

    let lease = client.run(&mut Loopback::new(&server)).unwrap();
    assert_eq!(lease.granted_wait, 600);
    assert_eq!(client.storage().response_wait(), Some(600));
    assert_eq!(client.state(), SessionState::Completed);
}

#[test]
fn test_denylisted_owner_is_rejected() {
    let server = server(86400);
    let mut client = client(3600);
    let owner = client.storage().voucher().owner_public_key.fingerprint();
    server.seed_denylist(&[owner]).unwrap();

    let err = client.run(&mut Loopback::new(&server)).unwrap_err();
    assert!(err.is_authentication_failure());
    assert_eq!(client.state(), SessionState::Failed);

    let guid = client.storage().voucher().guid;
    assert!(server.storage().redirect(&guid).is_none());
    assert!(!states(&server).contains(&SessionState::Completed));
    assert_eq!(server.storage().session_count(), 0);
}

#[test]
fn test_forged_token_is_rejected() {
    let server = server(86400);
    let mut client = client(3600);
    let mut transport = Loopback::tampering(
        &server,
        Box::new(|msg: &mut Message| msg.set_token(&"forged".into())),
    );

    let err = client.run(&mut transport).unwrap_err();
    assert!(err.is_authentication_failure());
    assert_eq!(client.state(), SessionState::Failed);

    let guid = client.storage().voucher().guid;
    assert!(server.storage().redirect(&guid).is_none());
    assert!(states(&server).ends_with(&[SessionState::Continuing, SessionState::Failed]));
}

#[test]
fn test_nonce_mismatch_is_rejected() {
    let server = server(86400);
    let mut client = client(3600);
    let mut transport = Loopback::tampering(
        &server,
        Box::new(|msg: &mut Message| {
            let engine = base64::engine::general_purpose::STANDARD;
            let encoded: String = msg.get(FIELD_TO0D).unwrap();
            let mut to0d = To0d::from_bytes(&engine.decode(encoded).unwrap()).unwrap();
            to0d.nonce3 = Nonce3::random();
            msg.set(FIELD_TO0D, &engine.encode(to0d.to_bytes().unwrap()))
                .unwrap();
        }),
    );

    let err = client.run(&mut transport).unwrap_err();
    assert!(err.is_authentication_failure());
    assert_eq!(server.storage().session_count(), 0);
    assert!(server
        .storage()
        .redirect(&client.storage().voucher().guid)
        .is_none());
}

#[test]
fn test_tampered_signature_is_rejected() {
    let server = server(86400);
    let mut client = client(3600);
    let mut transport = Loopback::tampering(
        &server,
        Box::new(|msg: &mut Message| {
            let mut signed: SignedRedirect = msg.get(FIELD_TO1D).unwrap();
            signed.signature[0] ^= 0x01;
            msg.set(FIELD_TO1D, &signed).unwrap();
        }),
    );

    let err = client.run(&mut transport).unwrap_err();
    assert!(err.is_authentication_failure());
    assert!(states(&server).ends_with(&[SessionState::Failed]));
    assert!(server
        .storage()
        .redirect(&client.storage().voucher().guid)
        .is_none());
}

#[test]
fn test_owner_sign_cannot_be_replayed() {
    let server = server(86400);
    let mut client = client(3600);
    let mut transport = Loopback::new(&server);
    client.run(&mut transport).unwrap();

    let owner_sign = transport.sent[1].clone();
    assert_eq!(owner_sign.msg_type, MsgType::OwnerSign);

    let err = server.handle(&owner_sign).unwrap_err();
    assert!(err.is_authentication_failure());
}

#[test]
fn test_allowlist_admits_listed_owner_only() {
    let server = server(86400);
    let mut listed = client(60);
    let mut unlisted = client(60);
    server
        .seed_allowlist(&[listed.storage().voucher().owner_public_key.fingerprint()])
        .unwrap();

    assert!(listed.run(&mut Loopback::new(&server)).is_ok());
    assert!(unlisted
        .run(&mut Loopback::new(&server))
        .unwrap_err()
        .is_authentication_failure());
}
