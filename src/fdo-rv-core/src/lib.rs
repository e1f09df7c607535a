//! # fdo-rv-core
//!
//! Rendezvous registration (TO0) for FDO device onboarding, and the trust
//! engine it relies on for hardware-rooted device identities.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              To0Server  /  To0Client                         │
//! │     (session lifecycle, Nonce3 binding, signed redirect)     │
//! │                                                              │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────┐   │
//! │  │  KeyPolicy   │  │ TrustEngine  │  │ To0ServerStorage │   │
//! │  │ (allow/deny) │  │ (on-die sig) │  │ (bindings, leases)│  │
//! │  └──────────────┘  └──────────────┘  └──────────────────┘   │
//! │                           │                                  │
//! │                           ▼                                  │
//! │  ┌──────────────────────────────────────────────────┐      │
//! │  │              RevocationCache                      │      │
//! │  │    (staged CRL refresh, sentinel promotion)       │      │
//! │  └──────────────────────────────────────────────────┘      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Properties
//!
//! - **Fail-secure**: an unknown revocation status rejects the chain
//! - **Single use**: a Nonce3 is released when its session ends
//! - **Deny wins**: a denied owner key is rejected even if allowed

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::pedantic)] // Too strict for production code
#![allow(clippy::missing_errors_doc)] // Error documentation not required
#![allow(clippy::module_name_repetitions)] // Allow Type in module::Type
#![allow(clippy::must_use_candidate)] // Not all functions need must_use

pub mod cache;
pub mod config;
pub mod error;
pub mod https;
pub mod memory;
pub mod message;
pub mod policy;
pub mod revocation;
pub mod session;
pub mod storage;
pub mod to0_client;
pub mod to0_server;
pub mod trust;
pub mod types;
pub mod voucher;

pub use cache::{CacheState, RevocationCache};
pub use config::{parse_source_list, RvConfig};
pub use error::RvError;
pub use https::CrlFetcher;
pub use memory::{MemoryTo0ClientStorage, MemoryTo0Storage};
pub use message::{Message, MsgType, ProtocolInfo};
pub use policy::KeyPolicy;
pub use revocation::{distribution_points, RevocationChecker, RevocationStatus};
pub use session::{Lifecycle, Nonce3, SessionObserver, SessionState, SessionToken};
pub use storage::{To0ClientStorage, To0ServerStorage};
pub use to0_client::{To0Client, Transport};
pub use to0_server::{ServerSession, To0Server};
pub use trust::{verify_with_revocation, TrustEngine};
pub use types::{
    Lease, RedirectBlob, RedirectRecord, RendezvousAddress, RvProtocol, SignedRedirect, To0d,
    To1dPayload,
};
pub use voucher::{OwnershipVoucher, VoucherAccess};
