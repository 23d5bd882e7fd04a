//! pakls
//!
//! A sans-IO TLS 1.2/1.3 session engine with certificate and SPAKE2+
//! password-authenticated key exchange.
//!
//! The crate performs no socket I/O and starts no timers. An [`Engine`] is
//! driven by the caller through [`Engine::wrap`] (plaintext out to the wire)
//! and [`Engine::unwrap`] (wire bytes in), and reports what it needs next as a
//! [`Status`].
//!
//! # Goals
//! - **Buffer driven**: four fixed-capacity byte streams per engine, never
//!   growing past one record.
//! - **Pluggable crypto**: every primitive goes through a [`CryptoProvider`];
//!   the RustCrypto backend in [`crypto::rust_crypto`] is the default.
//! - **PAKE or certificates**: a server presents a certificate chain or a
//!   table of SPAKE2+ links, and never silently falls back between the two.
//! - **Resumption**: sessions are cached in a shared, bounded [`SessionCache`]
//!   with an optional persistent tier.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::SystemTime;
//!
//! use pakls::{Config, Engine, Status};
//!
//! let config = Arc::new(Config::default());
//! let mut engine = Engine::client(config, SystemTime::now());
//!
//! let mut out = vec![0; 32768];
//! let res = engine.wrap(&[], &mut out).unwrap();
//! assert_eq!(res.status, Status::NeedHandshake);
//! // send &out[..res.produced] to the server
//! ```
//!
//! # PAKE
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::SystemTime;
//!
//! use pakls::{
//!     Config, Credential, Engine, PakeClientParams, PakeCredential, PakeOption,
//!     SPAKE2PLUS_PRERELEASE,
//! };
//!
//! let option = PakeOption::builder(SPAKE2PLUS_PRERELEASE)
//!     .component("password", b"correct horse")
//!     .build()
//!     .unwrap();
//! let params = PakeClientParams::new(Some(&b"client"[..]), Some(&b"server"[..]), vec![option]).unwrap();
//!
//! let engine = Engine::client(Arc::new(Config::default()), SystemTime::now())
//!     .with_credential(Credential::Pake(PakeCredential::Client(params)))
//!     .unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all)]

#[macro_use]
extern crate log;

mod buffer;
mod cache;
pub mod certificate;
mod config;
pub mod credential;
pub mod crypto;
mod engine;
mod error;
mod handshake;
pub(crate) mod message;
mod record;
mod session;
mod types;

pub use buffer::Buf;
pub use cache::{FileSessionStore, SessionCache, SessionPin, SessionStore};
pub use config::{
    Config, ConfigBuilder, DefaultTrustPolicy, FingerprintTrustPolicy, TrustPolicy,
    MIN_FRAGMENT_LEN,
};
pub use credential::{
    CertifiedKey, Credential, Link, PakeClientParams, PakeCredential, PakeOption,
    PakeServerParams, MAX_IDENTITY_LEN, MAX_PAKE_OPTIONS, SPAKE2PLUS_PRERELEASE,
};
pub use crypto::CryptoProvider;
pub use engine::{Engine, EngineResult, HandshakeStatus, Status};
pub use error::{Error, ErrorKind};
pub use handshake::HandshakeState;
pub use message::{MAX_CHAIN_BYTES, MAX_CHAIN_LEN};
pub use record::MAX_FRAGMENT_LEN;
pub use session::{PeerIdentity, Session, SessionBuilder};
pub use types::{CipherSuite, ContentType, HashAlgorithm, ProtocolVersion, Random, Role, SessionId};
