//! Identity module for Shoal
//!
//! ## Overview
//!
//! - **Owner keypair**: Ed25519 for signing, X25519 for opening sealed messages
//! - **Peer public keys**: the verifying and agreement halves of a peer's keypair
//! - **Certificates**: a public key filed under a peer's subject identifiers,
//!   looked up in the trust store when a message has to be sealed for a peer
//!
//! ## Example
//!
//! ```rust
//! use shoal_core::identity::{OwnerKeypair, PeerCertificate};
//!
//! let keypair = OwnerKeypair::generate();
//! let cert = PeerCertificate::new(vec!["urn:alice".into()], keypair.public_key());
//!
//! let signature = keypair.sign(b"hello");
//! assert!(cert.public_key.verify(b"hello", &signature));
//! ```

mod certificate;
mod keypair;

pub use certificate::PeerCertificate;
pub use keypair::{OwnerKeypair, PeerPublicKey, KEY_BYTES};
