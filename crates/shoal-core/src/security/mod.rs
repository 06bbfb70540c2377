//! Security policy evaluation and message protection
//!
//! ## Overview
//!
//! - [`SecurityPolicy`]: encryption and signature levels plus reply policy,
//!   configured once per engine
//! - [`SecurityEvaluator`]: validates the policy against the available keys and
//!   decides, per outgoing message, which keys to apply
//! - [`WireEnvelope`]: the sealed and signed form written to transports
//! - Inbound verification: [`SecurityEvaluator::open_inbound`]
//! - [`TrustStore`]: certificates of peers and the owner's private keys

mod envelope;
mod evaluator;
mod inbound;
mod policy;
mod trust;

pub use envelope::{EnvelopeBody, WireEnvelope, ENVELOPE_VERSION};
pub use evaluator::{Direction, SecurityContext, SecurityEvaluator};
pub use policy::{ReplyPolicy, SecurityLevel, SecurityPolicy};
pub use trust::{MemoryTrustStore, TrustStore};
