//! Quorum signing session for the quorum signer client.
//!
//! A [`QuorumSession`] drives N independent signer clients against one
//! remote signing canister: one client establishes the quorum, every client
//! submits the same transfer intent, and once the threshold is reached any
//! client can read the signature back. The session keeps no per-message
//! state of its own; everything it knows about a message comes from the
//! canister.

use signer_gateway::GatewayError;
use signer_signature::{ParseError, VerificationError};
use signer_types::{MessageId, QuorumError};
use std::time::Duration;
use thiserror::Error;

/// Builds a session from configuration and gateway factories.
pub mod builder;
/// The session itself and its polling policy.
pub mod session;

pub use builder::{BuilderError, SessionBuilder};
pub use session::{PollPolicy, QuorumSession, SignedIntent, SignerOutcome, SubmissionReport};

/// Errors that can occur during a signing session.
#[derive(Debug, Error)]
pub enum SessionError {
	#[error(transparent)]
	Gateway(#[from] GatewayError),
	#[error("Invalid signature text: {0}")]
	Parse(#[from] ParseError),
	#[error("Verification failed: {0}")]
	Verification(#[from] VerificationError),
	#[error("Invalid quorum: {0}")]
	Quorum(#[from] QuorumError),
	/// No client exists at the requested position.
	#[error("No signer client at index {0}")]
	UnknownSigner(usize),
	/// The canister identified the intent differently than the client did.
	#[error("Canister returned message id {returned}, expected {expected}")]
	MessageIdMismatch {
		expected: MessageId,
		returned: MessageId,
	},
	#[error("Signature for message {message_id} not available after {waited:?}")]
	Timeout {
		message_id: MessageId,
		waited: Duration,
	},
	/// Fewer signers than the threshold managed to submit the message.
	#[error("Only {accepted} of {threshold} required signers submitted the message")]
	QuorumNotReached { accepted: usize, threshold: u32 },
}

impl SessionError {
	/// Whether this wraps the canister's non-fatal "not signed yet" outcome.
	pub fn is_not_ready(&self) -> bool {
		matches!(self, SessionError::Gateway(e) if e.is_not_ready())
	}
}
