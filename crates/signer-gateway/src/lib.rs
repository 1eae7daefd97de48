//! Canister gateway module for the quorum signer client.
//!
//! The threshold-signing canister is an external collaborator. This module
//! defines the call surface a signer client uses to reach it, and provides
//! two implementations: an Internet Computer agent talking to a deployed
//! canister, and an in-process canister used for local runs and tests.
//!
//! Each gateway instance acts on behalf of exactly one signer identity. A
//! session with N signers therefore holds N gateways that never share state
//! on the client side.

use async_trait::async_trait;
use signer_account::SignerIdentity;
use signer_types::{
	ConfigSchema, ImplementationRegistry, MessageId, MessageState, Principal, QuorumConfig,
	TransferIntent,
};
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod ic;
	pub mod memory;
}

/// Errors that can occur while talking to the signing canister.
#[derive(Debug, Error)]
pub enum GatewayError {
	/// The call did not reach the canister or did not complete.
	#[error("Transport error: {0}")]
	Transport(String),
	/// The signature was requested before the quorum signed the message.
	#[error("Signature for message {message_id} is not ready: {state}")]
	NotReady {
		message_id: MessageId,
		state: MessageState,
	},
	/// The canister processed the call and refused it.
	#[error("Rejected by canister: {0}")]
	Rejected(String),
	/// The reply could not be decoded.
	#[error("Failed to decode reply: {0}")]
	Decode(String),
	/// The gateway configuration is invalid.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

impl GatewayError {
	/// Whether this is the non-fatal "quorum not reached yet" outcome.
	pub fn is_not_ready(&self) -> bool {
		matches!(self, GatewayError::NotReady { .. })
	}
}

/// Trait defining the call surface of the signing canister.
///
/// Every call is an independent request/response exchange. Implementations
/// do not retry, batch or cache.
#[async_trait]
pub trait CanisterGateway: Send + Sync {
	/// Returns the configuration schema for this gateway implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// The principal this gateway calls as.
	fn sender(&self) -> Principal;

	/// Establishes signer membership and threshold on the canister.
	async fn setup(&self, quorum: &QuorumConfig) -> Result<(), GatewayError>;

	/// Creates the message on first submission, otherwise adds this signer's
	/// approval. Repeated calls by the same signer are idempotent.
	async fn create_or_sign_message(
		&self,
		intent: &TransferIntent,
	) -> Result<MessageId, GatewayError>;

	/// Returns the textual signature once the threshold has been reached.
	///
	/// Before that the call fails with [`GatewayError::NotReady`].
	async fn get_signature(&self, message_id: &MessageId) -> Result<String, GatewayError>;

	/// Hex-encoded SEC1 public key of the canister's threshold key.
	async fn public_key(&self) -> Result<String, GatewayError>;

	/// Ethereum address derived from the canister's threshold key.
	async fn evm_address(&self) -> Result<String, GatewayError>;
}

/// Type alias for gateway factory functions.
///
/// A factory receives its `[gateway.implementations.<name>]` table and the
/// signer identities of the session, and returns one gateway per identity in
/// the same order.
pub type GatewayFactory = fn(
	&toml::Value,
	&[SignerIdentity],
) -> Result<Vec<Box<dyn CanisterGateway>>, GatewayError>;

/// Registry trait for gateway implementations.
pub trait GatewayRegistry: ImplementationRegistry<Factory = GatewayFactory> {}

/// Get all registered gateway implementations.
///
/// Returns a vector of (name, factory) tuples for all available gateway
/// implementations.
pub fn get_all_implementations() -> Vec<(&'static str, GatewayFactory)> {
	use implementations::{ic, memory};

	vec![
		(ic::Registry::NAME, ic::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
	]
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_registered_names() {
		let names: Vec<_> = get_all_implementations()
			.into_iter()
			.map(|(name, _)| name)
			.collect();
		assert_eq!(names, vec!["ic", "memory"]);
	}

	#[test]
	fn test_not_ready_is_distinct() {
		let not_ready = GatewayError::NotReady {
			message_id: MessageId::from_digest(&Default::default()),
			state: MessageState::PartiallySigned,
		};
		assert!(not_ready.is_not_ready());
		assert!(!GatewayError::Transport("connection refused".into()).is_not_ready());
		assert!(not_ready.to_string().contains("partially signed"));
	}
}
