//! In-process signing canister.
//!
//! `MemoryCanister` reproduces the remote canister's contract without a
//! network: it checks that callers are authorized signers, keys messages by
//! their content-derived id, counts each signer once per message, and signs
//! with its own secp256k1 key as soon as the threshold is reached. Every
//! `MemoryGateway` built from the same canister shares its state, the way
//! independent clients share one deployed canister.

use crate::{CanisterGateway, GatewayError};
use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use signer_account::SignerIdentity;
use signer_signature::{personal_message_digest, public_key_to_address};
use signer_types::{
	truncate_id, without_0x_prefix, ConfigSchema, Field, FieldType, MessageId, MessageState,
	Principal, QuorumConfig, Schema, SignatureComponents, TransferIntent, ValidationError,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A message known to the canister.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
	pub intent: TransferIntent,
	/// Distinct signers that submitted the message, in arrival order.
	pub signers: Vec<Principal>,
	pub signature: Option<SignatureComponents>,
}

/// Snapshot of the canister state.
#[derive(Debug, Clone, Default)]
pub struct CanisterState {
	pub quorum: Option<QuorumConfig>,
	pub messages: HashMap<MessageId, StoredMessage>,
}

/// The shared canister behind every [`MemoryGateway`].
pub struct MemoryCanister {
	state: RwLock<CanisterState>,
	signing_key: SigningKey,
	allow_reset: bool,
}

impl MemoryCanister {
	/// Creates a canister signing with `signing_key`.
	///
	/// When `allow_reset` is true a second `setup` clears all state instead
	/// of being rejected.
	pub fn new(signing_key: SigningKey, allow_reset: bool) -> Self {
		Self {
			state: RwLock::new(CanisterState::default()),
			signing_key,
			allow_reset,
		}
	}

	/// Builds a gateway that calls this canister as `sender`.
	pub fn gateway(self: &Arc<Self>, sender: Principal) -> MemoryGateway {
		MemoryGateway {
			canister: Arc::clone(self),
			sender,
		}
	}

	pub async fn state(&self) -> CanisterState {
		self.state.read().await.clone()
	}

	async fn setup(&self, caller: Principal, quorum: &QuorumConfig) -> Result<(), GatewayError> {
		let mut state = self.state.write().await;

		if state.quorum.is_some() {
			if !self.allow_reset {
				return Err(GatewayError::Rejected("Canister is already set up".into()));
			}
			tracing::warn!(caller = %caller, "Resetting canister state");
			state.messages.clear();
		}

		state.quorum = Some(quorum.clone());
		tracing::info!(
			signers = quorum.signers().len(),
			threshold = quorum.threshold(),
			"Canister set up"
		);
		Ok(())
	}

	async fn create_or_sign(
		&self,
		caller: Principal,
		intent: &TransferIntent,
	) -> Result<MessageId, GatewayError> {
		let mut state = self.state.write().await;

		let quorum = state
			.quorum
			.clone()
			.ok_or_else(|| GatewayError::Rejected("Canister is not set up".into()))?;
		if !quorum.contains(&caller) {
			return Err(GatewayError::Rejected(
				"Caller is not an authorized signer".into(),
			));
		}

		let message_id = intent.message_id();
		let message = state
			.messages
			.entry(message_id)
			.or_insert_with(|| StoredMessage {
				intent: intent.clone(),
				signers: Vec::new(),
				signature: None,
			});

		if !message.signers.contains(&caller) {
			message.signers.push(caller);
		}

		if message.signers.len() >= quorum.threshold() as usize && message.signature.is_none() {
			message.signature = Some(self.sign(&message_id)?);
			tracing::info!(
				message_id = %truncate_id(&message_id.to_string()),
				signers = message.signers.len(),
				"Threshold reached, message signed"
			);
		} else {
			tracing::debug!(
				message_id = %truncate_id(&message_id.to_string()),
				signers = message.signers.len(),
				threshold = quorum.threshold(),
				"Message approval recorded"
			);
		}

		Ok(message_id)
	}

	/// Signs the 32-byte message digest under the personal-message convention.
	fn sign(&self, message_id: &MessageId) -> Result<SignatureComponents, GatewayError> {
		let digest = personal_message_digest(message_id.digest().as_slice());
		let (signature, recovery_id) = self
			.signing_key
			.sign_prehash_recoverable(digest.as_slice())
			.map_err(|e| GatewayError::Rejected(format!("Signing failed: {}", e)))?;

		let (r, s) = signature.split_bytes();
		Ok(SignatureComponents::new(
			recovery_id.is_y_odd(),
			alloy_primitives::U256::from_be_slice(&r),
			alloy_primitives::U256::from_be_slice(&s),
		))
	}

	async fn get_signature(&self, message_id: &MessageId) -> Result<String, GatewayError> {
		let state = self.state.read().await;
		match state.messages.get(message_id) {
			Some(StoredMessage {
				signature: Some(signature),
				..
			}) => Ok(signature.to_string()),
			Some(_) => Err(GatewayError::NotReady {
				message_id: *message_id,
				state: MessageState::PartiallySigned,
			}),
			None => Err(GatewayError::NotReady {
				message_id: *message_id,
				state: MessageState::Unsigned,
			}),
		}
	}

	fn public_key_hex(&self) -> String {
		hex::encode(
			self.signing_key
				.verifying_key()
				.to_encoded_point(true)
				.as_bytes(),
		)
	}

	fn evm_address(&self) -> String {
		public_key_to_address(self.signing_key.verifying_key()).to_checksum(None)
	}
}

/// A signer client of a [`MemoryCanister`].
pub struct MemoryGateway {
	canister: Arc<MemoryCanister>,
	sender: Principal,
}

impl MemoryGateway {
	pub fn canister(&self) -> &Arc<MemoryCanister> {
		&self.canister
	}
}

/// Configuration schema for the in-process canister.
pub struct MemoryGatewaySchema;

impl MemoryGatewaySchema {
	/// Static validation method for use before instance creation
	pub fn validate_config(config: &toml::Value) -> Result<(), ValidationError> {
		let instance = Self;
		instance.validate(config)
	}
}

impl ConfigSchema for MemoryGatewaySchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![
				Field::new("signing_key", FieldType::Hex { bytes: Some(32) }),
				Field::new("allow_reset", FieldType::Boolean),
			],
		);
		schema.validate(config)
	}
}

#[async_trait]
impl CanisterGateway for MemoryGateway {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MemoryGatewaySchema)
	}

	fn sender(&self) -> Principal {
		self.sender
	}

	async fn setup(&self, quorum: &QuorumConfig) -> Result<(), GatewayError> {
		self.canister.setup(self.sender, quorum).await
	}

	async fn create_or_sign_message(
		&self,
		intent: &TransferIntent,
	) -> Result<MessageId, GatewayError> {
		self.canister.create_or_sign(self.sender, intent).await
	}

	async fn get_signature(&self, message_id: &MessageId) -> Result<String, GatewayError> {
		self.canister.get_signature(message_id).await
	}

	async fn public_key(&self) -> Result<String, GatewayError> {
		Ok(self.canister.public_key_hex())
	}

	async fn evm_address(&self) -> Result<String, GatewayError> {
		Ok(self.canister.evm_address())
	}
}

/// Factory function to create in-process gateways from configuration.
///
/// Configuration parameters:
/// - `signing_key`: hex secp256k1 key the canister signs with (optional,
///   random when absent)
/// - `allow_reset`: accept a second `setup` by clearing state (default false)
///
/// All returned gateways share a single canister.
pub fn create_gateway(
	config: &toml::Value,
	identities: &[SignerIdentity],
) -> Result<Vec<Box<dyn CanisterGateway>>, GatewayError> {
	MemoryGatewaySchema::validate_config(config)
		.map_err(|e| GatewayError::Configuration(format!("Invalid configuration: {}", e)))?;

	let signing_key = match config.get("signing_key").and_then(|v| v.as_str()) {
		Some(key) => {
			let bytes = hex::decode(without_0x_prefix(key))
				.map_err(|e| GatewayError::Configuration(format!("Invalid signing_key: {}", e)))?;
			SigningKey::from_slice(&bytes).map_err(|_| {
				GatewayError::Configuration("signing_key is not a valid secp256k1 key".into())
			})?
		},
		None => SigningKey::random(&mut rand::rngs::OsRng),
	};
	let allow_reset = config
		.get("allow_reset")
		.and_then(|v| v.as_bool())
		.unwrap_or(false);

	let canister = Arc::new(MemoryCanister::new(signing_key, allow_reset));
	tracing::info!(
		address = %canister.evm_address(),
		clients = identities.len(),
		"Created in-process canister"
	);

	Ok(identities
		.iter()
		.map(|identity| {
			Box::new(canister.gateway(identity.principal())) as Box<dyn CanisterGateway>
		})
		.collect())
}

/// Registry for the in-process gateway implementation.
pub struct Registry;

impl signer_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "memory";
	type Factory = crate::GatewayFactory;

	fn factory() -> Self::Factory {
		create_gateway
	}
}

impl crate::GatewayRegistry for Registry {}
