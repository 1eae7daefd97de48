//! Internet Computer gateway.
//!
//! Talks to a deployed threshold-ECDSA canister through `ic-agent`, one agent
//! per signer identity so that each call is authenticated as that signer.

use crate::{CanisterGateway, GatewayError};
use async_trait::async_trait;
use candid::{Decode, Encode};
use ic_agent::identity::Secp256k1Identity;
use ic_agent::Agent;
use signer_account::SignerIdentity;
use signer_types::{
	truncate_id, ConfigSchema, Field, FieldType, MessageId, MessageState, Principal,
	QuorumConfig, Schema, TransferIntent, ValidationError,
};
use tokio::sync::OnceCell;

/// Reply of `get_signature` for a message that has not reached its threshold.
const REPLY_NOT_SIGNED: &str = "msg found but not signed";
/// Reply of `get_signature` for an id the canister has never seen.
const REPLY_UNKNOWN_MESSAGE: &str = "no msg found with id";
/// Reply of `setup` on success.
const REPLY_SETUP_OK: &str = "OK";

/// Canister client authenticated as a single signer.
pub struct IcGateway {
	agent: Agent,
	canister_id: Principal,
	sender: Principal,
	fetch_root_key: bool,
	root_key: OnceCell<()>,
}

impl IcGateway {
	pub fn new(
		url: &str,
		canister_id: Principal,
		identity: &SignerIdentity,
		fetch_root_key: bool,
	) -> Result<Self, GatewayError> {
		let agent = Agent::builder()
			.with_url(url)
			.with_identity(Secp256k1Identity::from_private_key(
				identity.secret_key().clone(),
			))
			.build()
			.map_err(|e| GatewayError::Configuration(format!("Failed to build agent: {}", e)))?;

		Ok(Self {
			agent,
			canister_id,
			sender: identity.principal(),
			fetch_root_key,
			root_key: OnceCell::new(),
		})
	}

	/// Fetches the replica root key once, before the first call that needs it.
	/// Only local replicas require this.
	async fn ensure_root_key(&self) -> Result<(), GatewayError> {
		if !self.fetch_root_key {
			return Ok(());
		}
		self.root_key
			.get_or_try_init(|| async {
				tracing::debug!(canister = %self.canister_id, "Fetching replica root key");
				self.agent
					.fetch_root_key()
					.await
					.map_err(|e| GatewayError::Transport(format!("Failed to fetch root key: {}", e)))
			})
			.await?;
		Ok(())
	}

	async fn update(&self, method: &str, args: Vec<u8>) -> Result<Vec<u8>, GatewayError> {
		self.ensure_root_key().await?;
		tracing::debug!(method, sender = %truncate_id(&self.sender.to_text()), "Calling canister");
		self.agent
			.update(&self.canister_id, method)
			.with_arg(args)
			.call_and_wait()
			.await
			.map_err(|e| GatewayError::Transport(format!("{} failed: {}", method, e)))
	}

	async fn query(&self, method: &str, args: Vec<u8>) -> Result<Vec<u8>, GatewayError> {
		self.ensure_root_key().await?;
		tracing::debug!(method, sender = %truncate_id(&self.sender.to_text()), "Querying canister");
		self.agent
			.query(&self.canister_id, method)
			.with_arg(args)
			.call()
			.await
			.map_err(|e| GatewayError::Transport(format!("{} failed: {}", method, e)))
	}

	/// Calls a method without arguments that replies `variant { Ok: text; Err: text }`.
	async fn update_text_result(&self, method: &str) -> Result<String, GatewayError> {
		let args = Encode!().map_err(|e| GatewayError::Decode(e.to_string()))?;
		let reply = self.update(method, args).await?;
		Decode!(&reply, Result<String, String>)
			.map_err(|e| GatewayError::Decode(format!("{} reply: {}", method, e)))?
			.map_err(GatewayError::Rejected)
	}
}

/// Maps the canister's `get_signature` reply onto a signature or `NotReady`.
fn interpret_signature_reply(
	message_id: &MessageId,
	reply: String,
) -> Result<String, GatewayError> {
	let trimmed = reply.trim();
	if trimmed == REPLY_NOT_SIGNED {
		return Err(GatewayError::NotReady {
			message_id: *message_id,
			state: MessageState::PartiallySigned,
		});
	}
	if trimmed.starts_with(REPLY_UNKNOWN_MESSAGE) {
		return Err(GatewayError::NotReady {
			message_id: *message_id,
			state: MessageState::Unsigned,
		});
	}
	Ok(reply)
}

/// Configuration schema for the Internet Computer gateway.
pub struct IcGatewaySchema;

impl IcGatewaySchema {
	/// Static validation method for use before instance creation
	pub fn validate_config(config: &toml::Value) -> Result<(), ValidationError> {
		let instance = Self;
		instance.validate(config)
	}
}

impl ConfigSchema for IcGatewaySchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![
				Field::new("url", FieldType::String).with_validator(|value| {
					match value.as_str() {
						Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
							Ok(())
						},
						_ => Err("url must start with http:// or https://".to_string()),
					}
				}),
				Field::new("canister_id", FieldType::String).with_validator(|value| {
					let text = value.as_str().unwrap_or_default();
					Principal::from_text(text)
						.map(|_| ())
						.map_err(|e| format!("not a principal: {}", e))
				}),
			],
			vec![Field::new("fetch_root_key", FieldType::Boolean)],
		);
		schema.validate(config)
	}
}

#[async_trait]
impl CanisterGateway for IcGateway {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(IcGatewaySchema)
	}

	fn sender(&self) -> Principal {
		self.sender
	}

	async fn setup(&self, quorum: &QuorumConfig) -> Result<(), GatewayError> {
		let args = Encode!(&quorum.signers().to_vec(), &quorum.threshold())
			.map_err(|e| GatewayError::Decode(e.to_string()))?;
		let reply = self.update("setup", args).await?;
		let text = Decode!(&reply, String)
			.map_err(|e| GatewayError::Decode(format!("setup reply: {}", e)))?;

		if text.trim() != REPLY_SETUP_OK {
			return Err(GatewayError::Rejected(text));
		}
		tracing::info!(
			canister = %self.canister_id,
			signers = quorum.signers().len(),
			threshold = quorum.threshold(),
			"Canister set up"
		);
		Ok(())
	}

	async fn create_or_sign_message(
		&self,
		intent: &TransferIntent,
	) -> Result<MessageId, GatewayError> {
		let args = Encode!(
			&intent.nonce(),
			&intent.chain_id(),
			&intent.token_address_hex(),
			&intent.to_address_hex(),
			&intent.amount_decimal()
		)
		.map_err(|e| GatewayError::Decode(e.to_string()))?;

		let reply = self.update("create_or_sign_evm_message", args).await?;
		let id_text = Decode!(&reply, Result<String, String>)
			.map_err(|e| GatewayError::Decode(format!("create_or_sign_evm_message reply: {}", e)))?
			.map_err(GatewayError::Rejected)?;

		id_text
			.parse()
			.map_err(|e| GatewayError::Decode(format!("{}", e)))
	}

	async fn get_signature(&self, message_id: &MessageId) -> Result<String, GatewayError> {
		let args =
			Encode!(&message_id.to_string()).map_err(|e| GatewayError::Decode(e.to_string()))?;
		let reply = self.query("get_signature", args).await?;
		let text = Decode!(&reply, String)
			.map_err(|e| GatewayError::Decode(format!("get_signature reply: {}", e)))?;
		interpret_signature_reply(message_id, text)
	}

	async fn public_key(&self) -> Result<String, GatewayError> {
		self.update_text_result("public_key").await
	}

	async fn evm_address(&self) -> Result<String, GatewayError> {
		self.update_text_result("evm_address").await
	}
}

/// Factory function to create Internet Computer gateways from configuration.
///
/// Configuration parameters:
/// - `url`: replica or boundary node URL
/// - `canister_id`: textual principal of the signing canister
/// - `fetch_root_key`: fetch the root key before the first call, needed for
///   local replicas (default true)
pub fn create_gateway(
	config: &toml::Value,
	identities: &[SignerIdentity],
) -> Result<Vec<Box<dyn CanisterGateway>>, GatewayError> {
	IcGatewaySchema::validate_config(config)
		.map_err(|e| GatewayError::Configuration(format!("Invalid configuration: {}", e)))?;

	let url = config
		.get("url")
		.and_then(|v| v.as_str())
		.ok_or_else(|| GatewayError::Configuration("url is required".into()))?;
	let canister_id = config
		.get("canister_id")
		.and_then(|v| v.as_str())
		.ok_or_else(|| GatewayError::Configuration("canister_id is required".into()))
		.and_then(|text| {
			Principal::from_text(text)
				.map_err(|e| GatewayError::Configuration(format!("Invalid canister_id: {}", e)))
		})?;
	let fetch_root_key = config
		.get("fetch_root_key")
		.and_then(|v| v.as_bool())
		.unwrap_or(true);

	identities
		.iter()
		.map(|identity| {
			IcGateway::new(url, canister_id, identity, fetch_root_key)
				.map(|gateway| Box::new(gateway) as Box<dyn CanisterGateway>)
		})
		.collect()
}

/// Registry for the Internet Computer gateway implementation.
pub struct Registry;

impl signer_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "ic";
	type Factory = crate::GatewayFactory;

	fn factory() -> Self::Factory {
		create_gateway
	}
}

impl crate::GatewayRegistry for Registry {}
