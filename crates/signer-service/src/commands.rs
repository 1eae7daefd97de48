//! Subcommand handlers. Each returns the JSON document printed on stdout.

use serde_json::{json, Value};
use signer_account::SignerIdentity;
use signer_config::Config;
use signer_core::QuorumSession;
use signer_signature::{decode, encode, recover_address};
use signer_types::{without_0x_prefix, MessageId, RecoveryConvention, TransferIntent};

type CommandResult = Result<Value, Box<dyn std::error::Error>>;

pub async fn setup(session: &QuorumSession) -> CommandResult {
	let quorum = session.setup().await?;
	Ok(json!({
		"session": session.id(),
		"signers": quorum.signers().iter().map(|p| p.to_text()).collect::<Vec<_>>(),
		"threshold": quorum.threshold(),
	}))
}

/// Submits through every signer. Without `wait` only the submission report
/// is returned.
pub async fn sign(session: &QuorumSession, intent: &TransferIntent, wait: bool) -> CommandResult {
	if wait {
		return Ok(serde_json::to_value(session.sign(intent).await?)?);
	}

	let report = session.submit_all(intent).await;
	let failures: Vec<Value> = report
		.failures()
		.map(|(signer, error)| json!({ "signer": signer.to_text(), "error": error.to_string() }))
		.collect();
	Ok(json!({
		"message_id": report.message_id,
		"accepted": report.accepted(),
		"threshold": session.threshold(),
		"failures": failures,
	}))
}

/// Reads the signature of `message_id`, optionally waiting for it.
pub async fn signature(session: &QuorumSession, message_id: &MessageId, wait: bool) -> CommandResult {
	let result = if wait {
		session
			.wait_for_signature(message_id, &session.poll_policy())
			.await
	} else {
		session.fetch_signature(message_id).await
	};

	let components = match result {
		Ok(components) => components,
		Err(e) if e.is_not_ready() => {
			return Ok(json!({
				"message_id": message_id,
				"ready": false,
				"reason": e.to_string(),
			}));
		},
		Err(e) => return Err(e.into()),
	};

	let raw = encode(&components, session.convention());
	let recovered = recover_address(message_id.digest().as_slice(), &raw)?;
	Ok(json!({
		"message_id": message_id,
		"ready": true,
		"signature": components.to_string(),
		"raw_signature": raw.to_hex(),
		"convention": session.convention(),
		"signer_address": recovered.to_checksum(None),
	}))
}

pub async fn address(session: &QuorumSession) -> CommandResult {
	Ok(json!({
		"public_key": session.canister_public_key().await?,
		"evm_address": session.canister_address().await?,
	}))
}

/// Principals and public keys of the configured signer keys. Makes no
/// remote call.
pub fn identities(config: &Config) -> CommandResult {
	let identities = SignerIdentity::from_secrets(&config.signers.keys)?;
	Ok(Value::Array(
		identities
			.iter()
			.enumerate()
			.map(|(index, identity)| {
				json!({
					"index": index,
					"principal": identity.principal().to_text(),
					"public_key": identity.public_key_hex(),
				})
			})
			.collect(),
	))
}

/// Checks a textual signature over hex `message` against `address` offline.
pub fn verify(
	address: &str,
	message: &str,
	signature: &str,
	convention: RecoveryConvention,
) -> CommandResult {
	let message = hex::decode(without_0x_prefix(message.trim()))?;
	let components = decode(signature)?;
	let raw = encode(&components, convention);
	let valid = signer_signature::verify(address, &message, &raw)?;
	let recovered = recover_address(&message, &raw)?;

	Ok(json!({
		"valid": valid,
		"expected": address,
		"recovered": recovered.to_checksum(None),
		"raw_signature": raw.to_hex(),
	}))
}
