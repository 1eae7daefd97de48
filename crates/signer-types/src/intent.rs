//! Transfer intents submitted to the signing quorum.
//!
//! Independent signer clients never exchange message identifiers with each
//! other. Each client derives the identifier from the intent content itself,
//! so the packed encoding defined here must be byte-identical for every
//! client submitting the same transfer.

use crate::utils::without_0x_prefix;
use alloy_primitives::{keccak256, Address, B256, U256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length in bytes of the packed intent encoding.
pub const PACKED_INTENT_LEN: usize = 16 + 16 + 20 + 20 + 32;

/// Errors raised while constructing an intent or parsing a message identifier.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntentError {
	/// An address field is not 20 bytes of hex.
	#[error("Invalid {field} '{value}': {reason}")]
	InvalidAddress {
		field: &'static str,
		value: String,
		reason: String,
	},
	/// The amount is not a non-negative decimal integer below 2^256.
	#[error("Invalid amount '{value}': {reason}")]
	InvalidAmount { value: String, reason: String },
	/// A message identifier is not 32 bytes of hex.
	#[error("Invalid message id '{0}'")]
	InvalidMessageId(String),
}

/// An ERC-20 style transfer that the quorum is asked to sign.
///
/// Intents are immutable once constructed. Addresses and the amount are
/// parsed eagerly so that two intents built from differently formatted but
/// equivalent inputs (checksum casing, leading zeros in the amount) encode
/// to the same bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferIntent {
	nonce: u64,
	chain_id: u64,
	token_address: Address,
	to_address: Address,
	amount: U256,
}

impl TransferIntent {
	/// Builds an intent from the textual form used on the wire.
	pub fn new(
		nonce: u64,
		chain_id: u64,
		token_address: &str,
		to_address: &str,
		amount: &str,
	) -> Result<Self, IntentError> {
		Ok(Self {
			nonce,
			chain_id,
			token_address: parse_address("token address", token_address)?,
			to_address: parse_address("destination address", to_address)?,
			amount: parse_amount(amount)?,
		})
	}

	pub fn nonce(&self) -> u64 {
		self.nonce
	}

	pub fn chain_id(&self) -> u64 {
		self.chain_id
	}

	pub fn token_address(&self) -> Address {
		self.token_address
	}

	pub fn to_address(&self) -> Address {
		self.to_address
	}

	pub fn amount(&self) -> U256 {
		self.amount
	}

	/// Token address as lowercase `0x`-prefixed hex, the form sent to the gateway.
	pub fn token_address_hex(&self) -> String {
		format!("0x{}", hex::encode(self.token_address.as_slice()))
	}

	/// Destination address as lowercase `0x`-prefixed hex.
	pub fn to_address_hex(&self) -> String {
		format!("0x{}", hex::encode(self.to_address.as_slice()))
	}

	/// Amount as a canonical decimal string without leading zeros.
	pub fn amount_decimal(&self) -> String {
		self.amount.to_string()
	}

	/// Packed encoding: nonce (16 bytes BE) ‖ chain id (16 bytes BE) ‖
	/// token (20) ‖ destination (20) ‖ amount (32 bytes BE).
	pub fn encode_packed(&self) -> Vec<u8> {
		let mut encoded = Vec::with_capacity(PACKED_INTENT_LEN);
		encoded.extend_from_slice(&u128::from(self.nonce).to_be_bytes());
		encoded.extend_from_slice(&u128::from(self.chain_id).to_be_bytes());
		encoded.extend_from_slice(self.token_address.as_slice());
		encoded.extend_from_slice(self.to_address.as_slice());
		encoded.extend_from_slice(&self.amount.to_be_bytes::<32>());
		encoded
	}

	/// Keccak-256 of the packed encoding. This is the payload the quorum signs.
	pub fn digest(&self) -> B256 {
		keccak256(self.encode_packed())
	}

	/// Identifier of the logical message this intent represents.
	pub fn message_id(&self) -> MessageId {
		MessageId::from_digest(&self.digest())
	}
}

fn parse_address(field: &'static str, value: &str) -> Result<Address, IntentError> {
	Address::from_str(value.trim()).map_err(|e| IntentError::InvalidAddress {
		field,
		value: value.to_string(),
		reason: e.to_string(),
	})
}

fn parse_amount(value: &str) -> Result<U256, IntentError> {
	let literal = value.trim();
	if literal.is_empty() || !literal.bytes().all(|b| b.is_ascii_digit()) {
		return Err(IntentError::InvalidAmount {
			value: value.to_string(),
			reason: "expected a non-negative decimal integer".to_string(),
		});
	}
	U256::from_str_radix(literal, 10).map_err(|e| IntentError::InvalidAmount {
		value: value.to_string(),
		reason: e.to_string(),
	})
}

/// Content-derived identifier of a logical message.
///
/// Displayed as lowercase hex of the intent digest without `0x`, which is the
/// exact form the remote signing service returns from `create_or_sign_message`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(B256);

impl MessageId {
	pub fn from_digest(digest: &B256) -> Self {
		Self(*digest)
	}

	/// The 32 digest bytes this identifier encodes.
	pub fn digest(&self) -> B256 {
		self.0
	}
}

impl FromStr for MessageId {
	type Err = IntentError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match hex::decode(without_0x_prefix(s.trim())) {
			Ok(bytes) if bytes.len() == 32 => Ok(Self(B256::from_slice(&bytes))),
			_ => Err(IntentError::InvalidMessageId(s.to_string())),
		}
	}
}

impl fmt::Display for MessageId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&hex::encode(self.0.as_slice()))
	}
}

impl Serialize for MessageId {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.collect_str(self)
	}
}

impl<'de> Deserialize<'de> for MessageId {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		s.parse().map_err(serde::de::Error::custom)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const TOKEN: &str = "0x000000000000000000000000000000000000beef";
	const TO: &str = "0x000000000000000000000000000000000000dead";

	#[test]
	fn test_packed_layout() {
		let intent = TransferIntent::new(1, 1, TOKEN, TO, "1").unwrap();
		let packed = intent.encode_packed();

		assert_eq!(packed.len(), PACKED_INTENT_LEN);
		// nonce and chain id are 16-byte big-endian words
		assert_eq!(packed[15], 1);
		assert!(packed[..15].iter().all(|b| *b == 0));
		assert_eq!(packed[31], 1);
		// token then destination
		assert_eq!(&packed[50..52], &[0xbe, 0xef]);
		assert_eq!(&packed[70..72], &[0xde, 0xad]);
		// amount is a left-padded 32-byte word
		assert_eq!(packed[103], 1);
		assert!(packed[72..103].iter().all(|b| *b == 0));
	}

	#[test]
	fn test_message_id_ignores_formatting() {
		let a = TransferIntent::new(7, 10, TOKEN, TO, "1000").unwrap();
		let b = TransferIntent::new(
			7,
			10,
			"000000000000000000000000000000000000BEEF",
			"0x000000000000000000000000000000000000DeaD",
			"0001000",
		)
		.unwrap();

		assert_eq!(a, b);
		assert_eq!(a.message_id(), b.message_id());
		assert_eq!(b.amount_decimal(), "1000");
		assert_eq!(b.token_address_hex(), TOKEN);
	}

	#[test]
	fn test_message_id_depends_on_every_field() {
		let base = TransferIntent::new(1, 1, TOKEN, TO, "1").unwrap();
		let variants = [
			TransferIntent::new(2, 1, TOKEN, TO, "1").unwrap(),
			TransferIntent::new(1, 2, TOKEN, TO, "1").unwrap(),
			TransferIntent::new(1, 1, TO, TOKEN, "1").unwrap(),
			TransferIntent::new(1, 1, TOKEN, TO, "2").unwrap(),
		];
		for variant in &variants {
			assert_ne!(base.message_id(), variant.message_id());
		}
	}

	#[test]
	fn test_message_id_round_trip() {
		let intent = TransferIntent::new(1, 1, TOKEN, TO, "1").unwrap();
		let id = intent.message_id();

		let text = id.to_string();
		assert_eq!(text.len(), 64);
		assert_eq!(text, text.to_lowercase());
		assert_eq!(id.digest(), intent.digest());

		let parsed: MessageId = format!("0x{}", text.to_uppercase()).parse().unwrap();
		assert_eq!(parsed, id);

		let json = serde_json::to_string(&id).unwrap();
		assert_eq!(json, format!("\"{}\"", text));
		assert_eq!(serde_json::from_str::<MessageId>(&json).unwrap(), id);
	}

	#[test]
	fn test_invalid_inputs_rejected() {
		assert!(matches!(
			TransferIntent::new(1, 1, "0x1234", TO, "1"),
			Err(IntentError::InvalidAddress { .. })
		));
		assert!(matches!(
			TransferIntent::new(1, 1, TOKEN, "not-hex", "1"),
			Err(IntentError::InvalidAddress { .. })
		));
		assert!(matches!(
			TransferIntent::new(1, 1, TOKEN, &format!("{}00", TO), "1"),
			Err(IntentError::InvalidAddress { field: "to", .. })
		));
		assert!(matches!(
			TransferIntent::new(1, 1, TOKEN, TO, "-1"),
			Err(IntentError::InvalidAmount { .. })
		));
		assert!(matches!(
			TransferIntent::new(1, 1, TOKEN, TO, ""),
			Err(IntentError::InvalidAmount { .. })
		));
		// 2^256 does not fit
		let too_large =
			"115792089237316195423570985008687907853269984665640564039457584007913129639936";
		assert!(matches!(
			TransferIntent::new(1, 1, TOKEN, TO, too_large),
			Err(IntentError::InvalidAmount { .. })
		));
		assert!("abcd".parse::<MessageId>().is_err());
	}
}
