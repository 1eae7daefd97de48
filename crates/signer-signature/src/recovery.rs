//! Signer address recovery under the Ethereum personal-message convention.

use crate::VerificationError;
use alloy_primitives::{keccak256, Address, B256};
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use signer_types::{without_0x_prefix, RawSignature};
use std::str::FromStr;

/// Prefix prepended to every message before hashing (EIP-191, version 0x45).
pub const PERSONAL_MESSAGE_PREFIX: &str = "\x19Ethereum Signed Message:\n";

/// Keccak-256 of `prefix ‖ decimal(len(message)) ‖ message`.
pub fn personal_message_digest(message: &[u8]) -> B256 {
	let length = message.len().to_string();
	let mut buf =
		Vec::with_capacity(PERSONAL_MESSAGE_PREFIX.len() + length.len() + message.len());
	buf.extend_from_slice(PERSONAL_MESSAGE_PREFIX.as_bytes());
	buf.extend_from_slice(length.as_bytes());
	buf.extend_from_slice(message);
	keccak256(&buf)
}

/// Recovers the public key that produced `raw` over a 32-byte digest.
///
/// High-s signatures are accepted: `s` is folded into the lower half of the
/// curve order and the recovery id flipped accordingly.
///
/// # Errors
///
/// [`VerificationError::MalformedSignature`] if the recovery byte is foreign
/// to the signature's convention, if `r` or `s` is zero or not below the
/// curve order, or if no curve point corresponds to `r`.
pub fn recover_public_key(
	digest: &B256,
	raw: &RawSignature,
) -> Result<VerifyingKey, VerificationError> {
	let parity = raw
		.convention()
		.parity(raw.recovery_byte())
		.ok_or_else(|| {
			VerificationError::MalformedSignature(format!(
				"recovery byte {} is not valid under the {} convention",
				raw.recovery_byte(),
				raw.convention()
			))
		})?;

	let signature = Signature::from_slice(&raw.as_bytes()[..64])
		.map_err(|e| VerificationError::MalformedSignature(format!("invalid r or s: {}", e)))?;

	let (signature, parity) = match signature.normalize_s() {
		Some(normalized) => (normalized, !parity),
		None => (signature, parity),
	};

	VerifyingKey::recover_from_prehash(
		digest.as_slice(),
		&signature,
		RecoveryId::new(parity, false),
	)
	.map_err(|e| VerificationError::MalformedSignature(format!("recovery failed: {}", e)))
}

/// Ethereum address of a public key: the last 20 bytes of the Keccak-256
/// hash of the uncompressed point without its format byte.
pub fn public_key_to_address(key: &VerifyingKey) -> Address {
	let point = key.to_encoded_point(false);
	let hash = keccak256(&point.as_bytes()[1..]);
	Address::from_slice(&hash[12..])
}

/// Derives the address of a hex-encoded SEC1 public key, compressed or not.
pub fn address_from_public_key_hex(public_key: &str) -> Result<Address, VerificationError> {
	let bytes = hex::decode(without_0x_prefix(public_key.trim()))
		.map_err(|e| VerificationError::InvalidPublicKey(e.to_string()))?;
	let key = VerifyingKey::from_sec1_bytes(&bytes)
		.map_err(|e| VerificationError::InvalidPublicKey(e.to_string()))?;
	Ok(public_key_to_address(&key))
}

/// Recovers the address that signed `message` under the personal-message
/// convention.
pub fn recover_address(message: &[u8], raw: &RawSignature) -> Result<Address, VerificationError> {
	let digest = personal_message_digest(message);
	let key = recover_public_key(&digest, raw)?;
	Ok(public_key_to_address(&key))
}

fn parse_address(expected: &str) -> Result<Address, VerificationError> {
	Address::from_str(expected.trim())
		.map_err(|_| VerificationError::InvalidAddress(expected.to_string()))
}

/// Checks whether `raw` over `message` was produced by `expected`.
///
/// The address comparison ignores letter case, so checksummed and plain
/// lowercase forms are equivalent.
///
/// # Errors
///
/// A malformed `expected` address is [`VerificationError::InvalidAddress`]
/// and an unrecoverable signature is
/// [`VerificationError::MalformedSignature`]; neither is reported as `false`.
pub fn verify(
	expected: &str,
	message: &[u8],
	raw: &RawSignature,
) -> Result<bool, VerificationError> {
	let expected = parse_address(expected)?;
	let recovered = recover_address(message, raw)?;
	Ok(recovered == expected)
}

/// Like [`verify`], but turns a mismatch into
/// [`VerificationError::AddressMismatch`].
pub fn ensure_signed_by(
	expected: &str,
	message: &[u8],
	raw: &RawSignature,
) -> Result<Address, VerificationError> {
	let expected_address = parse_address(expected)?;
	let recovered = recover_address(message, raw)?;
	if recovered != expected_address {
		return Err(VerificationError::AddressMismatch {
			expected: expected_address.to_checksum(None),
			recovered: recovered.to_checksum(None),
		});
	}
	Ok(recovered)
}
