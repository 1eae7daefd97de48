//! Signature handling for quorum-produced ECDSA signatures.
//!
//! The remote signer reports its threshold signature as text. This crate
//! turns that text into [`SignatureComponents`](signer_types::SignatureComponents),
//! assembles the 65-byte raw form, and checks the result against an expected
//! Ethereum address using the personal-message hashing convention.
//!
//! Everything here is pure: no I/O, no shared state, safe to call from any
//! number of tasks at once.

use thiserror::Error;

/// Textual and raw signature encoding.
pub mod codec;
/// Public key recovery and address verification.
pub mod recovery;

pub use codec::{decode, decode_raw, encode, parse_raw_hex};
pub use recovery::{
	address_from_public_key_hex, ensure_signed_by, personal_message_digest,
	public_key_to_address, recover_address, recover_public_key, verify,
	PERSONAL_MESSAGE_PREFIX,
};

/// Errors raised while decoding a signature.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
	/// The text does not contain the `v: Parity(..), r: .., s: ..` triple.
	#[error("Signature text does not match the expected format: {0}")]
	Format(String),
	/// `r` or `s` is not a base-10 integer below 2^256.
	#[error("Invalid {field} value '{value}': {reason}")]
	InvalidInteger {
		field: &'static str,
		value: String,
		reason: String,
	},
	/// A raw signature has the wrong length, bad hex or a recovery byte
	/// foreign to its convention.
	#[error("Invalid raw signature: {0}")]
	RawSignature(String),
}

/// Errors raised while recovering or verifying a signer address.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerificationError {
	/// `r`, `s` or the recovery byte do not describe a recoverable signature.
	#[error("Malformed signature: {0}")]
	MalformedSignature(String),
	/// The expected address is not 20 bytes of hex.
	#[error("Invalid address '{0}'")]
	InvalidAddress(String),
	/// A public key could not be decoded as a SEC1 secp256k1 point.
	#[error("Invalid public key: {0}")]
	InvalidPublicKey(String),
	/// The signature is valid but was produced by a different key.
	#[error("Signature recovers to {recovered}, expected {expected}")]
	AddressMismatch { expected: String, recovered: String },
}
