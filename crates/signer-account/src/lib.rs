//! Signer identities for the quorum signer client.
//!
//! Each signer in a quorum is an independent secp256k1 keypair. The remote
//! canister identifies callers by their self-authenticating principal, which
//! is derived from the DER-encoded public key. Identities own no shared state
//! and can be cloned freely into per-signer tasks.

use candid::Principal;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::pkcs8::EncodePublicKey;
use k256::SecretKey;
use signer_types::{truncate_id, SecretString};
use std::fmt;
use thiserror::Error;

/// Errors that can occur while loading signer identities.
#[derive(Debug, Error)]
pub enum AccountError {
	/// The configured secret is not valid hex.
	#[error("Invalid key encoding: {0}")]
	InvalidEncoding(String),
	/// The bytes do not form a valid secp256k1 secret scalar.
	#[error("Invalid key: {0}")]
	InvalidKey(String),
	/// A key in a list failed to load.
	#[error("Signer key #{index}: {source}")]
	AtIndex {
		index: usize,
		#[source]
		source: Box<AccountError>,
	},
}

/// A secp256k1 keypair together with the principal it authenticates as.
#[derive(Clone)]
pub struct SignerIdentity {
	secret_key: SecretKey,
	public_key_der: Vec<u8>,
	principal: Principal,
}

impl SignerIdentity {
	/// Loads an identity from a hex-encoded 32-byte secret key.
	pub fn from_secret(secret: &SecretString) -> Result<Self, AccountError> {
		let bytes = secret
			.decode_hex()
			.map_err(|e| AccountError::InvalidEncoding(e.to_string()))?;
		let secret_key = SecretKey::from_slice(&bytes)
			.map_err(|_| AccountError::InvalidKey("not a valid secp256k1 secret key".into()))?;
		Self::from_secret_key(secret_key)
	}

	pub fn from_secret_key(secret_key: SecretKey) -> Result<Self, AccountError> {
		let public_key_der = secret_key
			.public_key()
			.to_public_key_der()
			.map_err(|e| AccountError::InvalidKey(e.to_string()))?
			.into_vec();
		let principal = Principal::self_authenticating(&public_key_der);

		tracing::debug!(signer = %truncate_id(&principal.to_text()), "Loaded signer identity");

		Ok(Self {
			secret_key,
			public_key_der,
			principal,
		})
	}

	/// Generates a fresh identity from the operating system RNG.
	pub fn random() -> Result<Self, AccountError> {
		Self::from_secret_key(SecretKey::random(&mut rand::rngs::OsRng))
	}

	/// Loads one identity per configured secret, preserving order.
	pub fn from_secrets(secrets: &[SecretString]) -> Result<Vec<Self>, AccountError> {
		secrets
			.iter()
			.enumerate()
			.map(|(index, secret)| {
				Self::from_secret(secret).map_err(|e| AccountError::AtIndex {
					index,
					source: Box::new(e),
				})
			})
			.collect()
	}

	/// The principal the remote canister sees as the caller.
	pub fn principal(&self) -> Principal {
		self.principal
	}

	pub fn secret_key(&self) -> &SecretKey {
		&self.secret_key
	}

	/// DER-encoded SubjectPublicKeyInfo of the public key.
	pub fn public_key_der(&self) -> &[u8] {
		&self.public_key_der
	}

	/// Hex of the compressed SEC1 public key.
	pub fn public_key_hex(&self) -> String {
		hex::encode(self.secret_key.public_key().to_encoded_point(true).as_bytes())
	}
}

impl fmt::Debug for SignerIdentity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SignerIdentity")
			.field("principal", &self.principal.to_text())
			.field("secret_key", &"***REDACTED***")
			.finish()
	}
}
