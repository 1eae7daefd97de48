//! ECDSA signature representations.
//!
//! A secp256k1 signature travels in three shapes:
//! - the textual triple emitted by the remote signer,
//!   `Signature { v: Parity(true), r: <decimal>, s: <decimal> }`;
//! - [`SignatureComponents`], the parsed `(parity, r, s)` triple;
//! - [`RawSignature`], the 65-byte `r ‖ s ‖ v` wire form.
//!
//! The meaning of the trailing recovery byte is carried explicitly by
//! [`RecoveryConvention`] so that encoding and recovery cannot disagree.

use crate::utils::with_0x_prefix;
use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Length of the raw `r ‖ s ‖ v` signature.
pub const RAW_SIGNATURE_LEN: usize = 65;

/// Meaning of the recovery byte at offset 64 of a raw signature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryConvention {
	/// Ethereum convention: 27 for even y, 28 for odd y.
	#[default]
	Offset27,
	/// Bare recovery id: 0 for even y, 1 for odd y.
	Raw01,
}

impl RecoveryConvention {
	/// Value added to the recovery id under [`RecoveryConvention::Offset27`].
	pub const ETHEREUM_OFFSET: u8 = 27;

	fn offset(self) -> u8 {
		match self {
			RecoveryConvention::Offset27 => Self::ETHEREUM_OFFSET,
			RecoveryConvention::Raw01 => 0,
		}
	}

	/// Recovery byte written for the given y parity.
	pub fn recovery_byte(self, parity: bool) -> u8 {
		self.offset() + u8::from(parity)
	}

	/// Parity encoded by a recovery byte, or `None` if the byte is not valid
	/// under this convention.
	pub fn parity(self, recovery_byte: u8) -> Option<bool> {
		match recovery_byte.checked_sub(self.offset()) {
			Some(0) => Some(false),
			Some(1) => Some(true),
			_ => None,
		}
	}
}

impl fmt::Display for RecoveryConvention {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RecoveryConvention::Offset27 => write!(f, "offset27"),
			RecoveryConvention::Raw01 => write!(f, "raw01"),
		}
	}
}

impl FromStr for RecoveryConvention {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"offset27" => Ok(RecoveryConvention::Offset27),
			"raw01" => Ok(RecoveryConvention::Raw01),
			other => Err(format!(
				"Unknown recovery convention '{}', expected 'offset27' or 'raw01'",
				other
			)),
		}
	}
}

/// Parsed `(parity, r, s)` triple of a secp256k1 ECDSA signature.
///
/// `r` and `s` are 256-bit integers by construction. Whether they are valid
/// curve scalars is only decided at recovery time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignatureComponents {
	/// y parity of the ephemeral point R; `true` means odd.
	pub parity: bool,
	pub r: U256,
	pub s: U256,
}

impl SignatureComponents {
	pub fn new(parity: bool, r: U256, s: U256) -> Self {
		Self { parity, r, s }
	}

	/// Bare recovery id, 0 or 1.
	pub fn recovery_id(&self) -> u8 {
		u8::from(self.parity)
	}
}

/// Formats the components in the textual shape emitted by the remote signer.
impl fmt::Display for SignatureComponents {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"Signature {{ v: Parity({}), r: {}, s: {} }}",
			self.parity, self.r, self.s
		)
	}
}

/// The 65-byte `r ‖ s ‖ v` signature together with the convention its
/// recovery byte follows.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawSignature {
	bytes: [u8; RAW_SIGNATURE_LEN],
	convention: RecoveryConvention,
}

impl RawSignature {
	pub fn new(bytes: [u8; RAW_SIGNATURE_LEN], convention: RecoveryConvention) -> Self {
		Self { bytes, convention }
	}

	pub fn as_bytes(&self) -> &[u8; RAW_SIGNATURE_LEN] {
		&self.bytes
	}

	pub fn convention(&self) -> RecoveryConvention {
		self.convention
	}

	/// Big-endian `r`, left-padded to 32 bytes.
	pub fn r(&self) -> &[u8] {
		&self.bytes[..32]
	}

	/// Big-endian `s`, left-padded to 32 bytes.
	pub fn s(&self) -> &[u8] {
		&self.bytes[32..64]
	}

	pub fn recovery_byte(&self) -> u8 {
		self.bytes[64]
	}

	/// `0x`-prefixed lowercase hex of all 65 bytes.
	pub fn to_hex(&self) -> String {
		with_0x_prefix(&hex::encode(self.bytes))
	}
}

impl fmt::Debug for RawSignature {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RawSignature")
			.field("bytes", &self.to_hex())
			.field("convention", &self.convention)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_recovery_bytes() {
		assert_eq!(RecoveryConvention::Offset27.recovery_byte(false), 27);
		assert_eq!(RecoveryConvention::Offset27.recovery_byte(true), 28);
		assert_eq!(RecoveryConvention::Raw01.recovery_byte(false), 0);
		assert_eq!(RecoveryConvention::Raw01.recovery_byte(true), 1);
	}

	#[test]
	fn test_parity_rejects_foreign_bytes() {
		assert_eq!(RecoveryConvention::Offset27.parity(28), Some(true));
		assert_eq!(RecoveryConvention::Offset27.parity(1), None);
		assert_eq!(RecoveryConvention::Offset27.parity(29), None);
		assert_eq!(RecoveryConvention::Raw01.parity(0), Some(false));
		assert_eq!(RecoveryConvention::Raw01.parity(27), None);
	}

	#[test]
	fn test_convention_from_str() {
		assert_eq!(
			"Offset27".parse::<RecoveryConvention>(),
			Ok(RecoveryConvention::Offset27)
		);
		assert_eq!(
			"raw01".parse::<RecoveryConvention>(),
			Ok(RecoveryConvention::Raw01)
		);
		assert!("eip155".parse::<RecoveryConvention>().is_err());
	}

	#[test]
	fn test_components_text() {
		let components = SignatureComponents::new(true, U256::from(12u64), U256::from(345u64));
		assert_eq!(
			components.to_string(),
			"Signature { v: Parity(true), r: 12, s: 345 }"
		);
		assert_eq!(components.recovery_id(), 1);
	}

	#[test]
	fn test_raw_accessors() {
		let mut bytes = [0u8; RAW_SIGNATURE_LEN];
		bytes[31] = 0x0a;
		bytes[63] = 0x0b;
		bytes[64] = 27;
		let raw = RawSignature::new(bytes, RecoveryConvention::Offset27);

		assert_eq!(raw.r()[31], 0x0a);
		assert_eq!(raw.s()[31], 0x0b);
		assert_eq!(raw.recovery_byte(), 27);
		assert_eq!(raw.to_hex().len(), 2 + 130);
		assert!(raw.to_hex().ends_with("1b"));
	}
}
