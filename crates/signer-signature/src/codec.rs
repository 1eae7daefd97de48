//! Conversion between the textual signature triple and the raw form.

use crate::ParseError;
use alloy_primitives::U256;
use once_cell::sync::Lazy;
use regex::Regex;
use signer_types::{
	without_0x_prefix, RawSignature, RecoveryConvention, SignatureComponents, RAW_SIGNATURE_LEN,
};

/// Parity, then `r`, then `s`, tolerant to whitespace and to missing commas.
const SIGNATURE_PATTERN: &str =
	r"v:\s*Parity\(\s*(true|false)\s*\)\s*,?\s*r:\s*([0-9]+)\s*,?\s*s:\s*([0-9]+)";

static SIGNATURE_RE: Lazy<Result<Regex, regex::Error>> =
	Lazy::new(|| Regex::new(SIGNATURE_PATTERN));

/// Parses a textual signature such as
/// `Signature { v: Parity(true), r: 1234, s: 5678 }`.
///
/// Surrounding text is ignored; only the three fields matter.
///
/// # Errors
///
/// Returns [`ParseError::Format`] if the triple is not present and
/// [`ParseError::InvalidInteger`] if `r` or `s` does not fit in 256 bits.
pub fn decode(text: &str) -> Result<SignatureComponents, ParseError> {
	let re = SIGNATURE_RE
		.as_ref()
		.map_err(|e| ParseError::Format(format!("Invalid signature pattern: {}", e)))?;

	let captures = re.captures(text).ok_or_else(|| {
		ParseError::Format(format!(
			"expected 'v: Parity(<bool>), r: <decimal>, s: <decimal>' in '{}'",
			text
		))
	})?;

	let parity = &captures[1] == "true";
	let r = parse_scalar("r", &captures[2])?;
	let s = parse_scalar("s", &captures[3])?;

	Ok(SignatureComponents::new(parity, r, s))
}

fn parse_scalar(field: &'static str, literal: &str) -> Result<U256, ParseError> {
	U256::from_str_radix(literal, 10).map_err(|e| ParseError::InvalidInteger {
		field,
		value: literal.to_string(),
		reason: e.to_string(),
	})
}

/// Assembles `r ‖ s ‖ v` with `r` and `s` left-padded to 32 bytes each and
/// the recovery byte chosen by `convention`.
pub fn encode(components: &SignatureComponents, convention: RecoveryConvention) -> RawSignature {
	let mut bytes = [0u8; RAW_SIGNATURE_LEN];
	bytes[..32].copy_from_slice(&components.r.to_be_bytes::<32>());
	bytes[32..64].copy_from_slice(&components.s.to_be_bytes::<32>());
	bytes[64] = convention.recovery_byte(components.parity);
	RawSignature::new(bytes, convention)
}

/// Splits a raw signature back into its components.
///
/// # Errors
///
/// Fails if the recovery byte is not valid under the signature's own
/// convention.
pub fn decode_raw(raw: &RawSignature) -> Result<SignatureComponents, ParseError> {
	let parity = raw
		.convention()
		.parity(raw.recovery_byte())
		.ok_or_else(|| {
			ParseError::RawSignature(format!(
				"recovery byte {} is not valid under the {} convention",
				raw.recovery_byte(),
				raw.convention()
			))
		})?;

	Ok(SignatureComponents::new(
		parity,
		U256::from_be_slice(raw.r()),
		U256::from_be_slice(raw.s()),
	))
}

/// Parses a hex-encoded 65-byte signature, with or without `0x`.
pub fn parse_raw_hex(
	text: &str,
	convention: RecoveryConvention,
) -> Result<RawSignature, ParseError> {
	let decoded = hex::decode(without_0x_prefix(text.trim()))
		.map_err(|e| ParseError::RawSignature(format!("invalid hex: {}", e)))?;

	let bytes: [u8; RAW_SIGNATURE_LEN] = decoded.as_slice().try_into().map_err(|_| {
		ParseError::RawSignature(format!(
			"expected {} bytes, got {}",
			RAW_SIGNATURE_LEN,
			decoded.len()
		))
	})?;

	let raw = RawSignature::new(bytes, convention);
	decode_raw(&raw)?;
	Ok(raw)
}
