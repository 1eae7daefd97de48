//! Quorum membership as established by the one-time `setup` call.

use candid::Principal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised when a quorum definition is inconsistent.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuorumError {
	#[error("A quorum needs at least one signer")]
	NoSigners,
	#[error("Threshold must be at least 1")]
	ZeroThreshold,
	#[error("Threshold {threshold} exceeds the number of signers ({signers})")]
	ThresholdTooHigh { threshold: u32, signers: usize },
}

/// Signer membership and the number of distinct signers required.
///
/// Signers form an ordered set: duplicates are dropped while keeping the
/// position of their first occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumConfig {
	signers: Vec<Principal>,
	threshold: u32,
}

impl QuorumConfig {
	pub fn new(signers: Vec<Principal>, threshold: u32) -> Result<Self, QuorumError> {
		let mut unique = Vec::with_capacity(signers.len());
		for signer in signers {
			if !unique.contains(&signer) {
				unique.push(signer);
			}
		}

		if unique.is_empty() {
			return Err(QuorumError::NoSigners);
		}
		if threshold == 0 {
			return Err(QuorumError::ZeroThreshold);
		}
		if threshold as usize > unique.len() {
			return Err(QuorumError::ThresholdTooHigh {
				threshold,
				signers: unique.len(),
			});
		}

		Ok(Self {
			signers: unique,
			threshold,
		})
	}

	pub fn signers(&self) -> &[Principal] {
		&self.signers
	}

	pub fn threshold(&self) -> u32 {
		self.threshold
	}

	pub fn contains(&self, signer: &Principal) -> bool {
		self.signers.contains(signer)
	}
}

/// Why a signature is not available yet, as far as a client can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageState {
	/// No signer has submitted the message.
	Unsigned,
	/// Some signers submitted it but the threshold has not been reached.
	PartiallySigned,
}

impl fmt::Display for MessageState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			MessageState::Unsigned => write!(f, "unsigned"),
			MessageState::PartiallySigned => write!(f, "partially signed"),
		}
	}
}
