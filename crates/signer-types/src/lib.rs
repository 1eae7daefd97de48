//! Common types for the quorum signer client.
//!
//! This crate defines the data model shared by every other crate in the
//! workspace: transfer intents and their message identifiers, ECDSA signature
//! components and their raw 65-byte form, quorum membership, and the
//! configuration validation primitives used by pluggable gateway
//! implementations.

/// Transfer intents and the deterministic message identifiers derived from them.
pub mod intent;
/// Quorum membership and the client-observable state of a pending message.
pub mod quorum;
/// Self-registration trait for pluggable implementations.
pub mod registry;
/// Redacting wrapper for secret key material.
pub mod secret_string;
/// Signature components, raw signatures and the recovery-id convention.
pub mod signature;
/// Hex and display helpers.
pub mod utils;
/// Configuration validation types for implementation-specific TOML tables.
pub mod validation;

pub use candid::Principal;
pub use intent::{IntentError, MessageId, TransferIntent};
pub use quorum::{MessageState, QuorumConfig, QuorumError};
pub use registry::ImplementationRegistry;
pub use secret_string::SecretString;
pub use signature::{RawSignature, RecoveryConvention, SignatureComponents, RAW_SIGNATURE_LEN};
pub use utils::{truncate_id, with_0x_prefix, without_0x_prefix};
pub use validation::*;
