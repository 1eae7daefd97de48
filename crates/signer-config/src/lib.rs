//! Configuration for the quorum signer client.
//!
//! A configuration file names the signing session, lists the secret keys of
//! the signer identities taking part in it, and selects the canister gateway
//! implementation to reach the remote signer through:
//!
//! ```toml
//! [session]
//! id = "local-quorum"
//! threshold = 2
//!
//! [signers]
//! keys = ["${SIGNER_KEY_1}", "${SIGNER_KEY_2}", "${SIGNER_KEY_3}"]
//!
//! [gateway]
//! primary = "memory"
//! [gateway.implementations.memory]
//! ```
//!
//! `${VAR}` and `${VAR:-default}` references are resolved from the
//! environment before parsing. A file may pull top-level sections from other
//! files with `include = ["keys.toml"]`, which keeps signer keys out of the
//! main file.

mod loader;

use regex::Regex;
use serde::{Deserialize, Serialize};
use signer_types::{RecoveryConvention, SecretString};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		ConfigError::Parse(err.message().to_string())
	}
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	pub session: SessionConfig,
	pub signers: SignersConfig,
	pub gateway: GatewayConfig,
}

/// The signing session and how long to wait for its quorum.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
	/// Name used in logs.
	pub id: String,
	/// Number of distinct signers the canister requires before signing.
	pub threshold: u32,
	/// Delay between two signature reads while waiting.
	#[serde(default = "default_poll_interval_ms")]
	pub poll_interval_ms: u64,
	/// Overall deadline for a signature to become available.
	#[serde(default = "default_timeout_seconds")]
	pub timeout_seconds: u64,
	/// Recovery byte convention of assembled raw signatures.
	#[serde(default)]
	pub convention: RecoveryConvention,
}

fn default_poll_interval_ms() -> u64 {
	500
}

fn default_timeout_seconds() -> u64 {
	120
}

/// Secret keys of the signer identities, one per quorum member.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SignersConfig {
	pub keys: Vec<SecretString>,
}

/// Gateway selection and per-implementation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
	/// Key of the implementation to use.
	pub primary: String,
	/// Raw tables, validated by each implementation's own schema.
	pub implementations: HashMap<String, toml::Value>,
}

impl GatewayConfig {
	/// The table of the primary implementation.
	pub fn primary_config(&self) -> Option<&toml::Value> {
		self.implementations.get(&self.primary)
	}
}

/// Upper bound on the size of a configuration file.
const MAX_CONFIG_SIZE: usize = 1024 * 1024;

/// Variable name, then an optional default after `:-`.
const ENV_VAR_PATTERN: &str = r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}";

/// Replaces `${VAR}` and `${VAR:-default}` with values from the environment.
///
/// Every unset variable without a default is reported at once.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	if input.len() > MAX_CONFIG_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_CONFIG_SIZE
		)));
	}

	let re = Regex::new(ENV_VAR_PATTERN)
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut missing = Vec::new();
	let resolved = re.replace_all(input, |caps: &regex::Captures| {
		match (std::env::var(&caps[1]), caps.get(2)) {
			(Ok(value), _) => value,
			(Err(_), Some(default)) => default.as_str().to_string(),
			(Err(_), None) => {
				missing.push(caps[1].to_string());
				String::new()
			},
		}
	});

	if !missing.is_empty() {
		return Err(ConfigError::Validation(format!(
			"Environment variable(s) not set: {}",
			missing.join(", ")
		)));
	}

	Ok(resolved.into_owned())
}

impl Config {
	/// Loads configuration from a file, following `include` directives.
	pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let base_dir = path
			.parent()
			.filter(|p| !p.as_os_str().is_empty())
			.unwrap_or_else(|| Path::new("."));
		let file_name = path.file_name().ok_or_else(|| {
			ConfigError::Validation(format!("Invalid path: {}", path.display()))
		})?;

		let mut loader = loader::ConfigLoader::new(base_dir);
		loader.load_config(file_name).await
	}

	/// Delay between two signature reads.
	pub fn poll_interval(&self) -> std::time::Duration {
		std::time::Duration::from_millis(self.session.poll_interval_ms)
	}

	pub fn timeout(&self) -> std::time::Duration {
		std::time::Duration::from_secs(self.session.timeout_seconds)
	}

	/// Validates cross-field constraints:
	/// - the session id is not empty
	/// - there is at least one signer key, none is blank and none repeats
	/// - `1 <= threshold <= number of keys`
	/// - the primary gateway has an implementation table
	/// - the poll interval is positive and does not exceed the timeout
	fn validate(&self) -> Result<(), ConfigError> {
		if self.session.id.trim().is_empty() {
			return Err(ConfigError::Validation("Session ID cannot be empty".into()));
		}

		if self.signers.keys.is_empty() {
			return Err(ConfigError::Validation(
				"At least one signer key must be configured".into(),
			));
		}
		if let Some(index) = self.signers.keys.iter().position(SecretString::is_empty) {
			return Err(ConfigError::Validation(format!(
				"Signer key #{} is empty",
				index
			)));
		}
		let decoded: Vec<_> = self.signers.keys.iter().map(SecretString::decode_hex).collect();
		for (index, key) in decoded.iter().enumerate() {
			let Ok(key) = key else { continue };
			if let Some(first) = decoded[..index]
				.iter()
				.position(|other| other.as_ref().ok() == Some(key))
			{
				return Err(ConfigError::Validation(format!(
					"Signer key #{} repeats key #{}",
					index, first
				)));
			}
		}

		let threshold = self.session.threshold;
		if threshold == 0 {
			return Err(ConfigError::Validation("Threshold must be at least 1".into()));
		}
		if threshold as usize > self.signers.keys.len() {
			return Err(ConfigError::Validation(format!(
				"Threshold {} exceeds the number of signer keys ({})",
				threshold,
				self.signers.keys.len()
			)));
		}

		if self.gateway.implementations.is_empty() {
			return Err(ConfigError::Validation(
				"At least one gateway implementation must be configured".into(),
			));
		}
		if self.gateway.primary_config().is_none() {
			return Err(ConfigError::Validation(format!(
				"Primary gateway '{}' not found in implementations",
				self.gateway.primary
			)));
		}

		if self.session.poll_interval_ms == 0 {
			return Err(ConfigError::Validation(
				"poll_interval_ms must be greater than 0".into(),
			));
		}
		if self.poll_interval() > self.timeout() {
			return Err(ConfigError::Validation(format!(
				"poll_interval_ms ({}) exceeds timeout_seconds ({})",
				self.session.poll_interval_ms, self.session.timeout_seconds
			)));
		}

		Ok(())
	}
}

/// Parses a configuration string, resolving environment variables and
/// validating the result.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const KEY_1: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

	fn config_with(session: &str, keys: usize, gateway: &str) -> String {
		let keys = (0..keys)
			.map(|i| match i {
				0 => format!("\"{}\"", KEY_1),
				_ => format!("\"0x{:064x}\"", i),
			})
			.collect::<Vec<_>>()
			.join(", ");
		format!(
			"[session]\n{}\n\n[signers]\nkeys = [{}]\n\n{}\n",
			session, keys, gateway
		)
	}

	const MEMORY_GATEWAY: &str = "[gateway]\nprimary = \"memory\"\n[gateway.implementations.memory]\n";

	#[test]
	fn test_env_var_resolution() {
		std::env::set_var("SIGNER_CONFIG_TEST_HOST", "localhost");
		std::env::set_var("SIGNER_CONFIG_TEST_PORT", "4943");

		let result =
			resolve_env_vars("url = \"http://${SIGNER_CONFIG_TEST_HOST}:${SIGNER_CONFIG_TEST_PORT}\"")
				.unwrap();
		assert_eq!(result, "url = \"http://localhost:4943\"");

		std::env::remove_var("SIGNER_CONFIG_TEST_HOST");
		std::env::remove_var("SIGNER_CONFIG_TEST_PORT");
	}

	#[test]
	fn test_env_var_with_default() {
		let result = resolve_env_vars("value = \"${SIGNER_CONFIG_MISSING:-fallback}\"").unwrap();
		assert_eq!(result, "value = \"fallback\"");
	}

	#[test]
	fn test_missing_env_vars_are_all_reported() {
		let err = resolve_env_vars("a = \"${SIGNER_CONFIG_NOPE_A}\"\nb = \"${SIGNER_CONFIG_NOPE_B}\"")
			.unwrap_err()
			.to_string();
		assert!(err.contains("SIGNER_CONFIG_NOPE_A"));
		assert!(err.contains("SIGNER_CONFIG_NOPE_B"));
	}

	#[test]
	fn test_parse_with_defaults() {
		let config: Config = config_with("id = \"q\"\nthreshold = 2", 3, MEMORY_GATEWAY)
			.parse()
			.unwrap();

		assert_eq!(config.session.id, "q");
		assert_eq!(config.session.poll_interval_ms, 500);
		assert_eq!(config.session.timeout_seconds, 120);
		assert_eq!(config.session.convention, RecoveryConvention::Offset27);
		assert_eq!(config.signers.keys.len(), 3);
		assert!(config.gateway.primary_config().is_some());
	}

	#[test]
	fn test_keys_from_env_are_redacted() {
		std::env::set_var("SIGNER_CONFIG_TEST_KEY", KEY_1);
		let text = "[session]\nid = \"q\"\nthreshold = 1\n\n[signers]\nkeys = [\"${SIGNER_CONFIG_TEST_KEY}\"]\n\n"
			.to_string() + MEMORY_GATEWAY;
		let config: Config = text.parse().unwrap();
		std::env::remove_var("SIGNER_CONFIG_TEST_KEY");

		assert!(config.signers.keys[0].with_exposed(|k| k == KEY_1));
		assert!(!format!("{:?}", config).contains("ac0974"));
	}

	#[test]
	fn test_convention_is_configurable() {
		let config: Config = config_with(
			"id = \"q\"\nthreshold = 1\nconvention = \"raw01\"",
			1,
			MEMORY_GATEWAY,
		)
		.parse()
		.unwrap();
		assert_eq!(config.session.convention, RecoveryConvention::Raw01);
	}

	#[test]
	fn test_validation_errors() {
		let cases = [
			config_with("id = \"\"\nthreshold = 1", 1, MEMORY_GATEWAY),
			config_with("id = \"q\"\nthreshold = 0", 1, MEMORY_GATEWAY),
			config_with("id = \"q\"\nthreshold = 3", 2, MEMORY_GATEWAY),
			config_with("id = \"q\"\nthreshold = 1", 0, MEMORY_GATEWAY),
			config_with(
				"id = \"q\"\nthreshold = 1",
				1,
				"[gateway]\nprimary = \"ic\"\n[gateway.implementations.memory]\n",
			),
			config_with("id = \"q\"\nthreshold = 1\npoll_interval_ms = 0", 1, MEMORY_GATEWAY),
			config_with(
				"id = \"q\"\nthreshold = 1\npoll_interval_ms = 5000\ntimeout_seconds = 1",
				1,
				MEMORY_GATEWAY,
			),
		];

		for text in cases {
			match text.parse::<Config>() {
				Err(ConfigError::Validation(_)) => {},
				other => panic!("expected validation error for\n{}\ngot {:?}", text, other),
			}
		}
	}

	#[test]
	fn test_repeated_key_rejected() {
		let text = format!(
			"[session]\nid = \"q\"\nthreshold = 2\n\n[signers]\nkeys = [\"{}\", \"0x{:064x}\", \"{}\"]\n\n{}",
			KEY_1,
			7,
			KEY_1.trim_start_matches("0x").to_uppercase(),
			MEMORY_GATEWAY
		);
		match text.parse::<Config>() {
			Err(ConfigError::Validation(msg)) => assert_eq!(msg, "Signer key #2 repeats key #0"),
			other => panic!("unexpected result: {:?}", other),
		}
	}

	#[test]
	fn test_malformed_toml() {
		match "[session\nid = 1".parse::<Config>() {
			Err(ConfigError::Parse(_)) => {},
			other => panic!("unexpected result: {:?}", other),
		}
	}
}
