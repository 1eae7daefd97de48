//! Builder pattern for constructing quorum sessions.
//!
//! Loads the configured signer identities, creates one gateway per identity
//! through the factory registered for the primary gateway implementation,
//! and assembles them into a [`QuorumSession`].

use crate::session::{PollPolicy, QuorumSession};
use signer_account::SignerIdentity;
use signer_config::Config;
use signer_gateway::{CanisterGateway, GatewayError};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during session construction.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Missing required component: {0}")]
	MissingComponent(String),
}

/// Builder for constructing a [`QuorumSession`] with a pluggable gateway.
pub struct SessionBuilder {
	config: Config,
}

impl SessionBuilder {
	pub fn new(config: Config) -> Self {
		Self { config }
	}

	/// Builds the session using the factory registered under the primary
	/// gateway name.
	pub fn build<F>(self, factories: &HashMap<String, F>) -> Result<QuorumSession, BuilderError>
	where
		F: Fn(&toml::Value, &[SignerIdentity]) -> Result<Vec<Box<dyn CanisterGateway>>, GatewayError>,
	{
		let identities = SignerIdentity::from_secrets(&self.config.signers.keys)
			.map_err(|e| BuilderError::Config(format!("Failed to load signer keys: {}", e)))?;

		let primary = &self.config.gateway.primary;
		let factory = factories.get(primary).ok_or_else(|| {
			BuilderError::MissingComponent(format!("No gateway implementation named '{}'", primary))
		})?;
		let gateway_config = self.config.gateway.primary_config().ok_or_else(|| {
			BuilderError::Config(format!(
				"Primary gateway '{}' has no configuration table",
				primary
			))
		})?;

		for name in self.config.gateway.implementations.keys() {
			if name != primary {
				tracing::debug!(component = "gateway", implementation = %name, "Skipping non-primary implementation");
			}
		}

		let clients = match factory(gateway_config, &identities) {
			Ok(clients) => clients,
			Err(e) => {
				tracing::error!(
					component = "gateway",
					implementation = %primary,
					error = %e,
					"Failed to create gateway implementation"
				);
				return Err(BuilderError::Config(format!(
					"Failed to create gateway implementation '{}': {}",
					primary, e
				)));
			},
		};
		if clients.len() != identities.len() {
			return Err(BuilderError::Config(format!(
				"Gateway '{}' created {} clients for {} signers",
				primary,
				clients.len(),
				identities.len()
			)));
		}
		tracing::info!(component = "gateway", implementation = %primary, clients = clients.len(), "Loaded");

		let session = QuorumSession::new(
			self.config.session.id.clone(),
			clients,
			self.config.session.threshold,
			self.config.session.convention,
		)
		.map_err(|e| BuilderError::Config(format!("Invalid session: {}", e)))?
		.with_poll_policy(PollPolicy::from_config(&self.config));

		Ok(session)
	}
}
