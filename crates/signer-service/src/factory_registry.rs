//! Registry of gateway factories known to the binary.
//!
//! Every implementation exported by `signer-gateway` registers itself here,
//! so the configuration can select one by name.

use once_cell::sync::Lazy;
use signer_config::Config;
use signer_core::{QuorumSession, SessionBuilder};
use signer_gateway::GatewayFactory;
use std::collections::HashMap;

/// Gateway factories by implementation name.
pub struct FactoryRegistry {
	pub gateway: HashMap<String, GatewayFactory>,
}

impl FactoryRegistry {
	pub fn new() -> Self {
		Self {
			gateway: HashMap::new(),
		}
	}

	pub fn register_gateway(&mut self, name: impl Into<String>, factory: GatewayFactory) {
		self.gateway.insert(name.into(), factory);
	}

	fn with_all_implementations() -> Self {
		let mut registry = Self::new();
		for (name, factory) in signer_gateway::get_all_implementations() {
			tracing::debug!("Registering gateway implementation: {}", name);
			registry.register_gateway(name, factory);
		}
		registry
	}

	/// Sorted names of the registered implementations.
	pub fn available(&self) -> Vec<String> {
		let mut names: Vec<String> = self.gateway.keys().cloned().collect();
		names.sort();
		names
	}
}

impl Default for FactoryRegistry {
	fn default() -> Self {
		Self::new()
	}
}

static REGISTRY: Lazy<FactoryRegistry> = Lazy::new(FactoryRegistry::with_all_implementations);

pub fn get_registry() -> &'static FactoryRegistry {
	&REGISTRY
}

/// Builds a session, rejecting gateway names no implementation provides.
pub fn build_session_from_config(
	config: Config,
) -> Result<QuorumSession, Box<dyn std::error::Error>> {
	let registry = get_registry();

	for name in config.gateway.implementations.keys() {
		if !registry.gateway.contains_key(name) {
			return Err(format!(
				"Unknown gateway implementation '{}'. Available: [{}]",
				name,
				registry.available().join(", ")
			)
			.into());
		}
	}

	Ok(SessionBuilder::new(config).build(&registry.gateway)?)
}
