//! Registry trait for self-registering implementations.

/// Base trait for implementation registries.
///
/// Every pluggable implementation module (for example each canister gateway)
/// exposes a `Registry` unit struct implementing this trait, so that the
/// binary can collect implementations by the name used in configuration.
pub trait ImplementationRegistry {
	/// The key of the implementation table in the configuration file, e.g.
	/// `"memory"` for `[gateway.implementations.memory]`.
	const NAME: &'static str;

	/// Factory function type for the implementation family.
	type Factory;

	/// Returns the factory function that builds this implementation.
	fn factory() -> Self::Factory;
}
