//! Main entry point for the quorum signer client.
//!
//! Loads a configuration with N signer keys, connects one client per key to
//! the signing canister and runs a single operation. Results are printed as
//! JSON on stdout; logs go to stderr.

use clap::{Parser, Subcommand};
use signer_config::Config;
use signer_core::QuorumSession;
use signer_types::{MessageId, RecoveryConvention, TransferIntent};
use std::path::{Path, PathBuf};

mod commands;
mod factory_registry;

/// Command-line arguments for the quorum signer.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml", global = true)]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info", global = true)]
	log_level: String,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Establish the configured signers and threshold on the canister
	Setup,
	/// Submit a transfer intent through every signer
	Sign {
		#[arg(long)]
		nonce: u64,
		#[arg(long)]
		chain_id: u64,
		/// Token contract address
		#[arg(long)]
		token: String,
		/// Destination address
		#[arg(long)]
		to: String,
		/// Decimal amount in base units
		#[arg(long)]
		amount: String,
		/// Establish the quorum first
		#[arg(long)]
		setup: bool,
		/// Return after submitting instead of waiting for the signature
		#[arg(long)]
		no_wait: bool,
	},
	/// Read the signature of a message
	Signature {
		/// Hex message identifier returned by `sign`
		message_id: MessageId,
		/// Poll until the signature is available
		#[arg(long)]
		wait: bool,
	},
	/// Show the canister's public key and Ethereum address
	Address,
	/// Show the principal of every configured signer key
	Identities,
	/// Check a signature against an address without contacting the canister
	Verify {
		#[arg(long)]
		address: String,
		/// Hex-encoded signed message
		#[arg(long)]
		message: String,
		/// Textual signature, e.g. "v: Parity(true), r: ..., s: ..."
		#[arg(long)]
		signature: String,
		/// Recovery byte convention: offset27 or raw01
		#[arg(long, default_value = "offset27")]
		convention: RecoveryConvention,
	},
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

	fmt()
		.with_env_filter(env_filter)
		.with_writer(std::io::stderr)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	let output = run(args).await?;
	println!("{}", serde_json::to_string_pretty(&output)?);
	Ok(())
}

async fn run(args: Args) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
	match args.command {
		Command::Verify {
			address,
			message,
			signature,
			convention,
		} => commands::verify(&address, &message, &signature, convention),
		Command::Identities => commands::identities(&load_config(&args.config).await?),
		Command::Setup => commands::setup(&load_session(&args.config).await?).await,
		Command::Sign {
			nonce,
			chain_id,
			token,
			to,
			amount,
			setup,
			no_wait,
		} => {
			let intent = TransferIntent::new(nonce, chain_id, &token, &to, &amount)?;
			let session = load_session(&args.config).await?;
			if setup {
				session.setup().await?;
			}
			commands::sign(&session, &intent, !no_wait).await
		},
		Command::Signature { message_id, wait } => {
			let session = load_session(&args.config).await?;
			commands::signature(&session, &message_id, wait).await
		},
		Command::Address => commands::address(&load_session(&args.config).await?).await,
	}
}

async fn load_config(path: &Path) -> Result<Config, Box<dyn std::error::Error>> {
	let config = Config::from_file(path).await?;
	tracing::info!("Loaded configuration [{}]", config.session.id);
	Ok(config)
}

async fn load_session(path: &Path) -> Result<QuorumSession, Box<dyn std::error::Error>> {
	factory_registry::build_session_from_config(load_config(path).await?)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use tempfile::TempDir;

	#[test]
	fn test_args_default_values() {
		let args = Args::try_parse_from(["quorum-signer", "setup"]).unwrap();
		assert_eq!(args.config, PathBuf::from("config.toml"));
		assert_eq!(args.log_level, "info");
		assert!(matches!(args.command, Command::Setup));
	}

	#[test]
	fn test_sign_args() {
		let args = Args::try_parse_from([
			"quorum-signer",
			"sign",
			"--nonce",
			"1",
			"--chain-id",
			"1",
			"--token",
			"0x000000000000000000000000000000000000beef",
			"--to",
			"0x000000000000000000000000000000000000dead",
			"--amount",
			"1",
			"--no-wait",
			"-c",
			"local.toml",
		])
		.unwrap();
		assert_eq!(args.config, PathBuf::from("local.toml"));
		match args.command {
			Command::Sign {
				nonce,
				chain_id,
				no_wait,
				setup,
				..
			} => {
				assert_eq!((nonce, chain_id), (1, 1));
				assert!(no_wait);
				assert!(!setup);
			},
			other => panic!("unexpected command: {:?}", other),
		}
	}

	#[test]
	fn test_invalid_message_id_is_rejected() {
		assert!(Args::try_parse_from(["quorum-signer", "signature", "abc"]).is_err());
	}

	#[test]
	fn test_verify_args() {
		let args = Args::try_parse_from([
			"quorum-signer",
			"verify",
			"--address",
			"0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266",
			"--message",
			"68656c6c6f",
			"--signature",
			"v: Parity(false), r: 1, s: 2",
			"--convention",
			"Raw01",
		])
		.unwrap();
		match args.command {
			Command::Verify { convention, .. } => {
				assert_eq!(convention, RecoveryConvention::Raw01)
			},
			other => panic!("unexpected command: {:?}", other),
		}

		assert!(Args::try_parse_from([
			"quorum-signer",
			"verify",
			"--address",
			"0x00",
			"--message",
			"00",
			"--signature",
			"x",
			"--convention",
			"eip155",
		])
		.is_err());
	}

	#[tokio::test]
	async fn test_run_identities_from_file() {
		let temp_dir = TempDir::new().unwrap();
		let path = temp_dir.path().join("config.toml");
		fs::write(
			&path,
			r#"
[session]
id = "file"
threshold = 1

[signers]
keys = ["${SIGNER_KEY:-0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80}"]

[gateway]
primary = "memory"
[gateway.implementations.memory]
"#,
		)
		.unwrap();

		let args = Args::try_parse_from([
			"quorum-signer",
			"identities",
			"--config",
			path.to_str().unwrap(),
		])
		.unwrap();
		let output = run(args).await.unwrap();
		assert_eq!(output.as_array().unwrap().len(), 1);
	}

	#[tokio::test]
	async fn test_run_sign_with_setup() {
		let temp_dir = TempDir::new().unwrap();
		let path = temp_dir.path().join("config.toml");
		fs::write(
			&path,
			r#"
[session]
id = "file"
threshold = 1
poll_interval_ms = 10
timeout_seconds = 1

[signers]
keys = ["0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"]

[gateway]
primary = "memory"
[gateway.implementations.memory]
"#,
		)
		.unwrap();

		let args = Args::try_parse_from([
			"quorum-signer",
			"--config",
			path.to_str().unwrap(),
			"sign",
			"--nonce",
			"3",
			"--chain-id",
			"5",
			"--token",
			"0x000000000000000000000000000000000000beef",
			"--to",
			"0x000000000000000000000000000000000000dead",
			"--amount",
			"42",
			"--setup",
		])
		.unwrap();
		let output = run(args).await.unwrap();
		assert_eq!(output["accepted_signers"], 1);
		assert_eq!(output["intent"]["nonce"], 3);
	}
}
