//! The quorum signing session.
//!
//! Every remote call goes through exactly one signer client and is a single
//! request/response exchange. Waiting for a signature is the only place
//! where calls are repeated, and only when the caller asks for it through
//! [`QuorumSession::wait_for_signature`] or [`QuorumSession::sign`].

use crate::SessionError;
use futures::future::join_all;
use serde::Serialize;
use signer_config::Config;
use signer_gateway::CanisterGateway;
use signer_signature::{decode, encode, ensure_signed_by, verify};
use signer_types::{
	truncate_id, MessageId, Principal, QuorumConfig, RecoveryConvention, SignatureComponents,
	TransferIntent,
};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;
use tracing::instrument;

/// How often and for how long to read a signature that is not ready yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
	pub interval: Duration,
	pub timeout: Duration,
}

impl PollPolicy {
	pub fn new(interval: Duration, timeout: Duration) -> Self {
		Self { interval, timeout }
	}

	pub fn from_config(config: &Config) -> Self {
		Self::new(config.poll_interval(), config.timeout())
	}
}

impl Default for PollPolicy {
	fn default() -> Self {
		Self::new(Duration::from_millis(500), Duration::from_secs(120))
	}
}

/// Result of one signer's submission.
#[derive(Debug)]
pub struct SignerOutcome {
	pub signer: Principal,
	pub result: Result<MessageId, SessionError>,
}

/// Per-signer results of submitting one intent through every client.
#[derive(Debug)]
pub struct SubmissionReport {
	/// Identifier derived locally from the intent content.
	pub message_id: MessageId,
	/// One entry per client, in client order.
	pub outcomes: Vec<SignerOutcome>,
}

impl SubmissionReport {
	/// Number of distinct signers whose submission the canister accepted.
	///
	/// Clients sharing a principal count once, as they do on the canister.
	pub fn accepted(&self) -> usize {
		self.outcomes
			.iter()
			.filter(|o| o.result.is_ok())
			.map(|o| o.signer)
			.collect::<HashSet<_>>()
			.len()
	}

	pub fn failures(&self) -> impl Iterator<Item = (Principal, &SessionError)> {
		self.outcomes
			.iter()
			.filter_map(|o| o.result.as_ref().err().map(|e| (o.signer, e)))
	}
}

/// A transfer intent together with its verified quorum signature.
#[derive(Debug, Clone, Serialize)]
pub struct SignedIntent {
	pub message_id: MessageId,
	pub intent: TransferIntent,
	/// Textual form as returned by the canister.
	pub signature: String,
	/// `0x`-prefixed 65-byte `r ‖ s ‖ v`.
	pub raw_signature: String,
	pub convention: RecoveryConvention,
	/// Checksummed address the signature recovers to.
	pub signer_address: String,
	/// Signers whose submission was accepted.
	pub accepted_signers: usize,
}

/// N independent signer clients sharing one signing canister.
pub struct QuorumSession {
	id: String,
	clients: Vec<Box<dyn CanisterGateway>>,
	threshold: u32,
	convention: RecoveryConvention,
	poll_policy: PollPolicy,
}

impl std::fmt::Debug for QuorumSession {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("QuorumSession")
			.field("id", &self.id)
			.field("signers", &self.signers())
			.field("threshold", &self.threshold)
			.field("convention", &self.convention)
			.finish()
	}
}

impl QuorumSession {
	/// Creates a session over `clients`, one per signer identity.
	///
	/// # Errors
	///
	/// Fails with [`SessionError::Quorum`] if there are no clients or the
	/// threshold is zero or larger than the number of distinct signers.
	pub fn new(
		id: impl Into<String>,
		clients: Vec<Box<dyn CanisterGateway>>,
		threshold: u32,
		convention: RecoveryConvention,
	) -> Result<Self, SessionError> {
		let session = Self {
			id: id.into(),
			clients,
			threshold,
			convention,
			poll_policy: PollPolicy::default(),
		};
		session.quorum()?;
		Ok(session)
	}

	pub fn with_poll_policy(mut self, poll_policy: PollPolicy) -> Self {
		self.poll_policy = poll_policy;
		self
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn threshold(&self) -> u32 {
		self.threshold
	}

	pub fn convention(&self) -> RecoveryConvention {
		self.convention
	}

	pub fn poll_policy(&self) -> PollPolicy {
		self.poll_policy
	}

	/// Principals of all clients, in client order.
	pub fn signers(&self) -> Vec<Principal> {
		self.clients.iter().map(|c| c.sender()).collect()
	}

	/// The quorum this session establishes on the canister.
	pub fn quorum(&self) -> Result<QuorumConfig, SessionError> {
		Ok(QuorumConfig::new(self.signers(), self.threshold)?)
	}

	/// The client used for reads and for `setup`. The constructor guarantees
	/// that at least one client exists.
	fn reader(&self) -> &dyn CanisterGateway {
		self.clients[0].as_ref()
	}

	/// Establishes the quorum through the first client.
	#[instrument(skip_all, fields(session = %self.id))]
	pub async fn setup(&self) -> Result<QuorumConfig, SessionError> {
		let quorum = self.quorum()?;
		self.reader().setup(&quorum).await?;
		tracing::info!(
			signers = quorum.signers().len(),
			threshold = quorum.threshold(),
			"Quorum established"
		);
		Ok(quorum)
	}

	/// Submits `intent` through the client at `index`.
	pub async fn submit(
		&self,
		index: usize,
		intent: &TransferIntent,
	) -> Result<MessageId, SessionError> {
		let client = self
			.clients
			.get(index)
			.ok_or(SessionError::UnknownSigner(index))?;
		submit_with(client.as_ref(), intent).await
	}

	/// Submits `intent` through every client concurrently.
	///
	/// A failing client does not prevent the others from submitting; each
	/// outcome is reported separately.
	#[instrument(skip_all, fields(session = %self.id))]
	pub async fn submit_all(&self, intent: &TransferIntent) -> SubmissionReport {
		let message_id = intent.message_id();
		let results = join_all(
			self.clients
				.iter()
				.map(|client| submit_with(client.as_ref(), intent)),
		)
		.await;

		let outcomes: Vec<SignerOutcome> = self
			.clients
			.iter()
			.zip(results)
			.map(|(client, result)| {
				if let Err(e) = &result {
					tracing::warn!(
						signer = %truncate_id(&client.sender().to_text()),
						error = %e,
						"Submission failed"
					);
				}
				SignerOutcome {
					signer: client.sender(),
					result,
				}
			})
			.collect();

		let report = SubmissionReport {
			message_id,
			outcomes,
		};
		tracing::info!(
			message_id = %truncate_id(&message_id.to_string()),
			accepted = report.accepted(),
			signers = self.clients.len(),
			"Submitted intent"
		);
		report
	}

	/// Reads and decodes the signature once.
	///
	/// Before the threshold is reached this fails with an error for which
	/// [`SessionError::is_not_ready`] is true.
	pub async fn fetch_signature(
		&self,
		message_id: &MessageId,
	) -> Result<SignatureComponents, SessionError> {
		let text = self.reader().get_signature(message_id).await?;
		Ok(decode(&text)?)
	}

	/// Reads the signature until it is ready or `policy.timeout` elapses.
	///
	/// Only the not-ready outcome is retried; any other error ends the wait.
	#[instrument(skip_all, fields(message_id = %truncate_id(&message_id.to_string())))]
	pub async fn wait_for_signature(
		&self,
		message_id: &MessageId,
		policy: &PollPolicy,
	) -> Result<SignatureComponents, SessionError> {
		let started = Instant::now();
		let deadline = started + policy.timeout;
		let mut attempts = 0u32;

		loop {
			attempts += 1;
			match self.fetch_signature(message_id).await {
				Ok(components) => {
					tracing::debug!(attempts, "Signature available");
					return Ok(components);
				},
				Err(e) if e.is_not_ready() => {
					let now = Instant::now();
					if now + policy.interval > deadline {
						return Err(SessionError::Timeout {
							message_id: *message_id,
							waited: now - started,
						});
					}
					tracing::trace!(attempts, reason = %e, "Signature not ready");
					tokio::time::sleep(policy.interval).await;
				},
				Err(e) => return Err(e),
			}
		}
	}

	/// Checks `components` over `intent` against the canister's address.
	pub async fn verify(
		&self,
		intent: &TransferIntent,
		components: &SignatureComponents,
	) -> Result<bool, SessionError> {
		let address = self.reader().evm_address().await?;
		let raw = encode(components, self.convention);
		Ok(verify(&address, intent.digest().as_slice(), &raw)?)
	}

	/// Hex public key of the canister's threshold key.
	pub async fn canister_public_key(&self) -> Result<String, SessionError> {
		Ok(self.reader().public_key().await?)
	}

	/// Ethereum address of the canister's threshold key.
	pub async fn canister_address(&self) -> Result<String, SessionError> {
		Ok(self.reader().evm_address().await?)
	}

	/// Submits through every client, waits for the signature and verifies it.
	///
	/// # Errors
	///
	/// [`SessionError::QuorumNotReached`] if fewer than `threshold` clients
	/// submitted successfully, [`SessionError::Timeout`] if the signature does
	/// not appear in time, and a [`VerificationError::AddressMismatch`]
	/// wrapped in [`SessionError::Verification`] if it was not produced by the
	/// canister's key.
	///
	/// [`VerificationError::AddressMismatch`]: signer_signature::VerificationError::AddressMismatch
	#[instrument(skip_all, fields(session = %self.id, nonce = intent.nonce()))]
	pub async fn sign(&self, intent: &TransferIntent) -> Result<SignedIntent, SessionError> {
		let report = self.submit_all(intent).await;
		let accepted = report.accepted();
		if accepted < self.threshold as usize {
			return Err(SessionError::QuorumNotReached {
				accepted,
				threshold: self.threshold,
			});
		}

		let message_id = report.message_id;
		let components = self
			.wait_for_signature(&message_id, &self.poll_policy)
			.await?;

		let address = self.reader().evm_address().await?;
		let raw = encode(&components, self.convention);
		let recovered = ensure_signed_by(&address, message_id.digest().as_slice(), &raw)?;

		tracing::info!(
			message_id = %truncate_id(&message_id.to_string()),
			signer = %recovered,
			"Signature verified"
		);

		Ok(SignedIntent {
			message_id,
			intent: intent.clone(),
			signature: components.to_string(),
			raw_signature: raw.to_hex(),
			convention: self.convention,
			signer_address: recovered.to_checksum(None),
			accepted_signers: accepted,
		})
	}
}

async fn submit_with(
	client: &dyn CanisterGateway,
	intent: &TransferIntent,
) -> Result<MessageId, SessionError> {
	let expected = intent.message_id();
	let returned = client.create_or_sign_message(intent).await?;
	if returned != expected {
		return Err(SessionError::MessageIdMismatch { expected, returned });
	}
	tracing::debug!(
		signer = %truncate_id(&client.sender().to_text()),
		message_id = %truncate_id(&returned.to_string()),
		"Intent submitted"
	);
	Ok(returned)
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy_primitives::{B256, U256};
	use async_trait::async_trait;
	use k256::ecdsa::SigningKey;
	use mockall::mock;
	use signer_gateway::implementations::memory::MemoryCanister;
	use signer_gateway::GatewayError;
	use signer_signature::{personal_message_digest, public_key_to_address, VerificationError};
	use signer_types::{ConfigSchema, MessageState};
	use std::sync::Arc;

	mock! {
		Gateway {}

		#[async_trait]
		impl CanisterGateway for Gateway {
			fn config_schema(&self) -> Box<dyn ConfigSchema>;
			fn sender(&self) -> Principal;
			async fn setup(&self, quorum: &QuorumConfig) -> Result<(), GatewayError>;
			async fn create_or_sign_message(
				&self,
				intent: &TransferIntent,
			) -> Result<MessageId, GatewayError>;
			async fn get_signature(&self, message_id: &MessageId) -> Result<String, GatewayError>;
			async fn public_key(&self) -> Result<String, GatewayError>;
			async fn evm_address(&self) -> Result<String, GatewayError>;
		}
	}

	fn intent() -> TransferIntent {
		TransferIntent::new(
			1,
			1,
			"0x000000000000000000000000000000000000beef",
			"0x000000000000000000000000000000000000dead",
			"1",
		)
		.unwrap()
	}

	fn principal(byte: u8) -> Principal {
		Principal::from_slice(&[byte; 29])
	}

	fn random_key() -> SigningKey {
		SigningKey::random(&mut rand::rngs::OsRng)
	}

	fn memory_clients(canister: &Arc<MemoryCanister>, signers: u8) -> Vec<Box<dyn CanisterGateway>> {
		(1..=signers)
			.map(|byte| Box::new(canister.gateway(principal(byte))) as Box<dyn CanisterGateway>)
			.collect()
	}

	fn memory_session(threshold: u32, signers: u8) -> (Arc<MemoryCanister>, QuorumSession) {
		let canister = Arc::new(MemoryCanister::new(random_key(), false));
		let session = QuorumSession::new(
			"test",
			memory_clients(&canister, signers),
			threshold,
			RecoveryConvention::Offset27,
		)
		.unwrap();
		(canister, session)
	}

	/// Signature text over the intent digest, as the canister would return it.
	fn signature_text(key: &SigningKey, intent: &TransferIntent) -> String {
		let digest = personal_message_digest(intent.digest().as_slice());
		let (signature, recovery_id) = key.sign_prehash_recoverable(digest.as_slice()).unwrap();
		let (r, s) = signature.split_bytes();
		SignatureComponents::new(
			recovery_id.is_y_odd(),
			U256::from_be_slice(&r),
			U256::from_be_slice(&s),
		)
		.to_string()
	}

	#[test]
	fn test_invalid_quorum_is_rejected() {
		let canister = Arc::new(MemoryCanister::new(random_key(), false));
		assert!(matches!(
			QuorumSession::new("q", vec![], 1, RecoveryConvention::Offset27),
			Err(SessionError::Quorum(_))
		));
		assert!(matches!(
			QuorumSession::new(
				"q",
				memory_clients(&canister, 2),
				3,
				RecoveryConvention::Offset27
			),
			Err(SessionError::Quorum(_))
		));
	}

	#[tokio::test]
	async fn test_two_of_three_end_to_end() {
		let (_canister, session) = memory_session(2, 3);
		session.setup().await.unwrap();

		let id = intent().message_id();
		assert!(session.fetch_signature(&id).await.unwrap_err().is_not_ready());

		assert_eq!(session.submit(0, &intent()).await.unwrap(), id);
		match session.fetch_signature(&id).await {
			Err(SessionError::Gateway(GatewayError::NotReady {
				state: MessageState::PartiallySigned,
				..
			})) => {},
			other => panic!("unexpected result: {:?}", other),
		}

		assert_eq!(session.submit(2, &intent()).await.unwrap(), id);
		let components = session.fetch_signature(&id).await.unwrap();
		assert!(session.verify(&intent(), &components).await.unwrap());
	}

	#[tokio::test]
	async fn test_sign_reports_verified_signature() {
		let (_canister, session) = memory_session(2, 3);
		session.setup().await.unwrap();

		let signed = session.sign(&intent()).await.unwrap();
		assert_eq!(signed.accepted_signers, 3);
		assert_eq!(signed.message_id, intent().message_id());
		assert_eq!(
			signed.signer_address.to_lowercase(),
			session.canister_address().await.unwrap().to_lowercase()
		);
		assert_eq!(signed.raw_signature.len(), 2 + 130);

		let json = serde_json::to_value(&signed).unwrap();
		assert_eq!(json["message_id"], intent().message_id().to_string());
		assert_eq!(json["convention"], "offset27");
	}

	#[tokio::test]
	async fn test_concurrent_submissions_count_each_signer_once() {
		let (canister, session) = memory_session(3, 3);
		session.setup().await.unwrap();

		let intent = intent();
		let (first, second) = tokio::join!(session.submit_all(&intent), session.submit_all(&intent));
		assert_eq!(first.accepted(), 3);
		assert_eq!(second.accepted(), 3);

		let state = canister.state().await;
		let message = &state.messages[&intent.message_id()];
		assert_eq!(message.signers.len(), 3);
		assert!(message.signature.is_some());
	}

	#[tokio::test]
	async fn test_unknown_signer_index() {
		let (_canister, session) = memory_session(1, 1);
		assert!(matches!(
			session.submit(4, &intent()).await,
			Err(SessionError::UnknownSigner(4))
		));
	}

	#[tokio::test(start_paused = true)]
	async fn test_wait_times_out_below_threshold() {
		let (_canister, session) = memory_session(2, 3);
		session.setup().await.unwrap();
		session.submit(0, &intent()).await.unwrap();

		let policy = PollPolicy::new(Duration::from_millis(100), Duration::from_secs(1));
		match session
			.wait_for_signature(&intent().message_id(), &policy)
			.await
		{
			Err(SessionError::Timeout { waited, .. }) => {
				assert!(waited <= Duration::from_secs(1));
				assert!(waited >= Duration::from_millis(900));
			},
			other => panic!("unexpected result: {:?}", other),
		}
	}

	#[tokio::test(start_paused = true)]
	async fn test_wait_sees_late_signer() {
		let (canister, session) = memory_session(2, 3);
		session.setup().await.unwrap();
		session.submit(0, &intent()).await.unwrap();

		let late = canister.gateway(principal(2));
		let handle = tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(300)).await;
			late.create_or_sign_message(&intent()).await
		});

		let policy = PollPolicy::new(Duration::from_millis(50), Duration::from_secs(5));
		let components = session
			.wait_for_signature(&intent().message_id(), &policy)
			.await
			.unwrap();
		handle.await.unwrap().unwrap();

		assert!(session.verify(&intent(), &components).await.unwrap());
	}

	#[tokio::test]
	async fn test_failed_signer_does_not_block_others() {
		let canister = Arc::new(MemoryCanister::new(random_key(), false));
		let mut failing = MockGateway::new();
		failing.expect_sender().return_const(principal(3));
		failing
			.expect_create_or_sign_message()
			.times(1)
			.returning(|_| Err(GatewayError::Transport("connection refused".into())));

		let mut clients = memory_clients(&canister, 2);
		clients.push(Box::new(failing));
		let session =
			QuorumSession::new("partial", clients, 2, RecoveryConvention::Offset27).unwrap();
		session.setup().await.unwrap();

		let signed = session.sign(&intent()).await.unwrap();
		assert_eq!(signed.accepted_signers, 2);
	}

	#[tokio::test]
	async fn test_quorum_not_reached() {
		let mut failing = MockGateway::new();
		failing.expect_sender().return_const(principal(1));
		failing
			.expect_create_or_sign_message()
			.returning(|_| Err(GatewayError::Rejected("Caller is not an authorized signer".into())));

		let session =
			QuorumSession::new("q", vec![Box::new(failing)], 1, RecoveryConvention::Offset27)
				.unwrap();
		let report = session.submit_all(&intent()).await;
		assert_eq!(report.failures().count(), 1);

		assert!(matches!(
			session.sign(&intent()).await,
			Err(SessionError::QuorumNotReached {
				accepted: 0,
				threshold: 1
			})
		));
	}

	#[tokio::test]
	async fn test_duplicated_signer_counts_once() {
		let canister = Arc::new(MemoryCanister::new(random_key(), false));
		let mut failing = MockGateway::new();
		failing.expect_sender().return_const(principal(2));
		failing
			.expect_create_or_sign_message()
			.returning(|_| Err(GatewayError::Transport("connection refused".into())));

		let clients: Vec<Box<dyn CanisterGateway>> = vec![
			Box::new(canister.gateway(principal(1))),
			Box::new(canister.gateway(principal(1))),
			Box::new(failing),
		];
		let session =
			QuorumSession::new("duplicate", clients, 2, RecoveryConvention::Offset27).unwrap();
		session.setup().await.unwrap();

		let report = session.submit_all(&intent()).await;
		assert_eq!(report.accepted(), 1);
		assert_eq!(report.failures().count(), 1);

		assert!(matches!(
			session.sign(&intent()).await,
			Err(SessionError::QuorumNotReached {
				accepted: 1,
				threshold: 2
			})
		));
	}

	#[tokio::test]
	async fn test_transport_error_ends_wait() {
		let mut gateway = MockGateway::new();
		gateway.expect_sender().return_const(principal(1));
		gateway
			.expect_get_signature()
			.times(1)
			.returning(|_| Err(GatewayError::Transport("replica unavailable".into())));

		let session =
			QuorumSession::new("q", vec![Box::new(gateway)], 1, RecoveryConvention::Offset27)
				.unwrap();
		let result = session
			.wait_for_signature(&intent().message_id(), &PollPolicy::default())
			.await;
		assert!(matches!(
			result,
			Err(SessionError::Gateway(GatewayError::Transport(_)))
		));
	}

	#[tokio::test]
	async fn test_message_id_mismatch() {
		let mut gateway = MockGateway::new();
		gateway.expect_sender().return_const(principal(1));
		gateway
			.expect_create_or_sign_message()
			.returning(|_| Ok(MessageId::from_digest(&B256::repeat_byte(0x11))));

		let session =
			QuorumSession::new("q", vec![Box::new(gateway)], 1, RecoveryConvention::Offset27)
				.unwrap();
		assert!(matches!(
			session.submit(0, &intent()).await,
			Err(SessionError::MessageIdMismatch { .. })
		));
	}

	#[tokio::test]
	async fn test_signature_from_other_key_is_rejected() {
		let signing_key = random_key();
		let other_key = random_key();
		let id = intent().message_id();
		let text = signature_text(&signing_key, &intent());
		let other_address = public_key_to_address(other_key.verifying_key()).to_checksum(None);

		let mut gateway = MockGateway::new();
		gateway.expect_sender().return_const(principal(1));
		gateway
			.expect_create_or_sign_message()
			.returning(move |_| Ok(id));
		gateway
			.expect_get_signature()
			.returning(move |_| Ok(text.clone()));
		gateway
			.expect_evm_address()
			.returning(move || Ok(other_address.clone()));

		let session =
			QuorumSession::new("q", vec![Box::new(gateway)], 1, RecoveryConvention::Offset27)
				.unwrap();

		let components = session.fetch_signature(&id).await.unwrap();
		assert!(!session.verify(&intent(), &components).await.unwrap());

		match session.sign(&intent()).await {
			Err(SessionError::Verification(VerificationError::AddressMismatch { .. })) => {},
			other => panic!("unexpected result: {:?}", other),
		}
	}

	#[tokio::test]
	async fn test_malformed_signature_text() {
		let mut gateway = MockGateway::new();
		gateway.expect_sender().return_const(principal(1));
		gateway
			.expect_get_signature()
			.returning(|_| Ok("Signature { v: Parity(true), r: 1 }".to_string()));

		let session =
			QuorumSession::new("q", vec![Box::new(gateway)], 1, RecoveryConvention::Offset27)
				.unwrap();
		assert!(matches!(
			session.fetch_signature(&intent().message_id()).await,
			Err(SessionError::Parse(_))
		));
	}
}
