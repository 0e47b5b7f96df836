//! EAMSA-512: a custom authenticated block cipher core.
//!
//! This crate implements only the cryptographic core of the EAMSA-512
//! construction: key schedule and round-key derivation, the 64-byte block
//! transform, CBC chaining with PKCS#7 padding, encrypt-then-MAC AEAD
//! framing, a chaos-conditioned entropy source, and the key lifecycle state
//! machine that owns key material end to end. Transport, persistence, and
//! operator tooling around this core are out of scope; see `DESIGN.md`.
//!
//! The single entry point is [`Eamsa512`], constructed with a
//! [`RotationPolicy`] and a [`KeyStore`]. It runs its startup self-test
//! immediately; if that fails, every subsequent operation returns
//! [`EamsaError::SelfTestFailed`] for the lifetime of the instance.

pub mod aead;
pub mod block;
pub mod entropy;
pub mod error;
pub mod events;
pub mod hash;
pub mod kat;
pub mod kdf;
pub mod lifecycle;
pub mod mode;
pub mod sbox;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info};

pub use crate::aead::Frame;
pub use crate::entropy::HealthStatus;
pub use crate::error::{EamsaError, Result};
pub use crate::events::{Event, EventBus, EventCategory, EventSink, Severity};
pub use crate::kdf::{MASTER_KEY_LEN, NONCE_LEN};
pub use crate::lifecycle::{
    DestructionMethod, InMemoryKeyStore, KeyStore, KeyVersionMetadata, KeyVersionState, RotationPolicy,
    RotationSweep, RotationSweepCallback, RotationSweepConfig,
};

use crate::entropy::EntropySource;
use crate::kdf::{derive_auth_key, derive_round_keys};
use crate::lifecycle::KeyManager;
use crate::sbox::CipherTables;

/// The facade embedding code constructs and calls. Owns the immutable
/// S-box/permutation tables (built once), the key manager, the entropy
/// source, and the event bus — mirroring the donor's pattern of a single
/// handle (`Vault`) gathering the pieces an embedder otherwise has to wire
/// up by hand, generalized from one vault's worth of state to this
/// construction's crypto/lifecycle/entropy triad.
pub struct Eamsa512 {
    tables: CipherTables,
    manager: KeyManager,
    entropy: EntropySource,
    events: Arc<EventBus>,
    self_test_passed: AtomicBool,
}

impl Eamsa512 {
    /// Builds the core: constructs the S-box/P-layer tables, runs the
    /// startup KAT suite (§4.I), and wires up the key manager and entropy
    /// source. Never panics on a self-test failure — it records the
    /// failure and returns a usable (but permanently poisoned) instance,
    /// per §4.I: "every operation returns `SelfTestFailed` thereafter."
    pub fn new(policy: RotationPolicy, store: Arc<dyn KeyStore>) -> Result<Self> {
        let tables = CipherTables::build().map_err(EamsaError::SelfTestFailed)?;
        let events = EventBus::new();
        let manager = KeyManager::new(policy, store, Arc::clone(&events))?;
        let entropy = EntropySource::new(None);

        let self_test_passed = AtomicBool::new(false);
        match kat::run_self_test(&tables) {
            Ok(()) => {
                self_test_passed.store(true, Ordering::SeqCst);
                info!("startup self-test passed");
            }
            Err(err) => {
                error!(%err, "startup self-test failed; core is permanently disabled");
                events.dispatch(Event::new(
                    EventCategory::Security,
                    Severity::Critical,
                    "self_test_failed",
                    err.to_string(),
                ));
            }
        }

        Ok(Self {
            tables,
            manager,
            entropy,
            events,
            self_test_passed,
        })
    }

    fn check_self_test(&self) -> Result<()> {
        if self.self_test_passed.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EamsaError::SelfTestFailed("startup KAT suite did not pass"))
        }
    }

    pub fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
        self.events.set_sink(sink);
    }

    #[must_use]
    pub fn events_dropped(&self) -> u64 {
        self.events.events_dropped()
    }

    fn fresh_nonce(&self) -> Result<[u8; NONCE_LEN]> {
        let mut nonce = [0u8; NONCE_LEN];
        self.entropy.fill(&mut nonce)?;
        Ok(nonce)
    }

    /// Encrypts under the active key version with a freshly generated
    /// nonce (§6).
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = self.fresh_nonce()?;
        self.encrypt_with_nonce(plaintext, nonce)
    }

    /// Encrypts under the active key version with a caller-supplied nonce.
    /// Test/reproducibility only — nonce uniqueness per key is the caller's
    /// responsibility (§6, §9).
    pub fn encrypt_with_nonce(&self, plaintext: &[u8], nonce: [u8; NONCE_LEN]) -> Result<Vec<u8>> {
        self.check_self_test()?;
        match self.encrypt_with_nonce_inner(plaintext, nonce) {
            Ok((version, frame)) => {
                self.events.dispatch(Event::new(
                    EventCategory::Operation,
                    Severity::Info,
                    "encrypt",
                    format!("version {version} encrypted {} byte(s)", plaintext.len()),
                ));
                Ok(frame)
            }
            Err(err) => {
                self.events.dispatch(Event::new(
                    EventCategory::Operation,
                    Severity::Warning,
                    "encrypt_failed",
                    err.to_string(),
                ));
                Err(err)
            }
        }
    }

    fn encrypt_with_nonce_inner(&self, plaintext: &[u8], nonce: [u8; NONCE_LEN]) -> Result<(u32, Vec<u8>)> {
        let version = self
            .manager
            .version_of_active()
            .ok_or(EamsaError::KeyStateInvalid {
                version: 0,
                reason: "no active key version",
            })?;

        let frame = self
            .manager
            .with_active_schedule(|material, round_keys, auth_key| {
                Ok(aead::seal(material, nonce, round_keys, auth_key, &self.tables, plaintext))
            })?;

        self.manager.record_enc_success(version)?;
        Ok((version, frame.to_bytes()))
    }

    /// Decrypts, trying the active version and then `Rotated` versions in
    /// descending age order (§4.F, §6). Returns `AuthFailure` if no
    /// candidate's tag verifies.
    pub fn decrypt(&self, frame_bytes: &[u8]) -> Result<Vec<u8>> {
        self.check_self_test()?;
        match self.decrypt_inner(frame_bytes) {
            Ok((version, plaintext)) => {
                self.events.dispatch(Event::new(
                    EventCategory::Operation,
                    Severity::Info,
                    "decrypt",
                    format!("version {version} decrypted {} byte(s)", plaintext.len()),
                ));
                Ok(plaintext)
            }
            Err(err) => {
                self.emit_decrypt_failure(&err, None);
                Err(err)
            }
        }
    }

    fn decrypt_inner(&self, frame_bytes: &[u8]) -> Result<(u32, Vec<u8>)> {
        let frame = Frame::from_bytes(frame_bytes)?;
        let (version, plaintext) = self.try_decrypt_frame(&frame)?;
        self.manager.record_dec_success(version)?;
        Ok((version, plaintext))
    }

    /// Decrypts against a specific key version only (§6). Unlike `decrypt`,
    /// an unknown or materially-absent version surfaces as `KeyNotFound` /
    /// `KeyStateInvalid` rather than the generic `AuthFailure`, since the
    /// caller named the version explicitly and isn't probing untrusted
    /// input.
    pub fn decrypt_as(&self, frame_bytes: &[u8], version: u32) -> Result<Vec<u8>> {
        self.check_self_test()?;
        match self.decrypt_as_inner(frame_bytes, version) {
            Ok(plaintext) => {
                self.events.dispatch(Event::new(
                    EventCategory::Operation,
                    Severity::Info,
                    "decrypt_as",
                    format!("version {version} decrypted {} byte(s)", plaintext.len()),
                ));
                Ok(plaintext)
            }
            Err(err) => {
                self.emit_decrypt_failure(&err, Some(version));
                Err(err)
            }
        }
    }

    fn decrypt_as_inner(&self, frame_bytes: &[u8], version: u32) -> Result<Vec<u8>> {
        let frame = Frame::from_bytes(frame_bytes)?;
        let plaintext = self.manager.with_version_schedule(version, |material, round_keys, auth_key| {
            aead::open(material, round_keys, auth_key, &self.tables, &frame)
        })?;
        self.manager.record_dec_success(version)?;
        Ok(plaintext)
    }

    /// Shared by `decrypt`: runs the trial loop over the active version
    /// then `Rotated` versions in descending age order (§4.F).
    fn try_decrypt_frame(&self, frame: &Frame) -> Result<(u32, Vec<u8>)> {
        self.manager
            .try_versions_for_decrypt(|material, round_keys, auth_key| aead::open(material, round_keys, auth_key, &self.tables, frame))
    }

    /// Emits the failure event for a `decrypt`/`decrypt_as` rejection.
    /// `AuthFailure` means a tag or padding check rejected the frame — a
    /// tamper (or forged) attempt — and is delivered as a blocking
    /// `Security`/`Critical` event per §4.H; every other error (malformed
    /// frame, unknown version, self-test failure) is a normal operational
    /// warning.
    fn emit_decrypt_failure(&self, err: &EamsaError, version: Option<u32>) {
        if matches!(err, EamsaError::AuthFailure) {
            let details = match version {
                Some(version) => format!("version {version} rejected the frame: tag or padding did not verify"),
                None => "no active or rotated version's tag verified against the frame".to_string(),
            };
            self.events.dispatch(Event::new(EventCategory::Security, Severity::Critical, "tamper_detected", details));
        } else {
            self.events.dispatch(Event::new(EventCategory::Operation, Severity::Warning, "decrypt_failed", err.to_string()));
        }
    }

    /// Generates a new `Generated`-state key version from freshly sampled
    /// entropy (§6 `generate_key`).
    pub fn generate_key(&self) -> Result<u32> {
        self.check_self_test()?;
        let mut material = [0u8; MASTER_KEY_LEN];
        self.entropy.fill(&mut material)?;
        let kdf_nonce = self.fresh_nonce()?;
        self.manager.generate(material, kdf_nonce)
    }

    /// Registers externally supplied key material as a new `Generated`
    /// version, skipping the entropy source entirely (§4.G: "accepted
    /// unchanged; the manager does not generate it").
    pub fn generate_key_from(&self, material: [u8; MASTER_KEY_LEN]) -> Result<u32> {
        self.check_self_test()?;
        let kdf_nonce = self.fresh_nonce()?;
        self.manager.generate(material, kdf_nonce)
    }

    pub fn activate(&self, version: u32) -> Result<()> {
        self.check_self_test()?;
        self.manager.activate(version)
    }

    /// Rotates the active key to freshly sampled material. Use
    /// `rotate_to` to supply material explicitly.
    pub fn rotate(&self) -> Result<u32> {
        self.check_self_test()?;
        let mut material = [0u8; MASTER_KEY_LEN];
        self.entropy.fill(&mut material)?;
        let kdf_nonce = self.fresh_nonce()?;
        self.manager.rotate(material, kdf_nonce)
    }

    pub fn rotate_to(&self, new_key: [u8; MASTER_KEY_LEN]) -> Result<u32> {
        self.check_self_test()?;
        let kdf_nonce = self.fresh_nonce()?;
        self.manager.rotate(new_key, kdf_nonce)
    }

    #[must_use]
    pub fn get_active_metadata(&self) -> Option<KeyVersionMetadata> {
        self.manager.get_active_metadata()
    }

    #[must_use]
    pub fn list_versions(&self) -> Vec<KeyVersionMetadata> {
        self.manager.list_versions()
    }

    pub fn destroy(&self, version: u32) -> Result<()> {
        self.check_self_test()?;
        self.manager.destroy(version)
    }

    /// Backs up a version's master key, encrypted under a caller-supplied
    /// `backup_key` via the core's own AEAD wrapper (§4.G). The backup
    /// frame is self-contained: its own nonce, its own tag.
    pub fn backup(&self, version: u32, backup_key: &[u8; MASTER_KEY_LEN]) -> Result<Vec<u8>> {
        self.check_self_test()?;
        let backup_nonce = self.fresh_nonce()?;
        let round_keys = derive_round_keys(backup_key, &backup_nonce, None)?;
        let auth_key = derive_auth_key(backup_key, &backup_nonce);

        let material = self
            .manager
            .with_version_schedule(version, |material, _round_keys, _auth_key| Ok(*material))?;

        let frame = aead::seal(backup_key, backup_nonce, &round_keys, &auth_key, &self.tables, &material);
        Ok(frame.to_bytes())
    }

    /// Restores a backup frame under `backup_key`, validates the recovered
    /// material is exactly 32 bytes, and rotates to it (§4.G).
    pub fn restore(&self, frame_bytes: &[u8], backup_key: &[u8; MASTER_KEY_LEN]) -> Result<u32> {
        self.check_self_test()?;
        let frame = Frame::from_bytes(frame_bytes)?;
        let round_keys = derive_round_keys(backup_key, &frame.nonce, None)?;
        let auth_key = derive_auth_key(backup_key, &frame.nonce);

        let recovered = aead::open(backup_key, &round_keys, &auth_key, &self.tables, &frame)?;
        if recovered.len() != MASTER_KEY_LEN {
            return Err(EamsaError::InvalidKeyLength { actual: recovered.len() });
        }
        let mut material = [0u8; MASTER_KEY_LEN];
        material.copy_from_slice(&recovered);
        self.rotate_to(material)
    }

    pub fn fill_random(&self, dst: &mut [u8]) -> Result<()> {
        self.entropy.fill(dst)
    }

    #[must_use]
    pub fn health_status(&self) -> HealthStatus {
        self.entropy.health_status()
    }

    pub fn reset_entropy(&self) {
        self.entropy.reset();
    }

    #[must_use]
    pub fn get_policy(&self) -> RotationPolicy {
        self.manager.get_policy()
    }

    pub fn set_policy(&self, policy: RotationPolicy) -> Result<()> {
        self.manager.set_policy(policy)
    }

    /// Hands back a clone of the event bus handle so an embedder can start
    /// a [`RotationSweep`] bound to the same manager and sink.
    #[must_use]
    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }
}
