//! Key lifecycle state machine (§4.G): generation through zeroization.
//!
//! Grounded in the donor's `VaultManager` (`crates/vault/src/manager.rs`,
//! a `HashMap` of owned resources behind a registry) generalized to the
//! spec's five-state machine, and in `AutoLockService`
//! (`crates/vault/src/autolock_service.rs`) for the background sweep that
//! only warns, never acts unilaterally.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use crate::error::{EamsaError, Result};
use crate::events::{Event, EventBus, EventCategory, Severity};
use crate::hash::{sha3_256, sha3_512};
use crate::kdf::{derive_auth_key, derive_round_keys, RoundKeySchedule, AUTH_KEY_LEN, MASTER_KEY_LEN, NONCE_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyVersionState {
    Generated,
    Active,
    Rotated,
    Archived,
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DestructionMethod {
    Zero,
    RandomOverwrite,
}

/// Lifecycle policy (§3): interval/max/min ages and retention depth. Mirrors
/// the donor's `AutoLockConfig` shape — a plain serializable struct with a
/// `Default` and its own invariant check, constructed independently of the
/// manager it configures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RotationPolicy {
    pub interval_days: u32,
    pub max_age_days: u32,
    pub min_age_days: u32,
    pub retention_cycles: u32,
    pub destruction_method: DestructionMethod,
    pub destruction_passes: u32,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            interval_days: 90,
            max_age_days: 180,
            min_age_days: 1,
            retention_cycles: 3,
            destruction_method: DestructionMethod::RandomOverwrite,
            destruction_passes: 3,
        }
    }
}

impl RotationPolicy {
    /// Validates `0 < min_age_days <= interval_days < max_age_days` and
    /// `retention_cycles >= 1`, `destruction_passes >= 1` (§3).
    pub fn validate(&self) -> Result<()> {
        if self.min_age_days == 0 {
            return Err(EamsaError::PolicyInvalid("min_age_days must be greater than zero"));
        }
        if self.min_age_days > self.interval_days {
            return Err(EamsaError::PolicyInvalid("min_age_days must not exceed interval_days"));
        }
        if self.interval_days >= self.max_age_days {
            return Err(EamsaError::PolicyInvalid("interval_days must be less than max_age_days"));
        }
        if self.retention_cycles < 1 {
            return Err(EamsaError::PolicyInvalid("retention_cycles must be at least 1"));
        }
        if self.destruction_passes < 1 {
            return Err(EamsaError::PolicyInvalid("destruction_passes must be at least 1"));
        }
        Ok(())
    }
}

/// Config for the background age-sweep (§5 "background rotation sweep"),
/// shaped like the donor's `AutoLockConfig::check_interval_seconds`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RotationSweepConfig {
    pub tick_interval_secs: u64,
}

impl Default for RotationSweepConfig {
    fn default() -> Self {
        Self { tick_interval_secs: 3600 }
    }
}

/// Owns key bytes and erases them on drop. Analogous to the donor's
/// `KeyMaterial` (`crates/vault/src/crypto.rs`), generalized from a fixed
/// 32-byte array to the `Zeroize`/`Drop` pairing used everywhere material
/// needs to vanish reliably.
#[derive(Clone)]
pub struct MasterKey([u8; MASTER_KEY_LEN]);

impl MasterKey {
    #[must_use]
    pub fn new(bytes: [u8; MASTER_KEY_LEN]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; MASTER_KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("MasterKey").field(&"<redacted>").finish()
    }
}

impl Zeroize for MasterKey {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.zeroize();
    }
}

/// Durable side-store for key material, injected by the embedder. Per §1's
/// "no HSM driver" non-goal, the core defines only the trait and a software
/// in-memory default; an HSM-backed implementation is the embedder's job.
/// Grounded in the donor's in-memory `open_vaults: HashMap<String, Vault>`
/// cache in `VaultManager`.
pub trait KeyStore: Send + Sync {
    fn store(&self, version: u32, material: &[u8; MASTER_KEY_LEN]) -> Result<()>;
    fn load(&self, version: u32) -> Result<Option<[u8; MASTER_KEY_LEN]>>;
    fn erase(&self, version: u32) -> Result<()>;
}

/// Process-memory-only `KeyStore`. The default and the one used in tests;
/// material is zeroized when a version is erased or when the store drops.
#[derive(Default)]
pub struct InMemoryKeyStore {
    entries: Mutex<HashMap<u32, [u8; MASTER_KEY_LEN]>>,
}

impl InMemoryKeyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for InMemoryKeyStore {
    fn store(&self, version: u32, material: &[u8; MASTER_KEY_LEN]) -> Result<()> {
        self.entries.lock().insert(version, *material);
        Ok(())
    }

    fn load(&self, version: u32) -> Result<Option<[u8; MASTER_KEY_LEN]>> {
        Ok(self.entries.lock().get(&version).copied())
    }

    fn erase(&self, version: u32) -> Result<()> {
        if let Some(mut material) = self.entries.lock().remove(&version) {
            material.zeroize();
        }
        Ok(())
    }
}

impl Drop for InMemoryKeyStore {
    fn drop(&mut self) {
        for (_, material) in self.entries.lock().iter_mut() {
            material.zeroize();
        }
    }
}

/// Public, material-free snapshot of a key version — what `list_versions`
/// and `get_active_metadata` hand back to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyVersionMetadata {
    pub version: u32,
    pub state: KeyVersionState,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub activated_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub rotated_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub archived_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub destroyed_at: Option<OffsetDateTime>,
    pub key_hash: [u8; 16],
    pub enc_counter: u64,
    pub dec_counter: u64,
}

/// Cached, derived-from-material crypto context for one version: the round
/// key schedule and auth key, derived from the version's fixed `kdf_nonce`
/// (§4.C — distinct from the fresh per-message nonce the AEAD layer
/// generates for CBC chaining; see `DESIGN.md` for why these are two
/// different nonces).
struct ScheduleCache {
    round_keys: RoundKeySchedule,
    auth_key: [u8; AUTH_KEY_LEN],
}

struct VersionMutable {
    state: KeyVersionState,
    activated_at: Option<OffsetDateTime>,
    rotated_at: Option<OffsetDateTime>,
    archived_at: Option<OffsetDateTime>,
    destroyed_at: Option<OffsetDateTime>,
    material: Option<MasterKey>,
    kdf_nonce: [u8; NONCE_LEN],
    schedule: Option<ScheduleCache>,
    enc_counter: u64,
    dec_counter: u64,
}

/// One key version's full record. The counters/state/material live behind
/// a per-version lock (§5: "acquired after the map lock to avoid holding
/// the map lock during crypto"); `version`, `created_at`, and `key_hash` are
/// immutable for the record's lifetime and need no lock.
pub struct VersionRecord {
    pub version: u32,
    pub created_at: OffsetDateTime,
    pub key_hash: [u8; 16],
    inner: Mutex<VersionMutable>,
}

impl VersionRecord {
    fn metadata(&self) -> KeyVersionMetadata {
        let inner = self.inner.lock();
        KeyVersionMetadata {
            version: self.version,
            state: inner.state,
            created_at: self.created_at,
            activated_at: inner.activated_at,
            rotated_at: inner.rotated_at,
            archived_at: inner.archived_at,
            destroyed_at: inner.destroyed_at,
            key_hash: self.key_hash,
            enc_counter: inner.enc_counter,
            dec_counter: inner.dec_counter,
        }
    }

    fn ensure_schedule(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.schedule.is_some() {
            return Ok(());
        }
        let kdf_nonce = inner.kdf_nonce;
        let material = inner
            .material
            .as_ref()
            .ok_or(EamsaError::KeyStateInvalid {
                version: self.version,
                reason: "no material present to derive a schedule from",
            })?
            .as_bytes();
        let round_keys = derive_round_keys(material, &kdf_nonce, None)?;
        let auth_key = derive_auth_key(material, &kdf_nonce);
        inner.schedule = Some(ScheduleCache { round_keys, auth_key });
        Ok(())
    }
}

/// Monotone u32 counter driving erase-pass derivation (§4.G's
/// `monotonic_counter`), shared across every secure erase this process
/// performs so two erases never derive the same overwrite stream.
static ERASE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Secure erase per §4.G: `zero` overwrites with zero bytes directly;
/// `random-overwrite` XORs `passes` independently derived streams over the
/// material before the final zero pass. `Zeroize::zeroize` (used for both
/// the XOR scratch buffer and the final pass) performs a volatile write
/// internally, so the compiler cannot elide it as dead stores to a
/// about-to-be-dropped buffer.
fn secure_erase(material: &mut [u8; MASTER_KEY_LEN], method: DestructionMethod, passes: u32) {
    if method == DestructionMethod::RandomOverwrite {
        let counter = ERASE_COUNTER.fetch_add(1, Ordering::Relaxed);
        for p in 0..passes {
            let mut stream_input = Vec::with_capacity(8 + 8);
            stream_input.extend_from_slice(b"pass");
            stream_input.extend_from_slice(&p.to_be_bytes());
            stream_input.extend_from_slice(&counter.to_be_bytes());
            let mut stream = sha3_256(&stream_input);
            // sha3_256 returns 32 bytes; the key is also 32 bytes, so the
            // stream covers it exactly once per pass.
            for (b, s) in material.iter_mut().zip(stream.iter()) {
                *b ^= *s;
            }
            stream.zeroize();
        }
    }
    material.zeroize();
}

/// Owns every `KeyVersion` record and its material (§3 "KeyStore lifecycle
/// ownership"). Readers (`resolve_active`, `resolve_by_version`) take the
/// map's read lock; writers (`generate`, `activate`, `rotate`, `archive`,
/// `destroy`) take the write lock, matching §5's reader/writer split.
pub struct KeyManager {
    versions: RwLock<HashMap<u32, Arc<VersionRecord>>>,
    next_version: AtomicU32,
    policy: RwLock<RotationPolicy>,
    store: Arc<dyn KeyStore>,
    events: Arc<EventBus>,
}

impl KeyManager {
    pub fn new(policy: RotationPolicy, store: Arc<dyn KeyStore>, events: Arc<EventBus>) -> Result<Self> {
        policy.validate()?;
        Ok(Self {
            versions: RwLock::new(HashMap::new()),
            next_version: AtomicU32::new(1),
            policy: RwLock::new(policy),
            store,
            events,
        })
    }

    #[must_use]
    pub fn get_policy(&self) -> RotationPolicy {
        *self.policy.read()
    }

    pub fn set_policy(&self, policy: RotationPolicy) -> Result<()> {
        policy.validate()?;
        *self.policy.write() = policy;
        Ok(())
    }

    fn emit(&self, category: EventCategory, severity: Severity, kind: &str, details: impl Into<String>) {
        self.events.dispatch(Event::new(category, severity, kind, details));
    }

    /// Registers a new `Generated` version from caller-supplied or
    /// freshly-random material, along with the 16-byte `kdf_nonce` that
    /// this version's round-key schedule and auth key will forever be
    /// derived under (§4.C). The manager never calls the entropy source
    /// itself — the facade resolves both `material` (random or externally
    /// supplied) and `kdf_nonce` before handing them here, matching §4.G's
    /// "rotation from externally supplied key material: accepted
    /// unchanged."
    pub fn generate(&self, material: [u8; MASTER_KEY_LEN], kdf_nonce: [u8; NONCE_LEN]) -> Result<u32> {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        let key_hash_full = sha3_512(&material);
        let mut key_hash = [0u8; 16];
        key_hash.copy_from_slice(&key_hash_full[..16]);

        // Guards against a corrupted copy of the material between
        // generation and storage (§4.G: "validates via at least one
        // SHA3-512 hash equality ... to guard against bit errors").
        let verify = sha3_512(&material);
        if verify != key_hash_full {
            return Err(EamsaError::SelfTestFailed("key material hash mismatch on generation"));
        }

        self.store.store(version, &material)?;

        let record = Arc::new(VersionRecord {
            version,
            created_at: OffsetDateTime::now_utc(),
            key_hash,
            inner: Mutex::new(VersionMutable {
                state: KeyVersionState::Generated,
                activated_at: None,
                rotated_at: None,
                archived_at: None,
                destroyed_at: None,
                material: Some(MasterKey::new(material)),
                kdf_nonce,
                schedule: None,
                enc_counter: 0,
                dec_counter: 0,
            }),
        });

        self.versions.write().insert(version, record);
        info!(version, "key version generated");
        self.emit(EventCategory::Admin, Severity::Info, "key_generated", format!("version {version} generated"));
        Ok(version)
    }

    /// Promotes a `Generated` version to `Active`, demoting the previously
    /// `Active` version (if any) to `Rotated`. Exactly one version is
    /// `Active` at a time (§3).
    pub fn activate(&self, version: u32) -> Result<()> {
        match self.activate_inner(version) {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(version, %err, "key activation failed");
                self.emit(
                    EventCategory::Admin,
                    Severity::Warning,
                    "key_activate_failed",
                    format!("version {version} activation failed: {err}"),
                );
                Err(err)
            }
        }
    }

    fn activate_inner(&self, version: u32) -> Result<()> {
        let versions = self.versions.read();
        let target = versions.get(&version).cloned().ok_or(EamsaError::KeyNotFound(version))?;

        {
            let inner = target.inner.lock();
            if inner.state != KeyVersionState::Generated {
                return Err(EamsaError::KeyStateInvalid {
                    version,
                    reason: "only a Generated version can be activated",
                });
            }
        }

        let previous_active = versions
            .values()
            .find(|v| v.inner.lock().state == KeyVersionState::Active)
            .cloned();
        drop(versions);

        if let Some(previous) = &previous_active {
            let mut inner = previous.inner.lock();
            inner.state = KeyVersionState::Rotated;
            inner.rotated_at = Some(OffsetDateTime::now_utc());
        }

        {
            let mut inner = target.inner.lock();
            inner.state = KeyVersionState::Active;
            inner.activated_at = Some(OffsetDateTime::now_utc());
        }

        info!(version, "key version activated");
        self.emit(EventCategory::Admin, Severity::Info, "key_activated", format!("version {version} activated"));

        if previous_active.is_some() {
            self.enforce_retention()?;
        }
        Ok(())
    }

    /// Rotates the active version: the current `Active` becomes `Rotated`
    /// (material retained for decryption) and a new version, created from
    /// `new_key` or freshly generated random material, becomes `Active`
    /// atomically from the caller's point of view. Fails with
    /// `RotationTooSoon` if `min_age_days` has not elapsed (§3, §4.G).
    pub fn rotate(&self, new_material: [u8; MASTER_KEY_LEN], new_kdf_nonce: [u8; NONCE_LEN]) -> Result<u32> {
        match self.rotate_inner(new_material, new_kdf_nonce) {
            Ok(version) => Ok(version),
            Err(err) => {
                warn!(%err, "key rotation failed");
                self.emit(EventCategory::Admin, Severity::Warning, "key_rotate_failed", format!("rotation failed: {err}"));
                Err(err)
            }
        }
    }

    fn rotate_inner(&self, new_material: [u8; MASTER_KEY_LEN], new_kdf_nonce: [u8; NONCE_LEN]) -> Result<u32> {
        let policy = self.get_policy();
        let active = self.active_record()?;

        {
            let inner = active.inner.lock();
            let activated_at = inner.activated_at.ok_or(EamsaError::KeyStateInvalid {
                version: active.version,
                reason: "active version has no activation timestamp",
            })?;
            let age_days = (OffsetDateTime::now_utc() - activated_at).whole_days();
            if age_days < i64::from(policy.min_age_days) {
                return Err(EamsaError::RotationTooSoon {
                    version: active.version,
                    age_days,
                    min_age_days: policy.min_age_days,
                });
            }
        }

        let new_version = self.generate(new_material, new_kdf_nonce)?;
        self.activate_inner(new_version)?;
        Ok(new_version)
    }

    /// Archives the oldest `Rotated` version once `{Active, Rotated}`
    /// exceeds `retention_cycles`, securely erasing its material in place
    /// before flipping the state flag (§3, §4.G).
    fn enforce_retention(&self) -> Result<()> {
        let policy = self.get_policy();
        let versions = self.versions.read();

        let mut live: Vec<Arc<VersionRecord>> = versions
            .values()
            .filter(|v| matches!(v.inner.lock().state, KeyVersionState::Active | KeyVersionState::Rotated))
            .cloned()
            .collect();
        drop(versions);

        if live.len() <= policy.retention_cycles as usize {
            return Ok(());
        }

        live.sort_by_key(|v| v.created_at);
        let to_archive: Vec<Arc<VersionRecord>> = live
            .into_iter()
            .filter(|v| v.inner.lock().state == KeyVersionState::Rotated)
            .take(1)
            .collect();

        for record in to_archive {
            self.archive_record(&record)?;
        }
        Ok(())
    }

    fn archive_record(&self, record: &Arc<VersionRecord>) -> Result<()> {
        let policy = self.get_policy();
        let mut inner = record.inner.lock();
        if let Some(mut material) = inner.material.take() {
            secure_erase(&mut material.0, policy.destruction_method, policy.destruction_passes);
        }
        inner.schedule = None;
        inner.state = KeyVersionState::Archived;
        inner.archived_at = Some(OffsetDateTime::now_utc());
        drop(inner);

        self.store.erase(record.version)?;
        info!(version = record.version, "key version archived");
        self.emit(
            EventCategory::Security,
            Severity::Info,
            "key_archived",
            format!("version {} archived and material erased", record.version),
        );
        Ok(())
    }

    /// Permanently destroys a version: material is securely erased and the
    /// state becomes `Destroyed`. Valid from any state except `Destroyed`
    /// itself (an already-destroyed version has nothing left to erase).
    pub fn destroy(&self, version: u32) -> Result<()> {
        match self.destroy_inner(version) {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(version, %err, "key destruction failed");
                self.emit(
                    EventCategory::Security,
                    Severity::Warning,
                    "key_destroy_failed",
                    format!("version {version} destruction failed: {err}"),
                );
                Err(err)
            }
        }
    }

    fn destroy_inner(&self, version: u32) -> Result<()> {
        let record = self.record(version)?;
        let policy = self.get_policy();

        {
            let mut inner = record.inner.lock();
            if inner.state == KeyVersionState::Destroyed {
                return Err(EamsaError::KeyStateInvalid {
                    version,
                    reason: "version is already destroyed",
                });
            }
            if let Some(mut material) = inner.material.take() {
                secure_erase(&mut material.0, policy.destruction_method, policy.destruction_passes);
            }
            inner.schedule = None;
            inner.state = KeyVersionState::Destroyed;
            inner.destroyed_at = Some(OffsetDateTime::now_utc());
        }

        self.store.erase(version)?;
        info!(version, "key version destroyed");
        self.emit(
            EventCategory::Security,
            Severity::Warning,
            "key_destroyed",
            format!("version {version} destroyed and material erased"),
        );
        Ok(())
    }

    fn record(&self, version: u32) -> Result<Arc<VersionRecord>> {
        self.versions.read().get(&version).cloned().ok_or(EamsaError::KeyNotFound(version))
    }

    fn active_record(&self) -> Result<Arc<VersionRecord>> {
        self.versions
            .read()
            .values()
            .find(|v| v.inner.lock().state == KeyVersionState::Active)
            .cloned()
            .ok_or(EamsaError::KeyStateInvalid {
                version: 0,
                reason: "no active key version",
            })
    }

    #[must_use]
    pub fn get_active_metadata(&self) -> Option<KeyVersionMetadata> {
        self.versions
            .read()
            .values()
            .find(|v| v.inner.lock().state == KeyVersionState::Active)
            .map(|v| v.metadata())
    }

    #[must_use]
    pub fn list_versions(&self) -> Vec<KeyVersionMetadata> {
        let mut out: Vec<KeyVersionMetadata> = self.versions.read().values().map(|v| v.metadata()).collect();
        out.sort_by_key(|m| m.version);
        out
    }

    /// Resolves the active version's schedule for an `encrypt` call,
    /// deriving and caching it on first use, then runs `f` with the
    /// material, schedule, and auth key — never while holding the map
    /// lock, per §5.
    pub fn with_active_schedule<T>(
        &self,
        f: impl FnOnce(&[u8; MASTER_KEY_LEN], &RoundKeySchedule, &[u8; AUTH_KEY_LEN]) -> Result<T>,
    ) -> Result<T> {
        let record = self.active_record()?;
        self.with_schedule(&record, f)
    }

    /// Resolves a specific version's schedule for `decrypt_as`.
    pub fn with_version_schedule<T>(
        &self,
        version: u32,
        f: impl FnOnce(&[u8; MASTER_KEY_LEN], &RoundKeySchedule, &[u8; AUTH_KEY_LEN]) -> Result<T>,
    ) -> Result<T> {
        let record = self.record(version)?;
        self.with_schedule(&record, f)
    }

    /// Trial-decrypt affordance (§4.F): tries the active version, then
    /// `Rotated` versions in descending age order. Each attempt is bounded
    /// to a single tag verification. Returns the matching version alongside
    /// the result so the caller (the facade's `decrypt`) doesn't have to
    /// re-derive which candidate succeeded.
    pub fn try_versions_for_decrypt<T>(
        &self,
        mut attempt: impl FnMut(&[u8; MASTER_KEY_LEN], &RoundKeySchedule, &[u8; AUTH_KEY_LEN]) -> Result<T>,
    ) -> Result<(u32, T)> {
        let mut candidates: Vec<Arc<VersionRecord>> = self
            .versions
            .read()
            .values()
            .filter(|v| matches!(v.inner.lock().state, KeyVersionState::Active | KeyVersionState::Rotated))
            .cloned()
            .collect();
        candidates.sort_by(|a, b| {
            let a_active = a.inner.lock().state == KeyVersionState::Active;
            let b_active = b.inner.lock().state == KeyVersionState::Active;
            b_active.cmp(&a_active).then(a.created_at.cmp(&b.created_at))
        });

        for record in &candidates {
            if let Ok(result) = self.with_schedule(record, &mut attempt) {
                return Ok((record.version, result));
            }
        }
        Err(EamsaError::AuthFailure)
    }

    fn with_schedule<T>(
        &self,
        record: &Arc<VersionRecord>,
        f: impl FnOnce(&[u8; MASTER_KEY_LEN], &RoundKeySchedule, &[u8; AUTH_KEY_LEN]) -> Result<T>,
    ) -> Result<T> {
        {
            let inner = record.inner.lock();
            if inner.material.is_none() {
                return Err(EamsaError::KeyStateInvalid {
                    version: record.version,
                    reason: "no material present (Archived or Destroyed)",
                });
            }
        }
        record.ensure_schedule()?;
        debug!(version = record.version, "resolved key schedule");

        let inner = record.inner.lock();
        let material = inner.material.as_ref().expect("checked above").as_bytes();
        let schedule = inner.schedule.as_ref().expect("ensured above");
        f(material, &schedule.round_keys, &schedule.auth_key)
    }

    pub fn record_enc_success(&self, version: u32) -> Result<()> {
        let record = self.record(version)?;
        record.inner.lock().enc_counter += 1;
        Ok(())
    }

    pub fn record_dec_success(&self, version: u32) -> Result<()> {
        let record = self.record(version)?;
        record.inner.lock().dec_counter += 1;
        Ok(())
    }

    #[must_use]
    pub fn version_of_active(&self) -> Option<u32> {
        self.active_record().ok().map(|r| r.version)
    }

    /// Ages, in days, of every `Active`/`Rotated` version relative to their
    /// activation — used by the background sweep (§4.G's "max_age_days: a
    /// background sweep MAY emit a warning ... MUST emit a critical").
    #[must_use]
    pub fn ages_for_sweep(&self) -> Vec<(u32, i64)> {
        let now = OffsetDateTime::now_utc();
        self.versions
            .read()
            .values()
            .filter_map(|v| {
                let inner = v.inner.lock();
                if !matches!(inner.state, KeyVersionState::Active | KeyVersionState::Rotated) {
                    return None;
                }
                inner.activated_at.map(|t| (v.version, (now - t).whole_days()))
            })
            .collect()
    }

    /// Test-only seam: shifts the active version's `activated_at` into the
    /// past so `rotate`'s `min_age_days` gate and the sweep's age checks
    /// can be exercised deterministically without a real-time wait.
    #[cfg(test)]
    pub(crate) fn backdate_active_by(&self, days: i64) {
        if let Ok(record) = self.active_record() {
            let mut inner = record.inner.lock();
            if let Some(t) = inner.activated_at {
                inner.activated_at = Some(t - time::Duration::days(days));
            }
        }
    }
}

/// Notified once per sweep tick for every version that has crossed
/// `max_age_days`. Mirrors the donor's `AutoLockCallback`
/// (`crates/vault/src/autolock_service.rs`): an async hook an embedder can
/// wire an operator page or an automated rotation job into, kept separate
/// from the sweep's own event-bus notification so a slow or failing
/// callback can never stall the sweep loop itself (errors are logged and
/// otherwise ignored).
#[async_trait::async_trait]
pub trait RotationSweepCallback: Send + Sync {
    async fn on_overdue(&self, version: u32, age_days: i64) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Background age sweep (§4.G, §5): periodically checks every live
/// version's age against the policy and emits warning/critical events. It
/// never rotates on its own — directly mirroring the donor's
/// `AutoLockService`, generalized from "lock after inactivity" to "warn
/// after age".
pub struct RotationSweep {
    manager: Arc<KeyManager>,
    events: Arc<EventBus>,
    callback: Option<Arc<dyn RotationSweepCallback>>,
    running: Arc<tokio::sync::RwLock<bool>>,
}

impl RotationSweep {
    #[must_use]
    pub fn new(manager: Arc<KeyManager>, events: Arc<EventBus>) -> Self {
        Self {
            manager,
            events,
            callback: None,
            running: Arc::new(tokio::sync::RwLock::new(false)),
        }
    }

    /// Attaches a callback invoked for each version found past
    /// `max_age_days` at each tick, in addition to the critical event the
    /// sweep always emits.
    #[must_use]
    pub fn with_callback(mut self, callback: Arc<dyn RotationSweepCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    pub async fn start(&self, config: RotationSweepConfig) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(&self.manager);
        let events = Arc::clone(&self.events);
        let callback = self.callback.clone();
        let running = Arc::clone(&self.running);
        *running.write().await = true;

        tokio::spawn(async move {
            let tick = tokio::time::Duration::from_secs(config.tick_interval_secs);
            info!("rotation sweep started");

            while *running.read().await {
                let policy = manager.get_policy();
                for (version, age_days) in manager.ages_for_sweep() {
                    if age_days >= i64::from(policy.max_age_days) {
                        warn!(version, age_days, "key version past max age");
                        events.dispatch(Event::new(
                            EventCategory::System,
                            Severity::Critical,
                            "key_overdue_rotation",
                            format!("version {version} is {age_days} day(s) old, past max_age_days={}", policy.max_age_days),
                        ));
                        if let Some(cb) = &callback {
                            if let Err(err) = cb.on_overdue(version, age_days).await {
                                warn!(version, %err, "rotation sweep callback failed");
                            }
                        }
                    } else if age_days >= i64::from(policy.interval_days) {
                        events.dispatch(Event::new(
                            EventCategory::System,
                            Severity::Warning,
                            "key_due_for_rotation",
                            format!("version {version} is {age_days} day(s) old, interval_days={}", policy.interval_days),
                        ));
                    }
                }
                tokio::time::sleep(tick).await;
            }

            info!("rotation sweep stopped");
        })
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> KeyManager {
        KeyManager::new(RotationPolicy::default(), Arc::new(InMemoryKeyStore::new()), EventBus::new()).expect("manager")
    }

    fn nonce(byte: u8) -> [u8; NONCE_LEN] {
        [byte; NONCE_LEN]
    }

    #[test]
    fn generate_then_activate_makes_exactly_one_active_version() {
        let mgr = manager();
        let v1 = mgr.generate([1u8; MASTER_KEY_LEN], nonce(1)).expect("generate");
        mgr.activate(v1).expect("activate");
        assert_eq!(mgr.get_active_metadata().unwrap().version, v1);

        let active_count = mgr
            .list_versions()
            .into_iter()
            .filter(|m| m.state == KeyVersionState::Active)
            .count();
        assert_eq!(active_count, 1);
    }

    #[test]
    fn activating_a_second_version_rotates_the_first() {
        let mgr = manager();
        let v1 = mgr.generate([1u8; MASTER_KEY_LEN], nonce(1)).expect("generate");
        mgr.activate(v1).expect("activate v1");
        let v2 = mgr.generate([2u8; MASTER_KEY_LEN], nonce(2)).expect("generate");
        mgr.activate(v2).expect("activate v2");

        let versions = mgr.list_versions();
        let m1 = versions.iter().find(|m| m.version == v1).unwrap();
        let m2 = versions.iter().find(|m| m.version == v2).unwrap();
        assert_eq!(m1.state, KeyVersionState::Rotated);
        assert_eq!(m2.state, KeyVersionState::Active);
    }

    #[test]
    fn rotate_too_soon_is_rejected() {
        let mut policy = RotationPolicy::default();
        policy.min_age_days = 30;
        let mgr = KeyManager::new(policy, Arc::new(InMemoryKeyStore::new()), EventBus::new()).expect("manager");
        let v1 = mgr.generate([1u8; MASTER_KEY_LEN], nonce(1)).expect("generate");
        mgr.activate(v1).expect("activate");

        let err = mgr.rotate([2u8; MASTER_KEY_LEN], nonce(2)).unwrap_err();
        assert!(matches!(err, EamsaError::RotationTooSoon { .. }));
    }

    #[test]
    fn destroy_zeroes_material_and_rejects_redestroy() {
        let mgr = manager();
        let v1 = mgr.generate([7u8; MASTER_KEY_LEN], nonce(7)).expect("generate");
        mgr.destroy(v1).expect("destroy");

        let err = mgr.destroy(v1).unwrap_err();
        assert!(matches!(err, EamsaError::KeyStateInvalid { .. }));

        let err2 = mgr.with_version_schedule(v1, |_, _, _| Ok(())).unwrap_err();
        assert!(matches!(err2, EamsaError::KeyStateInvalid { .. }));
    }

    #[test]
    fn retention_archives_oldest_rotated_version_beyond_cycle_count() {
        let mut policy = RotationPolicy::default();
        policy.retention_cycles = 1;
        policy.min_age_days = 1;
        let mgr = KeyManager::new(policy, Arc::new(InMemoryKeyStore::new()), EventBus::new()).expect("manager");

        let v1 = mgr.generate([1u8; MASTER_KEY_LEN], nonce(1)).expect("generate v1");
        mgr.activate(v1).expect("activate v1");
        let v2 = mgr.generate([2u8; MASTER_KEY_LEN], nonce(2)).expect("generate v2");
        mgr.activate(v2).expect("activate v2");
        let v3 = mgr.generate([3u8; MASTER_KEY_LEN], nonce(3)).expect("generate v3");
        mgr.activate(v3).expect("activate v3");

        let versions = mgr.list_versions();
        let m1 = versions.iter().find(|m| m.version == v1).unwrap();
        assert_eq!(m1.state, KeyVersionState::Archived);
    }

    #[test]
    fn secure_erase_zeroes_the_buffer_for_both_methods() {
        let mut buf = [0xFFu8; MASTER_KEY_LEN];
        secure_erase(&mut buf, DestructionMethod::Zero, 1);
        assert_eq!(buf, [0u8; MASTER_KEY_LEN]);

        let mut buf2 = [0xAAu8; MASTER_KEY_LEN];
        secure_erase(&mut buf2, DestructionMethod::RandomOverwrite, 4);
        assert_eq!(buf2, [0u8; MASTER_KEY_LEN]);
    }

    #[test]
    fn key_not_found_surfaces_for_unknown_version() {
        let mgr = manager();
        let err = mgr.destroy(999).unwrap_err();
        assert_eq!(err, EamsaError::KeyNotFound(999));
    }

    struct CountingCallback(Arc<std::sync::atomic::AtomicUsize>);
    #[async_trait::async_trait]
    impl RotationSweepCallback for CountingCallback {
        async fn on_overdue(&self, _version: u32, _age_days: i64) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn sweep_invokes_callback_for_overdue_versions() {
        let mut policy = RotationPolicy::default();
        policy.max_age_days = 1;
        let mgr = Arc::new(KeyManager::new(policy, Arc::new(InMemoryKeyStore::new()), EventBus::new()).expect("manager"));
        let v1 = mgr.generate([1u8; MASTER_KEY_LEN], nonce(1)).expect("generate");
        mgr.activate(v1).expect("activate");
        mgr.backdate_active_by(5);

        let hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let sweep = RotationSweep::new(Arc::clone(&mgr), EventBus::new()).with_callback(Arc::new(CountingCallback(Arc::clone(&hits))));
        let config = RotationSweepConfig { tick_interval_secs: 3600 };
        let handle = sweep.start(config).await;

        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        sweep.stop().await;
        handle.abort();

        assert!(hits.load(Ordering::SeqCst) >= 1);
    }
}
