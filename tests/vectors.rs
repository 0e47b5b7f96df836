//! End-to-end scenarios over literal vectors: the six fixed cases the
//! design's testable-properties section spells out byte-for-byte, run
//! against the public facade rather than any internal module.

use eamsa512::kdf::{derive_auth_key, derive_round_keys, NUM_ROUND_KEYS};
use eamsa512::{Eamsa512, EamsaError, InMemoryKeyStore, MASTER_KEY_LEN, NONCE_LEN, RotationPolicy};
use std::sync::{Arc, Once};

static INIT_TRACING: Once = Once::new();

fn core() -> Eamsa512 {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).try_init();
    });
    Eamsa512::new(RotationPolicy::default(), Arc::new(InMemoryKeyStore::new())).expect("core constructs")
}

fn active_key_from(core: &Eamsa512, material: [u8; MASTER_KEY_LEN]) -> u32 {
    let version = core.generate_key_from(material).expect("register key");
    core.activate(version).expect("activate key");
    version
}

#[test]
fn round_trip_all_zero_key_and_plaintext() {
    let core = core();
    active_key_from(&core, [0u8; MASTER_KEY_LEN]);

    let nonce = [0u8; NONCE_LEN];
    let plaintext = [0u8; 64];

    let frame_bytes = core.encrypt_with_nonce(&plaintext, nonce).expect("encrypt");
    assert_eq!(&frame_bytes[frame_bytes.len() - NONCE_LEN - 64..frame_bytes.len() - 64], &nonce);

    let recovered = core.decrypt(&frame_bytes).expect("decrypt");
    assert_eq!(recovered, plaintext);
}

#[test]
fn key_schedule_distinctness_for_the_literal_vector() {
    let mut key = [0u8; MASTER_KEY_LEN];
    for (i, b) in key.iter_mut().enumerate() {
        *b = i as u8;
    }
    let mut nonce = [0u8; NONCE_LEN];
    for (i, b) in nonce.iter_mut().enumerate() {
        *b = i as u8;
    }

    let schedule = derive_round_keys(&key, &nonce, None).expect("derive");
    for i in 0..NUM_ROUND_KEYS {
        for j in (i + 1)..NUM_ROUND_KEYS {
            assert_ne!(schedule.subkey(i), schedule.subkey(j), "subkey {i} collided with subkey {j}");
        }
    }
    assert_ne!(schedule.subkey(0), schedule.subkey(10));

    // derive_auth_key is exercised alongside since both ride the same
    // key/nonce pair and the design treats them as one derivation step.
    let auth_key = derive_auth_key(&key, &nonce);
    assert_eq!(auth_key.len(), 32);
}

#[test]
fn tamper_detection_on_a_forty_byte_plaintext() {
    let core = core();
    active_key_from(&core, [0x2Au8; MASTER_KEY_LEN]);

    let plaintext = [0x5Au8; 40];
    let mut frame = core.encrypt(&plaintext).expect("encrypt");
    frame[0] ^= 1;

    let err = core.decrypt(&frame).unwrap_err();
    assert_eq!(err, EamsaError::AuthFailure);
}

#[test]
fn wrong_key_is_rejected() {
    let core1 = core();
    let mut key1 = [0x11u8; MASTER_KEY_LEN];
    key1[5] = 0x77;
    active_key_from(&core1, key1);
    let frame = core1.encrypt(b"attacker cannot read this").expect("encrypt");

    let mut key2 = key1;
    *key2.last_mut().unwrap() ^= 0x01;

    let core2 = core();
    active_key_from(&core2, key2);
    let err = core2.decrypt(&frame).unwrap_err();
    assert_eq!(err, EamsaError::AuthFailure);
}

#[test]
fn rotation_preserves_old_frame_readability_and_pins_version() {
    let core = core();
    let v1 = active_key_from(&core, [0x01u8; MASTER_KEY_LEN]);
    let frame1 = core.encrypt(b"written under the first generation key").expect("encrypt v1");

    // `rotate`/`rotate_to` enforce min_age_days, which a same-process
    // integration test cannot satisfy without a real wait. Driving
    // generate-then-activate directly produces the identical Active/Rotated
    // transition `rotate_to` would, without the age gate in the way.
    let v2 = active_key_from(&core, [0x02u8; MASTER_KEY_LEN]);
    assert_ne!(v1, v2);

    let recovered = core.decrypt(&frame1).expect("trial-decrypt against the rotated version");
    assert_eq!(recovered, b"written under the first generation key");

    let frame2 = core.encrypt(b"written under the second generation key").expect("encrypt v2");
    let err = core.decrypt_as(&frame2, v1).unwrap_err();
    assert!(matches!(err, EamsaError::AuthFailure | EamsaError::KeyNotFound(_)));
}

#[test]
fn padding_edge_case_exactly_one_block() {
    let core = core();
    active_key_from(&core, [0x09u8; MASTER_KEY_LEN]);

    let plaintext = vec![0x33u8; 64];
    let frame = core.encrypt(&plaintext).expect("encrypt");
    // ciphertext region: plaintext block + one full block of padding = 128 bytes.
    assert_eq!(frame.len(), 128 + NONCE_LEN + 64);
    assert_eq!(core.decrypt(&frame).expect("decrypt"), plaintext);
}

#[test]
fn padding_edge_case_empty_plaintext() {
    let core = core();
    active_key_from(&core, [0x0Fu8; MASTER_KEY_LEN]);

    let frame = core.encrypt(&[]).expect("encrypt empty");
    assert_eq!(frame.len(), 64 + NONCE_LEN + 64);
    assert_eq!(core.decrypt(&frame).expect("decrypt"), Vec::<u8>::new());
}
