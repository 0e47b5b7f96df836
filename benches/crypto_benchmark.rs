use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use eamsa512::{Eamsa512, InMemoryKeyStore, RotationPolicy};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

fn core_with_active_key() -> Eamsa512 {
    let core = Eamsa512::new(RotationPolicy::default(), Arc::new(InMemoryKeyStore::new())).expect("core");
    let version = core.generate_key().expect("generate");
    core.activate(version).expect("activate");
    core
}

fn bench_key_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_generation");
    group.measurement_time(Duration::from_secs(10));

    let core = core_with_active_key();
    group.bench_function("generate_key", |b| {
        b.iter(|| black_box(core.generate_key().unwrap()));
    });

    group.finish();
}

fn bench_key_rotation(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_rotation");
    group.measurement_time(Duration::from_secs(10));

    // min_age_days gates every real rotate(), so this times the path up to
    // (and including) the RotationTooSoon check rather than a full swap.
    let core = core_with_active_key();
    group.bench_function("rotate_rejected_too_soon", |b| {
        b.iter(|| black_box(core.rotate().unwrap_err()));
    });

    group.finish();
}

fn bench_block_transform(c: &mut Criterion) {
    use eamsa512::block::{decrypt_block, encrypt_block};
    use eamsa512::kdf::derive_round_keys;
    use eamsa512::sbox::CipherTables;

    let mut group = c.benchmark_group("block_transform");
    group.measurement_time(Duration::from_secs(10));

    let master_key = [0x42u8; eamsa512::MASTER_KEY_LEN];
    let nonce = [0x11u8; eamsa512::NONCE_LEN];
    let round_keys = derive_round_keys(&master_key, &nonce, None).expect("derive");
    let tables = CipherTables::build().expect("tables");
    let block = [0xABu8; eamsa512::sbox::BLOCK_LEN];

    group.bench_function("encrypt_block", |b| {
        b.iter(|| black_box(encrypt_block(&block, &round_keys, &tables)));
    });

    let ciphertext_block = encrypt_block(&block, &round_keys, &tables);
    group.bench_function("decrypt_block", |b| {
        b.iter(|| black_box(decrypt_block(&ciphertext_block, &round_keys, &tables)));
    });

    group.finish();
}

fn bench_aead_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("aead_operations");
    group.measurement_time(Duration::from_secs(10));

    let core = core_with_active_key();
    let data_sizes = [16, 256, 1024, 8192, 65536];

    for &size in &data_sizes {
        let plaintext = vec![0u8; size];

        group.bench_with_input(BenchmarkId::new("encrypt", size), &plaintext, |b, plaintext| {
            b.iter(|| black_box(core.encrypt(plaintext).unwrap()));
        });

        let frame = core.encrypt(&plaintext).unwrap();
        group.bench_with_input(BenchmarkId::new("decrypt", size), &frame, |b, frame| {
            b.iter(|| black_box(core.decrypt(frame).unwrap()));
        });
    }

    group.finish();
}

fn bench_entropy_fill(c: &mut Criterion) {
    let mut group = c.benchmark_group("entropy");
    group.measurement_time(Duration::from_secs(10));

    let core = core_with_active_key();
    let sizes = [16usize, 32, 64, 256];

    for &size in &sizes {
        group.bench_with_input(BenchmarkId::new("fill_random", size), &size, |b, &size| {
            let mut buf = vec![0u8; size];
            b.iter(|| {
                core.fill_random(&mut buf).unwrap();
                black_box(&buf);
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_key_generation,
    bench_key_rotation,
    bench_block_transform,
    bench_aead_operations,
    bench_entropy_fill,
);
criterion_main!(benches);
