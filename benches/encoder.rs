//! Encoder and check digit benchmarks.

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};

use patient_idgen::domain::{Alphabet, CheckDigitAlgorithm};
use patient_idgen::service::check_digit;
use patient_idgen::service::encoder::SequenceFormat;

fn bench_encode(c: &mut Criterion) {
    let decimal = SequenceFormat::new(Alphabet::decimal(), 12, 12, "MRN-", "").unwrap();
    let base36 = SequenceFormat::new(
        Alphabet::new("0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ").unwrap(),
        10,
        10,
        "",
        "",
    )
    .unwrap();

    c.bench_function("encode_decimal", |b| {
        b.iter(|| decimal.encode(black_box(12_345_678)).unwrap());
    });
    c.bench_function("encode_base36", |b| {
        b.iter(|| base36.encode(black_box(3_656_158_440)).unwrap());
    });

    let encoded = base36.encode(3_656_158_440).unwrap();
    c.bench_function("decode_base36", |b| {
        b.iter(|| base36.decode(black_box(&encoded)).unwrap());
    });
}

fn bench_check_digit(c: &mut Criterion) {
    let hex = CheckDigitAlgorithm::ModN {
        alphabet: Alphabet::new("0123456789ABCDEF").unwrap(),
    };

    c.bench_function("luhn_mod10", |b| {
        b.iter(|| check_digit::compute(black_box("7992739871"), &CheckDigitAlgorithm::Mod10Luhn));
    });
    c.bench_function("luhn_mod16", |b| {
        b.iter(|| check_digit::compute(black_box("7F3A09C1"), &hex));
    });
}

criterion_group!(benches, bench_encode, bench_check_digit);
criterion_main!(benches);
