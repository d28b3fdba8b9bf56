use criterion::{Criterion, criterion_group, criterion_main};
use lapin::types::{AMQPValue, FieldTable};
use payment_watcher::domain::{PaymentForward, decode_job};
use payment_watcher::infra::broker::{DELIVERY_COUNT_HEADER, delivery_attempt};
use std::hint::black_box;

fn bench_decode(c: &mut Criterion) {
    let payload = br#"{"kind":"dash_payment_confirmation","userName":"alice","paymentForwardID":"pf-1","paymentNumber":3,"chargeAmount":1.25}"#;

    c.bench_function("decode_job", |b| {
        b.iter(|| {
            let _ = decode_job(black_box(payload));
        })
    });
}

fn bench_delivery_attempt(c: &mut Criterion) {
    let mut headers = FieldTable::default();
    headers.insert("x-first-death-queue".into(), AMQPValue::LongString("q".into()));
    headers.insert(DELIVERY_COUNT_HEADER.into(), AMQPValue::LongLongInt(2));

    c.bench_function("delivery_attempt", |b| {
        b.iter(|| delivery_attempt(black_box(Some(&headers)), black_box(true)))
    });
}

fn bench_credit(c: &mut Criterion) {
    let hashes: Vec<String> = (0..64).map(|i| format!("tx{i}")).collect();

    c.bench_function("payment_forward_credit", |b| {
        b.iter(|| {
            let mut forward = PaymentForward::new("pf-1", 64_000);
            for hash in &hashes {
                forward.credit(black_box(hash), 1_000);
                forward.credit(black_box(hash), 1_000);
            }
            forward.is_complete()
        })
    });
}

criterion_group!(benches, bench_decode, bench_delivery_attempt, bench_credit);
criterion_main!(benches);
