// Dispatch benchmarks for the OxRT runtime
//
// These benchmarks measure slot lookup through interface tables, comparing
// root slots, overridden slots and slots appended by a subclass against a
// direct Rust call.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use oxrt::{
    ClassDef, ClassDescriptor, Id, Instance, InterfaceBuilder, OBJECT, Object, Result, Slot,
    allocate, send,
};
use std::alloc::Layout;

#[repr(C)]
struct Gauge {
    object: Object,
    level: u64,
}

const LEVEL: Slot<fn(&Object) -> u64> = Slot::new(Object::SLOT_COUNT, "level");

fn gauge_level(this: &Object) -> u64 {
    this.cast::<Gauge>().level
}

fn gauge_hash(this: &Object) -> u64 {
    this.cast::<Gauge>().level.rotate_left(7)
}

fn gauge_interface(interface: &mut InterfaceBuilder) {
    interface
        .implement(&Object::HASH, gauge_hash)
        .declare(&LEVEL, gauge_level);
}

static GAUGE: ClassDescriptor = ClassDescriptor::new(ClassDef {
    name: "Gauge",
    superclass: Some(&OBJECT),
    instance: Layout::new::<Gauge>(),
    interface: Some(gauge_interface),
    dealloc: None,
});

unsafe impl Instance for Gauge {
    fn descriptor() -> &'static ClassDescriptor {
        &GAUGE
    }
}

fn gauge(level: u64) -> Result<Id<Gauge>> {
    allocate::<Gauge>()?.initialize(|init| {
        init.init_super(Object::init)?;
        init.this().level = level;
        Ok(())
    })
}

/// Benchmark a call through an appended slot against a direct field read.
fn bench_appended_slot(c: &mut Criterion) {
    let mut group = c.benchmark_group("appended_slot");
    let Ok(gauge) = gauge(42) else { return };

    group.bench_function("direct", |b| {
        b.iter(|| black_box(&gauge).level);
    });

    group.bench_function("send", |b| {
        b.iter(|| send!(black_box(&gauge), LEVEL));
    });

    group.bench_function("lookup_only", |b| {
        let object = gauge.as_object();
        b.iter(|| black_box(object).method(&LEVEL));
    });

    group.finish();
}

/// Benchmark the root `hash` slot, inherited versus overridden.
fn bench_root_slot(c: &mut Criterion) {
    let mut group = c.benchmark_group("root_slot");
    let (Ok(plain), Ok(gauge)) = (Object::new(), gauge(7)) else {
        return;
    };

    group.bench_function("inherited", |b| {
        b.iter(|| black_box(&*plain).hash_code());
    });

    group.bench_function("overridden", |b| {
        b.iter(|| black_box(gauge.as_object()).hash_code());
    });

    group.finish();
}

/// Benchmark checked lookups that fail.
fn bench_failed_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("failed_lookup");
    let Ok(plain) = Object::new() else { return };

    group.bench_function("no_such_slot", |b| {
        b.iter(|| black_box(&*plain).try_method(&LEVEL).is_err());
    });

    group.finish();
}

/// Benchmark class membership tests at increasing depth.
fn bench_is_kind_of(c: &mut Criterion) {
    let mut group = c.benchmark_group("is_kind_of");
    let Ok(gauge) = gauge(1) else { return };
    let object = gauge.as_object();

    for (name, class) in [("self", Gauge::class()), ("root", <Object as Instance>::class())] {
        group.bench_with_input(BenchmarkId::from_parameter(name), &class, |b, class| {
            b.iter(|| black_box(object).is_kind_of(*class));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_appended_slot,
    bench_root_slot,
    bench_failed_lookup,
    bench_is_kind_of,
);
criterion_main!(benches);
