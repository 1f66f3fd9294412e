//! Registry benchmarks
//!
//! Measures SPI lookup under contention and the wrap/release round trip.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use std::thread;
use tak_interop::{Bindings, FactoryRegistry, Handle, Interop, Peer, PeerManager};

struct Probe {
    peer: Peer,
}

fn probe_bindings() -> Bindings {
    let bindings = Bindings::new(PeerManager::new());
    bindings
        .register(Interop::new(
            |peer: &Peer| Some(Probe { peer: peer.clone() }),
            |p: &Probe| p.peer.handle(),
            |h| {
                black_box(h);
            },
        ))
        .expect("fresh bindings");
    bindings
}

fn populated_registry(keys: usize) -> FactoryRegistry<usize> {
    let registry = FactoryRegistry::new("bench");
    for key in 0..keys {
        registry.register_spi_named::<usize, _>(&format!("Control{key}"), move |h, _| {
            Some(h.address() + key)
        });
    }
    registry
}

fn bench_spi_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("spi_lookup");

    for keys in [10, 100, 1000] {
        let registry = populated_registry(keys);
        group.bench_with_input(BenchmarkId::new("create_named", keys), &keys, |b, &keys| {
            let name = format!("Control{}", keys / 2);
            b.iter(|| registry.create_named(black_box(&name), Handle::borrowed(1), None))
        });
    }

    let registry = Arc::new(populated_registry(100));
    group.bench_function("contended_8_threads", |b| {
        b.iter(|| {
            let workers: Vec<_> = (0..8)
                .map(|t| {
                    let registry = registry.clone();
                    thread::spawn(move || {
                        (0..100)
                            .filter_map(|i| {
                                registry.create_named(&format!("Control{}", (i + t) % 100), Handle::borrowed(1), None)
                            })
                            .sum::<usize>()
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap_or(0)).sum::<usize>()
        })
    });

    group.finish();
}

fn bench_wrap_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("wrap_release");
    let bindings = probe_bindings();

    group.bench_function("wrap_dispose", |b| {
        let mut address = 0x1000usize;
        b.iter(|| {
            address += 1;
            let probe = bindings
                .wrap::<Probe>(Handle::owned(address), None)
                .expect("wrap")
                .expect("proxy");
            probe.peer.dispose().expect("dispose");
        })
    });

    group.bench_function("wrap_drop_reclaim", |b| {
        let mut address = 0x10_0000usize;
        b.iter(|| {
            for _ in 0..64 {
                address += 1;
                let probe = bindings.wrap::<Probe>(Handle::owned(address), None).expect("wrap");
                drop(black_box(probe));
            }
            bindings.peers().reclaim_pending().expect("reclaim")
        })
    });

    group.finish();
}

criterion_group!(benches, bench_spi_lookup, bench_wrap_release);
criterion_main!(benches);
