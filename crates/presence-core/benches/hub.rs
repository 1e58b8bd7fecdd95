//! Presence hub benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use presence_hub_core::{
    DomainRouter, MemoryCapabilitiesStore, PresenceHub, Registry, PresenceEntry, StanzaSender,
};
use presence_protocol::{Jid, Presence, Stanza};
use std::sync::Arc;

struct NullRouter;

impl StanzaSender for NullRouter {
    fn send(&self, stanza: Stanza) {
        black_box(stanza);
    }
}

impl DomainRouter for NullRouter {
    fn domain(&self) -> &str {
        "jackal.im"
    }
}

fn presence(user: usize, resource: usize) -> Presence {
    let jid = Jid::parse(&format!("user{user}@jackal.im/res{resource}")).unwrap();
    Presence::available(jid.clone(), jid)
}

/// Benchmark registry writes and bare-JID reads.
fn bench_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");

    group.bench_function("register_replace", |b| {
        let registry = Registry::new();
        let entry = PresenceEntry::new(presence(0, 0));
        b.iter(|| registry.register(black_box(entry.clone())));
    });

    for resources in [1, 5, 20] {
        let registry = Registry::new();
        for r in 0..resources {
            registry.register(PresenceEntry::new(presence(0, r)));
        }
        let bare = Jid::parse("user0@jackal.im").unwrap();

        group.bench_with_input(BenchmarkId::new("match_bare", resources), &bare, |b, bare| {
            b.iter(|| registry.match_address(black_box(bare)))
        });
    }

    group.finish();
}

/// Benchmark end-to-end registration through the hub.
fn bench_hub_register(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let hub = PresenceHub::new(Arc::new(NullRouter), Arc::new(MemoryCapabilitiesStore::new())).unwrap();

    let mut i = 0usize;
    c.bench_function("hub_register_presence", |b| {
        b.iter(|| {
            i += 1;
            runtime
                .block_on(hub.register_presence(presence(i % 1000, i % 3)))
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_registry, bench_hub_register);
criterion_main!(benches);
