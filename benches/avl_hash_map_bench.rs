use avl_hashmap::{AvlHashMap, EntryId, FnOps, StdOps};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use std::time::Duration;

fn lcg(mut s: u64) -> impl Iterator<Item = u64> {
    std::iter::from_fn(move || {
        s = s.wrapping_mul(6364136223846793005).wrapping_add(1);
        Some(s)
    })
}

fn key(n: u64) -> String {
    format!("k{:016x}", n)
}

fn filled(seed: u64, n: usize) -> AvlHashMap<String, u64> {
    let mut m = AvlHashMap::new();
    for (i, x) in lcg(seed).take(n).enumerate() {
        let _ = m.add(key(x), i as u64).unwrap();
    }
    m
}

fn bench_insert_fresh_100k(c: &mut Criterion) {
    c.bench_function("avl_map::insert_fresh_100k", |b| {
        b.iter_batched(
            AvlHashMap::<String, u64>::new,
            |mut m| {
                for (i, x) in lcg(1).take(100_000).enumerate() {
                    let _ = m.add(key(x), i as u64).unwrap();
                }
                black_box(m)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_insert_reserved_100k(c: &mut Criterion) {
    c.bench_function("avl_map::insert_reserved_100k", |b| {
        b.iter_batched(
            || AvlHashMap::<String, u64>::with_capacity_and_ops(100_000, StdOps::default()).unwrap(),
            |mut m| {
                for (i, x) in lcg(2).take(100_000).enumerate() {
                    let _ = m.add(key(x), i as u64).unwrap();
                }
                black_box(m)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_insert_warm_100k(c: &mut Criterion) {
    c.bench_function("avl_map::insert_warm_100k", |b| {
        b.iter_batched(
            || {
                // Pre-grow, then erase so the pool free-list is full.
                let mut m = filled(2, 110_000);
                let ids: Vec<EntryId> = m.iter().map(|(id, _, _)| id).collect();
                for id in ids {
                    m.erase(id);
                }
                m
            },
            |mut m| {
                for (i, x) in lcg(3).take(100_000).enumerate() {
                    let _ = m.add(key(x), i as u64).unwrap();
                }
                black_box(m)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_remove_random_10k(c: &mut Criterion) {
    c.bench_function("avl_map::remove_random_10k_of_110k", |b| {
        b.iter_batched(
            || {
                let m = filled(5, 110_000);
                let keys: Vec<String> = lcg(5).take(110_000).map(key).collect();
                // Precompute 10k unique indices via LCG
                let n = keys.len();
                let mut sel = std::collections::HashSet::with_capacity(10_000);
                let mut s = 0x9e3779b97f4a7c15u64;
                while sel.len() < 10_000 {
                    s = s.wrapping_mul(2862933555777941757).wrapping_add(3037000493);
                    sel.insert((s as usize) % n);
                }
                let to_remove: Vec<String> = sel.into_iter().map(|i| keys[i].clone()).collect();
                (m, to_remove)
            },
            |(mut m, to_remove)| {
                for k in &to_remove {
                    let _ = m.remove(k.as_str());
                }
                black_box(m)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_find_hit_and_miss_10k(c: &mut Criterion) {
    let m = filled(7, 100_000);
    let hits: Vec<String> = lcg(7).take(10_000).map(key).collect();
    let misses: Vec<String> = lcg(8).take(10_000).map(key).collect();
    c.bench_function("avl_map::find_hit_10k", |b| {
        b.iter(|| {
            let mut found = 0usize;
            for k in &hits {
                found += m.find(k.as_str()).is_some() as usize;
            }
            black_box(found)
        })
    });
    c.bench_function("avl_map::find_miss_10k", |b| {
        b.iter(|| {
            let mut found = 0usize;
            for k in &misses {
                found += m.find(k.as_str()).is_some() as usize;
            }
            black_box(found)
        })
    });
}

fn bench_degenerate_hash_10k(c: &mut Criterion) {
    // Every key in one bucket: lookups fall back to the AVL search.
    c.bench_function("avl_map::insert_find_const_hash_10k", |b| {
        b.iter_batched(
            || AvlHashMap::with_ops(FnOps::new(|_: &u64| 0, |a: &u64, b: &u64| a.cmp(b))),
            |mut m| {
                for x in lcg(11).take(10_000) {
                    let _ = m.add(x, x).unwrap();
                }
                let mut found = 0usize;
                for x in lcg(11).take(10_000) {
                    found += m.contains_key(&x) as usize;
                }
                black_box((m, found))
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_iter_100k(c: &mut Criterion) {
    let m = filled(999, 100_000);
    c.bench_function("avl_map::iter_all_100k", |b| {
        b.iter(|| {
            let mut sum = 0u64;
            for (_id, _k, v) in m.iter() {
                sum = sum.wrapping_add(*v);
            }
            black_box(sum)
        })
    });
}

fn bench_config() -> Criterion {
    Criterion::default()
        .sample_size(12)
        .measurement_time(Duration::from_secs(5))
        .warm_up_time(Duration::from_secs(1))
}

criterion_group! {
    name = benches_insert;
    config = bench_config();
    targets = bench_insert_fresh_100k, bench_insert_reserved_100k, bench_insert_warm_100k
}

criterion_group! {
    name = benches_ops;
    config = bench_config();
    targets = bench_remove_random_10k,
              bench_find_hit_and_miss_10k,
              bench_degenerate_hash_10k,
              bench_iter_100k
}

criterion_main!(benches_insert, benches_ops);
