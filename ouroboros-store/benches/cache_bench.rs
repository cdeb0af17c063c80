use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ouroboros_store::{
    new_id, BoundedCache, CachePolicy, Driver, LayeredStore, Post, SqlSettings, StoreOptions,
};
use std::hint::black_box;
use std::time::Duration;

fn bench_bounded_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("bounded_cache");

    for capacity in [1_000usize, 30_000] {
        let cache = BoundedCache::new("bench", capacity);
        for i in 0..capacity {
            cache.set(i, i);
        }

        group.bench_with_input(BenchmarkId::new("get_hit", capacity), &capacity, |b, &capacity| {
            let mut i = 0;
            b.iter(|| {
                i = (i + 7) % capacity;
                black_box(cache.get(&i));
            });
        });

        group.bench_with_input(BenchmarkId::new("set_evicting", capacity), &capacity, |b, &capacity| {
            let mut i = capacity;
            b.iter(|| {
                i += 1;
                cache.set(black_box(i), i);
            });
        });
    }

    group.finish();
}

fn bench_cached_read(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("build runtime");
    let dir = tempfile::TempDir::new().expect("temp dir");
    let settings = SqlSettings::builder()
        .driver(Driver::Sqlite)
        .data_source(format!("sqlite://{}?mode=rwc", dir.path().join("bench.db").display()))
        .max_open_conns(4)
        .max_idle_conns(1)
        .ping_retries(1, Duration::from_millis(10))
        .build();

    let (store, post) = rt.block_on(async {
        let store = LayeredStore::open_sql(&settings, CachePolicy::default(), StoreOptions::default())
            .await
            .expect("open store");
        let post = store
            .posts()
            .save(Post::new(new_id(), new_id(), "benchmark"))
            .await
            .expect("save post");
        (store, post)
    });

    c.bench_function("store/get_single_cached", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(store.posts().get_single(&post.id).await.expect("get post"));
        });
    });

    rt.block_on(store.close());
}

criterion_group!(benches, bench_bounded_cache, bench_cached_read);
criterion_main!(benches);
