//! Integration tests for the bounded cache
//!
//! These tests cover:
//! - The LRU invariant under sustained inserts
//! - Promotion of hit entries
//! - TTL expiration and generations
//! - Statistics

use ouroboros_store::cache::{BoundedCache, CachePolicy, CacheSpec};
use std::time::Duration;

#[test]
fn test_capacity_two_scenario() {
    let cache = BoundedCache::new("scenario", 2);

    cache.set("A", 1);
    cache.set("B", 2);
    cache.set("C", 3);
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.get(&"A"), None);

    // Hit promotes B over C
    assert_eq!(cache.get(&"B"), Some(2));

    cache.set("D", 4);
    assert_eq!(cache.get(&"C"), None);
    assert_eq!(cache.keys(), vec!["D", "B"]);
    assert_eq!(cache.get(&"D"), Some(4));
    assert_eq!(cache.get(&"B"), Some(2));
}

#[test]
fn test_lru_invariant_holds_after_every_insert() {
    let capacity = 5;
    let cache = BoundedCache::new("invariant", capacity);

    for i in 0..50usize {
        cache.set(i, i * 10);

        let expected: Vec<usize> = (i.saturating_sub(capacity - 1)..=i).rev().collect();
        assert_eq!(cache.keys(), expected, "after inserting {}", i);
        assert!(cache.len() <= capacity);
    }

    assert_eq!(cache.stats().evictions_capacity, 45);
}

#[test]
fn test_hit_entry_outlives_older_keys() {
    let cache = BoundedCache::new("promotion", 3);
    cache.set("old1", 1);
    cache.set("old2", 2);
    cache.set("hot", 3);

    // "hot" is hit, then two new keys arrive
    assert_eq!(cache.get(&"hot"), Some(3));
    cache.set("new1", 4);
    cache.set("new2", 5);

    assert_eq!(cache.get(&"hot"), Some(3));
    assert_eq!(cache.get(&"old1"), None);
    assert_eq!(cache.get(&"old2"), None);
}

#[test]
fn test_ttl_expiration() {
    let cache = BoundedCache::new("ttl", 10);
    cache.set_with_ttl("short", 1, Duration::from_millis(20));
    cache.set("forever", 2);

    std::thread::sleep(Duration::from_millis(40));

    assert_eq!(cache.get(&"short"), None);
    assert_eq!(cache.get(&"forever"), Some(2));
    assert_eq!(cache.stats().evictions_ttl, 1);
}

#[test]
fn test_generation_bump_invalidates_without_clearing() {
    let cache = BoundedCache::new("generations", 10);
    cache.set("a", 1);
    cache.set("b", 2);

    cache.bump_generation();
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.get(&"a"), None);

    cache.set("a", 3);
    assert_eq!(cache.get(&"a"), Some(3));
    assert_eq!(cache.get(&"b"), None);
}

#[test]
fn test_policy_driven_cache() {
    let policy = CachePolicy::builder()
        .posts(CacheSpec::new(2, Some(Duration::from_secs(60))))
        .ttl_jitter(0.0)
        .build();
    assert!(policy.validate().is_ok());

    let cache = BoundedCache::from_spec("posts", &policy.posts, policy.ttl_jitter);
    assert_eq!(cache.capacity(), 2);

    cache.set("x".to_string(), 1);
    assert_eq!(cache.get(&"x".to_string()), Some(1));
}

#[test]
fn test_stats_track_hits_and_misses() {
    let cache = BoundedCache::new("stats", 4);
    cache.set(1, "one");

    cache.get(&1);
    cache.get(&1);
    cache.get(&2);

    let stats = cache.stats();
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.entries, 1);
    assert!((stats.hit_rate() - 200.0 / 3.0).abs() < 1e-9);
}

#[test]
fn test_concurrent_access() {
    use std::sync::Arc;

    let cache = Arc::new(BoundedCache::new("concurrent", 64));
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                for i in 0..1000 {
                    let key = (t * 1000 + i) % 128;
                    cache.set(key, i);
                    cache.get(&key);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(cache.len() <= 64);
}
