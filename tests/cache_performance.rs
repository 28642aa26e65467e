//! Performance tests for the token cache
//!
//! These tests measure the throughput of the bounded LRU cache and of cache
//! hits through the broker, and check they stay well within interactive
//! budgets.
//!
//! Run with: cargo test --test cache_performance -- --nocapture

mod common;

use common::{setup, test_config};
use std::time::{Duration, Instant};
use turnstile_broker::{BrokerConfig, LruCache, TOKEN_TTL, TokenCache, TokenRecord};

const LARGE_DATASET_SIZE: usize = 10_000;
const SMALL_DATASET_SIZE: usize = 1_000;
const HOT_SET_SIZE: usize = 100;

/// Performance benchmark result
#[derive(Debug)]
pub struct BenchmarkResult {
    pub operation: String,
    pub duration: Duration,
    pub operations: usize,
    pub ops_per_sec: f64,
}

impl BenchmarkResult {
    pub fn new(operation: &str, duration: Duration, operations: usize) -> Self {
        let ops_per_sec = operations as f64 / duration.as_secs_f64().max(f64::EPSILON);
        Self {
            operation: operation.to_string(),
            duration,
            operations,
            ops_per_sec,
        }
    }

    pub fn print(&self) {
        println!(
            "  {}: {:?} ({:.0} ops/sec, {} ops)",
            self.operation, self.duration, self.ops_per_sec, self.operations
        );
    }

    pub fn assert_min_ops_per_sec(&self, min_ops: f64) {
        assert!(
            self.ops_per_sec >= min_ops,
            "{} should achieve at least {:.0} ops/sec, got {:.0}",
            self.operation,
            min_ops,
            self.ops_per_sec
        );
    }
}

/// Benchmark a closure and return the result
pub fn benchmark<F, R>(operation: &str, operations: usize, f: F) -> BenchmarkResult
where
    F: FnOnce() -> R,
{
    let start = Instant::now();
    let _ = f();
    let duration = start.elapsed();
    BenchmarkResult::new(operation, duration, operations)
}

fn record(i: usize) -> TokenRecord {
    TokenRecord::new(format!("token-{i}"), format!("action-{i}"), 1_000, 5, false)
}

#[test]
fn test_insert_with_eviction_performance() {
    let mut cache = TokenCache::new(10);

    let result = benchmark("insert with eviction", LARGE_DATASET_SIZE, || {
        for i in 0..LARGE_DATASET_SIZE {
            cache.insert(format!("action-{i}"), record(i));
        }
    });
    result.print();

    assert_eq!(cache.len(), 10);
    result.assert_min_ops_per_sec(10_000.0);
}

#[test]
fn test_lookup_performance() {
    let mut cache = LruCache::new(HOT_SET_SIZE);
    for i in 0..HOT_SET_SIZE {
        cache.insert(format!("action-{i}"), record(i));
    }

    let result = benchmark("get (promotes)", LARGE_DATASET_SIZE, || {
        let mut hits = 0;
        for i in 0..LARGE_DATASET_SIZE {
            if cache.get(&format!("action-{}", i % HOT_SET_SIZE)).is_some() {
                hits += 1;
            }
        }
        hits
    });
    result.print();
    result.assert_min_ops_per_sec(5_000.0);

    let result = benchmark("peek + validity check", LARGE_DATASET_SIZE, || {
        (0..LARGE_DATASET_SIZE)
            .filter(|i| {
                cache
                    .peek(&format!("action-{}", i % HOT_SET_SIZE))
                    .is_some_and(|record| record.is_valid(2_000, TOKEN_TTL))
            })
            .count()
    });
    result.print();
    result.assert_min_ops_per_sec(5_000.0);
}

#[test]
fn test_recency_order_under_churn() {
    let mut cache = LruCache::new(100);
    for i in 0..100 {
        cache.insert(i, i);
    }

    let start = Instant::now();
    for round in 0..SMALL_DATASET_SIZE {
        // Keep the even keys hot
        for key in (0..100).step_by(2) {
            cache.get(&key);
        }
        cache.insert(100 + round, round);
    }
    let elapsed = start.elapsed();
    println!("Recency churn: {elapsed:?} for {SMALL_DATASET_SIZE} rounds");

    // Every cold key was evicted, every hot key survived
    for key in (0..100).step_by(2) {
        assert!(cache.peek(&key).is_some(), "hot key {key} was evicted");
    }
    for key in (1..100).step_by(2) {
        assert!(cache.peek(&key).is_none(), "cold key {key} survived");
    }
    assert!(elapsed < Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_cached_token_throughput() {
    let fx = setup(BrokerConfig {
        consume_on_cache_hit: false,
        ..test_config()
    })
    .await;
    fx.broker.get_token("newsletter").await.unwrap();

    // Non-interactive tokens allow ten uses; re-prime the cache as it drains
    let rounds = SMALL_DATASET_SIZE / 10;
    let start = Instant::now();
    for _ in 0..rounds {
        fx.broker.clear_token("newsletter");
        fx.broker.get_token("newsletter").await.unwrap();
        for _ in 0..9 {
            fx.broker.get_token("newsletter").await.unwrap();
        }
    }
    let result = BenchmarkResult::new("get_token (cache hit)", start.elapsed(), rounds * 9);
    result.print();

    let analytics = fx.broker.analytics().await;
    assert_eq!(analytics.token_cache_hits as usize, rounds * 9);
    assert_eq!(analytics.challenges_completed as usize, rounds + 1);
}
