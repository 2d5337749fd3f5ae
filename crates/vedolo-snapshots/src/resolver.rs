//! Secondary resolution of listed items (receipts, contract reads)
//!
//! Units of work run on spawned tasks bounded by a semaphore. Workers only
//! return results; the calling task is the single writer of the cache and
//! persists it after every batch, so a crash loses at most one batch.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::cache::JsonCache;
use crate::error::{CacheError, SourceError};

/// Turns inputs into decoded outputs keyed by cache id
pub trait Resolver: Send + Sync + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    fn key(&self, input: &Self::Input) -> String;

    /// Inputs sent per upstream call (batched eth_call takes many)
    fn inputs_per_call(&self) -> usize {
        1
    }

    /// Resolve one unit. A key missing from the result, or mapped to `None`,
    /// counts as a failure for that input.
    fn resolve(
        &self,
        inputs: Vec<Self::Input>,
    ) -> impl Future<Output = Result<Vec<(String, Option<Self::Output>)>, SourceError>> + Send;
}

#[derive(Debug, Clone, Copy)]
pub struct PoolOptions {
    pub workers: usize,
    /// Units per committed batch
    pub batch_size: usize,
    pub batch_delay: Duration,
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ResolveStats {
    /// Inputs answered from the cache
    pub cached: usize,
    /// Inputs resolved this run
    pub fetched: usize,
    /// Inputs that failed this run (not cached, retried next run)
    pub errors: usize,
}

/// Run every unit on the pool and return per-key outcomes in input order
pub async fn run_pool<R: Resolver>(
    resolver: &Arc<R>,
    units: Vec<Vec<R::Input>>,
    workers: usize,
) -> Vec<(String, Option<R::Output>)> {
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut handles = Vec::with_capacity(units.len());

    for unit in units {
        let keys: Vec<String> = unit.iter().map(|input| resolver.key(input)).collect();
        let resolver = Arc::clone(resolver);
        let semaphore = Arc::clone(&semaphore);

        let handle = tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            resolver.resolve(unit).await
        });
        handles.push((keys, handle));
    }

    let mut results = Vec::new();
    for (keys, handle) in handles {
        let mut resolved: HashMap<String, Option<R::Output>> = match handle.await {
            Ok(Ok(outputs)) => outputs.into_iter().collect(),
            Ok(Err(e)) => {
                warn!(inputs = keys.len(), error = %e, "resolver unit failed");
                HashMap::new()
            }
            Err(e) => {
                warn!(inputs = keys.len(), error = %e, "resolver task panicked");
                HashMap::new()
            }
        };
        for key in keys {
            let output = resolved.remove(&key).flatten();
            results.push((key, output));
        }
    }
    results
}

/// Split inputs into per-call units, dropping repeated keys
fn into_units<R: Resolver>(resolver: &R, inputs: Vec<R::Input>) -> Vec<Vec<R::Input>> {
    let per_call = resolver.inputs_per_call().max(1);
    let mut seen = HashSet::new();
    let mut units: Vec<Vec<R::Input>> = Vec::new();

    for input in inputs {
        if !seen.insert(resolver.key(&input)) {
            continue;
        }
        match units.last_mut() {
            Some(unit) if unit.len() < per_call => unit.push(input),
            _ => units.push(vec![input]),
        }
    }
    units
}

/// Resolve every input whose key is not yet cached, committing to the cache
/// after each batch of units
pub async fn resolve_missing<R>(
    resolver: &Arc<R>,
    inputs: Vec<R::Input>,
    cache: &mut JsonCache<R::Output>,
    options: &PoolOptions,
) -> Result<ResolveStats, CacheError>
where
    R: Resolver,
    R::Output: Serialize + DeserializeOwned,
{
    let mut stats = ResolveStats::default();
    let mut seen = HashSet::new();
    let mut missing = Vec::new();

    for input in inputs {
        let key = resolver.key(&input);
        if !seen.insert(key.clone()) {
            continue;
        }
        if cache.contains(&key) {
            stats.cached += 1;
        } else {
            missing.push(input);
        }
    }

    let total = missing.len();
    info!(cached = stats.cached, to_fetch = total, "resolving uncached items");
    if total == 0 {
        return Ok(stats);
    }

    let mut units = into_units(resolver.as_ref(), missing).into_iter().peekable();
    let batch_size = options.batch_size.max(1);

    while units.peek().is_some() {
        let batch: Vec<Vec<R::Input>> = units.by_ref().take(batch_size).collect();

        for (key, output) in run_pool(resolver, batch, options.workers).await {
            match output {
                Some(record) => {
                    cache.put(key, record);
                    stats.fetched += 1;
                }
                None => stats.errors += 1,
            }
        }

        cache.persist()?;
        info!(
            done = stats.fetched + stats.errors,
            total,
            errors = stats.errors,
            "progress"
        );

        if units.peek().is_some() && !options.batch_delay.is_zero() {
            sleep(options.batch_delay).await;
        }
    }

    Ok(stats)
}

/// Resolve every input without consulting or writing any cache
pub async fn resolve_fresh<R: Resolver>(
    resolver: &Arc<R>,
    inputs: Vec<R::Input>,
    options: &PoolOptions,
) -> (HashMap<String, R::Output>, ResolveStats) {
    let mut stats = ResolveStats::default();
    let mut outputs = HashMap::new();
    let mut units = into_units(resolver.as_ref(), inputs).into_iter().peekable();
    let batch_size = options.batch_size.max(1);

    while units.peek().is_some() {
        let batch: Vec<Vec<R::Input>> = units.by_ref().take(batch_size).collect();
        for (key, output) in run_pool(resolver, batch, options.workers).await {
            match output {
                Some(value) => {
                    outputs.insert(key, value);
                    stats.fetched += 1;
                }
                None => stats.errors += 1,
            }
        }
        if units.peek().is_some() && !options.batch_delay.is_zero() {
            sleep(options.batch_delay).await;
        }
    }

    (outputs, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Doubles its input, failing for keys in `fail`
    struct Doubler {
        per_call: usize,
        fail: Mutex<HashSet<u64>>,
        calls: AtomicUsize,
        inputs_seen: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        hold: Duration,
    }

    impl Doubler {
        fn new(per_call: usize) -> Self {
            Self {
                per_call,
                fail: Mutex::new(HashSet::new()),
                calls: AtomicUsize::new(0),
                inputs_seen: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                hold: Duration::ZERO,
            }
        }
    }

    impl Resolver for Doubler {
        type Input = u64;
        type Output = f64;

        fn key(&self, input: &u64) -> String {
            input.to_string()
        }

        fn inputs_per_call(&self) -> usize {
            self.per_call
        }

        async fn resolve(
            &self,
            inputs: Vec<u64>,
        ) -> Result<Vec<(String, Option<f64>)>, SourceError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inputs_seen.fetch_add(inputs.len(), Ordering::SeqCst);
            if !self.hold.is_zero() {
                sleep(self.hold).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let fail = self.fail.lock().unwrap().clone();
            Ok(inputs
                .into_iter()
                .map(|i| (i.to_string(), (!fail.contains(&i)).then_some(i as f64 * 2.0)))
                .collect())
        }
    }

    fn options(workers: usize) -> PoolOptions {
        PoolOptions {
            workers,
            batch_size: 4,
            batch_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_cold_run_resolves_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = JsonCache::load(&dir.path().join("c.json")).unwrap();
        let resolver = Arc::new(Doubler::new(1));

        let stats = resolve_missing(&resolver, (1..=10).collect(), &mut cache, &options(3))
            .await
            .unwrap();

        assert_eq!(stats, ResolveStats { cached: 0, fetched: 10, errors: 0 });
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 10);
        assert_eq!(cache.get("7"), Some(&14.0));
    }

    #[tokio::test]
    async fn test_warm_run_resolves_only_missing_subset() {
        let dir = tempfile::tempdir().unwrap();
        let warm_path = dir.path().join("warm.json");
        let cold_path = dir.path().join("cold.json");

        let mut warm = JsonCache::load(&warm_path).unwrap();
        for i in [2u64, 4, 6] {
            warm.put(i.to_string(), i as f64 * 2.0);
        }
        warm.persist().unwrap();

        let resolver = Arc::new(Doubler::new(1));
        let stats = resolve_missing(&resolver, (1..=8).collect(), &mut warm, &options(2))
            .await
            .unwrap();
        assert_eq!(stats.cached, 3);
        assert_eq!(stats.fetched, 5);
        assert_eq!(resolver.inputs_seen.load(Ordering::SeqCst), 5);

        let mut cold = JsonCache::load(&cold_path).unwrap();
        resolve_missing(&Arc::new(Doubler::new(1)), (1..=8).collect(), &mut cold, &options(2))
            .await
            .unwrap();
        assert_eq!(
            std::fs::read(&warm_path).unwrap(),
            std::fs::read(&cold_path).unwrap()
        );
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.json");

        let mut cache = JsonCache::load(&path).unwrap();
        resolve_missing(&Arc::new(Doubler::new(1)), (1..=5).collect(), &mut cache, &options(2))
            .await
            .unwrap();
        let first = std::fs::read(&path).unwrap();

        let mut cache = JsonCache::load(&path).unwrap();
        let resolver = Arc::new(Doubler::new(1));
        let stats = resolve_missing(&resolver, (1..=5).collect(), &mut cache, &options(2))
            .await
            .unwrap();
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
        assert_eq!(stats.cached, 5);
        assert_eq!(std::fs::read(&path).unwrap(), first);
    }

    #[tokio::test]
    async fn test_failures_are_counted_and_retried_next_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = JsonCache::load(&dir.path().join("c.json")).unwrap();

        let flaky = Arc::new(Doubler::new(1));
        flaky.fail.lock().unwrap().insert(3);
        let stats = resolve_missing(&flaky, vec![1, 2, 3], &mut cache, &options(2))
            .await
            .unwrap();
        assert_eq!(stats.errors, 1);
        assert!(!cache.contains("3"));

        let healthy = Arc::new(Doubler::new(1));
        let stats = resolve_missing(&healthy, vec![1, 2, 3], &mut cache, &options(2))
            .await
            .unwrap();
        assert_eq!(stats.fetched, 1);
        assert_eq!(healthy.inputs_seen.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get("3"), Some(&6.0));
    }

    #[tokio::test]
    async fn test_batched_units_and_duplicate_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = JsonCache::load(&dir.path().join("c.json")).unwrap();
        let resolver = Arc::new(Doubler::new(3));

        let inputs = vec![1, 2, 2, 3, 4, 5, 6, 7, 7];
        let stats = resolve_missing(&resolver, inputs, &mut cache, &options(2))
            .await
            .unwrap();
        assert_eq!(stats.fetched, 7);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pool_respects_worker_bound() {
        let mut doubler = Doubler::new(1);
        doubler.hold = Duration::from_millis(20);
        let resolver = Arc::new(doubler);

        let units: Vec<Vec<u64>> = (0..12).map(|i| vec![i]).collect();
        let results = run_pool(&resolver, units, 2).await;

        assert_eq!(results.len(), 12);
        assert!(resolver.max_in_flight.load(Ordering::SeqCst) <= 2);
        let keys: Vec<String> = results.into_iter().map(|(k, _)| k).collect();
        let expected: Vec<String> = (0..12).map(|i: u64| i.to_string()).collect();
        assert_eq!(keys, expected);
    }

    #[tokio::test]
    async fn test_fresh_resolution_skips_cache() {
        let resolver = Arc::new(Doubler::new(2));
        resolver.fail.lock().unwrap().insert(5);
        let (outputs, stats) = resolve_fresh(&resolver, vec![1, 5, 9], &options(4)).await;
        assert_eq!(outputs.get("9"), Some(&18.0));
        assert!(!outputs.contains_key("5"));
        assert_eq!(stats.errors, 1);
    }
}
