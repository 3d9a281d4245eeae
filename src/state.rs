//! The State Store (spec.md §4.5): node results, scoped variables, caches,
//! counters, and the wall-clock deadline/cancellation signal shared by every
//! node in one execution.
//!
//! Built around a read-many/write-one concurrency shape, split from a
//! single `Arc<RwLock<_>>` blob into per-concern locks (results, variables,
//! caches) so unrelated nodes don't contend on the same mutex.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tokio::sync::Mutex as AsyncMutex;

use crate::config::EngineConfig;
use crate::value::Value;

/// Variable scope tag (spec.md §4.5 "Variables"). `Workflow` is the scope the
/// core engine writes to on every node completion; `Local` and `Global` are
/// exposed for node kinds (`variable`, `accumulator`) that ask for them
/// explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarScope {
    Workflow,
    Local,
    Global,
}

/// Eviction policy for one cache region, set per `cache` node (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    Lru,
    Lfu,
    Ttl,
}

struct CacheEntry {
    value: Value,
    inserted_at: Instant,
    ttl: Option<Duration>,
    hits: u64,
    last_accessed: Instant,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.ttl.map(|ttl| self.inserted_at.elapsed() > ttl).unwrap_or(false)
    }
}

/// One bounded, TTL-aware cache region, keyed by cache-node id.
pub(crate) struct CacheRegion {
    policy: EvictionPolicy,
    max_size: usize,
    entries: FxHashMap<String, CacheEntry>,
}

impl CacheRegion {
    fn new(policy: EvictionPolicy, max_size: usize) -> Self {
        Self { policy, max_size, entries: FxHashMap::default() }
    }

    fn get(&mut self, key: &str) -> Option<Value> {
        let expired = self.entries.get(key).map(CacheEntry::is_expired).unwrap_or(false);
        if expired {
            self.entries.remove(key);
            return None;
        }
        if let Some(entry) = self.entries.get_mut(key) {
            entry.hits += 1;
            entry.last_accessed = Instant::now();
            Some(entry.value.clone())
        } else {
            None
        }
    }

    fn insert(&mut self, key: String, value: Value, ttl: Option<Duration>) {
        if self.entries.len() >= self.max_size && !self.entries.contains_key(&key) {
            self.evict_one();
        }
        let now = Instant::now();
        self.entries.insert(key, CacheEntry { value, inserted_at: now, ttl, hits: 0, last_accessed: now });
    }

    fn evict_one(&mut self) {
        let victim = match self.policy {
            EvictionPolicy::Lru => self.entries.iter().min_by_key(|(_, e)| e.last_accessed).map(|(k, _)| k.clone()),
            EvictionPolicy::Lfu => self.entries.iter().min_by_key(|(_, e)| e.hits).map(|(k, _)| k.clone()),
            EvictionPolicy::Ttl => self.entries.iter().min_by_key(|(_, e)| e.inserted_at).map(|(k, _)| k.clone()),
        };
        if let Some(k) = victim {
            self.entries.remove(&k);
        }
    }
}

/// Per-call coalescing guard: concurrent lookups of the same not-yet-cached
/// key wait on the first caller's computation instead of all recomputing
/// (spec.md §9 Open Question — cache/parallel-region interaction, resolved
/// here as singleflight; see `DESIGN.md`).
type SingleflightMap = Mutex<FxHashMap<String, Arc<AsyncMutex<()>>>>;

/// Fixed-window token count for one `rate_limiter` key.
struct RateLimiterWindow {
    window_start: Instant,
    count: u64,
}

/// Everything one *execution* shares across every nested subgraph scope:
/// variables, caches, counters, the deadline, and the cancellation flag.
/// A loop/parallel/try-catch/retry body gets its own [`StateStore`] (its own
/// node-id namespace, satisfying invariant 3 — "a node executes at most once
/// per run" — per *iteration*) while still reading and writing this same
/// shared core, so a counter bumped inside a loop body is visible to the
/// next iteration and to the parent scope once the loop node completes.
struct SharedState {
    variables: RwLock<FxHashMap<(VarScope, String), Value>>,
    /// Shared across concurrent `Execute` calls in the same process (spec.md
    /// §9 Open Question — resolved as a process-wide mutex rather than a
    /// per-call snapshot; see `DESIGN.md`).
    global_variables: Arc<RwLock<FxHashMap<String, Value>>>,
    caches: Mutex<FxHashMap<String, CacheRegion>>,
    /// Shared across every `execute` call on the owning `Engine` (spec.md §5
    /// "unless a Cache node declares `storage=process`, in which case a
    /// process-scoped concurrent map is used").
    process_caches: Arc<AsyncMutex<FxHashMap<String, CacheRegion>>>,
    singleflight: SingleflightMap,
    loop_iterations: Mutex<FxHashMap<String, u64>>,
    /// `rate_limiter` node state, scoped to this execution (spec.md §6
    /// "rate_limiter"); keyed by the node's resolved `key` expression.
    rate_limiters: Mutex<FxHashMap<String, RateLimiterWindow>>,
    http_calls: AtomicU64,
    node_executions: AtomicU64,
    cancelled: Arc<AtomicBool>,
    deadline: Instant,
    config: EngineConfig,
}

/// An external handle to cancel one in-flight execution (spec.md §5
/// "External cancel invoked from the caller propagates identically to
/// timeout"). Cheaply cloneable; cancelling through any clone cancels the
/// execution it was built alongside via [`StateStore::new`].
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Thread-safe state for one execution scope — the top-level run, or one
/// loop iteration / parallel branch / try-catch region's own subgraph.
/// Cheaply cloneable (`Arc` inside).
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<StateInner>,
}

struct StateInner {
    result_order: RwLock<Vec<String>>,
    results: RwLock<FxHashMap<String, Value>>,
    shared: Arc<SharedState>,
}

impl StateStore {
    pub fn new(
        config: EngineConfig,
        global_variables: Arc<RwLock<FxHashMap<String, Value>>>,
        process_caches: Arc<AsyncMutex<FxHashMap<String, CacheRegion>>>,
        cancel: CancelToken,
    ) -> Self {
        let deadline = Instant::now() + config.max_execution_time;
        let shared = Arc::new(SharedState {
            variables: RwLock::new(FxHashMap::default()),
            global_variables,
            caches: Mutex::new(FxHashMap::default()),
            process_caches,
            singleflight: Mutex::new(FxHashMap::default()),
            loop_iterations: Mutex::new(FxHashMap::default()),
            rate_limiters: Mutex::new(FxHashMap::default()),
            http_calls: AtomicU64::new(0),
            node_executions: AtomicU64::new(0),
            cancelled: cancel.0,
            deadline,
            config,
        });
        Self::with_shared(shared)
    }

    fn with_shared(shared: Arc<SharedState>) -> Self {
        Self {
            inner: Arc::new(StateInner {
                result_order: RwLock::new(Vec::new()),
                results: RwLock::new(FxHashMap::default()),
                shared,
            }),
        }
    }

    /// A fresh node-id namespace (its own `results`/`result_order`) backed
    /// by the same shared variables/caches/counters/deadline — one per loop
    /// iteration, parallel branch, or try/catch/finally region (spec.md
    /// §4.6 "Execute the body subgraph with the loop's scope pushed onto the
    /// State Store").
    pub fn child_scope(&self) -> StateStore {
        Self::with_shared(self.inner.shared.clone())
    }

    // --- Node results ---------------------------------------------------

    pub fn set_result(&self, node_id: impl Into<String>, value: Value) {
        let node_id = node_id.into();
        let mut results = self.inner.results.write();
        if !results.contains_key(&node_id) {
            self.inner.result_order.write().push(node_id.clone());
        }
        results.insert(node_id, value);
    }

    pub fn get_result(&self, node_id: &str) -> Option<Value> {
        self.inner.results.read().get(node_id).cloned()
    }

    pub fn all_results(&self) -> FxHashMap<String, Value> {
        self.inner.results.read().clone()
    }

    /// Results in the order their owning nodes first completed — used to
    /// derive the default `final_output` (spec.md §3 "last node's result").
    pub fn results_in_order(&self) -> Vec<(String, Value)> {
        let order = self.inner.result_order.read();
        let results = self.inner.results.read();
        order.iter().filter_map(|id| results.get(id).map(|v| (id.clone(), v.clone()))).collect()
    }

    // --- Variables --------------------------------------------------------

    pub fn set_variable(&self, scope: VarScope, name: impl Into<String>, value: Value) {
        let name = name.into();
        match scope {
            VarScope::Global => {
                self.inner.shared.global_variables.write().insert(name, value);
            }
            scope => {
                self.inner.shared.variables.write().insert((scope, name), value);
            }
        }
    }

    /// Resolution order: `Local`, then `Workflow`, then `Global`
    /// (spec.md §4.1 `variables.<name>` root — most specific scope wins).
    pub fn get_variable(&self, name: &str) -> Option<Value> {
        let vars = self.inner.shared.variables.read();
        if let Some(v) = vars.get(&(VarScope::Local, name.to_string())) {
            return Some(v.clone());
        }
        if let Some(v) = vars.get(&(VarScope::Workflow, name.to_string())) {
            return Some(v.clone());
        }
        self.inner.shared.global_variables.read().get(name).cloned()
    }

    pub fn all_variables_flat(&self) -> FxHashMap<String, Value> {
        let mut out = self.inner.shared.global_variables.read().clone();
        for ((scope, name), value) in self.inner.shared.variables.read().iter() {
            if matches!(scope, VarScope::Workflow | VarScope::Local) {
                out.insert(name.clone(), value.clone());
            }
        }
        out
    }

    // --- Caches -------------------------------------------------------------

    fn singleflight_lock(&self, cache_id: &str, key: &str) -> Arc<AsyncMutex<()>> {
        let mut table = self.inner.shared.singleflight.lock();
        table
            .entry(format!("{cache_id}:{key}"))
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Look up `key` in `cache_id`'s region, or compute and insert it.
    /// Concurrent callers racing the same miss coalesce onto one computation.
    pub async fn cache_get_or_insert<F, Fut>(
        &self,
        cache_id: &str,
        policy: EvictionPolicy,
        max_size: usize,
        key: &str,
        ttl: Option<Duration>,
        compute: F,
    ) -> Value
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Value>,
    {
        if let Some(hit) = self.cache_get(cache_id, key) {
            return hit;
        }
        let lock = self.singleflight_lock(cache_id, key);
        let _guard = lock.lock().await;
        if let Some(hit) = self.cache_get(cache_id, key) {
            return hit;
        }
        let value = compute().await;
        self.cache_insert(cache_id, policy, max_size, key, value.clone(), ttl);
        value
    }

    pub fn cache_get(&self, cache_id: &str, key: &str) -> Option<Value> {
        let mut caches = self.inner.shared.caches.lock();
        caches.get_mut(cache_id).and_then(|region| region.get(key))
    }

    pub fn cache_insert(
        &self,
        cache_id: &str,
        policy: EvictionPolicy,
        max_size: usize,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) {
        let mut caches = self.inner.shared.caches.lock();
        let region = caches.entry(cache_id.to_string()).or_insert_with(|| CacheRegion::new(policy, max_size));
        region.insert(key.to_string(), value, ttl);
    }

    /// Process-scoped counterpart of [`Self::cache_get_or_insert`], shared by
    /// every `Engine::execute` call rather than scoped to this one. Not
    /// singleflight-coalesced: two concurrent executions racing the same
    /// miss may both compute once, which is an acceptable trade for not
    /// holding an async lock across an arbitrary caller-supplied future.
    pub async fn process_cache_get_or_insert<F, Fut>(
        &self,
        cache_id: &str,
        policy: EvictionPolicy,
        max_size: usize,
        key: &str,
        ttl: Option<Duration>,
        compute: F,
    ) -> Value
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Value>,
    {
        {
            let mut caches = self.inner.shared.process_caches.lock().await;
            let region = caches.entry(cache_id.to_string()).or_insert_with(|| CacheRegion::new(policy, max_size));
            if let Some(hit) = region.get(key) {
                return hit;
            }
        }
        let value = compute().await;
        let mut caches = self.inner.shared.process_caches.lock().await;
        let region = caches.entry(cache_id.to_string()).or_insert_with(|| CacheRegion::new(policy, max_size));
        region.insert(key.to_string(), value.clone(), ttl);
        value
    }

    // --- Counters & limits --------------------------------------------------

    pub fn record_http_call(&self) -> Result<(), crate::error::EngineError> {
        let n = self.inner.shared.http_calls.fetch_add(1, Ordering::Relaxed) + 1;
        if n > self.inner.shared.config.max_http_calls_per_exec {
            return Err(crate::error::EngineError::LimitExceeded { kind: "max_http_calls_per_exec" });
        }
        Ok(())
    }

    pub fn record_node_execution(&self) -> Result<(), crate::error::EngineError> {
        let n = self.inner.shared.node_executions.fetch_add(1, Ordering::Relaxed) + 1;
        if n > self.inner.shared.config.max_node_executions {
            return Err(crate::error::EngineError::LimitExceeded { kind: "max_node_executions" });
        }
        Ok(())
    }

    pub fn record_loop_iteration(&self, loop_node_id: &str) -> Result<u64, crate::error::EngineError> {
        let mut iterations = self.inner.shared.loop_iterations.lock();
        let count = iterations.entry(loop_node_id.to_string()).or_insert(0);
        *count += 1;
        if *count > self.inner.shared.config.max_loop_iterations {
            return Err(crate::error::EngineError::LimitExceeded { kind: "max_loop_iterations" });
        }
        Ok(*count)
    }

    /// Fixed-window rate limit check for `key`: if the current window still
    /// has room, consumes one slot and returns `Duration::ZERO`; otherwise
    /// returns how long the caller should wait before the window resets.
    /// Shared across every scope of one execution, so a limiter inside a
    /// loop body throttles across iterations rather than per-iteration.
    pub fn rate_limit_acquire(&self, key: &str, max_per_interval: u64, interval: Duration) -> Duration {
        let mut limiters = self.inner.shared.rate_limiters.lock();
        let now = Instant::now();
        let window = limiters.entry(key.to_string()).or_insert_with(|| RateLimiterWindow { window_start: now, count: 0 });
        if now.duration_since(window.window_start) >= interval {
            window.window_start = now;
            window.count = 0;
        }
        if window.count < max_per_interval {
            window.count += 1;
            Duration::ZERO
        } else {
            interval.saturating_sub(now.duration_since(window.window_start))
        }
    }

    pub fn node_execution_count(&self) -> u64 {
        self.inner.shared.node_executions.load(Ordering::Relaxed)
    }

    pub fn http_call_count(&self) -> u64 {
        self.inner.shared.http_calls.load(Ordering::Relaxed)
    }

    // --- Deadline & cancellation --------------------------------------------

    pub fn deadline(&self) -> Instant {
        self.inner.shared.deadline
    }

    pub fn time_remaining(&self) -> Duration {
        self.inner.shared.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        Instant::now() >= self.inner.shared.deadline
    }

    pub fn cancel(&self) {
        self.inner.shared.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.shared.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the matching error if the run should stop now, either because
    /// it was cancelled or because the wall-clock deadline has passed.
    pub fn check_liveness(&self) -> Result<(), crate::error::EngineError> {
        if self.is_cancelled() {
            return Err(crate::error::EngineError::Cancelled);
        }
        if self.is_deadline_exceeded() {
            return Err(crate::error::EngineError::WorkflowTimeout {
                limit_secs: self.inner.shared.config.max_execution_time.as_secs_f64(),
            });
        }
        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.shared.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> StateStore {
        StateStore::new(
            EngineConfig::default(),
            Arc::new(RwLock::new(FxHashMap::default())),
            Arc::new(AsyncMutex::new(FxHashMap::default())),
            CancelToken::new(),
        )
    }

    #[test]
    fn results_preserve_insertion_order() {
        let s = store();
        s.set_result("b", Value::Number(2.0));
        s.set_result("a", Value::Number(1.0));
        let order: Vec<_> = s.results_in_order().into_iter().map(|(id, _)| id).collect();
        assert_eq!(order, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn variable_scope_resolution_prefers_local_then_workflow_then_global() {
        let s = store();
        s.set_variable(VarScope::Global, "x", Value::Number(1.0));
        assert_eq!(s.get_variable("x"), Some(Value::Number(1.0)));
        s.set_variable(VarScope::Workflow, "x", Value::Number(2.0));
        assert_eq!(s.get_variable("x"), Some(Value::Number(2.0)));
        s.set_variable(VarScope::Local, "x", Value::Number(3.0));
        assert_eq!(s.get_variable("x"), Some(Value::Number(3.0)));
    }

    #[test]
    fn loop_iteration_limit_triggers_error() {
        let cfg = EngineConfig::default().with_max_loop_iterations(2);
        let s = StateStore::new(
            cfg,
            Arc::new(RwLock::new(FxHashMap::default())),
            Arc::new(AsyncMutex::new(FxHashMap::default())),
            CancelToken::new(),
        );
        assert!(s.record_loop_iteration("loop1").is_ok());
        assert!(s.record_loop_iteration("loop1").is_ok());
        assert!(s.record_loop_iteration("loop1").is_err());
    }

    #[tokio::test]
    async fn cache_coalesces_concurrent_misses() {
        let s = store();
        let calls = Arc::new(AtomicU64::new(0));
        let c = calls.clone();
        let v = s
            .cache_get_or_insert("c1", EvictionPolicy::Lru, 10, "k", None, || async move {
                c.fetch_add(1, Ordering::SeqCst);
                Value::Number(42.0)
            })
            .await;
        assert_eq!(v, Value::Number(42.0));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let c2 = calls.clone();
        let v2 = s
            .cache_get_or_insert("c1", EvictionPolicy::Lru, 10, "k", None, || async move {
                c2.fetch_add(1, Ordering::SeqCst);
                Value::Number(99.0)
            })
            .await;
        assert_eq!(v2, Value::Number(42.0));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn process_cache_is_visible_across_independent_state_stores() {
        let process_caches = Arc::new(AsyncMutex::new(FxHashMap::default()));
        let a = StateStore::new(
            EngineConfig::default(),
            Arc::new(RwLock::new(FxHashMap::default())),
            process_caches.clone(),
            CancelToken::new(),
        );
        let b = StateStore::new(EngineConfig::default(), Arc::new(RwLock::new(FxHashMap::default())), process_caches, CancelToken::new());

        let v = a.process_cache_get_or_insert("p1", EvictionPolicy::Lru, 10, "k", None, || async { Value::Number(1.0) }).await;
        assert_eq!(v, Value::Number(1.0));
        let v2 = b.process_cache_get_or_insert("p1", EvictionPolicy::Lru, 10, "k", None, || async { Value::Number(2.0) }).await;
        assert_eq!(v2, Value::Number(1.0), "a fresh StateStore sharing the same process-cache handle sees the prior write");
    }

    #[test]
    fn rate_limiter_blocks_once_window_is_exhausted() {
        let s = store();
        assert_eq!(s.rate_limit_acquire("k", 2, Duration::from_secs(60)), Duration::ZERO);
        assert_eq!(s.rate_limit_acquire("k", 2, Duration::from_secs(60)), Duration::ZERO);
        assert!(s.rate_limit_acquire("k", 2, Duration::from_secs(60)) > Duration::ZERO);
        assert_eq!(s.rate_limit_acquire("other", 2, Duration::from_secs(60)), Duration::ZERO);
    }

    #[test]
    fn lru_eviction_drops_least_recently_used() {
        let mut region = CacheRegion::new(EvictionPolicy::Lru, 2);
        region.insert("a".into(), Value::Number(1.0), None);
        region.insert("b".into(), Value::Number(2.0), None);
        assert!(region.get("a").is_some());
        region.insert("c".into(), Value::Number(3.0), None);
        assert!(region.get("b").is_none());
        assert!(region.get("a").is_some());
        assert!(region.get("c").is_some());
    }
}
