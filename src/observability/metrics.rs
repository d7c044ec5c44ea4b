use std::collections::HashMap;
use std::sync::Mutex;

/// Running latency aggregate: observation count and total seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencyStat {
    pub count: u64,
    pub total_seconds: f64,
}

impl LatencyStat {
    fn observe(&mut self, seconds: f64) {
        self.count += 1;
        self.total_seconds += seconds;
    }
}

#[derive(Debug, Clone, Default)]
struct Counters {
    query_requests: HashMap<(String, String), u64>,
    llm_calls: HashMap<String, u64>,
    llm_tokens: HashMap<String, u64>,
    llm_latency: HashMap<String, LatencyStat>,
    sql_rejected: HashMap<String, u64>,
    db_query_latency: LatencyStat,
    db_connections_active: HashMap<String, i64>,
    schema_cache_age_seconds: HashMap<String, f64>,
}

/// Process-wide metrics, constructed explicitly and passed by handle into
/// the pipeline. There is no global lookup: "one registry per process" is
/// whoever builds the process wiring exactly one instance.
///
/// The pipeline only writes; `snapshot` exists for exporters and tests.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    inner: Mutex<Counters>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One terminal status per request, labeled by outcome and database.
    pub fn record_query(&self, status: &str, database: &str) {
        let mut c = self.inner.lock().unwrap();
        *c.query_requests
            .entry((status.to_string(), database.to_string()))
            .or_insert(0) += 1;
    }

    pub fn record_llm_call(&self, operation: &str) {
        let mut c = self.inner.lock().unwrap();
        *c.llm_calls.entry(operation.to_string()).or_insert(0) += 1;
    }

    pub fn record_llm_tokens(&self, operation: &str, tokens: u64) {
        let mut c = self.inner.lock().unwrap();
        *c.llm_tokens.entry(operation.to_string()).or_insert(0) += tokens;
    }

    pub fn observe_llm_latency(&self, operation: &str, seconds: f64) {
        let mut c = self.inner.lock().unwrap();
        c.llm_latency
            .entry(operation.to_string())
            .or_default()
            .observe(seconds);
    }

    pub fn record_sql_rejected(&self, reason: &str) {
        let mut c = self.inner.lock().unwrap();
        *c.sql_rejected.entry(reason.to_string()).or_insert(0) += 1;
    }

    pub fn observe_db_latency(&self, seconds: f64) {
        self.inner.lock().unwrap().db_query_latency.observe(seconds);
    }

    /// Driven by whoever owns the connection pool, not by the pipeline:
    /// executor implementations report their pool state through this.
    pub fn set_db_connections_active(&self, database: &str, count: i64) {
        let mut c = self.inner.lock().unwrap();
        c.db_connections_active
            .insert(database.to_string(), count);
    }

    pub fn set_schema_cache_age(&self, database: &str, seconds: f64) {
        let mut c = self.inner.lock().unwrap();
        c.schema_cache_age_seconds
            .insert(database.to_string(), seconds);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self.inner.lock().unwrap().clone(),
        }
    }
}

/// Read-only copy of the registry state at one point in time.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    counters: Counters,
}

impl MetricsSnapshot {
    pub fn query_requests(&self, status: &str, database: &str) -> u64 {
        self.counters
            .query_requests
            .get(&(status.to_string(), database.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn llm_calls(&self, operation: &str) -> u64 {
        self.counters.llm_calls.get(operation).copied().unwrap_or(0)
    }

    pub fn llm_tokens(&self, operation: &str) -> u64 {
        self.counters
            .llm_tokens
            .get(operation)
            .copied()
            .unwrap_or(0)
    }

    pub fn llm_latency(&self, operation: &str) -> LatencyStat {
        self.counters
            .llm_latency
            .get(operation)
            .copied()
            .unwrap_or_default()
    }

    pub fn sql_rejected(&self, reason: &str) -> u64 {
        self.counters.sql_rejected.get(reason).copied().unwrap_or(0)
    }

    pub fn db_query_latency(&self) -> LatencyStat {
        self.counters.db_query_latency
    }

    pub fn db_connections_active(&self, database: &str) -> Option<i64> {
        self.counters.db_connections_active.get(database).copied()
    }

    pub fn schema_cache_age_seconds(&self, database: &str) -> Option<f64> {
        self.counters
            .schema_cache_age_seconds
            .get(database)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_statuses_tracked_independently() {
        let metrics = MetricsRegistry::new();
        metrics.record_query("success", "testdb");
        metrics.record_query("error", "testdb");
        metrics.record_query("validation_failed", "testdb");
        metrics.record_query("success", "testdb");

        let snap = metrics.snapshot();
        assert_eq!(snap.query_requests("success", "testdb"), 2);
        assert_eq!(snap.query_requests("error", "testdb"), 1);
        assert_eq!(snap.query_requests("validation_failed", "testdb"), 1);
        assert_eq!(snap.query_requests("security_violation", "testdb"), 0);
    }

    #[test]
    fn llm_operations_tracked_independently() {
        let metrics = MetricsRegistry::new();
        metrics.record_llm_call("generate_sql");
        metrics.record_llm_call("validate_result");
        metrics.record_llm_tokens("generate_sql", 150);
        metrics.record_llm_tokens("generate_sql", 200);

        let snap = metrics.snapshot();
        assert_eq!(snap.llm_calls("generate_sql"), 1);
        assert_eq!(snap.llm_calls("validate_result"), 1);
        assert_eq!(snap.llm_tokens("generate_sql"), 350);
        assert_eq!(snap.llm_tokens("validate_result"), 0);
    }

    #[test]
    fn latency_aggregates_count_and_total() {
        let metrics = MetricsRegistry::new();
        metrics.observe_llm_latency("generate_sql", 1.5);
        metrics.observe_llm_latency("generate_sql", 2.5);
        metrics.observe_db_latency(0.05);

        let snap = metrics.snapshot();
        let llm = snap.llm_latency("generate_sql");
        assert_eq!(llm.count, 2);
        assert!((llm.total_seconds - 4.0).abs() < f64::EPSILON);
        assert_eq!(snap.db_query_latency().count, 1);
    }

    #[test]
    fn rejection_reasons_tracked_independently() {
        let metrics = MetricsRegistry::new();
        metrics.record_sql_rejected("ddl_detected");
        metrics.record_sql_rejected("blocked_function");
        metrics.record_sql_rejected("ddl_detected");

        let snap = metrics.snapshot();
        assert_eq!(snap.sql_rejected("ddl_detected"), 2);
        assert_eq!(snap.sql_rejected("blocked_function"), 1);
        assert_eq!(snap.sql_rejected("blocked_table"), 0);
    }

    #[test]
    fn gauges_hold_latest_value_per_database() {
        let metrics = MetricsRegistry::new();
        metrics.set_db_connections_active("db1", 3);
        metrics.set_db_connections_active("db1", 5);
        metrics.set_db_connections_active("db2", 7);
        metrics.set_schema_cache_age("db1", 100.0);
        metrics.set_schema_cache_age("db1", 300.0);

        let snap = metrics.snapshot();
        assert_eq!(snap.db_connections_active("db1"), Some(5));
        assert_eq!(snap.db_connections_active("db2"), Some(7));
        assert_eq!(snap.schema_cache_age_seconds("db1"), Some(300.0));
        assert_eq!(snap.schema_cache_age_seconds("db2"), None);
    }

    #[test]
    fn registry_is_shareable_across_threads() {
        let metrics = std::sync::Arc::new(MetricsRegistry::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let m = metrics.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        m.record_query("success", "testdb");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(metrics.snapshot().query_requests("success", "testdb"), 400);
    }
}
