//! Per-node request statistics
//!
//! Records per (node, method) request counts and cumulative latency, plus a
//! per-node error count that is independent of the health counters. Every
//! recorded request is also emitted through the `metrics` facade:
//!
//! - `pool_requests_total` (counter): labels `node`, `method`
//! - `pool_request_duration_seconds` (histogram): labels `node`, `method`
//! - `pool_request_errors_total` (counter): labels `node`, `method`
//!
//! Snapshots are plain values; nothing returned here aliases live counters.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use transport::{Method, TransportError};

use crate::error::{Error, Result};

/// What the statistics callback sees for every completed request.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub address: String,
    pub method: Method,
    pub elapsed: Duration,
    pub error: Option<TransportError>,
}

/// Hook invoked after each recorded request.
pub type StatisticCallback = Arc<dyn Fn(&RequestInfo) + Send + Sync>;

/// Request count and total latency of one method on one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSnapshot {
    pub method: Method,
    pub all_requests: u64,
    pub all_time: Duration,
}

impl MethodSnapshot {
    /// Mean latency, zero when nothing was recorded.
    pub fn average(&self) -> Duration {
        if self.all_requests == 0 {
            return Duration::ZERO;
        }
        let nanos = self.all_time.as_nanos() / u128::from(self.all_requests);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

/// Counters of one node at snapshot time.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeStatistic {
    pub address: String,
    /// Health-affecting errors since the last health transition.
    pub current_errors: u64,
    /// Health-affecting errors since the pool was created.
    pub overall_errors: u64,
    /// Requests that ended in any error, as seen by the collector.
    pub request_errors: u64,
    pub methods: Vec<MethodSnapshot>,
}

impl NodeStatistic {
    pub fn method(&self, method: Method) -> Option<&MethodSnapshot> {
        self.methods.iter().find(|m| m.method == method)
    }

    /// Mean latency of `method`, zero if it was never called.
    pub fn average(&self, method: Method) -> Duration {
        self.method(method)
            .map(MethodSnapshot::average)
            .unwrap_or_default()
    }
}

/// Pool-wide statistics snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statistic {
    /// Sum of every node's overall health error count.
    pub overall_errors: u64,
    pub nodes: Vec<NodeStatistic>,
}

impl Statistic {
    pub fn node(&self, address: &str) -> Result<&NodeStatistic> {
        self.nodes
            .iter()
            .find(|n| n.address == address)
            .ok_or_else(|| Error::NodeNotFound(address.to_string()))
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct MethodStats {
    requests: u64,
    total: Duration,
}

#[derive(Debug, Default)]
struct NodeStats {
    errors: AtomicU64,
    methods: Mutex<BTreeMap<Method, MethodStats>>,
}

/// Thread-safe collector keyed by node address.
#[derive(Default)]
pub struct StatsCollector {
    nodes: RwLock<HashMap<String, Arc<NodeStats>>>,
    callback: Option<StatisticCallback>,
}

impl StatsCollector {
    pub fn new(callback: Option<StatisticCallback>) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            callback,
        }
    }

    /// Record one request outcome.
    ///
    /// A zero `elapsed` records only the error (used for dial failures, which
    /// are not requests).
    pub fn record(
        &self,
        address: &str,
        method: Method,
        elapsed: Duration,
        error: Option<&TransportError>,
    ) {
        let node = self.node_stats(address);

        if error.is_some() {
            node.errors.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(
                "pool_request_errors_total",
                "node" => address.to_string(),
                "method" => method.as_str()
            )
            .increment(1);
        }

        if elapsed.is_zero() {
            return;
        }

        {
            let mut methods = node
                .methods
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let entry = methods.entry(method).or_default();
            entry.requests += 1;
            entry.total += elapsed;
        }

        metrics::counter!(
            "pool_requests_total",
            "node" => address.to_string(),
            "method" => method.as_str()
        )
        .increment(1);
        metrics::histogram!(
            "pool_request_duration_seconds",
            "node" => address.to_string(),
            "method" => method.as_str()
        )
        .record(elapsed.as_secs_f64());

        if let Some(callback) = &self.callback {
            callback(&RequestInfo {
                address: address.to_string(),
                method,
                elapsed,
                error: error.cloned(),
            });
        }
    }

    /// Errors recorded for `address`.
    pub fn errors(&self, address: &str) -> u64 {
        self.existing(address)
            .map(|n| n.errors.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Per-method snapshots for `address`, ordered by method.
    pub fn methods(&self, address: &str) -> Vec<MethodSnapshot> {
        let Some(node) = self.existing(address) else {
            return Vec::new();
        };
        let methods = node
            .methods
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        methods
            .iter()
            .map(|(method, stats)| MethodSnapshot {
                method: *method,
                all_requests: stats.requests,
                all_time: stats.total,
            })
            .collect()
    }

    fn existing(&self, address: &str) -> Option<Arc<NodeStats>> {
        self.nodes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(address)
            .cloned()
    }

    fn node_stats(&self, address: &str) -> Arc<NodeStats> {
        if let Some(node) = self.existing(address) {
            return node;
        }
        self.nodes
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(address.to_string())
            .or_default()
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
    use transport::Status;

    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn three_calls_average_to_hundred_millis() {
        let stats = StatsCollector::new(None);
        for ms in [100, 150, 50] {
            stats.record("s01:8080", Method::ObjectGet, Duration::from_millis(ms), None);
        }

        let methods = stats.methods("s01:8080");
        assert_eq!(methods.len(), 1);
        assert_eq!(methods[0].all_requests, 3);
        assert_eq!(methods[0].all_time, Duration::from_millis(300));
        assert_eq!(methods[0].average(), Duration::from_millis(100));
        assert_eq!(stats.errors("s01:8080"), 0);
    }

    #[test]
    fn zero_duration_counts_error_only() {
        let stats = StatsCollector::new(None);
        let err = TransportError::Dial("refused".into());
        stats.record("s01:8080", Method::Dial, Duration::ZERO, Some(&err));

        assert_eq!(stats.errors("s01:8080"), 1);
        assert!(stats.methods("s01:8080").is_empty());
    }

    #[test]
    fn errors_are_counted_alongside_requests() {
        let stats = StatsCollector::new(None);
        let err = TransportError::Status(Status::ObjectNotFound);
        stats.record("s01:8080", Method::ObjectHead, Duration::from_millis(5), Some(&err));
        stats.record("s01:8080", Method::ObjectHead, Duration::from_millis(5), None);

        assert_eq!(stats.errors("s01:8080"), 1);
        assert_eq!(stats.methods("s01:8080")[0].all_requests, 2);
    }

    #[test]
    fn unknown_node_is_empty() {
        let stats = StatsCollector::new(None);
        assert_eq!(stats.errors("nope"), 0);
        assert!(stats.methods("nope").is_empty());
    }

    #[test]
    fn callback_sees_every_request() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: StatisticCallback = Arc::new(move |info: &RequestInfo| {
            sink.lock().unwrap().push((info.address.clone(), info.method, info.elapsed));
        });
        let stats = StatsCollector::new(Some(callback));

        stats.record("s01:8080", Method::BalanceGet, Duration::from_millis(7), None);
        stats.record("s02:8080", Method::Dial, Duration::ZERO, Some(&TransportError::Closed));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], ("s01:8080".to_string(), Method::BalanceGet, Duration::from_millis(7)));
    }

    #[test]
    fn node_statistic_lookup() {
        let statistic = Statistic {
            overall_errors: 0,
            nodes: vec![NodeStatistic {
                address: "s01:8080".into(),
                current_errors: 0,
                overall_errors: 0,
                request_errors: 0,
                methods: vec![MethodSnapshot {
                    method: Method::ObjectPut,
                    all_requests: 2,
                    all_time: Duration::from_millis(30),
                }],
            }],
        };
        let node = statistic.node("s01:8080").unwrap();
        assert_eq!(node.average(Method::ObjectPut), Duration::from_millis(15));
        assert_eq!(node.average(Method::ObjectGet), Duration::ZERO);
        assert!(matches!(
            statistic.node("s09:8080"),
            Err(Error::NodeNotFound(_))
        ));
    }

    #[test]
    fn records_metrics() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        let stats = StatsCollector::new(None);
        stats.record("s01:8080", Method::ObjectGet, Duration::from_millis(40), None);
        stats.record(
            "s01:8080",
            Method::ObjectGet,
            Duration::from_millis(60),
            Some(&TransportError::Io("reset".into())),
        );

        let output = handle.render();
        assert!(
            output.contains("pool_requests_total"),
            "rendered output must contain pool_requests_total, got: {output}"
        );
        assert!(output.contains("pool_request_errors_total"));
        assert!(output.contains("pool_request_duration_seconds"));
        assert!(output.contains("node=\"s01:8080\""));
        assert!(output.contains("method=\"object_get\""));
    }
}
