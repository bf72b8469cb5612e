//! Prometheus metrics for the registry API

use anyhow::Result;
use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, IntGauge, Opts, Registry, TextEncoder};
use std::time::Duration;

/// Request and route metrics, registered on a private registry
#[derive(Clone)]
pub struct ServerMetrics {
    pub http_requests_total: CounterVec,
    pub http_request_duration_seconds: HistogramVec,
    /// Number of live proxy routes
    pub proxy_routes: IntGauge,
    registry: Registry,
}

impl ServerMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let http_requests_total = CounterVec::new(
            Opts::new("registry_http_requests_total", "Total HTTP requests"),
            &["method", "route", "status"],
        )?;

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "registry_http_request_duration_seconds",
                "HTTP request latency in seconds",
            ),
            &["method", "route"],
        )?;

        let proxy_routes = IntGauge::new("registry_proxy_routes", "Live proxy routes")?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;
        registry.register(Box::new(proxy_routes.clone()))?;

        Ok(Self {
            http_requests_total,
            http_request_duration_seconds,
            proxy_routes,
            registry,
        })
    }

    pub fn observe(&self, method: &str, route: &str, status: u16, elapsed: Duration) {
        self.http_requests_total
            .with_label_values(&[method, route, &status.to_string()])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, route])
            .observe(elapsed.as_secs_f64());
    }

    pub fn set_routes(&self, count: usize) {
        self.proxy_routes.set(count as i64);
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = vec![];
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_includes_recorded_series() {
        let metrics = ServerMetrics::new().unwrap();
        metrics.observe("GET", "/endpoints", 200, Duration::from_millis(5));
        metrics.observe("GET", "/endpoints", 200, Duration::from_millis(7));
        metrics.set_routes(3);

        let text = metrics.gather().unwrap();
        assert!(text.contains(
            r#"registry_http_requests_total{method="GET",route="/endpoints",status="200"} 2"#
        ));
        assert!(text.contains("registry_http_request_duration_seconds_count"));
        assert!(text.contains("registry_proxy_routes 3"));
    }

    #[test]
    fn test_instances_do_not_share_registries() {
        let first = ServerMetrics::new().unwrap();
        let second = ServerMetrics::new().unwrap();
        first.set_routes(5);
        assert!(second.gather().unwrap().contains("registry_proxy_routes 0"));
    }
}
