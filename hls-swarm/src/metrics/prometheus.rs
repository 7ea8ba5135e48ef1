//! Prometheus text exposition (spec §6 "HTTP endpoints"), hand-rolled
//! rather than pulled from a metrics crate — the same choice the teacher's
//! own exporter makes.

use std::sync::Arc;

use crate::aggregator::SnapshotPublisher;
use crate::domain::Rate;
use crate::origin::OriginPublisher;

const NAMESPACE: &str = "hls_swarm";

/// Renders the latest Aggregate Snapshot as Prometheus exposition text.
pub struct PrometheusExporter {
    publisher: Arc<SnapshotPublisher>,
    origin: Option<Arc<OriginPublisher>>,
}

impl PrometheusExporter {
    pub fn new(publisher: Arc<SnapshotPublisher>, origin: Option<Arc<OriginPublisher>>) -> Self {
        Self { publisher, origin }
    }

    pub fn export(&self) -> String {
        let mut out = String::new();
        let Some(snapshot) = self.publisher.latest() else {
            self.write_gauge(&mut out, "active_clients", "Number of active clients", 0.0);
            return out;
        };

        self.write_gauge(&mut out, "active_clients", "Number of active clients", snapshot.active_clients as f64);
        self.write_gauge(&mut out, "target_clients", "Target client count", snapshot.target_clients as f64);
        self.write_gauge(&mut out, "ramp_progress", "Ramp-up progress, 0..1", snapshot.ramp_progress);

        self.write_counter(&mut out, "manifest_requests_total", "Total manifest requests", snapshot.manifest_requests_total as f64);
        self.write_counter(&mut out, "segment_requests_total", "Total segment requests", snapshot.segment_requests_total as f64);
        self.write_counter(&mut out, "bytes_downloaded_total", "Total bytes downloaded", snapshot.bytes_downloaded_total as f64);

        self.write_gauge(&mut out, "segment_throughput_1s_bytes_per_second", "1s throughput", snapshot.segment_throughput.window_1s);
        self.write_gauge(&mut out, "segment_throughput_30s_bytes_per_second", "30s throughput", snapshot.segment_throughput.window_30s);
        self.write_gauge(&mut out, "segment_throughput_60s_bytes_per_second", "60s throughput", snapshot.segment_throughput.window_60s);
        self.write_gauge(&mut out, "segment_throughput_300s_bytes_per_second", "300s throughput", snapshot.segment_throughput.window_300s);

        self.write_gauge(&mut out, "inferred_latency_p50_seconds", "Segment latency P50", snapshot.segment_latency.p50);
        self.write_gauge(&mut out, "inferred_latency_p95_seconds", "Segment latency P95", snapshot.segment_latency.p95);
        self.write_gauge(&mut out, "inferred_latency_p99_seconds", "Segment latency P99", snapshot.segment_latency.p99);
        self.write_gauge(&mut out, "inferred_latency_max_seconds", "Segment latency max", snapshot.segment_latency.max);

        for (code, count) in &snapshot.http_errors_total {
            self.write_counter_with_labels(
                &mut out,
                "http_errors_total",
                "Total HTTP errors observed in client debug logs",
                *count as f64,
                &[("status_code", &code.to_string())],
            );
        }

        for (category, count) in &snapshot.client_exits_total {
            self.write_counter_with_labels(
                &mut out,
                "client_exits_total",
                "Total client exits by category",
                *count as f64,
                &[("category", category.as_str())],
            );
        }

        self.write_counter(&mut out, "client_restarts_total", "Total client restarts", snapshot.restarts_total as f64);

        for (stream, count) in &snapshot.lines_dropped {
            self.write_counter_with_labels(&mut out, "stats_lines_dropped_total", "Dropped debug log lines", *count as f64, &[("stream", stream)]);
        }
        for (stream, count) in &snapshot.lines_parsed {
            self.write_counter_with_labels(&mut out, "stats_lines_parsed_total", "Parsed debug log lines", *count as f64, &[("stream", stream)]);
        }

        self.write_gauge(&mut out, "stats_drop_rate", "Current line drop rate", snapshot.drop_rate);
        self.write_gauge(&mut out, "stats_peak_drop_rate", "Peak observed line drop rate", snapshot.peak_drop_rate);

        if let Rate::Known(rate) = snapshot.request_rate {
            self.write_gauge(&mut out, "request_rate", "Requests per second across all clients", rate);
        }

        if let Some(origin) = &self.origin
            && let Some(origin_snapshot) = origin.latest()
        {
            let m = &origin_snapshot.metrics;
            self.write_gauge(&mut out, "origin_cpu_percent", "Origin host CPU utilization", m.cpu_percent);
            self.write_gauge(&mut out, "origin_memory_used_bytes", "Origin host memory in use", m.memory_used_bytes as f64);
            self.write_gauge(&mut out, "origin_memory_total_bytes", "Origin host total memory", m.memory_total_bytes as f64);
            self.write_gauge(&mut out, "origin_network_rx_bytes_per_second", "Origin host network receive rate", m.network_rx_bytes_per_sec);
            self.write_gauge(&mut out, "origin_network_tx_bytes_per_second", "Origin host network transmit rate", m.network_tx_bytes_per_sec);
            self.write_gauge(&mut out, "origin_network_rate_p50_bytes_per_second", "Rolling-window P50 network rate", origin_snapshot.rate_p50);
            self.write_gauge(&mut out, "origin_network_rate_max_bytes_per_second", "Rolling-window max network rate", origin_snapshot.rate_max);
            self.write_gauge(&mut out, "origin_healthy", "1 if the last origin scrape cycle succeeded", if origin_snapshot.healthy { 1.0 } else { 0.0 });
            if let Some(conns) = m.nginx_active_connections {
                self.write_gauge(&mut out, "origin_nginx_active_connections", "Nginx active connections", conns);
            }
            if let Some(rate) = m.nginx_request_rate {
                self.write_gauge(&mut out, "origin_nginx_request_rate", "Nginx requests per second", rate);
            }
            if let Some(avg) = m.nginx_avg_duration_seconds {
                self.write_gauge(&mut out, "origin_nginx_avg_duration_seconds", "Average Nginx request duration", avg);
            }
        }

        out
    }

    fn write_gauge(&self, out: &mut String, name: &str, help: &str, value: f64) {
        let full = format!("{NAMESPACE}_{name}");
        out.push_str(&format!("# HELP {full} {help}\n# TYPE {full} gauge\n{full} {value}\n"));
    }

    fn write_counter(&self, out: &mut String, name: &str, help: &str, value: f64) {
        let full = format!("{NAMESPACE}_{name}");
        out.push_str(&format!("# HELP {full} {help}\n# TYPE {full} counter\n{full} {value}\n"));
    }

    fn write_counter_with_labels(&self, out: &mut String, name: &str, help: &str, value: f64, labels: &[(&str, &str)]) {
        let full = format!("{NAMESPACE}_{name}");
        let labels_str = labels.iter().map(|(k, v)| format!("{k}=\"{v}\"")).collect::<Vec<_>>().join(",");
        out.push_str(&format!("# HELP {full} {help}\n# TYPE {full} counter\n{full}{{{labels_str}}} {value}\n"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exports_zero_when_no_snapshot_yet() {
        let publisher = SnapshotPublisher::new();
        let exporter = PrometheusExporter::new(publisher, None);
        let out = exporter.export();
        assert!(out.contains("hls_swarm_active_clients 0"));
    }
}
