//! Prometheus-compatible metrics endpoint
//!
//! Exposes match server metrics in Prometheus text format and as JSON.
//! Default endpoint: http://localhost:9090/metrics

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::lobby::phase::GamePhase;

const TICK_HISTORY_LEN: usize = 1000;

/// Metrics registry for the match server
#[derive(Debug)]
pub struct Metrics {
    // Match state
    pub sessions_connected: AtomicU64,
    pub entities: AtomicU64,
    pub owned_entities: AtomicU64,
    pub phase: AtomicU64,

    // Authority
    pub requests_accepted: AtomicU64,
    pub requests_rejected: AtomicU64,
    pub ownership_changes: AtomicU64,

    // Performance
    pub tick_time_us: AtomicU64,
    pub tick_time_p95_us: AtomicU64,
    pub tick_time_p99_us: AtomicU64,
    pub tick_time_max_us: AtomicU64,
    pub tick_count: AtomicU64,

    // Network
    pub connections_active: AtomicU64,
    pub messages_sent: AtomicU64,
    pub messages_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,

    start_time: Instant,
    tick_history: RwLock<VecDeque<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            sessions_connected: AtomicU64::new(0),
            entities: AtomicU64::new(0),
            owned_entities: AtomicU64::new(0),
            phase: AtomicU64::new(GamePhase::WaitingToStart.index()),
            requests_accepted: AtomicU64::new(0),
            requests_rejected: AtomicU64::new(0),
            ownership_changes: AtomicU64::new(0),
            tick_time_us: AtomicU64::new(0),
            tick_time_p95_us: AtomicU64::new(0),
            tick_time_p99_us: AtomicU64::new(0),
            tick_time_max_us: AtomicU64::new(0),
            tick_count: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            start_time: Instant::now(),
            tick_history: RwLock::new(VecDeque::with_capacity(TICK_HISTORY_LEN)),
        }
    }

    /// Record a tick time and update percentiles
    pub fn record_tick_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        let mut history = self.tick_history.write();
        history.push_back(us);
        while history.len() > TICK_HISTORY_LEN {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();

            let p95_idx = (sorted.len() as f32 * 0.95) as usize;
            let p99_idx = (sorted.len() as f32 * 0.99) as usize;

            self.tick_time_p95_us.store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_p99_us.store(sorted[p99_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_max_us.store(sorted.last().copied().unwrap_or(0), Ordering::Relaxed);
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    fn phase_name(&self) -> &'static str {
        match self.phase.load(Ordering::Relaxed) {
            0 => GamePhase::WaitingToStart.name(),
            1 => GamePhase::FirstPrompt.name(),
            2 => GamePhase::SecondPrompt.name(),
            3 => GamePhase::PromptGeneration.name(),
            4 => GamePhase::Cinematic.name(),
            5 => GamePhase::Countdown.name(),
            6 => GamePhase::Playing.name(),
            _ => GamePhase::Finished.name(),
        }
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(4096);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        metric!("sisyphi_sessions_connected", "Connected sessions", "gauge",
            self.sessions_connected.load(Ordering::Relaxed));
        metric!("sisyphi_entities", "Live replicated entities", "gauge",
            self.entities.load(Ordering::Relaxed));
        metric!("sisyphi_entities_owned", "Entities with a session owner", "gauge",
            self.owned_entities.load(Ordering::Relaxed));
        metric!("sisyphi_phase", "Current game phase (0=waiting_to_start, 7=finished)", "gauge",
            self.phase.load(Ordering::Relaxed));
        output.push_str(&format!(
            "# HELP sisyphi_phase_state Human-readable game phase\n# TYPE sisyphi_phase_state gauge\nsisyphi_phase_state{{phase=\"{}\"}} 1\n",
            self.phase_name()
        ));

        metric!("sisyphi_requests_accepted_total", "Requests accepted by the authority validator", "counter",
            self.requests_accepted.load(Ordering::Relaxed));
        metric!("sisyphi_requests_rejected_total", "Requests rejected by the authority validator", "counter",
            self.requests_rejected.load(Ordering::Relaxed));
        metric!("sisyphi_ownership_changes_total", "Ownership changes broadcast", "counter",
            self.ownership_changes.load(Ordering::Relaxed));

        metric!("sisyphi_tick_time_microseconds", "Current tick time in microseconds", "gauge",
            self.tick_time_us.load(Ordering::Relaxed));
        metric!("sisyphi_tick_time_p95_microseconds", "95th percentile tick time", "gauge",
            self.tick_time_p95_us.load(Ordering::Relaxed));
        metric!("sisyphi_tick_time_p99_microseconds", "99th percentile tick time", "gauge",
            self.tick_time_p99_us.load(Ordering::Relaxed));
        metric!("sisyphi_tick_time_max_microseconds", "Maximum tick time", "gauge",
            self.tick_time_max_us.load(Ordering::Relaxed));
        metric!("sisyphi_tick_count", "Total ticks processed", "counter",
            self.tick_count.load(Ordering::Relaxed));

        metric!("sisyphi_connections_active", "Active WebTransport connections", "gauge",
            self.connections_active.load(Ordering::Relaxed));
        metric!("sisyphi_messages_sent_total", "Total messages sent", "counter",
            self.messages_sent.load(Ordering::Relaxed));
        metric!("sisyphi_messages_received_total", "Total messages received", "counter",
            self.messages_received.load(Ordering::Relaxed));
        metric!("sisyphi_bytes_sent_total", "Total bytes sent", "counter",
            self.bytes_sent.load(Ordering::Relaxed));
        metric!("sisyphi_bytes_received_total", "Total bytes received", "counter",
            self.bytes_received.load(Ordering::Relaxed));
        metric!("sisyphi_uptime_seconds", "Server uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    /// JSON view of the same numbers
    pub fn to_json(&self) -> String {
        let load = |v: &AtomicU64| v.load(Ordering::Relaxed);
        serde_json::json!({
            "match": {
                "sessions": load(&self.sessions_connected),
                "entities": load(&self.entities),
                "owned_entities": load(&self.owned_entities),
                "phase": self.phase_name(),
            },
            "authority": {
                "accepted": load(&self.requests_accepted),
                "rejected": load(&self.requests_rejected),
                "ownership_changes": load(&self.ownership_changes),
            },
            "performance": {
                "tick_time_us": load(&self.tick_time_us),
                "tick_time_p95_us": load(&self.tick_time_p95_us),
                "tick_time_p99_us": load(&self.tick_time_p99_us),
                "tick_time_max_us": load(&self.tick_time_max_us),
                "tick_count": load(&self.tick_count),
            },
            "network": {
                "connections": load(&self.connections_active),
                "messages_sent": load(&self.messages_sent),
                "messages_received": load(&self.messages_received),
                "bytes_sent": load(&self.bytes_sent),
                "bytes_received": load(&self.bytes_received),
            },
            "uptime_seconds": self.uptime_seconds(),
        })
        .to_string()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn http_response(status: &str, content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body
    )
}

/// Response for a raw HTTP request line
fn route(metrics: &Metrics, request: &str) -> String {
    if request.starts_with("GET /metrics/json") {
        http_response("200 OK", "application/json", &metrics.to_json())
    } else if request.starts_with("GET /metrics") {
        http_response("200 OK", "text/plain; version=0.0.4", &metrics.to_prometheus())
    } else if request.starts_with("GET /health") {
        http_response("200 OK", "text/plain", "OK")
    } else {
        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
    }
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(metrics: Arc<Metrics>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];
            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);
                    let response = route(&metrics, &request);
                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.sessions_connected.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.tick_count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_record_tick_time() {
        let metrics = Metrics::new();
        for i in 0..100 {
            metrics.record_tick_time(Duration::from_micros(100 + i * 10));
        }

        assert_eq!(metrics.tick_count.load(Ordering::Relaxed), 100);
        assert!(metrics.tick_time_p95_us.load(Ordering::Relaxed) >= 1000);
        assert_eq!(metrics.tick_time_max_us.load(Ordering::Relaxed), 1090);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        metrics.sessions_connected.store(3, Ordering::Relaxed);
        metrics.requests_rejected.store(7, Ordering::Relaxed);
        metrics.phase.store(GamePhase::Playing.index(), Ordering::Relaxed);

        let output = metrics.to_prometheus();
        assert!(output.contains("sisyphi_sessions_connected 3"));
        assert!(output.contains("sisyphi_requests_rejected_total 7"));
        assert!(output.contains("sisyphi_phase_state{phase=\"playing\"} 1"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn test_json_format() {
        let metrics = Metrics::new();
        metrics.entities.store(12, Ordering::Relaxed);

        let value: serde_json::Value = serde_json::from_str(&metrics.to_json()).unwrap();
        assert_eq!(value["match"]["entities"], 12);
        assert_eq!(value["match"]["phase"], "waiting_to_start");
    }

    #[test]
    fn test_routes() {
        let metrics = Metrics::new();
        assert!(route(&metrics, "GET /metrics/json HTTP/1.1").contains("application/json"));
        assert!(route(&metrics, "GET /metrics HTTP/1.1").contains("sisyphi_tick_count"));
        assert!(route(&metrics, "GET /health HTTP/1.1").ends_with("OK"));
        assert!(route(&metrics, "POST /nope HTTP/1.1").starts_with("HTTP/1.1 404"));
    }
}
