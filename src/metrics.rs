// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Gauge, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Publish side --------
pub static ORDERS_PUBLISHED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("orders_published_total", "order events published").unwrap());

pub static TICKS_PUBLISHED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("ticks_published_total", "price ticks published").unwrap());

pub static TICKS_DROPPED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("ticks_dropped_total", "price ticks dropped while channel down").unwrap()
});

// -------- Consume side --------
pub static EVENTS_CONSUMED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("events_consumed_total", "messages consumed per stream"),
        &["stream"],
    )
    .unwrap()
});

pub static MALFORMED_DROPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("malformed_dropped_total", "undecodable messages dropped per stream"),
        &["stream"],
    )
    .unwrap()
});

// -------- Connection supervision --------
pub static CONNECT_RETRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("connect_retries_total", "failed connect attempts per role"),
        &["role"],
    )
    .unwrap()
});

pub static CONN_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "connection_state",
            "0=disconnected 1=connecting 2=connected -1=failed",
        ),
        &["role"],
    )
    .unwrap()
});

// -------- Projection --------
pub static PORTFOLIO_VALUE: Lazy<Gauge> = Lazy::new(|| {
    Gauge::new("portfolio_total_value", "aggregate value of projected holdings").unwrap()
});

pub fn init() {
    for m in [
        REGISTRY.register(Box::new(ORDERS_PUBLISHED.clone())),
        REGISTRY.register(Box::new(TICKS_PUBLISHED.clone())),
        REGISTRY.register(Box::new(TICKS_DROPPED.clone())),
        REGISTRY.register(Box::new(EVENTS_CONSUMED.clone())),
        REGISTRY.register(Box::new(MALFORMED_DROPPED.clone())),
        REGISTRY.register(Box::new(CONNECT_RETRIES.clone())),
        REGISTRY.register(Box::new(CONN_STATE.clone())),
        REGISTRY.register(Box::new(PORTFOLIO_VALUE.clone())),
    ] {
        let _ = m;
    }
}

// Encode all metrics in Prometheus text format
fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

// Serve one HTTP request (GET / or /metrics) — tiny HTTP 1.1 responder
fn handle_client(mut stream: TcpStream) {
    // Read a bit to consume headers (no full parse)
    let mut _req_buf = [0u8; 1024];
    let _ = stream.read(&mut _req_buf);

    let body = encode_metrics();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

// Run the metrics server in a dedicated OS thread (keeps Tokio runtime clean)
pub async fn serve_metrics(port: u16) {
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = match TcpListener::bind(&addr) {
            Ok(l) => l,
            Err(e) => {
                eprintln!("metrics bind {addr} failed: {e}");
                return;
            }
        };
        eprintln!("metrics listening on http://{addr}/ (and /metrics)");

        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => eprintln!("metrics accept error: {e}"),
            }
        }
    });
}
