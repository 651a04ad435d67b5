// ===============================
// src/config.rs
// ===============================
use dotenvy::dotenv;
use std::env;
use tokio::time::Duration;

use crate::supervisor::RetryPolicy;

#[derive(Clone, Debug)]
pub struct Args {
    // channel names on the fabric
    pub order_channel: String,
    pub price_channel: String,

    // simulated price feed
    pub seeds: Vec<(String, f64)>, // symbol -> starting price
    pub tick_interval_ms: u64,

    // metrics
    pub metrics_port: u16,

    // sample order flow driven through the publisher at startup
    pub demo_orders: Vec<(String, i64, String)>,
}

fn default_seeds() -> Vec<(String, f64)> {
    vec![
        ("AAPL".into(), 150.0),
        ("GOOG".into(), 2800.0),
        ("TSLA".into(), 700.0),
        ("MSFT".into(), 300.0),
    ]
}

/// Parses `SYMBOLS=AAPL:150,GOOG:2800` (price optional, defaults 100).
fn parse_seeds(raw: &str) -> Vec<(String, f64)> {
    raw.split(',')
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|t| {
            let mut parts = t.splitn(2, ':');
            let symbol = parts.next().unwrap_or_default().to_ascii_uppercase();
            let price = parts
                .next()
                .and_then(|p| p.trim().parse().ok())
                .unwrap_or(100.0);
            (symbol, price)
        })
        .filter(|(s, _)| !s.is_empty())
        .collect()
}

/// Parses `DEMO_ORDERS=AAPL:10:BUY,AAPL:4:SELL` into raw order inputs.
fn parse_demo_orders(raw: &str) -> Vec<(String, i64, String)> {
    raw.split(',')
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .filter_map(|t| {
            let mut parts = t.splitn(3, ':');
            let symbol = parts.next()?.to_string();
            let qty = parts.next()?.trim().parse().ok()?;
            let side = parts.next()?.to_string();
            Some((symbol, qty, side))
        })
        .collect()
}

pub fn load() -> (Args, RetryPolicy) {
    let _ = dotenv();

    let order_channel =
        env::var("ORDER_CHANNEL").unwrap_or_else(|_| "trade.orders".to_string());
    let price_channel =
        env::var("PRICE_CHANNEL").unwrap_or_else(|_| "price.updates".to_string());

    let seeds = env::var("SYMBOLS")
        .ok()
        .map(|s| parse_seeds(&s))
        .filter(|v| !v.is_empty())
        .unwrap_or_else(default_seeds);

    let tick_interval_ms = env::var("TICK_INTERVAL_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(2_000);

    let metrics_port = env::var("METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(9898);

    // sample flow so a bare `cargo run` shows the projection converging;
    // DEMO_ORDERS= (empty) disables it
    let demo_orders = parse_demo_orders(
        &env::var("DEMO_ORDERS").unwrap_or_else(|_| "AAPL:10:BUY,AAPL:4:SELL".to_string()),
    );

    let args = Args {
        order_channel,
        price_channel,
        seeds,
        tick_interval_ms,
        metrics_port,
        demo_orders,
    };

    let max_retries = env::var("FABRIC_MAX_RETRIES")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(5);
    let retry_delay_ms: u64 = env::var("FABRIC_RETRY_DELAY_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(3_000);

    let policy = RetryPolicy {
        max_retries,
        retry_delay: Duration::from_millis(retry_delay_ms),
    };
    (args, policy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_parse_with_and_without_price() {
        let seeds = parse_seeds("aapl:150, GOOG , ,tsla:700.5");
        assert_eq!(
            seeds,
            vec![
                ("AAPL".to_string(), 150.0),
                ("GOOG".to_string(), 100.0),
                ("TSLA".to_string(), 700.5),
            ]
        );
    }

    #[test]
    fn demo_orders_skip_malformed_entries() {
        let orders = parse_demo_orders("AAPL:10:BUY,broken,MSFT:x:SELL,TSLA:4:SELL");
        assert_eq!(
            orders,
            vec![
                ("AAPL".to_string(), 10, "BUY".to_string()),
                ("TSLA".to_string(), 4, "SELL".to_string()),
            ]
        );
    }
}
