// ===============================
// src/feed.rs
// ===============================
//
// PriceFeedPublisher: advances a simulated price table on a fixed interval
// and publishes one PriceTick per tracked symbol. The random-walk generator
// is deliberately opaque to the rest of the system.
//
// Ticks generated while the channel is down are dropped, not buffered: price
// is a continuously refreshed value, the next interval re-synchronizes the
// downstream cache.
//
use ahash::AHashMap as HashMap;
use chrono::Utc;
use rand::Rng;
use std::sync::{Arc, Mutex};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, warn};

use crate::domain::{round2, PriceTick};
use crate::fabric::ChannelPublisher;
use crate::metrics::{TICKS_DROPPED, TICKS_PUBLISHED};
use crate::supervisor::{Connect, ConnectionState, ConnectionSupervisor, FatalError};

/// Simulated last prices, also readable synchronously for price lookups.
#[derive(Clone)]
pub struct PriceTable {
    inner: Arc<Mutex<HashMap<String, f64>>>,
}

impl PriceTable {
    pub fn seeded(seeds: &[(String, f64)]) -> Self {
        let map = seeds
            .iter()
            .map(|(s, p)| (s.to_ascii_uppercase(), *p))
            .collect();
        Self { inner: Arc::new(Mutex::new(map)) }
    }

    pub fn get(&self, symbol: &str) -> Option<f64> {
        let map = self.inner.lock().expect("price table poisoned");
        map.get(&symbol.to_ascii_uppercase()).map(|p| round2(*p))
    }

    /// One random-walk step for every symbol: uniform drift in [-1, 1],
    /// floored at zero. Returns the new quotes rounded for the wire.
    fn advance(&self) -> Vec<(String, f64)> {
        let mut rng = rand::thread_rng();
        let mut map = self.inner.lock().expect("price table poisoned");
        let mut quotes = Vec::with_capacity(map.len());
        for (symbol, price) in map.iter_mut() {
            let drift: f64 = rng.gen_range(-1.0..=1.0);
            *price = (*price + drift).max(0.0);
            quotes.push((symbol.clone(), round2(*price)));
        }
        quotes
    }
}

pub async fn run<C>(
    mut sup: ConnectionSupervisor<C>,
    table: PriceTable,
    tick_interval_ms: u64,
) -> Result<(), FatalError>
where
    C: Connect<Handle = Box<dyn ChannelPublisher>>,
{
    sup.acquire().await?;

    let mut tick = interval(Duration::from_millis(tick_interval_ms));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tick.tick().await;
        let quotes = table.advance();

        if sup.state() != ConnectionState::Connected {
            if sup.state() == ConnectionState::Failed {
                return Err(FatalError { role: sup.role().to_string(), attempts: sup.retries() });
            }
            TICKS_DROPPED.inc_by(quotes.len() as u64);
            debug!(dropped = quotes.len(), "channel down, dropping interval ticks");
            let _ = sup.connect().await;
            continue;
        }

        let ts_ms = Utc::now().timestamp_millis();
        let mut lost = false;
        if let Ok(handle) = sup.handle_mut() {
            for (symbol, price) in quotes {
                let event = PriceTick { symbol, price, ts_ms };
                let payload = match serde_json::to_vec(&event) {
                    Ok(p) => p,
                    Err(e) => {
                        error!(error = %e, "tick encode failed, skip symbol");
                        continue;
                    }
                };
                // each symbol publishes independently
                match handle.publish(payload).await {
                    Ok(()) => TICKS_PUBLISHED.inc(),
                    Err(e) => {
                        warn!(symbol = %event.symbol, error = %e, "tick publish failed");
                        TICKS_DROPPED.inc();
                        lost = true;
                    }
                }
            }
        }
        if lost {
            sup.mark_disconnected();
        }
    }
}
