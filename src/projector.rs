// ===============================
// src/projector.rs
// ===============================
//
// PortfolioProjector: folds the order stream and the price stream into the
// only authoritative copy of holdings and cached prices. Two consume loops,
// one per channel, each behind its own ConnectionSupervisor; queries read a
// joint snapshot of both maps.
//
// There is no ordering across the two channels, so a tick generated after an
// order may be observed first. Holdings are a pure fold of observed order
// events; the price cache is last-write-wins in delivery order.
//
use ahash::AHashMap as HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::domain::{round2, OrderEvent, PortfolioRow, PortfolioSnapshot, PriceTick};
use crate::fabric::SubscriberConnector;
use crate::metrics::{EVENTS_CONSUMED, MALFORMED_DROPPED};
use crate::supervisor::{ConnectionState, ConnectionSupervisor, FatalError};

#[derive(Default)]
struct ProjectionState {
    holdings: HashMap<String, i64>, // signed quantity per symbol ever traded
    prices: HashMap<String, f64>,   // latest observed price per symbol
}

/// Cloneable read/write handle over the projected state. Consume loops are
/// the only writers; queries take both maps inside one critical section so a
/// portfolio read never mixes holdings and prices from different moments.
#[derive(Clone, Default)]
pub struct Projection {
    state: Arc<Mutex<ProjectionState>>,
}

impl Projection {
    pub fn new() -> Self { Self::default() }

    fn apply_order(&self, ev: &OrderEvent) {
        let mut state = self.state.lock().expect("projection poisoned");
        let entry = state.holdings.entry(ev.symbol.clone()).or_insert(0);
        *entry += ev.side.sign() * ev.quantity;
        debug!(symbol = %ev.symbol, qty = *entry, "holding updated");
    }

    fn apply_tick(&self, tick: &PriceTick) {
        let mut state = self.state.lock().expect("projection poisoned");
        state.prices.insert(tick.symbol.clone(), tick.price);
    }

    /// Latest observed price, or None while no tick for the symbol was seen.
    pub fn price(&self, symbol: &str) -> Option<f64> {
        let state = self.state.lock().expect("projection poisoned");
        state.prices.get(&symbol.to_ascii_uppercase()).copied()
    }

    /// Every symbol with a non-zero holding, valued at the cached price
    /// (0 while unknown), plus the aggregate value.
    pub fn portfolio(&self) -> PortfolioSnapshot {
        let state = self.state.lock().expect("projection poisoned");
        let mut rows: Vec<PortfolioRow> = state
            .holdings
            .iter()
            .filter(|(_, qty)| **qty != 0)
            .map(|(symbol, qty)| {
                let price = state.prices.get(symbol).copied().unwrap_or(0.0);
                PortfolioRow {
                    symbol: symbol.clone(),
                    quantity: *qty,
                    price: round2(price),
                    value: round2(*qty as f64 * price),
                }
            })
            .collect();
        rows.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        let total_value = round2(rows.iter().map(|r| r.value).sum());
        PortfolioSnapshot { rows, total_value }
    }
}

// A message that fails to decode is dropped and logged; one bad payload must
// never stall the projection.

fn decode_order(payload: &[u8]) -> Result<OrderEvent, String> {
    let mut ev: OrderEvent =
        serde_json::from_slice(payload).map_err(|e| e.to_string())?;
    ev.symbol = ev.symbol.trim().to_ascii_uppercase();
    if ev.symbol.is_empty() {
        return Err("empty symbol".into());
    }
    if ev.quantity <= 0 {
        return Err(format!("non-positive quantity {}", ev.quantity));
    }
    Ok(ev)
}

fn decode_tick(payload: &[u8]) -> Result<PriceTick, String> {
    let mut tick: PriceTick =
        serde_json::from_slice(payload).map_err(|e| e.to_string())?;
    tick.symbol = tick.symbol.trim().to_ascii_uppercase();
    if tick.symbol.is_empty() {
        return Err("empty symbol".into());
    }
    if !tick.price.is_finite() || tick.price < 0.0 {
        return Err(format!("invalid price {}", tick.price));
    }
    Ok(tick)
}

pub async fn run_orders(
    mut sup: ConnectionSupervisor<SubscriberConnector>,
    projection: Projection,
) -> Result<(), FatalError> {
    loop {
        if sup.state() != ConnectionState::Connected {
            sup.acquire().await?;
        }
        let received = match sup.handle_mut() {
            Ok(handle) => handle.next().await,
            Err(_) => continue,
        };
        match received {
            Ok(payload) => {
                EVENTS_CONSUMED.with_label_values(&["orders"]).inc();
                match decode_order(&payload) {
                    Ok(ev) => projection.apply_order(&ev),
                    Err(reason) => {
                        MALFORMED_DROPPED.with_label_values(&["orders"]).inc();
                        warn!(
                            %reason,
                            payload = %String::from_utf8_lossy(&payload),
                            "malformed order event dropped"
                        );
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "order consume failed");
                sup.mark_disconnected();
            }
        }
    }
}

pub async fn run_prices(
    mut sup: ConnectionSupervisor<SubscriberConnector>,
    projection: Projection,
) -> Result<(), FatalError> {
    loop {
        if sup.state() != ConnectionState::Connected {
            sup.acquire().await?;
        }
        let received = match sup.handle_mut() {
            Ok(handle) => handle.next().await,
            Err(_) => continue,
        };
        match received {
            Ok(payload) => {
                EVENTS_CONSUMED.with_label_values(&["prices"]).inc();
                match decode_tick(&payload) {
                    Ok(tick) => projection.apply_tick(&tick),
                    Err(reason) => {
                        MALFORMED_DROPPED.with_label_values(&["prices"]).inc();
                        warn!(
                            %reason,
                            payload = %String::from_utf8_lossy(&payload),
                            "malformed price tick dropped"
                        );
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "price consume failed");
                sup.mark_disconnected();
            }
        }
    }
}
