// ===============================
// src/domain.rs
// ===============================
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side { Buy, Sell }

impl Side {
    pub fn sign(&self) -> i64 { match self { Side::Buy => 1, Side::Sell => -1 } }

    pub fn parse_one(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY"  => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => None,
        }
    }
}

/// Raw order input as the HTTP layer hands it over, before any validation.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderRequest { pub symbol: String, pub quantity: i64, pub side: String }

// Wire payloads (JSON, UTF-8). `ts_ms` is a generation timestamp in epoch
// millis; consumers tolerate its absence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEvent { pub symbol: String, pub quantity: i64, pub side: Side, #[serde(default)] pub ts_ms: i64 }
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTick { pub symbol: String, pub price: f64, #[serde(default)] pub ts_ms: i64 }

/// Money rounding used everywhere a price or value leaves the system.
pub fn round2(x: f64) -> f64 { (x * 100.0).round() / 100.0 }

// Read-side query results
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioRow { pub symbol: String, pub quantity: i64, pub price: f64, pub value: f64 }
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioSnapshot { pub rows: Vec<PortfolioRow>, pub total_value: f64 }
