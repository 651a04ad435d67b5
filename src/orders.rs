// ===============================
// src/orders.rs
// ===============================
//
// OrderPublisher: validate raw order input, stamp it, publish it on the
// durable order channel. Acknowledgment means "the fabric accepted the
// publish", never "the projector saw it".
//
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::domain::{OrderEvent, OrderRequest, Side};
use crate::fabric::{FabricError, MessageFabric, PublisherConnector};
use crate::metrics::ORDERS_PUBLISHED;
use crate::supervisor::{ConnectionSupervisor, FatalError, RetryPolicy};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("symbol must be 1-5 uppercase letters")]
    Symbol,
    #[error("quantity must be a positive integer")]
    Quantity,
    #[error("side must be BUY or SELL")]
    Side,
}

impl ValidationError {
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::Symbol => "symbol",
            ValidationError::Quantity => "quantity",
            ValidationError::Side => "side",
        }
    }
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Fabric(#[from] FabricError),
    #[error("failed to encode order event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Normalizes and checks raw input; nothing is published on rejection.
fn validate(req: &OrderRequest) -> Result<(String, i64, Side), ValidationError> {
    let symbol = req.symbol.trim().to_ascii_uppercase();
    if symbol.is_empty()
        || symbol.len() > 5
        || !symbol.bytes().all(|b| b.is_ascii_uppercase())
    {
        return Err(ValidationError::Symbol);
    }
    if req.quantity <= 0 {
        return Err(ValidationError::Quantity);
    }
    let side = Side::parse_one(&req.side).ok_or(ValidationError::Side)?;
    Ok((symbol, req.quantity, side))
}

pub struct OrderPublisher {
    sup: ConnectionSupervisor<PublisherConnector>,
}

impl OrderPublisher {
    /// Connects to the order channel up-front, like a service refusing to
    /// start without its broker.
    pub async fn start(
        fabric: Arc<dyn MessageFabric>,
        channel: &str,
        policy: RetryPolicy,
    ) -> Result<Self, FatalError> {
        let connector = PublisherConnector::new(fabric, channel);
        let mut sup = ConnectionSupervisor::new("orders-pub", connector, policy);
        sup.acquire().await?;
        Ok(Self { sup })
    }

    /// Validates and publishes one order. Fire-and-forget past the fabric
    /// boundary: returns once the fabric accepted the message.
    pub async fn submit(&mut self, req: OrderRequest) -> Result<OrderEvent, SubmitError> {
        let (symbol, quantity, side) = validate(&req)?;
        let event = OrderEvent {
            symbol,
            quantity,
            side,
            ts_ms: Utc::now().timestamp_millis(),
        };
        let payload = serde_json::to_vec(&event)?;

        let handle = self.sup.handle_mut()?;
        if let Err(e) = handle.publish(payload).await {
            self.sup.mark_disconnected();
            return Err(e.into());
        }
        ORDERS_PUBLISHED.inc();
        info!(symbol = %event.symbol, qty = event.quantity, side = ?event.side, "order published");
        Ok(event)
    }

    /// Re-establishes the channel after a transient failure. Fatal once the
    /// retry budget is gone.
    pub async fn reconnect(&mut self) -> Result<(), FatalError> {
        self.sup.acquire().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::{ChannelPublisher, ChannelSubscriber, InMemoryBroker};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::time::Duration;

    fn policy() -> RetryPolicy {
        RetryPolicy { max_retries: 2, retry_delay: Duration::from_millis(1) }
    }

    fn req(symbol: &str, quantity: i64, side: &str) -> OrderRequest {
        OrderRequest { symbol: symbol.into(), quantity, side: side.into() }
    }

    #[test]
    fn validation_names_the_violated_field() {
        assert_eq!(validate(&req("", 1, "BUY")).unwrap_err().field(), "symbol");
        assert_eq!(validate(&req("TOOLONG", 1, "BUY")).unwrap_err().field(), "symbol");
        assert_eq!(validate(&req("AB1", 1, "BUY")).unwrap_err().field(), "symbol");
        assert_eq!(validate(&req("AAPL", 0, "BUY")).unwrap_err().field(), "quantity");
        assert_eq!(validate(&req("AAPL", -3, "SELL")).unwrap_err().field(), "quantity");
        assert_eq!(validate(&req("AAPL", 1, "HOLD")).unwrap_err().field(), "side");
    }

    #[test]
    fn validation_normalizes_case() {
        let (symbol, qty, side) = validate(&req(" aapl ", 10, "buy")).unwrap();
        assert_eq!(symbol, "AAPL");
        assert_eq!(qty, 10);
        assert_eq!(side, Side::Buy);
    }

    #[tokio::test]
    async fn rejected_orders_never_reach_the_channel() {
        let broker = Arc::new(InMemoryBroker::new());
        let fabric: Arc<dyn MessageFabric> = broker.clone();
        let mut publisher = OrderPublisher::start(fabric, "trade.orders", policy())
            .await
            .unwrap();

        let err = publisher.submit(req("AAPL", 0, "BUY")).await.err().unwrap();
        assert!(matches!(err, SubmitError::Validation(ValidationError::Quantity)));

        publisher.submit(req("aapl", 10, "buy")).await.unwrap();

        let mut sub = broker.subscriber("trade.orders").await.unwrap();
        let payload = sub.next().await.unwrap();
        let ev: OrderEvent = serde_json::from_slice(&payload).unwrap();
        assert_eq!(ev.symbol, "AAPL");
        assert_eq!(ev.quantity, 10);
        assert_eq!(ev.side, Side::Buy);
        assert!(ev.ts_ms > 0);
        // only the valid order made it through
        assert!(tokio::time::timeout(Duration::from_millis(20), sub.next())
            .await
            .is_err());
    }

    // Fabric whose first publisher handle is already dead; later connects
    // delegate to the real broker.
    struct DeadFirstPublisherFabric {
        inner: InMemoryBroker,
        first: AtomicBool,
    }

    struct DeadPublisher;

    #[async_trait]
    impl ChannelPublisher for DeadPublisher {
        async fn publish(&mut self, _payload: Vec<u8>) -> Result<(), FabricError> {
            Err(FabricError::ChannelClosed("trade.orders".into()))
        }
    }

    #[async_trait]
    impl MessageFabric for DeadFirstPublisherFabric {
        async fn publisher(&self, channel: &str) -> Result<Box<dyn ChannelPublisher>, FabricError> {
            if self.first.swap(false, Ordering::SeqCst) {
                return Ok(Box::new(DeadPublisher));
            }
            self.inner.publisher(channel).await
        }

        async fn subscriber(
            &self,
            channel: &str,
        ) -> Result<Box<dyn ChannelSubscriber>, FabricError> {
            self.inner.subscriber(channel).await
        }
    }

    #[tokio::test]
    async fn reconnect_restores_publishing_after_transient_failure() {
        let broker = InMemoryBroker::new();
        let fabric: Arc<dyn MessageFabric> = Arc::new(DeadFirstPublisherFabric {
            inner: broker.clone(),
            first: AtomicBool::new(true),
        });
        let mut publisher = OrderPublisher::start(fabric, "trade.orders", policy())
            .await
            .unwrap();

        // transient fabric failure surfaces to the caller, nothing published
        let err = publisher.submit(req("AAPL", 1, "BUY")).await.err().unwrap();
        assert!(matches!(err, SubmitError::Fabric(_)));

        publisher.reconnect().await.unwrap();
        publisher.submit(req("AAPL", 1, "BUY")).await.unwrap();

        let mut sub = broker.subscriber("trade.orders").await.unwrap();
        let ev: OrderEvent = serde_json::from_slice(&sub.next().await.unwrap()).unwrap();
        assert_eq!(ev.symbol, "AAPL");
        // the failed submit was not buffered anywhere
        assert!(tokio::time::timeout(Duration::from_millis(20), sub.next())
            .await
            .is_err());
    }
}
