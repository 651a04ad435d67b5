// ===============================
// src/main.rs
// ===============================
//
// tickfolio — event-driven portfolio projection pipeline.
//
// Order submissions and simulated price ticks are published onto durable
// named channels; a projector consumes both streams, with no shared memory
// with the publishers and no synchronous call path, and folds them into
// holdings and a price cache it answers valuation queries from. Every
// producer/consumer sits behind its own ConnectionSupervisor so transient
// fabric outages are retried with a fixed delay and a bounded budget.
//
mod config;
mod domain;
mod fabric;
mod feed;
mod metrics;
mod orders;
mod projector;
mod supervisor;

use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use crate::domain::OrderRequest;
use crate::fabric::{InMemoryBroker, MessageFabric, PublisherConnector, SubscriberConnector};
use crate::supervisor::ConnectionSupervisor;

#[tokio::main]
async fn main() {
    // ---- Logging ----
    tracing_subscriber::fmt().with_env_filter("info").init();

    // ---- Load config ----
    let (args, policy) = config::load();

    // ---- Metrics ----
    metrics::init();
    tokio::spawn(metrics::serve_metrics(args.metrics_port));

    info!(
        order_channel = %args.order_channel,
        price_channel = %args.price_channel,
        symbols = ?args.seeds.iter().map(|(s, _)| s.as_str()).collect::<Vec<_>>(),
        tick_interval_ms = args.tick_interval_ms,
        max_retries = policy.max_retries,
        retry_delay_ms = policy.retry_delay.as_millis() as u64,
        "startup config"
    );

    // ---- Messaging fabric ----
    let fabric: Arc<dyn MessageFabric> = Arc::new(InMemoryBroker::new());

    // ---- Projector (one supervised consume loop per channel) ----
    let projection = projector::Projection::new();
    {
        let sup = ConnectionSupervisor::new(
            "orders-sub",
            SubscriberConnector::new(fabric.clone(), args.order_channel.clone()),
            policy.clone(),
        );
        let projection = projection.clone();
        tokio::spawn(async move {
            if let Err(e) = projector::run_orders(sup, projection).await {
                error!(error = %e, "order projection stopped");
                std::process::exit(1);
            }
        });
    }
    {
        let sup = ConnectionSupervisor::new(
            "price-sub",
            SubscriberConnector::new(fabric.clone(), args.price_channel.clone()),
            policy.clone(),
        );
        let projection = projection.clone();
        tokio::spawn(async move {
            if let Err(e) = projector::run_prices(sup, projection).await {
                error!(error = %e, "price projection stopped");
                std::process::exit(1);
            }
        });
    }

    // ---- Price feed ----
    let table = feed::PriceTable::seeded(&args.seeds);
    {
        let sup = ConnectionSupervisor::new(
            "price-pub",
            PublisherConnector::new(fabric.clone(), args.price_channel.clone()),
            policy.clone(),
        );
        let interval = args.tick_interval_ms;
        tokio::spawn(async move {
            if let Err(e) = feed::run(sup, table, interval).await {
                error!(error = %e, "price feed stopped");
                std::process::exit(1);
            }
        });
    }

    // ---- Order entry (the seam an HTTP layer would drive) ----
    let mut publisher =
        match orders::OrderPublisher::start(fabric.clone(), &args.order_channel, policy.clone())
            .await
        {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "order publisher failed to start");
                std::process::exit(1);
            }
        };
    if !args.demo_orders.is_empty() {
        let demo = args.demo_orders.clone();
        tokio::spawn(async move {
            for (symbol, quantity, side) in demo {
                let req = OrderRequest { symbol, quantity, side };
                match publisher.submit(req.clone()).await {
                    Ok(_) => {}
                    // transient fabric failure: reconnect and retry once
                    Err(orders::SubmitError::Fabric(e)) => {
                        warn!(error = %e, "order publish failed, reconnecting");
                        if let Err(fatal) = publisher.reconnect().await {
                            error!(error = %fatal, "order publisher gave up");
                            std::process::exit(1);
                        }
                        if let Err(e) = publisher.submit(req).await {
                            warn!(error = %e, "demo order rejected after reconnect");
                        }
                    }
                    Err(e) => warn!(error = %e, "demo order rejected"),
                }
            }
        });
    }

    // ---- Heartbeat: log the projected portfolio once a second ----
    loop {
        sleep(Duration::from_secs(1)).await;
        let snap = projection.portfolio();
        metrics::PORTFOLIO_VALUE.set(snap.total_value);
        info!(
            positions = snap.rows.len(),
            total_value = snap.total_value,
            "heartbeat"
        );
    }
}
