//! Waybill outbox relay
//!
//! Polls every configured module's outbox and publishes pending events to
//! RabbitMQ.
//!
//! Run with: cargo run --bin waybill-relay --features postgres,rabbitmq

use std::sync::Arc;
use tokio::signal;
use waybill::default_registry;
use waybill_cqrs::Role;
use waybill_diesel::{DataSourceConfig, connect_routed};
use waybill_log::{error, info};
use waybill_messaging::{MessageBroker, MessagingConfig};
use waybill_messaging::rabbitmq::RabbitMqBroker;
use waybill_outbox::{
    EventPublisher, OutboxRelay, PgOutboxStore, RelayConfig, RelayScheduler, require_write,
};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();
    waybill_log::init();

    if let Err(e) = run().await {
        error!({ "error" => e }, "Outbox relay failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting Waybill outbox relay");

    let datasources = DataSourceConfig::from_env()?;
    let relay_config = RelayConfig::from_env()?;
    let messaging_config = MessagingConfig::from_env()?;

    let pools = Arc::new(connect_routed(&datasources).await?);
    require_write(pools.as_ref())?;
    for role in [Role::Write, Role::Read] {
        pools.resolve(role).ping().await?;
    }
    info!({ "mode" => pools.mode() }, "Datasources reachable");

    let store = Arc::new(PgOutboxStore::new(pools));
    if relay_config.migrate {
        for schema in &relay_config.schemas {
            store.migrate(schema).await?;
        }
    }

    let broker = Arc::new(RabbitMqBroker::connect(&messaging_config).await?);
    let mut publisher = EventPublisher::new(broker.clone());
    if let Some(timeout) = messaging_config.confirm_timeout {
        publisher = publisher.with_confirm_timeout(timeout);
    }

    let registry = Arc::new(default_registry());
    let mut relay = OutboxRelay::new(store, registry, broker.clone()).with_publisher(publisher);
    if let Some(after) = relay_config.stale_after {
        relay = relay.with_stale_after(after);
    }

    let mut scheduler = RelayScheduler::new(relay, relay_config);
    scheduler.start().await?;

    shutdown_signal().await;
    info!("Shutting down...");

    scheduler.stop().await?;
    broker.close().await?;

    info!("Outbox relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!({ "error" => e }, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!({ "error" => e }, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
