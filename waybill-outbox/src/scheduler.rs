//! Relay scheduler.
//!
//! Runs one loop per configured schema. Each loop runs a pass, then sleeps
//! for the configured delay, so passes on the same schema never overlap.

use crate::config::RelayConfig;
use crate::error::{OutboxError, OutboxResult};
use crate::relay::OutboxRelay;
use crate::store::OutboxStore;
use std::sync::Arc;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use waybill_cqrs::{DataSourceRouter, Role};
use waybill_log::{debug, error, info, warn};
use waybill_messaging::MessageBroker;

/// Fail unless the deployment can write, since relaying finalizes records.
pub fn require_write<P>(router: &DataSourceRouter<P>) -> OutboxResult<()> {
    if router.supports(Role::Write) {
        Ok(())
    } else {
        Err(OutboxError::Config(format!(
            "outbox relay needs a write datasource, CQRS mode is {}",
            router.mode()
        )))
    }
}

/// Drives an [`OutboxRelay`] on a fixed delay for every configured schema.
pub struct RelayScheduler<S: OutboxStore, B: MessageBroker + 'static> {
    relay: Arc<OutboxRelay<S, B>>,
    config: RelayConfig,
    running: Arc<RwLock<bool>>,
    shutdown: Option<watch::Sender<bool>>,
    handles: Vec<JoinHandle<()>>,
}

impl<S: OutboxStore, B: MessageBroker + 'static> RelayScheduler<S, B> {
    pub fn new(relay: OutboxRelay<S, B>, config: RelayConfig) -> Self {
        info!(
            {
                "schemas" => config.schemas.join(","),
                "batch_size" => config.batch_size,
                "delay_ms" => config.delay.as_millis()
            },
            "Initializing outbox relay scheduler"
        );
        Self {
            relay: Arc::new(relay),
            config,
            running: Arc::new(RwLock::new(false)),
            shutdown: None,
            handles: Vec::new(),
        }
    }

    pub fn relay(&self) -> &Arc<OutboxRelay<S, B>> {
        &self.relay
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Start one loop per schema.
    pub async fn start(&mut self) -> OutboxResult<()> {
        self.config.validate()?;

        let mut running = self.running.write().await;
        if *running {
            warn!("Outbox relay already running");
            return Err(OutboxError::AlreadyRunning);
        }
        *running = true;
        drop(running);

        let (tx, rx) = watch::channel(false);
        for schema in &self.config.schemas {
            let handle = tokio::spawn(run_schema(
                self.relay.clone(),
                schema.clone(),
                self.config.clone(),
                rx.clone(),
            ));
            self.handles.push(handle);
        }
        self.shutdown = Some(tx);

        info!("Outbox relay started");
        Ok(())
    }

    /// Stop the loops, letting a pass in progress finish, then wait for
    /// outstanding confirmations.
    pub async fn stop(&mut self) -> OutboxResult<()> {
        let mut running = self.running.write().await;
        if !*running {
            return Err(OutboxError::NotRunning);
        }
        *running = false;
        drop(running);

        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                error!({ "error" => e }, "Relay loop panicked");
            }
        }

        self.relay.publisher().settle().await;
        info!("Outbox relay stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

async fn run_schema<S, B>(
    relay: Arc<OutboxRelay<S, B>>,
    schema: String,
    config: RelayConfig,
    mut shutdown: watch::Receiver<bool>,
) where
    S: OutboxStore,
    B: MessageBroker + 'static,
{
    debug!({ "schema" => schema }, "Relay loop started");

    while !*shutdown.borrow() {
        match relay.process(&schema, config.batch_size).await {
            Ok(_) => {}
            Err(e) if e.is_transient() => {
                warn!({ "schema" => schema, "error" => e }, "Relay pass failed, retrying next tick");
            }
            Err(e) => {
                error!({ "schema" => schema, "error" => e }, "Relay pass failed");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(config.delay) => {}
            _ = shutdown.changed() => {}
        }
    }

    debug!({ "schema" => schema }, "Relay loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryOutboxStore;
    use std::time::Duration;
    use waybill_cqrs::CqrsMode;
    use waybill_events::EventRegistry;
    use waybill_messaging::memory::InMemoryBroker;

    fn scheduler() -> RelayScheduler<InMemoryOutboxStore, InMemoryBroker> {
        let relay = OutboxRelay::new(
            Arc::new(InMemoryOutboxStore::new()),
            Arc::new(EventRegistry::new()),
            Arc::new(InMemoryBroker::new()),
        );
        let config = RelayConfig::new(["company"]).with_delay(Duration::from_millis(10));
        RelayScheduler::new(relay, config)
    }

    #[tokio::test]
    async fn test_start_stop() {
        let mut scheduler = scheduler();
        assert!(!scheduler.is_running().await);

        scheduler.start().await.unwrap();
        assert!(scheduler.is_running().await);
        assert!(matches!(scheduler.start().await, Err(OutboxError::AlreadyRunning)));

        scheduler.stop().await.unwrap();
        assert!(!scheduler.is_running().await);
        assert!(matches!(scheduler.stop().await, Err(OutboxError::NotRunning)));
    }

    #[tokio::test]
    async fn test_loop_survives_claim_failures() {
        let mut scheduler = scheduler();
        scheduler.relay().store().fail_next_claims(3).await;

        scheduler.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.stop().await.unwrap();

        // All scripted failures were consumed, so the loop kept going.
        assert!(scheduler.relay().store().claim_batch("company", 1).await.is_ok());
    }

    #[test]
    fn test_require_write() {
        let writable = DataSourceRouter::new(CqrsMode::Both, Some("w"), Some("r")).unwrap();
        assert!(require_write(&writable).is_ok());

        let read_only = DataSourceRouter::new(CqrsMode::Read, None, Some("r")).unwrap();
        assert!(matches!(require_write(&read_only), Err(OutboxError::Config(_))));
    }
}
