//! # Entity Watcher
//!
//! Background consumer of the change queue. Each event naming an entity
//! invalidates every live instance that is, or embeds, that entity, so the
//! next access reloads from the store and connected clients resync.
//!
//! The loop owns the topic through a lease it renews at half the lease
//! period. Losing ownership, a failed acquire, or the stream ending all lead
//! back to acquisition after a backoff; only the shutdown signal ends it.
//! The backoff doubles up to `max_backoff` and resets only after a healthy
//! session, one that delivered an event or held the topic for a full lease,
//! so a holder that keeps losing the topic right away does not spin.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::errors::QueueError;
use super::queue::{ChangeEvent, ChangeQueue};
use crate::observability::{Logger, MetricsRegistry};
use crate::shutdown;
use crate::sync::{Document, InstanceRegistry};

/// Watcher tuning
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub topic: String,
    /// Ownership lease; renewed every `lease / 2`
    pub lease: Duration,
    /// Pause between attempts while another holder owns the topic, and the
    /// starting backoff after a failure
    pub retry_interval: Duration,
    /// Cap for the backoff
    pub max_backoff: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            topic: "entity-changes".to_string(),
            lease: Duration::from_secs(30),
            retry_interval: Duration::from_secs(5),
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// Why a consume session ended
enum ConsumeExit {
    Shutdown,
    Lost { reason: String, healthy: bool },
}

/// Change queue → registry invalidation bridge
pub struct EntityWatcher<D: Document> {
    registry: Arc<InstanceRegistry<D>>,
    queue: Arc<dyn ChangeQueue>,
    metrics: Arc<MetricsRegistry>,
    config: WatcherConfig,
    holder: String,
}

impl<D: Document> EntityWatcher<D> {
    pub fn new(
        config: WatcherConfig,
        registry: Arc<InstanceRegistry<D>>,
        queue: Arc<dyn ChangeQueue>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            registry,
            queue,
            metrics,
            config,
            holder: format!("docsync-{}", Uuid::new_v4()),
        }
    }

    /// Lease holder id this watcher acquires with
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Run the loop on its own task
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    /// Acquire, consume, repeat until `shutdown` flips to true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let topic = self.config.topic.as_str();
        let mut backoff = self.config.retry_interval;
        Logger::info("WATCHER_STARTED", &[("holder", &self.holder), ("topic", topic)]);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let pause = match self
                .queue
                .acquire_exclusive(topic, &self.holder, self.config.lease)
                .await
            {
                Ok(true) => {
                    Logger::info("WATCHER_OWNERSHIP_ACQUIRED", &[("topic", topic)]);
                    let (reason, healthy) = match self.consume(&mut shutdown).await {
                        ConsumeExit::Shutdown => break,
                        ConsumeExit::Lost { reason, healthy } => (reason, healthy),
                    };
                    if healthy {
                        backoff = self.config.retry_interval;
                    }
                    Logger::warn(
                        "WATCHER_OWNERSHIP_LOST",
                        &[
                            ("backoff_ms", &backoff.as_millis().to_string()),
                            ("reason", &reason),
                            ("topic", topic),
                        ],
                    );
                    let pause = backoff;
                    backoff = (backoff * 2).min(self.config.max_backoff);
                    pause
                }
                Ok(false) => {
                    Logger::trace("WATCHER_TOPIC_HELD", &[("topic", topic)]);
                    self.config.retry_interval
                }
                Err(err) => {
                    self.metrics.increment_watcher_acquire_failures();
                    Logger::warn(
                        "WATCHER_ACQUIRE_FAILED",
                        &[
                            ("backoff_ms", &backoff.as_millis().to_string()),
                            ("reason", &err.to_string()),
                            ("topic", topic),
                        ],
                    );
                    let pause = backoff;
                    backoff = (backoff * 2).min(self.config.max_backoff);
                    pause
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown::signalled(&mut shutdown) => break,
            }
        }

        Logger::info("WATCHER_STOPPED", &[("topic", topic)]);
    }

    async fn consume(&self, shutdown: &mut watch::Receiver<bool>) -> ConsumeExit {
        let topic = self.config.topic.as_str();
        let started = Instant::now();
        let mut delivered = false;
        let lost = |reason: String, delivered: bool| ConsumeExit::Lost {
            reason,
            healthy: delivered || started.elapsed() >= self.config.lease,
        };

        let mut events = match self.queue.consume(topic).await {
            Ok(events) => events,
            Err(err) => return lost(err.to_string(), false),
        };

        let renew_every = (self.config.lease / 2).max(Duration::from_millis(1));
        let mut renew = tokio::time::interval(renew_every);
        renew.tick().await;

        loop {
            tokio::select! {
                _ = shutdown::signalled(shutdown) => return ConsumeExit::Shutdown,
                _ = renew.tick() => {
                    match self.queue.acquire_exclusive(topic, &self.holder, self.config.lease).await {
                        Ok(true) => {}
                        Ok(false) => return lost("lease taken by another holder".into(), delivered),
                        Err(err) => return lost(err.to_string(), delivered),
                    }
                }
                item = events.next() => match item {
                    Some(Ok(event)) => {
                        delivered = true;
                        self.handle(&event);
                    }
                    Some(Err(QueueError::Malformed(reason))) => {
                        self.metrics.increment_watcher_events_skipped();
                        Logger::warn("CHANGE_EVENT_SKIPPED", &[("reason", &reason), ("topic", topic)]);
                    }
                    Some(Err(err)) => return lost(err.to_string(), delivered),
                    None => return lost("stream ended".into(), delivered),
                },
            }
        }
    }

    /// Invalidate everything affected by one event
    pub fn handle(&self, event: &ChangeEvent) -> usize {
        let affected = self
            .registry
            .invalidate_entity(&event.entity_id, event.tenant.as_deref());
        self.metrics.increment_watcher_events();
        Logger::info(
            "ENTITY_CHANGED",
            &[
                ("entity_id", &event.entity_id.to_string()),
                ("invalidated", &affected.len().to_string()),
                ("tenant", event.tenant.as_deref().unwrap_or("*")),
            ],
        );
        affected.len()
    }
}
