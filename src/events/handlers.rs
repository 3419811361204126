//! Built-in subscribers for monitoring lifecycle events.
//!
//! `MONITOR_TASK_CREATED` triggers the one-off backfill of the configured
//! `fromDate..toDate` range. The backfill runs under the job's own
//! cancellation handle, so stopping the monitor also stops the backfill.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{Event, EventBus, Subscription, topics};
use crate::error::MonitorError;
use crate::mirror::MirrorEngine;
use crate::models::MonitorConfig;
use crate::registry::JobRegistry;

pub struct EventHandlers {
    mirror: Arc<MirrorEngine>,
    registry: Arc<JobRegistry>,
}

impl EventHandlers {
    pub fn new(mirror: Arc<MirrorEngine>, registry: Arc<JobRegistry>) -> Self {
        Self { mirror, registry }
    }

    /// Subscribe every handler to `bus`.
    pub fn listen(&self, bus: &EventBus) -> Vec<Subscription> {
        let mirror = Arc::clone(&self.mirror);
        let registry = Arc::clone(&self.registry);
        let created = bus.subscribe(topics::MONITOR_TASK_CREATED, move |event: Event| {
            let mirror = Arc::clone(&mirror);
            let registry = Arc::clone(&registry);
            async move { on_task_created(event, &mirror, &registry).await }
        });

        let deleted = bus.subscribe(topics::MONITOR_TASK_DELETED, |event: Event| async move {
            on_task_deleted(event);
        });

        vec![created, deleted]
    }
}

async fn on_task_created(event: Event, mirror: &MirrorEngine, registry: &JobRegistry) {
    let config: MonitorConfig = match serde_json::from_slice(&event.payload) {
        Ok(config) => config,
        Err(err) => {
            warn!(topic = %event.topic, error = %err, "discarding malformed monitor event");
            return;
        }
    };

    let Some(cancel) = registry.cancellation_for(&config.key) else {
        debug!(repo = %config.key, "job already gone; skipping backfill");
        return;
    };

    match mirror.mirror(&config.key, config.backfill_window(), &cancel).await {
        Ok(outcome) => info!(
            repo = %config.key,
            new_rows = outcome.new_rows,
            "initial backfill completed"
        ),
        Err(MonitorError::Cancelled) => debug!(repo = %config.key, "initial backfill cancelled"),
        Err(err) => warn!(repo = %config.key, error = %err, "initial backfill failed"),
    }
}

fn on_task_deleted(event: Event) {
    match serde_json::from_slice::<MonitorConfig>(&event.payload) {
        Ok(config) => info!(repo = %config.key, "monitoring stopped"),
        Err(err) => warn!(topic = %event.topic, error = %err, "discarding malformed monitor event"),
    }
}
