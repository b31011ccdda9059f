use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;
use tracing::{debug, error, info};

use stratus_common::{Event, EventType};

/// A subscriber callback. Runs as its own task; returning an error (or
/// panicking) is logged and never reaches sibling handlers.
pub type Handler = Arc<dyn Fn(Event) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// In-process pub/sub for lifecycle notifications.
///
/// Fire-and-forget telemetry, not a durable queue: no ordering across
/// handlers, no redelivery, and an event with no subscribers is dropped.
pub struct EventBus {
    handlers: DashMap<EventType, Vec<Handler>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    /// Register a handler. Multiple handlers per type are allowed and
    /// run independently.
    pub fn subscribe(&self, event_type: EventType, handler: Handler) {
        let mut entry = self.handlers.entry(event_type).or_default();
        entry.push(handler);
        info!(
            event_type = %event_type,
            total_handlers = entry.len(),
            "event handler subscribed"
        );
    }

    pub fn handler_count(&self, event_type: EventType) -> usize {
        self.handlers.get(&event_type).map(|h| h.len()).unwrap_or(0)
    }

    /// Fan an event out to all handlers without blocking the publisher.
    /// Each handler runs in its own spawned task behind a panic
    /// boundary.
    pub fn publish(&self, event: Event) {
        let handlers = match self.handlers.get(&event.event_type) {
            Some(h) => h.value().clone(),
            None => {
                debug!(event_type = %event.event_type, event_id = %event.id, "no handlers registered");
                return;
            }
        };

        debug!(
            event_type = %event.event_type,
            event_id = %event.id,
            handler_count = handlers.len(),
            "publishing event"
        );

        for handler in handlers {
            let event = event.clone();
            tokio::spawn(async move {
                run_isolated(handler, event).await;
            });
        }
    }

    /// Run all handlers concurrently and wait for them; returns the
    /// first error observed. For callers that need a completion
    /// guarantee.
    pub async fn publish_and_wait(&self, event: Event) -> anyhow::Result<()> {
        let handlers = match self.handlers.get(&event.event_type) {
            Some(h) => h.value().clone(),
            None => return Ok(()),
        };

        let futures = handlers.into_iter().map(|handler| {
            let event = event.clone();
            async move {
                AssertUnwindSafe(handler(event))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(anyhow::anyhow!("event handler panicked")))
            }
        });

        let mut first_err = None;
        for result in join_all(futures).await {
            if let Err(e) = result {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Drop all handlers for a type. Useful in tests.
    pub fn unsubscribe_all(&self, event_type: EventType) {
        self.handlers.remove(&event_type);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_isolated(handler: Handler, event: Event) {
    let event_type = event.event_type;
    let event_id = event.id.clone();
    match AssertUnwindSafe(handler(event)).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!(event_type = %event_type, event_id = %event_id, error = %e, "event handler failed");
        }
        Err(_) => {
            error!(event_type = %event_type, event_id = %event_id, "event handler panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn make_event() -> Event {
        Event::new(
            EventType::NodeLaunched,
            None,
            serde_json::json!({ "node_id": "n1" }),
        )
    }

    #[tokio::test]
    async fn test_publish_with_no_subscribers_is_ok() {
        let bus = EventBus::new();
        bus.publish(make_event());
        assert!(bus.publish_and_wait(make_event()).await.is_ok());
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_stop_siblings() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicU32::new(0));

        bus.subscribe(
            EventType::NodeLaunched,
            Arc::new(|_| {
                async {
                    panic!("boom");
                    #[allow(unreachable_code)]
                    Ok(())
                }
                .boxed()
            }),
        );
        let calls_clone = calls.clone();
        bus.subscribe(
            EventType::NodeLaunched,
            Arc::new(move |_| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
                .boxed()
            }),
        );

        // The panic surfaces as an error; the sibling still ran.
        assert!(bus.publish_and_wait(make_event()).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_publish_and_wait_returns_handler_error() {
        let bus = EventBus::new();
        bus.subscribe(
            EventType::NodeTerminated,
            Arc::new(|_| async { Err(anyhow::anyhow!("webhook down")) }.boxed()),
        );

        let err = bus
            .publish_and_wait(Event::new(
                EventType::NodeTerminated,
                None,
                serde_json::json!({}),
            ))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("webhook down"));
    }

    #[tokio::test]
    async fn test_fire_and_forget_runs_handlers() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        bus.subscribe(
            EventType::NodeLaunched,
            Arc::new(move |_| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
                .boxed()
            }),
        );

        bus.publish(make_event());

        // publish never blocks on the handler; give the spawned task a
        // moment to run.
        for _ in 0..50 {
            if calls.load(Ordering::SeqCst) == 1 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("handler never ran");
    }
}
